use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::config::EligibilityConfig;
use crate::error::{AppError, AppResult};

/// Decides whether a participant may enter a gated giveaway.
#[async_trait]
pub trait EligibilityGate: Send + Sync {
    async fn satisfies(
        &self,
        scope_id: &str,
        participant_id: &str,
        required_eligibility_id: &str,
    ) -> bool;
}

/// 不做任何限制（未配置门槛服务时使用）
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGate;

#[async_trait]
impl EligibilityGate for AllowAllGate {
    async fn satisfies(&self, _: &str, _: &str, _: &str) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct EligibilityResponse {
    eligible: bool,
}

/// Asks an external membership service:
/// `GET {endpoint}/scopes/{scope}/members/{participant}/eligibility/{required}`
/// answering `{"eligible": bool}`. Ids are sent as percent-encoded path
/// segments. Any failure counts as not eligible.
#[derive(Clone)]
pub struct HttpEligibilityGate {
    http: Client,
    endpoint: Url,
}

impl HttpEligibilityGate {
    pub fn new(endpoint: impl Into<String>, cfg: &EligibilityConfig) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent("giveaway-engine/eligibility")
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let endpoint = endpoint.into();
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            AppError::ConfigError(format!("Invalid eligibility endpoint {endpoint}: {e}"))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(AppError::ConfigError(format!(
                "Eligibility endpoint {endpoint} cannot carry a path"
            )));
        }
        Ok(Self { http, endpoint })
    }

    fn check_url(
        &self,
        scope_id: &str,
        participant_id: &str,
        required_eligibility_id: &str,
    ) -> AppResult<Url> {
        let ids = [scope_id, participant_id, required_eligibility_id];
        // "." ".." 会被 URL 规范化吃掉，控制字符会被 URL 解析静默删除
        if ids
            .iter()
            .any(|id| id.is_empty() || *id == "." || *id == ".." || id.chars().any(char::is_control))
        {
            return Err(AppError::ValidationError(format!(
                "Id cannot be used in an eligibility request: {ids:?}"
            )));
        }

        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::ConfigError("Eligibility endpoint cannot carry a path".into()))?
            .pop_if_empty()
            .extend([
                "scopes",
                scope_id,
                "members",
                participant_id,
                "eligibility",
                required_eligibility_id,
            ]);
        Ok(url)
    }

    async fn check(
        &self,
        scope_id: &str,
        participant_id: &str,
        required_eligibility_id: &str,
    ) -> AppResult<bool> {
        let url = self.check_url(scope_id, participant_id, required_eligibility_id)?;
        let resp = self.http.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Eligibility check failed: HTTP {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let body: EligibilityResponse = resp.json().await?;
        Ok(body.eligible)
    }
}

#[async_trait]
impl EligibilityGate for HttpEligibilityGate {
    async fn satisfies(
        &self,
        scope_id: &str,
        participant_id: &str,
        required_eligibility_id: &str,
    ) -> bool {
        match self
            .check(scope_id, participant_id, required_eligibility_id)
            .await
        {
            Ok(eligible) => eligible,
            Err(e) => {
                log::warn!(
                    "Eligibility check for {participant_id} in {scope_id} failed, rejecting entry: {e}"
                );
                false
            }
        }
    }
}
