use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::NotifierConfig;
use crate::error::{AppError, AppResult};
use crate::models::{GiveawayId, GiveawayRecord};

/// Receives results once a giveaway has ended or been rerolled. Delivery is
/// best-effort: the engine logs failures and moves on.
#[async_trait]
pub trait ResultNotifier: Send + Sync {
    async fn announce(&self, record: &GiveawayRecord, winners: &[String]) -> AppResult<()>;
}

/// 仅写日志
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl ResultNotifier for LogNotifier {
    async fn announce(&self, record: &GiveawayRecord, winners: &[String]) -> AppResult<()> {
        if winners.is_empty() {
            log::info!(
                "Giveaway {} ({}) in {} ended without winners",
                record.id,
                record.prize,
                record.scope_id
            );
        } else {
            log::info!(
                "Giveaway {} ({}) in {} won by {}",
                record.id,
                record.prize,
                record.scope_id,
                winners.join(", ")
            );
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct AnnouncePayload<'a> {
    giveaway_id: GiveawayId,
    scope_id: &'a str,
    prize: &'a str,
    winners: &'a [String],
    participant_count: usize,
    reroll_count: u32,
    host_id: Option<&'a str>,
}

/// POSTs the result as JSON to a configured URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, cfg: &NotifierConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent("giveaway-engine/notifier")
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ResultNotifier for WebhookNotifier {
    async fn announce(&self, record: &GiveawayRecord, winners: &[String]) -> AppResult<()> {
        let payload = AnnouncePayload {
            giveaway_id: record.id,
            scope_id: &record.scope_id,
            prize: &record.prize,
            winners,
            participant_count: record.participants.len(),
            reroll_count: record.reroll_count,
            host_id: record.host_id.as_deref(),
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if response.status().is_success() {
            log::info!("Giveaway result delivered: {}", record.id);
            Ok(())
        } else {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(AppError::ExternalApiError(format!(
                "Result webhook failed: HTTP {}: {}",
                status.as_u16(),
                error_text
            )))
        }
    }
}
