use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub type GiveawayId = Uuid;

/// 抽奖生命周期: Active -> Closing -> Ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GiveawayState {
    Active,
    Closing,
    Ended,
}

/// Durable giveaway record. Owned by the store; everything else works on clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiveawayRecord {
    pub id: GiveawayId,
    pub scope_id: String,
    pub prize: String,
    pub winner_count: u32,
    #[serde(default)]
    pub required_eligibility_id: Option<String>,
    #[serde(default)]
    pub host_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub participants: BTreeSet<String>,
    pub state: GiveawayState,
    #[serde(default)]
    pub winners: Vec<String>,
    #[serde(default)]
    pub reroll_count: u32,
    #[serde(default)]
    pub closing_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl GiveawayRecord {
    pub fn is_active(&self) -> bool {
        self.state == GiveawayState::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ends_at <= now
    }

    /// Closing 状态持续时间是否超过阈值
    pub fn is_stuck_closing(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.state == GiveawayState::Closing
            && self
                .closing_since
                .map(|since| now - since >= timeout)
                .unwrap_or(true)
    }
}

/// Input for `GiveawayStore::create`.
#[derive(Debug, Clone)]
pub struct NewGiveaway {
    pub scope_id: String,
    pub prize: String,
    pub winner_count: u32,
    pub ends_at: DateTime<Utc>,
    pub required_eligibility_id: Option<String>,
    pub host_id: Option<String>,
}

/// 入场 / 退出事件（由外部通知源推送）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EntryEvent {
    pub giveaway_id: GiveawayId,
    pub participant_id: String,
    /// true = 加入, false = 退出
    pub added: bool,
}

/// 创建抽奖请求
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct StartGiveawayRequest {
    /// 所属频道 / 社区
    pub scope_id: String,
    /// 奖品描述
    pub prize: String,
    /// 持续时间（秒）
    pub duration_secs: i64,
    /// 中奖人数（>= 1）
    pub winner_count: u32,
    /// 参与门槛（例如角色ID）
    #[serde(default)]
    pub required_eligibility_id: Option<String>,
    #[serde(default)]
    pub host_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StartGiveawayResponse {
    pub id: GiveawayId,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct RerollRequest {
    /// 是否排除上一轮中奖者 (默认 true)
    #[serde(default = "default_exclude_previous")]
    pub exclude_previous: bool,
}

impl Default for RerollRequest {
    fn default() -> Self {
        Self {
            exclude_previous: default_exclude_previous(),
        }
    }
}

fn default_exclude_previous() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct EntryRequest {
    pub participant_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct GiveawayListQuery {
    /// 按频道过滤
    pub scope_id: Option<String>,
}

/// 抽奖详情响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GiveawayResponse {
    pub id: GiveawayId,
    pub scope_id: String,
    pub prize: String,
    pub winner_count: u32,
    pub required_eligibility_id: Option<String>,
    pub host_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub state: GiveawayState,
    pub participant_count: usize,
    pub participants: Vec<String>,
    pub winners: Vec<String>,
    pub reroll_count: u32,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<GiveawayRecord> for GiveawayResponse {
    fn from(r: GiveawayRecord) -> Self {
        GiveawayResponse {
            id: r.id,
            scope_id: r.scope_id,
            prize: r.prize,
            winner_count: r.winner_count,
            required_eligibility_id: r.required_eligibility_id,
            host_id: r.host_id,
            created_at: r.created_at,
            ends_at: r.ends_at,
            state: r.state,
            participant_count: r.participants.len(),
            participants: r.participants.into_iter().collect(),
            winners: r.winners,
            reroll_count: r.reroll_count,
            ended_at: r.ended_at,
        }
    }
}

/// 结束 / 重抽结果
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WinnersResponse {
    pub id: GiveawayId,
    pub state: GiveawayState,
    pub winners: Vec<String>,
    pub reroll_count: u32,
    /// 写入失败时为 true，后台会自动重试关闭
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EntryResponse {
    pub participant_count: usize,
    /// 本次调用是否改变了参与者列表
    pub changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(state: GiveawayState) -> GiveawayRecord {
        let now = Utc::now();
        GiveawayRecord {
            id: Uuid::new_v4(),
            scope_id: "guild-1".into(),
            prize: "Nitro".into(),
            winner_count: 1,
            required_eligibility_id: None,
            host_id: None,
            created_at: now,
            ends_at: now + Duration::minutes(5),
            participants: BTreeSet::new(),
            state,
            winners: vec![],
            reroll_count: 0,
            closing_since: None,
            ended_at: None,
        }
    }

    #[test]
    fn test_stuck_closing() {
        let now = Utc::now();
        let mut r = record(GiveawayState::Closing);
        r.closing_since = Some(now - Duration::seconds(30));
        assert!(!r.is_stuck_closing(now, Duration::seconds(60)));
        assert!(r.is_stuck_closing(now, Duration::seconds(10)));

        let active = record(GiveawayState::Active);
        assert!(!active.is_stuck_closing(now, Duration::seconds(0)));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&GiveawayState::Closing).unwrap();
        assert_eq!(json, "\"closing\"");
    }

    #[test]
    fn test_reroll_request_defaults_to_excluding() {
        let req: RerollRequest = serde_json::from_str("{}").unwrap();
        assert!(req.exclude_previous);
    }
}
