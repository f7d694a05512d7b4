use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub giveaway: GiveawayConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub eligibility: EligibilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// CORS 允许的来源；为空表示不限制
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 快照文件路径；为空时只保存在内存中（重启即丢失）
    #[serde(default)]
    pub snapshot_path: Option<String>,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// 处于 Closing 超过该时长视为卡住，会被重新关闭
    #[serde(default = "default_closing_timeout_secs")]
    pub closing_timeout_secs: u64,
    /// 已结束的抽奖保留多久（保留期内可以 reroll）
    #[serde(default = "default_ended_retention_secs")]
    pub ended_retention_secs: u64,
    #[serde(default = "default_close_concurrency")]
    pub close_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiveawayConfig {
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default = "default_max_winners")]
    pub max_winners: u32,
    #[serde(default = "default_entry_queue_capacity")]
    pub entry_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

/// 时长类配置的上限（约 100 年），超出会让 chrono 溢出
pub const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 3600;

fn span(secs: u64) -> chrono::Duration {
    i64::try_from(secs.min(MAX_SPAN_SECS))
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_tick_interval_secs() -> u64 {
    10
}

fn default_closing_timeout_secs() -> u64 {
    60
}

fn default_ended_retention_secs() -> u64 {
    7 * 24 * 3600
}

fn default_close_concurrency() -> usize {
    8
}

fn default_max_duration_secs() -> u64 {
    30 * 24 * 3600
}

fn default_max_winners() -> u32 {
    50
}

fn default_entry_queue_capacity() -> usize {
    1024
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: Some("data/giveaways.json".to_string()),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            closing_timeout_secs: default_closing_timeout_secs(),
            ended_retention_secs: default_ended_retention_secs(),
            close_concurrency: default_close_concurrency(),
        }
    }
}

impl SchedulerConfig {
    pub fn closing_timeout(&self) -> chrono::Duration {
        span(self.closing_timeout_secs)
    }

    /// `0` 表示永久保留
    pub fn ended_retention(&self) -> Option<chrono::Duration> {
        match self.ended_retention_secs {
            0 => None,
            secs => Some(span(secs)),
        }
    }
}

impl GiveawayConfig {
    pub fn max_duration(&self) -> chrono::Duration {
        span(self.max_duration_secs)
    }
}

impl Default for GiveawayConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            max_winners: default_max_winners(),
            entry_queue_capacity: default_entry_queue_capacity(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let mut config: Config = match std::fs::read_to_string(&config_path) {
            Ok(config_str) => Self::parse(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("Config file {config_path} not found, using environment and defaults");
                Config {
                    server: ServerConfig {
                        host: "0.0.0.0".to_string(),
                        port: 8080,
                        allowed_origins: Vec::new(),
                    },
                    storage: StorageConfig::default(),
                    scheduler: SchedulerConfig::default(),
                    giveaway: GiveawayConfig::default(),
                    notifier: NotifierConfig::default(),
                    eligibility: EligibilityConfig::default(),
                }
            }
            Err(e) => {
                return Err(format!("Unable to read config file {config_path}: {e}").into());
            }
        };

        // 环境变量覆盖（即便文件存在时也覆盖）
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| format!("Failed to parse config file: {e}"))?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            env::var(name).ok().and_then(|v| v.parse::<T>().ok())
        }

        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(p) = get_env_parse("SERVER_PORT") {
            self.server.port = p;
        }
        if let Ok(v) = env::var("CORS_ALLOWED_ORIGINS") {
            self.server.allowed_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = env::var("SNAPSHOT_PATH") {
            self.storage.snapshot_path = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(n) = get_env_parse("SNAPSHOT_WRITE_TIMEOUT_MS") {
            self.storage.write_timeout_ms = n;
        }
        if let Some(n) = get_env_parse("SCHEDULER_TICK_INTERVAL_SECS") {
            self.scheduler.tick_interval_secs = n;
        }
        if let Some(n) = get_env_parse("SCHEDULER_CLOSING_TIMEOUT_SECS") {
            self.scheduler.closing_timeout_secs = n;
        }
        if let Some(n) = get_env_parse("SCHEDULER_ENDED_RETENTION_SECS") {
            self.scheduler.ended_retention_secs = n;
        }
        if let Some(n) = get_env_parse("SCHEDULER_CLOSE_CONCURRENCY") {
            self.scheduler.close_concurrency = n;
        }
        if let Some(n) = get_env_parse("GIVEAWAY_MAX_DURATION_SECS") {
            self.giveaway.max_duration_secs = n;
        }
        if let Some(n) = get_env_parse("GIVEAWAY_MAX_WINNERS") {
            self.giveaway.max_winners = n;
        }
        if let Some(n) = get_env_parse("ENTRY_QUEUE_CAPACITY") {
            self.giveaway.entry_queue_capacity = n;
        }
        if let Ok(v) = env::var("NOTIFIER_WEBHOOK_URL") {
            self.notifier.webhook_url = Some(v);
        }
        if let Some(n) = get_env_parse("NOTIFIER_TIMEOUT_SECS") {
            self.notifier.timeout_secs = n;
        }
        if let Ok(v) = env::var("ELIGIBILITY_ENDPOINT") {
            self.eligibility.endpoint = Some(v);
        }
        if let Some(n) = get_env_parse("ELIGIBILITY_TIMEOUT_SECS") {
            self.eligibility.timeout_secs = n;
        }
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.scheduler.tick_interval_secs == 0 {
            return Err("scheduler.tick_interval_secs must be greater than 0".into());
        }
        if self.scheduler.close_concurrency == 0 {
            return Err("scheduler.close_concurrency must be greater than 0".into());
        }
        if self.giveaway.max_winners == 0 {
            return Err("giveaway.max_winners must be greater than 0".into());
        }
        if self.giveaway.entry_queue_capacity == 0 {
            return Err("giveaway.entry_queue_capacity must be greater than 0".into());
        }
        for (name, secs) in [
            ("scheduler.closing_timeout_secs", self.scheduler.closing_timeout_secs),
            ("scheduler.ended_retention_secs", self.scheduler.ended_retention_secs),
            ("giveaway.max_duration_secs", self.giveaway.max_duration_secs),
        ] {
            if secs > MAX_SPAN_SECS {
                return Err(format!("{name} must not exceed {MAX_SPAN_SECS}").into());
            }
        }
        Ok(())
    }
}
