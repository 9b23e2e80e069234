use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::engine::chat_engine::EngineSettings;

/// Top-level server configuration, loaded from huddle.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub engine: EngineSection,
    pub moderation: ModerationSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Reported by the health endpoint.
    pub environment: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
            environment: "development".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:huddle.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
    pub session_expiry_hours: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: "huddle-dev-secret-change-me".into(),
            session_expiry_hours: 720,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub repository_timeout_ms: u64,
    pub moderation_timeout_ms: u64,
    /// Per-connection outbound queue bound.
    pub outbound_queue_size: usize,
    pub max_message_length: usize,
    /// Seconds between WebSocket pings.
    pub heartbeat_interval_secs: u64,
    /// Messages a user may send per `message_rate_window_secs`.
    pub message_rate_limit: u32,
    pub message_rate_window_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            repository_timeout_ms: 5000,
            moderation_timeout_ms: 2000,
            outbound_queue_size: 1024,
            max_message_length: 4000,
            heartbeat_interval_secs: 15,
            message_rate_limit: 60,
            message_rate_window_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ModerationSection {
    /// Words that reject a message outright.
    pub blocked_words: Vec<String>,
    /// Words masked with asterisks.
    pub filtered_words: Vec<String>,
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::parse(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Some(v) = var("ENVIRONMENT") {
            self.server.environment = v;
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = var("SESSION_EXPIRY_HOURS")
            && let Ok(hours) = v.parse()
        {
            self.auth.session_expiry_hours = hours;
        }
        if let Some(v) = var("REPOSITORY_TIMEOUT_MS")
            && let Ok(ms) = v.parse()
        {
            self.engine.repository_timeout_ms = ms;
        }
        if let Some(v) = var("MODERATION_TIMEOUT_MS")
            && let Ok(ms) = v.parse()
        {
            self.engine.moderation_timeout_ms = ms;
        }
        if let Some(v) = var("OUTBOUND_QUEUE_SIZE")
            && let Ok(size) = v.parse()
        {
            self.engine.outbound_queue_size = size;
        }
        if let Some(v) = var("MAX_MESSAGE_LENGTH")
            && let Ok(len) = v.parse()
        {
            self.engine.max_message_length = len;
        }
        if let Some(v) = var("HEARTBEAT_INTERVAL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.engine.heartbeat_interval_secs = secs;
        }
        if let Some(v) = var("MESSAGE_RATE_LIMIT")
            && let Ok(limit) = v.parse()
        {
            self.engine.message_rate_limit = limit;
        }
        if let Some(v) = var("MESSAGE_RATE_WINDOW_SECS")
            && let Ok(secs) = v.parse()
        {
            self.engine.message_rate_window_secs = secs;
        }
        if let Some(v) = var("BLOCKED_WORDS") {
            self.moderation.blocked_words = split_list(&v);
        }
        if let Some(v) = var("FILTERED_WORDS") {
            self.moderation.filtered_words = split_list(&v);
        }
    }

    /// Engine tunables derived from the `[engine]` section.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            repository_timeout: Duration::from_millis(self.engine.repository_timeout_ms),
            moderation_timeout: Duration::from_millis(self.engine.moderation_timeout_ms),
            outbound_queue_size: self.engine.outbound_queue_size,
            max_message_length: self.engine.max_message_length,
            message_rate_limit: self.engine.message_rate_limit,
            message_rate_window: Duration::from_secs(self.engine.message_rate_window_secs.max(1)),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.engine.heartbeat_interval_secs.max(1))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
