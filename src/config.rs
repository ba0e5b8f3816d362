use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the match host.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to. Default: 127.0.0.1:8080.
    pub bind_addr: String,
    /// Endpoint receiving finished bot and offline matches.
    /// Default: http://localhost:8081/game/bot/save.
    pub result_url: String,
    /// Path of a UCI engine binary. When unset, bot matches use the
    /// built-in fallback oracle.
    pub engine_path: Option<PathBuf>,
    /// Search depth requested from the oracle. Default: 10.
    pub engine_depth: u8,
    /// Delay between the bot's turn starting and the search request.
    /// Default: 500ms.
    pub bot_delay: Duration,
    /// Delay before an oracle answer is applied. Default: 1.5s.
    pub bot_reply_delay: Duration,
    /// Directory served under /static. Default: ./static.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            result_url: "http://localhost:8081/game/bot/save".to_string(),
            engine_path: None,
            engine_depth: 10,
            bot_delay: Duration::from_millis(500),
            bot_reply_delay: Duration::from_millis(1500),
            static_dir: PathBuf::from("./static"),
        }
    }
}

impl ServerConfig {
    /// Builds the configuration from `CHESS_*` environment variables,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("CHESS_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(url) = lookup("CHESS_RESULT_URL") {
            config.result_url = url;
        }
        if let Some(path) = lookup("CHESS_ENGINE_PATH").filter(|p| !p.is_empty()) {
            config.engine_path = Some(PathBuf::from(path));
        }
        if let Some(depth) = lookup("CHESS_ENGINE_DEPTH") {
            config.engine_depth = parse_value("CHESS_ENGINE_DEPTH", &depth)?;
        }
        if let Some(ms) = lookup("CHESS_BOT_DELAY_MS") {
            config.bot_delay = Duration::from_millis(parse_value("CHESS_BOT_DELAY_MS", &ms)?);
        }
        if let Some(ms) = lookup("CHESS_BOT_REPLY_DELAY_MS") {
            config.bot_reply_delay =
                Duration::from_millis(parse_value("CHESS_BOT_REPLY_DELAY_MS", &ms)?);
        }
        if let Some(dir) = lookup("CHESS_STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "bind_addr must not be empty".to_string(),
            });
        }
        if self.engine_depth == 0 {
            return Err(ConfigError::Invalid {
                reason: "engine_depth must be at least 1".to_string(),
            });
        }
        if !self.result_url.starts_with("http://") && !self.result_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                reason: format!("result_url must be an http(s) URL, got {}", self.result_url),
            });
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
