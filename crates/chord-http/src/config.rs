//! HTTP engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the Discord HTTP engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bot token from the Discord Developer Portal.
    pub token: String,

    /// Application ID, needed for application-command routes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<u64>,

    /// Discord API version (default: 10).
    #[serde(default = "default_api_version")]
    pub api_version: u8,

    /// Unversioned base URL (default: `https://discord.com/api`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout.
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

fn default_api_version() -> u8 {
    10
}

fn default_base_url() -> String {
    "https://discord.com/api".into()
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl ApiConfig {
    /// Create a config with defaults for everything but the token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        // Accept tokens pasted with the "Bot " prefix already attached.
        let token = token.into();
        let token = token.strip_prefix("Bot ").unwrap_or(&token).to_string();

        Self {
            token,
            application_id: None,
            api_version: default_api_version(),
            base_url: default_base_url(),
            timeout: default_timeout(),
        }
    }

    /// Versioned API URL, e.g. `https://discord.com/api/v10`.
    #[must_use]
    pub fn api_url(&self) -> String {
        format!("{}/v{}", self.base_url.trim_end_matches('/'), self.api_version)
    }

    /// The User-Agent sent with every request.
    #[must_use]
    pub fn user_agent() -> String {
        format!(
            "DiscordBot (https://github.com/chord-rs/chord, {}) chord-http",
            env!("CARGO_PKG_VERSION")
        )
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_is_versioned() {
        let config = ApiConfig::new("token");
        assert_eq!(config.api_url(), "https://discord.com/api/v10");
    }

    #[test]
    fn bot_prefix_is_stripped() {
        let config = ApiConfig::new("Bot abc123");
        assert_eq!(config.token, "abc123");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ApiConfig = serde_json::from_str(r#"{"token": "t"}"#).unwrap();
        assert_eq!(config.api_version, 10);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }
}
