use std::collections::HashMap;
use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::notification::Notification;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub chat: ChatOptions,
    #[serde(default)]
    pub log: LogConfig,
    /// Named notification templates
    #[serde(default)]
    pub templates: HashMap<String, Notification>,
}

/// Static options of one chat backend instance.
///
/// Built once at startup and shared read-only by every send.
#[derive(Clone, Deserialize)]
pub struct ChatOptions {
    /// Base URL of the chat web API
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub token: String,
    /// Default display name
    #[serde(default)]
    pub username: String,
    /// Default icon (emoji reference or http(s) URL)
    #[serde(default)]
    pub icon: String,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Disable link and media previews
    #[serde(default)]
    pub disable_unfurl: bool,
    /// Number of recent messages scanned when looking up a grouping key
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_api_url() -> String {
    "https://slack.com/api/".to_string()
}

fn default_history_limit() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Self::builder(&run_mode)?.build()?.try_deserialize()
    }

    fn builder(run_mode: &str) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(Config::builder()
            // Start with default values
            .set_default("chat.api_url", default_api_url())?
            .set_default("chat.history_limit", i64::from(default_history_limit()))?
            .set_default("chat.timeout_secs", default_timeout_secs() as i64)?
            .set_default("log.level", default_log_level())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // ALERT_RELAY__CHAT__TOKEN, ALERT_RELAY__LOG__LEVEL, etc.
            .add_source(
                Environment::with_prefix("ALERT_RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            ))
    }
}

impl ChatOptions {
    /// API base URL, always ending in `/`
    pub fn base_url(&self) -> String {
        if self.api_url.ends_with('/') {
            self.api_url.clone()
        } else {
            format!("{}/", self.api_url)
        }
    }
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: String::new(),
            username: String::new(),
            icon: String::new(),
            insecure_skip_verify: false,
            disable_unfurl: false,
            history_limit: default_history_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptions")
            .field("api_url", &self.api_url)
            .field("token", &if self.token.is_empty() { "" } else { "***" })
            .field("username", &self.username)
            .field("icon", &self.icon)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("disable_unfurl", &self.disable_unfurl)
            .field("history_limit", &self.history_limit)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let chat = ChatOptions::default();
        assert_eq!(chat.api_url, "https://slack.com/api/");
        assert_eq!(chat.history_limit, 100);
        assert_eq!(chat.timeout_secs, 30);
        assert!(!chat.insecure_skip_verify);

        let log = LogConfig::default();
        assert_eq!(log.level, "info");
        assert!(!log.json);
    }

    #[test]
    fn test_base_url_adds_trailing_slash() {
        let chat = ChatOptions {
            api_url: "http://127.0.0.1:9000/api".to_string(),
            ..Default::default()
        };
        assert_eq!(chat.base_url(), "http://127.0.0.1:9000/api/");
    }

    #[test]
    fn test_debug_redacts_token() {
        let chat = ChatOptions {
            token: "xoxb-secret".to_string(),
            ..Default::default()
        };
        let debug = format!("{chat:?}");
        assert!(!debug.contains("xoxb-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_deserialize_from_source() {
        let settings: Settings = Config::builder()
            .add_source(config::File::from_str(
                r#"
                [chat]
                token = "T"
                icon = ":smile:"

                [templates.app-sync]
                message = "App {{.app}} synced"
                groupingKey = "{{.app}}"

                [templates.app-sync.slack]
                deliveryPolicy = "Update"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.chat.token, "T");
        assert_eq!(settings.chat.icon, ":smile:");
        assert_eq!(settings.chat.api_url, "https://slack.com/api/");
        let template = &settings.templates["app-sync"];
        assert_eq!(template.message, "App {{.app}} synced");
        assert_eq!(template.grouping_key, "{{.app}}");
        assert_eq!(
            template.chat.as_ref().map(|chat| chat.delivery_policy),
            Some(crate::notification::DeliveryPolicy::Update)
        );
    }
}
