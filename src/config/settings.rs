use crate::error::{RelayError, Result};
use crate::telegram::ChatId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const ENV_PREFIX: &str = "TG_PLUGIN__";
pub const DEFAULT_SOURCE_URL: &str = "http://localhost:80";
pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub source: SourceConfig,
    pub telegram: TelegramConfig,
    pub log: LogConfig,
    pub ignore_env_vars: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub client_token: String,
    pub handshake_timeout_secs: u64,
    pub retry_delay_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            client_token: String::new(),
            handshake_timeout_secs: 10,
            retry_delay_secs: 5,
        }
    }
}

impl SourceConfig {
    /// Parsed server URL, falling back to localhost when unset
    pub fn server_url(&self) -> Result<Url> {
        let raw = if self.url.trim().is_empty() {
            tracing::warn!("gotify url is not set. Defaulting to localhost");
            DEFAULT_SOURCE_URL
        } else {
            self.url.trim()
        };
        Url::parse(raw).map_err(|e| RelayError::Config(format!("invalid source.url: {}", e)))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub default_bot_token: String,
    pub default_chat_ids: Vec<ChatId>,
    pub api_base_url: String,
    pub format: FormattingOptions,
    /// Evaluated in declaration order; the first target claiming an app id wins
    pub targets: Vec<Target>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            default_bot_token: String::new(),
            default_chat_ids: Vec::new(),
            api_base_url: DEFAULT_TELEGRAM_API.to_string(),
            format: FormattingOptions::default(),
            targets: Vec::new(),
        }
    }
}

impl TelegramConfig {
    /// Target synthesized from the top-level default token and chat ids
    pub fn default_target(&self) -> Target {
        Target {
            name: "default".to_string(),
            token: self.default_bot_token.clone(),
            chat_ids: self.default_chat_ids.clone(),
            app_ids: Vec::new(),
            format: None,
        }
    }
}

/// A bot + chats responsible for an explicit set of Gotify applications
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub name: String,
    pub token: String,
    pub chat_ids: Vec<ChatId>,
    pub app_ids: Vec<u32>,
    pub format: Option<FormattingOptions>,
}

impl Target {
    pub fn claims(&self, app_id: u32) -> bool {
        self.app_ids.contains(&app_id)
    }

    /// Per-target options, or the global ones when the target has none
    pub fn format_or<'a>(&'a self, global: &'a FormattingOptions) -> &'a FormattingOptions {
        self.format.as_ref().unwrap_or(global)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormattingOptions {
    pub include_app_name: bool,
    pub include_timestamp: bool,
    pub include_priority: bool,
    pub priority_threshold: u32,
    pub include_extras: bool,
    pub parse_mode: String,
}

impl Default for FormattingOptions {
    fn default() -> Self {
        Self {
            include_app_name: false,
            include_timestamp: false,
            include_priority: false,
            priority_threshold: 0,
            include_extras: false,
            parse_mode: "MarkdownV2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.telegram.default_bot_token.is_empty() {
            return Err(config_err("telegram.default_bot_token is required"));
        }
        if self.telegram.default_chat_ids.is_empty() {
            return Err(config_err("telegram.default_chat_ids is required"));
        }

        let url = self.source.server_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(config_err("source.url must use http or https"));
        }
        if self.source.client_token.is_empty() {
            return Err(config_err("source.client_token is required"));
        }

        let mut claimed: HashMap<u32, &str> = HashMap::new();
        for target in &self.telegram.targets {
            if target.token.is_empty() {
                return Err(config_err(&format!(
                    "telegram.targets.{}.token is required",
                    target.name
                )));
            }
            if target.chat_ids.is_empty() {
                return Err(config_err(&format!(
                    "telegram.targets.{}.chat_ids is required",
                    target.name
                )));
            }
            if target.app_ids.is_empty() {
                return Err(config_err(&format!(
                    "telegram.targets.{}.app_ids is required",
                    target.name
                )));
            }
            for app_id in &target.app_ids {
                if let Some(first) = claimed.insert(*app_id, &target.name) {
                    tracing::warn!(
                        app_id = app_id,
                        first = %first,
                        shadowed = %target.name,
                        "app id claimed by more than one target, the first declared wins"
                    );
                    claimed.insert(*app_id, first);
                }
            }
        }

        Ok(())
    }
}

fn config_err(msg: &str) -> RelayError {
    RelayError::Config(msg.to_string())
}

/// Load settings from `.env`, an optional JSON file and the environment
pub fn load_settings() -> Result<Settings> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let mut settings = match std::env::var(format!("{ENV_PREFIX}CONFIG_FILE")) {
        Ok(path) => load_from_file(&path)?,
        Err(_) => Settings::default(),
    };

    if !settings.ignore_env_vars {
        apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    }

    settings.validate()?;
    Ok(settings)
}

/// Read settings from a JSON file; missing fields take their defaults
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Settings> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let settings = serde_json::from_str(&raw)?;
    Ok(settings)
}

/// Overlay `TG_PLUGIN__*` variables; values that fail to parse are skipped
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
    let flag = |name: &str, field: &mut bool| {
        if let Some(v) = var(name).and_then(|v| parse_bool(&v)) {
            *field = v;
        }
    };

    if let Some(v) = var("GOTIFY_URL") {
        settings.source.url = v;
    }
    if let Some(v) = var("GOTIFY_CLIENT_TOKEN") {
        settings.source.client_token = v;
    }
    if let Some(v) = var("GOTIFY_HANDSHAKE_TIMEOUT").and_then(|v| v.parse().ok()) {
        settings.source.handshake_timeout_secs = v;
    }
    if let Some(v) = var("TELEGRAM_DEFAULT_BOT_TOKEN") {
        settings.telegram.default_bot_token = v;
    }
    if let Some(v) = var("TELEGRAM_DEFAULT_CHAT_IDS") {
        settings.telegram.default_chat_ids = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ChatId::new)
            .collect();
    }

    let format = &mut settings.telegram.format;
    flag("MESSAGE_INCLUDE_APP_NAME", &mut format.include_app_name);
    flag("MESSAGE_INCLUDE_TIMESTAMP", &mut format.include_timestamp);
    flag("MESSAGE_INCLUDE_PRIORITY", &mut format.include_priority);
    flag("MESSAGE_INCLUDE_EXTRAS", &mut format.include_extras);
    if let Some(v) = var("MESSAGE_PRIORITY_THRESHOLD").and_then(|v| v.parse().ok()) {
        format.priority_threshold = v;
    }
    if let Some(v) = var("MESSAGE_PARSE_MODE") {
        format.parse_mode = v;
    }

    if let Some(v) = var("LOG_LEVEL") {
        settings.log.level = v;
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}
