//! Configuration for the chat subsystem.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::core::errors::{ChatError, ChatResult};

/// Environment variable overriding the backend base URL.
pub const API_URL_ENV: &str = "MEDLIFE_API_URL";
/// Environment variable overriding the local cache path.
pub const DB_PATH_ENV: &str = "MEDLIFE_DB_PATH";
/// Environment variable setting a client-side timeout (seconds) on AI queries.
pub const ASK_TIMEOUT_ENV: &str = "MEDLIFE_ASK_TIMEOUT_SECS";

/// Top-level configuration for a chat session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Remote backend settings.
    pub api: ApiConfig,
    /// Local cache settings.
    pub storage: StorageConfig,
    /// Display labels and canned texts.
    pub labels: LabelConfig,
    /// Auto-title settings.
    pub title: TitleConfig,
}

impl ChatConfig {
    /// Create a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `MEDLIFE_*` environment variables when set.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.api.base_url = url;
        }
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(secs) = std::env::var(ASK_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.api.ask_timeout = Some(Duration::from_secs(secs));
        }
        config
    }

    /// Set the backend base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api.base_url = url.into();
        self
    }

    /// Set a client-side timeout on AI queries.
    #[must_use]
    pub const fn with_ask_timeout(mut self, timeout: Duration) -> Self {
        self.api.ask_timeout = Some(timeout);
        self
    }

    /// Set the local cache path.
    #[must_use]
    pub fn with_sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.sqlite_path = path.into();
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        Url::parse(&self.api.base_url)?;

        for (field, path) in [
            ("api.ask_path", &self.api.ask_path),
            ("api.sessions_path", &self.api.sessions_path),
            ("api.members_path", &self.api.members_path),
        ] {
            if !path.starts_with('/') {
                return Err(ChatError::InvalidConfig(format!(
                    "{field} must start with '/'"
                )));
            }
        }

        if self.api.request_timeout.is_zero() {
            return Err(ChatError::InvalidConfig(
                "api.request_timeout must be > 0".to_string(),
            ));
        }

        if self.api.ask_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ChatError::InvalidConfig(
                "api.ask_timeout must be > 0 when set".to_string(),
            ));
        }

        if self.storage.table.trim().is_empty()
            || !self
                .storage
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ChatError::InvalidConfig(
                "storage.table must be a plain identifier".to_string(),
            ));
        }

        if self.labels.user.trim().is_empty() || self.labels.assistant.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "labels.user and labels.assistant must not be empty".to_string(),
            ));
        }

        if self.title.max_chars == 0 {
            return Err(ChatError::InvalidConfig(
                "title.max_chars must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Remote backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend.
    pub base_url: String,
    /// Path of the AI query endpoint.
    pub ask_path: String,
    /// Path of the thread collection endpoint.
    pub sessions_path: String,
    /// Path of the member list endpoint.
    pub members_path: String,
    /// Timeout for session and member calls.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Optional client-side timeout on AI queries; `None` waits indefinitely.
    #[serde(default, with = "opt_duration_serde")]
    pub ask_timeout: Option<Duration>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            ask_path: "/medlife/ask_ai/".to_string(),
            sessions_path: "/medlife/chat_sessions/".to_string(),
            members_path: "/medlife/members/".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            ask_timeout: None,
        }
    }
}

/// Local cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Key/value table name.
    pub table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("medlife_chat.sqlite"),
            table: "local_cache".to_string(),
        }
    }
}

/// Display labels and canned texts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Label of user messages.
    pub user: String,
    /// Display name of the assistant.
    pub assistant: String,
    /// Markup shown while a reply is pending.
    pub loading: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            user: "You".to_string(),
            assistant: "Medlife.ai".to_string(),
            loading: "Analyzing<span class='dot'>.</span><span class='dot'>.</span><span class='dot'>.</span>"
                .to_string(),
        }
    }
}

/// Auto-title settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TitleConfig {
    /// Maximum title length in characters.
    pub max_chars: usize,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self { max_chars: 40 }
    }
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

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

/// Serde module for optional Duration serialization.
mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
