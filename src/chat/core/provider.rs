//! AI providers a user can hold a credential for.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named external AI backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// `OpenAI`.
    #[serde(rename = "openai")]
    OpenAi,
    /// Google Gemini.
    Gemini,
    /// Anthropic Claude (`cloude` is a legacy spelling).
    #[serde(alias = "cloude")]
    Claude,
    /// Mistral.
    Mistral,
    /// Ollama.
    Ollama,
}

impl Provider {
    /// All providers, in fallback priority order.
    pub const PRIORITY: [Self; 5] = [
        Self::OpenAi,
        Self::Gemini,
        Self::Claude,
        Self::Mistral,
        Self::Ollama,
    ];

    /// Stable identifier sent to the backend and used in storage keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Claude => "claude",
            Self::Mistral => "mistral",
            Self::Ollama => "ollama",
        }
    }

    /// Human-readable name for messages.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Gemini => "Gemini",
            Self::Claude => "Claude",
            Self::Mistral => "Mistral",
            Self::Ollama => "Ollama",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown provider name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderParseError(pub String);

impl fmt::Display for ProviderParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider: {}", self.0)
    }
}

impl std::error::Error for ProviderParseError {}

impl FromStr for Provider {
    type Err = ProviderParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            "claude" | "cloude" => Ok(Self::Claude),
            "mistral" => Ok(Self::Mistral),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ProviderParseError(value.to_string())),
        }
    }
}
