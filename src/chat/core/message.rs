//! Chat message model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chat::core::ids::MessageId;
use crate::chat::core::markup::normalize_text;

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The patient typing in the chat.
    User,
    /// The AI assistant (older records use `"ai"`).
    #[serde(alias = "ai")]
    Assistant,
}

impl Sender {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" | "ai" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// A single message of a thread.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within the thread.
    pub id: MessageId,
    /// Author.
    pub sender: Sender,
    /// Display label of the author.
    pub name: String,
    /// Body with line breaks stored as `<br>`.
    pub text: String,
}

impl Message {
    /// Build a user message, normalizing the raw body.
    #[must_use]
    pub fn user(label: impl Into<String>, raw: &str) -> Self {
        Self::normalized(Sender::User, label, raw)
    }

    /// Build an assistant message, normalizing the raw body.
    #[must_use]
    pub fn assistant(name: impl Into<String>, raw: &str) -> Self {
        Self::normalized(Sender::Assistant, name, raw)
    }

    /// Build the transient loading placeholder. Its text is display markup and
    /// is kept verbatim.
    #[must_use]
    pub fn loading(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::loading(),
            sender: Sender::Assistant,
            name: name.into(),
            text: text.into(),
        }
    }

    /// Whether this is the loading placeholder.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.id.is_loading()
    }

    fn normalized(sender: Sender, name: impl Into<String>, raw: &str) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            name: name.into(),
            text: normalize_text(raw),
        }
    }
}
