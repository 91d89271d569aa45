//! Wire types exchanged with the Medlife backend.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::chat::core::ids::{MessageId, ThreadId};
use crate::chat::core::markup::Markup;
use crate::chat::core::member::Member;
use crate::chat::core::message::{Message, Sender};
use crate::chat::core::provider::Provider;
use crate::chat::core::thread::Thread;

/// A thread record as stored remotely; every field may be missing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RemoteThread {
    /// Identifier (string or number).
    #[serde(default)]
    pub id: Option<Value>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Messages (`chat` in older payloads).
    #[serde(default, alias = "chat")]
    pub messages: Option<Vec<RemoteMessage>>,
    /// Creation timestamp (ms).
    #[serde(default)]
    pub created_at: Option<i64>,
    /// Last modification timestamp (ms).
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// A message record as stored remotely.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RemoteMessage {
    /// Identifier (string or number).
    #[serde(default)]
    pub id: Option<Value>,
    /// `user`, `assistant` or `ai` (`type` in exported payloads).
    #[serde(default, alias = "type")]
    pub sender: Option<String>,
    /// Display label.
    #[serde(default)]
    pub name: Option<String>,
    /// Stored body (`message` in exported payloads).
    #[serde(default, alias = "message")]
    pub text: Option<String>,
}

/// Convert a JSON id into its string form.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RemoteThread {
    /// Normalize into the canonical thread shape.
    ///
    /// `position` is the 0-based index in the remote list and feeds the
    /// placeholder name when none is stored. Stored bodies are taken verbatim
    /// (they were normalized when created), loading placeholders are dropped and
    /// colliding message ids are re-minted.
    #[must_use]
    pub fn into_thread(self, position: usize, labels: (&str, &str), now_ms: i64) -> Thread {
        let id = id_string(self.id.as_ref()).map_or_else(ThreadId::new, ThreadId::from_raw);
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| Markup::placeholder_name(position + 1));

        let mut seen = HashSet::new();
        let messages = self
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.into_message(labels))
            .map(|mut m| {
                if !seen.insert(m.id.clone()) {
                    m.id = MessageId::new();
                    seen.insert(m.id.clone());
                }
                m
            })
            .collect();

        let created_at = self.created_at.unwrap_or(now_ms);
        Thread {
            id,
            name,
            messages,
            created_at,
            updated_at: self.updated_at.unwrap_or(0),
        }
    }
}

impl RemoteMessage {
    /// Normalize into a [`Message`]; `None` for loading placeholders and
    /// records with an unknown sender.
    fn into_message(self, (user_label, assistant_label): (&str, &str)) -> Option<Message> {
        let sender: Sender = match self.sender.as_deref().unwrap_or("user").parse() {
            Ok(sender) => sender,
            Err(unknown) => {
                tracing::debug!("Dropping remote message with unknown sender {unknown:?}");
                return None;
            }
        };
        let id = id_string(self.id.as_ref()).map_or_else(MessageId::new, MessageId::from_raw);
        if id.is_loading() {
            return None;
        }
        let name = self.name.unwrap_or_else(|| match sender {
            Sender::User => user_label.to_string(),
            Sender::Assistant => assistant_label.to_string(),
        });
        Some(Message {
            id,
            sender,
            name,
            text: self.text.unwrap_or_default(),
        })
    }
}

/// Thread list payload: a bare array or `{"sessions": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThreadsEnvelope {
    List(Vec<RemoteThread>),
    Wrapped { sessions: Vec<RemoteThread> },
}

impl ThreadsEnvelope {
    pub(crate) fn into_inner(self) -> Vec<RemoteThread> {
        match self {
            Self::List(threads) | Self::Wrapped { sessions: threads } => threads,
        }
    }
}

/// Member list payload: a bare array or `{"members": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MembersEnvelope {
    List(Vec<Member>),
    Wrapped { members: Vec<Member> },
}

impl MembersEnvelope {
    pub(crate) fn into_inner(self) -> Vec<Member> {
        match self {
            Self::List(members) | Self::Wrapped { members } => members,
        }
    }
}

/// Body of a full-set thread replace.
#[derive(Debug, Serialize)]
pub(crate) struct ReplaceThreadsBody<'a> {
    pub email: &'a str,
    pub sessions: &'a [Thread],
}

/// One AI query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AskRequest {
    /// Free-text question.
    pub query: String,
    /// Provider credential.
    pub credential: String,
    /// Provider the credential belongs to.
    pub provider: Provider,
    /// User identity.
    pub identity: String,
    /// Serialized member context.
    pub member_context: String,
}

/// Why an AI query produced no answer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AskFailure {
    /// The backend answered with a non-success status.
    #[error("backend rejected the query with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// No response at all (connection failure, timeout, unreadable body).
    #[error("no response from backend: {0}")]
    Transport(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Value,
}

/// Human-readable `detail` of an error body, or the raw body when it has none.
#[must_use]
pub fn extract_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.trim().to_string(),
    }
}
