//! Chat thread model.

use serde::{Deserialize, Serialize};

use crate::chat::core::ids::ThreadId;
use crate::chat::core::message::{Message, Sender};

/// One conversation: an id, a display name and its ordered messages.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Opaque identifier.
    pub id: ThreadId,
    /// Display title (`Chat <n>` until renamed).
    pub name: String,
    /// Messages in chronological order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Creation timestamp in milliseconds since Unix epoch.
    #[serde(default)]
    pub created_at: i64,
    /// Last local modification in milliseconds since Unix epoch.
    #[serde(default)]
    pub updated_at: i64,
}

impl Thread {
    /// Create an empty thread.
    #[must_use]
    pub fn new(name: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: ThreadId::new(),
            name: name.into(),
            messages: Vec::new(),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Whether the loading placeholder is currently shown.
    #[must_use]
    pub fn is_awaiting_reply(&self) -> bool {
        self.messages.iter().any(Message::is_loading)
    }

    /// Remove the loading placeholder; returns how many were removed.
    pub fn remove_loading(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_loading());
        before - self.messages.len()
    }

    /// First message sent by the user, if any.
    #[must_use]
    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.sender == Sender::User)
    }

    /// Copy suitable for storage: the loading placeholder is never persisted.
    #[must_use]
    pub fn persistable(&self) -> Self {
        let mut copy = self.clone();
        copy.remove_loading();
        copy
    }

    /// Record a modification.
    pub fn touch(&mut self, now_ms: i64) {
        self.updated_at = self.updated_at.max(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistable_drops_loading() {
        let mut thread = Thread::new("Chat 1", 10);
        thread.messages.push(Message::user("You", "Hi"));
        thread.messages.push(Message::loading("Medlife.ai", "Analyzing"));
        assert!(thread.is_awaiting_reply());

        let stored = thread.persistable();
        assert_eq!(stored.messages.len(), 1);
        assert!(!stored.is_awaiting_reply());
        assert!(thread.is_awaiting_reply());
    }

    #[test]
    fn test_remove_loading_counts() {
        let mut thread = Thread::new("Chat 1", 0);
        thread.messages.push(Message::loading("Medlife.ai", "Analyzing"));
        assert_eq!(thread.remove_loading(), 1);
        assert_eq!(thread.remove_loading(), 0);
    }

    #[test]
    fn test_missing_timestamps_default() {
        let json = r#"{"id":"t1","name":"Chat 1","messages":[]}"#;
        let thread: Thread = serde_json::from_str(json).unwrap();
        assert_eq!(thread.updated_at, 0);
        assert_eq!(thread.id.as_str(), "t1");
    }
}
