//! Cache keys for local durable state.
//!
//! Every key the crate reads or writes is computed by [`CacheKey::storage_key`];
//! call sites never assemble key strings themselves.

use std::fmt;

use crate::chat::core::ids::Identity;
use crate::chat::core::provider::Provider;

/// Addressable entries of the local cache.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum CacheKey {
    /// Full thread list of an identity (JSON).
    Threads(Identity),
    /// Credential of an identity for one provider.
    Credential(Identity, Provider),
    /// Set once the identity has saved a credential through the first-run prompt.
    PromptShown(Identity),
    /// Provider last selected by an identity.
    SelectedProvider(Identity),
    /// Identity of the last loaded session.
    LastIdentity,
}

impl CacheKey {
    /// The string under which this entry is stored.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Threads(identity) => format!("threads:{identity}"),
            Self::Credential(identity, provider) => format!("credential:{identity}:{provider}"),
            Self::PromptShown(identity) => format!("prompt_shown:{identity}"),
            Self::SelectedProvider(identity) => format!("selected_provider:{identity}"),
            Self::LastIdentity => "last_identity".to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}
