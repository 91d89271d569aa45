//! Per-identity provider credentials and the selected provider.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::Identity;
use crate::chat::core::provider::Provider;
use crate::chat::storage::keys::CacheKey;
use crate::chat::storage::local_cache::LocalCache;

const FLAG_SET: &str = "1";

/// Answers "can we send?" and "with which provider?".
///
/// Every mutation is written through to the local cache before returning, and
/// the selected provider is re-derived after each one: kept if it still has a
/// credential, otherwise the first available provider in priority order, or
/// none.
pub struct CredentialRegistry {
    cache: Arc<dyn LocalCache>,
    identity: Option<Identity>,
    secrets: HashMap<Provider, String>,
    selected: Option<Provider>,
    prompt_shown: bool,
}

impl CredentialRegistry {
    /// Create an empty registry; call [`CredentialRegistry::load`] before use.
    #[must_use]
    pub fn new(cache: Arc<dyn LocalCache>) -> Self {
        Self {
            cache,
            identity: None,
            secrets: HashMap::new(),
            selected: None,
            prompt_shown: false,
        }
    }

    /// Replace the in-memory state with what `identity` has cached.
    ///
    /// # Errors
    /// Returns an error if the local cache cannot be read or written.
    pub fn load(&mut self, identity: &Identity) -> ChatResult<()> {
        self.identity = Some(identity.clone());
        self.secrets.clear();

        for provider in Provider::PRIORITY {
            let key = CacheKey::Credential(identity.clone(), provider);
            if let Some(secret) = self.cache.get(&key)? {
                let secret = secret.trim();
                if !secret.is_empty() {
                    self.secrets.insert(provider, secret.to_string());
                }
            }
        }

        self.selected = match self.cache.get(&CacheKey::SelectedProvider(identity.clone()))? {
            Some(raw) => match raw.parse::<Provider>() {
                Ok(provider) => Some(provider),
                Err(err) => {
                    warn!("Ignoring cached provider selection: {err}");
                    None
                }
            },
            None => None,
        };
        self.prompt_shown = self
            .cache
            .get(&CacheKey::PromptShown(identity.clone()))?
            .is_some();

        self.reconcile_selection()?;
        debug!(
            "Loaded {} credentials, selected provider: {:?}",
            self.secrets.len(),
            self.selected
        );
        Ok(())
    }

    /// Store a trimmed credential; an empty one removes it. Saving a non-empty
    /// credential marks the first-run prompt as done.
    ///
    /// Returns whether `provider` is available afterwards.
    ///
    /// # Errors
    /// Returns an error if no identity is loaded or the cache write fails.
    pub fn set_credential(&mut self, provider: Provider, secret: &str) -> ChatResult<bool> {
        let identity = self.identity.clone().ok_or(ChatError::NoIdentity)?;
        let key = CacheKey::Credential(identity.clone(), provider);
        let secret = secret.trim();

        if secret.is_empty() {
            self.cache.remove(&key)?;
            self.secrets.remove(&provider);
        } else {
            self.cache.set(&key, secret)?;
            self.secrets.insert(provider, secret.to_string());
            if !self.prompt_shown {
                self.cache.set(&CacheKey::PromptShown(identity), FLAG_SET)?;
                self.prompt_shown = true;
            }
        }

        self.reconcile_selection()?;
        Ok(self.secrets.contains_key(&provider))
    }

    /// Providers holding a non-empty credential, in priority order.
    #[must_use]
    pub fn available_providers(&self) -> Vec<Provider> {
        Provider::PRIORITY
            .into_iter()
            .filter(|p| self.secrets.contains_key(p))
            .collect()
    }

    /// Currently selected provider.
    #[must_use]
    pub const fn selected_provider(&self) -> Option<Provider> {
        self.selected
    }

    /// Select a provider that holds a credential. Returns whether it was selected.
    ///
    /// # Errors
    /// Returns an error if the cache write fails.
    pub fn select_provider(&mut self, provider: Provider) -> ChatResult<bool> {
        if !self.secrets.contains_key(&provider) {
            return Ok(false);
        }
        self.selected = Some(provider);
        self.write_selection()?;
        Ok(true)
    }

    /// The selected provider together with its credential.
    #[must_use]
    pub fn selected_credential(&self) -> Option<(Provider, &str)> {
        let provider = self.selected?;
        self.secrets
            .get(&provider)
            .map(|secret| (provider, secret.as_str()))
    }

    /// Whether the first-run credential prompt should be surfaced.
    #[must_use]
    pub fn needs_first_run_prompt(&self) -> bool {
        self.identity.is_some() && !self.prompt_shown && self.secrets.is_empty()
    }

    /// Forget every credential and the selection of the loaded identity.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be written.
    pub fn forget_all(&mut self) -> ChatResult<()> {
        let Some(identity) = self.identity.take() else {
            return Ok(());
        };
        for provider in Provider::PRIORITY {
            self.cache
                .remove(&CacheKey::Credential(identity.clone(), provider))?;
        }
        self.cache.remove(&CacheKey::SelectedProvider(identity))?;
        self.secrets.clear();
        self.selected = None;
        self.prompt_shown = false;
        Ok(())
    }

    fn reconcile_selection(&mut self) -> ChatResult<()> {
        let keep = self.selected.filter(|p| self.secrets.contains_key(p));
        let next = keep.or_else(|| self.available_providers().first().copied());
        if next != self.selected {
            debug!("Selected provider {:?} -> {:?}", self.selected, next);
            self.selected = next;
        }
        self.write_selection()
    }

    fn write_selection(&self) -> ChatResult<()> {
        let Some(identity) = self.identity.clone() else {
            return Ok(());
        };
        let key = CacheKey::SelectedProvider(identity);
        match self.selected {
            Some(provider) => self.cache.set(&key, provider.as_str()),
            None => self.cache.remove(&key),
        }
    }
}
