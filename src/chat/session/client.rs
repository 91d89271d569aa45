//! `ChatSession`: the public face of the chat core.
//!
//! Wraps the session store, the credential registry and the member context
//! behind one async lock. The lock is held only while mutating state, never
//! across a network call, so the thread list stays usable (and the in-flight
//! guard observable) during a slow reply, load or sync.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{Identity, ThreadId};
use crate::chat::core::member::Member;
use crate::chat::core::provider::Provider;
use crate::chat::core::thread::Thread;
use crate::chat::export::TranscriptExport;
use crate::chat::remote::api::{HttpRemoteApi, RemoteApi};
use crate::chat::session::pipeline::{MessagePipeline, SendOutcome};
use crate::chat::session::registry::CredentialRegistry;
use crate::chat::session::store::{LoadReport, SessionStore, await_sync};
use crate::chat::storage::local_cache::{LocalCache, SqliteLocalCache};

struct SessionState {
    store: SessionStore,
    registry: CredentialRegistry,
    members: Vec<Member>,
    member: Option<Member>,
    credential_prompt: bool,
}

/// A chat session for one identity at a time.
pub struct ChatSession {
    state: Mutex<SessionState>,
    pipeline: MessagePipeline,
    remote: Arc<dyn RemoteApi>,
}

impl ChatSession {
    /// Build a session over explicit collaborators.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: &ChatConfig,
        cache: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteApi>,
    ) -> ChatResult<Self> {
        config.validate()?;
        let store = SessionStore::new(config, Arc::clone(&cache), Arc::clone(&remote))?;
        Ok(Self {
            state: Mutex::new(SessionState {
                store,
                registry: CredentialRegistry::new(cache),
                members: Vec::new(),
                member: None,
                credential_prompt: false,
            }),
            pipeline: MessagePipeline::new(config, Arc::clone(&remote)),
            remote,
        })
    }

    /// Build a session on the `SQLite` cache and HTTP backend from `config`.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the cache cannot be
    /// opened or the HTTP client cannot be built.
    pub fn open(config: &ChatConfig) -> ChatResult<Self> {
        config.validate()?;
        let cache: Arc<dyn LocalCache> = Arc::new(SqliteLocalCache::open(&config.storage)?);
        let remote: Arc<dyn RemoteApi> = Arc::new(HttpRemoteApi::new(&config.api)?);
        info!(
            "Chat session on {} with cache {}",
            config.api.base_url,
            config.storage.sqlite_path.display()
        );
        Self::new(config, cache, remote)
    }

    /// Load `identity`: threads, credentials and first-run prompt state.
    ///
    /// Switching identity drops the selected member and member list.
    ///
    /// # Errors
    /// Returns an error if the identity is invalid or the local cache fails.
    pub async fn load(&self, identity: &str) -> ChatResult<LoadReport> {
        let identity = Identity::new(identity)?;
        let fetched = self.remote.fetch_threads(&identity).await;

        let mut state = self.state.lock().await;
        if state.store.identity() != Some(&identity) {
            state.members.clear();
            state.member = None;
        }
        let report = state.store.apply_load(identity.clone(), fetched)?;
        state.registry.load(&identity)?;
        state.credential_prompt = state.registry.needs_first_run_prompt();
        Ok(report)
    }

    /// Send one message from the active thread.
    ///
    /// # Errors
    /// Returns an error only if local state cannot be written; remote failures
    /// become [`SendOutcome::Failed`].
    pub async fn send_message(&self, raw_input: &str) -> ChatResult<SendOutcome> {
        let pending = {
            let mut state = self.state.lock().await;
            let SessionState {
                store,
                registry,
                member,
                ..
            } = &mut *state;
            let admitted = self.pipeline.begin(
                store,
                raw_input,
                member.as_ref(),
                registry.selected_credential(),
            )?;
            match admitted {
                Ok(pending) => pending,
                Err(reason) => {
                    debug!("Send gated: {reason:?}");
                    let outcome = SendOutcome::Gated(reason);
                    if outcome.needs_credential() {
                        state.credential_prompt = true;
                    }
                    return Ok(outcome);
                }
            }
        };

        let result = self.pipeline.dispatch(&pending).await;

        let mut state = self.state.lock().await;
        let outcome = self.pipeline.complete(&mut state.store, pending, result)?;
        if outcome.needs_credential() {
            state.credential_prompt = true;
        }
        Ok(outcome)
    }

    /// Prepend and select a new thread.
    ///
    /// # Errors
    /// Returns an error if no identity is loaded or the local write fails.
    pub async fn new_thread(&self) -> ChatResult<ThreadId> {
        self.state.lock().await.store.create_thread()
    }

    /// Select a thread; unknown ids are ignored.
    pub async fn select_thread(&self, id: &ThreadId) -> bool {
        self.state.lock().await.store.select_thread(id)
    }

    /// Rename a thread; blank names cancel.
    ///
    /// # Errors
    /// Returns an error if the local write fails.
    pub async fn rename_thread(&self, id: &ThreadId, name: &str) -> ChatResult<bool> {
        self.state.lock().await.store.rename_thread(id, name)
    }

    /// Delete a thread.
    ///
    /// # Errors
    /// Returns an error if the local write fails.
    pub async fn delete_thread(&self, id: &ThreadId) -> ChatResult<bool> {
        self.state.lock().await.store.delete_thread(id)
    }

    /// Snapshot of every thread, newest first.
    pub async fn threads(&self) -> Vec<Thread> {
        self.state.lock().await.store.threads().to_vec()
    }

    /// Snapshot of the selected thread.
    pub async fn active_thread(&self) -> Option<Thread> {
        self.state.lock().await.store.active_thread().cloned()
    }

    /// Store a credential and, if it is usable, select its provider and close
    /// the credential prompt. Returns whether the provider is available.
    ///
    /// # Errors
    /// Returns an error if no identity is loaded or the cache write fails.
    pub async fn save_credential(&self, provider: Provider, secret: &str) -> ChatResult<bool> {
        let mut state = self.state.lock().await;
        let available = state.registry.set_credential(provider, secret)?;
        if available {
            state.registry.select_provider(provider)?;
            state.credential_prompt = false;
            info!("Saved {provider} credential");
        }
        Ok(available)
    }

    /// Select a provider holding a credential.
    ///
    /// # Errors
    /// Returns an error if the cache write fails.
    pub async fn select_provider(&self, provider: Provider) -> ChatResult<bool> {
        self.state.lock().await.registry.select_provider(provider)
    }

    /// Providers holding a credential, in priority order.
    pub async fn available_providers(&self) -> Vec<Provider> {
        self.state.lock().await.registry.available_providers()
    }

    /// Currently selected provider.
    pub async fn selected_provider(&self) -> Option<Provider> {
        self.state.lock().await.registry.selected_provider()
    }

    /// Whether the credential-entry prompt should be shown.
    pub async fn credential_prompt_pending(&self) -> bool {
        self.state.lock().await.credential_prompt
    }

    /// Close the credential prompt without saving. It returns on the next load.
    pub async fn dismiss_credential_prompt(&self) {
        self.state.lock().await.credential_prompt = false;
    }

    /// Fetch the members the identity may chat about.
    ///
    /// # Errors
    /// Returns an error if no identity is loaded or the remote call fails.
    pub async fn load_members(&self) -> ChatResult<Vec<Member>> {
        let identity = self
            .state
            .lock()
            .await
            .store
            .identity()
            .cloned()
            .ok_or(ChatError::NoIdentity)?;
        let members = self.remote.fetch_members(&identity).await?;

        let mut state = self.state.lock().await;
        if state.store.identity() == Some(&identity) {
            state.members.clone_from(&members);
        }
        debug!("Fetched {} members", members.len());
        Ok(members)
    }

    /// Members from the last [`ChatSession::load_members`].
    pub async fn members(&self) -> Vec<Member> {
        self.state.lock().await.members.clone()
    }

    /// Set the member context sent with every query.
    pub async fn select_member(&self, member: Member) {
        debug!("Selected member {}", member.display_name());
        self.state.lock().await.member = Some(member);
    }

    /// Selected member context.
    pub async fn selected_member(&self) -> Option<Member> {
        self.state.lock().await.member.clone()
    }

    /// Push every thread to the remote store and wait for the outcome.
    ///
    /// # Errors
    /// Returns an error if the local write or the remote replace fails.
    pub async fn sync_now(&self) -> ChatResult<()> {
        let outcome = self.state.lock().await.store.request_sync()?;
        await_sync(outcome).await
    }

    /// Plain-text transcript of the selected thread.
    pub async fn export_active(&self, generated_on: NaiveDate) -> Option<TranscriptExport> {
        let state = self.state.lock().await;
        let thread = state.store.active_thread()?;
        let member = state.member.as_ref().map(Member::display_name);
        Some(TranscriptExport::render(
            thread,
            member.as_deref(),
            state.store.markup(),
            generated_on,
        ))
    }

    /// Wait for outstanding background replication.
    pub async fn flush(&self) {
        let finished = self.state.lock().await.store.request_flush();
        if let Some(finished) = finished {
            let _ = finished.await;
        }
    }

    /// Forget the identity's credentials and provider selection, wait for
    /// pending replication, and clear in-memory state. Threads stay cached.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be written.
    pub async fn sign_out(&self) -> ChatResult<()> {
        let finished = {
            let mut state = self.state.lock().await;
            state.registry.forget_all()?;
            let pending = state.store.request_flush();
            state.store.clear();
            state.members.clear();
            state.member = None;
            state.credential_prompt = false;
            pending
        };
        if let Some(finished) = finished {
            let _ = finished.await;
        }
        info!("Signed out");
        Ok(())
    }
}
