//! One request/response cycle against the AI proxy.
//!
//! A send is split in three phases so the caller can release its lock on the
//! session while the query is outstanding:
//!
//! 1. [`MessagePipeline::begin`] checks the gates, appends and persists the user
//!    message, then marks the thread as awaiting a reply.
//! 2. [`MessagePipeline::dispatch`] issues exactly one query.
//! 3. [`MessagePipeline::complete`] clears the mark and the placeholder, then
//!    appends the reply or the failure message.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::chat::core::config::{ChatConfig, LabelConfig};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::ThreadId;
use crate::chat::core::member::Member;
use crate::chat::core::message::Message;
use crate::chat::core::provider::Provider;
use crate::chat::remote::api::RemoteApi;
use crate::chat::remote::types::{AskFailure, AskRequest, extract_detail};
use crate::chat::session::store::SessionStore;

/// Why a send was not attempted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GateReason {
    /// Input is empty after trimming.
    EmptyInput,
    /// No member context is selected.
    NoMember,
    /// No provider with a non-empty credential is selected.
    MissingCredential,
    /// No thread is selected.
    NoActiveThread,
    /// The thread is still waiting for the previous reply.
    AwaitingReply,
}

/// Classified failure of an AI query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// The backend rejected the provider credential.
    CredentialInvalid,
    /// The provider account is out of quota.
    QuotaExceeded,
    /// Any other backend error, with its detail.
    Backend {
        /// Human-readable detail from the error body.
        detail: String,
    },
    /// No response at all.
    Network,
}

impl FailureKind {
    /// Classify a failure by substring match on the error detail:
    /// `"api key"` means credential-invalid, `"quota"` means quota-exceeded.
    #[must_use]
    pub fn classify(failure: &AskFailure) -> Self {
        match failure {
            AskFailure::Transport(_) => Self::Network,
            AskFailure::Rejected { body, .. } => {
                let detail = extract_detail(body);
                let lowered = detail.to_lowercase();
                if lowered.contains("api key") {
                    Self::CredentialInvalid
                } else if lowered.contains("quota") {
                    Self::QuotaExceeded
                } else {
                    Self::Backend { detail }
                }
            }
        }
    }

    /// Assistant-style text shown in the thread.
    #[must_use]
    pub fn user_message(&self, provider: Provider) -> String {
        match self {
            Self::CredentialInvalid => format!(
                "Please provide a valid {} API key to continue.",
                provider.display_name()
            ),
            Self::QuotaExceeded => format!(
                "Your {} API key has exceeded its quota. Please check your plan and billing details.",
                provider.display_name()
            ),
            Self::Backend { detail } => format!("Error from backend: {detail}"),
            Self::Network => "Sorry, I couldn't get a response. Please try again.".to_string(),
        }
    }
}

/// Result of a send.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    /// Nothing was sent.
    Gated(GateReason),
    /// The reply was appended.
    Replied {
        /// Thread that received the reply.
        thread: ThreadId,
    },
    /// A failure message was appended.
    Failed {
        /// Thread that received the failure message.
        thread: ThreadId,
        /// Failure classification.
        kind: FailureKind,
    },
    /// The thread was deleted while the query was outstanding.
    Discarded {
        /// The deleted thread.
        thread: ThreadId,
    },
}

impl SendOutcome {
    /// Whether the credential-entry prompt should be surfaced.
    #[must_use]
    pub const fn needs_credential(&self) -> bool {
        matches!(
            self,
            Self::Gated(GateReason::MissingCredential)
                | Self::Failed {
                    kind: FailureKind::CredentialInvalid,
                    ..
                }
        )
    }
}

/// A query admitted by [`MessagePipeline::begin`].
#[derive(Clone, Debug)]
pub struct PendingSend {
    thread: ThreadId,
    provider: Provider,
    request: AskRequest,
}

impl PendingSend {
    /// Thread the query was issued from.
    #[must_use]
    pub const fn thread(&self) -> &ThreadId {
        &self.thread
    }

    /// Outbound request.
    #[must_use]
    pub const fn request(&self) -> &AskRequest {
        &self.request
    }
}

/// Drives sends against a [`RemoteApi`].
pub struct MessagePipeline {
    remote: Arc<dyn RemoteApi>,
    labels: LabelConfig,
    ask_timeout: Option<Duration>,
}

impl MessagePipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(config: &ChatConfig, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            remote,
            labels: config.labels.clone(),
            ask_timeout: config.api.ask_timeout,
        }
    }

    /// Check the gates and, if they pass, append the user message to the active
    /// thread, persist, and mark the thread as awaiting a reply. Nothing is
    /// marked when the local write fails.
    ///
    /// # Errors
    /// Returns an error if the member context cannot be serialized or the local
    /// write fails.
    pub fn begin(
        &self,
        store: &mut SessionStore,
        raw_input: &str,
        member: Option<&Member>,
        credential: Option<(Provider, &str)>,
    ) -> ChatResult<Result<PendingSend, GateReason>> {
        let query = raw_input.trim();
        if query.is_empty() {
            return Ok(Err(GateReason::EmptyInput));
        }
        let Some(member) = member else {
            return Ok(Err(GateReason::NoMember));
        };
        let Some((provider, secret)) = credential
            .map(|(p, s)| (p, s.trim()))
            .filter(|(_, s)| !s.is_empty())
        else {
            return Ok(Err(GateReason::MissingCredential));
        };
        let Some(thread_id) = store.active_id().cloned() else {
            return Ok(Err(GateReason::NoActiveThread));
        };
        if store.is_awaiting_reply(&thread_id) {
            return Ok(Err(GateReason::AwaitingReply));
        }
        let identity = store.identity().ok_or(ChatError::NoIdentity)?.to_string();

        let request = AskRequest {
            query: query.to_string(),
            credential: secret.to_string(),
            provider,
            identity,
            member_context: member.context_json()?,
        };

        store.append_message(&thread_id, Message::user(self.labels.user.as_str(), query))?;
        store.persist()?;
        store.begin_reply(&thread_id)?;

        debug!("Query admitted on thread {thread_id} via {provider}");
        Ok(Ok(PendingSend {
            thread: thread_id,
            provider,
            request,
        }))
    }

    /// Issue the query. A configured client-side timeout turns a hung call
    /// into a transport failure.
    pub async fn dispatch(&self, pending: &PendingSend) -> Result<String, AskFailure> {
        let call = self.remote.ask(&pending.request);
        match self.ask_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(AskFailure::Transport(format!(
                    "no reply within {}s",
                    limit.as_secs()
                )))
            }),
            None => call.await,
        }
    }

    /// Clear the awaiting-reply mark and append the outcome.
    ///
    /// # Errors
    /// Returns an error if the local write fails.
    pub fn complete(
        &self,
        store: &mut SessionStore,
        pending: PendingSend,
        result: Result<String, AskFailure>,
    ) -> ChatResult<SendOutcome> {
        let thread = pending.thread;
        let Some(removed) = store.finish_reply(&thread) else {
            info!("Thread {thread} was deleted before its reply arrived");
            return Ok(SendOutcome::Discarded { thread });
        };
        if removed != 1 {
            warn!("Expected one loading placeholder on thread {thread}, found {removed}");
        }

        let assistant = self.labels.assistant.as_str();
        let outcome = match result {
            Ok(body) => {
                store.append_message(&thread, Message::assistant(assistant, &body))?;
                SendOutcome::Replied {
                    thread: thread.clone(),
                }
            }
            Err(failure) => {
                let kind = FailureKind::classify(&failure);
                warn!("Query on thread {thread} failed: {failure}");
                let text = kind.user_message(pending.provider);
                store.append_message(&thread, Message::assistant(assistant, &text))?;
                SendOutcome::Failed {
                    thread: thread.clone(),
                    kind,
                }
            }
        };
        store.persist()?;
        Ok(outcome)
    }
}
