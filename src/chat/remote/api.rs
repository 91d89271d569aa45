//! HTTP client for the Medlife backend: thread store, AI proxy and member list.

use std::future::Future;
use std::pin::Pin;

use reqwest::StatusCode;
use url::Url;

use crate::chat::core::config::ApiConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{Identity, ThreadId};
use crate::chat::core::member::Member;
use crate::chat::core::thread::Thread;
use crate::chat::remote::types::{
    AskFailure, AskRequest, MembersEnvelope, RemoteThread, ReplaceThreadsBody, ThreadsEnvelope,
};

/// Boxed future type for remote operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Operations the chat core invokes on the backend.
pub trait RemoteApi: Send + Sync {
    /// Fetch every stored thread of `identity`.
    fn fetch_threads(&self, identity: &Identity) -> ApiFuture<'_, ChatResult<Vec<RemoteThread>>>;

    /// Replace every stored thread of `identity` with `threads`.
    fn replace_threads(
        &self,
        identity: &Identity,
        threads: &[Thread],
    ) -> ApiFuture<'_, ChatResult<()>>;

    /// Delete one stored thread.
    fn delete_thread(&self, identity: &Identity, id: &ThreadId) -> ApiFuture<'_, ChatResult<()>>;

    /// Submit one AI query and return the raw response body.
    fn ask(&self, request: &AskRequest) -> ApiFuture<'_, Result<String, AskFailure>>;

    /// Fetch the members `identity` may chat about.
    fn fetch_members(&self, identity: &Identity) -> ApiFuture<'_, ChatResult<Vec<Member>>>;
}

/// `reqwest` implementation of [`RemoteApi`].
pub struct HttpRemoteApi {
    client: reqwest::Client,
    ask_client: reqwest::Client,
    ask_url: Url,
    sessions_url: Url,
    members_url: Url,
}

impl HttpRemoteApi {
    /// Build a client for the configured backend.
    ///
    /// # Errors
    /// Returns an error if a URL is invalid or the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> ChatResult<Self> {
        let base = Url::parse(&config.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;
        // AI queries have no total timeout; `ask_timeout` is applied by the caller.
        let ask_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self {
            client,
            ask_client,
            ask_url: base.join(&config.ask_path)?,
            sessions_url: base.join(&config.sessions_path)?,
            members_url: base.join(&config.members_path)?,
        })
    }

    fn thread_url(&self, id: &ThreadId) -> ChatResult<Url> {
        let mut url = self.sessions_url.clone();
        url.path_segments_mut()
            .map_err(|()| ChatError::InvalidConfig("sessions url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(id.as_str())
            .push("");
        Ok(url)
    }
}

/// Map a non-success response into [`ChatError::Remote`].
async fn ensure_success(response: reqwest::Response) -> ChatResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Remote {
        status: status.as_u16(),
        body,
    })
}

impl RemoteApi for HttpRemoteApi {
    fn fetch_threads(&self, identity: &Identity) -> ApiFuture<'_, ChatResult<Vec<RemoteThread>>> {
        let email = identity.as_str().to_string();
        Box::pin(async move {
            let response = self
                .client
                .get(self.sessions_url.clone())
                .query(&[("email", email.as_str())])
                .send()
                .await?;
            let envelope: ThreadsEnvelope = ensure_success(response).await?.json().await?;
            Ok(envelope.into_inner())
        })
    }

    fn replace_threads(
        &self,
        identity: &Identity,
        threads: &[Thread],
    ) -> ApiFuture<'_, ChatResult<()>> {
        let email = identity.as_str().to_string();
        let threads = threads.to_vec();
        Box::pin(async move {
            let body = ReplaceThreadsBody {
                email: &email,
                sessions: &threads,
            };
            let response = self
                .client
                .put(self.sessions_url.clone())
                .query(&[("email", email.as_str())])
                .json(&body)
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
    }

    fn delete_thread(&self, identity: &Identity, id: &ThreadId) -> ApiFuture<'_, ChatResult<()>> {
        let email = identity.as_str().to_string();
        let url = self.thread_url(id);
        Box::pin(async move {
            let response = self
                .client
                .delete(url?)
                .query(&[("email", email.as_str())])
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
    }

    fn ask(&self, request: &AskRequest) -> ApiFuture<'_, Result<String, AskFailure>> {
        let request = request.clone();
        Box::pin(async move {
            let response = self
                .ask_client
                .get(self.ask_url.clone())
                .query(&[
                    ("query", request.query.as_str()),
                    ("api_key", request.credential.as_str()),
                    ("provider", request.provider.as_str()),
                    ("email", request.identity.as_str()),
                    ("member_data", request.member_context.as_str()),
                ])
                .send()
                .await
                .map_err(|e| AskFailure::Transport(e.without_url().to_string()))?;

            let status: StatusCode = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| AskFailure::Transport(e.without_url().to_string()))?;

            if status.is_success() {
                Ok(body)
            } else {
                Err(AskFailure::Rejected {
                    status: status.as_u16(),
                    body,
                })
            }
        })
    }

    fn fetch_members(&self, identity: &Identity) -> ApiFuture<'_, ChatResult<Vec<Member>>> {
        let email = identity.as_str().to_string();
        Box::pin(async move {
            let response = self
                .client
                .get(self.members_url.clone())
                .query(&[("email", email.as_str())])
                .send()
                .await?;
            let envelope: MembersEnvelope = ensure_success(response).await?.json().await?;
            Ok(envelope.into_inner())
        })
    }
}
