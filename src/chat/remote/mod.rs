//! Remote backend: wire types and the HTTP client.

pub mod api;
pub mod types;

pub use api::{ApiFuture, HttpRemoteApi, RemoteApi};
pub use types::{AskFailure, AskRequest, RemoteMessage, RemoteThread, extract_detail};
