//! Session layer: thread list, credentials, the send pipeline and the facade
//! tying them together.

pub mod client;
pub mod pipeline;
pub mod registry;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ChatSession;
pub use pipeline::{FailureKind, GateReason, MessagePipeline, PendingSend, SendOutcome};
pub use registry::CredentialRegistry;
pub use store::{LoadReport, LoadSource, SessionStore};
