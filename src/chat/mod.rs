//! Chat subsystem for the Medlife assistant.
//!
//! This module keeps the client-side state of a patient conversation, organized into:
//! - `core`: Configuration, errors, IDs, messages, threads, providers and members
//! - `storage`: Local durable cache and the key scheme it is addressed by
//! - `remote`: HTTP client for the session store, the AI proxy and the member list
//! - `session`: Session store, credential registry, message pipeline and the facade
//! - `export`: Plain-text transcript export
//! - `suggestions`: Canned health questions offered next to the input

pub mod core;
pub mod export;
pub mod remote;
pub mod session;
pub mod storage;
pub mod suggestions;

// Re-export commonly used types for convenience
pub use self::core::{
    ApiConfig, ChatConfig, ChatError, ChatResult, Identity, IdentityError, LabelConfig, Markup,
    Member, Message, MessageId, Provider, Sender, StorageConfig, Thread, ThreadId, TitleConfig,
};
pub use export::{Exchange, TranscriptExport, export_file_name, pair_exchanges};
pub use remote::{AskFailure, AskRequest, HttpRemoteApi, RemoteApi, RemoteThread};
pub use session::{
    ChatSession, CredentialRegistry, FailureKind, GateReason, LoadReport, LoadSource,
    MessagePipeline, SendOutcome, SessionStore,
};
pub use storage::{CacheKey, LocalCache, MemoryLocalCache, SqliteLocalCache};
