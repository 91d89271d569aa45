//! Core chat types and identifiers.

pub mod config;
pub mod errors;
pub mod ids;
pub mod markup;
pub mod member;
pub mod message;
pub mod provider;
pub mod thread;

pub use config::{ApiConfig, ChatConfig, LabelConfig, StorageConfig, TitleConfig};
pub use errors::{ChatError, ChatResult};
pub use ids::{Identity, IdentityError, MessageId, ThreadId};
pub use markup::Markup;
pub use member::Member;
pub use message::{Message, Sender};
pub use provider::{Provider, ProviderParseError};
pub use thread::Thread;
