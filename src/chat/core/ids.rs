//! Identifier types for chat threads, messages and user identities.
//!
//! Thread and message ids are opaque strings: the remote store may hand back ids
//! minted by other clients (including numeric ones), so they are never parsed.
//! Locally minted ids follow two strategies:
//! - threads: a UUID (`UUIDv7` with the `uuid_v7` feature, `UUIDv4` otherwise);
//! - messages: millisecond timestamp, a process-wide sequence and a random suffix.

use core::fmt;
use core::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a thread id with good insert locality when available.
#[inline]
#[must_use]
fn uuid_time_ordered() -> String {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7().to_string()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4().to_string()
    }
}

static MESSAGE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a message id: `<unix millis>-<sequence>-<random hex>`.
#[must_use]
fn timestamp_random() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = MESSAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let salt: u32 = rand::thread_rng().r#gen();
    format!("{millis}-{seq}-{salt:08x}")
}

/// Declare an opaque string newtype with a consistent API.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        generator = $gen:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(String);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Mint a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self($gen())
            }

            /// Wrap an identifier received from elsewhere.
            #[inline]
            #[must_use]
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow as `&str`.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// Identifier of a chat thread.
    ThreadId,
    generator = uuid_time_ordered
);

define_string_id!(
    /// Identifier of a message, unique within its thread.
    MessageId,
    generator = timestamp_random
);

impl MessageId {
    /// Reserved id carried by the transient loading placeholder.
    pub const LOADING: &'static str = "loading-message";

    /// The reserved loading-placeholder id.
    #[must_use]
    pub fn loading() -> Self {
        Self(Self::LOADING.to_owned())
    }

    /// Whether this is the reserved loading-placeholder id.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.0 == Self::LOADING
    }
}

// ===== Identity =============================================================

/// Errors returned when validating an [`Identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Empty (or whitespace-only) identity.
    Empty,
    /// Exceeds the maximum accepted length.
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        got: usize,
    },
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "identity must not be empty"),
            Self::TooLong { max, got } => write!(f, "identity too long: got {got}, max {max}"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// The user-partition key (usually an email) scoping threads and credentials.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Hard ceiling to prevent pathological keys.
    pub const MAX_LEN: usize = 320;

    /// Build a validated identity. Surrounding whitespace is dropped.
    ///
    /// # Errors
    /// Returns `IdentityError` if the input is empty or too long.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, IdentityError> {
        let s = raw.as_ref().trim();
        if s.is_empty() {
            return Err(IdentityError::Empty);
        }
        if s.len() > Self::MAX_LEN {
            return Err(IdentityError::TooLong {
                max: Self::MAX_LEN,
                got: s.len(),
            });
        }
        Ok(Self(s.to_owned()))
    }

    /// Borrow as `&str`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}
