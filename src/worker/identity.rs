//! Worker identity and the broker names derived from it.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

use crate::constants::naming::{
    EXCHANGE_PREFIX, MAX_AMQP_SHORT_STRING_BYTES, ROUTING_KEY_PREFIX,
};

/// Reasons a raw identifier cannot be used as a worker identity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("worker identity must not be empty")]
    Empty,

    #[error("worker identity contains a control character")]
    ControlCharacter,

    #[error("worker identity is {length} bytes; derived broker names must fit in {limit} bytes")]
    TooLong { length: usize, limit: usize },
}

/// Unique identity of a logical worker.
///
/// The identity is the registry key and the queue name. The exchange name and
/// routing key are derived from it with fixed prefixes, so a valid identity is
/// one whose longest derived name still fits an AMQP short string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerIdentity(String);

impl WorkerIdentity {
    /// Longest identity whose derived broker names are all valid
    pub const MAX_LEN: usize = MAX_AMQP_SHORT_STRING_BYTES - EXCHANGE_PREFIX.len();

    pub fn new(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();

        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }
        if raw.chars().any(char::is_control) {
            return Err(IdentityError::ControlCharacter);
        }
        if raw.len() > Self::MAX_LEN {
            return Err(IdentityError::TooLong {
                length: raw.len(),
                limit: Self::MAX_LEN,
            });
        }

        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Queue name: the identity itself
    pub fn queue_name(&self) -> &str {
        &self.0
    }

    /// Exchange name: `exchange.<identity>`
    pub fn exchange_name(&self) -> String {
        format!("{EXCHANGE_PREFIX}{}", self.0)
    }

    /// Routing key: `route.<identity>`
    pub fn routing_key(&self) -> String {
        format!("{ROUTING_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for WorkerIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for WorkerIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkerIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for WorkerIdentity {
    type Error = IdentityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerIdentity> for String {
    fn from(identity: WorkerIdentity) -> Self {
        identity.0
    }
}

impl std::str::FromStr for WorkerIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
