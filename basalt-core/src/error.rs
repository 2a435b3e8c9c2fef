//! Error types shared across the basalt crates.

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
///
/// Every fallible operation in the store surfaces one of these kinds.
/// I/O failures keep their OS-level cause as `source`.
#[derive(Error, Debug)]
pub enum Error {
    /// API called before the store was initialised
    #[error("store is not initialised")]
    NotInitialised,

    /// Configuration mutator called after the store was initialised
    #[error("store is already initialised")]
    AlreadyInitialised,

    /// Literal or IRI shape violation
    #[error("invalid term: {0}")]
    InvalidTerm(String),

    /// Operation incompatible with the current sink/connection state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Serializable write-write conflict detected at prepare
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Directory or resource lock unavailable
    #[error("lock failed: {0}")]
    LockFailed(String),

    /// Rejected configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Read/write/rename failure in the persistence layer
    #[error("persistence I/O failure: {context}")]
    PersistenceIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A blocking wait was cancelled
    #[error("interrupted: {0}")]
    Interrupted(String),
}

impl Error {
    /// Create an invalid term error
    pub fn invalid_term(msg: impl Into<String>) -> Self {
        Error::InvalidTerm(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Create a concurrent modification error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::ConcurrentModification(msg.into())
    }

    /// Create a lock failure error
    pub fn lock_failed(msg: impl Into<String>) -> Self {
        Error::LockFailed(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// Create an interrupted error
    pub fn interrupted(msg: impl Into<String>) -> Self {
        Error::Interrupted(msg.into())
    }

    /// Wrap an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::PersistenceIo {
            context: context.into(),
            source,
        }
    }

    /// True if this error is a serializable prepare conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConcurrentModification(_))
    }
}
