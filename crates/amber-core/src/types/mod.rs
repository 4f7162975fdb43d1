//! # Core Type Definitions
//!
//! Error taxonomy shared by every Amber component.
//!
//! Three classes of failure exist:
//! - Programming errors (duplicate registration, dependency cycles, calling
//!   something that is not callable) are returned to the caller immediately.
//! - Callback errors raised by sinks, listeners and scheduled methods are
//!   caught at the boundary and logged. They never reach the write that
//!   triggered them.
//! - Data-loss cases (unknown type tag, unrepresentable value) are not
//!   errors at all: they degrade to `null`.

use thiserror::Error;

/// Error type returned by user-supplied callbacks (mutation sinks, methods).
pub type CallbackError = Box<dyn std::error::Error>;

/// Errors that can occur in the Amber system.
///
/// - No silent failures outside the documented data-loss cases
/// - Use `Result<T, AmberError>` for fallible operations
/// - The core never panics; every error is recoverable by the host
#[derive(Debug, Error)]
pub enum AmberError {
    /// A descriptor with this name is already registered.
    #[error("Duplicate type registration: {0}")]
    DuplicateType(String),

    /// Domain class dependencies form a cycle.
    #[error("Dependency cycle between domain types: {0}")]
    DependencyCycle(String),

    /// No descriptor is registered under this name.
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// The value graph references itself; it cannot be written as a tree.
    #[error("Cyclic value graph at `{0}`")]
    CyclicGraph(String),

    /// A value could not be written.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Text could not be read back into a value.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// A registered reviver rejected its payload.
    #[error("Cannot revive `{tag}`: {reason}")]
    Revive { tag: String, reason: String },

    /// A member cannot be read, written or deleted on this kind of object.
    #[error("Invalid member `{member}` on {kind}")]
    InvalidMember { kind: String, member: String },

    /// The named member is not callable.
    #[error("Not callable: {0}")]
    NotCallable(String),

    /// A scheduler target or call receiver is not an object.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// A user callback failed.
    #[error("Callback failed: {0}")]
    Callback(String),

    /// The backing store failed.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AmberError {
    /// Wrap a callback failure.
    pub fn callback(err: impl std::fmt::Display) -> Self {
        Self::Callback(err.to_string())
    }

    /// Build a reviver failure for the given tag.
    pub fn revive(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Revive {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    /// Build an invalid-member error.
    pub fn invalid_member(kind: impl Into<String>, member: impl Into<String>) -> Self {
        Self::InvalidMember {
            kind: kind.into(),
            member: member.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
