//! Error types for the L2 multicast engine.

use thiserror::Error;

/// Engine error taxonomy.
///
/// Management-plane operations surface these to the caller; packet-path
/// problems never do (they become discard/flood decisions plus statistics).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum L2mcError {
    /// Rejected configuration; the stored configuration is unchanged.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Creation of a key that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Query or delete on an absent VLAN/group/source.
    #[error("not found: {0}")]
    NotFound(String),

    /// Instance, group, source or hardware-index limit reached.
    /// Retry after freeing resources.
    #[error("resource limit reached: {0}")]
    ResourceExhausted(String),

    /// Invariant violation. Logged; the operation is aborted but the engine
    /// keeps serving other instances.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, L2mcError>;
