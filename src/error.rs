use thiserror::Error;

/// Error taxonomy for the core. Each variant maps to one of the kinds
/// described in the design doc: NotFound, Conflict, Validation, Transient,
/// Fatal, Cancelled.
#[derive(Debug, Error)]
pub enum VmsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VmsError {
    pub fn not_found(what: impl Into<String>) -> Self {
        VmsError::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        VmsError::Conflict(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        VmsError::Validation(what.into())
    }

    pub fn transient(what: impl Into<String>) -> Self {
        VmsError::Transient(what.into())
    }

    pub fn fatal(what: impl Into<String>) -> Self {
        VmsError::Fatal(what.into())
    }

    /// Whether this error should be surfaced to an HTTP caller as-is, as
    /// opposed to being absorbed inside the component that produced it.
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self,
            VmsError::NotFound(_) | VmsError::Conflict(_) | VmsError::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VmsError>;

/// Vault-specific failures kept distinct from [`VmsError`] so that a tampered
/// ciphertext can never be confused with a missing metadata row.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("ciphertext is malformed or has been tampered with")]
    Tampered,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl From<VaultError> for VmsError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::InvalidKey(m) => VmsError::fatal(format!("vault key: {m}")),
            other => VmsError::fatal(other.to_string()),
        }
    }
}
