/// Shared error type used across all Strand crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cancelled")]
    Cancelled,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("upstream: {0}")]
    Upstream(String),

    #[error("tool execution: {0}")]
    ToolExecution(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("budget exceeded: need {needed} tokens, {available} available")]
    BudgetExceeded { needed: u32, available: u32 },

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors worth another attempt after a backoff delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Upstream(_) | Error::RateLimited { .. } | Error::Timeout(_)
        )
    }

    /// Errors that terminate the turn loop immediately instead of being
    /// folded into the transcript.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
