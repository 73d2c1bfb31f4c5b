use thiserror::Error;

/// Failure classification for the backing document store.
///
/// Classification drives the sync engine's recovery decisions: connection
/// errors are retried with backoff, precondition (missing index) errors
/// downgrade a subscription to unordered mode, and quota errors get one
/// delayed retry followed by a slower per-item strategy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network/transport unavailability - the store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),
    /// The store's access rules rejected the request.
    #[error("permission denied: {0}")]
    Permission(String),
    /// The store cannot satisfy the query as asked (e.g. missing index).
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// Write-rate or storage-quota limit exceeded.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Required field missing, oversized input, unsupported format.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown store error: {0}")]
    Unknown(String),
}

impl StoreError {
    /// True for failures caused by network/transport unavailability.
    /// These are the only failures the retry policy will retry.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded(_))
    }

    /// Human-readable guidance for surfacing the failure to a user.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Connection(e) => format!(
                "Could not reach the database: {}. Check your network connection and try again.",
                e
            ),
            StoreError::Permission(e) => format!(
                "Access denied by the database: {}. Check the store's security rules.",
                e
            ),
            StoreError::Precondition(e) => format!(
                "The database needs an index for this query: {}. Data still loads, but unsorted.",
                e
            ),
            StoreError::QuotaExceeded(e) => format!(
                "Database quota exceeded: {}. Check usage limits before retrying.",
                e
            ),
            StoreError::Validation(e) => e.clone(),
            StoreError::Unknown(e) => format!("Unexpected database error: {}", e),
        }
    }
}
