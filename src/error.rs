use thiserror::Error;

/// Main error type for the strategy core
#[derive(Error, Debug)]
pub enum StrategosError {
    // Startup / key configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config source error: {0}")]
    Config(#[from] config::ConfigError),

    // Caller-visible input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Crypto errors
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Backend errors
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Metrics provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out: {0}")]
    Timeout(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for StrategosError
pub type Result<T> = std::result::Result<T, StrategosError>;

impl StrategosError {
    /// Whether a retry with backoff may succeed.
    ///
    /// Validation, not-found and crypto failures are deterministic and are
    /// never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            StrategosError::StoreUnavailable(_)
            | StrategosError::ProviderUnavailable(_)
            | StrategosError::Timeout(_) => true,
            StrategosError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StrategosError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}
