use thiserror::Error;

/// Unified application error.
///
/// Every layer (config, sensor I/O, store, notification) converts into this
/// so per-sensor tasks can log one type and move on.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Errors from the sensor HTTP API.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Sensor returned HTTP {status}")]
    Status { status: u16 },

    #[error("Data format error: {message}")]
    FormatError { message: String },
}

/// Errors from digest transports.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Transport not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid address '{address}': {message}")]
    Address { address: String, message: String },

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::FormatError { message } => AppError::Parse(message),
            other => AppError::Network(other.to_string()),
        }
    }
}

/// Result type for sensor API operations
pub type ProviderResult<T> = Result<T, ProviderError>;
