use thiserror::Error;

/// Errors raised by the modeling core
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing or non-numeric prediction inputs
    #[error("invalid or missing inputs: {}", fields.join(", "))]
    Validation { fields: Vec<String> },

    /// Too few usable rows to train or backtest
    #[error("insufficient data: need at least {required} usable rows, found {found}")]
    InsufficientData { required: usize, found: usize },

    #[error("no rows carry a usable win/loss label")]
    NoLabels,

    /// Weight, mean, std and feature lists of a model disagree in length
    #[error("model shape mismatch: {0}")]
    ModelShape(String),

    #[error("unknown sport: {0}")]
    UnknownSport(String),

    #[error("a training or backtest run is already in progress for {sport}")]
    Busy { sport: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("no trained model saved for {0}")]
    ModelNotFound(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by storage adapters
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored blob could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("remote store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote store returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;
