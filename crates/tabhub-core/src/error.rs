use thiserror::Error;

/// Errors produced by the tab-sync protocol and stores.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("config error: {0}")]
    Config(String),

    #[error("pending queue full for target browser {0}")]
    QueueFull(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HubResult<T> = Result<T, HubError>;
