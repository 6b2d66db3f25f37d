use thiserror::Error;

/// Errors raised while setting up or driving a channel.
///
/// Per-call failures never use this type; they travel inside `CallResult`.
#[derive(Error, Debug)]
pub enum AssistError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Spawn Error: {0}")]
    Spawn(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Result type for setup and transport operations
pub type AssistResult<T> = Result<T, AssistError>;
