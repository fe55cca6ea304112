use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("malformed exchange: {0}")]
    MalformedExchange(String),
    #[error("sequence gap: {0}")]
    SequenceGap(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

impl PlayerError {
    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io(format!("{}: {err}", path.display()))
    }
}
