use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: String,
        source: serde_json::Error,
    },
    /// The session runner has stopped; no more commands are accepted.
    #[error("session runner is not running")]
    RunnerStopped,
    #[error("bus setup failed: {0}")]
    Bus(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
