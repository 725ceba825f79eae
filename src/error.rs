//! Crate-wide error kinds.

use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Connect/read/write failure on the underlying transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unknown frame. Always recovered locally — never fatal.
    #[error("frame error: {0}")]
    Frame(String),

    /// KEM or AEAD failure. Always recovered locally — never fatal.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Wrong or missing password. Visible to the user, terminates the connection.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A correlated-reply deadline expired.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A frame was received in a state that does not permit it.
    #[error("frame not permitted in current state: {0}")]
    State(&'static str),

    /// All probed ports were busy at startup.
    #[error("no free port found in range")]
    Resource,
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Frame(e.to_string())
    }
}
