//! Remote-console error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RconError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("authentication rejected by server")]
    AuthFailed,

    #[error("response id mismatch: sent {sent}, received {received}")]
    IdMismatch { sent: i32, received: i32 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("command too long: {0} bytes")]
    CommandTooLong(usize),
}

impl RconError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        RconError::Protocol(msg.into())
    }
}

impl From<RconError> for forgepm_core::Error {
    fn from(err: RconError) -> Self {
        use forgepm_core::Error;
        match err {
            RconError::AuthFailed => Error::RconAuth,
            RconError::Timeout(ms) => Error::RconTimeout(ms),
            RconError::IdMismatch { sent, received } => Error::RconIdMismatch { sent, received },
            other => Error::Rcon(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RconError>;
