//! Error types for ForgePM

use std::path::PathBuf;

/// ForgePM error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Instance already exists: {0}")]
    InstanceExists(String),

    #[error("Instance '{0}' is reserved and cannot be deleted")]
    ProtectedInstance(String),

    #[error("Invalid instance id: {0}")]
    InvalidInstanceId(String),

    #[error("Server is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Server path is not configured for instance '{0}'; set the instance path or the global server path")]
    MissingPath(String),

    #[error("Failed to launch server: {0}")]
    Launch(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("RCON is not configured: {0}")]
    RconNotConfigured(String),

    #[error("RCON error: {0}")]
    Rcon(String),

    #[error("RCON authentication failed")]
    RconAuth,

    #[error("RCON request timed out after {0}ms")]
    RconTimeout(u64),

    #[error("RCON response id mismatch: sent {sent}, received {received}")]
    RconIdMismatch { sent: i32, received: i32 },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("Map slot {0} is not mapped")]
    MappingNotFound(u32),

    #[error("Invalid map slot: {0}")]
    InvalidSlot(String),

    #[error("{action} left instance '{instance}' in a partial state: {reason}")]
    PartialFailure {
        instance: String,
        action: String,
        reason: String,
    },

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("IPC connection failed: {0}")]
    IpcConnectionFailed(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for ForgePM
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::ConfigError(msg.into())
    }

    pub fn ipc<S: Into<String>>(msg: S) -> Self {
        Error::IpcError(msg.into())
    }

    pub fn rcon<S: Into<String>>(msg: S) -> Self {
        Error::Rcon(msg.into())
    }

    pub fn launch<S: Into<String>>(msg: S) -> Self {
        Error::Launch(msg.into())
    }

    /// HTTP-style status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InstanceNotFound(_)
            | Error::JobNotFound(_)
            | Error::MappingNotFound(_)
            | Error::ConfigNotFound(_) => 404,
            Error::InstanceExists(_) | Error::AlreadyRunning { .. } => 409,
            Error::ProtectedInstance(_) => 403,
            Error::InvalidInstanceId(_)
            | Error::MissingPath(_)
            | Error::ConfigError(_)
            | Error::RconNotConfigured(_)
            | Error::InvalidCron { .. }
            | Error::InvalidSlot(_)
            | Error::TomlError(_) => 400,
            Error::Rcon(_) | Error::RconAuth | Error::RconIdMismatch { .. } => 502,
            Error::RconTimeout(_) => 504,
            Error::DaemonNotRunning | Error::IpcConnectionFailed(_) => 503,
            Error::PartialFailure { .. }
            | Error::Launch(_)
            | Error::IpcError(_)
            | Error::IoError(_)
            | Error::JsonError(_) => 500,
        }
    }

    /// Whether this is a configuration problem the operator has to fix
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::MissingPath(_)
                | Error::ConfigError(_)
                | Error::ConfigNotFound(_)
                | Error::RconNotConfigured(_)
                | Error::InvalidCron { .. }
        )
    }
}
