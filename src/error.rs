use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type shared by every valmon component
#[derive(Error, Debug)]
pub enum ValmonError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("IO error on {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("External client error: {0}")]
    Client(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for valmon
pub type Result<T> = std::result::Result<T, ValmonError>;

impl ValmonError {
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        ValmonError::NotFound(msg.into())
    }

    pub fn already_exists<S: Into<String>>(msg: S) -> Self {
        ValmonError::AlreadyExists(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        ValmonError::Conflict(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        ValmonError::Timeout(msg.into())
    }

    pub fn startup<S: Into<String>>(msg: S) -> Self {
        ValmonError::Startup(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        ValmonError::Parse(msg.into())
    }

    pub fn client<S: Into<String>>(msg: S) -> Self {
        ValmonError::Client(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        ValmonError::InvalidInput(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        ValmonError::Config(msg.into())
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        ValmonError::Other(msg.into())
    }

    /// Attach the offending path to an IO error
    pub fn io_at(path: &Path, source: io::Error) -> Self {
        ValmonError::IoAt {
            path: path.to_path_buf(),
            source,
        }
    }

    /// HTTP-style status code used by the control surface
    pub fn status_code(&self) -> u16 {
        match self {
            ValmonError::NotFound(_) => 404,
            ValmonError::AlreadyExists(_) | ValmonError::Conflict(_) => 409,
            ValmonError::InvalidInput(_) | ValmonError::Parse(_) => 400,
            ValmonError::Timeout(_) => 504,
            ValmonError::Client(_) => 502,
            _ => 500,
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ValmonError::Io(_) | ValmonError::IoAt { .. } => "io",
            ValmonError::NotFound(_) => "not_found",
            ValmonError::AlreadyExists(_) => "already_exists",
            ValmonError::Conflict(_) => "conflict",
            ValmonError::Timeout(_) => "timeout",
            ValmonError::Startup(_) => "startup",
            ValmonError::Parse(_) => "parse",
            ValmonError::Client(_) => "client",
            ValmonError::InvalidInput(_) => "invalid_input",
            ValmonError::Config(_) => "config",
            ValmonError::Serialization(_) => "serialization",
            ValmonError::Other(_) => "other",
        }
    }
}
