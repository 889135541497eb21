use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which lookup table a registration collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictField {
    Name,
    Command,
    Keys,
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictField::Name => write!(f, "name"),
            ConflictField::Command => write!(f, "command"),
            ConflictField::Keys => write!(f, "key"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid action '{name}': {reason}")]
    InvalidAction { name: String, reason: String },

    #[error("{field} '{value}' is already bound to action '{existing}'")]
    RegistrationConflict {
        field: ConflictField,
        value: String,
        existing: String,
    },

    #[error("action '{0}' not found")]
    UnknownAction(String),

    #[error("failed to execute action '{action}': {source}")]
    Execution {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("action '{action}' requires a backend, but none is bound")]
    BackendUnbound { action: String },
}

impl ActionError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ActionError::InvalidAction {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unrecognized image format ({len} bytes)")]
    UnrecognizedMediaType { len: usize },

    #[error("clipboard error: {0}")]
    Clipboard(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
