//! Error types for the ChmlFrp tunnel supervisor.
//!
//! Only failures in the supervisor's own setup are errors. Tunnel failures
//! reported by `frpc` on its output are routine outcomes and travel through
//! the status handler instead (see [`crate::TunnelStatus`]).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the tunnel supervisor.
#[derive(Debug, Error)]
pub enum TunnelError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Request errors
    #[error("Not logged in: the user token is missing")]
    MissingToken,

    #[error("A tunnel group needs at least one tunnel")]
    EmptyGroup,

    #[error("Invalid argument template {template:?}: {message}")]
    InvalidTemplate { template: String, message: String },

    // Process errors
    #[error("frpc executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("Failed to spawn {executable}: {message}")]
    SpawnFailed { executable: PathBuf, message: String },

    #[error("Failed to terminate process {pid}: {message}")]
    Terminate { pid: u32, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, TunnelError>;

impl From<std::io::Error> for TunnelError {
    fn from(err: std::io::Error) -> Self {
        TunnelError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TunnelError {
    fn from(err: serde_json::Error) -> Self {
        TunnelError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TunnelError {
    /// Create an IO error with a short description and path context.
    pub fn io(context: &str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        TunnelError::Io {
            message: format!("{context}: {err}"),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether the error comes from the caller's request or environment
    /// (bad token, missing executable, spawn refused) rather than from a
    /// process that was already running.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            TunnelError::MissingToken
                | TunnelError::EmptyGroup
                | TunnelError::InvalidTemplate { .. }
                | TunnelError::ExecutableNotFound(_)
                | TunnelError::SpawnFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::ExecutableNotFound(PathBuf::from("/opt/frpc"));
        assert_eq!(err.to_string(), "frpc executable not found: /opt/frpc");

        let err = TunnelError::Terminate {
            pid: 42,
            message: "EPERM".into(),
        };
        assert_eq!(err.to_string(), "Failed to terminate process 42: EPERM");
    }

    #[test]
    fn test_io_helper_keeps_path() {
        let err = TunnelError::io(
            "create log file",
            "/tmp/frpc.log",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        match err {
            TunnelError::Io { message, path, .. } => {
                assert!(message.starts_with("create log file"));
                assert_eq!(path, Some(PathBuf::from("/tmp/frpc.log")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_setup_errors() {
        assert!(TunnelError::MissingToken.is_setup_error());
        assert!(TunnelError::EmptyGroup.is_setup_error());
        assert!(!TunnelError::Terminate {
            pid: 1,
            message: String::new()
        }
        .is_setup_error());
    }
}
