//! Error types for external tool execution.

use thiserror::Error;

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while running an external tool.
///
/// # Security Notes
///
/// `Display` strings name the program and the failure class only. Tool stderr
/// is logged at debug level and never carried in an error, so it cannot leak
/// into a caller-facing message.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program outlived its wall-clock budget and was killed.
    #[error("{program} timed out after {timeout_ms} ms")]
    TimedOut {
        /// Program that was killed
        program: String,
        /// Budget that was exceeded
        timeout_ms: u64,
    },

    /// The program exited with a code outside its success contract.
    #[error("{program} exited with {}", describe_exit(.code))]
    ExitStatus {
        /// Program that failed
        program: String,
        /// Exit code, `None` if killed by a signal
        code: Option<i32>,
    },

    /// The program reported success but did not produce its output.
    #[error("{program} produced no output")]
    MissingOutput {
        /// Program that failed
        program: String,
    },

    /// Waiting on the child or touching scratch files failed.
    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

impl SandboxError {
    /// Returns true if the failure was a timeout kill.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::TimedOut { .. })
    }
}
