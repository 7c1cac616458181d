//! Error types for Hyper-V operations.
//!
//! Raw command failures are classified from the remote stderr and exit
//! status, then converted into the engine's taxonomy with the host and key
//! they concern.

use converge::ResourceKey;
use thiserror::Error;

/// Exit status ssh uses for its own failures (connection, authentication).
const SSH_FAILURE: i32 = 255;

/// Categories of Hyper-V errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Host could not be reached (transient, retryable)
    Unreachable,
    /// Remote refused (authentication, elevation, ACLs)
    Permission,
    /// Response could not be decoded
    Parse,
    /// The cmdlet ran and failed
    Command,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable)
    }
}

/// Errors that can occur while talking to a Hyper-V host.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-level failure
    #[error("unreachable: {message}")]
    Unreachable { message: String },

    /// Permission denied by ssh or by Windows
    #[error("permission denied: {message}")]
    Permission { message: String },

    /// A PowerShell command failed
    #[error("command failed: {message}")]
    CommandFailed { message: String, stderr: String },

    /// The response was valid JSON but not what was asked for
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Could not start or talk to the local ssh client
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unreachable { .. } | Error::Io(_) => ErrorCategory::Unreachable,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::UnexpectedResponse(_) | Error::Json(_) => ErrorCategory::Parse,
            Error::CommandFailed { .. } => ErrorCategory::Command,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from the output of a failed remote command.
    ///
    /// Analyzes stderr and the exit status to categorize the error.
    pub fn from_output(stderr: &str, exit_code: Option<i32>) -> Self {
        let stderr_lower = stderr.to_lowercase();
        let message = stderr.trim().to_string();

        // Permission errors (checked first: ssh auth failures also exit 255)
        if stderr_lower.contains("permission denied")
            || stderr_lower.contains("access is denied")
            || stderr_lower.contains("requires elevation")
            || stderr_lower.contains("unauthorizedaccess")
            || stderr_lower.contains("you do not have the required permission")
        {
            return Error::Permission { message };
        }

        // Connection errors
        if exit_code == Some(SSH_FAILURE)
            || exit_code.is_none()
            || stderr_lower.contains("connection refused")
            || stderr_lower.contains("connection timed out")
            || stderr_lower.contains("connection reset")
            || stderr_lower.contains("could not resolve hostname")
            || stderr_lower.contains("no route to host")
            || stderr_lower.contains("connection closed")
        {
            return Error::Unreachable { message };
        }

        Error::CommandFailed {
            message: first_line(&message).to_string(),
            stderr: message,
        }
    }

    /// Convert into the engine's error for `key` on `host`
    pub fn into_converge(self, host: &str, key: &ResourceKey) -> converge::Error {
        match self {
            Error::Unreachable { message } => converge::Error::HostUnreachable {
                host: host.to_string(),
                message,
            },
            Error::Io(e) => converge::Error::HostUnreachable {
                host: host.to_string(),
                message: format!("ssh: {e}"),
            },
            Error::Permission { message } => converge::Error::Permission {
                host: host.to_string(),
                message,
            },
            Error::UnexpectedResponse(_) | Error::Json(_) => converge::Error::ProbeParse {
                key: key.clone(),
                message: self.to_string(),
            },
            Error::CommandFailed { message, .. } => converge::Error::InvalidOperation {
                key: key.clone(),
                message,
            },
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().find(|l| !l.trim().is_empty()).unwrap_or(s).trim()
}

/// Result type for Hyper-V operations.
pub type Result<T> = std::result::Result<T, Error>;
