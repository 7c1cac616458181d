//! Error types for reconciliation.
//!
//! Errors are categorized so the executor knows how far a failure reaches.
//! Validation and cycle errors abort the run before any remote contact,
//! transient errors are retried, and everything else is contained to a
//! host, a dependency branch, or a single entity.

use crate::model::ResourceKey;
use serde::Serialize;
use thiserror::Error;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed resource graph
    Validation,
    /// Dependency cycle in the resource graph
    Cycle,
    /// Remote host could not be reached (retryable)
    Transient,
    /// Remote host refused the operation
    Permission,
    /// The remote operation is not possible as requested
    InvalidOperation,
    /// The remote response could not be interpreted
    ProbeParse,
    /// Engine failure unrelated to any resource
    Internal,
}

/// How far a failure propagates once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Abort the whole run
    Run,
    /// Skip everything left on the affected host
    Host,
    /// Skip the failed entity and everything depending on it
    Branch,
    /// Fail only the entity itself
    Entity,
}

impl ErrorCategory {
    /// Whether this error category is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Containment scope for this category.
    pub fn scope(&self) -> Scope {
        match self {
            Self::Validation | Self::Cycle | Self::Internal => Scope::Run,
            Self::Permission => Scope::Host,
            Self::Transient | Self::InvalidOperation => Scope::Branch,
            Self::ProbeParse => Scope::Entity,
        }
    }

    /// Short user-facing description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid resource declaration",
            Self::Cycle => "Dependency cycle",
            Self::Transient => "Host unreachable",
            Self::Permission => "Permission denied",
            Self::InvalidOperation => "Invalid operation",
            Self::ProbeParse => "Unreadable probe response",
            Self::Internal => "Internal error",
        }
    }
}

/// Errors that can occur while building, resolving or reconciling a graph.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Two declarations share the same unique key
    #[error("duplicate resource key: {key}")]
    DuplicateKey { key: ResourceKey },

    /// A declaration references a key that is not declared
    #[error("{from} references {to}, which is not declared")]
    DanglingReference { from: ResourceKey, to: ResourceKey },

    /// A field violates its invariant
    #[error("invalid field `{field}` on {key}: {message}")]
    InvalidField {
        key: ResourceKey,
        field: &'static str,
        message: String,
    },

    /// A capacity string could not be normalized
    #[error("invalid capacity '{value}': {message}")]
    InvalidCapacity { value: String, message: String },

    /// The reference graph contains a cycle
    #[error("cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<ResourceKey> },

    /// The host did not answer
    #[error("host {host} unreachable: {message}")]
    HostUnreachable { host: String, message: String },

    /// The host refused the request
    #[error("permission denied on {host}: {message}")]
    Permission { host: String, message: String },

    /// The requested operation cannot be carried out
    #[error("invalid operation on {key}: {message}")]
    InvalidOperation { key: ResourceKey, message: String },

    /// The host answered with something that could not be interpreted
    #[error("could not interpret probe response for {key}: {message}")]
    ProbeParse { key: ResourceKey, message: String },

    /// Engine-level failure (thread pool, poisoned state)
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::DuplicateKey { .. }
            | Error::DanglingReference { .. }
            | Error::InvalidField { .. }
            | Error::InvalidCapacity { .. } => ErrorCategory::Validation,
            Error::CyclicDependency { .. } => ErrorCategory::Cycle,
            Error::HostUnreachable { .. } => ErrorCategory::Transient,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::InvalidOperation { .. } => ErrorCategory::InvalidOperation,
            Error::ProbeParse { .. } => ErrorCategory::ProbeParse,
            Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Containment scope of this error.
    pub fn scope(&self) -> Scope {
        self.category().scope()
    }

    pub(crate) fn invalid_field(
        key: &ResourceKey,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Error::InvalidField {
            key: key.clone(),
            field,
            message: message.into(),
        }
    }
}

fn format_cycle(cycle: &[ResourceKey]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(!ErrorCategory::Permission.is_retryable());
        assert!(!ErrorCategory::InvalidOperation.is_retryable());
        assert!(!ErrorCategory::ProbeParse.is_retryable());
        assert!(!ErrorCategory::Validation.is_retryable());
    }

    #[test]
    fn test_scopes() {
        let unreachable = Error::HostUnreachable {
            host: "hv01".into(),
            message: "timed out".into(),
        };
        assert_eq!(unreachable.scope(), Scope::Branch);

        let denied = Error::Permission {
            host: "hv01".into(),
            message: "access is denied".into(),
        };
        assert_eq!(denied.scope(), Scope::Host);

        let parse = Error::ProbeParse {
            key: ResourceKey::switch("hv01", "LAN"),
            message: "expected object".into(),
        };
        assert_eq!(parse.scope(), Scope::Entity);

        let dup = Error::DuplicateKey {
            key: ResourceKey::host("hv01"),
        };
        assert_eq!(dup.scope(), Scope::Run);
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let err = Error::CyclicDependency {
            cycle: vec![
                ResourceKey::vm("hv01", "a"),
                ResourceKey::vm("hv01", "b"),
                ResourceKey::vm("hv01", "a"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "cyclic dependency: vm:hv01/a -> vm:hv01/b -> vm:hv01/a"
        );
    }
}
