//! Closed error taxonomy for the engine core.
//!
//! Every variant carries enough structure to decide retryability and to be
//! embedded verbatim into an [`crate::domain::report::ExecutionReport`].

use thiserror::Error;

/// A single categorized engine failure.
///
/// Categories mirror the taxonomy table: provider, timeout, validation,
/// scope, config, git, permission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("provider {kind}: {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
        /// §7: crash/rate_limit/5xx are retryable, auth/4xx are not. A POSIX
        /// exit status and an HTTP status both collapse onto `ApiError`, so
        /// the retryable bit can't be derived from `kind` alone and is
        /// carried explicitly by whoever classified the failure.
        retryable: bool,
    },

    #[error("timeout during {kind}")]
    Timeout { kind: TimeoutKind },

    #[error("validation failed in phase {phase}")]
    Validation { phase: String },

    #[error("scope violation ({kind}): {files:?}")]
    Scope { kind: ScopeErrorKind, files: Vec<String> },

    #[error("config {kind}: {message}")]
    Config { kind: ConfigErrorKind, message: String },

    #[error("git operation failed: {kind}")]
    Git { kind: GitErrorKind },

    #[error("permission denied: {kind}")]
    Permission { kind: PermissionErrorKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Crash,
    NotAvailable,
    ApiError,
    RateLimit,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Crash => "crash",
            Self::NotAvailable => "not_available",
            Self::ApiError => "api_error",
            Self::RateLimit => "rate_limit",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Iteration,
    Operation,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Iteration => "iteration",
            Self::Operation => "operation",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeErrorKind {
    Forbidden,
    OutsideAllowed,
    UserDenied,
}

impl std::fmt::Display for ScopeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Forbidden => "forbidden",
            Self::OutsideAllowed => "outside_allowed",
            Self::UserDenied => "user_denied",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    Invalid,
    Missing,
    EnvVarMissing,
    ParseError,
}

impl std::fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::Missing => "missing",
            Self::EnvVarMissing => "env_var_missing",
            Self::ParseError => "parse_error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitErrorKind {
    CommitFailed,
    PushFailed,
    RevertFailed,
    StatusFailed,
}

impl std::fmt::Display for GitErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CommitFailed => "commit_failed",
            Self::PushFailed => "push_failed",
            Self::RevertFailed => "revert_failed",
            Self::StatusFailed => "status_failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionErrorKind {
    SkipDenied,
    CommandBlocked,
    FileAccess,
    ApiAuth,
}

impl std::fmt::Display for PermissionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SkipDenied => "skip_denied",
            Self::CommandBlocked => "command_blocked",
            Self::FileAccess => "file_access",
            Self::ApiAuth => "api_auth",
        };
        write!(f, "{s}")
    }
}

impl EngineError {
    /// Stable category name, used in reports and structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Provider { .. } => "provider",
            Self::Timeout { .. } => "timeout",
            Self::Validation { .. } => "validation",
            Self::Scope { .. } => "scope",
            Self::Config { .. } => "config",
            Self::Git { .. } => "git",
            Self::Permission { .. } => "permission",
        }
    }

    /// Whether the iteration loop should retry after this error rather than
    /// terminate the run. Matches the §7 taxonomy table exactly.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Provider { kind, retryable, .. } => *retryable && !matches!(kind, ProviderErrorKind::NotAvailable),
            Self::Timeout { .. } => true,
            Self::Validation { .. } => true,
            Self::Scope { kind, .. } => !matches!(kind, ScopeErrorKind::UserDenied),
            Self::Config { .. } => false,
            Self::Git { kind } => !matches!(kind, GitErrorKind::RevertFailed),
            Self::Permission { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_crash_is_retryable() {
        let e = EngineError::Provider {
            kind: ProviderErrorKind::Crash,
            message: "boom".into(),
            retryable: true,
        };
        assert!(e.retryable());
        assert_eq!(e.category(), "provider");
    }

    #[test]
    fn provider_not_available_is_not_retryable() {
        let e = EngineError::Provider {
            kind: ProviderErrorKind::NotAvailable,
            message: "missing binary".into(),
            retryable: true,
        };
        assert!(!e.retryable());
    }

    #[test]
    fn provider_api_error_5xx_is_retryable() {
        let e = EngineError::Provider {
            kind: ProviderErrorKind::ApiError,
            message: "server exploded".into(),
            retryable: true,
        };
        assert!(e.retryable());
    }

    #[test]
    fn provider_api_error_4xx_is_not_retryable() {
        let e = EngineError::Provider {
            kind: ProviderErrorKind::ApiError,
            message: "bad request".into(),
            retryable: false,
        };
        assert!(!e.retryable());
    }

    #[test]
    fn scope_user_denied_is_not_retryable() {
        let e = EngineError::Scope {
            kind: ScopeErrorKind::UserDenied,
            files: vec!["a.ts".into()],
        };
        assert!(!e.retryable());
    }

    #[test]
    fn scope_forbidden_is_retryable() {
        let e = EngineError::Scope {
            kind: ScopeErrorKind::Forbidden,
            files: vec!["node_modules/x.js".into()],
        };
        assert!(e.retryable());
    }

    #[test]
    fn config_errors_never_retry() {
        let e = EngineError::Config {
            kind: ConfigErrorKind::Missing,
            message: ".ai/AGENTS.md not found".into(),
        };
        assert!(!e.retryable());
    }

    #[test]
    fn git_revert_failed_is_not_retryable() {
        let e = EngineError::Git {
            kind: GitErrorKind::RevertFailed,
        };
        assert!(!e.retryable());
    }

    #[test]
    fn git_commit_failed_is_retryable() {
        let e = EngineError::Git {
            kind: GitErrorKind::CommitFailed,
        };
        assert!(e.retryable());
    }

    #[test]
    fn permission_errors_never_retry() {
        let e = EngineError::Permission {
            kind: PermissionErrorKind::CommandBlocked,
        };
        assert!(!e.retryable());
    }
}
