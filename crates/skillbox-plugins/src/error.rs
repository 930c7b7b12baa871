//! Skill runtime error types.

use std::path::PathBuf;

/// Errors from skill registry, loader, sandbox and manager operations.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    /// A manifest or a set of call parameters failed validation.
    #[error("{0}")]
    Validation(String),

    /// The requested skill is not registered or not loaded.
    #[error("skill not found: {0}")]
    NotFound(String),

    /// The skill is known but its load status does not allow execution.
    #[error("skill {id} is not ready (status: {status})")]
    NotReady {
        /// The skill that was called.
        id: String,
        /// Its current load status.
        status: String,
    },

    /// A skill with this ID is already installed.
    #[error("skill already installed: {0}")]
    AlreadyInstalled(String),

    /// A fetched or reloaded manifest declares a different skill ID.
    #[error("skill id mismatch: expected '{expected}', found '{actual}'")]
    Mismatch {
        /// The ID the caller asked for.
        expected: String,
        /// The ID declared by the manifest.
        actual: String,
    },

    /// A sandbox path resolved outside every allowed base directory.
    #[error("path not allowed: {}", path.display())]
    Path {
        /// The rejected path.
        path: PathBuf,
    },

    /// A sandboxed call exceeded its wall-clock budget.
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout {
        /// The budget that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// The sandboxed process exited without sending a response.
    #[error("process exited with {} before responding", code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    ProcessExit {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// A declared dependency could not be satisfied.
    ///
    /// Only ever surfaced as an install warning.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// A tool name or protocol request was malformed.
    #[error("invalid format: {0}")]
    Format(String),

    /// The skill itself reported a failure.
    #[error("{0}")]
    Execution(String),

    /// A sandboxed call was cancelled by a forced cleanup.
    #[error("execution cancelled")]
    Cancelled,

    /// Failed to read or parse a manifest file.
    #[error("manifest error in {}: {message}", path.display())]
    Manifest {
        /// Path to the manifest file.
        path: PathBuf,
        /// Parse error message.
        message: String,
    },

    /// The skill's entry point could not be resolved.
    #[error("entry point not found for {id}: {entry}")]
    EntryNotFound {
        /// The skill being loaded.
        id: String,
        /// The entry file or exported symbol that was missing.
        entry: String,
    },

    /// A source identifier could not be parsed.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Fetching a skill source failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Archive extraction failed.
    #[error("extraction error: {message}")]
    Extraction {
        /// Error description.
        message: String,
    },

    /// An archive entry tried to escape the extraction directory.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path.
        path: String,
    },

    /// A download exceeded the size limit.
    #[error("package too large: {size} bytes (limit: {limit} bytes)")]
    PackageTooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        limit: u64,
    },

    /// Reading or writing the persisted registry failed.
    #[error("registry error at {}: {message}", path.display())]
    Registry {
        /// Path to the registry file.
        path: PathBuf,
        /// Error description.
        message: String,
    },

    /// A sandbox process could not be started.
    #[error("failed to spawn {command}: {message}")]
    Spawn {
        /// The program that failed to start.
        command: String,
        /// Error description.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SkillError {
    /// Short machine-readable kind, used in structured reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::NotReady { .. } => "not_ready",
            Self::AlreadyInstalled(_) => "already_installed",
            Self::Mismatch { .. } => "mismatch",
            Self::Path { .. } => "path",
            Self::Timeout { .. } => "timeout",
            Self::ProcessExit { .. } => "process_exit",
            Self::Dependency(_) => "dependency",
            Self::Format(_) => "format",
            Self::Execution(_) => "execution",
            Self::Cancelled => "cancelled",
            Self::Manifest { .. } => "manifest",
            Self::EntryNotFound { .. } => "entry_not_found",
            Self::InvalidSource(_) => "invalid_source",
            Self::Fetch(_) => "fetch",
            Self::Extraction { .. } => "extraction",
            Self::PathTraversal { .. } => "path_traversal",
            Self::PackageTooLarge { .. } => "package_too_large",
            Self::Registry { .. } => "registry",
            Self::Spawn { .. } => "spawn",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

/// Result type for skill operations.
pub type SkillResult<T> = Result<T, SkillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_exit_message_distinguishes_signal() {
        let coded = SkillError::ProcessExit { code: Some(3) };
        assert_eq!(
            coded.to_string(),
            "process exited with code 3 before responding"
        );

        let signalled = SkillError::ProcessExit { code: None };
        assert_eq!(
            signalled.to_string(),
            "process exited with a signal before responding"
        );
    }

    #[test]
    fn validation_message_is_passed_through() {
        let err = SkillError::Validation("Missing required parameter: text".into());
        assert_eq!(err.to_string(), "Missing required parameter: text");
        assert_eq!(err.kind(), "validation");
    }
}
