//! Test harness helpers.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Create a temporary directory for testing.
///
/// # Panics
///
/// Panics if the temporary directory cannot be created.
#[must_use]
pub fn test_dir() -> TempDir {
    TempDir::with_prefix("skillbox-test-").expect("Failed to create temp directory")
}

/// Set up test logging with the given filter.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// Set up test logging at `warn`.
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}

/// A temporary runtime root.
///
/// Mirrors the default on-disk layout: `skills/` for installed skills,
/// `temp/` for staging and `sources/` for local install sources.
#[derive(Debug)]
pub struct TestContext {
    /// Temporary directory for the test.
    pub dir: TempDir,
}

impl TestContext {
    /// Create a new test context.
    #[must_use]
    pub fn new() -> Self {
        Self { dir: test_dir() }
    }

    /// Root of the context.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `<root>/skills`.
    #[must_use]
    pub fn skills_dir(&self) -> PathBuf {
        self.path().join("skills")
    }

    /// `<root>/sources`, created on demand.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.create_subdir("sources")
    }

    /// Create a subdirectory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_layout() {
        let ctx = TestContext::new();
        assert!(ctx.path().exists());
        assert_eq!(ctx.skills_dir(), ctx.path().join("skills"));
        assert!(ctx.sources_dir().is_dir());
    }

    #[test]
    fn logging_is_idempotent() {
        setup_test_logging_default();
        setup_test_logging("debug");
    }
}
