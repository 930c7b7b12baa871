//! Subprocess sandbox for untrusted skills.
//!
//! Each call spawns the skill's entry file as a separate process, writes a
//! single JSON request line to its stdin and waits for exactly one response
//! line on its stdout. The call ends in exactly one terminal state:
//! completed, timed out, crashed or cancelled. On every path the child is
//! killed and reaped and the session leaves the active table.
//!
//! Calls are independent. Many may be in flight at once, and one timing
//! out or crashing never affects another.

mod limits;
mod session;

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

pub use limits::{FsRule, ResourceLimits, confinement_rules};
use session::{SandboxRequest, SessionSpec, SessionTable, Terminal};

use crate::error::{SkillError, SkillResult};
use crate::manifest::load_manifest;

/// Default wall-clock budget for `execute`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wall-clock budget for `eval`.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum size of one protocol message (10 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Bootstrap run by the default evaluator: read one request line, evaluate
/// `code` in a fresh VM context with `context` bound, print one response.
const NODE_EVAL_BOOTSTRAP: &str = r"
const vm = require('vm');
let input = '';
process.stdin.on('data', (c) => { input += c; });
process.stdin.on('end', () => {
  let req = {};
  try {
    req = JSON.parse(input.split('\n')[0]);
    const data = vm.runInNewContext(req.code, { context: req.context }, { timeout: 5000 });
    process.stdout.write(JSON.stringify({ type: 'result', id: req.id, data: data === undefined ? null : data }) + '\n');
  } catch (e) {
    process.stdout.write(JSON.stringify({ type: 'error', id: req.id, error: String((e && e.message) || e) }) + '\n');
  }
});
";

/// Sandbox settings.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Default budget for `execute`.
    pub timeout: Duration,
    /// Budget for `eval`.
    pub eval_timeout: Duration,
    /// Skill paths must resolve beneath one of these directories.
    pub allowed_dirs: Vec<PathBuf>,
    /// Maximum size of one protocol message.
    pub max_payload_bytes: usize,
    /// Whether skills are told network access is permitted.
    pub network: bool,
    /// Optional `setrlimit` limits (Linux).
    pub resource_limits: Option<ResourceLimits>,
    /// Confine the child's filesystem view with Landlock (Linux).
    pub restrict_filesystem: bool,
    /// Interpreter command per entry file extension.
    pub interpreters: BTreeMap<String, Vec<String>>,
    /// Evaluator command for `eval`; the request arrives on stdin.
    pub eval_command: Vec<String>,
    /// Extra environment variables copied from the host.
    pub env_passthrough: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            timeout: DEFAULT_TIMEOUT,
            eval_timeout: DEFAULT_EVAL_TIMEOUT,
            allowed_dirs: vec![
                cwd.join("skills"),
                PathBuf::from("/tmp/skills"),
                PathBuf::from("/opt/skills"),
            ],
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            network: true,
            resource_limits: None,
            restrict_filesystem: false,
            interpreters: default_interpreters(),
            eval_command: vec![
                "node".to_string(),
                "-e".to_string(),
                NODE_EVAL_BOOTSTRAP.to_string(),
            ],
            env_passthrough: Vec::new(),
        }
    }
}

/// Interpreters for common entry file types.
#[must_use]
pub fn default_interpreters() -> BTreeMap<String, Vec<String>> {
    [
        ("js", "node"),
        ("mjs", "node"),
        ("cjs", "node"),
        ("py", "python3"),
        ("sh", "sh"),
    ]
    .into_iter()
    .map(|(ext, cmd)| (ext.to_string(), vec![cmd.to_string()]))
    .collect()
}

/// Point-in-time sandbox statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxStats {
    /// Sessions currently in flight.
    pub active: usize,
    /// Sessions that received a response.
    pub completed: u64,
    /// Sessions killed on timeout.
    pub timed_out: u64,
    /// Sessions that exited, failed to spawn, or broke the protocol.
    pub crashed: u64,
    /// Sessions cancelled by `cleanup`.
    pub cancelled: u64,
    /// Default `execute` budget in milliseconds.
    pub timeout_ms: u64,
    /// `eval` budget in milliseconds.
    pub eval_timeout_ms: u64,
    /// Configured address-space limit.
    pub memory_limit_bytes: Option<u64>,
    /// Whether skills are told network access is permitted.
    pub network: bool,
}

/// An in-flight session as reported by [`Sandbox::sessions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Correlation ID.
    pub id: Uuid,
    /// Skill path or `eval`.
    pub target: String,
    /// Child process ID.
    pub pid: Option<u32>,
    /// Time since spawn, in milliseconds.
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    timed_out: AtomicU64,
    crashed: AtomicU64,
    cancelled: AtomicU64,
}

impl Counters {
    fn record(&self, terminal: Terminal) {
        let counter = match terminal {
            Terminal::Completed => &self.completed,
            Terminal::TimedOut => &self.timed_out,
            Terminal::Crashed => &self.crashed,
            Terminal::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Subprocess sandbox. Cheap to clone; clones share the active table.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: Arc<SandboxConfig>,
    sessions: SessionTable,
    counters: Arc<Counters>,
}

impl Sandbox {
    /// Create a sandbox with the given configuration.
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `method` of the skill in `path` in a fresh subprocess.
    ///
    /// The budget is `context.timeout` (milliseconds) when present, else the
    /// configured default.
    ///
    /// # Errors
    ///
    /// [`SkillError::Path`] before anything is spawned if `path` is outside
    /// the allowed directories; [`SkillError::Timeout`],
    /// [`SkillError::ProcessExit`], [`SkillError::Cancelled`], or
    /// [`SkillError::Execution`] with the skill's own message.
    pub async fn execute(
        &self,
        path: &Path,
        method: &str,
        params: Value,
        context: Value,
    ) -> SkillResult<Value> {
        let timeout = context
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);
        self.execute_with_timeout(path, method, params, context, timeout)
            .await
    }

    /// [`Sandbox::execute`] with an explicit budget override.
    ///
    /// # Errors
    ///
    /// See [`Sandbox::execute`].
    pub async fn execute_with_timeout(
        &self,
        path: &Path,
        method: &str,
        params: Value,
        context: Value,
        timeout: Option<Duration>,
    ) -> SkillResult<Value> {
        let skill_dir = self.resolve_allowed(path)?;

        let manifest = load_manifest(&skill_dir)?;
        manifest.validate()?;
        let entry = skill_dir.join(&manifest.entry);
        if !entry.is_file() {
            return Err(SkillError::EntryNotFound {
                id: manifest.id,
                entry: manifest.entry,
            });
        }

        let (program, args) = self.command_for(&entry);
        let timeout = timeout.unwrap_or(self.config.timeout);
        let spec = SessionSpec {
            label: skill_dir.display().to_string(),
            program,
            args,
            cwd: skill_dir.clone(),
            env: self.child_env(timeout),
            timeout,
            max_payload_bytes: self.config.max_payload_bytes,
            limits: self.config.resource_limits,
            confine: self.config.restrict_filesystem,
        };

        let (terminal, result) = session::run(&self.sessions, spec, |id| {
            let request = SandboxRequest::Execute {
                id,
                plugin_path: &skill_dir,
                method,
                params: &params,
                context: &context,
            };
            Ok(serde_json::to_string(&request)?)
        })
        .await;
        self.counters.record(terminal);
        result
    }

    /// Evaluate a one-off snippet with the configured evaluator.
    ///
    /// Same termination contract as `execute`, with the shorter eval budget.
    ///
    /// # Errors
    ///
    /// As for [`Sandbox::execute`], minus the path check.
    pub async fn eval(&self, code: &str, context: Value) -> SkillResult<Value> {
        let Some((program, args)) = self.config.eval_command.split_first() else {
            return Err(SkillError::Validation(
                "no evaluator command configured".to_string(),
            ));
        };

        let timeout = self.config.eval_timeout;
        let spec = SessionSpec {
            label: "eval".to_string(),
            program: program.clone(),
            args: args.to_vec(),
            cwd: std::env::temp_dir(),
            env: self.child_env(timeout),
            timeout,
            max_payload_bytes: self.config.max_payload_bytes,
            limits: self.config.resource_limits,
            confine: self.config.restrict_filesystem,
        };

        let (terminal, result) = session::run(&self.sessions, spec, |id| {
            let request = SandboxRequest::Eval {
                id,
                code,
                context: &context,
            };
            Ok(serde_json::to_string(&request)?)
        })
        .await;
        self.counters.record(terminal);
        result
    }

    /// Number of sessions in flight.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// In-flight sessions, oldest first.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let table = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<(std::time::Instant, SessionInfo)> = table
            .iter()
            .map(|(id, s)| {
                (
                    s.started,
                    SessionInfo {
                        id: *id,
                        target: s.label.clone(),
                        pid: s.pid,
                        elapsed_ms: u64::try_from(s.started.elapsed().as_millis())
                            .unwrap_or(u64::MAX),
                    },
                )
            })
            .collect();
        out.sort_by_key(|(started, _)| *started);
        out.into_iter().map(|(_, info)| info).collect()
    }

    /// Force-kill every in-flight session.
    ///
    /// Each cancelled call kills and reaps its child and fails with
    /// [`SkillError::Cancelled`]. Returns the number of sessions signalled.
    pub fn cleanup(&self) -> usize {
        let table = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        for session in table.values() {
            session.cancel.cancel();
        }
        let count = table.len();
        if count > 0 {
            info!(sessions = count, "Cancelling sandbox sessions");
        }
        count
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SandboxStats {
        SandboxStats {
            active: self.active_count(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            crashed: self.counters.crashed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            timeout_ms: u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
            eval_timeout_ms: u64::try_from(self.config.eval_timeout.as_millis())
                .unwrap_or(u64::MAX),
            memory_limit_bytes: self.config.resource_limits.map(|l| l.max_memory_bytes),
            network: self.config.network,
        }
    }

    /// Resolve `path` and check it lies beneath an allowed directory.
    ///
    /// Relative paths are taken from the current directory. The path is
    /// normalized lexically, then canonicalized when it exists so symlinks
    /// cannot point outside.
    ///
    /// # Errors
    ///
    /// Returns [`SkillError::Path`] when no allowed directory contains it.
    pub fn resolve_allowed(&self, path: &Path) -> SkillResult<PathBuf> {
        let resolved = resolve(path);
        let allowed = self
            .config
            .allowed_dirs
            .iter()
            .map(|dir| resolve(dir))
            .any(|base| resolved != base && resolved.starts_with(&base));
        if allowed {
            Ok(resolved)
        } else {
            warn!(path = %path.display(), "Rejected sandbox path outside allowed directories");
            Err(SkillError::Path {
                path: path.to_path_buf(),
            })
        }
    }

    fn command_for(&self, entry: &Path) -> (String, Vec<String>) {
        let interpreter = entry
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.config.interpreters.get(ext))
            .and_then(|cmd| cmd.split_first());
        let entry_arg = entry.display().to_string();
        match interpreter {
            Some((program, rest)) => {
                let mut args = rest.to_vec();
                args.push(entry_arg);
                (program.clone(), args)
            },
            None => (entry_arg, Vec::new()),
        }
    }

    fn child_env(&self, timeout: Duration) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = ["PATH", "LANG"]
            .into_iter()
            .map(str::to_string)
            .chain(self.config.env_passthrough.iter().cloned())
            .filter_map(|key| std::env::var(&key).ok().map(|value| (key, value)))
            .collect();
        env.push(("SKILL_SANDBOX".to_string(), "1".to_string()));
        env.push((
            "SKILL_SANDBOX_TIMEOUT_MS".to_string(),
            timeout.as_millis().to_string(),
        ));
        env.push((
            "SKILL_SANDBOX_NETWORK".to_string(),
            if self.config.network { "1" } else { "0" }.to_string(),
        ));
        env
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

/// Absolute, lexically normalized, and canonical when the path exists.
fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            },
            Component::CurDir => {},
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized.canonicalize().unwrap_or(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_in(dir: &Path) -> Sandbox {
        Sandbox::new(SandboxConfig {
            allowed_dirs: vec![dir.to_path_buf()],
            ..SandboxConfig::default()
        })
    }

    #[test]
    fn resolve_normalizes_parent_components() {
        assert_eq!(
            resolve(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(resolve(Path::new("/../..")), PathBuf::from("/"));
    }

    #[test]
    fn traversal_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(tmp.path());

        let escape = tmp.path().join("skill/../../etc");
        assert!(matches!(
            sandbox.resolve_allowed(&escape),
            Err(SkillError::Path { .. })
        ));
        assert!(matches!(
            sandbox.resolve_allowed(Path::new("../../etc")),
            Err(SkillError::Path { .. })
        ));
        // The base itself is not a skill directory.
        assert!(sandbox.resolve_allowed(tmp.path()).is_err());
    }

    #[test]
    fn nested_path_is_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let skill = tmp.path().join("community").join("echo");
        std::fs::create_dir_all(&skill).unwrap();
        let sandbox = sandbox_in(tmp.path());
        let resolved = sandbox.resolve_allowed(&skill).unwrap();
        assert!(resolved.ends_with("community/echo"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link = tmp.path().join("sneaky");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let sandbox = sandbox_in(tmp.path());
        assert!(sandbox.resolve_allowed(&link).is_err());
    }

    #[test]
    fn interpreter_selection() {
        let sandbox = Sandbox::default();
        let (program, args) = sandbox.command_for(Path::new("/s/index.js"));
        assert_eq!(program, "node");
        assert_eq!(args, vec!["/s/index.js".to_string()]);

        let (program, args) = sandbox.command_for(Path::new("/s/run"));
        assert_eq!(program, "/s/run");
        assert!(args.is_empty());
    }

    #[test]
    fn child_env_flags() {
        let sandbox = Sandbox::new(SandboxConfig {
            network: false,
            ..SandboxConfig::default()
        });
        let env = sandbox.child_env(Duration::from_millis(1500));
        assert!(env.contains(&("SKILL_SANDBOX".into(), "1".into())));
        assert!(env.contains(&("SKILL_SANDBOX_NETWORK".into(), "0".into())));
        assert!(env.contains(&("SKILL_SANDBOX_TIMEOUT_MS".into(), "1500".into())));
    }

    #[tokio::test]
    async fn path_error_spawns_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(tmp.path());
        let err = sandbox
            .execute(
                Path::new("../../etc"),
                "execute",
                Value::Null,
                Value::Null,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::Path { .. }));
        let stats = sandbox.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.completed + stats.crashed + stats.timed_out, 0);
    }

    #[test]
    fn cleanup_with_nothing_running() {
        assert_eq!(Sandbox::default().cleanup(), 0);
    }
}
