//! One sandboxed call: spawn, send one request, await one terminal event.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::limits::{self, FsRule, ResourceLimits};
use crate::error::{SkillError, SkillResult};

/// Request written to the child's stdin as one JSON line.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum SandboxRequest<'a> {
    Execute {
        id: Uuid,
        #[serde(rename = "pluginPath")]
        plugin_path: &'a std::path::Path,
        method: &'a str,
        params: &'a Value,
        context: &'a Value,
    },
    Eval {
        id: Uuid,
        code: &'a str,
        context: &'a Value,
    },
}

/// Response read from the child's stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum SandboxResponse {
    Result {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        data: Value,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        error: String,
    },
}

impl SandboxResponse {
    fn answers(&self, session: Uuid) -> bool {
        let id = match self {
            Self::Result { id, .. } | Self::Error { id, .. } => id,
        };
        id.as_deref()
            .is_none_or(|id| id == session.to_string().as_str())
    }
}

/// Bookkeeping for an in-flight session.
#[derive(Debug)]
pub(crate) struct ActiveSession {
    pub(crate) label: String,
    pub(crate) pid: Option<u32>,
    pub(crate) started: Instant,
    pub(crate) cancel: CancellationToken,
}

pub(crate) type SessionTable = Arc<Mutex<std::collections::HashMap<Uuid, ActiveSession>>>;

/// Removes the session from the active table however the call ends,
/// including when the caller drops the future.
struct SessionGuard {
    table: SessionTable,
    id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Everything needed to run one session.
pub(crate) struct SessionSpec {
    pub(crate) label: String,
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) cwd: PathBuf,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) timeout: Duration,
    pub(crate) max_payload_bytes: usize,
    pub(crate) limits: Option<ResourceLimits>,
    /// Confine the filesystem to the working directory and scratch space.
    pub(crate) confine: bool,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminal {
    Completed,
    TimedOut,
    Crashed,
    Cancelled,
}

enum Outcome {
    Response(SandboxResponse),
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
    Failed(SkillError),
}

/// Run one session to its terminal event.
///
/// The child is killed if still running and always reaped before this
/// returns, and the session leaves the active table on every path.
pub(crate) async fn run(
    table: &SessionTable,
    spec: SessionSpec,
    build_request: impl FnOnce(Uuid) -> SkillResult<String>,
) -> (Terminal, SkillResult<Value>) {
    let id = Uuid::new_v4();

    let scratch = match tempfile::Builder::new()
        .prefix("skillbox-session-")
        .tempdir()
    {
        Ok(dir) => dir,
        Err(e) => return (Terminal::Crashed, Err(SkillError::Io(e))),
    };

    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .env_clear()
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env("HOME", scratch.path())
        .env("TMPDIR", scratch.path())
        .env("SKILL_SANDBOX_SESSION", id.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so the whole tree the skill starts can be killed.
    #[cfg(target_os = "linux")]
    cmd.process_group(0);

    let rules: Option<Vec<FsRule>> = spec
        .confine
        .then(|| limits::confinement_rules(&spec.cwd, scratch.path()));
    limits::restrict_child(&mut cmd, spec.limits, rules.as_deref());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return (
                Terminal::Crashed,
                Err(SkillError::Spawn {
                    command: spec.program,
                    message: e.to_string(),
                }),
            );
        },
    };

    let cancel = CancellationToken::new();
    table.lock().unwrap_or_else(PoisonError::into_inner).insert(
        id,
        ActiveSession {
            label: spec.label.clone(),
            pid: child.id(),
            started: Instant::now(),
            cancel: cancel.clone(),
        },
    );
    let _guard = SessionGuard {
        table: Arc::clone(table),
        id,
    };
    let mut group = GroupGuard { pgid: child.id() };
    debug!(session = %id, target = %spec.label, pid = ?child.id(), "Sandbox session spawned");

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stderr(stderr, id));
    }

    // The write runs beside the read so a child that never drains stdin
    // is still bound by the timeout and by cancellation.
    let outcome = match build_request(id) {
        Ok(line) => {
            let writer = child
                .stdin
                .take()
                .map(|stdin| tokio::spawn(send_request(stdin, line, id)));
            let outcome = await_terminal(&mut child, &cancel, &spec, id).await;
            if let Some(writer) = writer {
                writer.abort();
            }
            outcome
        },
        Err(e) => Outcome::Failed(e),
    };

    // Every terminal event ends with the child and its descendants dead and
    // the child reaped.
    group.kill();
    if !matches!(outcome, Outcome::Exited(_)) {
        if let Err(e) = child.start_kill() {
            debug!(session = %id, error = %e, "Sandbox child already gone");
        }
        if let Err(e) = child.wait().await {
            warn!(session = %id, error = %e, "Failed to reap sandbox child");
        }
    }

    let timeout_ms = u64::try_from(spec.timeout.as_millis()).unwrap_or(u64::MAX);
    let result = match outcome {
        Outcome::Response(SandboxResponse::Result { data, .. }) => (Terminal::Completed, Ok(data)),
        Outcome::Response(SandboxResponse::Error { error, .. }) => {
            (Terminal::Completed, Err(SkillError::Execution(error)))
        },
        Outcome::TimedOut => {
            warn!(session = %id, target = %spec.label, timeout_ms, "Sandbox session timed out");
            (Terminal::TimedOut, Err(SkillError::Timeout { timeout_ms }))
        },
        Outcome::Cancelled => (Terminal::Cancelled, Err(SkillError::Cancelled)),
        Outcome::Exited(status) => {
            let code = status.ok().and_then(|s| s.code());
            warn!(session = %id, target = %spec.label, ?code, "Sandbox process exited without a response");
            (Terminal::Crashed, Err(SkillError::ProcessExit { code }))
        },
        Outcome::Failed(e) => (Terminal::Crashed, Err(e)),
    };
    debug!(session = %id, terminal = ?result.0, "Sandbox session finished");
    result
}

/// Kills the child's process group when dropped, so a call whose future is
/// dropped leaves no descendants behind either.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            limits::kill_process_group(pgid);
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Write the request line and close stdin.
///
/// A child that exits before reading its input is reported through the
/// exit path, so write errors are only logged.
async fn send_request(mut stdin: ChildStdin, line: String, id: Uuid) {
    let write = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    };
    if let Err(e) = write.await {
        debug!(session = %id, error = %e, "Sandbox child closed stdin early");
    }
}

async fn await_terminal(
    child: &mut Child,
    cancel: &CancellationToken,
    spec: &SessionSpec,
    id: Uuid,
) -> Outcome {
    let Some(stdout) = child.stdout.take() else {
        return Outcome::Failed(SkillError::Execution(
            "sandbox child has no stdout".to_string(),
        ));
    };
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(spec.max_payload_bytes));

    tokio::select! {
        biased;
        () = cancel.cancelled() => Outcome::Cancelled,
        () = tokio::time::sleep(spec.timeout) => Outcome::TimedOut,
        outcome = async {
            match read_response(&mut lines, spec.max_payload_bytes, id).await {
                Some(outcome) => outcome,
                None => Outcome::Exited(child.wait().await),
            }
        } => outcome,
    }
}

/// Read stdout until a protocol response arrives. `None` means EOF.
async fn read_response(
    lines: &mut FramedRead<ChildStdout, LinesCodec>,
    max_payload_bytes: usize,
    id: Uuid,
) -> Option<Outcome> {
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => match serde_json::from_str::<SandboxResponse>(&line) {
                Ok(response) if response.answers(id) => return Some(Outcome::Response(response)),
                Ok(_) => debug!(session = %id, "Ignoring response for another session"),
                Err(_) => debug!(session = %id, line = %line, "Skill output"),
            },
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                return Some(Outcome::Failed(SkillError::Format(format!(
                    "sandbox message exceeds {max_payload_bytes} bytes"
                ))));
            },
            Err(LinesCodecError::Io(e)) => return Some(Outcome::Failed(SkillError::Io(e))),
        }
    }
    None
}

async fn forward_stderr(stderr: ChildStderr, id: Uuid) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(session = %id, stderr = %line, "Skill stderr");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_wire_format() {
        let id = Uuid::nil();
        let params = json!({"text": "hi"});
        let context = json!({});
        let req = SandboxRequest::Execute {
            id,
            plugin_path: std::path::Path::new("/opt/skills/echo"),
            method: "execute",
            params: &params,
            context: &context,
        };
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["type"], "execute");
        assert_eq!(wire["pluginPath"], "/opt/skills/echo");
        assert_eq!(wire["params"]["text"], "hi");
    }

    #[test]
    fn response_parsing_and_correlation() {
        let ok: SandboxResponse = serde_json::from_str(r#"{"type":"result","data":1}"#).unwrap();
        assert!(ok.answers(Uuid::new_v4()));

        let other: SandboxResponse = serde_json::from_str(&format!(
            r#"{{"type":"error","id":"{}","error":"x"}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        assert!(!other.answers(Uuid::new_v4()));

        assert!(serde_json::from_str::<SandboxResponse>(r#"{"type":"log","msg":"hi"}"#).is_err());
    }
}
