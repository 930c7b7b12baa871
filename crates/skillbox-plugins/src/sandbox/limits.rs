//! Child-process confinement: resource limits, filesystem rules and
//! process-group teardown.
//!
//! Limits and rules are applied inside a `pre_exec` hook, between `fork()` and
//! `exec()`. Everything that allocates (opening path descriptors, building
//! rule lists) happens in the parent before the fork; the hook itself only
//! issues syscalls.

#![allow(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Resource limits applied to sandboxed skill processes.
///
/// Enforced via `setrlimit` on Linux and ignored elsewhere.
///
/// `RLIMIT_NPROC` is per-UID on Linux, not per process tree. `RLIMIT_AS`
/// limits virtual address space, which `node` reserves generously at
/// startup, so memory limits below ~1 GB break JavaScript skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of processes/threads (`RLIMIT_NPROC`).
    pub max_processes: u64,
    /// Maximum virtual address space in bytes (`RLIMIT_AS`).
    pub max_memory_bytes: u64,
    /// Maximum number of open file descriptors (`RLIMIT_NOFILE`).
    pub max_open_files: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_processes: 256,
            max_memory_bytes: 4 * 1024 * 1024 * 1024,
            max_open_files: 256,
        }
    }
}

/// One filesystem confinement rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsRule {
    /// Directory the rule applies beneath.
    pub path: PathBuf,
    /// Allow reads.
    pub read: bool,
    /// Allow writes.
    pub write: bool,
}

/// Rules for a confined session: the skill directory read-only, the session
/// scratch directory writable, system paths read-only.
#[must_use]
pub fn confinement_rules(skill_dir: &Path, scratch_dir: &Path) -> Vec<FsRule> {
    let mut rules = vec![
        FsRule {
            path: skill_dir.to_path_buf(),
            read: true,
            write: false,
        },
        FsRule {
            path: scratch_dir.to_path_buf(),
            read: true,
            write: true,
        },
    ];

    for sys in ["/usr", "/lib", "/lib64", "/bin", "/etc", "/proc"] {
        let path = Path::new(sys);
        if path.exists() {
            rules.push(FsRule {
                path: path.to_path_buf(),
                read: true,
                write: false,
            });
        }
    }
    if Path::new("/dev").exists() {
        rules.push(FsRule {
            path: PathBuf::from("/dev"),
            read: true,
            write: true,
        });
    }
    rules
}

/// Install the confinement hook on `cmd`. A no-op when neither limits nor
/// rules are given.
#[cfg(target_os = "linux")]
pub(crate) fn restrict_child(
    cmd: &mut tokio::process::Command,
    limits: Option<ResourceLimits>,
    rules: Option<&[FsRule]>,
) {
    if limits.is_none() && rules.is_none() {
        return;
    }

    let mut prepared = rules.map(prepare_landlock_rules);

    // SAFETY: pre_exec runs between fork() and exec(). The closure only
    // issues setrlimit and Landlock syscalls on pre-opened descriptors;
    // nothing in it allocates or takes locks.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(limits) = &limits {
                apply_resource_limits(limits)?;
            }
            if let Some(rules) = prepared.take() {
                enforce_landlock_rules(rules)
                    .map_err(|()| std::io::Error::from(std::io::ErrorKind::PermissionDenied))?;
            }
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn restrict_child(
    _cmd: &mut tokio::process::Command,
    limits: Option<ResourceLimits>,
    rules: Option<&[FsRule]>,
) {
    if limits.is_some() || rules.is_some() {
        tracing::warn!("Sandbox resource limits and filesystem rules are only enforced on Linux");
    }
}

/// Send `SIGKILL` to the process group led by `pgid`.
///
/// Sandboxed children are spawned as group leaders on Linux, so this reaches
/// every process the skill started. A group that is already gone is not an
/// error.
#[cfg(target_os = "linux")]
pub(crate) fn kill_process_group(pgid: u32) {
    // Never 0 or negative: those would address the host's own group.
    let Some(pgid) = libc::pid_t::try_from(pgid).ok().filter(|p| *p > 0) else {
        return;
    };
    // SAFETY: killpg only sends a signal to the given group.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pgid, error = %err, "Failed to kill sandbox process group");
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn kill_process_group(_pgid: u32) {}

#[cfg(target_os = "linux")]
struct PreparedLandlockRules {
    /// Pre-opened `(PathFd, read, write)` tuples.
    rules: Vec<(landlock::PathFd, bool, bool)>,
}

/// Open rule paths in the parent. Paths that don't exist are skipped.
#[cfg(target_os = "linux")]
fn prepare_landlock_rules(rules: &[FsRule]) -> PreparedLandlockRules {
    let rules = rules
        .iter()
        .filter(|r| r.read || r.write)
        .filter_map(|r| {
            landlock::PathFd::new(&r.path)
                .ok()
                .map(|fd| (fd, r.read, r.write))
        })
        .collect();
    PreparedLandlockRules { rules }
}

/// Build and enforce the ruleset in the child.
///
/// Best effort: a kernel without Landlock leaves the process unconfined.
#[cfg(target_os = "linux")]
fn enforce_landlock_rules(prepared: PreparedLandlockRules) -> Result<(), ()> {
    use landlock::{
        ABI, Access, AccessFs, CompatLevel, Compatible, PathBeneath, Ruleset, RulesetAttr,
        RulesetCreatedAttr,
    };

    let abi = ABI::V5;

    let mut ruleset = Ruleset::default()
        .set_compatibility(CompatLevel::BestEffort)
        .handle_access(AccessFs::from_all(abi))
        .map_err(|_| ())?
        .create()
        .map_err(|_| ())?;

    for (fd, read, write) in prepared.rules {
        let access = match (read, write) {
            (true, true) => AccessFs::from_all(abi),
            (true, false) => AccessFs::from_read(abi),
            (false, true) => AccessFs::from_write(abi),
            (false, false) => continue,
        };
        ruleset = ruleset
            .add_rule(PathBeneath::new(fd, access))
            .map_err(|_| ())?;
    }

    ruleset.restrict_self().map_err(|_| ())?;
    Ok(())
}

/// `setrlimit` for each configured limit. `last_os_error` reads `errno`
/// without allocating.
#[cfg(target_os = "linux")]
fn apply_resource_limits(limits: &ResourceLimits) -> Result<(), std::io::Error> {
    let pairs = [
        (libc::RLIMIT_NPROC, limits.max_processes),
        (libc::RLIMIT_AS, limits.max_memory_bytes),
        (libc::RLIMIT_NOFILE, limits.max_open_files),
    ];
    for (resource, value) in pairs {
        let limit = libc::rlimit {
            rlim_cur: value,
            rlim_max: value,
        };
        if unsafe { libc::setrlimit(resource, &raw const limit) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
