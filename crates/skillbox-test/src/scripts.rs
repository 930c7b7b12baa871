//! POSIX `sh` skills for sandbox tests.
//!
//! Each script reads one request line from stdin and behaves according to
//! a [`ScriptBehavior`]. The entry file is `main.sh`, which the sandbox's
//! default interpreter table runs with `sh`.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::fixtures::ManifestBuilder;

/// Entry file written by [`write_script_skill`].
pub const SCRIPT_ENTRY: &str = "main.sh";

/// File in the skill directory where [`ScriptBehavior::Background`] records
/// the pid of the process it starts.
pub const BACKGROUND_PID_FILE: &str = "background.pid";

/// What a script skill does with its request.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptBehavior {
    /// Reply with the whole request as `data`.
    Echo,
    /// Reply with a fixed value.
    Reply(Value),
    /// Reply with an error message.
    Fail(String),
    /// Never reply.
    Hang,
    /// Sleep, then echo.
    Slow {
        /// Seconds to sleep.
        secs: u32,
    },
    /// Exit without replying.
    Exit(i32),
    /// Print a line that is not JSON, then echo.
    Noise,
    /// Start a long `sleep` in the background, record its pid in
    /// [`BACKGROUND_PID_FILE`] and wait on it without replying.
    Background,
}

fn sh_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Body of the script for `behavior`.
#[must_use]
pub fn script_source(behavior: &ScriptBehavior) -> String {
    const ECHO: &str = "printf '{\"type\":\"result\",\"data\":%s}\\n' \"$line\"\n";
    let body = match behavior {
        ScriptBehavior::Echo => format!("read -r line\n{ECHO}"),
        ScriptBehavior::Reply(data) => {
            let response = serde_json::json!({ "type": "result", "data": data });
            format!("read -r line\nprintf '%s\\n' {}\n", sh_quote(&response.to_string()))
        },
        ScriptBehavior::Fail(message) => {
            let response = serde_json::json!({ "type": "error", "error": message });
            format!("read -r line\nprintf '%s\\n' {}\n", sh_quote(&response.to_string()))
        },
        ScriptBehavior::Hang => "exec sleep 30\n".to_string(),
        ScriptBehavior::Slow { secs } => format!("read -r line\nsleep {secs}\n{ECHO}"),
        ScriptBehavior::Exit(code) => format!("read -r line\nexit {code}\n"),
        ScriptBehavior::Noise => format!("read -r line\necho 'booting...'\n{ECHO}"),
        ScriptBehavior::Background => {
            format!("read -r line\nsleep 40 &\necho $! > {BACKGROUND_PID_FILE}\nwait\n")
        },
    };
    format!("#!/bin/sh\n{body}")
}

/// Write a script skill to `<parent>/<id>`.
///
/// Returns the skill directory.
///
/// # Panics
///
/// Panics if the files cannot be written.
#[must_use]
pub fn write_script_skill(parent: &Path, id: &str, behavior: &ScriptBehavior) -> PathBuf {
    let dir = ManifestBuilder::new(id)
        .entry(SCRIPT_ENTRY)
        .entry_source(&script_source(behavior))
        .write_to(parent);
    make_executable(&dir.join(SCRIPT_ENTRY));
    dir
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to mark script executable");
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn scripts_start_with_shebang() {
        for behavior in [
            ScriptBehavior::Echo,
            ScriptBehavior::Hang,
            ScriptBehavior::Exit(3),
            ScriptBehavior::Fail("boom".into()),
        ] {
            assert!(script_source(&behavior).starts_with("#!/bin/sh\n"));
        }
        assert!(script_source(&ScriptBehavior::Hang).contains("exec sleep"));
        assert!(script_source(&ScriptBehavior::Background).contains(BACKGROUND_PID_FILE));
    }

    #[test]
    fn writes_skill_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_script_skill(tmp.path(), "slow", &ScriptBehavior::Slow { secs: 1 });
        assert!(dir.join(SCRIPT_ENTRY).is_file());
        let manifest: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("skill.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["entry"], SCRIPT_ENTRY);
    }
}
