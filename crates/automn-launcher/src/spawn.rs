// SPDX-License-Identifier: MIT OR Apache-2.0
use automn_error::{AutomnError, ErrorCode};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// A spawned interpreter process plus the means to kill its entire subtree.
/// A Node script, for example, may spawn grandchildren; killing only the
/// immediate child would orphan them. This is the single most bug-prone
/// area per the design notes, so both platforms get an explicit,
/// independently testable kill path.
pub struct GroupedChild {
    pub child: Child,
    #[cfg(unix)]
    pgid: i32,
}

impl GroupedChild {
    /// Best-effort graceful terminate of the whole subtree (SIGTERM on
    /// Unix; `taskkill` without `/F` on Windows relies on the child's own
    /// shutdown handling, so we go straight to a forced kill there since
    /// Windows has no portable graceful-signal equivalent for arbitrary
    /// interpreters).
    pub async fn terminate(&mut self) {
        #[cfg(unix)]
        {
            unsafe {
                libc::kill(-self.pgid, libc::SIGTERM);
            }
        }
        #[cfg(windows)]
        {
            self.kill_tree_windows().await;
        }
    }

    /// Force-kill the whole subtree. Always succeeds on a best-effort
    /// basis; errors are swallowed since this runs on cleanup paths where
    /// there is no one left to report to.
    pub async fn kill(&mut self) {
        #[cfg(unix)]
        {
            unsafe {
                libc::kill(-self.pgid, libc::SIGKILL);
            }
        }
        #[cfg(windows)]
        {
            self.kill_tree_windows().await;
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }

    #[cfg(windows)]
    async fn kill_tree_windows(&self) {
        if let Some(pid) = self.child.id() {
            let _ = Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }
    }
}

/// Spawn `program args` in `cwd` with `env`, in its own process group on
/// Unix. On Windows, commands whose target file has an extension of
/// `.cmd`/`.bat`/`.ps1` (or no extension) are wrapped in `cmd.exe /d /s /c`
/// since Windows will not directly execute those without a shell.
pub fn spawn_grouped(
    program: &Path,
    args: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
) -> Result<GroupedChild, AutomnError> {
    let mut command = build_command(program, args);
    command
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(env);

    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let child = command.spawn().map_err(|err| {
        AutomnError::new(ErrorCode::SpawnFailed, err.to_string())
            .with_context("program", program.to_string_lossy().into_owned())
    })?;

    #[cfg(unix)]
    let pgid = child.id().map(|pid| pid as i32).unwrap_or(0);

    Ok(GroupedChild {
        child,
        #[cfg(unix)]
        pgid,
    })
}

#[cfg(windows)]
fn needs_shell_wrapper(program: &Path) -> bool {
    match program.extension().and_then(|e| e.to_str()) {
        None => true,
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            ext == "cmd" || ext == "bat" || ext == "ps1"
        }
    }
}

#[cfg(windows)]
fn build_command(program: &Path, args: &[String]) -> Command {
    if needs_shell_wrapper(program) {
        let mut line = format!("\"{}\"", program.to_string_lossy());
        for arg in args {
            line.push_str(" \"");
            line.push_str(&arg.replace('"', "\"\""));
            line.push('"');
        }
        let mut command = Command::new("cmd.exe");
        command.args(["/d", "/s", "/c", &line]);
        command
    } else {
        let mut command = Command::new(program);
        command.args(args);
        command
    }
}

#[cfg(unix)]
fn build_command(program: &Path, args: &[String]) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn spawn_grouped_runs_and_can_be_killed() {
        let program = which::which("sh").or_else(|_| which::which("bash")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut grouped = spawn_grouped(
            &program,
            &["-c".into(), "sleep 5".into()],
            dir.path(),
            &HashMap::new(),
        )
        .unwrap();
        grouped.kill().await;
        let status = grouped.child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[cfg(windows)]
    #[test]
    fn ps1_files_require_shell_wrapper() {
        assert!(needs_shell_wrapper(Path::new("C:\\scripts\\h.ps1")));
        assert!(needs_shell_wrapper(Path::new("C:\\scripts\\h")));
        assert!(!needs_shell_wrapper(Path::new("C:\\scripts\\h.exe")));
    }
}
