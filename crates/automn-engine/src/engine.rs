// SPDX-License-Identifier: MIT OR Apache-2.0
use crate::package_manager::PackageManager;
use automn_core::marker::MARKER_RETURN;
use automn_core::{Language, RunResult, ScriptDescriptor};
use automn_error::ErrorCode;
use automn_launcher::{launch_args, spawn_grouped, GroupedChild, InterpreterResolver};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex};

/// 300ms after the return marker is first seen, send a graceful terminate.
const RETURN_MARKER_GRACE: Duration = Duration::from_millis(300);
/// A further 1000ms after that, force-kill if the child is still alive.
const RETURN_MARKER_FORCE: Duration = Duration::from_millis(1_000);

const INPUT_JSON_ENV_ALIASES: [&str; 3] = [
    "AUTOMN_INTERNAL_INPUT_JSON",
    "AUTOMN_INPUT_JSON",
    "INPUT_JSON",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Callback invoked once per decoded output chunk, mirroring `onLog` in the
/// component design. Boxed so `automn-runner` can close over a response
/// writer without the engine knowing anything about HTTP.
pub type OnLog = Arc<dyn Fn(LogStream, &str) + Send + Sync>;

/// Orchestrates a single script run: working-directory selection, harness
/// generation, spawning, output pumping, and the final parse pass. Never
/// returns an error; every failure mode is folded into the returned
/// [`RunResult`].
pub struct ExecutionEngine {
    resolver: Arc<InterpreterResolver>,
    package_manager: Arc<dyn PackageManager>,
    scripts_dir: PathBuf,
    workdir_dir: PathBuf,
}

impl ExecutionEngine {
    pub fn new(
        resolver: Arc<InterpreterResolver>,
        package_manager: Arc<dyn PackageManager>,
        scripts_dir: PathBuf,
        workdir_dir: PathBuf,
    ) -> Self {
        Self {
            resolver,
            package_manager,
            scripts_dir,
            workdir_dir,
        }
    }

    /// The interpreter resolver backing this engine, exposed so the HTTP
    /// layer can push explicit runtime-executable updates and cache
    /// invalidations into it.
    pub fn resolver(&self) -> &Arc<InterpreterResolver> {
        &self.resolver
    }

    pub async fn execute_script(
        &self,
        script: ScriptDescriptor,
        run_id: String,
        req_body: Value,
        on_log: OnLog,
    ) -> RunResult {
        let input = req_body.clone();

        let language = match script.language.as_deref().map(Language::parse) {
            Some(Ok(language)) => language,
            _ => {
                let mut result = RunResult::failure(run_id, 1, "Unsupported language", input);
                result.error_code = Some(ErrorCode::ValidationUnsupportedLanguage.as_str().into());
                return result;
            }
        };
        let code = match script.code.as_deref() {
            Some(code) if !code.is_empty() => code,
            _ => {
                let mut result = RunResult::failure(run_id, 1, "Invalid script payload", input);
                result.error_code = Some(ErrorCode::ValidationInvalidPayload.as_str().into());
                return result;
            }
        };

        let workdir = match self.prepare_workdir(language, &script).await {
            Ok(workdir) => workdir,
            Err(mut result) => {
                result.run_id = run_id;
                result.input = input;
                return result;
            }
        };

        let extension = extension_for(language, code);
        let harness_path = workdir.join(format!("automn-{run_id}.{extension}"));
        let harness_source = automn_harness::build_harness(language, &run_id, code);
        if let Err(err) = tokio::fs::write(&harness_path, harness_source).await {
            return RunResult::failure(run_id, 1, format!("failed to write harness file: {err}"), input);
        }

        let result = self
            .run_harness(language, &script, &run_id, &req_body, &workdir, &harness_path, on_log)
            .await;

        let _ = tokio::fs::remove_file(&harness_path).await;

        let mut result = result;
        result.input = input;
        result
    }

    /// Step 3: resolve (and for node, prepare) the working directory.
    /// Returns `Err(RunResult)` pre-populated for the `NODE_DEPENDENCY_INSTALL_FAILED`
    /// short-circuit; `run_id`/`input` are filled in by the caller.
    async fn prepare_workdir(
        &self,
        language: Language,
        script: &ScriptDescriptor,
    ) -> Result<PathBuf, RunResult> {
        if language != Language::Node {
            return Ok(self.workdir_dir.clone());
        }
        let workdir = self.scripts_dir.join(script.sanitized_id());
        if let Err(err) = tokio::fs::create_dir_all(&workdir).await {
            return Err(RunResult::failure(
                String::new(),
                1,
                format!("failed to create working directory: {err}"),
                Value::Null,
            ));
        }
        if let Err(err) = self
            .package_manager
            .ensure_dependencies(&script.sanitized_id(), &workdir)
            .await
        {
            tracing::error!(script_id = %script.id, error = %err, "node dependency install failed");
            let mut result = RunResult::failure(String::new(), 90, String::new(), Value::Null);
            result.error_code = Some(ErrorCode::NodeDependencyInstallFailed.as_str().into());
            result.client_message = Some("Try again later".into());
            return Err(result);
        }
        Ok(workdir)
    }

    async fn run_harness(
        &self,
        language: Language,
        script: &ScriptDescriptor,
        run_id: &str,
        req_body: &Value,
        workdir: &Path,
        harness_path: &Path,
        on_log: OnLog,
    ) -> RunResult {
        let program = match self.resolver.resolve(language).await {
            Ok(program) => program,
            Err(err) => return RunResult::failure(run_id, 1, err.to_string(), Value::Null),
        };
        let args = launch_args(language, harness_path);
        let env = build_environment(script, run_id, req_body);

        let started = Instant::now();
        let grouped = match spawn_grouped(&program, &args, workdir, &env) {
            Ok(grouped) => grouped,
            Err(err) => return RunResult::failure(run_id, 1, err.to_string(), Value::Null),
        };

        let outcome = pump_and_wait(grouped, language, script.timeout, on_log).await;
        let duration = started.elapsed().as_millis() as u64;

        let parsed = automn_parser::parse_output(&outcome.stdout, &outcome.stderr);
        RunResult {
            run_id: run_id.to_string(),
            stdout: parsed.stdout,
            stderr: parsed.stderr,
            code: outcome.code,
            duration,
            return_data: parsed.return_data,
            automn_logs: parsed.logs,
            automn_notifications: parsed.notifications,
            input: Value::Null,
            error_code: None,
            client_message: None,
        }
    }
}

struct PumpOutcome {
    stdout: String,
    stderr: String,
    code: i32,
}

/// Steps 7-11: spawn handlers, concurrent output pumping, return-marker
/// cancellation, wall-clock timeout, and exit-driven teardown.
async fn pump_and_wait(
    mut grouped: GroupedChild,
    language: Language,
    timeout_secs: u64,
    on_log: OnLog,
) -> PumpOutcome {
    let classify_eligible = language == Language::Powershell;
    let mut stdout_pipe = grouped.child.stdout.take();
    let mut stderr_pipe = grouped.child.stderr.take();

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let stdout_buffer = Arc::new(Mutex::new(String::new()));
    let stderr_buffer = Arc::new(Mutex::new(String::new()));
    let return_marker_seen = Arc::new(AtomicBool::new(false));

    let stdout_task = {
        let buffer = stdout_buffer.clone();
        let on_log = on_log.clone();
        let tx = tx.clone();
        let return_marker_seen = return_marker_seen.clone();
        tokio::spawn(async move {
            let mut decoder = automn_decoder::StreamDecoder::new(classify_eligible);
            let mut chunk = [0u8; 8192];
            if let Some(mut pipe) = stdout_pipe.take() {
                loop {
                    let read = match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    let text = decoder.write(&chunk[..read]);
                    if !text.is_empty() {
                        on_log(LogStream::Stdout, &text);
                        let mut buffer = buffer.lock().await;
                        buffer.push_str(&text);
                        if !return_marker_seen.load(Ordering::SeqCst) && buffer.contains(MARKER_RETURN) {
                            return_marker_seen.store(true, Ordering::SeqCst);
                            let _ = tx.send(());
                        }
                    }
                }
            }
            let tail = decoder.flush();
            if !tail.is_empty() {
                on_log(LogStream::Stdout, &tail);
                let mut buffer = buffer.lock().await;
                buffer.push_str(&tail);
            }
        })
    };

    let stderr_task = {
        let buffer = stderr_buffer.clone();
        let on_log = on_log.clone();
        tokio::spawn(async move {
            let mut decoder = automn_decoder::StreamDecoder::new(classify_eligible);
            let mut chunk = [0u8; 8192];
            if let Some(mut pipe) = stderr_pipe.take() {
                loop {
                    let read = match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    let text = decoder.write(&chunk[..read]);
                    if !text.is_empty() {
                        on_log(LogStream::Stderr, &text);
                        buffer.lock().await.push_str(&text);
                    }
                }
            }
            let tail = decoder.flush();
            if !tail.is_empty() {
                on_log(LogStream::Stderr, &tail);
                buffer.lock().await.push_str(&tail);
            }
        })
    };
    drop(tx);

    let mut timeout_hit = false;
    let deadline = tokio::time::Instant::now() + timeout_duration(timeout_secs);
    let exit_status;
    loop {
        tokio::select! {
            biased;

            status = grouped.child.wait() => {
                exit_status = status;
                break;
            }

            Some(()) = rx.recv() => {
                tokio::time::sleep(RETURN_MARKER_GRACE).await;
                if grouped.child.try_wait().ok().flatten().is_some() {
                    continue;
                }
                grouped.terminate().await;
                tokio::time::sleep(RETURN_MARKER_FORCE).await;
                if grouped.child.try_wait().ok().flatten().is_none() {
                    grouped.kill().await;
                }
            }

            _ = tokio::time::sleep_until(deadline), if timeout_secs > 0 && !timeout_hit => {
                timeout_hit = true;
                stderr_buffer.lock().await.push_str("\nTimeout exceeded.");
                grouped.terminate().await;
            }
        }
    }

    let _ = stdout_task.await;
    let _ = stderr_task.await;

    let code = match exit_status {
        Ok(status) => status.code().unwrap_or(1),
        Err(_) => 1,
    };

    PumpOutcome {
        stdout: Arc::try_unwrap(stdout_buffer)
            .map(|m| m.into_inner())
            .unwrap_or_default(),
        stderr: Arc::try_unwrap(stderr_buffer)
            .map(|m| m.into_inner())
            .unwrap_or_default(),
        code,
    }
}

fn timeout_duration(timeout_secs: u64) -> Duration {
    if timeout_secs == 0 {
        Duration::from_secs(u64::MAX / 2)
    } else {
        Duration::from_secs(timeout_secs)
    }
}

fn extension_for(language: Language, code: &str) -> &'static str {
    match language {
        Language::Node => {
            if uses_esm_syntax(code) {
                "mjs"
            } else {
                "cjs"
            }
        }
        Language::Python => "py",
        Language::Powershell => "ps1",
        Language::Shell => "sh",
    }
}

fn uses_esm_syntax(code: &str) -> bool {
    code.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("import ") || trimmed.starts_with("export ") || trimmed.starts_with("export{")
            || trimmed.starts_with("import{")
    })
}

fn build_environment(
    script: &ScriptDescriptor,
    run_id: &str,
    req_body: &Value,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for variable in &script.variables {
        let value = match &variable.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        env.insert(variable.env_name.clone(), value);
    }
    env.insert("AUTOMN_RUN_ID".into(), run_id.to_string());
    let input_json = req_body.to_string();
    for alias in INPUT_JSON_ENV_ALIASES {
        env.insert(alias.to_string(), input_json.clone());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_manager::NoopPackageManager;
    use automn_core::EnvVariable;
    use serde_json::{json, Map};

    fn descriptor(language: &str, code: &str) -> ScriptDescriptor {
        ScriptDescriptor {
            id: "demo-script".into(),
            name: None,
            preassigned_run_id: None,
            language: Some(language.into()),
            code: Some(code.into()),
            timeout: 5,
            variables: vec![EnvVariable {
                env_name: "GREETING".into(),
                value: json!("hello"),
            }],
            extra: Map::new(),
        }
    }

    fn noop_engine(workdir: &Path) -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(InterpreterResolver::new(Default::default())),
            Arc::new(NoopPackageManager),
            workdir.join("scripts"),
            workdir.join("workdir"),
        )
    }

    #[tokio::test]
    async fn missing_language_is_a_validation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = noop_engine(dir.path());
        let mut script = descriptor("node", "1 + 1");
        script.language = None;
        let result = engine
            .execute_script(script, "r1".into(), json!({}), Arc::new(|_, _| {}))
            .await;
        assert_eq!(result.code, 1);
        assert_eq!(result.stderr, "Unsupported language");
        assert_eq!(result.error_code.as_deref(), Some("VALIDATION_UNSUPPORTED_LANGUAGE"));
    }

    #[tokio::test]
    async fn missing_code_is_a_validation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = noop_engine(dir.path());
        let mut script = descriptor("node", "1 + 1");
        script.code = None;
        let result = engine
            .execute_script(script, "r1".into(), json!({}), Arc::new(|_, _| {}))
            .await;
        assert_eq!(result.stderr, "Invalid script payload");
        assert_eq!(result.error_code.as_deref(), Some("VALIDATION_INVALID_PAYLOAD"));
    }

    #[test]
    fn node_extension_depends_on_module_syntax() {
        assert_eq!(extension_for(Language::Node, "import fs from 'fs'"), "mjs");
        assert_eq!(extension_for(Language::Node, "const fs = require('fs')"), "cjs");
    }

    #[test]
    fn environment_carries_run_id_and_input_aliases() {
        let script = descriptor("node", "code");
        let env = build_environment(&script, "run-123", &json!({"a": 1}));
        assert_eq!(env.get("AUTOMN_RUN_ID").unwrap(), "run-123");
        assert_eq!(env.get("GREETING").unwrap(), "hello");
        for alias in INPUT_JSON_ENV_ALIASES {
            assert_eq!(env.get(alias).unwrap(), "{\"a\":1}");
        }
    }

    #[tokio::test]
    async fn shell_script_return_marker_populates_result() {
        let program = which::which("sh");
        if program.is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let engine = noop_engine(dir.path());
        let script = descriptor("shell", r#"echo '__SCRIPTRETURN__{"ok":true}'"#);
        let result = engine
            .execute_script(script, "r2".into(), json!({}), Arc::new(|_, _| {}))
            .await;
        assert_eq!(result.code, 0);
        assert_eq!(result.return_data, json!({"ok": true}));
    }
}
