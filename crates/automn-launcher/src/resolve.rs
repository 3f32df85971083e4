// SPDX-License-Identifier: MIT OR Apache-2.0
use automn_core::{Language, RuntimeExecutables};
use automn_error::{AutomnError, ErrorCode};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Resolves and caches the executable path for each language, per the
/// per-language resolution order in the component design. Explicit paths
/// (from configuration or the `/ui/runtime-executables` form) always win;
/// cache entries are invalidated on an explicit update.
pub struct InterpreterResolver {
    explicit: Mutex<RuntimeExecutables>,
    cache: Mutex<HashMap<Language, PathBuf>>,
}

impl InterpreterResolver {
    pub fn new(explicit: RuntimeExecutables) -> Self {
        Self {
            explicit: Mutex::new(explicit),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Invalidate the cache entry for `language` — called whenever the
    /// explicit runtime-executable path for it changes.
    pub async fn invalidate(&self, language: Language) {
        self.cache.lock().await.remove(&language);
    }

    /// Replace the explicit runtime-executable paths (e.g. from the
    /// `/ui/runtime-executables` form) and drop any cached resolution so the
    /// next `resolve` call picks the new paths up immediately.
    pub async fn set_explicit(&self, explicit: RuntimeExecutables) {
        *self.explicit.lock().await = explicit;
        self.cache.lock().await.clear();
    }

    pub async fn resolve(&self, language: Language) -> Result<PathBuf, AutomnError> {
        if let Some(cached) = self.cache.lock().await.get(&language) {
            return Ok(cached.clone());
        }
        let resolved = self.resolve_uncached(language).await?;
        self.cache
            .lock()
            .await
            .insert(language, resolved.clone());
        Ok(resolved)
    }

    async fn resolve_uncached(&self, language: Language) -> Result<PathBuf, AutomnError> {
        if let Some(explicit) = self.explicit_path(language).await {
            return Ok(PathBuf::from(explicit));
        }
        match language {
            Language::Node => resolve_node().await,
            Language::Python => resolve_python().await,
            Language::Powershell => resolve_powershell().await,
            Language::Shell => resolve_shell().await,
        }
    }

    async fn explicit_path(&self, language: Language) -> Option<String> {
        let explicit = self.explicit.lock().await;
        match language {
            Language::Node => explicit.node.clone(),
            Language::Python => explicit.python.clone(),
            Language::Powershell => explicit.powershell.clone(),
            Language::Shell => explicit.shell.clone(),
        }
    }
}

fn not_found(language: Language) -> AutomnError {
    AutomnError::new(ErrorCode::SpawnFailed, format!("no {language} interpreter found on PATH"))
        .with_context("language", language.as_str())
}

async fn resolve_node() -> Result<PathBuf, AutomnError> {
    which::which("node").map_err(|_| not_found(Language::Node))
}

async fn responds_to_version(candidate: &str) -> bool {
    Command::new(candidate)
        .arg("--version")
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

async fn resolve_python() -> Result<PathBuf, AutomnError> {
    for candidate in ["python3", "python"] {
        if let Ok(path) = which::which(candidate) {
            if responds_to_version(candidate).await {
                return Ok(path);
            }
        }
    }
    if cfg!(windows) {
        for candidate in ["py", "py -3"] {
            let program = candidate.split_whitespace().next().unwrap();
            if let Ok(path) = which::which(program) {
                return Ok(path);
            }
        }
    }
    Err(not_found(Language::Python))
}

async fn resolve_powershell() -> Result<PathBuf, AutomnError> {
    if let Ok(path) = which::which("pwsh") {
        return Ok(path);
    }
    if cfg!(windows) {
        for candidate in windows_powershell_candidates() {
            let path = PathBuf::from(&candidate);
            if path.exists() {
                return Ok(path);
            }
        }
        if let Ok(path) = which::which("powershell.exe") {
            return Ok(path);
        }
    }
    Err(not_found(Language::Powershell))
}

fn windows_powershell_candidates() -> Vec<String> {
    let system_root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
    let program_files =
        std::env::var("ProgramFiles").unwrap_or_else(|_| r"C:\Program Files".to_string());
    vec![
        format!(r"{system_root}\System32\WindowsPowerShell\v1.0\powershell.exe"),
        format!(r"{system_root}\Sysnative\WindowsPowerShell\v1.0\powershell.exe"),
        format!(r"{program_files}\PowerShell\7\pwsh.exe"),
        format!(r"{program_files}\PowerShell\7-preview\pwsh.exe"),
    ]
}

async fn resolve_shell() -> Result<PathBuf, AutomnError> {
    for candidate in ["bash", "sh"] {
        if let Ok(path) = which::which(candidate) {
            return Ok(path);
        }
    }
    if cfg!(windows) {
        if let Ok(path) = which::which("cmd.exe") {
            return Ok(path);
        }
    }
    Err(not_found(Language::Shell))
}

/// Build the interpreter's launch arguments for the harness file at `path`.
pub fn launch_args(language: Language, harness_path: &std::path::Path) -> Vec<String> {
    let path = harness_path.to_string_lossy().into_owned();
    match language {
        Language::Node => vec![path],
        Language::Python => vec![path],
        Language::Powershell => vec![
            "-NoLogo".into(),
            "-NoProfile".into(),
            "-NonInteractive".into(),
            "-ExecutionPolicy".into(),
            "Bypass".into(),
            "-File".into(),
            path,
        ],
        Language::Shell => vec![path],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn powershell_launch_args_match_spec() {
        let args = launch_args(Language::Powershell, std::path::Path::new("/tmp/h.ps1"));
        assert_eq!(
            args,
            vec!["-NoLogo", "-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-File", "/tmp/h.ps1"]
        );
    }

    #[tokio::test]
    async fn explicit_path_short_circuits_resolution() {
        let resolver = InterpreterResolver::new(RuntimeExecutables {
            node: Some("/opt/custom/node".into()),
            ..Default::default()
        });
        let path = resolver.resolve(Language::Node).await.unwrap();
        assert_eq!(path, PathBuf::from("/opt/custom/node"));
    }

    #[tokio::test]
    async fn invalidate_clears_cached_entry() {
        let resolver = InterpreterResolver::new(RuntimeExecutables {
            node: Some("/opt/custom/node".into()),
            ..Default::default()
        });
        resolver.resolve(Language::Node).await.unwrap();
        resolver.invalidate(Language::Node).await;
        assert!(resolver.cache.lock().await.get(&Language::Node).is_none());
    }

    #[tokio::test]
    async fn set_explicit_takes_effect_without_manual_invalidation() {
        let resolver = InterpreterResolver::new(RuntimeExecutables {
            node: Some("/opt/custom/node".into()),
            ..Default::default()
        });
        assert_eq!(resolver.resolve(Language::Node).await.unwrap(), PathBuf::from("/opt/custom/node"));
        resolver
            .set_explicit(RuntimeExecutables {
                node: Some("/opt/other/node".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(resolver.resolve(Language::Node).await.unwrap(), PathBuf::from("/opt/other/node"));
    }
}
