// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Node dependency-install collaborator used by the execution engine's
//! working-directory step. Kept behind a trait so `execute_script` can be
//! tested without ever shelling out to `npm`; production wiring uses
//! [`FilesystemPackageManager`].

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Outcome of an `ensureDependencies` call.
#[derive(Debug, Clone)]
pub struct DependencyInstallError {
    pub message: String,
}

impl std::fmt::Display for DependencyInstallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DependencyInstallError {}

/// Per-package install/availability state, as reported by
/// `POST /api/packages/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    pub name: String,
    pub installed: bool,
}

/// A coarse summary of the shared package cache, as reported to the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageCacheSummary {
    pub directories: usize,
    pub total_bytes: u64,
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Ensure `script_id`'s working directory has its npm dependencies
    /// installed before the harness is spawned. Only ever called for the
    /// `node` language.
    async fn ensure_dependencies(
        &self,
        script_id: &str,
        workdir: &Path,
    ) -> Result<(), DependencyInstallError>;

    /// Check which of `packages` are present, optionally installing the
    /// missing ones when `install_missing` is set.
    async fn check_status(
        &self,
        packages: &[String],
        workdir: &Path,
        install_missing: bool,
    ) -> Result<Vec<PackageStatus>, DependencyInstallError>;

    /// Delete the shared install cache.
    async fn clear_cache(&self) -> Result<(), DependencyInstallError>;

    async fn cache_summary(&self) -> PackageCacheSummary;
}

/// Installs via `npm install` inside each script's working directory,
/// skipping the install when a `node_modules` directory already exists.
/// Guards each directory with its own lock so concurrent runs of the same
/// script never race two `npm install` invocations against one directory.
pub struct FilesystemPackageManager {
    npm_executable: String,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FilesystemPackageManager {
    pub fn new(npm_executable: impl Into<String>) -> Self {
        Self {
            npm_executable: npm_executable.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for FilesystemPackageManager {
    fn default() -> Self {
        Self::new("npm")
    }
}

#[async_trait]
impl PackageManager for FilesystemPackageManager {
    async fn ensure_dependencies(
        &self,
        script_id: &str,
        workdir: &Path,
    ) -> Result<(), DependencyInstallError> {
        if !workdir.join("package.json").exists() {
            return Ok(());
        }
        let lock = self.lock_for(script_id).await;
        let _guard = lock.lock().await;
        if workdir.join("node_modules").exists() {
            return Ok(());
        }
        let output = Command::new(&self.npm_executable)
            .arg("install")
            .current_dir(workdir)
            .output()
            .await
            .map_err(|err| DependencyInstallError {
                message: format!("failed to spawn npm install: {err}"),
            })?;
        if !output.status.success() {
            return Err(DependencyInstallError {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    async fn check_status(
        &self,
        packages: &[String],
        workdir: &Path,
        install_missing: bool,
    ) -> Result<Vec<PackageStatus>, DependencyInstallError> {
        let mut statuses = Vec::with_capacity(packages.len());
        let mut missing = Vec::new();
        for name in packages {
            let installed = workdir.join("node_modules").join(name).exists();
            if !installed {
                missing.push(name.clone());
            }
            statuses.push(PackageStatus {
                name: name.clone(),
                installed,
            });
        }
        if install_missing && !missing.is_empty() {
            let output = Command::new(&self.npm_executable)
                .arg("install")
                .args(&missing)
                .current_dir(workdir)
                .output()
                .await
                .map_err(|err| DependencyInstallError {
                    message: format!("failed to spawn npm install: {err}"),
                })?;
            if output.status.success() {
                for status in &mut statuses {
                    if missing.contains(&status.name) {
                        status.installed = true;
                    }
                }
            }
        }
        Ok(statuses)
    }

    async fn clear_cache(&self) -> Result<(), DependencyInstallError> {
        let output = Command::new(&self.npm_executable)
            .args(["cache", "clean", "--force"])
            .output()
            .await
            .map_err(|err| DependencyInstallError {
                message: format!("failed to spawn npm cache clean: {err}"),
            })?;
        if !output.status.success() {
            return Err(DependencyInstallError {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    async fn cache_summary(&self) -> PackageCacheSummary {
        PackageCacheSummary {
            directories: 0,
            total_bytes: 0,
        }
    }
}

/// Always-succeeds implementation used by execution-engine tests so they
/// never touch the network or a real `npm` binary.
#[derive(Default)]
pub struct NoopPackageManager;

#[async_trait]
impl PackageManager for NoopPackageManager {
    async fn ensure_dependencies(
        &self,
        _script_id: &str,
        _workdir: &Path,
    ) -> Result<(), DependencyInstallError> {
        Ok(())
    }

    async fn check_status(
        &self,
        packages: &[String],
        _workdir: &Path,
        _install_missing: bool,
    ) -> Result<Vec<PackageStatus>, DependencyInstallError> {
        Ok(packages
            .iter()
            .map(|name| PackageStatus {
                name: name.clone(),
                installed: true,
            })
            .collect())
    }

    async fn clear_cache(&self) -> Result<(), DependencyInstallError> {
        Ok(())
    }

    async fn cache_summary(&self) -> PackageCacheSummary {
        PackageCacheSummary {
            directories: 0,
            total_bytes: 0,
        }
    }
}

