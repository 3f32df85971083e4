// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared application state wired together at startup: the registration
//! manager, the execution engine, and the local concurrency admission
//! counter that bounds `/api/run`.

use crate::registration::RegistrationManager;
use automn_config::RunnerConfig;
use automn_core::RuntimeExecutables;
use automn_engine::{ExecutionEngine, FilesystemPackageManager, PackageManager};
use automn_launcher::InterpreterResolver;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub config: RunnerConfig,
    pub registration: Arc<RegistrationManager>,
    pub engine: Arc<ExecutionEngine>,
    pub package_manager: Arc<dyn PackageManager>,
    active_runs: Arc<AtomicU32>,
    started_at: Instant,
}

impl AppState {
    pub async fn new(config: RunnerConfig) -> Self {
        let registration = Arc::new(RegistrationManager::load(config.clone()).await);
        let explicit = merge_runtime_executables(&config.runtime_executables, &registration.snapshot().await.runtime_executables);
        let resolver = Arc::new(InterpreterResolver::new(explicit));
        let package_manager: Arc<dyn PackageManager> = Arc::new(FilesystemPackageManager::default());
        let engine = Arc::new(ExecutionEngine::new(
            resolver,
            package_manager.clone(),
            config.scripts_dir.clone(),
            config.workdir_dir.clone(),
        ));
        Self {
            config,
            registration,
            engine,
            package_manager,
            active_runs: Arc::new(AtomicU32::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn active_runs(&self) -> u32 {
        self.active_runs.load(Ordering::SeqCst)
    }

    /// Atomically admits a new run if under `localMaxConcurrency`. Returns a
    /// `'static` guard that decrements the counter on drop, so it can be
    /// moved into a spawned task and still cover every `/api/run` exit path
    /// including client disconnect.
    pub fn try_admit(&self) -> Option<RunGuard> {
        loop {
            let current = self.active_runs.load(Ordering::SeqCst);
            if let Some(cap) = self.config.local_max_concurrency {
                if current >= cap {
                    return None;
                }
            }
            if self
                .active_runs
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(RunGuard {
                    active_runs: self.active_runs.clone(),
                });
            }
        }
    }

    /// The effective runtime-executable paths: admin-configured values
    /// overridden per-field by anything the UI has since set.
    pub async fn runtime_executables(&self) -> RuntimeExecutables {
        let stored = self.registration.snapshot().await.runtime_executables;
        merge_runtime_executables(&self.config.runtime_executables, &stored)
    }

    /// Applies a `/ui/runtime-executables` submission: persists it through
    /// the registration manager, then pushes the merged result (and a cache
    /// invalidation) into the live resolver so the next run picks it up.
    pub async fn update_runtime_executables(&self, update: RuntimeExecutables) {
        let merged = self.registration.set_runtime_executables(update).await;
        let resolver = self.engine.resolver();
        resolver.set_explicit(merge_runtime_executables(&self.config.runtime_executables, &merged)).await;
    }
}

/// Admin-configured paths are the baseline; any path the UI has explicitly
/// set (and persisted to local state) takes precedence per field.
fn merge_runtime_executables(config: &RuntimeExecutables, stored: &RuntimeExecutables) -> RuntimeExecutables {
    RuntimeExecutables {
        node: stored.node.clone().or_else(|| config.node.clone()),
        python: stored.python.clone().or_else(|| config.python.clone()),
        powershell: stored.powershell.clone().or_else(|| config.powershell.clone()),
        shell: stored.shell.clone().or_else(|| config.shell.clone()),
    }
}

pub struct RunGuard {
    active_runs: Arc<AtomicU32>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active_runs.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> RunnerConfig {
        RunnerConfig {
            state_file: dir.join("state.json"),
            scripts_dir: dir.join("scripts"),
            workdir_dir: dir.join("workdir"),
            local_max_concurrency: Some(1),
            ..RunnerConfig::default()
        }
    }

    #[tokio::test]
    async fn admission_is_capped_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(config(dir.path())).await;
        let first = state.try_admit();
        assert!(first.is_some());
        assert!(state.try_admit().is_none());
        drop(first);
        assert!(state.try_admit().is_some());
    }

    #[tokio::test]
    async fn runtime_executable_update_is_persisted_and_reflected() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(config(dir.path())).await;
        assert!(state.runtime_executables().await.node.is_none());

        state
            .update_runtime_executables(RuntimeExecutables {
                node: Some("/opt/custom/node".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(state.runtime_executables().await.node.as_deref(), Some("/opt/custom/node"));

        let reloaded = AppState::new(config(dir.path())).await;
        assert_eq!(reloaded.runtime_executables().await.node.as_deref(), Some("/opt/custom/node"));
    }
}
