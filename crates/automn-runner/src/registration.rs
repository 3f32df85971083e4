// SPDX-License-Identifier: MIT OR Apache-2.0
//! The runner's registration state machine: `uninitialized` ->
//! `secret-stored` -> `registered`/`locked`, persisted atomically, and
//! driven by both a startup retry loop and a periodic heartbeat.

use crate::versioning::below_minimum;
use automn_config::RunnerConfig;
use automn_core::{RegistrationRequest, RegistrationResponse, RegistrationStatus, RunnerLocalState, SecretSource};
use chrono::Utc;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const RUNNER_VERSION: &str = env!("CARGO_PKG_VERSION");
const MINIMUM_HOST_VERSION: &str = "1.0";

/// Exponential backoff schedule for the startup retry loop, in
/// milliseconds: 1s, 2s, 4s, 8s, capped at 30s thereafter.
const STARTUP_BACKOFF_MS: [u64; 5] = [1_000, 2_000, 4_000, 8_000, 30_000];

pub struct RegistrationManager {
    state: RwLock<RunnerLocalState>,
    state_file: PathBuf,
    config: RunnerConfig,
    http: reqwest::Client,
    started_at: Instant,
}

impl RegistrationManager {
    pub async fn load(config: RunnerConfig) -> Self {
        let mut state = match tokio::fs::read(&config.state_file).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => RunnerLocalState::default(),
        };
        if let Some(secret) = &config.secret {
            state.secret = Some(secret.clone());
            state.secret_source = Some(if config.secret_from_env {
                SecretSource::Env
            } else {
                SecretSource::Stored
            });
        }
        Self {
            state: RwLock::new(state),
            state_file: config.state_file.clone(),
            config,
            http: reqwest::Client::new(),
            started_at: Instant::now(),
        }
    }

    pub async fn snapshot(&self) -> RunnerLocalState {
        self.state.read().await.clone()
    }

    async fn persist(&self) {
        let for_disk = self.state.read().await.for_disk();
        let Ok(json) = serde_json::to_vec_pretty(&for_disk) else {
            return;
        };
        if let Some(parent) = self.state_file.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let tmp_path = self.state_file.with_extension("tmp");
        if tokio::fs::write(&tmp_path, json).await.is_ok() {
            let _ = tokio::fs::rename(&tmp_path, &self.state_file).await;
        }
    }

    /// Stores a new secret. Illegal while the secret is environment-managed.
    /// Clears prior registration outcomes but, per the locking rule, leaves
    /// `lockedAt` untouched once it has ever been set.
    pub async fn set_secret(&self, secret: String) -> Result<(), String> {
        if secret.len() < 12 {
            return Err("secret must be at least 12 characters".into());
        }
        {
            let mut state = self.state.write().await;
            if state.secret_source == Some(SecretSource::Env) {
                return Err("secret is environment-managed".into());
            }
            state.secret = Some(secret);
            state.secret_source = Some(SecretSource::Stored);
            state.registered_at = None;
            state.last_registration_attempt = None;
            state.last_registration_status = None;
            state.last_registration_error = None;
            state.last_registration_response = None;
        }
        self.persist().await;
        Ok(())
    }

    /// Merges non-empty fields from `update` into the persisted explicit
    /// runtime-executable paths (an empty string clears that field) and
    /// returns the resulting set. Illegal while locked; callers must check
    /// `is_locked()` before calling this.
    pub async fn set_runtime_executables(
        &self,
        update: automn_core::RuntimeExecutables,
    ) -> automn_core::RuntimeExecutables {
        let merged = {
            let mut state = self.state.write().await;
            if let Some(node) = update.node {
                state.runtime_executables.node = if node.is_empty() { None } else { Some(node) };
            }
            if let Some(python) = update.python {
                state.runtime_executables.python = if python.is_empty() { None } else { Some(python) };
            }
            if let Some(powershell) = update.powershell {
                state.runtime_executables.powershell = if powershell.is_empty() { None } else { Some(powershell) };
            }
            state.runtime_executables.clone()
        };
        self.persist().await;
        merged
    }

    /// `POST /internal/reset`. With `secret`, rotates and immediately
    /// re-registers. Without, returns fully to `uninitialized`.
    pub async fn reset(&self, secret: Option<String>) -> Result<(), String> {
        match secret {
            Some(secret) => {
                self.set_secret(secret).await?;
                self.register_once(false).await;
                Ok(())
            }
            None => {
                {
                    let mut state = self.state.write().await;
                    *state = RunnerLocalState::default();
                }
                self.persist().await;
                Ok(())
            }
        }
    }

    fn build_request(&self, state: &RunnerLocalState, heartbeat: bool) -> Option<RegistrationRequest> {
        let secret = state.secret.clone()?;
        let endpoint = self.config.effective_endpoint().or_else(|| state.endpoint_url.clone())?;
        let mut status_message = self.config.status_message.clone();
        if heartbeat {
            status_message.push_str(" (heartbeat)");
        }
        let mut runtimes = std::collections::BTreeMap::new();
        if let Some(node) = &state.runtime_executables.node {
            runtimes.insert("node".to_string(), node.clone());
        }
        if let Some(python) = &state.runtime_executables.python {
            runtimes.insert("python".to_string(), python.clone());
        }
        if let Some(powershell) = &state.runtime_executables.powershell {
            runtimes.insert("powershell".to_string(), powershell.clone());
        }
        Some(RegistrationRequest {
            secret,
            endpoint,
            status_message,
            max_concurrency: self.config.max_concurrency,
            timeout_ms: self.config.timeout_ms,
            version: RUNNER_VERSION.to_string(),
            minimum_host_version: MINIMUM_HOST_VERSION.to_string(),
            os: std::env::consts::OS.to_string(),
            platform: std::env::consts::FAMILY.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            uptime: self.started_at.elapsed().as_secs(),
            runtimes,
        })
    }

    /// Performs one registration attempt and updates local state with the
    /// outcome. Never panics or propagates a transport error to the caller;
    /// heartbeat failures must never be fatal.
    pub async fn register_once(&self, heartbeat: bool) {
        let (host_url, runner_id, request) = {
            let state = self.state.read().await;
            let host_url = self.config.host_url.clone().or_else(|| state.host_url.clone());
            let runner_id = self.config.runner_id.clone().or_else(|| state.runner_id.clone());
            (host_url, runner_id, self.build_request(&state, heartbeat))
        };

        {
            let mut state = self.state.write().await;
            state.last_registration_attempt = Some(Utc::now());
        }

        let (Some(host_url), Some(runner_id), Some(request)) = (host_url, runner_id, request) else {
            self.record_error(RegistrationStatus::Error, "missing host URL, runner id, or secret".into())
                .await;
            return;
        };

        let url = format!(
            "{}/api/settings/runner-hosts/{}/register",
            host_url.trim_end_matches('/'),
            runner_id
        );

        match self.http.post(&url).json(&request).send().await {
            Ok(response) if response.status().is_success() => {
                let body: RegistrationResponse = response.json().await.unwrap_or_default();
                if below_minimum(body.host_version.as_deref(), Some(MINIMUM_HOST_VERSION)) {
                    tracing::warn!(host_version = ?body.host_version, "host below minimum host version");
                }
                if below_minimum(Some(RUNNER_VERSION), body.minimum_runner_version.as_deref()) {
                    tracing::warn!(
                        minimum_runner_version = ?body.minimum_runner_version,
                        "this runner is below the host's minimum runner version"
                    );
                }
                let mut state = self.state.write().await;
                let now = Utc::now();
                state.registered_at = Some(now);
                if state.locked_at.is_none() {
                    state.locked_at = Some(now);
                }
                state.last_registration_status = Some(RegistrationStatus::Ok);
                state.last_registration_error = None;
                state.last_registration_response = serde_json::to_value(&body).ok();
                drop(state);
                self.persist().await;
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let mut message = body;
                if status.as_u16() == 404 {
                    message.push_str(&format!(
                        " (runner id {runner_id} not found at host {host_url} — check configuration)"
                    ));
                }
                self.record_error(RegistrationStatus::Error, message).await;
            }
            Err(err) => {
                self.record_error(RegistrationStatus::NetworkError, err.to_string()).await;
            }
        }
    }

    async fn record_error(&self, status: RegistrationStatus, message: String) {
        {
            let mut state = self.state.write().await;
            state.last_registration_status = Some(status);
            state.last_registration_error = Some(message);
        }
        self.persist().await;
    }

    /// Retries registration with capped exponential backoff until it
    /// succeeds, mirroring the host-agent retry pattern. Runs once at
    /// startup before the periodic heartbeat task takes over.
    pub async fn register_with_retry(&self) {
        loop {
            self.register_once(false).await;
            if matches!(
                self.state.read().await.last_registration_status,
                Some(RegistrationStatus::Ok)
            ) {
                return;
            }
            for delay_ms in STARTUP_BACKOFF_MS {
                tracing::warn!(delay_ms, "registration failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                self.register_once(false).await;
                if matches!(
                    self.state.read().await.last_registration_status,
                    Some(RegistrationStatus::Ok)
                ) {
                    return;
                }
            }
        }
    }

    /// The periodic heartbeat task. Disabled entirely when
    /// `heartbeatIntervalMs <= 0`.
    pub async fn run_heartbeat_loop(&self) {
        if self.config.heartbeat_interval_ms <= 0 {
            return;
        }
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms as u64));
        interval.tick().await;
        loop {
            interval.tick().await;
            self.register_once(true).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> RunnerConfig {
        RunnerConfig {
            state_file: dir.join("state.json"),
            runner_id: Some("runner-1".into()),
            host_url: Some("http://127.0.0.1:1".into()),
            ..RunnerConfig::default()
        }
    }

    #[tokio::test]
    async fn set_secret_rejects_short_values() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RegistrationManager::load(config(dir.path())).await;
        assert!(manager.set_secret("short".into()).await.is_err());
    }

    #[tokio::test]
    async fn set_secret_is_illegal_when_env_managed() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.secret = Some("from-env-123456".into());
        cfg.secret_from_env = true;
        let manager = RegistrationManager::load(cfg).await;
        assert!(manager.set_secret("a-new-secret-12345".into()).await.is_err());
    }

    #[tokio::test]
    async fn persisted_state_omits_env_secret() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.secret = Some("from-env-123456".into());
        cfg.secret_from_env = true;
        let manager = RegistrationManager::load(cfg).await;
        manager.persist().await;
        let on_disk: RunnerLocalState =
            serde_json::from_slice(&tokio::fs::read(&manager.state_file).await.unwrap()).unwrap();
        assert!(on_disk.secret.is_none());
    }

    #[tokio::test]
    async fn network_failure_records_network_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.secret = Some("a-stored-secret-123".into());
        let manager = RegistrationManager::load(cfg).await;
        manager.register_once(false).await;
        let state = manager.snapshot().await;
        assert_eq!(state.last_registration_status, Some(RegistrationStatus::NetworkError));
    }
}
