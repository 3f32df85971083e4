// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host-side registry of runner identities: creation, secret lifecycle, and
//! the health/staleness derivation consumed by runner selection (kept
//! outside this crate, per the dispatch contract).

mod store;

pub use store::{InMemoryRunnerStore, RunnerStore};

use automn_core::{Capabilities, Environment, RunnerIdentity, RunnerStatus, Versions};
use automn_error::{AutomnError, ErrorCode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// `heartbeatWindowMs` defaults to 3x the advertised heartbeat interval.
const HEARTBEAT_WINDOW_MULTIPLIER: i64 = 3;
const SECRET_BYTES: usize = 32;

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn generate_secret() -> String {
    let bytes: [u8; SECRET_BYTES] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn not_found(id: &str) -> AutomnError {
    AutomnError::new(ErrorCode::Internal, format!("no such runner: {id}")).with_context("runnerId", id)
}

/// A [`RunnerIdentity`] plus the health fields derived at read time, exactly
/// as returned by `GET /api/settings/runner-hosts`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSummary {
    #[serde(flatten)]
    pub identity: RunnerIdentity,
    pub is_healthy: bool,
    pub is_stale: bool,
    pub heartbeat_window_ms: i64,
}

/// Fields the runner submits on `.../register`.
#[derive(Debug, Clone)]
pub struct RegistrationUpdate {
    pub endpoint: String,
    pub status_message: String,
    pub capabilities: Capabilities,
    pub versions: Versions,
    pub environment: Environment,
}

pub struct RunnerRegistry {
    store: Arc<dyn RunnerStore>,
    heartbeat_interval_ms: i64,
}

impl RunnerRegistry {
    pub fn new(store: Arc<dyn RunnerStore>, heartbeat_interval_ms: i64) -> Self {
        Self {
            store,
            heartbeat_interval_ms,
        }
    }

    fn heartbeat_window_ms(&self) -> i64 {
        self.heartbeat_interval_ms.max(1) * HEARTBEAT_WINDOW_MULTIPLIER
    }

    fn summarize(&self, identity: RunnerIdentity, now: DateTime<Utc>) -> RunnerSummary {
        let window = self.heartbeat_window_ms();
        let is_healthy = identity.is_healthy(now, window);
        let is_stale = identity.is_stale(now, window);
        RunnerSummary {
            identity,
            is_healthy,
            is_stale,
            heartbeat_window_ms: window,
        }
    }

    /// `POST /api/settings/runner-hosts`. Returns the created identity and
    /// the plaintext secret, which is surfaced exactly once by the caller.
    pub async fn create(
        &self,
        name: String,
        admin_only: bool,
        endpoint: String,
        secret: Option<String>,
    ) -> (RunnerIdentity, String) {
        let id = uuid::Uuid::new_v4().to_string();
        let secret = secret.unwrap_or_else(generate_secret);
        let identity = RunnerIdentity {
            id,
            name,
            secret_hash: hash_secret(&secret),
            endpoint,
            admin_only,
            status: RunnerStatus::Pending,
            disabled_at: None,
            status_message: String::new(),
            capabilities: Capabilities::default(),
            versions: Versions::default(),
            environment: Environment::default(),
            last_seen_at: None,
        };
        self.store.put(identity.clone()).await;
        (identity, secret)
    }

    pub async fn list(&self) -> Vec<RunnerSummary> {
        let now = Utc::now();
        self.store
            .list()
            .await
            .into_iter()
            .map(|identity| self.summarize(identity, now))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<RunnerSummary> {
        let identity = self.store.get(id).await?;
        Some(self.summarize(identity, Utc::now()))
    }

    /// `PATCH /api/settings/runner-hosts/{id}`.
    pub async fn patch(
        &self,
        id: &str,
        name: Option<String>,
        admin_only: Option<bool>,
    ) -> Result<RunnerIdentity, AutomnError> {
        let mut identity = self.store.get(id).await.ok_or_else(|| not_found(id))?;
        if let Some(name) = name {
            identity.name = name;
        }
        if let Some(admin_only) = admin_only {
            identity.admin_only = admin_only;
        }
        self.store.put(identity.clone()).await;
        Ok(identity)
    }

    /// `POST .../rotate-secret`: resets status to `pending` and returns the
    /// new plaintext secret once.
    pub async fn rotate_secret(&self, id: &str) -> Result<String, AutomnError> {
        let mut identity = self.store.get(id).await.ok_or_else(|| not_found(id))?;
        let secret = generate_secret();
        identity.secret_hash = hash_secret(&secret);
        identity.status = RunnerStatus::Pending;
        self.store.put(identity).await;
        Ok(secret)
    }

    /// `POST .../disconnect`: clears the stored secret without deleting the
    /// runner. No runner will ever hash to an empty-string secret, so an
    /// empty `secretHash` unambiguously means "no secret configured".
    pub async fn disconnect(&self, id: &str) -> Result<(), AutomnError> {
        let mut identity = self.store.get(id).await.ok_or_else(|| not_found(id))?;
        identity.secret_hash = String::new();
        identity.status = RunnerStatus::Pending;
        self.store.put(identity).await;
        Ok(())
    }

    pub async fn disable(&self, id: &str) -> Result<(), AutomnError> {
        let mut identity = self.store.get(id).await.ok_or_else(|| not_found(id))?;
        identity.disabled_at = Some(Utc::now());
        self.store.put(identity).await;
        Ok(())
    }

    pub async fn enable(&self, id: &str) -> Result<(), AutomnError> {
        let mut identity = self.store.get(id).await.ok_or_else(|| not_found(id))?;
        identity.disabled_at = None;
        self.store.put(identity).await;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), AutomnError> {
        self.store.remove(id).await.ok_or_else(|| not_found(id))?;
        Ok(())
    }

    /// `POST .../register`. Verifies the secret in constant time, then
    /// applies the runner-submitted fields and marks it healthy.
    pub async fn register(
        &self,
        id: &str,
        secret: &str,
        update: RegistrationUpdate,
    ) -> Result<RunnerIdentity, AutomnError> {
        let mut identity = self.store.get(id).await.ok_or_else(|| not_found(id))?;
        if identity.secret_hash.is_empty()
            || !constant_time_eq::constant_time_eq(
                identity.secret_hash.as_bytes(),
                hash_secret(secret).as_bytes(),
            )
        {
            return Err(AutomnError::new(ErrorCode::AuthSecretMismatch, "secret mismatch")
                .with_context("runnerId", id));
        }
        identity.endpoint = update.endpoint;
        identity.status_message = update.status_message;
        identity.capabilities = update.capabilities;
        identity.versions = update.versions;
        identity.environment = update.environment;
        identity.last_seen_at = Some(Utc::now());
        identity.status = RunnerStatus::Healthy;
        self.store.put(identity.clone()).await;
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RunnerRegistry {
        RunnerRegistry::new(Arc::new(InMemoryRunnerStore::default()), 60_000)
    }

    fn update() -> RegistrationUpdate {
        RegistrationUpdate {
            endpoint: "https://runner.example/api/run".into(),
            status_message: "ok".into(),
            capabilities: Capabilities::default(),
            versions: Versions {
                runner: "1.0.0".into(),
                host: None,
                minimum_host_version: "1.0.0".into(),
                minimum_runner_version: None,
            },
            environment: Environment::default(),
        }
    }

    #[tokio::test]
    async fn create_generates_id_and_secret_when_absent() {
        let registry = registry();
        let (identity, secret) = registry.create("r1".into(), false, "https://x".into(), None).await;
        assert!(!identity.id.is_empty());
        assert!(!secret.is_empty());
        assert_eq!(identity.status, RunnerStatus::Pending);
    }

    #[tokio::test]
    async fn register_requires_matching_secret() {
        let registry = registry();
        let (identity, secret) = registry.create("r1".into(), false, "https://x".into(), None).await;
        let err = registry.register(&identity.id, "wrong", update()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthSecretMismatch);
        let ok = registry.register(&identity.id, &secret, update()).await.unwrap();
        assert_eq!(ok.status, RunnerStatus::Healthy);
        assert!(ok.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn rotate_secret_resets_to_pending() {
        let registry = registry();
        let (identity, _) = registry.create("r1".into(), false, "https://x".into(), None).await;
        registry.register(&identity.id, "", update()).await.ok();
        let new_secret = registry.rotate_secret(&identity.id).await.unwrap();
        let summary = registry.get(&identity.id).await.unwrap();
        assert_eq!(summary.identity.status, RunnerStatus::Pending);
        assert!(registry
            .register(&identity.id, &new_secret, update())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn disabled_runner_is_never_healthy() {
        let registry = registry();
        let (identity, secret) = registry.create("r1".into(), false, "https://x".into(), None).await;
        registry.register(&identity.id, &secret, update()).await.unwrap();
        registry.disable(&identity.id).await.unwrap();
        let summary = registry.get(&identity.id).await.unwrap();
        assert!(!summary.is_healthy);
    }

    #[tokio::test]
    async fn disconnect_clears_secret_without_deleting() {
        let registry = registry();
        let (identity, secret) = registry.create("r1".into(), false, "https://x".into(), None).await;
        registry.register(&identity.id, &secret, update()).await.unwrap();
        registry.disconnect(&identity.id).await.unwrap();
        let summary = registry.get(&identity.id).await.unwrap();
        assert_eq!(summary.identity.status, RunnerStatus::Pending);
        assert!(registry.register(&identity.id, &secret, update()).await.is_err());
    }
}
