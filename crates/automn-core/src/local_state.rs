// SPDX-License-Identifier: MIT OR Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a runner's secret came from the environment (immutable via the
/// UI) or was stored through registration/reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    Env,
    Stored,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeExecutables {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powershell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

/// Last known outcome of a registration/heartbeat attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrationStatus {
    Ok,
    Error,
    NetworkError,
}

/// The single JSON blob the runner agent persists across restarts.
///
/// While `secret_source == Env`, `secret` must never be written to disk
/// (P6); callers persisting this struct are responsible for clearing
/// `secret` before serialization in that case — see
/// `automn-runner::registration` for the write path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerLocalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_source: Option<SecretSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_registration_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_registration_status: Option<RegistrationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_registration_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_registration_response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub runtime_executables: RuntimeExecutables,
}

impl RunnerLocalState {
    /// Whether the agent has never registered (`uninitialized` / no secret).
    pub fn is_uninitialized(&self) -> bool {
        self.secret.is_none()
    }

    /// Whether the agent has completed at least one successful
    /// registration, which freezes certain UI affordances (§4.6 `locked`).
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    /// A copy of this state with the plaintext secret removed, suitable for
    /// writing to disk when `secretSource == env` (P6).
    pub fn for_disk(&self) -> Self {
        let mut copy = self.clone();
        if copy.secret_source == Some(SecretSource::Env) {
            copy.secret = None;
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_has_no_secret() {
        assert!(RunnerLocalState::default().is_uninitialized());
    }

    #[test]
    fn for_disk_strips_env_secret() {
        let state = RunnerLocalState {
            secret: Some("s3cr3t-s3cr3t".into()),
            secret_source: Some(SecretSource::Env),
            ..Default::default()
        };
        let persisted = state.for_disk();
        assert!(persisted.secret.is_none());
    }

    #[test]
    fn for_disk_keeps_stored_secret() {
        let state = RunnerLocalState {
            secret: Some("s3cr3t-s3cr3t".into()),
            secret_source: Some(SecretSource::Stored),
            ..Default::default()
        };
        let persisted = state.for_disk();
        assert_eq!(persisted.secret.as_deref(), Some("s3cr3t-s3cr3t"));
    }
}
