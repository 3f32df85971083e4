// SPDX-License-Identifier: MIT OR Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of a runner as tracked by the host registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    Pending,
    Healthy,
    Disabled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versions {
    pub runner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub minimum_host_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_runner_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub os: String,
    pub platform: String,
    pub arch: String,
    pub runtimes: BTreeMap<String, String>,
}

/// A runner's stable entry on the host, as defined in the data model.
///
/// `id` is immutable and `secretHash` is never serialized to any API
/// response — it is kept private to this module's construction helpers and
/// accessed only by the registry's verification routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerIdentity {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub endpoint: String,
    pub admin_only: bool,
    pub status: RunnerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
    pub status_message: String,
    pub capabilities: Capabilities,
    pub versions: Versions,
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl RunnerIdentity {
    /// `now - lastSeenAt > heartbeatWindowMs`.
    pub fn is_stale(&self, now: DateTime<Utc>, heartbeat_window_ms: i64) -> bool {
        match self.last_seen_at {
            Some(last_seen) => {
                let elapsed = (now - last_seen).num_milliseconds();
                elapsed > heartbeat_window_ms
            }
            None => true,
        }
    }

    /// `status == healthy && !isStale && !disabledAt`.
    pub fn is_healthy(&self, now: DateTime<Utc>, heartbeat_window_ms: i64) -> bool {
        self.status == RunnerStatus::Healthy
            && !self.is_stale(now, heartbeat_window_ms)
            && self.disabled_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(last_seen_at: Option<DateTime<Utc>>) -> RunnerIdentity {
        RunnerIdentity {
            id: "r1".into(),
            name: "Runner One".into(),
            secret_hash: "hash".into(),
            endpoint: "https://runner.example/api/run".into(),
            admin_only: false,
            status: RunnerStatus::Healthy,
            disabled_at: None,
            status_message: "ok".into(),
            capabilities: Capabilities::default(),
            versions: Versions {
                runner: "1.0.0".into(),
                host: None,
                minimum_host_version: "1.0.0".into(),
                minimum_runner_version: None,
            },
            environment: Environment::default(),
            last_seen_at,
        }
    }

    #[test]
    fn never_seen_is_stale() {
        let identity = sample(None);
        assert!(identity.is_stale(Utc::now(), 180_000));
    }

    #[test]
    fn healthy_requires_recent_heartbeat() {
        let now = Utc::now();
        let identity = sample(Some(now - Duration::milliseconds(200_000)));
        assert!(identity.is_stale(now, 180_000));
        assert!(!identity.is_healthy(now, 180_000));
    }

    #[test]
    fn disabled_masks_health_even_when_fresh() {
        let now = Utc::now();
        let mut identity = sample(Some(now));
        identity.disabled_at = Some(now);
        assert!(!identity.is_healthy(now, 180_000));
    }

    #[test]
    fn secret_hash_is_never_serialized() {
        let identity = sample(Some(Utc::now()));
        let json = serde_json::to_value(&identity).unwrap();
        assert!(json.get("secretHash").is_none());
    }
}
