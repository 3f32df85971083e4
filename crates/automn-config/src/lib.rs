// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading for the Automn runner agent: an optional TOML file,
//! environment-variable overrides, and validation that yields advisory
//! warnings for soft issues and hard errors for invalid values.
//!
//! Defaults mirror the configuration table in the runner specification
//! exactly.

use automn_core::RuntimeExecutables;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_PORT: u16 = 3030;
const DEFAULT_HEARTBEAT_INTERVAL_MS: i64 = 60_000;
const DEFAULT_STATUS_MESSAGE: &str = "Runner heartbeat";
const DEFAULT_ENDPOINT_PATH: &str = "/api/run";
const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// A non-fatal issue found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    HeartbeatDisabled,
    LocalConcurrencyUnbounded,
    NoResetToken,
    MissingRunnerId,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeartbeatDisabled => {
                write!(f, "heartbeatInterval <= 0: heartbeats are disabled")
            }
            Self::LocalConcurrencyUnbounded => {
                write!(f, "localMaxConcurrency unset: runner capacity is unbounded")
            }
            Self::NoResetToken => write!(f, "resetToken unset: /internal/reset is disabled"),
            Self::MissingRunnerId => write!(f, "runnerId unset: registration will fail"),
        }
    }
}

/// Raw TOML shape. Every field is optional; absence falls through to
/// [`RunnerConfig`]'s defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    port: Option<u16>,
    host_url: Option<String>,
    runner_id: Option<String>,
    endpoint_url: Option<String>,
    public_url: Option<String>,
    endpoint_path: Option<String>,
    secret: Option<String>,
    heartbeat_interval: Option<i64>,
    max_concurrency: Option<u32>,
    local_max_concurrency: Option<u32>,
    timeout_ms: Option<u64>,
    status_message: Option<String>,
    state_file: Option<PathBuf>,
    scripts_dir: Option<PathBuf>,
    workdir_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    reset_token: Option<String>,
    runtime_executables: Option<RawRuntimeExecutables>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRuntimeExecutables {
    node: Option<String>,
    python: Option<String>,
    powershell: Option<String>,
}

/// Tracks which `runtimeExecutables` fields came from `AUTOMN_RUNTIME_*`
/// environment variables rather than the TOML file, mirroring
/// `secret_from_env`. Env-managed fields refuse UI writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeExecutablesEnvFlags {
    pub node: bool,
    pub python: bool,
    pub powershell: bool,
}

impl RuntimeExecutablesEnvFlags {
    pub fn all(&self) -> bool {
        self.node && self.python && self.powershell
    }
}

/// Fully resolved runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub port: u16,
    pub host_url: Option<String>,
    pub runner_id: Option<String>,
    pub endpoint_url: Option<String>,
    pub public_url: Option<String>,
    pub endpoint_path: String,
    pub secret: Option<String>,
    /// `true` when `secret` came from `AUTOMN_SECRET` rather than the TOML
    /// file or the UI — corresponds to `secretSource == env` in
    /// `RunnerLocalState`.
    pub secret_from_env: bool,
    pub heartbeat_interval_ms: i64,
    pub max_concurrency: Option<u32>,
    pub local_max_concurrency: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub status_message: String,
    pub state_file: PathBuf,
    pub scripts_dir: PathBuf,
    pub workdir_dir: PathBuf,
    pub reset_token: Option<String>,
    pub runtime_executables: RuntimeExecutables,
    pub runtime_executables_from_env: RuntimeExecutablesEnvFlags,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            port: DEFAULT_PORT,
            host_url: None,
            runner_id: None,
            endpoint_url: None,
            public_url: None,
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            secret: None,
            secret_from_env: false,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_concurrency: None,
            local_max_concurrency: None,
            timeout_ms: None,
            status_message: DEFAULT_STATUS_MESSAGE.to_string(),
            state_file: data_dir.join("state").join("runner-state.json"),
            scripts_dir: data_dir.join("scripts"),
            workdir_dir: data_dir.join("script_workdir"),
            reset_token: None,
            runtime_executables: RuntimeExecutables::default(),
            runtime_executables_from_env: RuntimeExecutablesEnvFlags::default(),
        }
    }
}

/// `endpointUrl`, if set explicitly, otherwise `publicUrl + endpointPath`.
impl RunnerConfig {
    pub fn effective_endpoint(&self) -> Option<String> {
        if let Some(url) = &self.endpoint_url {
            return Some(url.clone());
        }
        self.public_url
            .as_ref()
            .map(|base| format!("{}{}", base.trim_end_matches('/'), self.endpoint_path))
    }
}

fn parse_toml(path: &Path) -> Result<RawConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_raw(base: &mut RunnerConfig, raw: RawConfig) {
    if let Some(v) = raw.port {
        base.port = v;
    }
    if let Some(v) = raw.host_url {
        base.host_url = Some(v);
    }
    if let Some(v) = raw.runner_id {
        base.runner_id = Some(v);
    }
    if let Some(v) = raw.endpoint_url {
        base.endpoint_url = Some(v);
    }
    if let Some(v) = raw.public_url {
        base.public_url = Some(v);
    }
    if let Some(v) = raw.endpoint_path {
        base.endpoint_path = v;
    }
    if let Some(v) = raw.secret {
        base.secret = Some(v);
        base.secret_from_env = false;
    }
    if let Some(v) = raw.heartbeat_interval {
        base.heartbeat_interval_ms = v;
    }
    if let Some(v) = raw.max_concurrency {
        base.max_concurrency = Some(v);
    }
    if let Some(v) = raw.local_max_concurrency {
        base.local_max_concurrency = Some(v);
    }
    if let Some(v) = raw.timeout_ms {
        base.timeout_ms = Some(v);
    }
    if let Some(v) = raw.status_message {
        base.status_message = v;
    }
    let data_dir = raw.data_dir.clone();
    if let Some(v) = raw.state_file {
        base.state_file = v;
    } else if let Some(dir) = &data_dir {
        base.state_file = dir.join("state").join("runner-state.json");
    }
    if let Some(v) = raw.scripts_dir {
        base.scripts_dir = v;
    } else if let Some(dir) = &data_dir {
        base.scripts_dir = dir.join("scripts");
    }
    if let Some(v) = raw.workdir_dir {
        base.workdir_dir = v;
    } else if let Some(dir) = &data_dir {
        base.workdir_dir = dir.join("script_workdir");
    }
    if let Some(v) = raw.reset_token {
        base.reset_token = Some(v);
    }
    if let Some(exe) = raw.runtime_executables {
        if let Some(v) = exe.node {
            base.runtime_executables.node = Some(v);
        }
        if let Some(v) = exe.python {
            base.runtime_executables.python = Some(v);
        }
        if let Some(v) = exe.powershell {
            base.runtime_executables.powershell = Some(v);
        }
    }
}

/// Apply the recognized `AUTOMN_*` environment variables on top of `config`.
/// Environment overrides win over the TOML file, matching the teacher's
/// layering (file, then env, then validation).
pub fn apply_env_overrides(config: &mut RunnerConfig, env: &BTreeMap<String, String>) {
    if let Some(v) = env.get("AUTOMN_PORT").and_then(|v| v.parse().ok()) {
        config.port = v;
    }
    if let Some(v) = env.get("AUTOMN_HOST_URL") {
        config.host_url = Some(v.clone());
    }
    if let Some(v) = env.get("AUTOMN_RUNNER_ID") {
        config.runner_id = Some(v.clone());
    }
    if let Some(v) = env.get("AUTOMN_ENDPOINT_URL") {
        config.endpoint_url = Some(v.clone());
    }
    if let Some(v) = env.get("AUTOMN_PUBLIC_URL") {
        config.public_url = Some(v.clone());
    }
    if let Some(v) = env.get("AUTOMN_SECRET") {
        config.secret = Some(v.clone());
        config.secret_from_env = true;
    }
    if let Some(v) = env
        .get("AUTOMN_HEARTBEAT_INTERVAL_MS")
        .and_then(|v| v.parse().ok())
    {
        config.heartbeat_interval_ms = v;
    }
    if let Some(v) = env
        .get("AUTOMN_LOCAL_MAX_CONCURRENCY")
        .and_then(|v| v.parse().ok())
    {
        config.local_max_concurrency = Some(v);
    }
    if let Some(v) = env.get("AUTOMN_RESET_TOKEN") {
        config.reset_token = Some(v.clone());
    }
    if let Some(v) = env.get("AUTOMN_STATE_FILE") {
        config.state_file = PathBuf::from(v);
    }
    if let Some(v) = env.get("AUTOMN_SCRIPTS_DIR") {
        config.scripts_dir = PathBuf::from(v);
    }
    if let Some(v) = env.get("AUTOMN_WORKDIR_DIR") {
        config.workdir_dir = PathBuf::from(v);
    }
    if let Some(v) = env.get("AUTOMN_RUNTIME_NODE") {
        config.runtime_executables.node = Some(v.clone());
        config.runtime_executables_from_env.node = true;
    }
    if let Some(v) = env.get("AUTOMN_RUNTIME_PYTHON") {
        config.runtime_executables.python = Some(v.clone());
        config.runtime_executables_from_env.python = true;
    }
    if let Some(v) = env.get("AUTOMN_RUNTIME_POWERSHELL") {
        config.runtime_executables.powershell = Some(v.clone());
        config.runtime_executables_from_env.powershell = true;
    }
}

/// Hard-validate `config`, returning the accumulated advisory warnings on
/// success. A `runnerId` is not required to *load* configuration (the UI
/// registration flow can still set a secret first), but its absence is
/// always surfaced as a warning since registration cannot succeed without
/// it.
pub fn validate_config(config: &RunnerConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    if config.port == 0 {
        return Err(ConfigError::Validation("port must be non-zero".into()));
    }
    if let Some(cap) = config.local_max_concurrency {
        if cap == 0 {
            return Err(ConfigError::Validation(
                "localMaxConcurrency must be positive when set".into(),
            ));
        }
    }
    if let Some(secret) = &config.secret {
        if secret.len() < 12 {
            return Err(ConfigError::Validation(
                "secret must be at least 12 characters".into(),
            ));
        }
    }

    let mut warnings = Vec::new();
    if config.heartbeat_interval_ms <= 0 {
        warnings.push(ConfigWarning::HeartbeatDisabled);
    }
    if config.local_max_concurrency.is_none() {
        warnings.push(ConfigWarning::LocalConcurrencyUnbounded);
    }
    if config.reset_token.is_none() {
        warnings.push(ConfigWarning::NoResetToken);
    }
    if config.runner_id.is_none() {
        warnings.push(ConfigWarning::MissingRunnerId);
    }
    Ok(warnings)
}

/// Load configuration from an optional TOML file path, then apply
/// environment overrides, then validate. Returns the config plus any
/// advisory warnings; hard errors short-circuit.
pub fn load_config(
    path: Option<&Path>,
    env: &BTreeMap<String, String>,
) -> Result<(RunnerConfig, Vec<ConfigWarning>), ConfigError> {
    let mut config = RunnerConfig::default();
    if let Some(path) = path {
        let raw = parse_toml(path)?;
        apply_raw(&mut config, raw);
    }
    apply_env_overrides(&mut config, env);
    let warnings = validate_config(&config)?;
    Ok((config, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_match_spec_table() {
        let config = RunnerConfig::default();
        assert_eq!(config.port, 3030);
        assert_eq!(config.heartbeat_interval_ms, 60_000);
        assert_eq!(config.status_message, "Runner heartbeat");
        assert_eq!(config.endpoint_path, "/api/run");
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut dir_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(dir_file, "port = 4000\nrunnerId = \"from-file\"").unwrap();
        let (config, _) = load_config(
            Some(dir_file.path()),
            &env(&[("AUTOMN_PORT", "5000")]),
        )
        .unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.runner_id.as_deref(), Some("from-file"));
    }

    #[test]
    fn missing_runner_id_warns_not_errors() {
        let (_config, warnings) = load_config(None, &BTreeMap::new()).unwrap();
        assert!(warnings.contains(&ConfigWarning::MissingRunnerId));
    }

    #[test]
    fn short_secret_is_a_hard_error() {
        let mut raw_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(raw_file, "secret = \"short\"").unwrap();
        let err = load_config(Some(raw_file.path()), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn secret_from_env_is_flagged() {
        let mut config = RunnerConfig::default();
        apply_env_overrides(&mut config, &env(&[("AUTOMN_SECRET", "123456789012")]));
        assert!(config.secret_from_env);
    }

    #[test]
    fn runtime_executable_env_overrides_are_flagged_individually() {
        let mut config = RunnerConfig::default();
        apply_env_overrides(&mut config, &env(&[("AUTOMN_RUNTIME_NODE", "/opt/node")]));
        assert!(config.runtime_executables_from_env.node);
        assert!(!config.runtime_executables_from_env.python);
        assert!(!config.runtime_executables_from_env.all());
    }

    #[test]
    fn endpoint_prefers_explicit_url_over_public_plus_path() {
        let mut config = RunnerConfig::default();
        config.public_url = Some("https://runner.example".into());
        assert_eq!(
            config.effective_endpoint().as_deref(),
            Some("https://runner.example/api/run")
        );
        config.endpoint_url = Some("https://override.example/run".into());
        assert_eq!(
            config.effective_endpoint().as_deref(),
            Some("https://override.example/run")
        );
    }
}
