// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy for Automn's runner control plane.
//!
//! Mirrors the eight error categories laid out for the execution engine and
//! the runner HTTP surface: validation, dependency installation, process
//! spawn, child runtime, timeout, output parsing, authentication, and
//! registration. Library code throughout the workspace returns
//! `Result<_, AutomnError>` at crate boundaries where a typed error is
//! warranted; the execution engine itself never propagates one of these out
//! of `execute_script` — failures there are folded into a `RunResult`
//! instead (see `automn-engine`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Broad grouping an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    DependencyInstall,
    Spawn,
    ChildRuntime,
    Timeout,
    OutputParse,
    Authentication,
    Registration,
    Config,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::DependencyInstall => "dependency_install",
            Self::Spawn => "spawn",
            Self::ChildRuntime => "child_runtime",
            Self::Timeout => "timeout",
            Self::OutputParse => "output_parse",
            Self::Authentication => "authentication",
            Self::Registration => "registration",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Stable, machine-readable error code. The `Display`/`as_str` form is the
/// `SCREAMING_SNAKE_CASE` string carried in wire payloads (e.g.
/// `RunResult.errorCode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationUnsupportedLanguage,
    ValidationInvalidPayload,
    NodeDependencyInstallFailed,
    SpawnFailed,
    ChildNonZeroExit,
    ChildSignalKilled,
    TimeoutExceeded,
    OutputParseBadReturnJson,
    AuthMissingSecret,
    AuthSecretMismatch,
    AuthNoSecretConfigured,
    AuthCapacityExceeded,
    RegistrationNetworkError,
    RegistrationHttpError,
    ConfigInvalid,
    Internal,
}

impl ErrorCode {
    /// The category this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationUnsupportedLanguage | Self::ValidationInvalidPayload => {
                ErrorCategory::Validation
            }
            Self::NodeDependencyInstallFailed => ErrorCategory::DependencyInstall,
            Self::SpawnFailed => ErrorCategory::Spawn,
            Self::ChildNonZeroExit | Self::ChildSignalKilled => ErrorCategory::ChildRuntime,
            Self::TimeoutExceeded => ErrorCategory::Timeout,
            Self::OutputParseBadReturnJson => ErrorCategory::OutputParse,
            Self::AuthMissingSecret
            | Self::AuthSecretMismatch
            | Self::AuthNoSecretConfigured
            | Self::AuthCapacityExceeded => ErrorCategory::Authentication,
            Self::RegistrationNetworkError | Self::RegistrationHttpError => {
                ErrorCategory::Registration
            }
            Self::ConfigInvalid => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// The `SCREAMING_SNAKE_CASE` wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationUnsupportedLanguage => "VALIDATION_UNSUPPORTED_LANGUAGE",
            Self::ValidationInvalidPayload => "VALIDATION_INVALID_PAYLOAD",
            Self::NodeDependencyInstallFailed => "NODE_DEPENDENCY_INSTALL_FAILED",
            Self::SpawnFailed => "SPAWN_FAILED",
            Self::ChildNonZeroExit => "CHILD_NON_ZERO_EXIT",
            Self::ChildSignalKilled => "CHILD_SIGNAL_KILLED",
            Self::TimeoutExceeded => "TIMEOUT_EXCEEDED",
            Self::OutputParseBadReturnJson => "OUTPUT_PARSE_BAD_RETURN_JSON",
            Self::AuthMissingSecret => "AUTH_MISSING_SECRET",
            Self::AuthSecretMismatch => "AUTH_SECRET_MISMATCH",
            Self::AuthNoSecretConfigured => "AUTH_NO_SECRET_CONFIGURED",
            Self::AuthCapacityExceeded => "AUTH_CAPACITY_EXCEEDED",
            Self::RegistrationNetworkError => "REGISTRATION_NETWORK_ERROR",
            Self::RegistrationHttpError => "REGISTRATION_HTTP_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unified error: a stable code, a human message, optional structured
/// context, and an optional source error kept out of the serializable DTO.
pub struct AutomnError {
    code: ErrorCode,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    context: BTreeMap<String, serde_json::Value>,
}

impl AutomnError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    pub fn to_dto(&self) -> AutomnErrorDto {
        AutomnErrorDto {
            code: self.code,
            category: self.code.category(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl fmt::Debug for AutomnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomnError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("context", &self.context)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for AutomnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AutomnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serializable snapshot of an [`AutomnError`], safe to place on the wire.
/// Drops the opaque `source` since it is rarely serializable itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomnErrorDto {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub message: String,
    pub context: BTreeMap<String, serde_json::Value>,
}

impl From<&AutomnError> for AutomnErrorDto {
    fn from(err: &AutomnError) -> Self {
        err.to_dto()
    }
}
