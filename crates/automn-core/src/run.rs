// SPDX-License-Identifier: MIT OR Apache-2.0
use crate::script::ScriptDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ runId?, script, reqBody }` — the request body the host sends to a
/// runner's `/api/run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub script: ScriptDescriptor,
    #[serde(default)]
    pub req_body: Value,
}

/// Normalized level for a `__SCRIPTLOG__` entry. Anything unrecognized on
/// the wire maps to `Info`; the bare string `"warning"` maps to `Warn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
    Debug,
}

impl LogLevel {
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "success" => Self::Success,
            "debug" => Self::Debug,
            _ => Self::Info,
        }
    }
}

/// Normalized level for a `__SCRIPTNOTIFY__` entry — only three values,
/// unlike `LogLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Warn,
    Error,
}

impl NotifyLevel {
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// A single `automnLogs` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomnLogEntry {
    pub message: String,
    pub level: LogLevel,
    /// Lowercased, trimmed; defaults to `"general"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub context: Value,
    /// 0-based index in emission order, independent of the notification
    /// counter.
    pub order: u64,
    pub timestamp: DateTime<Utc>,
}

/// A single `automnNotifications` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomnNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    pub message: String,
    pub level: NotifyLevel,
    pub order: u64,
    pub timestamp: DateTime<Utc>,
    /// Original JSON payload text, kept for diagnostics.
    pub raw: String,
}

/// The final streamed frame payload, `{type:"result", data: RunResult}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: String,
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
    /// Wall-clock milliseconds.
    pub duration: u64,
    pub return_data: Value,
    pub automn_logs: Vec<AutomnLogEntry>,
    pub automn_notifications: Vec<AutomnNotification>,
    /// Deep clone of the request's `reqBody`.
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message: Option<String>,
}

impl RunResult {
    /// A minimal failure result used by every "never throws" exit path in
    /// the execution engine (validation, spawn errors, dependency-install
    /// errors): empty stdout, the message in stderr, `returnData = null`.
    pub fn failure(run_id: impl Into<String>, code: i32, stderr: impl Into<String>, input: Value) -> Self {
        Self {
            run_id: run_id.into(),
            stdout: String::new(),
            stderr: stderr.into(),
            code,
            duration: 0,
            return_data: Value::Null,
            automn_logs: Vec::new(),
            automn_notifications: Vec::new(),
            input,
            error_code: None,
            client_message: None,
        }
    }
}
