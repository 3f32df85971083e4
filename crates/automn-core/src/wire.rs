// SPDX-License-Identifier: MIT OR Apache-2.0
use crate::run::RunResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// `POST {hostUrl}/api/settings/runner-hosts/{runnerId}/register` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub secret: String,
    pub endpoint: String,
    pub status_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub version: String,
    pub minimum_host_version: String,
    pub os: String,
    pub platform: String,
    pub arch: String,
    /// Seconds.
    pub uptime: u64,
    pub runtimes: BTreeMap<String, String>,
}

/// The JSON body of a 2xx registration response. Unknown fields are kept in
/// `extra` rather than dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_runner_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single line of the `/api/run` newline-delimited JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Log { line: String },
    Result { data: RunResult },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_frame_tags_as_log() {
        let frame = Frame::Log { line: "hi".into() };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["line"], "hi");
    }

    #[test]
    fn result_frame_round_trips() {
        let result = RunResult::failure("r1", 1, "boom", Value::Null);
        let frame = Frame::Result { data: result };
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: Frame = serde_json::from_str(&json).unwrap();
        match parsed {
            Frame::Result { data } => assert_eq!(data.run_id, "r1"),
            _ => panic!("expected result frame"),
        }
    }
}
