// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host-side wire client for `POST {runner.endpoint}`: sends a run request
//! and exposes the runner's newline-delimited JSON response as a stream of
//! frames. Runner *selection* is out of scope here, per the dispatch
//! contract — this crate only speaks the wire protocol to whichever runner
//! the caller already picked.

use automn_core::{Frame, RunRequest};
use automn_error::{AutomnError, ErrorCode};
use futures::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

const SECRET_HEADER: &str = "x-automn-runner-secret";

/// The runner endpoint and secret needed to dispatch a run, independent of
/// how the host's registry represents a runner internally.
#[derive(Debug, Clone)]
pub struct RunnerTarget {
    pub endpoint: String,
    pub secret: String,
}

pub struct DispatchClient {
    http: reqwest::Client,
}

impl Default for DispatchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// POST `request` to `runner.endpoint` and return a stream of frames
    /// parsed from the NDJSON response body as it arrives. The stream ends
    /// when the connection closes; a transport-level failure before any
    /// bytes are read surfaces as the stream's first (and only) item being
    /// absent — callers should treat an empty stream with no `Frame::Result`
    /// as a dispatch failure.
    pub async fn run(
        &self,
        runner: &RunnerTarget,
        request: RunRequest,
    ) -> Result<impl Stream<Item = Frame>, AutomnError> {
        let response = self
            .http
            .post(&runner.endpoint)
            .header(SECRET_HEADER, &runner.secret)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                AutomnError::new(ErrorCode::RegistrationNetworkError, err.to_string())
                    .with_context("endpoint", runner.endpoint.clone())
            })?;

        if !response.status().is_success() {
            return Err(
                AutomnError::new(ErrorCode::RegistrationHttpError, format!("status {}", response.status()))
                    .with_context("endpoint", runner.endpoint.clone()),
            );
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut byte_stream = response.bytes_stream();
            let mut pending = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        tracing::warn!(error = %err, "dispatch stream read failed");
                        break;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(idx) = pending.find('\n') {
                    let line = pending[..idx].to_string();
                    pending.drain(..=idx);
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Frame>(&line) {
                        Ok(frame) => {
                            if tx.send(frame).is_err() {
                                return;
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, line, "unparseable dispatch frame"),
                    }
                }
            }
            if !pending.trim().is_empty() {
                if let Ok(frame) = serde_json::from_str::<Frame>(pending.trim()) {
                    let _ = tx.send(frame);
                }
            }
        });

        Ok(UnboundedReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automn_core::{EnvVariable, RunResult, ScriptDescriptor};
    use serde_json::{json, Map, Value};

    fn sample_request() -> RunRequest {
        RunRequest {
            run_id: Some("r1".into()),
            script: ScriptDescriptor {
                id: "s1".into(),
                name: None,
                preassigned_run_id: None,
                language: Some("node".into()),
                code: Some("1".into()),
                timeout: 0,
                variables: Vec::<EnvVariable>::new(),
                extra: Map::new(),
            },
            req_body: Value::Null,
        }
    }

    #[test]
    fn request_serializes_with_camel_case_fields() {
        let json = serde_json::to_value(sample_request()).unwrap();
        assert!(json.get("runId").is_some());
        assert!(json.get("reqBody").is_some());
    }

    #[test]
    fn frame_wire_shape_round_trips() {
        let log = Frame::Log { line: "hello".into() };
        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["line"], "hello");

        let result = Frame::Result {
            data: RunResult::failure("r1", 0, "", Value::Null),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "result");
        assert!(value["data"].get("runId").is_some());
    }

    #[test]
    fn secret_header_name_matches_wire_contract() {
        assert_eq!(SECRET_HEADER, "x-automn-runner-secret");
    }
}
