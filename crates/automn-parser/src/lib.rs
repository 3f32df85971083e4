// SPDX-License-Identifier: MIT OR Apache-2.0
//! Splits a finished run's accumulated stdout into plain text and the three
//! in-band structured streams: the return value, logs, and notifications
//! (C1).
//!
//! Operates on the full accumulated stdout string, not incrementally —
//! the execution engine only calls this once, after the child has exited
//! and both stream decoders have been flushed.

use automn_core::{
    AutomnLogEntry, AutomnNotification, LogLevel, NotifyLevel, AUDIENCE_MAX_LEN, MARKER_LOG,
    MARKER_NOTIFY, MARKER_RETURN, MAX_NOTIFICATIONS, NOTIFICATION_MESSAGE_MAX_LEN,
};
use chrono::Utc;
use serde_json::Value;

/// Result of running C1 over a finished run's stdout/stderr.
#[derive(Debug, Clone)]
pub struct ParsedOutput {
    /// Stdout with all recognized marker lines removed (P2).
    pub stdout: String,
    /// Stderr, with `"Bad return JSON: <reason>"` appended when applicable.
    pub stderr: String,
    pub return_data: Value,
    pub logs: Vec<AutomnLogEntry>,
    pub notifications: Vec<AutomnNotification>,
}

/// A line of stdout plus whether it was terminated by `\n` in the source —
/// needed to reconstruct the cleaned stdout byte-for-byte.
struct Line<'a> {
    text: &'a str,
    had_newline: bool,
}

fn split_lines(stdout: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut rest = stdout;
    loop {
        match rest.find('\n') {
            Some(idx) => {
                lines.push(Line {
                    text: &rest[..idx],
                    had_newline: true,
                });
                rest = &rest[idx + 1..];
            }
            None => {
                if !rest.is_empty() {
                    lines.push(Line {
                        text: rest,
                        had_newline: false,
                    });
                }
                break;
            }
        }
    }
    lines
}

fn join_lines(lines: &[String], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    out
}

pub fn parse_output(stdout: &str, stderr: &str) -> ParsedOutput {
    let source_lines = split_lines(stdout);
    let mut output_lines: Vec<String> = Vec::with_capacity(source_lines.len());
    let mut stderr_extra = String::new();
    let mut return_data = Value::Null;
    let mut return_seen = false;
    let mut logs = Vec::new();
    let mut notifications = Vec::new();
    let mut log_order: u64 = 0;
    let mut notify_order: u64 = 0;
    let mut notify_seen: usize = 0;
    let last_had_newline = source_lines.last().map(|l| l.had_newline).unwrap_or(true);

    for line in &source_lines {
        if let Some(payload) = line.text.strip_prefix(MARKER_RETURN) {
            if return_seen {
                // Only the first return marker in a run has effect; any
                // later ones are left as ordinary text.
                output_lines.push(line.text.to_string());
                continue;
            }
            return_seen = true;
            match serde_json::from_str::<Value>(payload) {
                Ok(value) => return_data = value,
                Err(err) => {
                    if !stderr_extra.is_empty() {
                        stderr_extra.push('\n');
                    }
                    stderr_extra.push_str(&format!("Bad return JSON: {err}"));
                    output_lines.push(line.text.to_string());
                }
            }
            continue;
        }

        if let Some(payload) = line.text.strip_prefix(MARKER_LOG) {
            match parse_log_payload(payload, log_order) {
                Some(entry) => {
                    log_order += 1;
                    logs.push(entry);
                }
                None => output_lines.push(line.text.to_string()),
            }
            continue;
        }

        if let Some(payload) = line.text.strip_prefix(MARKER_NOTIFY) {
            if notify_seen >= MAX_NOTIFICATIONS {
                output_lines.push(line.text.to_string());
                continue;
            }
            match parse_notify_payload(payload, notify_order) {
                Some(entry) => {
                    notify_order += 1;
                    notify_seen += 1;
                    notifications.push(entry);
                }
                None => output_lines.push(line.text.to_string()),
            }
            continue;
        }

        output_lines.push(line.text.to_string());
    }

    let stdout = join_lines(&output_lines, last_had_newline);
    let stderr = if stderr_extra.is_empty() {
        stderr.to_string()
    } else if stderr.is_empty() {
        stderr_extra
    } else {
        format!("{stderr}\n{stderr_extra}")
    };

    ParsedOutput {
        stdout,
        stderr,
        return_data,
        logs,
        notifications,
    }
}

fn parse_log_payload(payload: &str, order: u64) -> Option<AutomnLogEntry> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let obj = value.as_object()?;
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let level = obj
        .get("level")
        .and_then(Value::as_str)
        .map(LogLevel::normalize)
        .unwrap_or(LogLevel::Info);
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "general".to_string());
    let context = match obj.get("context") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(scalar) if !scalar.is_null() => {
            serde_json::json!({ "value": scalar.clone() })
        }
        _ => serde_json::json!({}),
    };
    Some(AutomnLogEntry {
        message,
        level,
        kind,
        context,
        order,
        timestamp: Utc::now(),
    })
}

fn parse_notify_payload(payload: &str, order: u64) -> Option<AutomnNotification> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let obj = value.as_object()?;
    let audience = obj
        .get("audience")
        .or_else(|| obj.get("target"))
        .or_else(|| obj.get("user"))
        .or_else(|| obj.get("scope"))
        .and_then(Value::as_str)
        .map(|s| truncate_chars(s.trim(), AUDIENCE_MAX_LEN))
        .filter(|s| !s.is_empty());
    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .map(|s| truncate_chars(s, NOTIFICATION_MESSAGE_MAX_LEN))
        .unwrap_or_default();
    let level = obj
        .get("level")
        .and_then(Value::as_str)
        .map(NotifyLevel::normalize)
        .unwrap_or(NotifyLevel::Info);
    Some(AutomnNotification {
        audience,
        message,
        level,
        order,
        timestamp: Utc::now(),
        raw: payload.to_string(),
    })
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_stdout_passes_through_unmodified() {
        let parsed = parse_output("hi\n", "");
        assert_eq!(parsed.stdout, "hi\n");
        assert_eq!(parsed.return_data, Value::Null);
    }

    #[test]
    fn return_marker_is_stripped_and_parsed() {
        let parsed = parse_output("__SCRIPTRETURN__{\"ok\":true}\n", "");
        assert_eq!(parsed.stdout, "");
        assert_eq!(parsed.return_data, serde_json::json!({"ok": true}));
    }

    #[test]
    fn second_return_marker_is_inert_text() {
        let stdout = "__SCRIPTRETURN__1\n__SCRIPTRETURN__2\n";
        let parsed = parse_output(stdout, "");
        assert_eq!(parsed.return_data, serde_json::json!(1));
        assert_eq!(parsed.stdout, "__SCRIPTRETURN__2\n");
    }

    #[test]
    fn bad_return_json_yields_null_and_stderr_note() {
        let parsed = parse_output("__SCRIPTRETURN__{oops\n", "");
        assert_eq!(parsed.return_data, Value::Null);
        assert!(parsed.stderr.contains("Bad return JSON"));
        // unparseable marker line is reinjected literally, marker included
        assert_eq!(parsed.stdout, "__SCRIPTRETURN__{oops\n");
    }

    #[test]
    fn log_entries_are_ordered_and_normalized() {
        let stdout = "__SCRIPTLOG__{\"message\":\"hello\",\"level\":\"warning\",\"type\":\" Audit \",\"context\":1}\n";
        let parsed = parse_output(stdout, "");
        assert_eq!(parsed.logs.len(), 1);
        let entry = &parsed.logs[0];
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.kind, "audit");
        assert_eq!(entry.context, serde_json::json!({"value": 1}));
        assert_eq!(entry.order, 0);
    }

    #[test]
    fn notifications_resolve_audience_aliases_and_truncate() {
        let long_message = "x".repeat(2100);
        let stdout = format!(
            "__SCRIPTNOTIFY__{{\"target\":\"Admins\",\"message\":\"{long_message}\",\"level\":\"warning\"}}\n"
        );
        let parsed = parse_output(&stdout, "");
        assert_eq!(parsed.notifications.len(), 1);
        let entry = &parsed.notifications[0];
        assert_eq!(entry.audience.as_deref(), Some("Admins"));
        assert_eq!(entry.level, NotifyLevel::Warn);
        assert_eq!(entry.message.chars().count(), 2000);
    }

    #[test]
    fn notifications_beyond_cap_are_left_as_text() {
        let mut stdout = String::new();
        for i in 0..55 {
            stdout.push_str(&format!("__SCRIPTNOTIFY__{{\"message\":\"n{i}\"}}\n"));
        }
        let parsed = parse_output(&stdout, "");
        assert_eq!(parsed.notifications.len(), 50);
        assert!(parsed.stdout.contains("__SCRIPTNOTIFY__{\"message\":\"n54\"}"));
    }

    #[test]
    fn unparseable_marker_payload_is_reinjected_literally() {
        let stdout = "__SCRIPTLOG__not-json\n";
        let parsed = parse_output(stdout, "");
        assert!(parsed.logs.is_empty());
        assert_eq!(parsed.stdout, "__SCRIPTLOG__not-json\n");
    }

    #[test]
    fn mixed_stream_preserves_plain_text_between_markers() {
        let stdout = "before\n__SCRIPTLOG__{\"message\":\"m\"}\nafter\n";
        let parsed = parse_output(stdout, "");
        assert_eq!(parsed.stdout, "before\nafter\n");
        assert_eq!(parsed.logs.len(), 1);
    }
}
