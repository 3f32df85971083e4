// SPDX-License-Identifier: MIT OR Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single `envName -> value` pair injected into the child's environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVariable {
    pub env_name: String,
    pub value: Value,
}

/// What the host ships to the runner per run.
///
/// `language` and `code` are kept optional here even though the wire
/// contract calls them required: the execution engine needs to distinguish
/// "absent" from "present but invalid" to produce the exact validation
/// messages spec'd for C5 step 2 (`"Unsupported language"` vs
/// `"Invalid script payload"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preassigned_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Seconds; `0` means no wall-clock limit.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub variables: Vec<EnvVariable>,
    /// Opaque fields used only for log-labeling by callers; preserved
    /// verbatim across serialization.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScriptDescriptor {
    /// A sanitized identifier safe to use as a directory/file name
    /// component: lowercase alphanumerics and hyphens only.
    pub fn sanitized_id(&self) -> String {
        self.id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_id_strips_unsafe_characters() {
        let script = ScriptDescriptor {
            id: "My Script/../01".into(),
            name: None,
            preassigned_run_id: None,
            language: Some("node".into()),
            code: Some("".into()),
            timeout: 0,
            variables: vec![],
            extra: Map::new(),
        };
        assert_eq!(script.sanitized_id(), "my-script-----01");
    }

    #[test]
    fn extra_fields_round_trip() {
        let json = serde_json::json!({
            "id": "s1",
            "language": "python",
            "code": "pass",
            "category": "ops"
        });
        let script: ScriptDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(script.extra.get("category").unwrap(), "ops");
    }
}
