// SPDX-License-Identifier: MIT OR Apache-2.0
use automn_error::{AutomnError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four interpreter languages the runner knows how to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Node,
    Python,
    Powershell,
    Shell,
}

impl Language {
    /// Parse a wire language string, e.g. the `ScriptDescriptor.language`
    /// field. Anything other than the four known values is a validation
    /// error, not a panic.
    pub fn parse(raw: &str) -> Result<Self, AutomnError> {
        match raw {
            "node" => Ok(Self::Node),
            "python" => Ok(Self::Python),
            "powershell" => Ok(Self::Powershell),
            "shell" => Ok(Self::Shell),
            other => Err(AutomnError::new(
                ErrorCode::ValidationUnsupportedLanguage,
                "Unsupported language",
            )
            .with_context("language", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Python => "python",
            Self::Powershell => "powershell",
            Self::Shell => "shell",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_languages() {
        assert_eq!(Language::parse("node").unwrap(), Language::Node);
        assert_eq!(Language::parse("powershell").unwrap(), Language::Powershell);
    }

    #[test]
    fn rejects_unknown_language() {
        let err = Language::parse("ruby").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationUnsupportedLanguage);
    }
}
