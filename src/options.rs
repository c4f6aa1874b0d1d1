//! Engine-level compile options.
//!
//! Options are plain data and deserialize from JSON or YAML with kebab-case
//! keys; every key is optional.

use serde::{Deserialize, Serialize};

use crate::diagnostics::Severity;

/// What to do with malformed `\u`/`\U` escapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscapePolicy {
    #[default]
    Error,
    Warn,
    Ignore,
}

impl EscapePolicy {
    /// The severity to report with, or `None` if the escape is silently ignored.
    pub fn severity(self) -> Option<Severity> {
        match self {
            EscapePolicy::Error => Some(Severity::Error),
            EscapePolicy::Warn => Some(Severity::Warn),
            EscapePolicy::Ignore => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CompileOptions {
    /// Collapse an unnamed parenthesized operation holding a single element
    /// into that element.
    pub collapse_unary_operation: bool,
    /// Report duplicate object properties as warnings instead of errors.
    pub allow_duplicate_properties: bool,
    /// Report rejected operator registrations as warnings instead of errors.
    pub allow_invalid_operators: bool,
    /// Deep copy the template of a constant macro on each application.
    pub copy_constant_macros: bool,
    pub invalid_unicode_escape: EscapePolicy,
    /// Seed every compilation with the default operator set.
    pub default_operators: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            collapse_unary_operation: true,
            allow_duplicate_properties: false,
            allow_invalid_operators: false,
            copy_constant_macros: true,
            invalid_unicode_escape: EscapePolicy::Error,
            default_operators: true,
        }
    }
}

impl CompileOptions {
    pub(crate) fn duplicate_property_severity(&self) -> Severity {
        if self.allow_duplicate_properties {
            Severity::Warn
        } else {
            Severity::Error
        }
    }

    pub(crate) fn invalid_operator_severity(&self) -> Severity {
        if self.allow_invalid_operators {
            Severity::Warn
        } else {
            Severity::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let options: CompileOptions =
            serde_json::from_str(r#"{ "collapse-unary-operation": false }"#).unwrap();
        assert!(!options.collapse_unary_operation);
        assert!(options.copy_constant_macros);
        assert_eq!(options.invalid_unicode_escape, EscapePolicy::Error);
    }

    #[test]
    fn yaml_policies_deserialize() {
        let options: CompileOptions =
            serde_yaml::from_str("invalid-unicode-escape: ignore\nallow-duplicate-properties: true\n")
                .unwrap();
        assert_eq!(options.invalid_unicode_escape, EscapePolicy::Ignore);
        assert_eq!(options.duplicate_property_severity(), Severity::Warn);
        assert_eq!(options.invalid_operator_severity(), Severity::Error);
    }
}
