//! Credential field schema and rule checks.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationReason;

/// One credential a vendor needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub required: bool,
    /// Secret values are redacted everywhere outside the engine and store.
    #[serde(default = "default_true")]
    pub secret: bool,
    #[serde(default)]
    pub rules: Vec<FieldRule>,
}

fn default_true() -> bool {
    true
}

/// A check applied to a trimmed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRule {
    NonEmpty,
    Prefix { prefix: String },
    Uuid,
    Pattern { pattern: String },
    MinLength { min: usize },
}

impl FieldRule {
    /// Check one value. Patterns are compiled when the catalog loads, so a
    /// pattern that fails to compile here is reported as a mismatch.
    pub fn check(&self, value: &str) -> Result<(), ValidationReason> {
        match self {
            FieldRule::NonEmpty => {
                if value.is_empty() {
                    return Err(ValidationReason::Empty);
                }
            }
            FieldRule::Prefix { prefix } => {
                if !value.starts_with(prefix.as_str()) {
                    return Err(ValidationReason::BadPrefix {
                        expected: prefix.clone(),
                    });
                }
            }
            FieldRule::Uuid => {
                if uuid::Uuid::parse_str(value).is_err() {
                    return Err(ValidationReason::NotUuid);
                }
            }
            FieldRule::Pattern { pattern } => {
                let matched = Regex::new(pattern)
                    .map(|re| re.is_match(value))
                    .unwrap_or(false);
                if !matched {
                    return Err(ValidationReason::PatternMismatch {
                        pattern: pattern.clone(),
                    });
                }
            }
            FieldRule::MinLength { min } => {
                if value.chars().count() < *min {
                    return Err(ValidationReason::TooShort { min: *min });
                }
            }
        }
        Ok(())
    }

    /// Short human description, for the vendor listing.
    pub fn describe(&self) -> String {
        match self {
            FieldRule::NonEmpty => "non-empty".to_string(),
            FieldRule::Prefix { prefix } => format!("starts with '{}'", prefix),
            FieldRule::Uuid => "UUID".to_string(),
            FieldRule::Pattern { pattern } => format!("matches {}", pattern),
            FieldRule::MinLength { min } => format!("at least {} characters", min),
        }
    }
}

impl FieldSchema {
    /// Validate a raw value. Values are trimmed first; an empty value is
    /// always rejected. Only the first failing rule is reported.
    pub fn validate(&self, raw: &str) -> Result<String, ValidationReason> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(ValidationReason::Empty);
        }
        for rule in &self.rules {
            rule.check(value)?;
        }
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(rules: Vec<FieldRule>) -> FieldSchema {
        FieldSchema {
            name: "device_uuid".into(),
            description: String::new(),
            required: true,
            secret: true,
            rules,
        }
    }

    #[test]
    fn test_prefix_rule() {
        let f = field(vec![FieldRule::Prefix {
            prefix: "sdk-node-".into(),
        }]);
        assert!(f.validate("sdk-node-abc").is_ok());
        assert_eq!(
            f.validate("abc-sdk-node-"),
            Err(ValidationReason::BadPrefix {
                expected: "sdk-node-".into()
            })
        );
    }

    #[test]
    fn test_value_is_trimmed() {
        let f = field(vec![FieldRule::MinLength { min: 3 }]);
        assert_eq!(f.validate("  abcd \n").unwrap(), "abcd");
        assert_eq!(f.validate(" ab "), Err(ValidationReason::TooShort { min: 3 }));
    }

    #[test]
    fn test_blank_is_empty() {
        assert_eq!(field(vec![]).validate("   "), Err(ValidationReason::Empty));
    }

    #[test]
    fn test_uuid_rule() {
        let f = field(vec![FieldRule::Uuid]);
        assert!(f.validate("3f2b8c1e-0d4a-4c5e-9b7f-1a2b3c4d5e6f").is_ok());
        assert_eq!(f.validate("not-a-uuid"), Err(ValidationReason::NotUuid));
    }

    #[test]
    fn test_pattern_rule() {
        let f = field(vec![FieldRule::Pattern {
            pattern: "^[A-F0-9]{4}$".into(),
        }]);
        assert!(f.validate("AB12").is_ok());
        assert!(matches!(
            f.validate("ab12"),
            Err(ValidationReason::PatternMismatch { .. })
        ));
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let f = field(vec![
            FieldRule::Prefix {
                prefix: "sdk-node-".into(),
            },
            FieldRule::MinLength { min: 50 },
        ]);
        assert!(matches!(
            f.validate("x"),
            Err(ValidationReason::BadPrefix { .. })
        ));
    }

    #[test]
    fn test_schema_defaults_from_yaml() {
        let f: FieldSchema = serde_yaml::from_str("name: token\nrules:\n  - kind: non_empty\n").unwrap();
        assert!(f.required);
        assert!(f.secret);
        assert_eq!(f.rules, vec![FieldRule::NonEmpty]);
    }
}
