//! Sensitive values that cannot leak through logs or serialization.
//!
//! [`SecretValue`] redacts itself in `Debug`, `Display` and `Serialize`, so a
//! credential that ends up in a tracing field, a status dump or a rendered
//! descriptor prints as `[REDACTED]`. The only way to read it is
//! [`SecretValue::expose`], which call sites use when handing the value to the
//! container engine or the credential store.

use serde::{Serialize, Serializer};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Placeholder written wherever a secret would otherwise appear.
pub const REDACTED: &str = "[REDACTED]";

/// A credential string, zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue {
    inner: String,
}

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Exposes the secret value for use.
    ///
    /// The returned reference must not be logged or stored.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretValue({})", REDACTED)
    }
}

impl std::fmt::Display for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        self.inner.as_bytes().ct_eq(other.inner.as_bytes()).into()
    }
}

impl Eq for SecretValue {}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

/// A configuration value classified as plain or secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Plain(String),
    Secret(SecretValue),
}

impl FieldValue {
    /// Build a value with the given classification.
    pub fn classified(value: impl Into<String>, secret: bool) -> Self {
        if secret {
            FieldValue::Secret(SecretValue::new(value))
        } else {
            FieldValue::Plain(value.into())
        }
    }

    /// The raw value. Only for handing to the engine or store.
    pub fn expose(&self) -> &str {
        match self {
            FieldValue::Plain(v) => v,
            FieldValue::Secret(s) => s.expose(),
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, FieldValue::Secret(_))
    }

    /// Log-safe rendering.
    pub fn display_safe(&self) -> &str {
        match self {
            FieldValue::Plain(v) => v,
            FieldValue::Secret(_) => REDACTED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_and_display_redacted() {
        let s = SecretValue::new("hunter2");
        assert_eq!(format!("{}", s), "[REDACTED]");
        assert!(!format!("{:?}", s).contains("hunter2"));
        assert_eq!(s.expose(), "hunter2");
    }

    #[test]
    fn test_secret_serialize_redacted() {
        let s = SecretValue::new("tok_live_123");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
    }

    #[test]
    fn test_secret_equality() {
        assert_eq!(SecretValue::new("a"), SecretValue::new("a"));
        assert_ne!(SecretValue::new("a"), SecretValue::new("b"));
        assert_ne!(SecretValue::new("a"), SecretValue::new("ab"));
    }

    #[test]
    fn test_field_value_serialization() {
        let plain = FieldValue::classified("node-1", false);
        let secret = FieldValue::classified("p@ss", true);
        assert_eq!(serde_json::to_string(&plain).unwrap(), "\"node-1\"");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"[REDACTED]\"");
        assert_eq!(secret.expose(), "p@ss");
        assert_eq!(secret.display_safe(), REDACTED);
        assert!(secret.is_secret());
        assert!(!plain.is_secret());
    }

    #[test]
    fn test_field_value_debug_never_shows_secret() {
        let v = FieldValue::classified("very-secret-token", true);
        assert!(!format!("{:?}", v).contains("very-secret-token"));
    }
}
