//! Config materializer
//!
//! Turns raw key/value overrides into a validated [`CredentialSet`]. Keys are
//! `<VENDOR>_<FIELD>` upper-cased (`EARNAPP_DEVICE_UUID`). Every field of every
//! enabled vendor is checked in one pass and all failures are returned
//! together, so the operator can fix the whole file at once.
//!
//! Validated values are classified using the field schema: secret fields
//! become [`FieldValue::Secret`] and are redacted from then on.

pub mod schema;
pub mod store;

pub use store::CredentialStore;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::{BandstackError, Result, ValidationError, ValidationErrors, ValidationReason};
use crate::secret::FieldValue;

/// Env-file key for a vendor credential field.
pub fn credential_key(vendor: &str, field: &str) -> String {
    format!("{}_{}", vendor, field)
        .replace('-', "_")
        .to_ascii_uppercase()
}

// ============================================================================
// Raw input
// ============================================================================

/// Unvalidated key/value input. Values are not yet classified, so `Debug`
/// only shows keys.
#[derive(Clone, Default)]
pub struct RawOverrides {
    entries: BTreeMap<String, String>,
}

impl std::fmt::Debug for RawOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawOverrides")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RawOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a `.env` style file. A missing file yields no entries.
    pub fn from_env_file(path: &Path) -> Result<Self> {
        let mut overrides = Self::new();
        if !path.exists() {
            debug!(path = %path.display(), "Env file not found, no overrides read");
            return Ok(overrides);
        }
        let iter = dotenvy::from_path_iter(path).map_err(|e| {
            BandstackError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        for item in iter {
            let (key, value) = item.map_err(|e| {
                BandstackError::Config(format!("cannot parse {}: {}", path.display(), e))
            })?;
            overrides.insert(key, value);
        }
        Ok(overrides)
    }

    /// Parse `KEY=VALUE` assignments (from `--set`).
    pub fn parse_assignments<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let mut overrides = Self::new();
        for item in items {
            let item = item.as_ref();
            let (key, value) = item.split_once('=').ok_or_else(|| {
                // The value part may be a secret; only echo the key side.
                BandstackError::Config(format!(
                    "expected KEY=VALUE, got '{}'",
                    item.chars().take_while(|c| *c != '=').collect::<String>()
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(BandstackError::Config("empty key in KEY=VALUE".into()));
            }
            overrides.insert(key.to_string(), value.to_string());
        }
        Ok(overrides)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Overlay `other` on top of `self`; `other` wins on conflicts.
    pub fn merge(mut self, other: RawOverrides) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> BTreeMap<String, String> {
        self.entries
    }
}

// ============================================================================
// Validated output
// ============================================================================

/// Validated, classified values for one vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorCredentials {
    fields: BTreeMap<String, FieldValue>,
}

impl VendorCredentials {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }
}

/// Credentials for every enabled vendor, keyed by vendor id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    vendors: BTreeMap<String, VendorCredentials>,
}

impl CredentialSet {
    pub fn vendor(&self, id: &str) -> Option<&VendorCredentials> {
        self.vendors.get(id)
    }

    pub fn insert(&mut self, vendor: impl Into<String>, creds: VendorCredentials) {
        self.vendors.insert(vendor.into(), creds);
    }

    pub fn vendors(&self) -> impl Iterator<Item = (&String, &VendorCredentials)> {
        self.vendors.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }
}

// ============================================================================
// Materialize
// ============================================================================

/// Validate `raw` against the schema of every enabled vendor.
///
/// Returns every invalid field, not just the first. Optional fields that are
/// absent or blank are skipped.
pub fn materialize(
    catalog: &Catalog,
    enabled: &BTreeSet<String>,
    raw: &RawOverrides,
) -> std::result::Result<CredentialSet, ValidationErrors> {
    let mut errors = Vec::new();
    let mut set = CredentialSet::default();

    for vendor_id in enabled {
        let Some(vendor) = catalog.get(vendor_id) else {
            errors.push(ValidationError {
                vendor: vendor_id.clone(),
                field: "enabled".into(),
                reason: ValidationReason::UnknownVendor,
            });
            continue;
        };

        let mut creds = VendorCredentials::default();
        for field in &vendor.fields {
            let key = credential_key(vendor_id, &field.name);
            let raw_value = raw.get(&key);
            let blank = raw_value.map_or(true, |v| v.trim().is_empty());
            if blank && !field.required {
                continue;
            }
            let Some(raw_value) = raw_value else {
                errors.push(ValidationError {
                    vendor: vendor_id.clone(),
                    field: field.name.clone(),
                    reason: ValidationReason::Missing,
                });
                continue;
            };
            match field.validate(raw_value) {
                Ok(value) => creds.insert(&field.name, FieldValue::classified(value, field.secret)),
                Err(reason) => errors.push(ValidationError {
                    vendor: vendor_id.clone(),
                    field: field.name.clone(),
                    reason,
                }),
            }
        }
        set.insert(vendor_id, creds);
    }

    if !errors.is_empty() {
        info!(invalid = errors.len(), "Credential validation failed");
        return Err(ValidationErrors(errors));
    }
    info!(vendors = enabled.len(), "Credentials validated");
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EARNAPP_UUID: &str = "sdk-node-0123456789abcdef0123456789abcdef";

    fn enabled(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_credential_key() {
        assert_eq!(credential_key("earnapp", "device_uuid"), "EARNAPP_DEVICE_UUID");
        assert_eq!(credential_key("my-vendor", "token"), "MY_VENDOR_TOKEN");
    }

    #[test]
    fn test_missing_device_uuid_reported() {
        let catalog = Catalog::builtin().unwrap();
        let err = materialize(&catalog, &enabled(&["earnapp"]), &RawOverrides::new()).unwrap_err();
        let e = err.for_field("device_uuid").unwrap();
        assert_eq!(e.vendor, "earnapp");
        assert_eq!(e.reason, ValidationReason::Missing);
        assert_eq!(e.reason.to_string(), "missing");
    }

    #[test]
    fn test_all_invalid_fields_reported() {
        let catalog = Catalog::builtin().unwrap();
        let mut raw = RawOverrides::new();
        raw.insert("HONEYGAIN_EMAIL", "not-an-email");
        raw.insert("HONEYGAIN_PASSWORD", "short");
        raw.insert("EARNAPP_DEVICE_UUID", "node-123");
        let err = materialize(&catalog, &enabled(&["earnapp", "honeygain"]), &raw).unwrap_err();
        assert_eq!(err.errors().len(), 3);
        assert!(matches!(
            err.for_field("device_uuid").unwrap().reason,
            ValidationReason::BadPrefix { .. }
        ));
        assert!(matches!(
            err.for_field("password").unwrap().reason,
            ValidationReason::TooShort { min: 8 }
        ));
    }

    #[test]
    fn test_valid_set_classifies_secrets() {
        let catalog = Catalog::builtin().unwrap();
        let mut raw = RawOverrides::new();
        raw.insert("EARNAPP_DEVICE_UUID", format!("  {}  ", EARNAPP_UUID));
        raw.insert("PACKETSTREAM_CID", "abc123");
        let set = materialize(&catalog, &enabled(&["earnapp", "packetstream"]), &raw).unwrap();

        let uuid = set.vendor("earnapp").unwrap().get("device_uuid").unwrap();
        assert!(uuid.is_secret());
        assert_eq!(uuid.expose(), EARNAPP_UUID);

        let cid = set.vendor("packetstream").unwrap().get("cid").unwrap();
        assert!(!cid.is_secret());
    }

    #[test]
    fn test_disabled_vendor_not_validated() {
        let catalog = Catalog::builtin().unwrap();
        let set = materialize(&catalog, &enabled(&[]), &RawOverrides::new()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_unknown_vendor() {
        let catalog = Catalog::builtin().unwrap();
        let err = materialize(&catalog, &enabled(&["nosuch"]), &RawOverrides::new()).unwrap_err();
        assert_eq!(err.errors()[0].reason, ValidationReason::UnknownVendor);
    }

    #[test]
    fn test_optional_field_may_be_blank() {
        let catalog = Catalog::builtin().unwrap();
        let mut raw = RawOverrides::new();
        raw.insert("TRAFFMONETIZER_TOKEN", "abcdefghijklmnopqrstuvwxyz");
        raw.insert("TRAFFMONETIZER_DEVICE_NAME", "   ");
        let set = materialize(&catalog, &enabled(&["traffmonetizer"]), &raw).unwrap();
        assert!(set.vendor("traffmonetizer").unwrap().get("device_name").is_none());
    }

    #[test]
    fn test_required_blank_is_empty_not_missing() {
        let catalog = Catalog::builtin().unwrap();
        let mut raw = RawOverrides::new();
        raw.insert("EARNAPP_DEVICE_UUID", "");
        let err = materialize(&catalog, &enabled(&["earnapp"]), &raw).unwrap_err();
        assert_eq!(err.errors()[0].reason, ValidationReason::Empty);
    }

    #[test]
    fn test_parse_assignments() {
        let raw = RawOverrides::parse_assignments(&["A=1", "B=x=y"]).unwrap();
        assert_eq!(raw.get("A"), Some("1"));
        assert_eq!(raw.get("B"), Some("x=y"));
        assert!(RawOverrides::parse_assignments(&["novalue"]).is_err());
        assert!(RawOverrides::parse_assignments(&["=v"]).is_err());
    }

    #[test]
    fn test_merge_later_wins() {
        let mut a = RawOverrides::new();
        a.insert("K", "old");
        a.insert("ONLY_A", "1");
        let mut b = RawOverrides::new();
        b.insert("K", "new");
        let merged = a.merge(b);
        assert_eq!(merged.get("K"), Some("new"));
        assert_eq!(merged.get("ONLY_A"), Some("1"));
    }

    #[test]
    fn test_env_file_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let raw = RawOverrides::from_env_file(&dir.path().join(".env")).unwrap();
        assert!(raw.is_empty());
    }

    #[test]
    fn test_env_file_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "# comment\nREPOCKET_EMAIL=me@example.com\nREPOCKET_API_KEY='k3y-with spaces'\n").unwrap();
        let raw = RawOverrides::from_env_file(&path).unwrap();
        assert_eq!(raw.get("REPOCKET_EMAIL"), Some("me@example.com"));
        assert_eq!(raw.get("REPOCKET_API_KEY"), Some("k3y-with spaces"));
    }

    #[test]
    fn test_debug_hides_values() {
        let mut raw = RawOverrides::new();
        raw.insert("HONEYGAIN_PASSWORD", "hunter22");
        let dbg = format!("{:?}", raw);
        assert!(dbg.contains("HONEYGAIN_PASSWORD"));
        assert!(!dbg.contains("hunter22"));
    }
}
