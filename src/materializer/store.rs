//! Durable storage for validated credentials.
//!
//! The store is a `.env` style file (default `~/.bandstack/credentials.env`)
//! written atomically with owner-only permissions. It is read back as the
//! lowest-priority input on the next run, so an operator only has to supply
//! a credential once.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{credential_key, CredentialSet, RawOverrides};
use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::error::{BandstackError, Result};

const HEADER: &str = "# Managed by bandstack. Values are validated credentials.\n";

/// Persisted credential file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previously persisted values; empty when nothing was stored yet.
    pub fn load(&self) -> Result<RawOverrides> {
        RawOverrides::from_env_file(&self.path)
    }

    /// Merge `set` into the stored values and write the file atomically.
    ///
    /// Entries for vendors not in `set` are kept, so disabling a vendor does
    /// not forget its credentials.
    pub fn save(&self, set: &CredentialSet) -> Result<usize> {
        let mut updates = RawOverrides::new();
        for (vendor, creds) in set.vendors() {
            for (field, value) in creds.iter() {
                updates.insert(credential_key(vendor, field), value.expose());
            }
        }
        let written = updates.len();
        let merged = self.load()?.merge(updates).into_entries();

        let mut content = String::from(HEADER);
        for (key, value) in &merged {
            if value.contains('\n') || value.contains('\r') {
                return Err(BandstackError::Config(format!(
                    "credential {} contains a line break and cannot be stored",
                    key
                )));
            }
            content.push_str(key);
            content.push('=');
            content.push_str(&quote(value));
            content.push('\n');
        }

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }
        tmp.persist(&self.path).map_err(|e| BandstackError::Io(e.error))?;

        info!(path = %self.path.display(), keys = written, "Credentials persisted");
        log_audit_event(
            AuditCategory::Credentials,
            AuditSeverity::Info,
            "credentials_persisted",
            "",
            &format!("{} key(s) written to {}", written, self.path.display()),
        );
        Ok(written)
    }
}

/// Quote a value so the env-file parser reads it back verbatim.
fn quote(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{}'", value);
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
