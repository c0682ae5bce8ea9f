//! Configuration validation with unknown field detection.

use serde_json::Value;
use std::collections::HashSet;

use crate::catalog::Catalog;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "project",
    "catalog",
    "credentials",
    "vendors",
    "watcher",
    "supervisor",
    "notifications",
    "proxies",
    "system",
    "logging",
];

/// Known fields for each section. Nested as section.field.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("project", &["name", "device_name"]),
    ("credentials", &["env_file", "store_path"]),
    (
        "watcher",
        &[
            "poll_interval_secs",
            "max_concurrency",
            "registry_timeout_secs",
            "notify_on_up_to_date",
            "log_path",
        ],
    ),
    (
        "supervisor",
        &[
            "engine_timeout_secs",
            "pull_timeout_secs",
            "start_grace_secs",
            "immediate_retries",
            "backoff_base_secs",
            "backoff_max_secs",
            "health_interval_secs",
        ],
    ),
    (
        "notifications",
        &["webhook_url", "webhook_token", "timeout_secs"],
    ),
    ("proxies", &["enabled", "urls"]),
    ("system", &["os_map", "arch_map"]),
    ("logging", &["format", "file", "level"]),
];

const KNOWN_VENDOR_SELECTION: &[&str] = &["enabled"];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut matrix = vec![vec![0usize; b.len() + 1]; a.len() + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, val) in matrix[0].iter_mut().enumerate() {
        *val = j;
    }

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            matrix[i + 1][j + 1] = std::cmp::min(
                std::cmp::min(matrix[i][j + 1] + 1, matrix[i + 1][j] + 1),
                matrix[i][j] + cost,
            );
        }
    }
    matrix[a.len()][b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn unknown_field(path: String, key: &str, known: &[&str]) -> Diagnostic {
    let message = match suggest_field(key, known) {
        Some(suggestion) => format!("Unknown field '{}' ({})", key, suggestion),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic {
        level: DiagnosticLevel::Error,
        path,
        message,
    }
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                path: String::new(),
                message: "Config must be a JSON object".to_string(),
            });
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic {
        level: DiagnosticLevel::Ok,
        path: String::new(),
        message: "Valid JSON".to_string(),
    });

    let known_set: HashSet<&str> = KNOWN_TOP_LEVEL.iter().copied().collect();
    let mut has_unknown = false;
    for key in obj.keys() {
        if !known_set.contains(key.as_str()) {
            has_unknown = true;
            diagnostics.push(unknown_field(key.clone(), key, KNOWN_TOP_LEVEL));
        }
    }

    for (section, known) in KNOWN_SECTIONS {
        if let Some(section_obj) = obj.get(*section).and_then(|v| v.as_object()) {
            for key in section_obj.keys() {
                if !known.contains(&key.as_str()) {
                    has_unknown = true;
                    diagnostics.push(unknown_field(format!("{}.{}", section, key), key, known));
                }
            }
        }
    }

    if let Some(vendors) = obj.get("vendors").and_then(|v| v.as_object()) {
        for (vendor, selection) in vendors {
            if let Some(sel) = selection.as_object() {
                for key in sel.keys() {
                    if !KNOWN_VENDOR_SELECTION.contains(&key.as_str()) {
                        has_unknown = true;
                        diagnostics.push(unknown_field(
                            format!("vendors.{}.{}", vendor, key),
                            key,
                            KNOWN_VENDOR_SELECTION,
                        ));
                    }
                }
            }
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Ok,
            path: String::new(),
            message: "All fields recognized".to_string(),
        });
    }

    // Security warnings
    if let Some(notifications) = obj.get("notifications").and_then(|v| v.as_object()) {
        let url = notifications
            .get("webhook_url")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let has_token = notifications
            .get("webhook_token")
            .and_then(|v| v.as_str())
            .is_some_and(|t| !t.is_empty());
        if has_token && url.starts_with("http://") {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Warn,
                path: "notifications.webhook_url".to_string(),
                message: "Bearer token would be sent over plain http".to_string(),
            });
        }
    }

    diagnostics
}

/// Cross-check enabled vendors against the catalog in use.
pub fn validate_vendor_ids(config: &crate::config::Config, catalog: &Catalog) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let ids = catalog.ids();
    for vendor in config.vendors.keys() {
        if catalog.get(vendor).is_none() {
            let suggestion = suggest_field(vendor, &ids);
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                path: format!("vendors.{}", vendor),
                message: match suggestion {
                    Some(s) => format!("Vendor not in catalog ({})", s),
                    None => "Vendor not in catalog".to_string(),
                },
            });
        }
    }
    if config.enabled_vendors().is_empty() {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warn,
            path: "vendors".to_string(),
            message: "No vendor is enabled; `up` will start nothing".to_string(),
        });
    }
    if let Err(e) = config.check() {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Error,
            path: String::new(),
            message: e.to_string(),
        });
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, VendorSelection};
    use serde_json::json;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("watcher", "watcher"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("watcher", "wacher"), 1);
    }

    #[test]
    fn test_levenshtein_different() {
        assert!(levenshtein("proxies", "logging") > 3);
    }

    #[test]
    fn test_suggest_field_match() {
        let result = suggest_field("watchr", KNOWN_TOP_LEVEL);
        assert!(result.unwrap().contains("watcher"));
    }

    #[test]
    fn test_suggest_field_no_match() {
        assert!(suggest_field("xyzabcqq", KNOWN_TOP_LEVEL).is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        let raw = json!({
            "project": {"name": "home"},
            "vendors": {"earnapp": {"enabled": true}},
            "watcher": {"poll_interval_secs": 600}
        });
        let diags = validate_config(&raw);
        assert!(diags.iter().all(|d| d.level != DiagnosticLevel::Error));
        assert!(diags.iter().any(|d| d.message == "All fields recognized"));
    }

    #[test]
    fn test_validate_unknown_top_level() {
        let diags = validate_config(&json!({"vendorz": {}}));
        let err = diags
            .iter()
            .find(|d| d.level == DiagnosticLevel::Error)
            .unwrap();
        assert!(err.message.contains("did you mean 'vendors'?"));
    }

    #[test]
    fn test_validate_unknown_section_field() {
        let diags = validate_config(&json!({"watcher": {"poll_intervall_secs": 60}}));
        assert!(diags
            .iter()
            .any(|d| d.level == DiagnosticLevel::Error && d.path == "watcher.poll_intervall_secs"));
    }

    #[test]
    fn test_validate_unknown_vendor_selection_field() {
        let diags = validate_config(&json!({"vendors": {"earnapp": {"enable": true}}}));
        assert!(diags
            .iter()
            .any(|d| d.level == DiagnosticLevel::Error && d.path == "vendors.earnapp.enable"));
    }

    #[test]
    fn test_validate_token_over_http_warns() {
        let raw = json!({
            "notifications": {"webhook_url": "http://hooks.local/x", "webhook_token": "abc"}
        });
        let diags = validate_config(&raw);
        assert!(diags
            .iter()
            .any(|d| d.level == DiagnosticLevel::Warn && d.message.contains("plain http")));
    }

    #[test]
    fn test_validate_not_an_object() {
        let diags = validate_config(&json!("not an object"));
        assert!(diags.iter().any(|d| {
            d.level == DiagnosticLevel::Error && d.message.contains("must be a JSON object")
        }));
    }

    #[test]
    fn test_validate_vendor_ids_against_catalog() {
        let catalog = Catalog::builtin().unwrap();
        let mut config = Config::default();
        config
            .vendors
            .insert("earnap".into(), VendorSelection { enabled: true });
        let diags = validate_vendor_ids(&config, &catalog);
        let err = diags
            .iter()
            .find(|d| d.level == DiagnosticLevel::Error)
            .unwrap();
        assert!(err.message.contains("earnapp"));
    }

    #[test]
    fn test_validate_vendor_ids_warns_when_nothing_enabled() {
        let catalog = Catalog::builtin().unwrap();
        let diags = validate_vendor_ids(&Config::default(), &catalog);
        assert!(diags.iter().any(|d| d.level == DiagnosticLevel::Warn));
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic {
            level: DiagnosticLevel::Warn,
            path: "vendors".into(),
            message: "empty".into(),
        };
        assert_eq!(d.to_string(), "[WARN] vendors: empty");
    }
}
