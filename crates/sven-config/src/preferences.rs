// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Strictly-keyed runtime preferences, persisted to `config.json`.
//!
//! This is deliberately separate from the YAML [`Config`](crate::Config) the
//! daemon loads at startup: preferences are read and written live, one key at
//! a time, by an operator (or the HTTP API), so the surface is a flat,
//! closed set of dotted keys rather than an arbitrary document.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("unknown preference key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Plain,
    IntList,
    Bool,
}

struct FieldSpec {
    key: &'static str,
    kind: FieldKind,
}

const FIELDS: &[FieldSpec] = &[
    FieldSpec { key: "model.provider", kind: FieldKind::Plain },
    FieldSpec { key: "model.name", kind: FieldKind::Plain },
    FieldSpec { key: "model.api_key", kind: FieldKind::Plain },
    FieldSpec { key: "agent.default_mode", kind: FieldKind::Plain },
    FieldSpec { key: "agent.max_tool_rounds", kind: FieldKind::Plain },
    FieldSpec { key: "scheduler.enabled", kind: FieldKind::Bool },
    FieldSpec { key: "gateway.bearer_token", kind: FieldKind::Plain },
    FieldSpec { key: "gateway.insecure_dev_mode", kind: FieldKind::Bool },
    FieldSpec { key: "telegram.bot_token", kind: FieldKind::Plain },
    FieldSpec { key: "telegram.allowed_ids", kind: FieldKind::IntList },
    FieldSpec { key: "slack.bot_token", kind: FieldKind::Plain },
    FieldSpec { key: "slack.client_secret", kind: FieldKind::Plain },
];

const SENSITIVE_SUFFIXES: &[&str] = &[
    ".api_key",
    ".api_secret",
    ".bearer_token",
    ".client_id",
    ".client_secret",
    ".access_token",
    ".refresh_token",
    ".bot_token",
];

fn field_kind(key: &str) -> Option<FieldKind> {
    FIELDS.iter().find(|f| f.key == key).map(|f| f.kind)
}

fn is_sensitive(key: &str) -> bool {
    SENSITIVE_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
}

/// Strip ASCII control code points (except `\n`/`\t`) and DEL, then trim
/// surrounding whitespace. Applied to sensitive values on both load and set.
fn sanitize_secret(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|&c| {
            let cp = c as u32;
            c == '\n' || c == '\t' || (cp >= 32 && cp != 0x7F)
        })
        .collect();
    filtered.trim().to_string()
}

/// Mask a sensitive value for display: `****` followed by its last 4
/// characters. Counts characters, not bytes, so a value with multi-byte
/// UTF-8 scalars near the tail never splits one in half.
pub fn mask_secret(value: &str) -> String {
    let char_count = value.chars().count();
    if char_count <= 4 {
        "****".to_string()
    } else {
        let tail: String = value.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        format!("****{tail}")
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a comma-separated decimal list, tolerating surrounding whitespace
/// and a trailing comma. Any non-numeric token is a hard failure.
fn parse_int_list(raw: &str) -> Result<Vec<i64>, String> {
    let trimmed = raw.trim().trim_end_matches(',');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|tok| {
            tok.trim()
                .parse::<i64>()
                .map_err(|_| format!("not a decimal integer: {:?}", tok.trim()))
        })
        .collect()
}

fn canonical_int_list(values: &[i64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A loaded preferences document: dotted key -> canonical string value.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    values: BTreeMap<String, String>,
}

impl Preferences {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file is treated as an empty document.
    pub fn load(path: &Path) -> Result<Self, PreferencesError> {
        if !path.is_file() {
            return Ok(Self::empty());
        }
        let raw = fs::read_to_string(path)?;
        let raw = raw.strip_prefix('\u{FEFF}').unwrap_or(&raw);
        let doc: Value = serde_json::from_str(raw)?;

        let mut values = BTreeMap::new();
        flatten(&doc, String::new(), &mut values);
        for (key, value) in values.iter_mut() {
            if is_sensitive(key) {
                *value = sanitize_secret(value);
            }
        }
        Ok(Self { values })
    }

    /// Persist to `path` as nested JSON, creating parent directories as
    /// needed and restricting permissions to 0600.
    pub fn save(&self, path: &Path) -> Result<(), PreferencesError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut doc = Value::Object(serde_json::Map::new());
        for (key, value) in &self.values {
            let leaf = match field_kind(key) {
                Some(FieldKind::IntList) => Value::Array(
                    parse_int_list(value)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|n| Value::Number(n.into()))
                        .collect(),
                ),
                Some(FieldKind::Bool) => Value::Bool(parse_bool(value).unwrap_or(false)),
                _ => Value::String(value.clone()),
            };
            insert_nested(&mut doc, key, leaf);
        }
        let text = serde_json::to_string_pretty(&doc)?;
        fs::write(path, text)?;
        set_private_mode(path)?;
        Ok(())
    }

    /// Read a preference, masked if sensitive. `None` if unset.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| {
            if is_sensitive(key) {
                mask_secret(v)
            } else {
                v.clone()
            }
        })
    }

    /// All preferences, masked for display, in key order.
    pub fn get_all(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| {
                let shown = if is_sensitive(k) { mask_secret(v) } else { v.clone() };
                (k.clone(), shown)
            })
            .collect()
    }

    /// Validate and set one key. Rejects unknown keys and values that fail
    /// their field's parser.
    pub fn set(&mut self, key: &str, raw_value: &str) -> Result<(), PreferencesError> {
        let kind = field_kind(key).ok_or_else(|| PreferencesError::UnknownKey(key.to_string()))?;
        let canonical = match kind {
            FieldKind::Plain => raw_value.to_string(),
            FieldKind::Bool => parse_bool(raw_value)
                .map(|b| b.to_string())
                .ok_or_else(|| PreferencesError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("not a boolean: {raw_value:?}"),
                })?,
            FieldKind::IntList => {
                let parsed = parse_int_list(raw_value).map_err(|reason| PreferencesError::InvalidValue {
                    key: key.to_string(),
                    reason,
                })?;
                canonical_int_list(&parsed)
            }
        };
        let stored = if is_sensitive(key) { sanitize_secret(&canonical) } else { canonical };
        self.values.insert(key.to_string(), stored);
        Ok(())
    }
}

fn flatten(value: &Value, prefix: String, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten(v, key, out);
            }
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|v| match v {
                    Value::Number(n) => n.to_string(),
                    other => other.to_string().trim_matches('"').to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.insert(prefix, joined);
        }
        Value::Bool(b) => {
            out.insert(prefix, b.to_string());
        }
        Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        Value::Number(n) => {
            out.insert(prefix, n.to_string());
        }
        Value::Null => {}
    }
}

fn insert_nested(root: &mut Value, dotted_key: &str, leaf: Value) {
    let parts: Vec<&str> = dotted_key.split('.').collect();
    let mut cursor = root;
    for (i, part) in parts.iter().enumerate() {
        let obj = cursor.as_object_mut().expect("nested preference path is always an object");
        if i == parts.len() - 1 {
            obj.insert(part.to_string(), leaf.clone());
            return;
        }
        cursor = obj
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(unix)]
fn set_private_mode(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_private_mode(_path: &Path) -> io::Result<()> {
    Ok(())
}
