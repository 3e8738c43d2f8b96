use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Persisted "type" of a state object.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Boolean,
    Number,
    String,
}

/// A scalar state value as written to the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl StateValue {
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Boolean,
            Self::Number(_) => ValueKind::Number,
            Self::Text(_) => ValueKind::String,
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// A read-only observation scraped from one page row (or chart point).
///
/// Re-derived fresh on every poll cycle and persisted by upsert; the
/// value expiry is computed by the reconciler from the owning poll
/// interval, so the record itself stays interval-agnostic.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub group_path: Vec<String>,
    pub key: String,
    pub display_name: String,
    pub kind: ValueKind,
    pub unit: String,
    pub role: String,
    pub value: StateValue,
}

/// A writable setpoint/mode descriptor scraped from an input widget.
///
/// `source_name` is the device-side form field name (`save.php` payload
/// key); `key` is the sanitized label used for the store path.
/// `min`/`max` are `Some` only when the page supplied a finite,
/// parseable number. Absence must never be coerced to zero.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub group_path: Vec<String>,
    pub key: String,
    pub display_name: String,
    pub source_name: String,
    pub kind: ValueKind,
    pub unit: String,
    pub role: String,
    pub value: StateValue,
    pub states: Option<BTreeMap<String, String>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// One entry of the pending command batch, serialized verbatim into the
/// `data` form field of the save-post.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingCommand {
    pub name: String,
    pub value: String,
}

/// The three historical shapes of the "states" field: a native mapping,
/// a JSON-encoded string, or a `"code:label,code:label"` delimited
/// string. Normalized here, at the boundary, before any of it reaches
/// the reconciler.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum StatesInput {
    Map(BTreeMap<String, String>),
    Text(String),
}

impl StatesInput {
    /// Normalize to a single mapping type. An unparseable string logs a
    /// warning and yields `None` rather than failing the whole record.
    #[must_use]
    pub fn normalize(self) -> Option<BTreeMap<String, String>> {
        match self {
            Self::Map(map) => Some(map),
            Self::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                if let Some(map) = parse_states_json(text) {
                    return Some(map);
                }
                if let Some(map) = parse_states_delimited(text) {
                    return Some(map);
                }
                log::warn!("Unparseable states mapping, leaving unset: {text:?}");
                None
            }
        }
    }
}

fn parse_states_json(text: &str) -> Option<BTreeMap<String, String>> {
    if !text.starts_with('{') {
        return None;
    }
    serde_json::from_str(text)
        .ok()
        // Some firmware revisions emit single-quoted pseudo-JSON.
        .or_else(|| serde_json::from_str(&text.replace('\'', "\"")).ok())
}

fn parse_states_delimited(text: &str) -> Option<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for pair in text.split(',') {
        let (code, label) = pair.split_once(':')?;
        map.insert(code.trim().to_string(), label.trim().to_string());
    }
    Some(map)
}

/// Parse a numeric string from the gateway, accepting `,` as the
/// decimal separator. Returns `None` for anything non-finite.
#[must_use]
pub fn parse_decimal(text: &str) -> Option<f64> {
    let text = text.trim().replace(',', ".");
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a bound annotation (`min`/`max`). Empty or non-numeric strings
/// are omitted entirely — historically these were defaulted to zero,
/// which the reconciler now actively repairs.
#[must_use]
pub fn parse_bound(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        log::debug!("Empty bound annotation, omitting");
        return None;
    }
    match parse_decimal(trimmed) {
        Some(v) => Some(v),
        None => {
            log::debug!("Non-numeric bound annotation {trimmed:?}, omitting");
            None
        }
    }
}
