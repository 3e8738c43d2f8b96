use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

use crate::model::{Reading, StateValue, ValueKind, parse_decimal};

use super::{ExtractContext, element_text, panels, submenu_label};

/// Leading numeric substring plus whatever is left over (the unit).
static VALUE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(-?\d+(?:[.,]\d+)?)\s*(.*)$").expect("static regex")
});

/// Ordered keyword classification on the sanitized key. The first
/// match wins; the order is part of the device's historical behavior.
#[must_use]
pub fn classify_role(key: &str) -> &'static str {
    if key.contains("TEMP")
        || key.contains("FROST")
        || key.starts_with("SOLLWERT_HK")
        || key.starts_with("ISTWERT_HK")
    {
        "value.temperature"
    } else if key.contains("DRUCK") {
        "value.pressure"
    } else if key.starts_with("P_") {
        "value.power"
    } else if key.contains("FEUCHTE") {
        "value.humidity"
    } else {
        "value"
    }
}

/// Walk a values page and yield one numeric Reading per parseable row.
#[must_use]
pub fn extract_values(doc: &Html, ctx: &ExtractContext<'_>) -> Vec<Reading> {
    let Some(submenu) = submenu_label(doc) else {
        log::debug!("Values page without submenu label, nothing to extract");
        return Vec::new();
    };
    let submenu = ctx.group_segment(&submenu);

    let mut readings = Vec::new();
    for panel in panels(doc) {
        let group = ctx.group_segment(&panel.name);
        for row in panel.rows {
            let label = element_text(row.key_cell);
            let text = element_text(row.value_cell);

            let Some(caps) = VALUE_TEXT.captures(&text) else {
                log::debug!("Skipping non-numeric value row {label:?}: {text:?}");
                continue;
            };
            let Some(value) = parse_decimal(&caps[1]) else {
                log::debug!("Skipping non-finite value row {label:?}: {text:?}");
                continue;
            };
            let unit = caps[2].trim().to_string();

            let key = ctx.key_segment(&label);
            if key.is_empty() {
                log::debug!("Skipping row with empty key label");
                continue;
            }

            readings.push(Reading {
                group_path: vec![submenu.clone(), group.clone()],
                role: classify_role(&key).to_string(),
                key,
                display_name: label,
                kind: ValueKind::Number,
                unit,
                value: StateValue::Number(value),
            });
        }
    }
    readings
}
