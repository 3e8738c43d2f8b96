use scraper::Html;

use crate::model::{Reading, StateValue, ValueKind};

use super::{ExtractContext, element_text, panels, submenu_label};

/// Marker substring the gateway renders into a status cell when the
/// indicator is lit.
const ACTIVE_MARKER: &str = "symbol_an";

/// Walk a status page and yield boolean Readings for lit indicators.
///
/// Rows without the marker are skipped entirely: the page only ever
/// marks "on", so no explicit "off" reading is emitted. This asymmetry
/// is inherited device behavior; stale "on" states age out via the
/// store's value expiry instead.
#[must_use]
pub fn extract_status(doc: &Html, ctx: &ExtractContext<'_>) -> Vec<Reading> {
    let Some(submenu) = submenu_label(doc) else {
        log::debug!("Status page without submenu label, nothing to extract");
        return Vec::new();
    };
    let submenu = ctx.group_segment(&submenu);

    let mut readings = Vec::new();
    for panel in panels(doc) {
        let group = ctx.group_segment(&panel.name);
        for row in panel.rows {
            if !row.value_cell.inner_html().contains(ACTIVE_MARKER) {
                continue;
            }

            let label = element_text(row.key_cell);
            let key = ctx.key_segment(&label);
            if key.is_empty() {
                log::debug!("Skipping status row with empty key label");
                continue;
            }

            readings.push(Reading {
                group_path: vec![submenu.clone(), group.clone()],
                key,
                display_name: label,
                kind: ValueKind::Boolean,
                unit: String::new(),
                role: "indicator.state".to_string(),
                value: StateValue::Bool(true),
            });
        }
    }
    readings
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::super::testutil::{ctx, page};
    use super::*;

    fn status_page(rows: &str) -> String {
        page(
            "ANLAGE",
            &format!(
                r#"<table class="info">
                  <tr><th class="round-top" colspan="2">STATUS</th></tr>
                  {rows}
                </table>"#
            ),
        )
    }

    #[test]
    fn only_marked_rows_emit_and_only_true() {
        let html = status_page(concat!(
            r#"<tr><td class="key">Verdichter</td><td class="value"><img src="pics/symbol_an.png"></td></tr>"#,
            r#"<tr><td class="key">Heizkreispumpe</td><td class="value"><img src="pics/symbol_aus.png"></td></tr>"#,
        ));
        let doc = Html::parse_document(&html);
        let readings = extract_status(&doc, &ctx());

        // The unmarked row yields nothing at all — no explicit "off".
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].key, "VERDICHTER");
        assert_eq!(readings[0].value, StateValue::Bool(true));
        assert_eq!(readings[0].role, "indicator.state");
        assert_eq!(readings[0].kind, ValueKind::Boolean);
    }

    #[test]
    fn page_without_submenu_yields_nothing() {
        let html = r#"<html><body><table class="info"></table></body></html>"#;
        let doc = Html::parse_document(html);
        assert!(extract_status(&doc, &ctx()).is_empty());
    }
}
