use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::model::{
    Command, Reading, StateValue, StatesInput, ValueKind, parse_bound, parse_decimal,
};

use super::values::classify_role;
use super::{ExtractContext, element_text, panels, sel, submenu_label};

static RADIO: LazyLock<Selector> = LazyLock::new(|| sel(r#"input[type="radio"]"#));
static CHECKBOX: LazyLock<Selector> = LazyLock::new(|| sel(r#"input[type="checkbox"]"#));
static LABEL: LazyLock<Selector> = LazyLock::new(|| sel("label"));
static SCRIPT: LazyLock<Selector> = LazyLock::new(|| sel("script"));

/// Inline widget annotation lines: `['min'] = '0';`
static ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\['(\w+)'\]\s*=\s*'([^']*)'").expect("static regex"));

/// Startup-page chart payload: `chart['series'][0]['name'] = '...';`
static CHART_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\['series'\]\[(\d+)\]\['name'\]\s*=\s*'([^']*)'").expect("static regex")
});
static CHART_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\['series'\]\[(\d+)\]\['data'\]\s*=\s*'(\[\[.*?\]\])'").expect("static regex")
});

/// Everything one command/startup page yields: writable Command
/// descriptors from the input widgets, plus Readings from the
/// infographic chart payload when the page carries one.
#[derive(Debug, Default)]
pub struct CommandPage {
    pub commands: Vec<Command>,
    pub readings: Vec<Reading>,
}

/// Unified entry point for the two command-page sub-shapes.
#[must_use]
pub fn extract_commands(doc: &Html, ctx: &ExtractContext<'_>) -> CommandPage {
    let mut out = CommandPage {
        commands: extract_widgets(doc, ctx),
        readings: Vec::new(),
    };
    extract_infographic(doc, ctx, &mut out.readings);
    out
}

fn extract_widgets(doc: &Html, ctx: &ExtractContext<'_>) -> Vec<Command> {
    let Some(submenu) = submenu_label(doc) else {
        return Vec::new();
    };
    let submenu = ctx.group_segment(&submenu);

    let mut commands = Vec::new();
    for panel in panels(doc) {
        let group = ctx.group_segment(&panel.name);
        for row in panel.rows {
            let label = element_text(row.key_cell);
            let group_path = vec![submenu.clone(), group.clone()];
            let result = parse_widget(row.value_cell, ctx, &label, group_path);
            match result {
                Some(command) => commands.push(command),
                None => log::debug!("Skipping row {label:?}: no recognizable input widget"),
            }
        }
    }
    commands
}

/// Annotation lines from all script blocks inside a cell, last one wins.
fn annotations(cell: ElementRef<'_>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for script in cell.select(&SCRIPT) {
        let text = script.text().collect::<String>();
        for caps in ANNOTATION.captures_iter(&text) {
            map.insert(caps[1].to_string(), caps[2].to_string());
        }
    }
    map
}

fn parse_widget(
    cell: ElementRef<'_>,
    ctx: &ExtractContext<'_>,
    label: &str,
    group_path: Vec<String>,
) -> Option<Command> {
    if let Some(command) = parse_radio(cell, ctx, label, &group_path) {
        return Some(command);
    }
    if let Some(command) = parse_checkbox(cell, ctx, label, &group_path) {
        return Some(command);
    }
    parse_slider(cell, ctx, label, &group_path)
}

/// Radio-button mode selector: the checked option is the value, all
/// options become the enumerated-states mapping.
fn parse_radio(
    cell: ElementRef<'_>,
    ctx: &ExtractContext<'_>,
    label: &str,
    group_path: &[String],
) -> Option<Command> {
    let inputs: Vec<_> = cell.select(&RADIO).collect();
    let first = inputs.first()?;
    let source_name = first.value().attr("name")?.to_string();

    // Option labels follow the inputs in document order.
    let labels: Vec<String> = cell.select(&LABEL).map(element_text).collect();

    let mut states = BTreeMap::new();
    let mut selected = None;
    for (index, input) in inputs.iter().enumerate() {
        let Some(code) = input.value().attr("value") else {
            log::debug!("Radio option without value in {label:?}, skipping option");
            continue;
        };
        let option_label = labels.get(index).cloned().unwrap_or_else(|| code.to_string());
        states.insert(code.to_string(), option_label);
        if input.value().attr("checked").is_some() {
            selected = Some(code.to_string());
        }
    }

    let selected = selected?;
    let value = parse_decimal(&selected)
        .map_or(StateValue::Text(selected), StateValue::Number);

    Some(Command {
        group_path: group_path.to_vec(),
        key: ctx.key_segment(label),
        display_name: label.to_string(),
        source_name,
        kind: value.kind(),
        unit: String::new(),
        role: "switch.mode".to_string(),
        value,
        states: Some(states),
        min: None,
        max: None,
    })
}

/// Checkbox ("black box") selector. An optional `['states']` script
/// annotation supplies the code/label mapping in any of its historical
/// shapes; without one the device's plain on/off labels apply.
fn parse_checkbox(
    cell: ElementRef<'_>,
    ctx: &ExtractContext<'_>,
    label: &str,
    group_path: &[String],
) -> Option<Command> {
    let input = cell.select(&CHECKBOX).next()?;
    let source_name = input.value().attr("name")?.to_string();
    let checked = input.value().attr("checked").is_some();

    let states = annotations(cell)
        .remove("states")
        .and_then(|raw| StatesInput::Text(raw).normalize())
        .unwrap_or_else(|| {
            BTreeMap::from([
                ("0".to_string(), "AUS".to_string()),
                ("1".to_string(), "EIN".to_string()),
            ])
        });

    Some(Command {
        group_path: group_path.to_vec(),
        key: ctx.key_segment(label),
        display_name: label.to_string(),
        source_name,
        kind: ValueKind::Number,
        unit: String::new(),
        role: "switch".to_string(),
        value: StateValue::Number(if checked { 1.0 } else { 0.0 }),
        states: Some(states),
        min: None,
        max: None,
    })
}

/// Slider widget carrying inline `['min']/['max']/['val']/['id']`
/// script annotations. Bounds are included only when finite and
/// parseable — never defaulted to zero.
fn parse_slider(
    cell: ElementRef<'_>,
    ctx: &ExtractContext<'_>,
    label: &str,
    group_path: &[String],
) -> Option<Command> {
    let notes = annotations(cell);
    let id = notes.get("id")?;
    let raw_value = notes.get("val")?;

    let Some(value) = parse_decimal(raw_value) else {
        log::debug!("Slider {id:?} with non-numeric value {raw_value:?}, skipping");
        return None;
    };

    let key = ctx.key_segment(id);
    Some(Command {
        group_path: group_path.to_vec(),
        role: classify_role(&key).to_string(),
        key,
        display_name: if label.is_empty() {
            id.clone()
        } else {
            label.to_string()
        },
        source_name: id.clone(),
        kind: ValueKind::Number,
        unit: notes.get("unit").cloned().unwrap_or_default(),
        value: StateValue::Number(value),
        states: None,
        min: notes.get("min").and_then(|raw| parse_bound(raw)),
        max: notes.get("max").and_then(|raw| parse_bound(raw)),
    })
}

/// Startup-page infographic: indexed chart series with time-stamped
/// value pairs. Each series yields a "latest value" Reading plus one
/// Reading per timestamp, grouped under the series name.
fn extract_infographic(doc: &Html, ctx: &ExtractContext<'_>, readings: &mut Vec<Reading>) {
    for script in doc.select(&SCRIPT) {
        let text = script.text().collect::<String>();
        if !text.contains("['series']") {
            continue;
        }

        let mut names = BTreeMap::new();
        for caps in CHART_NAME.captures_iter(&text) {
            names.insert(caps[1].to_string(), caps[2].to_string());
        }

        for caps in CHART_DATA.captures_iter(&text) {
            let index = &caps[1];
            let Some(name) = names.get(index) else {
                log::debug!("Chart series {index} has data but no name, skipping");
                continue;
            };

            let pairs: Vec<(i64, f64)> = match serde_json::from_str(&caps[2]) {
                Ok(pairs) => pairs,
                Err(err) => {
                    log::debug!("Chart series {name:?} with malformed data: {err}");
                    continue;
                }
            };

            let group = ctx.group_segment(name);
            let key = ctx.key_segment(name);
            for (timestamp, value) in &pairs {
                let Some(when) = DateTime::from_timestamp(*timestamp, 0) else {
                    log::debug!("Chart series {name:?} with out-of-range timestamp {timestamp}");
                    continue;
                };
                readings.push(Reading {
                    group_path: vec![group.clone()],
                    key: when.format("%Y%m%d_%H%M").to_string(),
                    display_name: name.clone(),
                    kind: ValueKind::Number,
                    unit: String::new(),
                    role: "value".to_string(),
                    value: StateValue::Number(*value),
                });
            }

            if let Some((_, latest)) = pairs.iter().max_by_key(|(ts, _)| *ts) {
                readings.push(Reading {
                    group_path: Vec::new(),
                    key: key.clone(),
                    display_name: name.clone(),
                    kind: ValueKind::Number,
                    unit: String::new(),
                    role: "value".to_string(),
                    value: StateValue::Number(*latest),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::super::testutil::{ctx, page};
    use super::*;

    fn command_page(rows: &str) -> String {
        page(
            "EINSTELLUNGEN",
            &format!(
                r#"<table class="info">
                  <tr><th class="round-top" colspan="2">HEIZEN</th></tr>
                  {rows}
                </table>"#
            ),
        )
    }

    #[test]
    fn slider_widget_with_bounds() {
        let html = command_page(
            r#"<tr><td class="key">Raumtemperatur Tag</td><td class="value">
              <div class="slider"></div>
              <script>
                aval['id'] = 'RAUMTEMPERATUR';
                aval['min'] = '0';
                aval['max'] = '50';
                aval['val'] = '21,5';
              </script>
            </td></tr>"#,
        );
        let doc = Html::parse_document(&html);
        let out = extract_commands(&doc, &ctx());

        assert_eq!(out.commands.len(), 1);
        let c = &out.commands[0];
        assert_eq!(c.key, "RAUMTEMPERATUR");
        assert_eq!(c.source_name, "RAUMTEMPERATUR");
        assert_eq!(c.min, Some(0.0));
        assert_eq!(c.max, Some(50.0));
        assert_eq!(c.value, StateValue::Number(21.5));
        assert_eq!(c.role, "value.temperature");
    }

    #[test]
    fn slider_with_empty_bounds_omits_them() {
        let html = command_page(
            r#"<tr><td class="key">Hysterese</td><td class="value">
              <script>
                aval['id'] = 'HYSTERESE';
                aval['min'] = '';
                aval['max'] = 'n/a';
                aval['val'] = '3';
              </script>
            </td></tr>"#,
        );
        let doc = Html::parse_document(&html);
        let out = extract_commands(&doc, &ctx());

        let c = &out.commands[0];
        assert_eq!(c.min, None);
        assert_eq!(c.max, None);
        assert_eq!(c.value, StateValue::Number(3.0));
    }

    #[test]
    fn radio_mode_selector() {
        let html = command_page(
            r#"<tr><td class="key">Betriebsart</td><td class="value">
              <input type="radio" name="val100" value="1"><label>Bereitschaft</label>
              <input type="radio" name="val100" value="2" checked><label>Automatik</label>
              <input type="radio" name="val100" value="3"><label>Handbetrieb</label>
            </td></tr>"#,
        );
        let doc = Html::parse_document(&html);
        let out = extract_commands(&doc, &ctx());

        assert_eq!(out.commands.len(), 1);
        let c = &out.commands[0];
        assert_eq!(c.source_name, "val100");
        assert_eq!(c.key, "BETRIEBSART");
        assert_eq!(c.value, StateValue::Number(2.0));
        let states = c.states.as_ref().unwrap();
        assert_eq!(states.len(), 3);
        assert_eq!(states.get("2").unwrap(), "Automatik");
        assert_eq!(c.role, "switch.mode");
    }

    #[test]
    fn radio_without_checked_option_is_skipped() {
        let html = command_page(
            r#"<tr><td class="key">Betriebsart</td><td class="value">
              <input type="radio" name="val100" value="1"><label>A</label>
            </td></tr>"#,
        );
        let doc = Html::parse_document(&html);
        assert!(extract_commands(&doc, &ctx()).commands.is_empty());
    }

    #[test]
    fn checkbox_with_states_annotation() {
        let html = command_page(
            r#"<tr><td class="key">Zweiter Heizkreis</td><td class="value">
              <input type="checkbox" name="val200" checked>
              <script>box['states'] = '0:Inaktiv,1:Aktiv';</script>
            </td></tr>"#,
        );
        let doc = Html::parse_document(&html);
        let out = extract_commands(&doc, &ctx());

        let c = &out.commands[0];
        assert_eq!(c.value, StateValue::Number(1.0));
        assert_eq!(c.states.as_ref().unwrap().get("1").unwrap(), "Aktiv");
    }

    #[test]
    fn checkbox_without_annotation_gets_default_states() {
        let html = command_page(
            r#"<tr><td class="key">Kühlung</td><td class="value">
              <input type="checkbox" name="val201">
            </td></tr>"#,
        );
        let doc = Html::parse_document(&html);
        let out = extract_commands(&doc, &ctx());

        let c = &out.commands[0];
        assert_eq!(c.value, StateValue::Number(0.0));
        assert_eq!(c.states.as_ref().unwrap().get("0").unwrap(), "AUS");
    }

    #[test]
    fn infographic_series_yield_latest_and_per_timestamp_readings() {
        let html = page(
            "ANLAGE",
            r#"<script>
              chart['series'][0]['name'] = 'WP Vorlauf';
              chart['series'][0]['data'] = '[[1700000000,42.5],[1700003600,43.0]]';
            </script>"#,
        );
        let doc = Html::parse_document(&html);
        let out = extract_commands(&doc, &ctx());

        assert!(out.commands.is_empty());
        assert_eq!(out.readings.len(), 3);

        let per_ts: Vec<_> = out
            .readings
            .iter()
            .filter(|r| r.group_path == vec!["WP_Vorlauf"])
            .collect();
        assert_eq!(per_ts.len(), 2);
        assert_eq!(per_ts[0].value, StateValue::Number(42.5));

        let latest = out
            .readings
            .iter()
            .find(|r| r.group_path.is_empty())
            .unwrap();
        assert_eq!(latest.key, "WP_VORLAUF");
        assert_eq!(latest.value, StateValue::Number(43.0));
    }

    #[test]
    fn malformed_widget_does_not_abort_page() {
        let html = command_page(concat!(
            r#"<tr><td class="key">Kaputt</td><td class="value"><script>x['id'] = 'X'; x['val'] = 'oops';</script></td></tr>"#,
            r#"<tr><td class="key">Ok</td><td class="value"><script>y['id'] = 'OK'; y['val'] = '1';</script></td></tr>"#,
        ));
        let doc = Html::parse_document(&html);
        let out = extract_commands(&doc, &ctx());

        assert_eq!(out.commands.len(), 1);
        assert_eq!(out.commands[0].key, "OK");
    }
}
