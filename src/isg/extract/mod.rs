//! HTML-to-domain-model extraction.
//!
//! All three extractors share one traversal shape over the gateway's
//! fixed, quirky page layout: the "current submenu" label forms the
//! leading group segment, then each labeled panel table yields a local
//! group name, then the panel's rows are walked in document order. A
//! malformed row or widget is logged and skipped; it never aborts the
//! rest of the page.

mod commands;
mod status;
mod values;

pub use commands::{CommandPage, extract_commands};
pub use status::extract_status;
pub use values::extract_values;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::sanitize::{sanitize_group, sanitize_key};
use crate::store::Translator;

static SUBMENU: LazyLock<Selector> = LazyLock::new(|| sel("#sub_nav li.current a"));
static PANEL: LazyLock<Selector> = LazyLock::new(|| sel("table.info"));
static CAPTION: LazyLock<Selector> = LazyLock::new(|| sel("th.round-top"));
static ROW: LazyLock<Selector> = LazyLock::new(|| sel("tr"));
static KEY_CELL: LazyLock<Selector> = LazyLock::new(|| sel("td.key"));
static VALUE_CELL: LazyLock<Selector> = LazyLock::new(|| sel("td.value"));

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static css selector")
}

/// Shared extraction context: sanitization settings plus the external
/// translation table for group labels.
pub struct ExtractContext<'a> {
    pub avoid_umlauts: bool,
    pub translator: &'a dyn Translator,
}

impl ExtractContext<'_> {
    /// Translate and sanitize a group label into a path segment.
    #[must_use]
    pub fn group_segment(&self, label: &str) -> String {
        let translated = self
            .translator
            .translate(label.trim())
            .unwrap_or_else(|| label.trim().to_string());
        sanitize_group(&translated, self.avoid_umlauts)
    }

    #[must_use]
    pub fn key_segment(&self, label: &str) -> String {
        sanitize_key(label, self.avoid_umlauts)
    }
}

pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// The "current submenu" label, forming the leading group segment.
pub(crate) fn submenu_label(doc: &Html) -> Option<String> {
    doc.select(&SUBMENU)
        .next()
        .map(element_text)
        .filter(|label| !label.is_empty())
}

pub(crate) struct Row<'a> {
    pub key_cell: ElementRef<'a>,
    pub value_cell: ElementRef<'a>,
}

pub(crate) struct Panel<'a> {
    pub name: String,
    pub rows: Vec<Row<'a>>,
}

/// All labeled panels of the page, rows in document order.
pub(crate) fn panels(doc: &Html) -> Vec<Panel<'_>> {
    doc.select(&PANEL)
        .filter_map(|table| {
            let name = element_text(table.select(&CAPTION).next()?);
            if name.is_empty() {
                return None;
            }

            let rows = table
                .select(&ROW)
                .filter_map(|tr| {
                    Some(Row {
                        key_cell: tr.select(&KEY_CELL).next()?,
                        value_cell: tr.select(&VALUE_CELL).next()?,
                    })
                })
                .collect();

            Some(Panel { name, rows })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::store::NoTranslation;

    use super::ExtractContext;

    pub fn ctx() -> ExtractContext<'static> {
        ExtractContext {
            avoid_umlauts: false,
            translator: &NoTranslation,
        }
    }

    /// Wrap panel markup in the fixed page chrome the extractors expect.
    pub fn page(submenu: &str, body: &str) -> String {
        format!(
            r##"<html><body>
            <ul id="sub_nav">
              <li><a href="?s=1,0">ANLAGE</a></li>
              <li class="current"><a href="#">{submenu}</a></li>
            </ul>
            {body}
            </body></html>"##
        )
    }
}
