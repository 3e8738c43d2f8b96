//! Label sanitization for store paths.
//!
//! The gateway's page labels are free-form German text; the store's
//! path segments must be stable identifiers. The replacement rules are
//! fixed by the device's page layout and must not change between polls,
//! or entity identity is lost.

/// Sanitize a group label: runs of space/hyphen become `_`, periods are
/// stripped, `ß` is always transliterated, umlauts only when configured.
#[must_use]
pub fn sanitize_group(label: &str, avoid_umlauts: bool) -> String {
    let mut out = String::with_capacity(label.len());
    let mut gap = false;
    for ch in label.trim().chars() {
        if ch == ' ' || ch == '-' {
            gap = true;
            continue;
        }
        if gap {
            out.push('_');
            gap = false;
        }
        match ch {
            '.' => {}
            'ß' => out.push_str("ss"),
            'ä' if avoid_umlauts => out.push_str("ae"),
            'ö' if avoid_umlauts => out.push_str("oe"),
            'ü' if avoid_umlauts => out.push_str("ue"),
            'Ä' if avoid_umlauts => out.push_str("Ae"),
            'Ö' if avoid_umlauts => out.push_str("Oe"),
            'Ü' if avoid_umlauts => out.push_str("Ue"),
            _ => out.push(ch),
        }
    }
    out
}

/// Sanitize a key label: group rules plus `*` -> `_` and upper-casing.
#[must_use]
pub fn sanitize_key(label: &str, avoid_umlauts: bool) -> String {
    sanitize_group(label, avoid_umlauts)
        .replace('*', "_")
        .to_uppercase()
}
