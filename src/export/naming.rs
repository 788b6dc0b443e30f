//! File names for exported series.

/// Extension of exported series files.
pub const EXTENSION: &str = "csv";

/// Stem used when a metric name has no usable characters.
const FALLBACK_STEM: &str = "metric";

/// Derive the export file name for a metric identifier.
///
/// ASCII letters, digits, `.`, `-` and `_` are kept; every run of other
/// characters becomes a single `_`. Leading and trailing `_`/`.` are trimmed
/// so the result is never hidden or empty.
pub fn file_name(metric: &str) -> String {
    let mut stem = String::with_capacity(metric.len());
    let mut pending_sep = false;

    for c in metric.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            if pending_sep && !stem.is_empty() {
                stem.push('_');
            }
            pending_sep = false;
            stem.push(c);
        } else {
            pending_sep = true;
        }
    }

    let stem = stem.trim_matches(|c| c == '_' || c == '.');
    let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };

    format!("{stem}.{EXTENSION}")
}
