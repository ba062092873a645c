use chrono::{DateTime, NaiveDateTime};

const OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Accepted layouts in priority order; day-first wins whenever both readings parse.
const FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S%.f",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d/%m/%Y %I:%M:%S %p",
    "%d-%b-%Y %H:%M:%S%.f",
    "%d %b %Y %H:%M:%S%.f",
    "%d %B %Y %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
];

const ZONE_SUFFIXES: &[&str] = &["IST", "UTC", "GMT", "Z"];

/// Parses a log timestamp as wall-clock time. Zone designators are dropped
/// rather than applied. Returns `None` for anything unrecognizable.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let cleaned = raw.replace(',', " ");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(parsed.naive_local());
    }
    if let Ok(parsed) = DateTime::parse_from_str(cleaned, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(parsed.naive_local());
    }

    let normalized = strip_zone_suffix(cleaned);
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
}

fn strip_zone_suffix(text: &str) -> &str {
    let mut current = text.trim_end();
    for suffix in ZONE_SUFFIXES {
        if let Some(stripped) = current.strip_suffix(suffix) {
            let ends_in_digit = stripped.ends_with(|ch: char| ch.is_ascii_digit());
            if stripped.ends_with(char::is_whitespace) || (*suffix == "Z" && ends_in_digit) {
                current = stripped.trim_end();
                break;
            }
        }
    }
    current
}

pub fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format(OUTPUT_FORMAT).to_string()
}
