use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

static DELAY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\+(\d+)\s*min\)").expect("valid delay pattern"));
static DISTANCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,.]+)\s*km").expect("valid distance pattern"));
static TRAVEL_TIME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+h:\d+min)").expect("valid travel time pattern"));

pub fn extract_text(node: ElementRef) -> String {
    node.text().collect::<String>()
}

/// Minutes inside a `(+N min)` badge. Anything unparseable counts as on time.
pub fn parse_delay(text: &str) -> u32 {
    DELAY_PATTERN
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0)
}

/// Reads the cumulative distance (second line) and travel time (fourth line) out of
/// the kilometre block shown under a timeline stop.
pub fn parse_distance_and_time(text: &str) -> (Option<f64>, Option<String>) {
    let lines: Vec<&str> = text.trim().split('\n').collect();

    let distance_km = lines.get(1).and_then(|line| {
        DISTANCE_PATTERN
            .captures(line)
            .and_then(|caps| caps[1].replace(',', ".").parse::<f64>().ok())
    });
    let travel_time = lines.get(3).and_then(|line| {
        TRAVEL_TIME_PATTERN
            .captures(line)
            .map(|caps| caps[1].to_string())
    });

    (distance_km, travel_time)
}

/// Splits the `data-obj-1` payload of a difficulties button into
/// `(reason, station label)`.
///
/// The payload looks like `id###Station$...$Reason$...`: the label is the second
/// `###` segment of the first `$` segment, the reason is the third `$` segment.
pub fn parse_difficulty_payload(raw: &str) -> (String, String) {
    let parts: Vec<&str> = raw.split('$').collect();
    let station_label = parts
        .first()
        .and_then(|first| first.split("###").nth(1))
        .unwrap_or_default();
    let reason = parts.get(2).copied().unwrap_or_default();
    (reason.to_string(), station_label.to_string())
}

/// Drops a leading qualifier such as `Stacja:` from a station heading.
pub fn strip_station_qualifier(text: &str) -> String {
    match text.split_once(':') {
        Some((_, name)) => name.trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// The time in a two-line `label\nHH:MM` block; `None` when there is no second line.
pub fn time_from_block(text: &str) -> Option<String> {
    if !text.contains('\n') {
        return None;
    }
    text.split('\n')
        .nth(1)
        .map(str::trim)
        .filter(|time| !time.is_empty())
        .map(String::from)
}

/// All train numbers declared in a results cell, e.g. `"5320 5321"` or `"104,106"`.
/// Tokens that are not numbers come back as errors so callers can log them.
pub fn parse_declared_numbers(text: &str) -> Vec<Result<u32, String>> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == '/')
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<u32>().map_err(|_| token.to_string()))
        .collect()
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
