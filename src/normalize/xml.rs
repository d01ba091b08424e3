use regex::Regex;
use std::sync::OnceLock;

use super::clean_text;
use crate::transcript::CanonicalLine;

/// Timedtext escapes cue text twice (`&amp;#39;` for an apostrophe)
const XML_DECODE_PASSES: usize = 2;

/// Candidate cue patterns in declaration order, with the factor that turns
/// the captured start value into seconds. The attribute order and quoting of
/// the timedtext endpoint are not stable, so every pattern is applied and the
/// one matching the most cues wins.
const CUE_PATTERNS: [(&str, f64); 4] = [
    // <text start="S" dur="D">
    (r#"(?s)<text\s+start="([^"]*)"(?:[^>]*[^/>])?>(.*?)</text>"#, 1.0),
    // <text dur="D" start="S">
    (r#"(?s)<text\b[^>]*?\sstart="([^"]*)"(?:[^>]*[^/>])?>(.*?)</text>"#, 1.0),
    // <text start='S'>
    (r#"(?s)<text\b[^>]*?\sstart='([^']*)'(?:[^>]*[^/>])?>(.*?)</text>"#, 1.0),
    // srv3: <p t="MS" d="MS">
    (r#"(?s)<p\b[^>]*?\st="([^"]*)"(?:[^>]*[^/>])?>(.*?)</p>"#, 0.001),
];

fn cue_patterns() -> &'static [(Regex, f64)] {
    static PATTERNS: OnceLock<Vec<(Regex, f64)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        CUE_PATTERNS
            .iter()
            .map(|(pattern, scale)| {
                (Regex::new(pattern).expect("Failed to compile timedtext pattern"), *scale)
            })
            .collect()
    })
}

/// Extract `(start_seconds, raw_body)` pairs using one pattern
fn collect_cues<'a>(pattern: &Regex, scale: f64, payload: &'a str) -> Vec<(f64, &'a str)> {
    pattern
        .captures_iter(payload)
        .filter_map(|caps| {
            let start = caps.get(1)?.as_str().trim().parse::<f64>().ok()?;
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            Some((start * scale, body))
        })
        .collect()
}

pub(super) fn parse(payload: &str) -> Vec<CanonicalLine> {
    let mut best: Vec<(f64, &str)> = Vec::new();

    for (index, (pattern, scale)) in cue_patterns().iter().enumerate() {
        let cues = collect_cues(pattern, *scale, payload);
        // strictly greater keeps the earliest pattern on ties
        if cues.len() > best.len() {
            tracing::trace!("Timedtext pattern #{} matched {} cues", index + 1, cues.len());
            best = cues;
        }
    }

    best.into_iter()
        .filter_map(|(start, body)| CanonicalLine::new(start, clean_text(body, XML_DECODE_PASSES)))
        .collect()
}
