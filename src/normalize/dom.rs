use scraper::{ElementRef, Html, Selector};

use super::{collapse_whitespace, parse_clock, NormalizeError, RawFormat};
use crate::transcript::CanonicalLine;

/// Segment containers, tried in order; the first selector with any match wins
const SEGMENT_SELECTORS: [&str; 3] = ["ytd-transcript-segment-renderer", "[data-start-ms]", ".segment"];

const TIMESTAMP_SELECTOR: &str = ".segment-timestamp";
const TEXT_SELECTOR: &str = ".segment-text";

fn selector(css: &str) -> Result<Selector, NormalizeError> {
    Selector::parse(css).map_err(|e| NormalizeError::Malformed {
        format: RawFormat::DomFragments,
        reason: format!("invalid selector {}: {}", css, e),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn segment_start(segment: ElementRef<'_>, timestamp: &Selector) -> Option<f64> {
    if let Some(ms) = segment.value().attr("data-start-ms") {
        return ms.trim().parse::<f64>().ok().map(|ms| ms / 1000.0);
    }

    segment
        .select(timestamp)
        .next()
        .and_then(|node| parse_clock(&element_text(node)))
}

fn segment_text(segment: ElementRef<'_>, text: &Selector) -> String {
    match segment.select(text).next() {
        Some(node) => element_text(node),
        None => element_text(segment),
    }
}

/// Parse transcript-panel segments captured from a rendered watch page
pub(super) fn parse(payload: &str) -> Result<Vec<CanonicalLine>, NormalizeError> {
    let document = Html::parse_fragment(payload);
    let timestamp = selector(TIMESTAMP_SELECTOR)?;
    let text = selector(TEXT_SELECTOR)?;

    for css in SEGMENT_SELECTORS {
        let segments = selector(css)?;
        let matched: Vec<ElementRef<'_>> = document.select(&segments).collect();
        if matched.is_empty() {
            continue;
        }

        tracing::trace!("DOM selector {} matched {} segments", css, matched.len());

        return Ok(matched
            .into_iter()
            .filter_map(|segment| {
                let start = segment_start(segment, &timestamp)?;
                CanonicalLine::new(start, segment_text(segment, &text))
            })
            .collect());
    }

    Ok(Vec::new())
}
