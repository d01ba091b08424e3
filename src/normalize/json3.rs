use serde::Deserialize;

use super::{collapse_whitespace, NormalizeError, RawFormat};
use crate::transcript::CanonicalLine;

#[derive(Debug, Deserialize)]
struct Json3Document {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    #[serde(default)]
    t_start_ms: Option<f64>,
    #[serde(default)]
    d_duration_ms: Option<f64>,
    #[serde(default)]
    segs: Vec<Json3Segment>,
}

#[derive(Debug, Deserialize)]
struct Json3Segment {
    #[serde(default)]
    utf8: String,
}

/// Parse the `json3` timed-text document; window and style events carry no
/// segments and are ignored.
pub(super) fn parse(payload: &str) -> Result<Vec<CanonicalLine>, NormalizeError> {
    let document: Json3Document =
        serde_json::from_str(payload).map_err(|e| NormalizeError::Malformed {
            format: RawFormat::Json3,
            reason: e.to_string(),
        })?;

    let lines = document
        .events
        .into_iter()
        .filter_map(|event| {
            let start_ms = event.t_start_ms?;
            let text: String = event.segs.iter().map(|seg| seg.utf8.as_str()).collect();
            let end = event.d_duration_ms.map(|duration| (start_ms + duration) / 1000.0);
            CanonicalLine::new(start_ms / 1000.0, collapse_whitespace(&text)).map(|line| line.with_end(end))
        })
        .collect();

    Ok(lines)
}
