//! Conversion of raw caption payloads into canonical timestamped lines.
//!
//! Every supported serialization (timedtext XML, WebVTT, SRT, JSON3 and
//! rendered transcript DOM) goes through [`normalize`], which enforces the
//! shared invariants: lines sorted by start time, cleaned non-empty text, and
//! no successful result without at least one line.

mod dom;
mod json3;
mod srt;
mod vtt;
mod xml;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::transcript::Transcript;
use crate::AdapterError;

/// Serialization of a raw caption payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawFormat {
    #[serde(rename = "xml-timedtext")]
    XmlTimedText,
    #[serde(rename = "vtt")]
    Vtt,
    #[serde(rename = "srt")]
    Srt,
    #[serde(rename = "json3")]
    Json3,
    #[serde(rename = "dom-fragments")]
    DomFragments,
}

impl RawFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawFormat::XmlTimedText => "xml-timedtext",
            RawFormat::Vtt => "vtt",
            RawFormat::Srt => "srt",
            RawFormat::Json3 => "json3",
            RawFormat::DomFragments => "dom-fragments",
        }
    }

    /// Map a subtitle file extension to its format
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "vtt" => Some(RawFormat::Vtt),
            "srt" => Some(RawFormat::Srt),
            "json3" | "json" => Some(RawFormat::Json3),
            "xml" | "srv1" | "srv2" | "srv3" | "ttml" => Some(RawFormat::XmlTimedText),
            "html" | "htm" => Some(RawFormat::DomFragments),
            _ => None,
        }
    }

    /// Guess the format of a payload from its content
    pub fn sniff(payload: &str) -> Option<Self> {
        let head = payload.trim_start_matches('\u{feff}').trim_start();

        if head.starts_with("WEBVTT") {
            Some(RawFormat::Vtt)
        } else if head.starts_with('{') {
            Some(RawFormat::Json3)
        } else if head.contains("ytd-transcript-segment-renderer") || head.contains("segment-timestamp") {
            Some(RawFormat::DomFragments)
        } else if head.starts_with("<?xml")
            || head.starts_with("<transcript")
            || head.starts_with("<timedtext")
            || head.contains("<text ")
        {
            Some(RawFormat::XmlTimedText)
        } else if srt_timing_regex().is_match(head) {
            Some(RawFormat::Srt)
        } else if head.contains("-->") {
            Some(RawFormat::Vtt)
        } else {
            None
        }
    }
}

impl fmt::Display for RawFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RawFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xml-timedtext" | "xml" => Ok(RawFormat::XmlTimedText),
            "vtt" | "webvtt" => Ok(RawFormat::Vtt),
            "srt" => Ok(RawFormat::Srt),
            "json3" => Ok(RawFormat::Json3),
            "dom-fragments" | "dom" => Ok(RawFormat::DomFragments),
            other => Err(format!("Unknown subtitle format: {}", other)),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Subtitle payload is empty")]
    Empty,

    #[error("No subtitle lines could be recovered from the {0} payload")]
    NoLines(RawFormat),

    #[error("Malformed {format} payload: {reason}")]
    Malformed { format: RawFormat, reason: String },
}

impl From<NormalizeError> for AdapterError {
    fn from(err: NormalizeError) -> Self {
        AdapterError::parse(err.to_string())
    }
}

/// Parse a raw payload into a transcript whose metadata is left unset
pub fn normalize(payload: &str, format: RawFormat) -> Result<Transcript, NormalizeError> {
    let payload = payload.trim_start_matches('\u{feff}');
    if payload.trim().is_empty() {
        return Err(NormalizeError::Empty);
    }

    let lines = match format {
        RawFormat::XmlTimedText => xml::parse(payload),
        RawFormat::Vtt => vtt::parse(payload),
        RawFormat::Srt => srt::parse(payload),
        RawFormat::Json3 => json3::parse(payload)?,
        RawFormat::DomFragments => dom::parse(payload)?,
    };

    tracing::trace!("Recovered {} lines from {} payload", lines.len(), format);

    if lines.is_empty() {
        return Err(NormalizeError::NoLines(format));
    }

    Ok(Transcript::from_lines(lines))
}

/// Parse a payload whose format is guessed from its content
pub fn normalize_sniffed(payload: &str) -> Result<Transcript, NormalizeError> {
    if payload.trim().is_empty() {
        return Err(NormalizeError::Empty);
    }

    let format = RawFormat::sniff(payload).ok_or_else(|| NormalizeError::Malformed {
        format: RawFormat::XmlTimedText,
        reason: "unrecognised subtitle payload".to_string(),
    })?;

    normalize(payload, format)
}

fn srt_timing_regex() -> &'static Regex {
    static SRT_TIMING: OnceLock<Regex> = OnceLock::new();
    SRT_TIMING.get_or_init(|| {
        Regex::new(r"\d{1,2}:\d{2}:\d{2},\d{3}\s*-->").expect("Failed to compile SRT timing regex")
    })
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    // Element tags plus WebVTT inline timestamps such as <00:00:01.000>
    TAG.get_or_init(|| {
        Regex::new(r"<(?:/?[A-Za-z][^<>]*|\d[\d:.]*)>").expect("Failed to compile tag regex")
    })
}

/// Remove markup tags, leaving bare comparison signs alone
pub(crate) fn strip_tags(text: &str) -> String {
    tag_regex().replace_all(text, "").into_owned()
}

/// Decode the standard HTML entities plus numeric character references
pub(crate) fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        let decoded = tail
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix('x').or_else(|| number.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip markup, decode entities `decode_passes` times and collapse whitespace
pub(crate) fn clean_text(raw: &str, decode_passes: usize) -> String {
    let mut text = strip_tags(raw);
    if decode_passes > 0 {
        for _ in 0..decode_passes {
            text = decode_entities(&text);
        }
        // Escaped markup only becomes visible after decoding
        text = strip_tags(&text);
    }
    collapse_whitespace(&text)
}

/// Parse `HH:MM:SS.mmm`, `MM:SS.mmm`, `H:MM:SS` or `M:SS` (comma or dot fraction)
pub(crate) fn parse_clock(value: &str) -> Option<f64> {
    let value = value.trim().replace(',', ".");
    let parts: Vec<&str> = value.split(':').collect();

    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<f64>().ok()?, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        [m, s] => (0.0, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        _ => return None,
    };

    if hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds).filter(|total| total.is_finite())
}

/// `start --> end [settings]` into start and optional end seconds
pub(crate) fn parse_cue_timing(line: &str) -> Option<(f64, Option<f64>)> {
    let (start, rest) = line.split_once("-->")?;
    let start = parse_clock(start)?;
    let end = rest.split_whitespace().next().and_then(parse_clock);
    Some((start, end))
}
