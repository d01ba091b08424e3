use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Length of a canonical YouTube video id
const VIDEO_ID_LEN: usize = 11;

/// Raised when an identifier cannot be resolved to a video id
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid YouTube video id or URL: {0}")]
pub struct InvalidVideoId(pub String);

/// Canonical 11-character YouTube video id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Resolve a bare id or any supported YouTube URL into a video id.
    ///
    /// Accepts `watch?v=`, `youtu.be/`, `embed/`, `v/`, `shorts/` and `live/`
    /// forms, with or without a scheme.
    pub fn parse(input: &str) -> Result<Self, InvalidVideoId> {
        let input = input.trim();

        if is_video_id(input) {
            return Ok(Self(input.to_string()));
        }

        let url_str = if input.starts_with("http://") || input.starts_with("https://") {
            input.to_string()
        } else if input.contains("youtube.com") || input.contains("youtu.be") {
            format!("https://{}", input)
        } else {
            return Err(InvalidVideoId(input.to_string()));
        };

        let url = Url::parse(&url_str).map_err(|_| InvalidVideoId(input.to_string()))?;
        let host = url.host_str().unwrap_or_default().to_lowercase();

        let candidate = if host == "youtu.be" || host.ends_with(".youtu.be") {
            url.path_segments().and_then(|mut segments| segments.next()).map(str::to_string)
        } else if host == "youtube.com" || host.ends_with(".youtube.com") || host == "youtube-nocookie.com" || host.ends_with(".youtube-nocookie.com") {
            url.query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())
                .or_else(|| {
                    let segments: Vec<&str> = url.path_segments()?.collect();
                    match segments.as_slice() {
                        [prefix, id, ..] if matches!(*prefix, "embed" | "v" | "shorts" | "live") => {
                            Some(id.to_string())
                        }
                        _ => None,
                    }
                })
        } else {
            None
        };

        candidate
            .filter(|id| is_video_id(id))
            .map(Self)
            .ok_or_else(|| InvalidVideoId(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Desktop watch page for this video
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl FromStr for VideoId {
    type Err = InvalidVideoId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == VIDEO_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Names of the extraction strategies, in their default priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    OfficialCaptions,
    TranscriptLibrary,
    PageScrape,
    HeadlessBrowser,
    #[serde(rename = "yt-dlp")]
    ExternalDownloader,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::OfficialCaptions,
        Method::TranscriptLibrary,
        Method::PageScrape,
        Method::HeadlessBrowser,
        Method::ExternalDownloader,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::OfficialCaptions => "official-captions",
            Method::TranscriptLibrary => "transcript-library",
            Method::PageScrape => "page-scrape",
            Method::HeadlessBrowser => "headless-browser",
            Method::ExternalDownloader => "yt-dlp",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown extraction method: {}", s))
    }
}

/// One caption track offered for a video, before download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTrack {
    /// BCP-47-ish language code as reported upstream (`ko`, `en-US`, ...)
    pub language_code: String,

    /// Human readable language name
    pub display_name: String,

    /// Produced by speech recognition rather than authored
    pub is_auto_generated: bool,

    /// URL, API handle or file path the payload can be fetched from
    pub source_locator: String,
}

/// A single timestamped subtitle unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLine {
    /// Start time in seconds
    pub start_seconds: f64,

    /// Cleaned text, never empty
    pub text: String,

    /// End time in seconds, when the source format carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_seconds: Option<f64>,
}

impl CanonicalLine {
    /// Build a line, rejecting blank text and clamping negative or non-finite starts to zero
    pub fn new(start_seconds: f64, text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let start_seconds = if start_seconds.is_finite() && start_seconds > 0.0 {
            start_seconds
        } else {
            0.0
        };

        Some(Self {
            start_seconds,
            text: text.to_string(),
            end_seconds: None,
        })
    }

    /// Attach the cue end; ends before the start are ignored
    pub fn with_end(mut self, end_seconds: Option<f64>) -> Self {
        self.end_seconds = end_seconds.filter(|end| end.is_finite() && *end >= self.start_seconds);
        self
    }

    /// `next` repeats this cue as a parsing artifact: same text, starting at the
    /// same time or while this cue is still on screen (rolling captions)
    fn is_repeated_by(&self, next: &CanonicalLine) -> bool {
        if next.text != self.text {
            return false;
        }
        let same_start = (next.start_seconds - self.start_seconds).abs() < SAME_START_EPSILON;
        let within_span = self
            .end_seconds
            .is_some_and(|end| next.start_seconds <= end + SAME_START_EPSILON);
        same_start || within_span
    }
}

/// Starts closer than this are treated as the same instant
const SAME_START_EPSILON: f64 = 0.001;

/// Ordered transcript plus the metadata of the track it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub lines: Vec<CanonicalLine>,

    /// Language code of the source track, when known
    pub language_code: Option<String>,

    /// Display name of the source track, when known
    pub language_name: Option<String>,

    pub is_auto_generated: bool,

    /// Strategy that produced this transcript; set by the orchestrator
    pub method: Option<Method>,
}

impl Transcript {
    /// Build a transcript from parsed lines.
    ///
    /// Lines are sorted by start time (stable). A line repeating the previous
    /// text at the same start, or while the previous cue is still showing, is
    /// a rollover artifact and merges into the earlier line. Repeats at later,
    /// distinct times are kept.
    pub fn from_lines(mut lines: Vec<CanonicalLine>) -> Self {
        lines.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));
        lines.dedup_by(|next, previous| {
            if !previous.is_repeated_by(next) {
                return false;
            }
            if let Some(end) = next.end_seconds {
                previous.end_seconds = Some(previous.end_seconds.map_or(end, |current| current.max(end)));
            }
            true
        });

        Self {
            lines,
            language_code: None,
            language_name: None,
            is_auto_generated: false,
            method: None,
        }
    }

    /// Attach the metadata of the track the lines were read from
    pub fn with_track(mut self, track: &TranscriptTrack) -> Self {
        self.language_code = Some(track.language_code.clone());
        self.language_name = Some(track.display_name.clone());
        self.is_auto_generated = track.is_auto_generated;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}
