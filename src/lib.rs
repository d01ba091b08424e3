//! Subtitle Chain - YouTube subtitle extraction through a chain of fallback strategies
//!
//! This library resolves a video identifier, tries a sequence of extraction
//! strategies (official captions API, InnerTube transcript listing, watch-page
//! scraping, headless browser automation and yt-dlp) until one of them yields a
//! transcript, and renders the result as `[MM:SS] text` lines for downstream
//! consumers such as blog-post generation.

pub mod cli;
pub mod config;
pub mod extractors;
pub mod language;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod runtime;
pub mod transcript;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use extractors::SubtitleAdapter;
pub use language::LanguagePreference;
pub use output::{format_transcript, SubtitleEnvelope};
pub use pipeline::{ExtractOptions, ExtractionFailure, ExtractionResult, SubtitleExtractor};
pub use transcript::{CanonicalLine, Method, Transcript, TranscriptTrack, VideoId};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type used by the application layer
pub type Result<T> = anyhow::Result<T>;

/// Failure taxonomy shared by adapters and the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidVideoId,
    NoCaptionsAvailable,
    VideoUnavailable,
    QuotaExceeded,
    TransportError,
    ParseError,
    ToolNotAvailable,
    AllMethodsFailed,
}

impl ErrorKind {
    /// Machine readable code used in the output envelope
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidVideoId => "INVALID_VIDEO_ID",
            ErrorKind::NoCaptionsAvailable => "NO_CAPTIONS_AVAILABLE",
            ErrorKind::VideoUnavailable => "VIDEO_UNAVAILABLE",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::TransportError => "TRANSPORT_ERROR",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::ToolNotAvailable => "TOOL_NOT_AVAILABLE",
            ErrorKind::AllMethodsFailed => "ALL_METHODS_FAILED",
        }
    }

    /// Retrying the same video will not change the outcome
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            ErrorKind::NoCaptionsAvailable | ErrorKind::VideoUnavailable | ErrorKind::InvalidVideoId
        )
    }

    /// The failure may clear up later or in another environment
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransportError | ErrorKind::QuotaExceeded | ErrorKind::ToolNotAvailable
        )
    }

    /// Rank used when several adapters fail; higher is more actionable
    pub fn specificity(&self) -> u8 {
        match self {
            ErrorKind::VideoUnavailable => 6,
            ErrorKind::NoCaptionsAvailable => 5,
            ErrorKind::QuotaExceeded => 4,
            ErrorKind::ParseError => 3,
            ErrorKind::TransportError => 2,
            ErrorKind::ToolNotAvailable => 1,
            ErrorKind::InvalidVideoId | ErrorKind::AllMethodsFailed => 0,
        }
    }

    /// Short user-facing description
    pub fn describe(&self) -> &'static str {
        match self {
            ErrorKind::InvalidVideoId => "the identifier is not a YouTube video id or URL",
            ErrorKind::NoCaptionsAvailable => "this video has no subtitles",
            ErrorKind::VideoUnavailable => "the video is private, deleted or region locked",
            ErrorKind::QuotaExceeded => "the provider quota is exhausted, retry later",
            ErrorKind::TransportError => "the provider could not be reached, retry later",
            ErrorKind::ParseError => "the subtitle payload could not be parsed",
            ErrorKind::ToolNotAvailable => "no extraction tool is available in this environment",
            ErrorKind::AllMethodsFailed => "every extraction method failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure reported by a single extraction adapter
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_captions(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoCaptionsAvailable, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VideoUnavailable, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    pub fn tool_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolNotAvailable, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specificity_prefers_actionable_kinds() {
        assert!(ErrorKind::VideoUnavailable.specificity() > ErrorKind::TransportError.specificity());
        assert!(ErrorKind::NoCaptionsAvailable.specificity() > ErrorKind::QuotaExceeded.specificity());
        assert!(ErrorKind::TransportError.specificity() > ErrorKind::ToolNotAvailable.specificity());
    }

    #[test]
    fn test_definitive_and_retryable_are_disjoint() {
        let kinds = [
            ErrorKind::InvalidVideoId,
            ErrorKind::NoCaptionsAvailable,
            ErrorKind::VideoUnavailable,
            ErrorKind::QuotaExceeded,
            ErrorKind::TransportError,
            ErrorKind::ParseError,
            ErrorKind::ToolNotAvailable,
            ErrorKind::AllMethodsFailed,
        ];
        for kind in kinds {
            assert!(!(kind.is_definitive() && kind.is_retryable()), "{}", kind);
        }
    }

    #[test]
    fn test_kind_serializes_as_code() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::NoCaptionsAvailable).unwrap(),
            "\"NO_CAPTIONS_AVAILABLE\""
        );
        assert_eq!(ErrorKind::QuotaExceeded.to_string(), "QUOTA_EXCEEDED");
    }
}
