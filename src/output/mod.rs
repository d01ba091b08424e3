use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cli::OutputFormat;
use crate::pipeline::ExtractionResult;
use crate::transcript::{Method, Transcript, VideoId};
use crate::ErrorKind;

/// `[MM:SS]` for a start offset; minutes keep counting past 99
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("[{:02}:{:02}]", total / 60, total % 60)
}

/// Render a transcript as `[MM:SS] text` lines joined by `\n`
pub fn format_transcript(transcript: &Transcript) -> String {
    transcript
        .lines
        .iter()
        .map(|line| format!("{} {}", format_timestamp(line.start_seconds), line.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Serialized result handed to downstream consumers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleEnvelope {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,

    /// Formatted transcript text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_generated: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments_count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_methods: Option<Vec<Method>>,
}

impl SubtitleEnvelope {
    pub fn from_result(result: &ExtractionResult, video: Option<&VideoId>) -> Self {
        Self::from_result_at(result, video, Utc::now())
    }

    pub fn from_result_at(result: &ExtractionResult, video: Option<&VideoId>, now: DateTime<Utc>) -> Self {
        let video_id = video.map(|id| id.as_str().to_string());

        match result {
            ExtractionResult::Success(transcript) => Self {
                success: true,
                video_id,
                subtitle: Some(format_transcript(transcript)),
                language: transcript.language_name.clone(),
                language_code: transcript.language_code.clone(),
                is_generated: Some(transcript.is_auto_generated),
                method: transcript.method,
                segments_count: Some(transcript.len()),
                extracted_at: Some(now),
                ..Self::default()
            },
            ExtractionResult::Failure(failure) => Self {
                success: false,
                video_id,
                error: Some(failure.kind),
                cause: failure.cause,
                message: Some(failure.message.clone()),
                retryable: Some(failure.is_retryable()),
                attempted_methods: Some(failure.attempted_methods.clone()),
                ..Self::default()
            },
        }
    }
}

/// Render a result in the requested format
pub fn render(result: &ExtractionResult, video: Option<&VideoId>, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(match result {
            ExtractionResult::Success(transcript) => format_transcript(transcript),
            ExtractionResult::Failure(failure) => match failure.cause {
                Some(cause) => format!("error: {} ({}): {}", failure.kind, cause, failure.message),
                None => format!("error: {}: {}", failure.kind, failure.message),
            },
        }),
        OutputFormat::Json => serde_json::to_string_pretty(&SubtitleEnvelope::from_result(result, video))
            .context("Failed to serialize result envelope"),
    }
}

/// Save an extraction result to file
pub async fn save_to_file(
    result: &ExtractionResult,
    video: Option<&VideoId>,
    path: &Path,
    format: &OutputFormat,
) -> Result<()> {
    let content = render(result, video, format)?;
    fs_err::write(path, content)?;
    Ok(())
}

/// Print an extraction result; text-mode failures go to stderr
pub fn print_to_console(result: &ExtractionResult, video: Option<&VideoId>, format: &OutputFormat) -> Result<()> {
    let content = render(result, video, format)?;

    if matches!(format, OutputFormat::Text) && !result.is_success() {
        eprintln!("{}", content);
    } else {
        println!("{}", content);
    }
    Ok(())
}
