use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::SubtitleAdapter;
use crate::language::{self, LanguagePreference};
use crate::normalize::{self, RawFormat};
use crate::runtime::{ProcessInvocation, ProcessRunner};
use crate::transcript::{Method, Transcript, TranscriptTrack, VideoId};
use crate::{AdapterError, ErrorKind};

/// Extensions yt-dlp uses for subtitle files
const SUBTITLE_EXTENSIONS: [&str; 7] = ["vtt", "srt", "json3", "srv1", "srv2", "srv3", "ttml"];

/// YouTube subtitle download through yt-dlp
pub struct YtDlpAdapter {
    runner: Arc<dyn ProcessRunner>,
    yt_dlp_path: String,
    timeout: Duration,
}

impl YtDlpAdapter {
    pub fn new(runner: Arc<dyn ProcessRunner>, yt_dlp_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            yt_dlp_path: yt_dlp_path.into(),
            timeout,
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        let invocation = ProcessInvocation::new(self.yt_dlp_path.clone(), ["--version"]);
        matches!(self.runner.run(&invocation).await, Ok(output) if output.success())
    }

    /// Caption-only invocation writing `<id>.<lang>.<ext>` files into `dir`.
    /// yt-dlp names manual and automatic captions alike, so each pass asks
    /// for one kind only.
    fn invocation(&self, video: &VideoId, prefs: &LanguagePreference, dir: &Path, pass: SubtitlePass) -> ProcessInvocation {
        let template = dir.join("%(id)s.%(ext)s");
        ProcessInvocation::new(
            self.yt_dlp_path.clone(),
            [
                "--skip-download".to_string(),
                pass.flag().to_string(),
                "--sub-langs".to_string(),
                prefs.sub_langs(),
                "--sub-format".to_string(),
                "vtt/srt/best".to_string(),
                "--no-playlist".to_string(),
                "--output".to_string(),
                template.to_string_lossy().into_owned(),
                "--quiet".to_string(),
                "--no-warnings".to_string(),
                video.watch_url(),
            ],
        )
        .current_dir(dir)
    }

    /// Run one pass in its own temp dir and read the best parseable track
    async fn run_pass(
        &self,
        video: &VideoId,
        prefs: &LanguagePreference,
        pass: SubtitlePass,
    ) -> Result<Transcript, AdapterError> {
        let dir = tempfile::Builder::new()
            .prefix("subtitle-chain-")
            .tempdir()
            .map_err(|e| AdapterError::tool_missing(format!("cannot create temporary directory: {}", e)))?;

        let output = self.runner.run(&self.invocation(video, prefs, dir.path(), pass)).await?;

        // a partial failure can still leave usable files behind
        let tracks = discover_tracks(dir.path(), video, pass)?;
        tracing::debug!("yt-dlp {} pass wrote {} subtitle files", pass, tracks.len());

        if tracks.is_empty() {
            return Err(if output.success() {
                AdapterError::no_captions(format!("yt-dlp found no {} subtitles for {}", pass, video))
            } else {
                classify_stderr(&output.stderr)
            });
        }

        read_best_track(&tracks, prefs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubtitlePass {
    Manual,
    Automatic,
}

impl SubtitlePass {
    fn flag(self) -> &'static str {
        match self {
            SubtitlePass::Manual => "--write-subs",
            SubtitlePass::Automatic => "--write-auto-subs",
        }
    }
}

impl std::fmt::Display for SubtitlePass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtitlePass::Manual => write!(f, "manual"),
            SubtitlePass::Automatic => write!(f, "automatic"),
        }
    }
}

/// Map yt-dlp's stderr to a failure kind
fn classify_stderr(stderr: &str) -> AdapterError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .unwrap_or_else(|| stderr.trim())
        .to_string();

    if stderr.contains("Video unavailable")
        || stderr.contains("Private video")
        || stderr.contains("This video is unavailable")
        || stderr.contains("has been removed")
    {
        AdapterError::unavailable(message)
    } else if stderr.contains("HTTP Error 429") || stderr.contains("Too Many Requests") {
        AdapterError::quota(message)
    } else {
        AdapterError::transport(message)
    }
}

/// Subtitle files yt-dlp wrote for this video, as tracks pointing at the files
fn discover_tracks(dir: &Path, video: &VideoId, pass: SubtitlePass) -> Result<Vec<TranscriptTrack>, AdapterError> {
    let prefix = format!("{}.", video.as_str());
    let entries = fs_err::read_dir(dir).map_err(|e| AdapterError::parse(e.to_string()))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .collect();
    files.sort();

    Ok(files
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let rest = name.strip_prefix(&prefix)?;
            let (language_code, ext) = rest.rsplit_once('.')?;
            if !SUBTITLE_EXTENSIONS.contains(&ext) {
                return None;
            }

            Some(TranscriptTrack {
                language_code: language_code.to_string(),
                display_name: language_code.to_string(),
                is_auto_generated: pass == SubtitlePass::Automatic,
                source_locator: path.to_string_lossy().into_owned(),
            })
        })
        .collect())
}

fn read_track(track: &TranscriptTrack) -> Result<Transcript, AdapterError> {
    let path = Path::new(&track.source_locator);
    let payload = fs_err::read_to_string(path).map_err(|e| AdapterError::parse(e.to_string()))?;

    let format = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(RawFormat::from_extension)
        .or_else(|| RawFormat::sniff(&payload))
        .unwrap_or(RawFormat::Vtt);

    Ok(normalize::normalize(&payload, format)?.with_track(track))
}

/// Read tracks in preference order; an unreadable file falls through to the
/// next one and the first error is reported when none parse
fn read_best_track(tracks: &[TranscriptTrack], prefs: &LanguagePreference) -> Result<Transcript, AdapterError> {
    let mut first_error = None;

    for track in language::rank(tracks, prefs) {
        match read_track(track) {
            Ok(transcript) => return Ok(transcript),
            Err(e) => {
                tracing::debug!("Skipping unreadable subtitle file {}: {}", track.source_locator, e);
                first_error.get_or_insert(e);
            }
        }
    }

    Err(first_error.unwrap_or_else(|| AdapterError::no_captions("no subtitle files to read")))
}

#[async_trait]
impl SubtitleAdapter for YtDlpAdapter {
    fn method(&self) -> Method {
        Method::ExternalDownloader
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn requires_unrestricted_host(&self) -> bool {
        true
    }

    async fn attempt(&self, video: &VideoId, prefs: &LanguagePreference) -> Result<Transcript, AdapterError> {
        match self.run_pass(video, prefs, SubtitlePass::Manual).await {
            Ok(transcript) => Ok(transcript),
            Err(manual) if matches!(manual.kind, ErrorKind::NoCaptionsAvailable | ErrorKind::ParseError) => {
                tracing::debug!("No usable manual subtitles ({}), trying automatic captions", manual);
                match self.run_pass(video, prefs, SubtitlePass::Automatic).await {
                    Err(automatic) if automatic.kind == ErrorKind::NoCaptionsAvailable => Err(manual),
                    other => other,
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockProcessRunner, ProcessError, ProcessOutput};
    use crate::ErrorKind;

    fn video() -> VideoId {
        VideoId::parse("dQw4w9WgXcQ").unwrap()
    }

    fn output_dir(invocation: &ProcessInvocation) -> PathBuf {
        let index = invocation.args.iter().position(|a| a == "--output").unwrap();
        PathBuf::from(&invocation.args[index + 1])
            .parent()
            .unwrap()
            .to_path_buf()
    }

    fn exited(code: i32, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(code),
        }
    }

    #[tokio::test]
    async fn test_discovers_and_selects_written_files() {
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|invocation| {
            assert_eq!(invocation.program, "yt-dlp");
            assert!(invocation.args.contains(&"--skip-download".to_string()));
            assert!(invocation.args.contains(&"--write-subs".to_string()));
            assert!(!invocation.args.contains(&"--write-auto-subs".to_string()));
            assert!(invocation.args.contains(&"ko.*,en.*,ja.*".to_string()));
            assert_eq!(invocation.args.last().unwrap(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");

            let dir = output_dir(invocation);
            std::fs::write(dir.join("dQw4w9WgXcQ.en.vtt"), "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nhello\n").unwrap();
            std::fs::write(dir.join("dQw4w9WgXcQ.ko.srt"), "1\n00:00:03,000 --> 00:00:04,000\n안녕\n").unwrap();
            std::fs::write(dir.join("dQw4w9WgXcQ.info.json"), "{}").unwrap();
            Ok(exited(0, ""))
        });

        let adapter = YtDlpAdapter::new(Arc::new(runner), "yt-dlp", Duration::from_secs(30));
        let transcript = adapter.attempt(&video(), &LanguagePreference::default()).await.unwrap();

        assert_eq!(transcript.lines[0].text, "안녕");
        assert_eq!(transcript.lines[0].start_seconds, 3.0);
        assert_eq!(transcript.language_code.as_deref(), Some("ko"));
        assert!(!transcript.is_auto_generated);
    }

    #[tokio::test]
    async fn test_automatic_captions_after_manual_pass_finds_nothing() {
        let mut seq = mockall::Sequence::new();
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|invocation| {
                assert!(invocation.args.contains(&"--write-subs".to_string()));
                Ok(exited(0, ""))
            });
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|invocation| {
                assert!(invocation.args.contains(&"--write-auto-subs".to_string()));
                assert!(!invocation.args.contains(&"--write-subs".to_string()));
                let dir = output_dir(invocation);
                std::fs::write(dir.join("dQw4w9WgXcQ.ko.vtt"), "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\n자동\n").unwrap();
                Ok(exited(0, ""))
            });

        let adapter = YtDlpAdapter::new(Arc::new(runner), "yt-dlp", Duration::from_secs(30));
        let transcript = adapter.attempt(&video(), &LanguagePreference::default()).await.unwrap();

        assert_eq!(transcript.lines[0].text, "자동");
        assert!(transcript.is_auto_generated);
    }

    #[tokio::test]
    async fn test_unreadable_preferred_file_falls_back_to_next_track() {
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|invocation| {
            let dir = output_dir(invocation);
            std::fs::write(dir.join("dQw4w9WgXcQ.ko.vtt"), "WEBVTT\n\nno cues here\n").unwrap();
            std::fs::write(dir.join("dQw4w9WgXcQ.en.vtt"), "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nhello\n").unwrap();
            Ok(exited(0, ""))
        });

        let adapter = YtDlpAdapter::new(Arc::new(runner), "yt-dlp", Duration::from_secs(30));
        let transcript = adapter.attempt(&video(), &LanguagePreference::default()).await.unwrap();

        assert_eq!(transcript.language_code.as_deref(), Some("en"));
        assert_eq!(transcript.lines[0].text, "hello");
    }

    #[tokio::test]
    async fn test_parse_error_when_no_file_is_readable() {
        let mut seq = mockall::Sequence::new();
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|invocation| {
                let dir = output_dir(invocation);
                std::fs::write(dir.join("dQw4w9WgXcQ.ko.vtt"), "WEBVTT\n\nno cues here\n").unwrap();
                Ok(exited(0, ""))
            });
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(exited(0, "")));

        let adapter = YtDlpAdapter::new(Arc::new(runner), "yt-dlp", Duration::from_secs(30));
        let err = adapter.attempt(&video(), &LanguagePreference::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_not_available() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .returning(|invocation| Err(ProcessError::NotFound(invocation.program.clone())));

        let adapter = YtDlpAdapter::new(Arc::new(runner), "yt-dlp", Duration::from_secs(30));
        let err = adapter.attempt(&video(), &LanguagePreference::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolNotAvailable);
        assert!(!adapter.check_availability().await);
    }

    #[tokio::test]
    async fn test_stderr_classification() {
        let cases = [
            ("ERROR: [youtube] dQw4w9WgXcQ: Private video. Sign in if you've been granted access", ErrorKind::VideoUnavailable),
            ("ERROR: Unable to download video subtitles: HTTP Error 429: Too Many Requests", ErrorKind::QuotaExceeded),
            ("ERROR: unable to connect", ErrorKind::TransportError),
        ];

        for (stderr, expected) in cases {
            let mut runner = MockProcessRunner::new();
            runner.expect_run().returning(move |_| Ok(exited(1, stderr)));

            let adapter = YtDlpAdapter::new(Arc::new(runner), "yt-dlp", Duration::from_secs(30));
            let err = adapter.attempt(&video(), &LanguagePreference::default()).await.unwrap_err();
            assert_eq!(err.kind, expected, "{}", stderr);
        }
    }

    #[tokio::test]
    async fn test_clean_exit_without_files_is_no_captions() {
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(2).returning(|_| Ok(exited(0, "")));

        let adapter = YtDlpAdapter::new(Arc::new(runner), "yt-dlp", Duration::from_secs(30));
        let err = adapter.attempt(&video(), &LanguagePreference::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoCaptionsAvailable);
        assert!(adapter.requires_unrestricted_host());
    }

    #[test]
    fn test_discover_tracks_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dQw4w9WgXcQ.en-orig.vtt"), "x").unwrap();
        std::fs::write(dir.path().join("dQw4w9WgXcQ.webm"), "x").unwrap();
        std::fs::write(dir.path().join("otherVideo1.en.vtt"), "x").unwrap();

        let tracks = discover_tracks(dir.path(), &video(), SubtitlePass::Automatic).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].language_code, "en-orig");
        assert!(tracks[0].is_auto_generated);

        let manual = discover_tracks(dir.path(), &video(), SubtitlePass::Manual).unwrap();
        assert!(!manual[0].is_auto_generated);
    }
}
