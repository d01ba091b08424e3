use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{youtube, SubtitleAdapter};
use crate::language::LanguagePreference;
use crate::runtime::HttpFetch;
use crate::transcript::{Method, Transcript, TranscriptTrack, VideoId};
use crate::AdapterError;

/// Where the caption track list can sit inside the watch page, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackSource {
    /// `"captionTracks":[...]`
    CaptionTracks,
    /// `ytInitialPlayerResponse = {...};`
    PlayerResponse,
    /// `"playerCaptionsTracklistRenderer":{...}`
    TracklistRenderer,
}

const TRACK_SOURCES: [(TrackSource, &str); 3] = [
    (TrackSource::CaptionTracks, r#""captionTracks"\s*:\s*\["#),
    (TrackSource::PlayerResponse, r"ytInitialPlayerResponse\s*=\s*\{"),
    (TrackSource::TracklistRenderer, r#""playerCaptionsTracklistRenderer"\s*:\s*\{"#),
];

fn track_source_patterns() -> &'static [(TrackSource, Regex)] {
    static PATTERNS: OnceLock<Vec<(TrackSource, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        TRACK_SOURCES
            .iter()
            .map(|(source, pattern)| {
                (*source, Regex::new(pattern).expect("Failed to compile watch page pattern"))
            })
            .collect()
    })
}

/// Slice the JSON array or object that opens at `start`, honoring strings
fn balanced_json(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes.get(start..)?.iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return text.get(start..start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Caption tracks embedded in a watch page, from the first source that yields any
pub fn extract_tracks(html: &str) -> Vec<TranscriptTrack> {
    for (source, pattern) in track_source_patterns() {
        for found in pattern.find_iter(html) {
            // the match ends on the opening bracket
            let Some(raw) = balanced_json(html, found.end() - 1) else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(raw) else {
                tracing::debug!("{:?} capture is not valid JSON", source);
                continue;
            };

            let tracks = match source {
                TrackSource::CaptionTracks => youtube::tracks_from_json(&value),
                TrackSource::PlayerResponse => youtube::tracks_from_player_response(&value),
                TrackSource::TracklistRenderer => youtube::tracks_from_json(&value["captionTracks"]),
            };

            if !tracks.is_empty() {
                tracing::debug!("Found {} caption tracks via {:?}", tracks.len(), source);
                return tracks;
            }
        }
    }
    Vec::new()
}

/// Reads the caption track list embedded in the watch page HTML
pub struct PageScrapeAdapter {
    http: Arc<dyn HttpFetch>,
    cookies: Option<String>,
    timeout: Duration,
}

impl PageScrapeAdapter {
    pub fn new(http: Arc<dyn HttpFetch>, timeout: Duration) -> Self {
        Self {
            http,
            cookies: None,
            timeout,
        }
    }

    /// Cookie header sent with the page and caption requests
    pub fn with_cookies(mut self, cookies: Option<String>) -> Self {
        self.cookies = cookies;
        self
    }
}

#[async_trait]
impl SubtitleAdapter for PageScrapeAdapter {
    fn method(&self) -> Method {
        Method::PageScrape
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, video: &VideoId, prefs: &LanguagePreference) -> Result<Transcript, AdapterError> {
        let request = youtube::watch_page_request(video, prefs, self.cookies.as_deref());
        let response = self.http.fetch(&request).await?;

        if let Some(err) = youtube::classify_status(&response, "watch page") {
            return Err(err);
        }
        if youtube::is_bot_wall(&response.body) {
            return Err(AdapterError::transport("watch page answered with a bot check"));
        }

        let tracks = extract_tracks(&response.body);
        if tracks.is_empty() {
            return Err(if youtube::is_unplayable_page(&response.body) {
                AdapterError::unavailable(format!("{} is not playable", video))
            } else {
                AdapterError::no_captions(format!("no caption tracks on the watch page of {}", video))
            });
        }

        let mut headers = vec![("User-Agent", youtube::BROWSER_USER_AGENT)];
        if let Some(cookies) = self.cookies.as_deref() {
            headers.push(("Cookie", cookies));
        }

        youtube::fetch_selected_track(self.http.as_ref(), &tracks, prefs, &headers).await
    }
}
