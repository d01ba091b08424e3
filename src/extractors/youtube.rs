//! Helpers shared by the adapters that talk to youtube.com directly.

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::language::{self, LanguagePreference};
use crate::normalize::{self, RawFormat};
use crate::runtime::{HttpFetch, HttpRequest, HttpResponse};
use crate::transcript::{Transcript, TranscriptTrack, VideoId};
use crate::AdapterError;

/// Desktop Chrome identity used for page requests
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Watch page request with browser-like headers
pub fn watch_page_request(video: &VideoId, prefs: &LanguagePreference, cookies: Option<&str>) -> HttpRequest {
    let mut request = HttpRequest::get(video.watch_url())
        .header("User-Agent", BROWSER_USER_AGENT)
        .header("Accept", HTML_ACCEPT)
        .header("Accept-Language", accept_language(prefs));

    if let Some(cookies) = cookies {
        request = request.header("Cookie", cookies);
    }
    request
}

/// `ko-KR,ko;q=0.9,en;q=0.8,ja;q=0.7` style header for the preference
pub fn accept_language(prefs: &LanguagePreference) -> String {
    let mut parts = Vec::new();
    let languages = prefs.ordered_languages();

    if let (Some(primary), Some(region)) = (languages.first(), &prefs.region) {
        parts.push(format!("{}-{}", primary, region));
    }

    let mut quality = 9;
    for language in &languages {
        if parts.is_empty() {
            parts.push(language.clone());
        } else {
            parts.push(format!("{};q=0.{}", language, quality));
            quality = (quality - 1).max(1);
        }
    }
    parts.join(",")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionTrackJson {
    base_url: String,
    language_code: String,
    #[serde(default)]
    name: Option<CaptionName>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    vss_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionName {
    #[serde(default)]
    simple_text: Option<String>,
    #[serde(default)]
    runs: Vec<CaptionRun>,
}

#[derive(Debug, Deserialize)]
struct CaptionRun {
    text: String,
}

impl CaptionName {
    fn text(&self) -> Option<String> {
        self.simple_text.clone().or_else(|| {
            let joined: String = self.runs.iter().map(|run| run.text.as_str()).collect();
            (!joined.is_empty()).then_some(joined)
        })
    }
}

/// Convert a `captionTracks` JSON array into tracks; malformed entries are skipped
pub fn tracks_from_json(value: &Value) -> Vec<TranscriptTrack> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| serde_json::from_value::<CaptionTrackJson>(entry.clone()).ok())
        .map(|track| {
            let is_auto_generated = track.kind.as_deref() == Some("asr")
                || track.vss_id.as_deref().is_some_and(|id| id.starts_with("a."));
            let display_name = track
                .name
                .as_ref()
                .and_then(CaptionName::text)
                .unwrap_or_else(|| track.language_code.clone());

            TranscriptTrack {
                language_code: track.language_code,
                display_name,
                is_auto_generated,
                source_locator: strip_format_param(&track.base_url),
            }
        })
        .collect()
}

/// Tracks listed in a player response object
pub fn tracks_from_player_response(player: &Value) -> Vec<TranscriptTrack> {
    tracks_from_json(&player["captions"]["playerCaptionsTracklistRenderer"]["captionTracks"])
}

/// Drop the `fmt` query parameter so the endpoint serves classic timedtext XML
pub fn strip_format_param(url: &str) -> String {
    let unescaped = url.replace("\\u0026", "&");
    match Url::parse(&unescaped) {
        Ok(mut parsed) => {
            let pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(key, _)| key != "fmt")
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            if pairs.is_empty() {
                parsed.set_query(None);
            } else {
                parsed.query_pairs_mut().clear().extend_pairs(pairs);
            }
            parsed.to_string()
        }
        Err(_) => unescaped,
    }
}

/// Map a non-success status from a youtube.com endpoint to its failure kind
pub fn classify_status(response: &HttpResponse, context: &str) -> Option<AdapterError> {
    if response.is_success() {
        return None;
    }

    let message = format!("{} returned HTTP {}", context, response.status);
    Some(match response.status {
        429 => AdapterError::quota(message),
        404 | 410 => AdapterError::unavailable(message),
        _ => AdapterError::transport(message),
    })
}

/// Detect a bot-check interstitial instead of the real page
pub fn is_bot_wall(html: &str) -> bool {
    html.contains("g-recaptcha") || html.contains("www.google.com/recaptcha")
}

/// Markers of a private, removed or blocked video on the watch page
pub fn is_unplayable_page(html: &str) -> bool {
    const MARKERS: [&str; 5] = [
        "\"status\":\"ERROR\"",
        "\"status\":\"LOGIN_REQUIRED\"",
        "\"status\":\"UNPLAYABLE\"",
        "Video unavailable",
        "Private video",
    ];
    MARKERS.iter().any(|marker| html.contains(marker))
}

/// Pick a track, download it and normalize the payload
pub async fn fetch_selected_track(
    http: &dyn HttpFetch,
    tracks: &[TranscriptTrack],
    prefs: &LanguagePreference,
    extra_headers: &[(&str, &str)],
) -> Result<Transcript, AdapterError> {
    let track = language::select(tracks, prefs)?;
    download_track(http, track, extra_headers).await
}

/// Download one caption track and normalize it, format sniffed from content
pub async fn download_track(
    http: &dyn HttpFetch,
    track: &TranscriptTrack,
    extra_headers: &[(&str, &str)],
) -> Result<Transcript, AdapterError> {
    tracing::debug!(
        "Downloading {} track ({})",
        track.language_code,
        if track.is_auto_generated { "auto-generated" } else { "manual" }
    );

    let mut request = HttpRequest::get(track.source_locator.clone());
    for (name, value) in extra_headers {
        request = request.header(*name, *value);
    }

    let response = http.fetch(&request).await?;
    if let Some(err) = classify_status(&response, "caption download") {
        return Err(err);
    }

    let format = RawFormat::sniff(&response.body).unwrap_or(RawFormat::XmlTimedText);
    let transcript = normalize::normalize(&response.body, format)?;
    Ok(transcript.with_track(track))
}
