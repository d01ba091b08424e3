use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{youtube, SubtitleAdapter};
use crate::language::{LanguagePreference, LocaleCandidate};
use crate::runtime::{HttpFetch, HttpRequest};
use crate::transcript::{Method, Transcript, VideoId};
use crate::AdapterError;

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player";
const CLIENT_NAME: &str = "ANDROID";
const CLIENT_VERSION: &str = "20.10.38";

fn api_key_regex() -> &'static Regex {
    static API_KEY: OnceLock<Regex> = OnceLock::new();
    API_KEY.get_or_init(|| {
        Regex::new(r#""INNERTUBE_API_KEY"\s*:\s*"([A-Za-z0-9_-]+)""#)
            .expect("Failed to compile InnerTube key regex")
    })
}

/// Transcript listing through the InnerTube player API, the route
/// transcript-fetch libraries use
pub struct TranscriptLibraryAdapter {
    http: Arc<dyn HttpFetch>,
    timeout: Duration,
}

impl TranscriptLibraryAdapter {
    pub fn new(http: Arc<dyn HttpFetch>, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    async fn innertube_key(&self, video: &VideoId, prefs: &LanguagePreference) -> Result<String, AdapterError> {
        let response = self
            .http
            .fetch(&youtube::watch_page_request(video, prefs, None))
            .await?;

        if let Some(err) = youtube::classify_status(&response, "watch page") {
            return Err(err);
        }
        if youtube::is_bot_wall(&response.body) {
            return Err(AdapterError::transport("watch page answered with a bot check"));
        }

        match api_key_regex().captures(&response.body) {
            Some(caps) => Ok(caps[1].to_string()),
            None if youtube::is_unplayable_page(&response.body) => {
                Err(AdapterError::unavailable("watch page reports the video as unavailable"))
            }
            None => Err(AdapterError::parse("INNERTUBE_API_KEY not found on watch page")),
        }
    }

    async fn player_response(
        &self,
        video: &VideoId,
        api_key: &str,
        locale: &LocaleCandidate,
    ) -> Result<Value, AdapterError> {
        let mut client = json!({
            "clientName": CLIENT_NAME,
            "clientVersion": CLIENT_VERSION,
        });
        if let Some(language) = &locale.language {
            client["hl"] = json!(language);
        }
        if let Some(region) = &locale.region {
            client["gl"] = json!(region);
        }

        let body = json!({
            "context": { "client": client },
            "videoId": video.as_str(),
        });
        let url = format!("{}?key={}", PLAYER_ENDPOINT, urlencoding::encode(api_key));

        let response = self.http.fetch(&HttpRequest::post_json(url, &body)).await?;
        if let Some(err) = youtube::classify_status(&response, "player API") {
            return Err(err);
        }

        serde_json::from_str(&response.body)
            .map_err(|e| AdapterError::parse(format!("player response: {}", e)))
    }
}

fn playability_failure(player: &Value) -> Option<AdapterError> {
    let status = player["playabilityStatus"]["status"].as_str()?;
    match status {
        "ERROR" | "LOGIN_REQUIRED" | "UNPLAYABLE" => {
            let reason = player["playabilityStatus"]["reason"]
                .as_str()
                .unwrap_or("no reason given");
            Some(AdapterError::unavailable(format!("{}: {}", status, reason)))
        }
        _ => None,
    }
}

#[async_trait]
impl SubtitleAdapter for TranscriptLibraryAdapter {
    fn method(&self) -> Method {
        Method::TranscriptLibrary
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, video: &VideoId, prefs: &LanguagePreference) -> Result<Transcript, AdapterError> {
        let api_key = self.innertube_key(video, prefs).await?;

        for locale in prefs.locale_candidates() {
            tracing::debug!(
                "Listing transcripts with hl={:?} gl={:?}",
                locale.language,
                locale.region
            );

            let player = self.player_response(video, &api_key, &locale).await?;
            if let Some(err) = playability_failure(&player) {
                return Err(err);
            }

            let tracks = youtube::tracks_from_player_response(&player);
            if tracks.is_empty() {
                continue;
            }

            return youtube::fetch_selected_track(self.http.as_ref(), &tracks, prefs, &[]).await;
        }

        Err(AdapterError::no_captions(format!("no transcript listed for {}", video)))
    }
}
