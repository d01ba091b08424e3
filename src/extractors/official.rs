use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::SubtitleAdapter;
use crate::config::CredentialsConfig;
use crate::language::{self, LanguagePreference};
use crate::normalize::{self, RawFormat};
use crate::runtime::{HttpFetch, HttpRequest, HttpResponse};
use crate::transcript::{Method, Transcript, TranscriptTrack, VideoId};
use crate::AdapterError;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3/captions";

const QUOTA_REASONS: [&str; 4] = [
    "quotaExceeded",
    "dailyLimitExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
];

const AUTH_REASONS: [&str; 9] = [
    "keyInvalid",
    "keyExpired",
    "forbidden",
    "authError",
    "accessNotConfigured",
    "insufficientPermissions",
    "ipRefererBlocked",
    "unauthorized",
    "required",
];

/// One Data API credential
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    Bearer(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(***)"),
            Credential::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

impl Credential {
    /// API keys first, then OAuth tokens, in configured order
    pub fn from_config(config: &CredentialsConfig) -> Vec<Credential> {
        config
            .api_keys
            .iter()
            .map(|key| Credential::ApiKey(key.clone()))
            .chain(config.oauth_tokens.iter().map(|token| Credential::Bearer(token.clone())))
            .collect()
    }

    fn authorize(&self, mut url: Url) -> HttpRequest {
        match self {
            Credential::ApiKey(key) => {
                url.query_pairs_mut().append_pair("key", key);
                HttpRequest::get(url.to_string())
            }
            Credential::Bearer(token) => {
                HttpRequest::get(url.to_string()).header("Authorization", format!("Bearer {}", token))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CaptionList {
    #[serde(default)]
    items: Vec<CaptionItem>,
}

#[derive(Debug, Deserialize)]
struct CaptionItem {
    id: String,
    snippet: CaptionSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionSnippet {
    language: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    track_kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    reason: String,
}

/// What to do after a failed call with one credential
#[derive(Debug)]
enum CallFailure {
    /// Try the next credential
    Rotate(String),
    /// `captions.download` refused an API key; only OAuth tokens can help
    NeedsOAuth(String),
    /// Give up on this adapter
    Stop(AdapterError),
}

fn error_reasons(body: &str) -> (Vec<String>, String) {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => (
            parsed.error.errors.into_iter().map(|e| e.reason).collect(),
            parsed.error.message,
        ),
        Err(_) => (Vec::new(), String::new()),
    }
}

fn classify_failure(response: &HttpResponse) -> CallFailure {
    let (reasons, message) = error_reasons(&response.body);
    let has_reason = |set: &[&str]| reasons.iter().any(|r| set.contains(&r.as_str()));
    let detail = format!("HTTP {} {} {}", response.status, reasons.join(","), message);

    match response.status {
        404 => CallFailure::Stop(AdapterError::unavailable(detail)),
        _ if reasons.iter().any(|r| r == "videoNotFound") => {
            CallFailure::Stop(AdapterError::unavailable(detail))
        }
        403 | 429 if has_reason(&QUOTA_REASONS) => CallFailure::Rotate(format!("quota: {}", detail)),
        429 => CallFailure::Rotate(format!("quota: {}", detail)),
        401 => CallFailure::Rotate(format!("auth: {}", detail)),
        400 | 403 if has_reason(&AUTH_REASONS) => CallFailure::Rotate(format!("auth: {}", detail)),
        _ => CallFailure::Stop(AdapterError::transport(detail)),
    }
}

/// `captions.download` accepts only OAuth; API keys get 401/403 whichever key is used
fn classify_download_failure(response: &HttpResponse, credential: &Credential) -> CallFailure {
    let (reasons, _) = error_reasons(&response.body);
    let quota = reasons.iter().any(|r| QUOTA_REASONS.contains(&r.as_str()));

    match (credential, response.status) {
        (Credential::ApiKey(_), 401 | 403) if !quota => {
            CallFailure::NeedsOAuth(format!("download requires OAuth (HTTP {})", response.status))
        }
        _ => classify_failure(response),
    }
}

/// YouTube Data API v3 captions with credential rotation
pub struct OfficialCaptionsAdapter {
    http: Arc<dyn HttpFetch>,
    credentials: Vec<Credential>,
    timeout: Duration,
}

impl OfficialCaptionsAdapter {
    pub fn new(http: Arc<dyn HttpFetch>, credentials: Vec<Credential>, timeout: Duration) -> Self {
        Self {
            http,
            credentials,
            timeout,
        }
    }

    async fn send(&self, url: Url, credential: &Credential) -> Result<HttpResponse, CallFailure> {
        self.http
            .fetch(&credential.authorize(url))
            .await
            .map_err(|e| CallFailure::Stop(e.into()))
    }

    async fn call(&self, url: Url, credential: &Credential) -> Result<HttpResponse, CallFailure> {
        let response = self.send(url, credential).await?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(classify_failure(&response))
        }
    }

    async fn list_tracks(
        &self,
        video: &VideoId,
        credential: &Credential,
    ) -> Result<Vec<(String, TranscriptTrack)>, CallFailure> {
        let mut url = Url::parse(API_BASE).map_err(|e| CallFailure::Stop(AdapterError::transport(e.to_string())))?;
        url.query_pairs_mut()
            .append_pair("part", "snippet")
            .append_pair("videoId", video.as_str());

        let response = self.call(url, credential).await?;
        let list: CaptionList = serde_json::from_str(&response.body)
            .map_err(|e| CallFailure::Stop(AdapterError::parse(format!("caption list: {}", e))))?;

        Ok(list
            .items
            .into_iter()
            .map(|item| {
                let display_name = if item.snippet.name.is_empty() {
                    item.snippet.language.clone()
                } else {
                    item.snippet.name.clone()
                };
                let track = TranscriptTrack {
                    language_code: item.snippet.language,
                    display_name,
                    is_auto_generated: item.snippet.track_kind.eq_ignore_ascii_case("asr"),
                    source_locator: item.id.clone(),
                };
                (item.id, track)
            })
            .collect())
    }

    async fn attempt_with(
        &self,
        video: &VideoId,
        prefs: &LanguagePreference,
        credential: &Credential,
    ) -> Result<Transcript, CallFailure> {
        let listed = self.list_tracks(video, credential).await?;
        if listed.is_empty() {
            return Err(CallFailure::Stop(AdapterError::no_captions(format!(
                "no caption tracks listed for {}",
                video
            ))));
        }

        let tracks: Vec<TranscriptTrack> = listed.iter().map(|(_, track)| track.clone()).collect();
        let track = language::select(&tracks, prefs).map_err(CallFailure::Stop)?;

        let mut url = Url::parse(&format!("{}/{}", API_BASE, track.source_locator))
            .map_err(|e| CallFailure::Stop(AdapterError::transport(e.to_string())))?;
        url.query_pairs_mut().append_pair("tfmt", "vtt");

        let response = self.send(url, credential).await?;
        if !response.is_success() {
            return Err(classify_download_failure(&response, credential));
        }
        let format = RawFormat::sniff(&response.body).unwrap_or(RawFormat::Vtt);
        let transcript = normalize::normalize(&response.body, format)
            .map_err(|e| CallFailure::Stop(e.into()))?;

        Ok(transcript.with_track(track))
    }
}

#[async_trait]
impl SubtitleAdapter for OfficialCaptionsAdapter {
    fn method(&self) -> Method {
        Method::OfficialCaptions
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, video: &VideoId, prefs: &LanguagePreference) -> Result<Transcript, AdapterError> {
        if self.credentials.is_empty() {
            return Err(AdapterError::tool_missing("no YouTube API credentials configured"));
        }

        let mut last_reason = String::new();
        let mut oauth_required = None;
        for (index, credential) in self.credentials.iter().enumerate() {
            if oauth_required.is_some() && matches!(credential, Credential::ApiKey(_)) {
                continue;
            }

            match self.attempt_with(video, prefs, credential).await {
                Ok(transcript) => return Ok(transcript),
                Err(CallFailure::Stop(err)) => return Err(err),
                Err(CallFailure::NeedsOAuth(reason)) => {
                    tracing::warn!("API key cannot download captions ({}), skipping remaining keys", reason);
                    oauth_required = Some(reason);
                }
                Err(CallFailure::Rotate(reason)) => {
                    tracing::warn!(
                        "Credential {}/{} rejected ({}), rotating",
                        index + 1,
                        self.credentials.len(),
                        reason
                    );
                    last_reason = reason;
                }
            }
        }

        if let Some(reason) = oauth_required {
            return Err(AdapterError::tool_missing(reason));
        }

        Err(AdapterError::quota(format!(
            "all {} credentials exhausted; last failure {}",
            self.credentials.len(),
            last_reason
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockHttpFetch;
    use crate::ErrorKind;

    const VTT: &str = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\n안녕하세요\n";

    fn video() -> VideoId {
        VideoId::parse("dQw4w9WgXcQ").unwrap()
    }

    fn list_body() -> String {
        serde_json::json!({
            "items": [
                {"id": "cap-en", "snippet": {"language": "en", "name": "", "trackKind": "standard"}},
                {"id": "cap-ko", "snippet": {"language": "ko", "name": "Korean", "trackKind": "asr"}}
            ]
        })
        .to_string()
    }

    fn quota_body() -> String {
        serde_json::json!({
            "error": {"code": 403, "message": "quota", "errors": [{"reason": "quotaExceeded"}]}
        })
        .to_string()
    }

    fn adapter(http: MockHttpFetch, keys: &[&str]) -> OfficialCaptionsAdapter {
        let credentials = keys.iter().map(|k| Credential::ApiKey(k.to_string())).collect();
        OfficialCaptionsAdapter::new(Arc::new(http), credentials, Duration::from_secs(8))
    }

    #[tokio::test]
    async fn test_rotates_past_exhausted_key() {
        let mut http = MockHttpFetch::new();
        http.expect_fetch().returning(|request| {
            if request.url.contains("key=first") {
                Ok(HttpResponse::new(403, quota_body()))
            } else if request.url.contains("/captions/cap-ko") {
                Ok(HttpResponse::new(200, VTT))
            } else {
                Ok(HttpResponse::new(200, list_body()))
            }
        });

        let transcript = adapter(http, &["first", "second"])
            .attempt(&video(), &LanguagePreference::default())
            .await
            .unwrap();

        assert_eq!(transcript.lines[0].text, "안녕하세요");
        assert_eq!(transcript.language_code.as_deref(), Some("ko"));
        assert!(transcript.is_auto_generated);
    }

    #[tokio::test]
    async fn test_all_keys_exhausted_is_quota() {
        let mut http = MockHttpFetch::new();
        http.expect_fetch()
            .times(2)
            .returning(|_| Ok(HttpResponse::new(403, quota_body())));

        let err = adapter(http, &["a", "b"])
            .attempt(&video(), &LanguagePreference::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    }

    #[tokio::test]
    async fn test_missing_video_stops_rotation() {
        let mut http = MockHttpFetch::new();
        http.expect_fetch()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(404, "{}")));

        let err = adapter(http, &["a", "b"])
            .attempt(&video(), &LanguagePreference::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::VideoUnavailable);
    }

    #[tokio::test]
    async fn test_empty_list_is_no_captions() {
        let mut http = MockHttpFetch::new();
        http.expect_fetch()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, r#"{"items": []}"#)));

        let err = adapter(http, &["a", "b"])
            .attempt(&video(), &LanguagePreference::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoCaptionsAvailable);
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let mut http = MockHttpFetch::new();
        http.expect_fetch()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(503, "unavailable")));

        let err = adapter(http, &["a"])
            .attempt(&video(), &LanguagePreference::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportError);
    }

    #[tokio::test]
    async fn test_bearer_token_sent_as_header() {
        let mut http = MockHttpFetch::new();
        http.expect_fetch()
            .withf(|request| {
                request.header_value("Authorization") == Some("Bearer tok") && !request.url.contains("key=")
            })
            .returning(|request| {
                if request.url.contains("/captions/cap-en") {
                    Ok(HttpResponse::new(200, VTT))
                } else {
                    Ok(HttpResponse::new(200, list_body()))
                }
            });

        let adapter = OfficialCaptionsAdapter::new(
            Arc::new(http),
            vec![Credential::Bearer("tok".to_string())],
            Duration::from_secs(8),
        );
        let prefs = LanguagePreference::from_codes(&["en".to_string()]);
        let transcript = adapter.attempt(&video(), &prefs).await.unwrap();
        assert_eq!(transcript.language_code.as_deref(), Some("en"));
        assert_eq!(transcript.language_name.as_deref(), Some("en"));
    }

    fn forbidden_body() -> String {
        serde_json::json!({
            "error": {"code": 403, "message": "forbidden", "errors": [{"reason": "forbidden"}]}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_download_refused_for_api_key_stops_without_rotation() {
        let mut http = MockHttpFetch::new();
        http.expect_fetch()
            .withf(|request| request.url.contains("key=first") && !request.url.contains("/captions/"))
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, list_body())));
        http.expect_fetch()
            .withf(|request| request.url.contains("key=first") && request.url.contains("/captions/cap-ko"))
            .times(1)
            .returning(|_| Ok(HttpResponse::new(403, forbidden_body())));

        let err = adapter(http, &["first", "second"])
            .attempt(&video(), &LanguagePreference::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ToolNotAvailable);
        assert!(err.message.contains("download requires OAuth"), "{}", err.message);
    }

    #[tokio::test]
    async fn test_download_refused_for_api_key_moves_to_oauth_token() {
        let mut http = MockHttpFetch::new();
        http.expect_fetch().times(4).returning(|request| {
            let downloading = request.url.contains("/captions/cap-ko");
            match (request.header_value("Authorization"), downloading) {
                (None, true) => Ok(HttpResponse::new(401, "{}")),
                (Some(_), true) => Ok(HttpResponse::new(200, VTT)),
                _ => Ok(HttpResponse::new(200, list_body())),
            }
        });

        let adapter = OfficialCaptionsAdapter::new(
            Arc::new(http),
            vec![
                Credential::ApiKey("a".to_string()),
                Credential::ApiKey("b".to_string()),
                Credential::Bearer("tok".to_string()),
            ],
            Duration::from_secs(8),
        );
        let transcript = adapter.attempt(&video(), &LanguagePreference::default()).await.unwrap();
        assert_eq!(transcript.lines[0].text, "안녕하세요");
    }

    #[test]
    fn test_download_quota_on_api_key_still_rotates() {
        let failure = classify_download_failure(
            &HttpResponse::new(403, quota_body()),
            &Credential::ApiKey("k".to_string()),
        );
        assert!(matches!(failure, CallFailure::Rotate(_)));

        let bearer = classify_download_failure(
            &HttpResponse::new(401, "{}"),
            &Credential::Bearer("t".to_string()),
        );
        assert!(matches!(bearer, CallFailure::Rotate(_)));
    }

    #[test]
    fn test_auth_reason_rotates() {
        let body = serde_json::json!({"error": {"errors": [{"reason": "keyInvalid"}]}}).to_string();
        assert!(matches!(
            classify_failure(&HttpResponse::new(400, body)),
            CallFailure::Rotate(_)
        ));
        assert!(matches!(
            classify_failure(&HttpResponse::new(400, "{}")),
            CallFailure::Stop(_)
        ));
    }

    #[test]
    fn test_credentials_from_config() {
        let config = CredentialsConfig {
            api_keys: vec!["k".to_string()],
            oauth_tokens: vec!["t".to_string()],
        };
        let credentials = Credential::from_config(&config);
        assert_eq!(
            credentials,
            vec![Credential::ApiKey("k".to_string()), Credential::Bearer("t".to_string())]
        );
        assert_eq!(format!("{:?}", credentials[0]), "ApiKey(***)");
    }
}
