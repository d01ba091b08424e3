use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{youtube, SubtitleAdapter};
use crate::language::LanguagePreference;
use crate::normalize::{self, RawFormat};
use crate::runtime::{BrowserRuntime, HttpFetch};
use crate::transcript::{Method, Transcript, VideoId};
use crate::AdapterError;

/// Runs in the watch page: dismisses consent, enables captions, opens the
/// transcript panel and reports the rendered segments plus the embedded
/// caption tracks as a JSON string.
pub const TRANSCRIPT_SCRIPT: &str = r#"
(async () => {
  const sleep = (ms) => new Promise((resolve) => setTimeout(resolve, ms));
  const click = (selector) => {
    const element = document.querySelector(selector);
    if (element) {
      element.click();
      return true;
    }
    return false;
  };

  const consentButtons = [
    'button[aria-label*="Accept"]',
    'button[aria-label*="동의"]',
    'form[action*="consent"] button',
  ];
  for (const selector of consentButtons) {
    if (click(selector)) {
      await sleep(1500);
      break;
    }
  }

  const toggle = document.querySelector('.ytp-subtitles-button');
  if (toggle && toggle.getAttribute('aria-pressed') === 'false') {
    toggle.click();
  }

  if (click('#description-inline-expander #expand, tp-yt-paper-button#expand')) {
    await sleep(500);
  }
  click('ytd-video-description-transcript-section-renderer button, button[aria-label*="transcript" i]');

  let segments = [];
  for (let i = 0; i < 20; i++) {
    segments = document.querySelectorAll('ytd-transcript-segment-renderer');
    if (segments.length > 0) break;
    await sleep(500);
  }

  const player = window.ytInitialPlayerResponse || {};
  const tracklist = (player.captions || {}).playerCaptionsTracklistRenderer || {};

  return JSON.stringify({
    segmentsHtml: Array.from(segments).map((segment) => segment.outerHTML).join(''),
    captionTracks: tracklist.captionTracks || [],
  });
})()
"#;

/// Drives a real browser through the watch page
pub struct HeadlessBrowserAdapter {
    runtime: Option<Arc<dyn BrowserRuntime>>,
    http: Arc<dyn HttpFetch>,
    timeout: Duration,
}

impl HeadlessBrowserAdapter {
    pub fn new(runtime: Option<Arc<dyn BrowserRuntime>>, http: Arc<dyn HttpFetch>, timeout: Duration) -> Self {
        Self {
            runtime,
            http,
            timeout,
        }
    }
}

#[async_trait]
impl SubtitleAdapter for HeadlessBrowserAdapter {
    fn method(&self) -> Method {
        Method::HeadlessBrowser
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn requires_unrestricted_host(&self) -> bool {
        true
    }

    async fn attempt(&self, video: &VideoId, prefs: &LanguagePreference) -> Result<Transcript, AdapterError> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| AdapterError::tool_missing("no headless browser runtime in this build"))?;

        let page = runtime.evaluate(&video.watch_url(), TRANSCRIPT_SCRIPT).await?;

        let segments_html = page["segmentsHtml"].as_str().unwrap_or_default();
        if !segments_html.trim().is_empty() {
            match normalize::normalize(segments_html, RawFormat::DomFragments) {
                Ok(transcript) => return Ok(transcript),
                Err(e) => tracing::debug!("Rendered transcript panel unusable: {}", e),
            }
        }

        let tracks = youtube::tracks_from_json(&page["captionTracks"]);
        if tracks.is_empty() {
            return Err(AdapterError::no_captions(format!(
                "rendered page of {} offers no transcript",
                video
            )));
        }

        youtube::fetch_selected_track(
            self.http.as_ref(),
            &tracks,
            prefs,
            &[("User-Agent", youtube::BROWSER_USER_AGENT)],
        )
        .await
    }
}
