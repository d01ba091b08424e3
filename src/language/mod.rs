use serde::{Deserialize, Serialize};

use crate::transcript::TranscriptTrack;
use crate::AdapterError;

/// Ordered language wishes used to pick one caption track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePreference {
    /// Base language code tried first (`ko`)
    pub primary: String,

    /// Region paired with the primary language (`KR`)
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub secondary: Option<String>,

    #[serde(default)]
    pub tertiary: Option<String>,

    /// Further base codes tried after the tertiary language
    #[serde(default)]
    pub extra: Vec<String>,
}

impl Default for LanguagePreference {
    fn default() -> Self {
        Self {
            primary: "ko".to_string(),
            region: Some("KR".to_string()),
            secondary: Some("en".to_string()),
            tertiary: Some("ja".to_string()),
            extra: Vec::new(),
        }
    }
}

/// One `(hl, gl)` pair for locale-sensitive transcript listing.
/// Both unset means "no preference".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleCandidate {
    pub language: Option<String>,
    pub region: Option<String>,
}

impl LanguagePreference {
    /// Build a preference from caller codes such as `ko-KR`, `en`, `ja`.
    ///
    /// The first code sets the primary language (and region when present),
    /// the next two fill the secondary and tertiary slots, the rest become
    /// extras. Blank entries are ignored; no usable code yields the default.
    pub fn from_codes(codes: &[String]) -> Self {
        let mut codes = codes
            .iter()
            .map(|code| code.trim())
            .filter(|code| !code.is_empty());

        let Some(first) = codes.next() else {
            return Self::default();
        };

        let (primary, region) = split_code(first);
        let secondary = codes.next().map(base_language);
        let tertiary = codes.next().map(base_language);
        let extra = codes.map(base_language).collect();

        Self {
            primary,
            region,
            secondary,
            tertiary,
            extra,
        }
    }

    /// Base codes in preference order without duplicates
    pub fn ordered_languages(&self) -> Vec<String> {
        let mut ordered: Vec<String> = Vec::new();
        let candidates = std::iter::once(self.primary.as_str())
            .chain(self.secondary.as_deref())
            .chain(self.tertiary.as_deref())
            .chain(self.extra.iter().map(String::as_str));

        for code in candidates {
            let base = base_language(code);
            if !base.is_empty() && !ordered.contains(&base) {
                ordered.push(base);
            }
        }
        ordered
    }

    /// Locale candidates for the transcript-library adapter:
    /// `(primary, region)`, `(primary)`, `(secondary)`, `(tertiary)`, then no preference.
    pub fn locale_candidates(&self) -> Vec<LocaleCandidate> {
        let mut candidates = Vec::new();
        let primary = base_language(&self.primary);

        if let Some(region) = &self.region {
            candidates.push(LocaleCandidate {
                language: Some(primary.clone()),
                region: Some(region.to_uppercase()),
            });
        }
        candidates.push(LocaleCandidate {
            language: Some(primary),
            region: None,
        });
        for code in [&self.secondary, &self.tertiary].into_iter().flatten() {
            candidates.push(LocaleCandidate {
                language: Some(base_language(code)),
                region: None,
            });
        }
        candidates.push(LocaleCandidate {
            language: None,
            region: None,
        });

        candidates.dedup();
        candidates
    }

    /// Value for yt-dlp's `--sub-langs`, e.g. `ko.*,en.*,ja.*`
    pub fn sub_langs(&self) -> String {
        self.ordered_languages()
            .iter()
            .map(|code| format!("{}.*", code))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Pick the best track for the preference.
///
/// Tiers: exact `primary-region`, primary base language, secondary,
/// tertiary, extras, then any track. Within a tier upstream order is kept
/// except that human-authored tracks beat auto-generated ones.
pub fn select<'a>(
    tracks: &'a [TranscriptTrack],
    prefs: &LanguagePreference,
) -> Result<&'a TranscriptTrack, AdapterError> {
    let track = rank(tracks, prefs)
        .into_iter()
        .next()
        .ok_or_else(|| AdapterError::no_captions("no caption tracks offered"))?;
    tracing::debug!("Selected track {}", track.language_code);
    Ok(track)
}

/// Every track, best first, ordered the way [`select`] chooses.
/// Callers that can fail on a chosen track fall back along this order.
pub fn rank<'a>(tracks: &'a [TranscriptTrack], prefs: &LanguagePreference) -> Vec<&'a TranscriptTrack> {
    let exact_locale = prefs
        .region
        .as_ref()
        .map(|region| normalize_code(&format!("{}-{}", prefs.primary, region)));
    let languages = prefs.ordered_languages();

    let tier = |track: &TranscriptTrack| -> usize {
        if exact_locale.as_deref() == Some(normalize_code(&track.language_code).as_str()) {
            return 0;
        }
        let base = base_language(&track.language_code);
        match languages.iter().position(|language| *language == base) {
            Some(index) => index + 1,
            None => languages.len() + 1,
        }
    };

    let mut ranked: Vec<&TranscriptTrack> = tracks.iter().collect();
    // stable: upstream order survives inside a tier
    ranked.sort_by_key(|track| (tier(track), track.is_auto_generated));
    ranked
}

/// Lowercase and unify `_` to `-`
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase().replace('_', "-")
}

/// `en-US` -> `en`
pub fn base_language(code: &str) -> String {
    normalize_code(code)
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn split_code(code: &str) -> (String, Option<String>) {
    let normalized = normalize_code(code);
    match normalized.split_once('-') {
        Some((language, region)) if !region.is_empty() => {
            (language.to_string(), Some(region.to_uppercase()))
        }
        _ => (normalized, None),
    }
}
