use super::Voice;
use crate::core::language::base_language;
use log::{debug, warn};

/// Cached snapshot of the platform voice catalog.
///
/// Catalogs can populate late (browsers fill them asynchronously), so the
/// cache may be empty until the first `refresh` with real data.
#[derive(Debug, Clone, Default)]
pub struct VoiceDirectory {
    voices: Vec<Voice>,
}

impl VoiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[Voice] {
        &self.voices
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn refresh(&mut self, catalog: Vec<Voice>) {
        debug!("Voice catalog refreshed: {} voices", catalog.len());
        self.voices = catalog;
    }

    /// Adopts `catalog` when it is non-empty and differs from the cache.
    pub fn sync(&mut self, catalog: Vec<Voice>) -> bool {
        let changed = !catalog.is_empty()
            && (self.voices.len() != catalog.len()
                || self
                    .voices
                    .iter()
                    .zip(&catalog)
                    .any(|(a, b)| a.voice_uri != b.voice_uri));
        if changed {
            self.refresh(catalog);
        }
        changed
    }

    pub fn find(&self, voice_uri: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| v.voice_uri == voice_uri)
    }

    /// Picks a voice for `locale`. `None` means "let the platform decide".
    ///
    /// Precedence: the preferred URI, then on-device voices (exact locale,
    /// then same language), then any voice (exact locale, then same language).
    pub fn select(&self, locale: &str, preferred_uri: Option<&str>) -> Option<&Voice> {
        if let Some(uri) = preferred_uri {
            match self.find(uri) {
                Some(voice) => return Some(voice),
                None => warn!(
                    "Selected voice URI {:?} not found. Falling back to language-based selection.",
                    uri
                ),
            }
        }

        let base = base_language(locale);
        let exact = |v: &&Voice| v.lang.eq_ignore_ascii_case(locale);
        let same_language = |v: &&Voice| base_language(&v.lang).eq_ignore_ascii_case(base);

        let chosen = self
            .voices
            .iter()
            .filter(|v| v.local_service)
            .find(exact)
            .or_else(|| self.voices.iter().filter(|v| v.local_service).find(same_language))
            .or_else(|| self.voices.iter().find(exact))
            .or_else(|| self.voices.iter().find(same_language));

        if chosen.is_none() {
            warn!("No suitable voice found for {}. Using system default.", locale);
        }
        chosen
    }
}
