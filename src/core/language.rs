//! Free-text language names to locale tags (`en-US`, `es-MX`, ...).

use log::warn;

pub const DEFAULT_LOCALE: &str = "en-US";

const KNOWN_LANGUAGES: &[(&str, &str)] = &[
    ("english", "en-US"),
    ("english (us)", "en-US"),
    ("english (uk)", "en-GB"),
    ("english (gb)", "en-GB"),
    ("spanish", "es-ES"),
    ("spanish (spain)", "es-ES"),
    ("spanish (mexico)", "es-MX"),
    ("french", "fr-FR"),
    ("french (france)", "fr-FR"),
    ("french (canada)", "fr-CA"),
    ("german", "de-DE"),
    ("japanese", "ja-JP"),
    ("korean", "ko-KR"),
    ("italian", "it-IT"),
    ("portuguese", "pt-BR"),
    ("portuguese (brazil)", "pt-BR"),
    ("portuguese (portugal)", "pt-PT"),
    ("chinese", "zh-CN"),
    ("mandarin", "zh-CN"),
];

// Checked after the exact table, so "english (australia)" still lands on en-US.
const PREFIX_FALLBACKS: &[(&str, &str)] = &[
    ("en", "en-US"),
    ("es", "es-ES"),
    ("fr", "fr-FR"),
    ("de", "de-DE"),
    ("ja", "ja-JP"),
    ("ko", "ko-KR"),
    ("it", "it-IT"),
    ("pt", "pt-BR"),
    ("zh", "zh-CN"),
];

/// Maps a language name such as "Spanish (Mexico)" to a locale tag.
///
/// Never fails: unknown names fall back to [`DEFAULT_LOCALE`].
pub fn to_locale_tag(language: &str) -> String {
    let trimmed = language.trim();
    let lower = trimmed.to_lowercase();

    if let Some((_, tag)) = KNOWN_LANGUAGES.iter().find(|(name, _)| *name == lower) {
        return tag.to_string();
    }

    if let Some(tag) = normalize_locale(trimmed) {
        return tag;
    }

    if let Some((_, tag)) = PREFIX_FALLBACKS
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
    {
        return tag.to_string();
    }

    warn!("Unmapped language: {:?}, defaulting to {}", language, DEFAULT_LOCALE);
    DEFAULT_LOCALE.to_string()
}

/// `xx` or `xx-YY` (region 2-4 alphanumerics) with case normalized.
fn normalize_locale(input: &str) -> Option<String> {
    let mut parts = input.split('-');
    let lang = parts.next()?;
    let region = parts.next();
    if parts.next().is_some() {
        return None;
    }
    if lang.len() != 2 || !lang.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    match region {
        None => Some(lang.to_ascii_lowercase()),
        Some(region)
            if (2..=4).contains(&region.len())
                && region.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            Some(format!(
                "{}-{}",
                lang.to_ascii_lowercase(),
                region.to_ascii_uppercase()
            ))
        }
        Some(_) => None,
    }
}

/// The language subtag of a locale tag: `es` for `es-MX`.
pub fn base_language(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}
