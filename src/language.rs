//! Language tag normalization shared by recognition and synthesis.
//!
//! Engines report languages inconsistently: Whisper gives `en`, hosted transcription
//! APIs give `english`, browsers send `en-US`. Everything is reduced to a lowercase
//! ISO 639-1 base code.

const NAMES: &[(&str, &str)] = &[
    ("english", "en"),
    ("spanish", "es"),
    ("french", "fr"),
    ("german", "de"),
    ("italian", "it"),
    ("portuguese", "pt"),
    ("dutch", "nl"),
    ("russian", "ru"),
    ("chinese", "zh"),
    ("japanese", "ja"),
    ("korean", "ko"),
    ("arabic", "ar"),
    ("hindi", "hi"),
    ("turkish", "tr"),
    ("polish", "pl"),
];

/// Lowercase base code for `tag`: region subtags are dropped and English language
/// names are mapped to codes. Returns an empty string for blank input.
pub fn normalize_language(tag: &str) -> String {
    let tag = tag.trim().to_lowercase();
    let base = tag.split(['-', '_']).next().unwrap_or_default();

    NAMES
        .iter()
        .find(|(name, _)| *name == base)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("en-US"), "en");
        assert_eq!(normalize_language("pt_BR"), "pt");
        assert_eq!(normalize_language("English"), "en");
        assert_eq!(normalize_language(" FR "), "fr");
        assert_eq!(normalize_language("xx"), "xx");
        assert_eq!(normalize_language(""), "");
    }
}
