/// Detect the language of extracted page text. Returns an ISO 639-3 code,
/// or None when the detector has nothing to work with; callers record
/// "unknown" in that case.
pub fn detect_language(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    whatlang::detect(text).map(|info| info.lang().code().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_english() {
        let text = "The quick brown fox jumps over the lazy dog. \
                    This sentence exists purely to give the detector enough signal.";
        assert_eq!(detect_language(text).as_deref(), Some("eng"));
    }

    #[test]
    fn detects_german() {
        let text = "Der schnelle braune Fuchs springt über den faulen Hund. \
                    Dieser Satz liefert dem Detektor genügend Material.";
        assert_eq!(detect_language(text).as_deref(), Some("deu"));
    }

    #[test]
    fn empty_text_yields_none() {
        assert_eq!(detect_language(""), None);
        assert_eq!(detect_language("   "), None);
    }
}
