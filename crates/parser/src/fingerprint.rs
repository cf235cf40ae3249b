use sha2::{Digest, Sha256};
use url::Url;

/// 64-bit simhash over whitespace-separated tokens. Tokens are hashed with
/// SHA-256 (first 8 bytes) so the fingerprint is stable across runs and
/// machines; near-identical text lands within a few bits.
pub fn simhash(text: &str) -> u64 {
    let mut weights = [0i64; 64];
    for token in text.split_whitespace() {
        let h = token_hash(token);
        for (bit, w) in weights.iter_mut().enumerate() {
            if (h >> bit) & 1 == 1 {
                *w += 1;
            } else {
                *w -= 1;
            }
        }
    }

    let mut hash = 0u64;
    for (bit, w) in weights.iter().enumerate() {
        if *w > 0 {
            hash |= 1 << bit;
        }
    }
    hash
}

fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("sha256 output is 32 bytes"))
}

/// Bitwise Hamming distance between two fingerprints.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// URL path with the trailing slash removed, for near-duplicate grouping.
/// `/p` and `/p/` normalize to the same key.
pub fn normalize_url_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().trim_end_matches('/').to_string(),
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simhash_is_deterministic() {
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(simhash(text), simhash(text));
    }

    #[test]
    fn identical_text_has_zero_distance() {
        let a = simhash("some page summary text");
        let b = simhash("some page summary text");
        assert_eq!(hamming_distance(a, b), 0);
    }

    #[test]
    fn near_identical_text_is_closer_than_unrelated() {
        let base: String = (0..60).map(|i| format!("word{} ", i)).collect();
        let a = simhash(&base);
        let b = simhash(&format!("{} extra", base));
        let c = simhash("completely different content about something else entirely");
        assert!(
            hamming_distance(a, b) < hamming_distance(a, c),
            "one extra token out of sixty must stay far closer than unrelated text"
        );
    }

    #[test]
    fn unrelated_text_is_far() {
        let a = simhash("alpha beta gamma delta epsilon zeta eta theta");
        let b = simhash("one two three four five six seven eight nine ten");
        assert!(hamming_distance(a, b) > 3);
    }

    #[test]
    fn empty_text_hashes_to_zero() {
        assert_eq!(simhash(""), 0);
        assert_eq!(simhash("   "), 0);
    }

    #[test]
    fn trailing_slash_is_normalized_away() {
        assert_eq!(
            normalize_url_path("http://y.test/p"),
            normalize_url_path("http://y.test/p/")
        );
        assert_eq!(normalize_url_path("http://y.test/"), "");
        assert_ne!(
            normalize_url_path("http://y.test/p"),
            normalize_url_path("http://y.test/q")
        );
    }
}
