use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z0-9]{4,20}\b").expect("token regex"));

/// Tokens that carry no signal for search. Lowercase.
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "http", "https", "index", "about", "home", "search", "terms", "title", "www",
        "html", "com", "page", "site",
    ]
    .into_iter()
    .collect()
});

/// Well-known sites whose pages get a fixed seed tag set in the worker path.
static DOMAIN_TAGS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    m.insert(
        "youtube.com",
        &["video", "streaming", "media", "content", "social", "channel", "entertainment", "music"][..],
    );
    m.insert(
        "archive.org",
        &["archive", "internet", "history", "digital", "library"][..],
    );
    m.insert(
        "data.gov",
        &["government", "data", "open", "public", "datasets"][..],
    );
    m.insert(
        "mit.edu",
        &["education", "research", "university", "academic", "science", "technology"][..],
    );
    m.insert(
        "amazon.com",
        &["ecommerce", "retail", "shopping", "online", "marketplace"][..],
    );
    m
});

/// Frequency-based tag extraction over title + visible text + URL.
/// Returns up to `max_tags` tokens, most frequent first; ties keep first
/// occurrence order so the output is deterministic.
pub fn generate_tags(
    text: &str,
    title: Option<&str>,
    url: Option<&str>,
    max_tags: usize,
) -> Vec<String> {
    let combined = format!(
        "{} {} {}",
        title.unwrap_or_default(),
        text,
        url.unwrap_or_default()
    )
    .to_lowercase();

    let mut freq: HashMap<&str, (usize, usize)> = HashMap::new(); // token -> (count, first_seen)
    for (pos, m) in TOKEN_RE.find_iter(&combined).enumerate() {
        let token = m.as_str();
        if STOPWORDS.contains(token) {
            continue;
        }
        let entry = freq.entry(token).or_insert((0, pos));
        entry.0 += 1;
    }

    let mut ranked: Vec<(&str, (usize, usize))> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(max_tags)
        .map(|(t, _)| t.to_string())
        .collect()
}

/// The fallback tags a worker pads with when a page yields too few.
/// A submission consisting of nothing but these is rejected upstream.
pub fn generic_tags(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("web{}", i)).collect()
}

/// True when the tag set is exactly the generic `web0..webN` fallback.
pub fn is_generic_tag_set(tags: &[String]) -> bool {
    !tags.is_empty() && tags == generic_tags(tags.len()).as_slice()
}

/// Registrable-suffix shorthand (`sub.mit.edu` -> `mit.edu`) used to look up
/// per-domain seed tags.
fn domain_key(host: &str) -> String {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1])
    } else {
        host.to_string()
    }
}

/// Coordinator-worker tag composition: per-domain seed tags, URL path/query
/// tokens, then content-frequency tags, padded with the generic fallback up
/// to `min_tags` and capped at `max_tags`.
pub fn compose_worker_tags(
    url: &Url,
    text: Option<&str>,
    title: Option<&str>,
    min_tags: usize,
    max_tags: usize,
) -> Vec<String> {
    let host = url.host_str().unwrap_or_default();
    let key = domain_key(host);

    let mut tags: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push = |tag: String, tags: &mut Vec<String>| {
        if !tag.is_empty() && seen.insert(tag.clone()) {
            tags.push(tag);
        }
    };

    if let Some(seed) = DOMAIN_TAGS.get(key.as_str()) {
        for tag in seed.iter() {
            push(tag.to_string(), &mut tags);
        }
    }

    // URL path + query tokens.
    let path_words = url
        .path()
        .trim_matches('/')
        .replace(['-', '_', '/'], " ")
        .to_lowercase();
    let query_words = url
        .query()
        .unwrap_or_default()
        .replace(['&', '='], " ")
        .to_lowercase();
    for word in path_words.split_whitespace().chain(query_words.split_whitespace()) {
        if word.len() > 2 {
            push(word.to_string(), &mut tags);
        }
    }
    push(key, &mut tags);

    if let Some(text) = text {
        for tag in generate_tags(text, title, Some(url.as_str()), max_tags) {
            push(tag, &mut tags);
        }
    }

    tags.truncate(max_tags);
    if tags.len() < min_tags {
        for filler in generic_tags(min_tags - tags.len()) {
            push(filler, &mut tags);
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_orders_tags() {
        let text = "rust crawler crawler crawler engine engine rust rust rust";
        let tags = generate_tags(text, None, None, 10);
        assert_eq!(tags[0], "rust");
        assert_eq!(tags[1], "crawler");
        assert_eq!(tags[2], "engine");
    }

    #[test]
    fn stopwords_and_short_tokens_are_dropped() {
        let text = "http https index www com ab abc distributed";
        let tags = generate_tags(text, None, None, 10);
        assert_eq!(tags, vec!["distributed"]);
    }

    #[test]
    fn respects_max_tags() {
        let text: String = (0..200).map(|i| format!("token{} ", i)).collect();
        let tags = generate_tags(&text, None, None, 100);
        assert_eq!(tags.len(), 100);
    }

    #[test]
    fn title_and_url_contribute_tokens() {
        let tags = generate_tags("", Some("Quantum Widgets"), Some("http://a.test/gadgets"), 10);
        assert!(tags.contains(&"quantum".to_string()));
        assert!(tags.contains(&"widgets".to_string()));
        assert!(tags.contains(&"gadgets".to_string()));
    }

    #[test]
    fn generic_set_is_detected() {
        assert!(is_generic_tag_set(&generic_tags(20)));
        let mut mixed = generic_tags(19);
        mixed.push("real".to_string());
        assert!(!is_generic_tag_set(&mixed));
        assert!(!is_generic_tag_set(&[]));
    }

    #[test]
    fn worker_tags_meet_the_minimum() {
        let url = Url::parse("http://empty.test/").unwrap();
        let tags = compose_worker_tags(&url, None, None, 20, 40);
        assert!(tags.len() >= 20);
    }

    #[test]
    fn worker_tags_use_url_tokens_and_domain_key() {
        let url = Url::parse("http://www.mit.edu/research/quantum-computing?topic=physics").unwrap();
        let tags = compose_worker_tags(&url, None, None, 20, 40);
        assert!(tags.contains(&"research".to_string()));
        assert!(tags.contains(&"quantum".to_string()));
        assert!(tags.contains(&"computing".to_string()));
        assert!(tags.contains(&"physics".to_string()));
        assert!(tags.contains(&"mit.edu".to_string()));
        // Seed tags for a known domain come first.
        assert_eq!(tags[0], "education");
    }

    #[test]
    fn worker_tags_cap_at_max() {
        let url = Url::parse("http://a.test/words").unwrap();
        let text: String = (0..300).map(|i| format!("token{} ", i)).collect();
        let tags = compose_worker_tags(&url, Some(&text), None, 20, 40);
        assert!(tags.len() <= 40);
    }
}
