use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use webtrawl_core::{truncate_url, MAX_IMAGES_PER_PAGE};

/// What the extractor pulls out of one HTML document.
#[derive(Debug, Clone, Default)]
pub struct HtmlExtract {
    pub title: Option<String>,
    /// Whitespace-collapsed visible text of the whole document.
    pub text: String,
    /// First 200 chars of `text`, or "No content".
    pub summary: String,
    /// Absolute http(s) links, order-preserving, deduplicated, ≤ 2048 chars.
    pub links: Vec<String>,
    /// First 5 `<img src>` resolved against the base URL.
    pub images: Vec<String>,
}

pub const SUMMARY_MAX_CHARS: usize = 200;
pub const EMPTY_SUMMARY: &str = "No content";

/// Sniff XML-ish content from the first ~1 KB of the body. XML pages are
/// never persisted as pages; only their links are enqueued.
pub fn is_xml_content(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(1000)
        .collect::<String>()
        .to_lowercase();
    head.starts_with("<?xml")
        || head.contains("<rss")
        || head.contains("<sitemap")
        || head.contains("<!doctype xml")
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

/// Parse an HTML document. Never fails: a malformed document degrades to
/// whatever the tolerant parser recovers, with defaults applied by callers.
pub fn parse_html(html_str: &str, base_url: &Url) -> HtmlExtract {
    let document = Html::parse_document(html_str);

    let title = selector("title")
        .and_then(|s| document.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    // Visible text: body if present, else the whole tree (fragments).
    let text = selector("body")
        .and_then(|s| document.select(&s).next())
        .map(|el| collapse_whitespace(el.text()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| collapse_whitespace(document.root_element().text()));

    let summary = summarize(&text);
    let links = extract_links(&document, base_url);
    let images = extract_images(&document, base_url);

    HtmlExtract {
        title,
        text,
        summary,
        links,
        images,
    }
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn summarize(text: &str) -> String {
    if text.is_empty() {
        return EMPTY_SUMMARY.to_string();
    }
    text.chars().take(SUMMARY_MAX_CHARS).collect()
}

/// Resolve an href against the base, keep http(s) only, clamp length.
fn resolve_link(base_url: &Url, href: &str) -> Option<String> {
    let resolved = base_url.join(href).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    let link = resolved.to_string();
    let keep = truncate_url(&link).len();
    let mut link = link;
    link.truncate(keep);
    Some(link)
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for el in document.select(&sel) {
        let Some(link) = el.value().attr("href").and_then(|h| resolve_link(base_url, h))
        else {
            continue;
        };
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}

fn extract_images(document: &Html, base_url: &Url) -> Vec<String> {
    let Some(sel) = selector("img[src]") else {
        return Vec::new();
    };

    document
        .select(&sel)
        .filter_map(|el| el.value().attr("src"))
        .filter_map(|src| base_url.join(src).ok())
        .map(|u| u.to_string())
        .take(MAX_IMAGES_PER_PAGE)
        .collect()
}

static LOC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<loc>\s*([^<]+)\s*</loc>").expect("loc regex")
});

/// Pull links out of XML content: sitemap/RSS `<loc>` entries plus any
/// `<a href>` the tolerant parser recovers (some feeds embed HTML).
pub fn extract_xml_links(body: &str, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for cap in LOC_RE.captures_iter(body) {
        if let Some(link) = resolve_link(base_url, cap[1].trim()) {
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
    }

    let document = Html::parse_document(body);
    if let Some(sel) = selector("a[href]") {
        for el in document.select(&sel) {
            let Some(link) = el.value().attr("href").and_then(|h| resolve_link(base_url, h))
            else {
                continue;
            };
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://a.test/dir/page").unwrap()
    }

    #[test]
    fn detects_xml_content() {
        assert!(is_xml_content("<?xml version=\"1.0\"?><foo/>"));
        assert!(is_xml_content("  <?XML version=\"1.0\"?>"));
        assert!(is_xml_content("<rss version=\"2.0\"><channel/></rss>"));
        assert!(is_xml_content(
            "<sitemapindex><sitemap><loc>http://a.test/s.xml</loc></sitemap></sitemapindex>"
        ));
        assert!(!is_xml_content("<!DOCTYPE html><html></html>"));
        assert!(!is_xml_content("plain text"));
    }

    #[test]
    fn extracts_title_and_summary() {
        let html = "<html><head><title> Hello World </title></head>\
                    <body><p>Some   body\ntext here</p></body></html>";
        let out = parse_html(html, &base());
        assert_eq!(out.title.as_deref(), Some("Hello World"));
        assert_eq!(out.summary, "Some body text here");
    }

    #[test]
    fn empty_body_yields_no_content_summary() {
        let out = parse_html("<html><body></body></html>", &base());
        assert_eq!(out.title, None);
        assert_eq!(out.summary, EMPTY_SUMMARY);
    }

    #[test]
    fn summary_caps_at_200_chars() {
        let text = "word ".repeat(100);
        let html = format!("<html><body><p>{}</p></body></html>", text);
        let out = parse_html(&html, &base());
        assert_eq!(out.summary.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn resolves_and_filters_links() {
        let html = r#"<html><body>
            <a href="/abs">abs</a>
            <a href="rel">rel</a>
            <a href="https://other.test/x">other</a>
            <a href="mailto:me@a.test">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="/abs">dup</a>
        </body></html>"#;
        let out = parse_html(html, &base());
        assert_eq!(
            out.links,
            vec![
                "http://a.test/abs",
                "http://a.test/dir/rel",
                "https://other.test/x",
            ]
        );
    }

    #[test]
    fn oversized_links_are_truncated() {
        let long_path = "x".repeat(3000);
        let html = format!(r#"<a href="/{}">big</a>"#, long_path);
        let out = parse_html(&html, &base());
        assert_eq!(out.links.len(), 1);
        assert_eq!(out.links[0].len(), webtrawl_core::MAX_URL_LEN);
    }

    #[test]
    fn keeps_at_most_five_images() {
        let imgs: String = (0..8)
            .map(|i| format!(r#"<img src="/img{}.png">"#, i))
            .collect();
        let out = parse_html(&format!("<body>{}</body>", imgs), &base());
        assert_eq!(out.images.len(), 5);
        assert_eq!(out.images[0], "http://a.test/img0.png");
    }

    #[test]
    fn sitemap_locs_are_extracted() {
        let xml = "<?xml version=\"1.0\"?><urlset>\
                   <url><loc>http://a.test/one</loc></url>\
                   <url><loc> http://a.test/two </loc></url>\
                   <url><loc>ftp://a.test/skip</loc></url>\
                   </urlset>";
        let links = extract_xml_links(xml, &base());
        assert_eq!(links, vec!["http://a.test/one", "http://a.test/two"]);
    }
}
