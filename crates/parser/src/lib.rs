pub mod fingerprint;
pub mod html;
pub mod lang;
pub mod tags;

pub use fingerprint::{hamming_distance, normalize_url_path, simhash};
pub use html::{extract_xml_links, is_xml_content, parse_html, HtmlExtract};
pub use lang::detect_language;
pub use tags::{compose_worker_tags, generate_tags, generic_tags, is_generic_tag_set};
