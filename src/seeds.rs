use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};

/// Parse seed-file content: one URL per line, blank lines and `#` comments
/// ignored, duplicates collapsed keeping the first occurrence.
pub fn parse_seed_lines(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_string()))
        .map(|line| line.to_string())
        .collect()
}

pub fn load_seed_file(path: &str) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read seed file {}", path))?;
    Ok(parse_seed_lines(&content))
}

/// Resolve the CLI seed arguments: an explicit single seed, a file path or
/// comma list, else the configured seed file when it exists.
pub fn collect_seeds(
    seeds_arg: Option<String>,
    seed: Option<String>,
    default_seed_file: &str,
) -> Result<Vec<String>> {
    let mut urls: Vec<String> = Vec::new();
    if let Some(s) = seed {
        urls.push(s);
    }
    if let Some(arg) = seeds_arg {
        if Path::new(&arg).exists() {
            urls.extend(load_seed_file(&arg)?);
        } else {
            urls.extend(
                arg.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }
    } else if urls.is_empty() && Path::new(default_seed_file).exists() {
        urls.extend(load_seed_file(default_seed_file)?);
    }

    let mut seen = HashSet::new();
    urls.retain(|u| seen.insert(u.clone()));
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blanks() {
        let content = "# seeds\nhttp://a.test/\n\n  # another comment\nhttp://b.test/\n";
        assert_eq!(
            parse_seed_lines(content),
            vec!["http://a.test/", "http://b.test/"]
        );
    }

    #[test]
    fn collapses_duplicates_keeping_first() {
        let content = "http://a.test/\nhttp://b.test/\nhttp://a.test/\n";
        assert_eq!(
            parse_seed_lines(content),
            vec!["http://a.test/", "http://b.test/"]
        );
    }

    #[test]
    fn trims_whitespace() {
        let content = "   http://a.test/   \n";
        assert_eq!(parse_seed_lines(content), vec!["http://a.test/"]);
    }

    #[test]
    fn comma_lists_are_split_and_deduped() {
        let seeds = collect_seeds(
            Some("http://a.test/, http://b.test/,http://a.test/".to_string()),
            Some("http://c.test/".to_string()),
            "/nonexistent",
        )
        .unwrap();
        assert_eq!(
            seeds,
            vec!["http://c.test/", "http://a.test/", "http://b.test/"]
        );
    }
}
