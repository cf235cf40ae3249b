use dashmap::DashSet;

use webtrawl_core::blacklist_pattern_matches;

/// Operator-controlled domain exclusion list. Patterns are exact hosts or
/// `*.suffix` globs; entries are written rarely and read on every admission.
#[derive(Default)]
pub struct Blacklist {
    patterns: DashSet<String>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<I: IntoIterator<Item = String>>(patterns: I) -> Self {
        let set = DashSet::new();
        for p in patterns {
            set.insert(p);
        }
        Self { patterns: set }
    }

    /// Returns false if the pattern was already present.
    pub fn add(&self, pattern: &str) -> bool {
        self.patterns.insert(pattern.to_string())
    }

    /// Returns true if the pattern was present.
    pub fn remove(&self, pattern: &str) -> bool {
        self.patterns.remove(pattern).is_some()
    }

    pub fn contains_pattern(&self, pattern: &str) -> bool {
        self.patterns.contains(pattern)
    }

    pub fn matches(&self, host: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| blacklist_pattern_matches(p.key(), host))
    }

    pub fn list(&self) -> Vec<String> {
        let mut out: Vec<String> = self.patterns.iter().map(|p| p.key().clone()).collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_and_glob() {
        let bl = Blacklist::new();
        bl.add("bad.test");
        bl.add("*.worse.test");

        assert!(bl.matches("bad.test"));
        assert!(!bl.matches("sub.bad.test"));
        assert!(bl.matches("sub.worse.test"));
        assert!(bl.matches("deep.sub.worse.test"));
        assert!(!bl.matches("worse.test"));
        assert!(!bl.matches("fine.test"));
    }

    #[test]
    fn remove_only_touches_the_pattern() {
        let bl = Blacklist::load(["bad.test".to_string(), "*.worse.test".to_string()]);
        assert!(bl.remove("bad.test"));
        assert!(!bl.remove("bad.test"));
        assert!(!bl.matches("bad.test"));
        assert!(bl.matches("x.worse.test"));
        assert_eq!(bl.len(), 1);
    }

    #[test]
    fn list_is_sorted() {
        let bl = Blacklist::load(["z.test".to_string(), "a.test".to_string()]);
        assert_eq!(bl.list(), vec!["a.test", "z.test"]);
    }
}
