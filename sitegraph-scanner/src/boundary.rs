use crate::error::Result;
use regex::Regex;

/// Decides which discovered URLs are followed and which become leaves.
///
/// The pattern must match from the start of the URL; it does not have to
/// consume the whole string. An empty pattern puts every URL in scope.
#[derive(Debug, Clone)]
pub struct Boundary {
    pattern: String,
    regex: Option<Regex>,
}

impl Boundary {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(&format!("^(?:{})", pattern))?)
        };

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// A boundary that accepts everything.
    pub fn unbounded() -> Self {
        Self {
            pattern: String::new(),
            regex: None,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn in_scope(&self, url: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(url),
            None => true,
        }
    }
}

/// One-off check. Compiles the pattern on every call, so prefer [`Boundary`] in loops.
pub fn in_scope(url: &str, pattern: &str) -> Result<bool> {
    Ok(Boundary::new(pattern)?.in_scope(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pattern_matches_everything() {
        for url in ["https://example.com", "ftp://x", "", "garbage"] {
            assert!(in_scope(url, "").unwrap());
        }
    }

    #[test]
    fn test_prefix_match_is_enough() {
        let boundary = Boundary::new("https://example.com").unwrap();
        assert!(boundary.in_scope("https://example.com/deep/page?x=1"));
        assert!(!boundary.in_scope("http://example.com/"));
    }

    #[test]
    fn test_match_must_start_at_beginning() {
        let boundary = Boundary::new("example").unwrap();
        assert!(!boundary.in_scope("https://example.com"));
        assert!(boundary.in_scope("example.com"));
    }

    #[test]
    fn test_alternation_is_grouped_under_anchor() {
        // without the group, `b` would be unanchored
        let boundary = Boundary::new("a|b").unwrap();
        assert!(boundary.in_scope("a-site"));
        assert!(boundary.in_scope("b-site"));
        assert!(!boundary.in_scope("xb"));
    }

    #[test]
    fn test_dot_star_suffix_pattern() {
        let boundary = Boundary::new(".*(scrapethissite.com/lessons/|gum.co.*)$").unwrap();
        assert!(boundary.in_scope("https://scrapethissite.com/lessons/"));
        assert!(boundary.in_scope("https://gum.co/abc"));
        assert!(!boundary.in_scope("https://scrapethissite.com/faq/"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(Boundary::new("(unclosed").is_err());
    }
}
