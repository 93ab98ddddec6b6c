use crate::error::{Result, ScanError};
use crate::result::authority_of;
use std::collections::BTreeSet;
use url::Url;

/// Where a page lives, precomputed once so every anchor on it resolves the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub url: String,
    /// `scheme://authority`, no trailing slash
    pub base_url: String,
    /// Authority with a leading `www.` removed
    pub stripped_authority: String,
    /// The URL up to and including its last `/`
    pub directory: String,
}

impl PageContext {
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed =
            Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;
        let authority = authority_of(url);
        let stripped_authority = authority
            .strip_prefix("www.")
            .unwrap_or(&authority)
            .to_string();

        Ok(Self {
            url: url.to_string(),
            base_url: format!("{}://{}", parsed.scheme(), authority),
            stripped_authority,
            directory: directory_of(url),
        })
    }

    /// Resolves one anchor `href` found on this page, or `None` when the link is skipped.
    pub fn normalize(&self, anchor: &str) -> Option<String> {
        if anchor.starts_with('#') || anchor.contains("mailto:") {
            return None;
        }

        if anchor.starts_with('/') {
            Some(format!("{}{}", self.base_url, anchor))
        } else if !self.stripped_authority.is_empty() && anchor.contains(&self.stripped_authority) {
            Some(anchor.to_string())
        } else if !anchor.starts_with("http") {
            Some(format!("{}{}", self.directory, anchor))
        } else {
            Some(anchor.to_string())
        }
    }
}

/// Deduplicated union of every candidate URL on a page.
pub fn normalize_links<'a, I>(page: &PageContext, anchors: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    anchors
        .into_iter()
        .filter_map(|anchor| page.normalize(anchor))
        .collect()
}

fn directory_of(url: &str) -> String {
    let path_start = url
        .find("://")
        .map(|i| i + 3)
        .and_then(|i| url[i..].find('/').map(|j| i + j));

    match (path_start, url.rfind('/')) {
        (Some(start), Some(last)) if last >= start => url[..=last].to_string(),
        _ => format!("{}/", url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str) -> PageContext {
        PageContext::from_url(url).unwrap()
    }

    #[test]
    fn test_context_parts() {
        let ctx = page("https://www.example.com/docs/intro.html");
        assert_eq!(ctx.base_url, "https://www.example.com");
        assert_eq!(ctx.stripped_authority, "example.com");
        assert_eq!(ctx.directory, "https://www.example.com/docs/");
    }

    #[test]
    fn test_directory_of_bare_host_gets_slash() {
        assert_eq!(page("https://example.com").directory, "https://example.com/");
        assert_eq!(page("https://example.com/").directory, "https://example.com/");
    }

    #[test]
    fn test_port_is_part_of_base() {
        let ctx = page("http://127.0.0.1:4000/a");
        assert_eq!(ctx.base_url, "http://127.0.0.1:4000");
        assert_eq!(ctx.normalize("/b").as_deref(), Some("http://127.0.0.1:4000/b"));
    }

    #[test]
    fn test_skips_fragments_and_mailto() {
        let ctx = page("https://example.com/");
        assert_eq!(ctx.normalize("#top"), None);
        assert_eq!(ctx.normalize("mailto:someone@example.com"), None);
    }

    #[test]
    fn test_root_relative_resolves_against_base() {
        let ctx = page("https://example.com/a/b/c.html");
        assert_eq!(
            ctx.normalize("/faq/").as_deref(),
            Some("https://example.com/faq/")
        );
    }

    #[test]
    fn test_anchor_containing_authority_is_absolute() {
        let ctx = page("https://www.example.com/");
        assert_eq!(
            ctx.normalize("http://example.com/x").as_deref(),
            Some("http://example.com/x")
        );
    }

    #[test]
    fn test_relative_resolves_against_directory() {
        let ctx = page("https://example.com/docs/intro.html");
        assert_eq!(
            ctx.normalize("next.html").as_deref(),
            Some("https://example.com/docs/next.html")
        );
    }

    #[test]
    fn test_foreign_absolute_kept_as_is() {
        let ctx = page("https://example.com/");
        assert_eq!(
            ctx.normalize("https://other.org/page").as_deref(),
            Some("https://other.org/page")
        );
    }

    #[test]
    fn test_normalize_links_deduplicates() {
        let ctx = page("https://example.com/");
        let links = normalize_links(&ctx, ["/a", "a", "https://example.com/a", "#x"]);
        assert_eq!(links.len(), 1);
        assert!(links.contains("https://example.com/a"));
    }

    #[test]
    fn test_invalid_page_url() {
        assert!(PageContext::from_url("no scheme here").is_err());
    }
}
