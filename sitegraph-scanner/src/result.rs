use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One vertex produced by a crawl, either a fetched page or a boundary leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawledNode {
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub crawl_time: DateTime<Utc>,
    /// Leaf outside the boundary regex; never fetched.
    pub boundary: bool,
    /// Sorted, without the node's own URL.
    pub execution_targets: Vec<String>,
}

impl CrawledNode {
    pub fn new(url: String, domain: String) -> Self {
        Self {
            url,
            domain,
            title: None,
            crawl_time: Utc::now(),
            boundary: false,
            execution_targets: Vec::new(),
        }
    }

    /// A leaf for a URL that fell outside the boundary. The title defaults to its authority.
    pub fn leaf(url: String) -> Self {
        let domain = authority_of(&url);
        Self {
            title: Some(domain.clone()),
            domain,
            url,
            crawl_time: Utc::now(),
            boundary: true,
            execution_targets: Vec::new(),
        }
    }
}

/// Host plus explicit port of a URL, or an empty string when it doesn't parse.
pub fn authority_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.host_str().map(|host| match u.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            })
        })
        .unwrap_or_default()
}
