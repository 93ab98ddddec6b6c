use crate::boundary::Boundary;
use crate::error::{Result, ScanError};
use crate::normalize::{PageContext, normalize_links};
use crate::result::{CrawledNode, authority_of};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub type ProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

const DEFAULT_USER_AGENT: &str = "Sitegraph/0.1 (https://github.com/trapdoorsec/sitegraph)";

/// Breadth-first crawler. One fetch at a time; a crawl never fans out.
pub struct Crawler {
    client: Client,
    progress_callback: Option<ProgressCallback>,
}

/// Title and normalized outbound links of one fetched page.
struct ParsedPage {
    title: Option<String>,
    links: BTreeSet<String>,
}

impl Crawler {
    pub fn new() -> Result<Self> {
        Self::with_settings(10, DEFAULT_USER_AGENT)
    }

    pub fn with_settings(timeout_secs: u64, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            progress_callback: None,
        })
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Crawls everything reachable from `start_url` inside `boundary`.
    ///
    /// Pages that cannot be fetched are logged and left out; the crawl carries
    /// on with the rest of the frontier. Every out-of-scope link becomes a leaf
    /// node. The result is sorted by URL.
    pub async fn crawl(&self, start_url: &str, boundary: &Boundary) -> Vec<CrawledNode> {
        info!(
            "Starting crawl of {} (boundary: {:?})",
            start_url,
            boundary.pattern()
        );
        let started = Instant::now();

        let mut frontier: VecDeque<String> = VecDeque::from([start_url.to_string()]);
        // everything ever queued, processed or not
        let mut seen: HashSet<String> = HashSet::from([start_url.to_string()]);
        let mut processed: HashSet<String> = HashSet::new();
        let mut leaves: BTreeSet<String> = BTreeSet::new();
        let mut nodes: Vec<CrawledNode> = Vec::new();

        while let Some(url) = frontier.pop_front() {
            processed.insert(url.clone());
            debug!("Processing {}", url);

            if let Some(ref callback) = self.progress_callback {
                callback(url.clone());
            }

            let (page, parsed) = match self.fetch_and_parse(&url).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!("Failed to process {}: {}", url, e);
                    continue;
                }
            };

            let mut node = CrawledNode::new(url.clone(), authority_of(&url));
            node.title = parsed.title;

            for candidate in parsed.links {
                let candidate_in_scope = boundary.in_scope(&candidate);
                if candidate_in_scope && !seen.contains(&candidate) {
                    seen.insert(candidate.clone());
                    frontier.push_back(candidate.clone());
                } else if !candidate_in_scope && candidate != page.base_url {
                    leaves.insert(candidate.clone());
                }

                if candidate != url {
                    node.execution_targets.push(candidate);
                }
            }
            node.execution_targets.sort();

            nodes.push(node);
        }

        nodes.extend(
            leaves
                .into_iter()
                .filter(|url| !processed.contains(url))
                .map(CrawledNode::leaf),
        );
        nodes.sort_by(|a, b| a.url.cmp(&b.url));

        info!(
            "Crawl of {} complete. {} nodes in {:?}",
            start_url,
            nodes.len(),
            started.elapsed()
        );
        nodes
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<(PageContext, ParsedPage)> {
        let page = PageContext::from_url(url)?;

        let response = self.client.get(url).send().await?;
        debug!("{} -> {}", url, response.status());
        let body = response.text().await?;

        let parsed = parse_page(&body, &page)?;
        Ok((page, parsed))
    }
}

/// Kept synchronous so the non-`Send` parsed document never lives across an await.
fn parse_page(html: &str, page: &PageContext) -> Result<ParsedPage> {
    let document = Html::parse_document(html);

    let title_selector =
        Selector::parse("title").map_err(|e| ScanError::Other(format!("selector: {}", e)))?;
    let link_selector =
        Selector::parse("a[href]").map_err(|e| ScanError::Other(format!("selector: {}", e)))?;

    let title = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string());

    let links = normalize_links(
        page,
        document
            .select(&link_selector)
            .filter_map(|a| a.value().attr("href")),
    );

    Ok(ParsedPage { title, links })
}
