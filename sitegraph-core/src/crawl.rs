use crate::data::{GraphCounts, SharedDatabase, lock_db};
use crate::error::{CoreError, Result};
use crate::jobs::{CrawlJob, JobRunner};
use crate::map::transform;
use crate::model::ExecutionStatus;
use chrono::Utc;
use futures::future::BoxFuture;
use sitegraph_scanner::{Boundary, CrawledNode, Crawler};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use url::Url;

/// Runs one crawl firing end to end: execution bookkeeping, crawl,
/// transform, graph swap.
///
/// Firings of the same record are serialized on a per-record lock, so two
/// crawls of one record never overlap even if the queue fires them together.
pub struct CrawlRunner {
    db: SharedDatabase,
    crawler: Arc<Crawler>,
    record_locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl CrawlRunner {
    pub fn new(db: SharedDatabase, crawler: Crawler) -> Self {
        Self {
            db,
            crawler: Arc::new(crawler),
            record_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Crawls a record right now, whatever its interval. Returns the execution id.
    pub async fn start_execution(&self, record_id: i64) -> Result<i64> {
        let record = lock_db(&self.db)?.get_record(record_id)?;
        self.run(CrawlJob::for_record(&record)).await
    }

    /// Returns the id of the execution row this firing produced, whether it
    /// finished or ended up `UNKNOWN`. Only the error path returns `Err`.
    pub async fn run(&self, job: CrawlJob) -> Result<i64> {
        let execution_id =
            lock_db(&self.db)?.create_execution(job.record_id, &job.label, &job.url)?;
        debug!(
            "Execution {} queued for record {}",
            execution_id, job.record_id
        );

        let lock = self.record_lock(job.record_id)?;
        let _running = lock.lock().await;

        match self.execute(execution_id, &job).await {
            Ok(counts) => {
                info!(
                    "Execution {} of record {} finished: {} nodes, {} edges",
                    execution_id, job.record_id, counts.nodes, counts.edges
                );
                Ok(execution_id)
            }
            Err(e) => {
                error!(
                    "Execution {} of record {} failed: {}",
                    execution_id, job.record_id, e
                );
                if let Err(mark_err) = lock_db(&self.db)
                    .and_then(|db| db.set_execution_status(execution_id, ExecutionStatus::Unknown))
                {
                    error!(
                        "Could not mark execution {} as unknown: {}",
                        execution_id, mark_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, execution_id: i64, job: &CrawlJob) -> Result<GraphCounts> {
        lock_db(&self.db)?.set_execution_status(execution_id, ExecutionStatus::InProgress)?;
        let started = Instant::now();

        let boundary = Boundary::new(&job.regex)?;
        let raw_nodes = self.crawler.crawl(&job.url, &boundary).await;
        if raw_nodes.is_empty() {
            warn!(
                "Execution {} fetched nothing from {}; keeping the previous graph",
                execution_id, job.url
            );
            return Err(CoreError::EmptyCrawl(job.url.clone()));
        }

        let (nodes, edges) = transform(&raw_nodes, job.record_id);
        let visited = raw_nodes
            .iter()
            .filter(|n| !n.boundary)
            .map(|n| n.url.as_str());
        let duration_ms = started.elapsed().as_millis() as i64;

        lock_db(&self.db)?.complete_execution(
            execution_id,
            job.record_id,
            visited,
            &nodes,
            &edges,
            duration_ms,
            Utc::now(),
        )
    }

    fn record_lock(&self, record_id: i64) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .record_locks
            .lock()
            .map_err(|_| CoreError::Other("record lock table poisoned".to_string()))?;
        Ok(locks.entry(record_id).or_default().clone())
    }

    /// Adapts the runner to the job queue. Failures are already recorded on the
    /// execution row, so the job itself just ends.
    pub fn into_job_runner(self: Arc<Self>) -> JobRunner {
        Arc::new(move |job: CrawlJob| -> BoxFuture<'static, ()> {
            let runner = self.clone();
            Box::pin(async move {
                let record_id = job.record_id;
                if runner.run(job).await.is_err() {
                    debug!("Job for record {} ended with a failed execution", record_id);
                }
            })
        })
    }
}

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

/// Generate a crawl report from nodes, grouped by domain
pub fn generate_crawl_report(nodes: &[CrawledNode]) -> String {
    let fetched = nodes.iter().filter(|n| !n.boundary).count();
    let leaves = nodes.len() - fetched;
    let targets: usize = nodes.iter().map(|n| n.execution_targets.len()).sum();

    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Pages crawled: {}\n", fetched));
    report.push_str(&format!("  Boundary leaves: {}\n", leaves));
    report.push_str(&format!("  Links followed or recorded: {}\n", targets));
    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    let mut by_domain: BTreeMap<&str, Vec<&CrawledNode>> = BTreeMap::new();
    for node in nodes {
        by_domain.entry(node.domain.as_str()).or_default().push(node);
    }

    for (domain, domain_nodes) in by_domain {
        let name = if domain.is_empty() { "(unknown)" } else { domain };
        report.push_str(&format!("## {}\n", name));
        report.push_str(&format!("  {} nodes\n\n", domain_nodes.len()));

        for node in domain_nodes {
            let marker = if node.boundary { "leaf" } else { "page" };
            let mut line = format!("  [{}] {}", marker, extract_url_path(&node.url));
            if let Some(title) = node.title.as_deref()
                && !node.boundary
                && !title.is_empty()
            {
                line.push_str(&format!("  \"{}\"", title));
            }
            if !node.execution_targets.is_empty() {
                line.push_str(&format!("  -> {} links", node.execution_targets.len()));
            }
            report.push_str(&line);
            report.push('\n');
        }
        report.push('\n');
    }

    report
}
