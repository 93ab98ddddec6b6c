use crate::error::{CoreError, Result};
use crate::jobs::JobHandle;
use crate::map::{self, Graph, GraphMode, NewEdge, NewNode};
use crate::model::{
    Execution, ExecutionStatus, RecordDraft, RecordSummary, RecordUpdate, StoredEdge, StoredNode,
    WebsiteRecord, millis_to_datetime, normalize_tags,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub struct Database {
    conn: Connection,
}

/// The handle the scheduler, the crawl job and the daemon share.
pub type SharedDatabase = Arc<Mutex<Database>>;

pub fn lock_db(db: &SharedDatabase) -> Result<MutexGuard<'_, Database>> {
    db.lock()
        .map_err(|_| CoreError::Other("database lock poisoned".to_string()))
}

/// Row counts of one committed graph generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub nodes: usize,
    pub edges: usize,
    /// Edge candidates whose source or target had no node in the batch.
    pub dropped_edges: usize,
}

const RECORD_COLUMNS: &str = "id, url, label, crawl_interval, active, regex, job_id";
const EXECUTION_COLUMNS: &str =
    "id, record_id, title, url, crawl_duration_ms, last_crawl, status";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<WebsiteRecord> {
    let interval: i64 = row.get(3)?;
    let job_id: Option<String> = row.get(6)?;
    Ok(WebsiteRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        label: row.get(2)?,
        interval: interval.max(0) as u64,
        active: row.get(4)?,
        regex: row.get(5)?,
        job_id: job_id.map(JobHandle::from),
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<Execution> {
    let last_crawl: Option<i64> = row.get(5)?;
    Ok(Execution {
        id: row.get(0)?,
        record_id: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        duration_ms: row.get(4)?,
        last_crawl: last_crawl.map(millis_to_datetime),
        status: row.get(6)?,
    })
}

fn fetch_record(conn: &Connection, id: i64) -> Result<WebsiteRecord> {
    conn.query_row(
        &format!("SELECT {} FROM website_records WHERE id = ?1", RECORD_COLUMNS),
        params![id],
        record_from_row,
    )
    .optional()?
    .ok_or(CoreError::RecordNotFound(id))
}

fn fetch_tags(conn: &Connection, record_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT tag FROM tags WHERE record_id = ?1 ORDER BY id")?;
    let tags = stmt
        .query_map(params![record_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tags)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn query_nodes(conn: &Connection, record_ids: &[i64]) -> Result<Vec<StoredNode>> {
    if record_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT id, record_id, url, domain, title, crawl_time, boundary FROM nodes WHERE record_id IN ({}) ORDER BY id",
        placeholders(record_ids.len())
    ))?;
    let nodes = stmt
        .query_map(params_from_iter(record_ids.iter()), |row| {
            let crawl_time: i64 = row.get(5)?;
            Ok(StoredNode {
                id: row.get(0)?,
                record_id: row.get(1)?,
                url: row.get(2)?,
                domain: row.get(3)?,
                title: row.get(4)?,
                crawl_time: millis_to_datetime(crawl_time),
                boundary: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes)
}

fn query_edges(conn: &Connection, record_ids: &[i64]) -> Result<Vec<StoredEdge>> {
    if record_ids.is_empty() {
        return Ok(Vec::new());
    }
    let marks = placeholders(record_ids.len());
    let mut stmt = conn.prepare(&format!(
        "SELECT e.id, e.record_id, e.source_node_id, e.target_node_id FROM edges e
         WHERE e.source_node_id IN (SELECT id FROM nodes WHERE record_id IN ({marks}))
            OR e.target_node_id IN (SELECT id FROM nodes WHERE record_id IN ({marks}))
         ORDER BY e.id"
    ))?;
    let edges = stmt
        .query_map(
            params_from_iter(record_ids.iter().chain(record_ids.iter())),
            |row| {
                Ok(StoredEdge {
                    id: row.get(0)?,
                    record_id: row.get(1)?,
                    source_id: row.get(2)?,
                    target_id: row.get(3)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(edges)
}

fn insert_links<I, S>(conn: &Connection, execution_id: i64, urls: I) -> Result<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut stmt =
        conn.prepare("INSERT INTO execution_links (execution_id, url) VALUES (?1, ?2)")?;
    let mut count = 0;
    for url in urls {
        stmt.execute(params![execution_id, url.as_ref()])?;
        count += 1;
    }
    Ok(count)
}

/// Deletes the record's old generation and inserts the new one. The caller
/// owns the transaction.
fn swap_graph(
    conn: &Connection,
    record_id: i64,
    nodes: &[NewNode],
    edges: &[NewEdge],
) -> Result<GraphCounts> {
    let old_edges = conn.execute("DELETE FROM edges WHERE record_id = ?1", params![record_id])?;
    let old_nodes = conn.execute("DELETE FROM nodes WHERE record_id = ?1", params![record_id])?;
    debug!(
        "Removing previous generation of record {}: {} nodes, {} edges",
        record_id, old_nodes, old_edges
    );

    let mut ids: HashMap<&str, i64> = HashMap::with_capacity(nodes.len());
    let mut counts = GraphCounts::default();
    {
        let mut insert_node = conn.prepare(
            "INSERT INTO nodes (record_id, url, domain, title, crawl_time, boundary) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for node in nodes {
            insert_node.execute(params![
                record_id,
                &node.url,
                &node.domain,
                &node.title,
                node.crawl_time.timestamp_millis(),
                node.boundary,
            ])?;
            ids.insert(node.url.as_str(), conn.last_insert_rowid());
            counts.nodes += 1;
        }

        let mut insert_edge = conn.prepare(
            "INSERT INTO edges (record_id, source_node_id, target_node_id) VALUES (?1, ?2, ?3)",
        )?;
        for edge in edges {
            match (ids.get(edge.source.as_str()), ids.get(edge.target.as_str())) {
                (Some(source), Some(target)) => {
                    insert_edge.execute(params![record_id, source, target])?;
                    counts.edges += 1;
                }
                _ => {
                    warn!(
                        "Dropping edge {} -> {}: endpoint not in this crawl",
                        edge.source, edge.target
                    );
                    counts.dropped_edges += 1;
                }
            }
        }
    }
    Ok(counts)
}

impl Database {
    pub fn drop(path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets graph readers keep their snapshot while a crawl commits
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            -- Crawl configurations
            CREATE TABLE IF NOT EXISTS website_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL CHECK(length(url) BETWEEN 1 AND 256),
    label TEXT NOT NULL,
    crawl_interval INTEGER NOT NULL DEFAULT 0 CHECK(crawl_interval >= 0),
    active BOOLEAN NOT NULL DEFAULT 1,
    regex TEXT NOT NULL CHECK(length(regex) > 0),
    job_id TEXT                 -- handle of the live recurring job, if any
);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL,
    tag TEXT NOT NULL CHECK(length(trim(tag)) > 0),

    FOREIGN KEY(record_id) REFERENCES website_records(id) ON DELETE CASCADE,
    UNIQUE(record_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_tags_record ON tags(record_id);

-- One crawl run of a record
CREATE TABLE IF NOT EXISTS executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    crawl_duration_ms INTEGER NOT NULL DEFAULT 0,
    last_crawl INTEGER,         -- unix millis, NULL before the first run
    status INTEGER NOT NULL DEFAULT 4,

    FOREIGN KEY(record_id) REFERENCES website_records(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_executions_record ON executions(record_id);

-- URLs visited during an execution
CREATE TABLE IF NOT EXISTS execution_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id INTEGER NOT NULL,
    url TEXT NOT NULL,

    FOREIGN KEY(execution_id) REFERENCES executions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_execution_links_execution ON execution_links(execution_id);

-- Nodes of the latest graph generation
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    domain TEXT NOT NULL,
    title TEXT,
    crawl_time INTEGER NOT NULL,
    boundary BOOLEAN NOT NULL DEFAULT 0,

    FOREIGN KEY(record_id) REFERENCES website_records(id) ON DELETE CASCADE,
    UNIQUE(record_id, url)
);

CREATE INDEX IF NOT EXISTS idx_nodes_record ON nodes(record_id);
CREATE INDEX IF NOT EXISTS idx_nodes_domain ON nodes(record_id, domain);

-- Edges of the latest graph generation
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL,
    source_node_id INTEGER NOT NULL,
    target_node_id INTEGER NOT NULL,

    FOREIGN KEY(record_id) REFERENCES website_records(id) ON DELETE CASCADE,
    FOREIGN KEY(source_node_id) REFERENCES nodes(id) ON DELETE CASCADE,
    FOREIGN KEY(target_node_id) REFERENCES nodes(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_edges_record ON edges(record_id);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_node_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_node_id);
            ",
        )?;
        Ok(())
    }

    // Record management
    pub fn create_record(&mut self, draft: &RecordDraft) -> Result<WebsiteRecord> {
        draft.validate()?;
        let tags = normalize_tags(&draft.tags);

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO website_records (url, label, crawl_interval, active, regex) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &draft.url,
                &draft.label,
                draft.interval as i64,
                draft.active,
                &draft.regex
            ],
        )?;
        let id = tx.last_insert_rowid();
        for tag in &tags {
            tx.execute(
                "INSERT INTO tags (record_id, tag) VALUES (?1, ?2)",
                params![id, tag],
            )?;
        }
        let record = fetch_record(&tx, id)?;
        tx.commit()?;

        info!("Created record {} for {}", id, record.url);
        Ok(record)
    }

    /// Applies the present fields. When `tags` is given it replaces the tag set:
    /// kept tags stay, dropped ones are deleted, new ones inserted.
    pub fn update_record(&mut self, id: i64, update: &RecordUpdate) -> Result<WebsiteRecord> {
        update.validate()?;

        let tx = self.conn.transaction()?;
        let mut record = fetch_record(&tx, id)?;
        update.apply(&mut record);
        tx.execute(
            "UPDATE website_records SET url = ?1, label = ?2, crawl_interval = ?3, active = ?4, regex = ?5 WHERE id = ?6",
            params![
                &record.url,
                &record.label,
                record.interval as i64,
                record.active,
                &record.regex,
                id
            ],
        )?;

        if let Some(tags) = &update.tags {
            let wanted = normalize_tags(tags);
            let existing = fetch_tags(&tx, id)?;
            for stale in existing.iter().filter(|t| !wanted.contains(t)) {
                tx.execute(
                    "DELETE FROM tags WHERE record_id = ?1 AND tag = ?2",
                    params![id, stale],
                )?;
            }
            for fresh in wanted.iter().filter(|t| !existing.contains(t)) {
                tx.execute(
                    "INSERT INTO tags (record_id, tag) VALUES (?1, ?2)",
                    params![id, fresh],
                )?;
            }
        }
        tx.commit()?;

        debug!("Updated record {}", id);
        Ok(record)
    }

    pub fn set_active(&self, id: i64, active: bool) -> Result<WebsiteRecord> {
        let changed = self.conn.execute(
            "UPDATE website_records SET active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        if changed == 0 {
            return Err(CoreError::RecordNotFound(id));
        }
        fetch_record(&self.conn, id)
    }

    /// Removes the record and everything hanging off it in one transaction.
    /// Returns the removed record so the caller can cancel its job.
    pub fn delete_record(&mut self, id: i64) -> Result<WebsiteRecord> {
        let tx = self.conn.transaction()?;
        let record = fetch_record(&tx, id)?;

        tx.execute("DELETE FROM edges WHERE record_id = ?1", params![id])?;
        tx.execute("DELETE FROM nodes WHERE record_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM execution_links WHERE execution_id IN (SELECT id FROM executions WHERE record_id = ?1)",
            params![id],
        )?;
        tx.execute("DELETE FROM executions WHERE record_id = ?1", params![id])?;
        tx.execute("DELETE FROM tags WHERE record_id = ?1", params![id])?;
        tx.execute("DELETE FROM website_records WHERE id = ?1", params![id])?;
        tx.commit()?;

        info!("Deleted record {} ({})", id, record.url);
        Ok(record)
    }

    pub fn get_record(&self, id: i64) -> Result<WebsiteRecord> {
        fetch_record(&self.conn, id)
    }

    pub fn list_records(&self) -> Result<Vec<WebsiteRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM website_records ORDER BY url, crawl_interval, id",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn record_summaries(&self) -> Result<Vec<RecordSummary>> {
        self.list_records()?
            .into_iter()
            .map(|record| {
                let tags = fetch_tags(&self.conn, record.id)?;
                let latest = self.latest_execution(record.id)?;
                Ok(RecordSummary {
                    tags,
                    last_crawl: latest.as_ref().and_then(|e| e.last_crawl),
                    last_status: latest
                        .map(|e| e.status)
                        .unwrap_or(ExecutionStatus::NeverExecuted),
                    record,
                })
            })
            .collect()
    }

    pub fn tags_for(&self, record_id: i64) -> Result<Vec<String>> {
        fetch_tags(&self.conn, record_id)
    }

    pub fn set_job_handle(&self, record_id: i64, handle: Option<&JobHandle>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE website_records SET job_id = ?1 WHERE id = ?2",
            params![handle.map(|h| h.as_str()), record_id],
        )?;
        if changed == 0 {
            return Err(CoreError::RecordNotFound(record_id));
        }
        Ok(())
    }

    /// Forgets every stored handle. Used when a new process takes over scheduling.
    pub fn clear_job_handles(&self) -> Result<usize> {
        let cleared = self.conn.execute(
            "UPDATE website_records SET job_id = NULL WHERE job_id IS NOT NULL",
            [],
        )?;
        Ok(cleared)
    }

    // Executions
    pub fn create_execution(&self, record_id: i64, title: &str, url: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO executions (record_id, title, url, status) VALUES (?1, ?2, ?3, ?4)",
            params![record_id, title, url, ExecutionStatus::InQueue],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn set_execution_status(&self, execution_id: i64, status: ExecutionStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE executions SET status = ?1 WHERE id = ?2",
            params![status, execution_id],
        )?;
        debug!("Execution {} is now {}", execution_id, status);
        Ok(())
    }

    pub fn finish_execution(
        &self,
        execution_id: i64,
        duration_ms: i64,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE executions SET status = ?1, crawl_duration_ms = ?2, last_crawl = ?3 WHERE id = ?4",
            params![
                ExecutionStatus::Finished,
                duration_ms,
                finished_at.timestamp_millis(),
                execution_id
            ],
        )?;
        Ok(())
    }

    pub fn add_execution_links<I, S>(&mut self, execution_id: i64, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tx = self.conn.transaction()?;
        let count = insert_links(&tx, execution_id, urls)?;
        tx.commit()?;
        Ok(count)
    }

    /// Closes a successful execution. Its visited URLs, the graph swap and the
    /// `FINISHED` status commit together or not at all.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_execution<I, S>(
        &mut self,
        execution_id: i64,
        record_id: i64,
        links: I,
        nodes: &[NewNode],
        edges: &[NewEdge],
        duration_ms: i64,
        finished_at: DateTime<Utc>,
    ) -> Result<GraphCounts>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tx = self.conn.transaction()?;
        let linked = insert_links(&tx, execution_id, links)?;
        let counts = swap_graph(&tx, record_id, nodes, edges)?;
        tx.execute(
            "UPDATE executions SET status = ?1, crawl_duration_ms = ?2, last_crawl = ?3 WHERE id = ?4",
            params![
                ExecutionStatus::Finished,
                duration_ms,
                finished_at.timestamp_millis(),
                execution_id
            ],
        )?;
        tx.commit()?;

        debug!("Execution {} recorded {} links", execution_id, linked);
        info!(
            "Stored graph for record {}: {} nodes, {} edges",
            record_id, counts.nodes, counts.edges
        );
        Ok(counts)
    }

    pub fn get_execution(&self, execution_id: i64) -> Result<Option<Execution>> {
        let execution = self
            .conn
            .query_row(
                &format!("SELECT {} FROM executions WHERE id = ?1", EXECUTION_COLUMNS),
                params![execution_id],
                execution_from_row,
            )
            .optional()?;
        Ok(execution)
    }

    pub fn list_executions(&self) -> Result<Vec<Execution>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM executions ORDER BY id",
            EXECUTION_COLUMNS
        ))?;
        let executions = stmt
            .query_map([], execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }

    /// Newest first.
    pub fn executions_for_record(&self, record_id: i64) -> Result<Vec<Execution>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM executions WHERE record_id = ?1 ORDER BY id DESC",
            EXECUTION_COLUMNS
        ))?;
        let executions = stmt
            .query_map(params![record_id], execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(executions)
    }

    pub fn latest_execution(&self, record_id: i64) -> Result<Option<Execution>> {
        let execution = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM executions WHERE record_id = ?1 ORDER BY id DESC LIMIT 1",
                    EXECUTION_COLUMNS
                ),
                params![record_id],
                execution_from_row,
            )
            .optional()?;
        Ok(execution)
    }

    pub fn execution_links(&self, execution_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM execution_links WHERE execution_id = ?1 ORDER BY id")?;
        let links = stmt
            .query_map(params![execution_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(links)
    }

    // Graph persistence

    /// Swaps the record's stored graph for a new generation in one transaction.
    ///
    /// The old generation is deleted, the new nodes inserted, and each edge
    /// candidate resolved through the URL -> id map of this batch only.
    /// Candidates with an endpoint missing from the batch are dropped. Any
    /// failure rolls the whole swap back, leaving the previous graph in place.
    pub fn replace_graph(
        &mut self,
        record_id: i64,
        nodes: &[NewNode],
        edges: &[NewEdge],
    ) -> Result<GraphCounts> {
        let tx = self.conn.transaction()?;
        let counts = swap_graph(&tx, record_id, nodes, edges)?;
        tx.commit()?;

        info!(
            "Stored graph for record {}: {} nodes, {} edges",
            record_id, counts.nodes, counts.edges
        );
        Ok(counts)
    }

    pub fn nodes_for_records(&self, record_ids: &[i64]) -> Result<Vec<StoredNode>> {
        query_nodes(&self.conn, record_ids)
    }

    /// Edges touching a node owned by any of the records.
    pub fn edges_for_records(&self, record_ids: &[i64]) -> Result<Vec<StoredEdge>> {
        query_edges(&self.conn, record_ids)
    }

    /// Graph of the given records. Both reads share one transaction, so a crawl
    /// committing in between can't be seen half applied.
    pub fn get_graph(&mut self, record_ids: &[i64], mode: GraphMode) -> Result<Graph> {
        let unique: Vec<i64> = {
            let mut seen = HashSet::new();
            record_ids
                .iter()
                .copied()
                .filter(|id| seen.insert(*id))
                .collect()
        };

        let tx = self.conn.transaction()?;
        let nodes = query_nodes(&tx, &unique)?;
        let edges = query_edges(&tx, &unique)?;
        tx.commit()?;

        Ok(match mode {
            GraphMode::Website => map::website_graph(&nodes, &edges),
            GraphMode::Domain => map::domain_graph(&nodes, &edges),
        })
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}
