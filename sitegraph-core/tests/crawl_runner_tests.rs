// End-to-end tests for crawl executions: crawl, transform, persist

use sitegraph_core::CoreError;
use sitegraph_core::crawl::CrawlRunner;
use sitegraph_core::data::{Database, SharedDatabase, lock_db};
use sitegraph_core::jobs::{CrawlJob, JobQueue, TokioJobQueue};
use sitegraph_core::map::GraphMode;
use sitegraph_core::model::{ExecutionStatus, RecordDraft};
use sitegraph_scanner::Crawler;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_page(server: &MockServer, at: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(html),
        )
        .mount(server)
        .await;
}

fn setup() -> (TempDir, SharedDatabase, CrawlRunner) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db"))
        .unwrap()
        .shared();
    let runner = CrawlRunner::new(db.clone(), Crawler::with_settings(5, "sitegraph-test").unwrap());
    (temp_dir, db, runner)
}

fn add_record(db: &SharedDatabase, url: &str, regex: &str) -> i64 {
    lock_db(db)
        .unwrap()
        .create_record(&RecordDraft {
            url: url.to_string(),
            label: "test site".to_string(),
            interval: 0,
            active: true,
            regex: regex.to_string(),
            tags: vec![],
        })
        .unwrap()
        .id
}

// ============================================================================
// Successful Executions
// ============================================================================

#[tokio::test]
async fn test_two_page_site_is_stored() {
    let server = MockServer::start().await;
    let a = format!("{}/", server.uri());
    let b = format!("{}/b", server.uri());
    mount_page(&server, "/", r#"<title>A</title><a href="/b">b</a>"#).await;
    mount_page(&server, "/b", "<p>no links</p>").await;

    let (_temp_dir, db, runner) = setup();
    let id = add_record(&db, &a, ".*");

    let execution_id = runner.start_execution(id).await.unwrap();

    let mut db = lock_db(&db).unwrap();
    let execution = db.get_execution(execution_id).unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Finished);
    assert!(execution.last_crawl.is_some());
    assert_eq!(execution.title, "test site");
    assert_eq!(db.execution_links(execution_id).unwrap(), vec![a.clone(), b.clone()]);

    let graph = db.get_graph(&[id], GraphMode::Website).unwrap();
    let urls: Vec<&str> = graph.nodes.iter().map(|n| n.url.as_str()).collect();
    assert_eq!(urls, vec![a.as_str(), b.as_str()]);
    assert_eq!(graph.nodes[0].title.as_deref(), Some("A"));
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.edges[0].source, graph.nodes[0].id);
    assert_eq!(graph.edges[0].target, graph.nodes[1].id);
}

#[tokio::test]
async fn test_out_of_scope_target_is_stored_as_leaf() {
    let inside = MockServer::start().await;
    let outside = MockServer::start().await;
    let a = format!("{}/", inside.uri());
    let b = format!("{}/b", outside.uri());
    mount_page(&inside, "/", &format!(r#"<a href="{}">out</a>"#, b)).await;

    let (_temp_dir, db, runner) = setup();
    let regex = format!("{}/", regex::escape(&inside.uri()));
    let id = add_record(&db, &a, &regex);

    let execution_id = runner.start_execution(id).await.unwrap();

    let mut db = lock_db(&db).unwrap();
    let nodes = db.nodes_for_records(&[id]).unwrap();
    let leaf = nodes.iter().find(|n| n.url == b).unwrap();
    assert!(leaf.boundary);
    assert_eq!(db.execution_links(execution_id).unwrap(), vec![a.clone()]);

    let graph = db.get_graph(&[id], GraphMode::Website).unwrap();
    assert_eq!(graph.edges.len(), 1);
    let domain_graph = db.get_graph(&[id], GraphMode::Domain).unwrap();
    assert_eq!(domain_graph.nodes.len(), 2);
    assert_eq!(domain_graph.edges.len(), 1);
}

#[tokio::test]
async fn test_second_execution_replaces_graph() {
    let server = MockServer::start().await;
    let a = format!("{}/", server.uri());
    mount_page(&server, "/", r#"<a href="/b">b</a>"#).await;
    mount_page(&server, "/b", "<p></p>").await;

    let (_temp_dir, db, runner) = setup();
    let id = add_record(&db, &a, ".*");

    runner.start_execution(id).await.unwrap();
    runner.start_execution(id).await.unwrap();

    let db = lock_db(&db).unwrap();
    assert_eq!(db.nodes_for_records(&[id]).unwrap().len(), 2);
    assert_eq!(db.edges_for_records(&[id]).unwrap().len(), 1);
    assert_eq!(db.executions_for_record(id).unwrap().len(), 2);
}

// ============================================================================
// Failed Executions
// ============================================================================

#[tokio::test]
async fn test_unreachable_site_marks_unknown_and_keeps_graph() {
    let server = MockServer::start().await;
    let a = format!("{}/", server.uri());
    mount_page(&server, "/", r#"<a href="/b">b</a>"#).await;
    mount_page(&server, "/b", "<p></p>").await;

    let (_temp_dir, db, runner) = setup();
    let id = add_record(&db, &a, ".*");
    runner.start_execution(id).await.unwrap();

    // point the record somewhere nothing listens
    let job = CrawlJob {
        record_id: id,
        url: "http://127.0.0.1:1/".to_string(),
        regex: ".*".to_string(),
        label: "dead".to_string(),
    };
    let result = runner.run(job).await;

    assert!(matches!(result, Err(CoreError::EmptyCrawl(_))));
    let db = lock_db(&db).unwrap();
    let latest = db.latest_execution(id).unwrap().unwrap();
    assert_eq!(latest.status, ExecutionStatus::Unknown);
    assert_eq!(latest.last_crawl, None);
    assert_eq!(db.nodes_for_records(&[id]).unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_graph_write_leaves_no_partial_execution() {
    let server = MockServer::start().await;
    let a = format!("{}/", server.uri());
    mount_page(&server, "/", r#"<a href="/b">b</a>"#).await;
    mount_page(&server, "/b", "<p></p>").await;

    let (_temp_dir, db, runner) = setup();
    let id = add_record(&db, &a, ".*");
    let first = runner.start_execution(id).await.unwrap();

    lock_db(&db)
        .unwrap()
        .get_connection()
        .execute_batch(
            "CREATE TRIGGER reject_nodes BEFORE INSERT ON nodes
             BEGIN SELECT RAISE(ABORT, 'disk says no'); END;",
        )
        .unwrap();

    let result = runner.start_execution(id).await;
    assert!(matches!(result, Err(CoreError::Database(_))));

    let db = lock_db(&db).unwrap();
    let latest = db.latest_execution(id).unwrap().unwrap();
    assert_ne!(latest.id, first);
    assert_eq!(latest.status, ExecutionStatus::Unknown);
    assert_eq!(latest.last_crawl, None);
    assert!(db.execution_links(latest.id).unwrap().is_empty());
    assert_eq!(db.execution_links(first).unwrap().len(), 2);
    assert_eq!(db.nodes_for_records(&[id]).unwrap().len(), 2);
}

#[tokio::test]
async fn test_start_execution_for_missing_record() {
    let (_temp_dir, _db, runner) = setup();
    assert!(matches!(
        runner.start_execution(5).await,
        Err(CoreError::RecordNotFound(5))
    ));
}

// ============================================================================
// Queue Integration
// ============================================================================

#[tokio::test]
async fn test_job_runner_through_tokio_queue() {
    let server = MockServer::start().await;
    let a = format!("{}/", server.uri());
    mount_page(&server, "/", "<title>only</title>").await;

    let (_temp_dir, db, runner) = setup();
    let id = add_record(&db, &a, ".*");
    let record = lock_db(&db).unwrap().get_record(id).unwrap();

    let queue = TokioJobQueue::new(Arc::new(runner).into_job_runner());
    queue.enqueue_once(CrawlJob::for_record(&record)).unwrap();

    for _ in 0..50 {
        if queue.active_jobs() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let db = lock_db(&db).unwrap();
    let latest = db.latest_execution(id).unwrap().unwrap();
    assert_eq!(latest.status, ExecutionStatus::Finished);
    assert_eq!(db.nodes_for_records(&[id]).unwrap().len(), 1);
}
