//! Job queue boundary used by the scheduler.
//!
//! The scheduler needs exactly three things from a queue: run a crawl once,
//! run it every `period`, and cancel either by handle. [`TokioJobQueue`] backs
//! that contract with tasks spawned on the current tokio runtime.

use crate::error::{CoreError, Result};
use crate::model::WebsiteRecord;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque identifier of a queued or scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Arguments of one crawl firing, captured when the job is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub record_id: i64,
    pub url: String,
    pub regex: String,
    pub label: String,
}

impl CrawlJob {
    pub fn for_record(record: &WebsiteRecord) -> Self {
        Self {
            record_id: record.id,
            url: record.url.clone(),
            regex: record.regex.clone(),
            label: record.label.clone(),
        }
    }
}

/// What a job does when it fires.
pub type JobRunner = Arc<dyn Fn(CrawlJob) -> BoxFuture<'static, ()> + Send + Sync>;

pub trait JobQueue: Send + Sync {
    fn enqueue_once(&self, job: CrawlJob) -> Result<JobHandle>;

    fn schedule_recurring(&self, job: CrawlJob, period: Duration) -> Result<JobHandle>;

    /// Returns `false` when the handle is unknown or already gone. Never an error.
    fn cancel(&self, handle: &JobHandle) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobKind {
    Once,
    Recurring,
}

struct ScheduledJob {
    record_id: i64,
    kind: JobKind,
    task: JoinHandle<()>,
}

type JobTable = Arc<Mutex<HashMap<JobHandle, ScheduledJob>>>;

/// In-process queue. Recurring jobs tick on a tokio interval and each firing
/// runs as its own task, so cancelling stops future firings without cutting
/// off a crawl that is already under way.
pub struct TokioJobQueue {
    runner: JobRunner,
    jobs: JobTable,
}

impl TokioJobQueue {
    pub fn new(runner: JobRunner) -> Self {
        Self {
            runner,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of registered jobs, one-shots that haven't finished included.
    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn jobs_for_record(&self, record_id: i64) -> Vec<(JobHandle, JobKind)> {
        let Ok(jobs) = self.jobs.lock() else {
            return Vec::new();
        };
        let mut found: Vec<(JobHandle, JobKind)> = jobs
            .iter()
            .filter(|(_, job)| job.record_id == record_id)
            .map(|(handle, job)| (handle.clone(), job.kind))
            .collect();
        found.sort();
        found
    }

    /// Stops every recurring job. Firings already running are left to finish.
    pub fn shutdown(&self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            for (handle, job) in jobs.drain() {
                if job.kind == JobKind::Recurring {
                    job.task.abort();
                }
                debug!("Dropped job {} on shutdown", handle);
            }
        }
    }

    fn runtime() -> Result<Handle> {
        Handle::try_current().map_err(|e| CoreError::Queue(format!("no tokio runtime: {}", e)))
    }

    fn lock_jobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<JobHandle, ScheduledJob>>> {
        self.jobs
            .lock()
            .map_err(|_| CoreError::Queue("job table lock poisoned".to_string()))
    }
}

impl JobQueue for TokioJobQueue {
    fn enqueue_once(&self, job: CrawlJob) -> Result<JobHandle> {
        let runtime = Self::runtime()?;
        let handle = JobHandle::generate();
        let record_id = job.record_id;

        // held until the entry is inserted, so the task can't remove it first
        let mut jobs = self.lock_jobs()?;

        let table = self.jobs.clone();
        let own_handle = handle.clone();
        let firing = (self.runner)(job);
        let task = runtime.spawn(async move {
            firing.await;
            if let Ok(mut jobs) = table.lock() {
                jobs.remove(&own_handle);
            }
        });

        jobs.insert(
            handle.clone(),
            ScheduledJob {
                record_id,
                kind: JobKind::Once,
                task,
            },
        );

        info!("Queued one-shot crawl {} for record {}", handle, record_id);
        Ok(handle)
    }

    fn schedule_recurring(&self, job: CrawlJob, period: Duration) -> Result<JobHandle> {
        if period.is_zero() {
            return Err(CoreError::Queue(
                "recurring period must be positive".to_string(),
            ));
        }

        let runtime = Self::runtime()?;
        let handle = JobHandle::generate();
        let record_id = job.record_id;
        let runner = self.runner.clone();
        let spawner = runtime.clone();

        // bail on a poisoned table before anything is spawned
        let mut jobs = self.lock_jobs()?;
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                debug!("Recurring crawl for record {} fired", job.record_id);
                spawner.spawn(runner(job.clone()));
            }
        });

        jobs.insert(
            handle.clone(),
            ScheduledJob {
                record_id,
                kind: JobKind::Recurring,
                task,
            },
        );

        info!(
            "Scheduled crawl {} for record {} every {:?}",
            handle, record_id, period
        );
        Ok(handle)
    }

    fn cancel(&self, handle: &JobHandle) -> bool {
        let removed = match self.jobs.lock() {
            Ok(mut jobs) => jobs.remove(handle),
            Err(_) => None,
        };

        match removed {
            Some(job) => {
                // a running one-shot is allowed to finish
                if job.kind == JobKind::Recurring {
                    job.task.abort();
                }
                info!("Cancelled job {} for record {}", handle, job.record_id);
                true
            }
            None => {
                debug!("Job {} already gone", handle);
                false
            }
        }
    }
}

impl Drop for TokioJobQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_runner() -> (JobRunner, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let runner: JobRunner = Arc::new(move |_job: CrawlJob| -> BoxFuture<'static, ()> {
            let count = count_clone.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });
        (runner, count)
    }

    fn job(record_id: i64) -> CrawlJob {
        CrawlJob {
            record_id,
            url: "http://example.com/".to_string(),
            regex: ".*".to_string(),
            label: "example".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_fires_every_period_until_cancelled() {
        let (runner, count) = counting_runner();
        let queue = TokioJobQueue::new(runner);

        let handle = queue
            .schedule_recurring(job(1), Duration::from_secs(60))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert!(queue.cancel(&handle));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(queue.active_jobs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_runs_once_and_unregisters() {
        let (runner, count) = counting_runner();
        let queue = TokioJobQueue::new(runner);

        queue.enqueue_once(job(7)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(queue.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_handle_is_noop() {
        let (runner, _) = counting_runner();
        let queue = TokioJobQueue::new(runner);
        assert!(!queue.cancel(&JobHandle::generate()));
    }

    #[tokio::test]
    async fn test_double_cancel_tolerated() {
        let (runner, _) = counting_runner();
        let queue = TokioJobQueue::new(runner);
        let handle = queue
            .schedule_recurring(job(2), Duration::from_secs(3600))
            .unwrap();
        assert!(queue.cancel(&handle));
        assert!(!queue.cancel(&handle));
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let (runner, _) = counting_runner();
        let queue = TokioJobQueue::new(runner);
        assert!(queue.schedule_recurring(job(3), Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poisoned_table_spawns_no_ticker() {
        let (runner, count) = counting_runner();
        let queue = TokioJobQueue::new(runner);
        let table = queue.jobs.clone();
        let _ = std::thread::spawn(move || {
            let _jobs = table.lock().unwrap();
            panic!("poisoning the job table");
        })
        .join();

        let result = queue.schedule_recurring(job(8), Duration::from_secs(60));
        assert!(matches!(result, Err(CoreError::Queue(_))));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_requires_runtime() {
        let (runner, _) = counting_runner();
        let queue = TokioJobQueue::new(runner);
        assert!(matches!(
            queue.enqueue_once(job(4)),
            Err(CoreError::Queue(_))
        ));
    }

    #[tokio::test]
    async fn test_jobs_for_record() {
        let (runner, _) = counting_runner();
        let queue = TokioJobQueue::new(runner);
        let handle = queue
            .schedule_recurring(job(5), Duration::from_secs(3600))
            .unwrap();
        queue
            .schedule_recurring(job(6), Duration::from_secs(3600))
            .unwrap();

        assert_eq!(
            queue.jobs_for_record(5),
            vec![(handle, JobKind::Recurring)]
        );
    }
}
