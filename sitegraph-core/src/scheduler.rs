//! Keeps each record's job in line with its active flag and interval.
//!
//! A record owns at most one outstanding job handle. The handle is written to
//! the record while the database lock taken for the scheduling call is still
//! held, so a reader never sees a handle that points at a cancelled job.

use crate::data::{Database, SharedDatabase, lock_db};
use crate::error::Result;
use crate::events::{RecordEvent, diff_records, snapshot};
use crate::jobs::{CrawlJob, JobHandle, JobQueue};
use crate::model::WebsiteRecord;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// What a scheduling call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A one-shot crawl was queued.
    Once(JobHandle),
    /// A recurring job is registered and its handle stored on the record.
    Recurring(JobHandle),
    /// The existing recurring job was left alone.
    Unchanged,
    /// The recurring job, if there was one, is gone. `followup` is the one-shot
    /// queued to capture the final state.
    Cancelled {
        previous: Option<JobHandle>,
        followup: Option<JobHandle>,
    },
}

pub struct Scheduler {
    db: SharedDatabase,
    queue: Arc<dyn JobQueue>,
    crawl_on_deactivate: bool,
}

impl Scheduler {
    pub fn new(db: SharedDatabase, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            db,
            queue,
            crawl_on_deactivate: false,
        }
    }

    /// Queue one last crawl whenever a record is deactivated.
    pub fn with_crawl_on_deactivate(mut self, enabled: bool) -> Self {
        self.crawl_on_deactivate = enabled;
        self
    }

    /// Brings the record's job in line with its stored configuration.
    ///
    /// One-shot records get a crawl queued right away. Recurring records get a
    /// periodic job unless one is already registered; `reschedule` replaces it
    /// with one built from the current url, regex and interval. Inactive
    /// records lose their recurring job.
    pub fn manage(&self, record_id: i64, reschedule: bool) -> Result<ScheduleOutcome> {
        let db = lock_db(&self.db)?;
        let record = db.get_record(record_id)?;

        if !record.active {
            let previous = self.cancel_stored(&db, &record)?;
            return Ok(ScheduleOutcome::Cancelled {
                previous,
                followup: None,
            });
        }

        if !record.is_recurring() {
            // interval was cleared since the last schedule
            self.cancel_stored(&db, &record)?;
            let handle = self.queue.enqueue_once(CrawlJob::for_record(&record))?;
            return Ok(ScheduleOutcome::Once(handle));
        }

        if record.job_id.is_some() && !reschedule {
            debug!("Record {} already scheduled", record_id);
            return Ok(ScheduleOutcome::Unchanged);
        }

        self.cancel_stored(&db, &record)?;
        let handle = self.queue.schedule_recurring(
            CrawlJob::for_record(&record),
            Duration::from_secs(record.interval),
        )?;
        if let Err(e) = db.set_job_handle(record_id, Some(&handle)) {
            self.queue.cancel(&handle);
            return Err(e);
        }

        info!(
            "Record {} crawls every {}s (job {})",
            record_id, record.interval, handle
        );
        Ok(ScheduleOutcome::Recurring(handle))
    }

    /// Cancels the record's job and deletes the record with all its data.
    pub fn remove(&self, record_id: i64) -> Result<WebsiteRecord> {
        let mut db = lock_db(&self.db)?;
        let record = db.get_record(record_id)?;
        if let Some(handle) = &record.job_id {
            self.queue.cancel(handle);
        }
        db.delete_record(record_id)
    }

    pub fn dispatch(&self, event: &RecordEvent) -> Result<ScheduleOutcome> {
        debug!("Dispatching {} for record {}", event.as_str(), event.record_id());
        match event {
            RecordEvent::Created(id) | RecordEvent::Activated(id) => self.manage(*id, false),
            RecordEvent::Updated(id) => self.manage(*id, true),
            RecordEvent::Deactivated(id) => self.deactivate(*id),
            RecordEvent::Deleted { record_id, job_id } => {
                if let Some(handle) = job_id {
                    self.queue.cancel(handle);
                }
                info!("Record {} deleted, schedule dropped", record_id);
                Ok(ScheduleOutcome::Cancelled {
                    previous: job_id.clone(),
                    followup: None,
                })
            }
        }
    }

    fn deactivate(&self, record_id: i64) -> Result<ScheduleOutcome> {
        let outcome = self.manage(record_id, false)?;
        let ScheduleOutcome::Cancelled { previous, .. } = outcome else {
            // re-activated before we got here
            return Ok(outcome);
        };
        if !self.crawl_on_deactivate {
            return Ok(ScheduleOutcome::Cancelled {
                previous,
                followup: None,
            });
        }

        let record = lock_db(&self.db)?.get_record(record_id)?;
        let followup = self.queue.enqueue_once(CrawlJob::for_record(&record))?;
        Ok(ScheduleOutcome::Cancelled {
            previous,
            followup: Some(followup),
        })
    }

    /// Cancels every stored recurring job and clears all handles.
    pub fn release_all(&self) -> Result<usize> {
        let db = lock_db(&self.db)?;
        for record in db.list_records()? {
            if let Some(handle) = &record.job_id {
                self.queue.cancel(handle);
            }
        }
        db.clear_job_handles()
    }

    /// Cancels and forgets the stored handle. "Already gone" is fine.
    fn cancel_stored(
        &self,
        db: &Database,
        record: &WebsiteRecord,
    ) -> Result<Option<JobHandle>> {
        let Some(handle) = record.job_id.clone() else {
            return Ok(None);
        };
        if !self.queue.cancel(&handle) {
            debug!("Job {} of record {} was already gone", handle, record.id);
        }
        db.set_job_handle(record.id, None)?;
        Ok(Some(handle))
    }
}

/// Polls the records table and feeds every change to the scheduler.
pub struct RecordWatcher {
    scheduler: Arc<Scheduler>,
    db: SharedDatabase,
    known: HashMap<i64, WebsiteRecord>,
}

impl RecordWatcher {
    pub fn new(scheduler: Arc<Scheduler>, db: SharedDatabase) -> Self {
        Self {
            scheduler,
            db,
            known: HashMap::new(),
        }
    }

    /// Drops handles left by an earlier process and schedules every record as new.
    pub fn start(&mut self) -> Result<Vec<ScheduleOutcome>> {
        let cleared = lock_db(&self.db)?.clear_job_handles()?;
        if cleared > 0 {
            info!("Cleared {} stale job handles", cleared);
        }
        self.known.clear();
        self.poll()
    }

    /// Dispatches whatever changed since the last poll. A record whose event
    /// failed keeps its old snapshot entry, so the same event comes back on
    /// the next poll.
    pub fn poll(&mut self) -> Result<Vec<ScheduleOutcome>> {
        let current = lock_db(&self.db)?.list_records()?;
        let events = diff_records(&self.known, &current);

        let mut outcomes = Vec::with_capacity(events.len());
        let mut failed = Vec::new();
        for event in &events {
            match self.scheduler.dispatch(event) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(
                        "Failed to handle {} of record {}: {}",
                        event.as_str(),
                        event.record_id(),
                        e
                    );
                    failed.push(event.record_id());
                }
            }
        }

        let mut next = snapshot(&current);
        for id in failed {
            match self.known.remove(&id) {
                Some(previous) => next.insert(id, previous),
                None => next.remove(&id),
            };
        }
        self.known = next;

        if !events.is_empty() {
            // pick up the handles written while dispatching
            for record in lock_db(&self.db)?.list_records()? {
                if let Some(known) = self.known.get_mut(&record.id) {
                    known.job_id = record.job_id;
                }
            }
        }
        Ok(outcomes)
    }

    /// Cancels every recurring job this process registered and clears the
    /// stored handles. Call before the queue goes away.
    pub fn stop(&mut self) -> Result<usize> {
        let released = self.scheduler.release_all()?;
        self.known.clear();
        if released > 0 {
            info!("Released {} job handles", released);
        }
        Ok(released)
    }

    pub fn known_records(&self) -> usize {
        self.known.len()
    }
}
