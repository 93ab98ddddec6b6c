//! Record-change events, derived by comparing two snapshots of the records table.

use crate::jobs::JobHandle;
use crate::model::WebsiteRecord;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RecordEvent {
    Created(i64),
    /// Crawl configuration changed on a record that stayed active.
    Updated(i64),
    Activated(i64),
    Deactivated(i64),
    /// The record is gone; `job_id` is the handle it last carried.
    Deleted {
        record_id: i64,
        job_id: Option<JobHandle>,
    },
}

impl RecordEvent {
    pub fn record_id(&self) -> i64 {
        match self {
            RecordEvent::Created(id)
            | RecordEvent::Updated(id)
            | RecordEvent::Activated(id)
            | RecordEvent::Deactivated(id) => *id,
            RecordEvent::Deleted { record_id, .. } => *record_id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordEvent::Created(_) => "created",
            RecordEvent::Updated(_) => "updated",
            RecordEvent::Activated(_) => "activated",
            RecordEvent::Deactivated(_) => "deactivated",
            RecordEvent::Deleted { .. } => "deleted",
        }
    }
}

/// Events turning `previous` into `current`, in record id order, deletions last.
///
/// A flip of `active` wins over a config change in the same poll: activating
/// schedules with the new config anyway, and deactivating cancels.
pub fn diff_records(
    previous: &HashMap<i64, WebsiteRecord>,
    current: &[WebsiteRecord],
) -> Vec<RecordEvent> {
    let mut changes: Vec<RecordEvent> = Vec::new();
    let mut present: HashSet<i64> = HashSet::with_capacity(current.len());

    let mut ordered: Vec<&WebsiteRecord> = current.iter().collect();
    ordered.sort_by_key(|r| r.id);

    for record in ordered {
        present.insert(record.id);
        let Some(before) = previous.get(&record.id) else {
            changes.push(RecordEvent::Created(record.id));
            continue;
        };

        if before.active != record.active {
            changes.push(if record.active {
                RecordEvent::Activated(record.id)
            } else {
                RecordEvent::Deactivated(record.id)
            });
        } else if record.active && before.crawl_config_differs(record) {
            changes.push(RecordEvent::Updated(record.id));
        }
    }

    let mut gone: Vec<&WebsiteRecord> = previous
        .values()
        .filter(|r| !present.contains(&r.id))
        .collect();
    gone.sort_by_key(|r| r.id);
    changes.extend(gone.into_iter().map(|r| RecordEvent::Deleted {
        record_id: r.id,
        job_id: r.job_id.clone(),
    }));

    changes
}

pub fn snapshot(records: &[WebsiteRecord]) -> HashMap<i64, WebsiteRecord> {
    records.iter().map(|r| (r.id, r.clone())).collect()
}
