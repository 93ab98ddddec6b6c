use crate::error::{CoreError, Result};
use crate::jobs::JobHandle;
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_URL_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 2563;

/// Crawl configuration for one website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteRecord {
    pub id: i64,
    pub url: String,
    pub label: String,
    /// Seconds between crawls; 0 means one-shot.
    pub interval: u64,
    pub active: bool,
    pub regex: String,
    /// Present iff a recurring job is registered for this record.
    pub job_id: Option<JobHandle>,
}

impl WebsiteRecord {
    pub fn is_recurring(&self) -> bool {
        self.interval > 0
    }

    /// Whether the scheduler should keep a recurring job alive for this record.
    pub fn is_scheduled(&self) -> bool {
        self.active && self.is_recurring()
    }

    /// True when a change between `self` and `other` affects how the site is crawled.
    pub fn crawl_config_differs(&self, other: &WebsiteRecord) -> bool {
        self.url != other.url
            || self.regex != other.regex
            || self.interval != other.interval
            || self.label != other.label
    }
}

/// Input for a new record, validated before it reaches storage or the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub url: String,
    pub label: String,
    pub interval: u64,
    pub active: bool,
    pub regex: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RecordDraft {
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.url)?;
        validate_label(&self.label)?;
        validate_regex(&self.regex)?;
        Ok(())
    }
}

/// Partial update of a record. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub url: Option<String>,
    pub label: Option<String>,
    pub interval: Option<u64>,
    pub active: Option<bool>,
    pub regex: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl RecordUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.url {
            validate_url(url)?;
        }
        if let Some(label) = &self.label {
            validate_label(label)?;
        }
        if let Some(regex) = &self.regex {
            validate_regex(regex)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self == &RecordUpdate::default()
    }

    pub fn apply(&self, record: &mut WebsiteRecord) {
        if let Some(url) = &self.url {
            record.url = url.clone();
        }
        if let Some(label) = &self.label {
            record.label = label.clone();
        }
        if let Some(interval) = self.interval {
            record.interval = interval;
        }
        if let Some(active) = self.active {
            record.active = active;
        }
        if let Some(regex) = &self.regex {
            record.regex = regex.clone();
        }
    }
}

fn validate_url(url: &str) -> Result<()> {
    let len = url.chars().count();
    if len == 0 || len > MAX_URL_LEN {
        return Err(CoreError::Validation(format!(
            "url must be 1-{} characters, got {}",
            MAX_URL_LEN, len
        )));
    }
    Ok(())
}

fn validate_label(label: &str) -> Result<()> {
    let len = label.chars().count();
    if len == 0 || len > MAX_LABEL_LEN {
        return Err(CoreError::Validation(format!(
            "label must be 1-{} characters, got {}",
            MAX_LABEL_LEN, len
        )));
    }
    Ok(())
}

fn validate_regex(regex: &str) -> Result<()> {
    if regex.is_empty() {
        return Err(CoreError::Validation(
            "boundary regex must not be empty (use `.*` to match everything)".to_string(),
        ));
    }
    Regex::new(regex)
        .map_err(|e| CoreError::Validation(format!("boundary regex does not compile: {}", e)))?;
    Ok(())
}

/// Splits comma-separated tag input. Blank entries are dropped, order kept, duplicates removed.
pub fn parse_tags(input: &str) -> Vec<String> {
    normalize_tags(input.split(','))
}

pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    InProgress,
    Finished,
    InQueue,
    NeverExecuted,
    /// The firing ended without a stored graph: the crawl fetched nothing, or
    /// persisting failed. The record keeps its previous graph.
    Unknown,
}

impl ExecutionStatus {
    pub fn code(&self) -> i64 {
        match self {
            ExecutionStatus::InProgress => 1,
            ExecutionStatus::Finished => 2,
            ExecutionStatus::InQueue => 3,
            ExecutionStatus::NeverExecuted => 4,
            ExecutionStatus::Unknown => 5,
        }
    }

    /// Total: anything outside 1..=5 reads back as `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ExecutionStatus::InProgress,
            2 => ExecutionStatus::Finished,
            3 => ExecutionStatus::InQueue,
            4 => ExecutionStatus::NeverExecuted,
            _ => ExecutionStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::InProgress => "IN PROGRESS",
            ExecutionStatus::Finished => "FINISHED",
            ExecutionStatus::InQueue => "IN QUEUE",
            ExecutionStatus::NeverExecuted => "NEVER EXECUTED",
            ExecutionStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for ExecutionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for ExecutionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Integer(code) => ExecutionStatus::from_code(code),
            _ => ExecutionStatus::Unknown,
        })
    }
}

/// One crawl run of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub record_id: i64,
    pub title: String,
    pub url: String,
    pub duration_ms: i64,
    pub last_crawl: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
}

/// A record with its tags and the outcome of its latest execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    #[serde(flatten)]
    pub record: WebsiteRecord,
    pub tags: Vec<String>,
    pub last_crawl: Option<DateTime<Utc>>,
    pub last_status: ExecutionStatus,
}

/// A persisted graph vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNode {
    pub id: i64,
    pub record_id: i64,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub crawl_time: DateTime<Utc>,
    pub boundary: bool,
}

/// A persisted directed edge between two nodes of the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEdge {
    pub id: i64,
    pub record_id: i64,
    pub source_id: i64,
    pub target_id: i64,
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> RecordDraft {
        RecordDraft {
            url: "https://example.com".to_string(),
            label: "example".to_string(),
            interval: 0,
            active: true,
            regex: ".*".to_string(),
            tags: vec![],
        }
    }

    #[test]
    fn test_valid_draft() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn test_url_bounds() {
        let mut d = draft();
        d.url = String::new();
        assert!(d.validate().is_err());
        d.url = "a".repeat(MAX_URL_LEN);
        assert!(d.validate().is_ok());
        d.url = "a".repeat(MAX_URL_LEN + 1);
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_label_bounds() {
        let mut d = draft();
        d.label = String::new();
        assert!(d.validate().is_err());
        d.label = "l".repeat(MAX_LABEL_LEN);
        assert!(d.validate().is_ok());
        d.label = "l".repeat(MAX_LABEL_LEN + 1);
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_regex_must_be_non_empty_and_compile() {
        let mut d = draft();
        d.regex = String::new();
        assert!(matches!(d.validate(), Err(CoreError::Validation(_))));
        d.regex = "([".to_string();
        assert!(matches!(d.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_update_validates_only_present_fields() {
        let update = RecordUpdate {
            interval: Some(60),
            ..Default::default()
        };
        assert!(update.validate().is_ok());

        let bad = RecordUpdate {
            regex: Some(String::new()),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(RecordUpdate::default().is_empty());
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(
            parse_tags(" news, ,blog,news ,"),
            vec!["news".to_string(), "blog".to_string()]
        );
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_status_codes_are_total() {
        for status in [
            ExecutionStatus::InProgress,
            ExecutionStatus::Finished,
            ExecutionStatus::InQueue,
            ExecutionStatus::NeverExecuted,
            ExecutionStatus::Unknown,
        ] {
            assert_eq!(ExecutionStatus::from_code(status.code()), status);
        }
        assert_eq!(ExecutionStatus::from_code(0), ExecutionStatus::Unknown);
        assert_eq!(ExecutionStatus::from_code(42), ExecutionStatus::Unknown);
        assert_eq!(ExecutionStatus::InQueue.to_string(), "IN QUEUE");
    }

    #[test]
    fn test_status_from_non_integer_sql_is_unknown() {
        let status = ExecutionStatus::column_result(ValueRef::Text(b"2")).unwrap();
        assert_eq!(status, ExecutionStatus::Unknown);
    }
}
