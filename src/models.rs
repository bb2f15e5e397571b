use crate::errors::{AppError, AppResult, ErrorKind};
use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Unique, totally ordered key of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(pub DateTime<Utc>);

impl RecordKey {
    /// Truncates to microseconds, the precision keys are stored at, and
    /// rejects years outside 0000-9999.
    pub fn new(at: DateTime<Utc>) -> AppResult<Self> {
        if !(0..=9999).contains(&at.year()) {
            return Err(AppError::Invalid(format!("record key {at} is outside years 0000-9999")));
        }
        Ok(Self(at.trunc_subsecs(6)))
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|error| AppError::Invalid(format!("invalid record key {raw:?}: {error}")))?;
        Self::new(parsed.with_timezone(&Utc))
    }

    /// Same key at storage precision. Keys built directly from a `DateTime`
    /// may carry nanoseconds the store drops.
    pub fn normalized(self) -> AppResult<Self> {
        Self::new(self.0)
    }

    /// Fixed-width rendering; for keys built through `new` lexical order in
    /// storage matches key order.
    pub fn as_storage(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_storage())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grouping {
    Year,
    #[default]
    Month,
    Day,
}

impl Grouping {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
        }
    }

    /// Truncates a record key to the start of its group.
    pub fn key_for(self, key: &RecordKey) -> GroupKey {
        let date = key.date();
        let start = match self {
            Self::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
            Self::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
            Self::Day => Some(date),
        }
        .unwrap_or(date);
        GroupKey {
            grouping: self,
            start,
        }
    }
}

/// Coarse key shared by all records of one bucket, e.g. `2024-03`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    grouping: Grouping,
    start: NaiveDate,
}

impl GroupKey {
    pub fn grouping(&self) -> Grouping {
        self.grouping
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.grouping {
            Grouping::Year => write!(f, "{:04}", self.start.year()),
            Grouping::Month => write!(f, "{:04}-{:02}", self.start.year(), self.start.month()),
            Grouping::Day => write!(f, "{}", self.start.format("%Y-%m-%d")),
        }
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// List projection of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub key: RecordKey,
    pub title: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub group_key: GroupKey,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Marker {
    Loading,
    Empty,
    Exhausted,
}

/// Buckets in descending group order followed by at most one marker.
/// `Marker::Empty` only ever appears without buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedList {
    pub(crate) buckets: Vec<Bucket>,
    pub(crate) marker: Option<Marker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Row<'a> {
    Bucket(&'a Bucket),
    Loading,
    Empty,
    Exhausted,
}

impl Serialize for GroupedList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    /// Only records on or before this key.
    pub until: Option<RecordKey>,
    /// Case-insensitive word match on title or body.
    pub search: Option<String>,
}

impl RecordFilter {
    pub fn until(key: RecordKey) -> Self {
        Self {
            until: Some(key),
            search: None,
        }
    }

    pub fn search(term: impl Into<String>) -> Self {
        Self {
            until: None,
            search: Some(term.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub key: RecordKey,
    pub title: String,
    pub body: String,
    pub thumbnail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntryPayload {
    pub key: Option<RecordKey>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntryPayload {
    pub key: RecordKey,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSettings {
    pub page_size: usize,
    pub grouping: Grouping,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            grouping: Grouping::Month,
        }
    }
}

impl ListSettings {
    pub fn validate(&self) -> AppResult<()> {
        if self.page_size == 0 {
            return Err(AppError::Invalid("pageSize must be greater than zero".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    LoadNew,
    Refresh,
    LoadMore,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadNew => "load-new",
            Self::Refresh => "refresh",
            Self::LoadMore => "load-more",
            Self::Delete => "delete",
        }
    }
}

/// State handed to observers. The list behind the `Arc` is never mutated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshot {
    pub revision: u64,
    #[serde(serialize_with = "serialize_shared_list")]
    pub list: Arc<GroupedList>,
    pub in_flight: bool,
    pub refreshing: bool,
}

fn serialize_shared_list<S: Serializer>(list: &Arc<GroupedList>, serializer: S) -> Result<S::Ok, S::Error> {
    list.as_ref().serialize(serializer)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListError {
    pub error_id: String,
    pub kind: ErrorKind,
    pub operation: Operation,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ListEvent {
    State(ListSnapshot),
    Error(ListError),
}
