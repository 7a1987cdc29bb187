//! Search and click events.
//!
//! Producers build raw `*Fields` bags; `EventSchemaValidator` turns them into immutable
//! `SearchEvent` / `ClickEvent` values stamped with a creation time. Only validated events can
//! be buffered or delivered.
//!
//! Wire shape (what sinks receive from `event_to_json`):
//!
//! ```json
//! {"kind":"search","serviceName":"svc","searchId":"1111…","indexName":"idx",
//!  "queryTerms":"shoes","resultCount":5,"scoringProfile":null,"timestamp":1700000000000}
//! {"kind":"click","serviceName":"svc","searchId":"1111…","docId":"doc42",
//!  "position":2,"timestamp":1700000000100}
//! ```

use crate::time::epoch_millis;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// Unvalidated search event as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchEventFields {
    pub service_name: String,
    /// Correlation id as received; must parse as a UUID.
    pub search_id: String,
    pub index_name: String,
    /// Raw user input. Empty is valid.
    pub query_terms: String,
    pub result_count: i64,
    pub scoring_profile: Option<String>,
}

/// Unvalidated click event as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickEventFields {
    pub service_name: String,
    pub search_id: String,
    pub doc_id: String,
    /// Rank within one result page.
    pub position: i64,
}

fn ser_epoch_millis<S: Serializer>(at: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(epoch_millis(*at))
}

/// A validated search event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEvent {
    service_name: String,
    search_id: Uuid,
    index_name: String,
    query_terms: String,
    result_count: u64,
    scoring_profile: Option<String>,
    #[serde(serialize_with = "ser_epoch_millis")]
    timestamp: SystemTime,
}

impl SearchEvent {
    pub(crate) fn new(
        service_name: String,
        search_id: Uuid,
        index_name: String,
        query_terms: String,
        result_count: u64,
        scoring_profile: Option<String>,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            service_name,
            search_id,
            index_name,
            query_terms,
            result_count,
            scoring_profile,
            timestamp,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
    pub fn search_id(&self) -> Uuid {
        self.search_id
    }
    pub fn index_name(&self) -> &str {
        &self.index_name
    }
    pub fn query_terms(&self) -> &str {
        &self.query_terms
    }
    pub fn result_count(&self) -> u64 {
        self.result_count
    }
    pub fn scoring_profile(&self) -> Option<&str> {
        self.scoring_profile.as_deref()
    }
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

/// A validated click event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    service_name: String,
    search_id: Uuid,
    doc_id: String,
    position: u64,
    #[serde(serialize_with = "ser_epoch_millis")]
    timestamp: SystemTime,
}

impl ClickEvent {
    pub(crate) fn new(
        service_name: String,
        search_id: Uuid,
        doc_id: String,
        position: u64,
        timestamp: SystemTime,
    ) -> Self {
        Self { service_name, search_id, doc_id, position, timestamp }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
    pub fn search_id(&self) -> Uuid {
        self.search_id
    }
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }
    pub fn position(&self) -> u64 {
        self.position
    }
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

/// Which schema an event follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Search,
    Click,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Search => f.write_str("search"),
            EventKind::Click => f.write_str("click"),
        }
    }
}

/// Input to the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Search(SearchEventFields),
    Click(ClickEventFields),
}

impl RawEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RawEvent::Search(_) => EventKind::Search,
            RawEvent::Click(_) => EventKind::Click,
        }
    }
}

impl From<SearchEventFields> for RawEvent {
    fn from(fields: SearchEventFields) -> Self {
        RawEvent::Search(fields)
    }
}

impl From<ClickEventFields> for RawEvent {
    fn from(fields: ClickEventFields) -> Self {
        RawEvent::Click(fields)
    }
}

/// An event that passed schema validation. The only thing the buffer accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatedEvent {
    Search(SearchEvent),
    Click(ClickEvent),
}

impl ValidatedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ValidatedEvent::Search(_) => EventKind::Search,
            ValidatedEvent::Click(_) => EventKind::Click,
        }
    }

    pub fn search_id(&self) -> Uuid {
        match self {
            ValidatedEvent::Search(e) => e.search_id,
            ValidatedEvent::Click(e) => e.search_id,
        }
    }

    pub fn service_name(&self) -> &str {
        match self {
            ValidatedEvent::Search(e) => &e.service_name,
            ValidatedEvent::Click(e) => &e.service_name,
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        match self {
            ValidatedEvent::Search(e) => e.timestamp,
            ValidatedEvent::Click(e) => e.timestamp,
        }
    }

    pub fn as_search(&self) -> Option<&SearchEvent> {
        match self {
            ValidatedEvent::Search(e) => Some(e),
            ValidatedEvent::Click(_) => None,
        }
    }

    pub fn as_click(&self) -> Option<&ClickEvent> {
        match self {
            ValidatedEvent::Click(e) => Some(e),
            ValidatedEvent::Search(_) => None,
        }
    }
}

impl fmt::Display for ValidatedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatedEvent::Search(e) => write!(
                f,
                "Search(id={}, index={}, terms={:?}, results={})",
                e.search_id, e.index_name, e.query_terms, e.result_count
            ),
            ValidatedEvent::Click(e) => {
                write!(f, "Click(id={}, doc={}, pos={})", e.search_id, e.doc_id, e.position)
            }
        }
    }
}

/// A batch handed to a sink in one call. Order is delivery order.
pub type Batch = Vec<ValidatedEvent>;

/// JSON representation sent to sinks.
pub fn event_to_json(event: &ValidatedEvent) -> serde_json::Value {
    serde_json::to_value(event).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "event serialization failed");
        serde_json::Value::Null
    })
}
