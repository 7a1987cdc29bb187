//! Schema validation for search and click events.
//!
//! Fields are checked in declaration order and the first violation wins, so an event with a
//! single bad field always reports that field. Field names in errors use the wire (camelCase)
//! names. An empty `queryTerms` and a `resultCount` of zero are valid: blank and zero-result
//! searches are exactly the traffic analysts want to see.
//!
//! `searchId` must be a UUID in canonical hyphenated form with no surrounding whitespace.
//! Hex digits may be upper or lower case; validated events carry the id lowercased, so an
//! upstream `"5F0C…"` reaches the sink as `"5f0c…"`.

use crate::error::{ValidationError, ValidationReason};
use crate::event::{
    ClickEvent, ClickEventFields, RawEvent, SearchEvent, SearchEventFields, ValidatedEvent,
};
use crate::time::{Clock, SystemClock};
use std::sync::Arc;
use uuid::Uuid;

/// Turns raw field bags into immutable, timestamped events.
#[derive(Debug, Clone)]
pub struct EventSchemaValidator {
    clock: Arc<dyn Clock>,
}

impl Default for EventSchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSchemaValidator {
    pub fn new() -> Self {
        Self { clock: Arc::new(SystemClock) }
    }

    /// Stamp events from `clock` instead of the system clock.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { clock: Arc::new(clock) }
    }

    pub(crate) fn with_shared_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn validate(&self, event: RawEvent) -> Result<ValidatedEvent, ValidationError> {
        match event {
            RawEvent::Search(fields) => self.validate_search(fields).map(ValidatedEvent::Search),
            RawEvent::Click(fields) => self.validate_click(fields).map(ValidatedEvent::Click),
        }
    }

    pub fn validate_search(&self, fields: SearchEventFields) -> Result<SearchEvent, ValidationError> {
        non_empty("serviceName", &fields.service_name)?;
        let search_id = parse_uuid("searchId", &fields.search_id)?;
        let result_count = non_negative("resultCount", fields.result_count)?;
        Ok(SearchEvent::new(
            fields.service_name,
            search_id,
            fields.index_name,
            fields.query_terms,
            result_count,
            fields.scoring_profile,
            self.clock.now(),
        ))
    }

    pub fn validate_click(&self, fields: ClickEventFields) -> Result<ClickEvent, ValidationError> {
        non_empty("serviceName", &fields.service_name)?;
        let search_id = parse_uuid("searchId", &fields.search_id)?;
        non_empty("docId", &fields.doc_id)?;
        let position = non_negative("position", fields.position)?;
        Ok(ClickEvent::new(fields.service_name, search_id, fields.doc_id, position, self.clock.now()))
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, ValidationReason::Empty));
    }
    Ok(())
}

// Only the 36-character hyphenated form; braced, urn and simple forms are refused.
fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid, ValidationError> {
    let malformed = || ValidationError::new(field, ValidationReason::MalformedUuid);
    if value.len() != 36 {
        return Err(malformed());
    }
    Uuid::try_parse(value).map_err(|_| malformed())
}

fn non_negative(field: &'static str, value: i64) -> Result<u64, ValidationError> {
    u64::try_from(value).map_err(|_| ValidationError::new(field, ValidationReason::Negative(value)))
}
