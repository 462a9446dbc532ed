//! Timeline event models.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use super::document::{DocumentEntry, DocumentReference};
use super::primitives::{EventId, EventType};

/// One timeline entry.
///
/// Events are immutable once produced by the fetcher. Fields the client
/// does not interpret are kept in [`Event::extra`] so sinks can serialize
/// the event without losing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event id
    pub id: EventId,
    /// When the event happened
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Headline shown in the app
    #[serde(default)]
    pub title: String,
    /// Secondary line shown in the app
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Event type tag
    #[serde(default)]
    pub event_type: EventType,
    /// Processing status (e.g. `EXECUTED`, `CANCELED`)
    #[serde(default)]
    pub status: Option<String>,
    /// Monetary amount, if the event moves money
    #[serde(default)]
    pub amount: Option<Amount>,
    /// Detail payload, attached when detail retrieval is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<EventDetails>,
    /// Remaining wire fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// Document references carried by this event's details.
    ///
    /// Empty when details were not fetched or contain no documents.
    pub fn documents(&self) -> Vec<DocumentReference> {
        self.details
            .as_ref()
            .map(EventDetails::documents)
            .unwrap_or_default()
    }

    /// Returns `true` if the event happened strictly before `since`.
    pub fn is_older_than(&self, since: DateTime<Utc>) -> bool {
        self.timestamp < since
    }
}

/// Sort events newest first, the order the service streams them in.
pub fn sort_newest_first(events: &mut [Event]) {
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// A monetary amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amount {
    /// ISO currency code
    pub currency: String,
    /// Signed value
    pub value: Decimal,
    /// Display precision
    #[serde(default)]
    pub fraction_digits: Option<u32>,
}

/// Detail payload of an event (`timelineDetailV2`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDetails {
    /// Event id the details belong to
    pub id: EventId,
    /// Sections as shown in the app
    #[serde(default)]
    pub sections: Vec<DetailSection>,
}

impl EventDetails {
    /// All downloadable documents across the `documents` sections.
    pub fn documents(&self) -> Vec<DocumentReference> {
        self.sections
            .iter()
            .filter(|section| section.section_type == "documents")
            .filter_map(|section| {
                serde_json::from_value::<Vec<DocumentEntry>>(section.data.clone())
                    .map_err(|e| {
                        tracing::debug!(event_id = %self.id, error = %e, "skipping malformed documents section");
                    })
                    .ok()
            })
            .flatten()
            .filter_map(DocumentReference::from_entry)
            .collect()
    }
}

/// One section of an event's details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailSection {
    /// Section title
    #[serde(default)]
    pub title: Option<String>,
    /// Section type (`documents`, `table`, `header`, ...)
    #[serde(rename = "type")]
    pub section_type: String,
    /// Type-dependent payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Parse a service timestamp.
///
/// Accepts RFC 3339, the service's `2023-01-31T12:00:00.000+0000` form,
/// and as a last resort the first 19 characters read as UTC.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    let prefix = ts.get(..19)?;
    NaiveDateTime::parse_from_str(prefix, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {raw}")))
}
