//! Older on-disk shapes of the sync state, normalized at the repository boundary.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Every shape a synced-order entry has been persisted as.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StoredDestinationIds {
    List(Vec<String>),
    Single(String),
    LegacyMany { notion_page_ids: Vec<String> },
    LegacyOne { notion_page_id: String },
    Unrecognized(Value),
}

impl StoredDestinationIds {
    pub fn into_ids(self) -> Vec<String> {
        match self {
            Self::List(ids) | Self::LegacyMany { notion_page_ids: ids } => ids,
            Self::Single(id) | Self::LegacyOne { notion_page_id: id } => vec![id],
            Self::Unrecognized(value) => {
                tracing::warn!(%value, "unrecognized synced-order entry, ignoring");
                Vec::new()
            }
        }
    }
}

/// Normalize any stored synced-order value to its list of destination IDs.
pub fn normalize_destination_ids(value: Value) -> Vec<String> {
    match serde_json::from_value::<StoredDestinationIds>(value) {
        Ok(stored) => stored.into_ids(),
        Err(_) => Vec::new(),
    }
}

/// Same as [`normalize_destination_ids`] for a text column: text that is not
/// JSON at all is a bare ID written before the column held JSON.
pub fn destination_ids_from_text(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => normalize_destination_ids(value),
        Err(_) if !raw.trim().is_empty() => vec![raw.trim().to_owned()],
        Err(_) => Vec::new(),
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO timestamp taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Serde adapter for optional timestamps that tolerates naive and unparsable values.
pub mod lenient_timestamp {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(|s| {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                tracing::warn!(value = s, "unparsable timestamp in sync state, treating as unset");
            }
            parsed
        }))
    }
}
