//! Channel specifications and row-level change events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;
use crate::state::ChannelStatus;

pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Equality predicate, rendered as `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqFilter {
    pub column: String,
    pub value: String,
}

impl EqFilter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(serde_json::Value::String(s)) => *s == self.value,
            Some(serde_json::Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl std::fmt::Display for EqFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// One row-change listener on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBinding {
    pub schema: String,
    pub table: String,
    /// `None` listens to every kind
    pub event: Option<ChangeKind>,
    pub filter: Option<EqFilter>,
}

impl ChangeBinding {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.into(),
            event: None,
            filter: None,
        }
    }

    pub fn with_event(mut self, kind: ChangeKind) -> Self {
        self.event = Some(kind);
        self
    }

    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some(EqFilter::new(column, value));
        self
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        if change.schema != self.schema || change.table != self.table {
            return false;
        }
        if self.event.is_some_and(|kind| kind != change.kind) {
            return false;
        }
        match (&self.filter, change.record()) {
            (Some(filter), Some(row)) => filter.matches(row),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Channel name plus the change bindings the backend should route to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub bindings: Vec<ChangeBinding>,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Vec::new(),
        }
    }

    pub fn with_binding(mut self, binding: ChangeBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        self.bindings.iter().any(|b| b.matches(change))
    }
}

/// Raw row event as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub new: Option<Row>,
    #[serde(default)]
    pub old: Option<Row>,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl RowChange {
    fn build(kind: ChangeKind, table: &str, new: Option<Row>, old: Option<Row>) -> Self {
        Self {
            kind,
            schema: "public".to_string(),
            table: table.to_string(),
            new,
            old,
            commit_timestamp: Some(Utc::now()),
        }
    }

    pub fn insert(table: &str, row: Row) -> Self {
        Self::build(ChangeKind::Insert, table, Some(row), None)
    }

    pub fn update(table: &str, row: Row) -> Self {
        Self::build(ChangeKind::Update, table, Some(row), None)
    }

    pub fn delete(table: &str, old: Row) -> Self {
        Self::build(ChangeKind::Delete, table, None, Some(old))
    }

    /// The new row, or the old one for deletes (where `new` arrives empty).
    pub fn record(&self) -> Option<&Row> {
        self.new
            .as_ref()
            .filter(|row| !row.is_empty())
            .or(self.old.as_ref())
    }

    pub fn str_field(&self, column: &str) -> Option<&str> {
        self.record()?.get(column)?.as_str()
    }

    /// Parse a timestamp column. Values without an offset are taken as UTC.
    pub fn timestamp_field(&self, column: &str) -> Option<DateTime<Utc>> {
        let raw = self.str_field(column)?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    /// Decode the current record into a typed row.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        let record = self
            .record()
            .ok_or_else(|| RealtimeError::Decode(format!("no record in {} change", self.table)))?;
        serde_json::from_value(serde_json::Value::Object(record.clone()))
            .map_err(|e| RealtimeError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(ChannelStatus),
    Change(RowChange),
}

/// Build a `Row` from a JSON object literal. Non-objects yield an empty row.
pub fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Row::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binding_filters_by_table_kind_and_column() {
        let binding = ChangeBinding::table("training_session").with_filter("business_id", "t1");

        let ours = RowChange::insert("training_session", row(json!({ "business_id": "t1" })));
        let theirs = RowChange::insert("training_session", row(json!({ "business_id": "t2" })));
        let other_table = RowChange::insert("exercise", row(json!({ "business_id": "t1" })));

        assert!(binding.matches(&ours));
        assert!(!binding.matches(&theirs));
        assert!(!binding.matches(&other_table));

        let inserts_only = binding.clone().with_event(ChangeKind::Insert);
        let update = RowChange::update("training_session", row(json!({ "business_id": "t1" })));
        assert!(!inserts_only.matches(&update));
    }

    #[test]
    fn test_delete_matches_on_old_row() {
        let binding = ChangeBinding::table("training_session").with_filter("business_id", "t1");
        let mut change = RowChange::delete("training_session", row(json!({ "business_id": "t1" })));
        change.new = Some(Row::new());

        assert!(binding.matches(&change));
        assert_eq!(change.str_field("business_id"), Some("t1"));
    }

    #[test]
    fn test_filter_display_and_numeric_match() {
        let filter = EqFilter::new("round", "3");
        assert_eq!(filter.to_string(), "round=eq.3");
        assert!(filter.matches(&row(json!({ "round": 3 }))));
        assert!(!filter.matches(&row(json!({ "round": null }))));
    }

    #[test]
    fn test_decode_backend_payload() {
        let change: RowChange = serde_json::from_value(json!({
            "eventType": "UPDATE",
            "schema": "public",
            "table": "user_training_session",
            "new": { "status": "checked_in" },
            "old": {},
            "commit_timestamp": "2025-03-01T09:00:00Z"
        }))
        .unwrap();

        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.str_field("status"), Some("checked_in"));
        assert!(change.commit_timestamp.is_some());
    }

    #[test]
    fn test_timestamp_field_accepts_naive_values() {
        let change = RowChange::insert(
            "user_training_session",
            row(json!({
                "with_offset": "2025-03-01T09:00:00+00:00",
                "naive": "2025-03-01T09:00:00.250",
                "garbage": "yesterday",
            })),
        );

        assert!(change.timestamp_field("with_offset").is_some());
        assert!(change.timestamp_field("naive").is_some());
        assert_eq!(change.timestamp_field("garbage"), None);
        assert_eq!(change.timestamp_field("missing"), None);
    }
}
