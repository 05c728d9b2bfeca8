//! Defensive reading of untyped provider change events.
//!
//! Two shapes are accepted:
//!
//! ```json
//! {"mails": {"created": [...], "updated": [...], "deleted": ["pk"]}, "folders": {...}}
//! {"kind": "mail", "created": [...], "deleted": ["pk"]}
//! ```
//!
//! Records must be JSON objects carrying a string `pk`; anything else is
//! logged and skipped without affecting the rest of the event.

use crate::EmailError;
use cove_core::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque change notification as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(pub Value);

#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    Created { pk: String, record: Value },
    Updated { pk: String, record: Value },
    Deleted { pk: String },
}

impl RecordChange {
    pub fn pk(&self) -> &str {
        match self {
            RecordChange::Created { pk, .. }
            | RecordChange::Updated { pk, .. }
            | RecordChange::Deleted { pk } => pk,
        }
    }
}

impl RawEvent {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn from_json(text: &str) -> Result<Self, EmailError> {
        Ok(Self(serde_json::from_str(text)?))
    }

    /// Changes per kind, in [`EntityKind::ALL`] order. Within a kind the order
    /// is created, updated, deleted, so a delete in the same event wins.
    pub fn changes(&self) -> Result<Vec<(EntityKind, Vec<RecordChange>)>, EmailError> {
        let Value::Object(object) = &self.0 else {
            return Err(EmailError::MalformedEvent(format!(
                "expected an object, got {}",
                value_type(&self.0)
            )));
        };

        if let Some(kind) = object.get("kind") {
            let kind = kind
                .as_str()
                .and_then(parse_kind)
                .ok_or_else(|| EmailError::MalformedEvent(format!("unknown kind {kind}")))?;
            return Ok(vec![(kind, read_kind_changes(kind, object))]);
        }

        let mut changes = Vec::new();
        for kind in EntityKind::ALL {
            match object.get(kind.payload_key()) {
                None | Some(Value::Null) => {}
                Some(Value::Object(section)) => {
                    let kind_changes = read_kind_changes(kind, section);
                    if !kind_changes.is_empty() {
                        changes.push((kind, kind_changes));
                    }
                }
                Some(other) => tracing::warn!(
                    %kind,
                    "skipping section of type {}",
                    value_type(other)
                ),
            }
        }

        Ok(changes)
    }
}

fn parse_kind(name: &str) -> Option<EntityKind> {
    match name {
        "mail" | "mails" => Some(EntityKind::Mail),
        "folder" | "folders" => Some(EntityKind::Folder),
        "conversationEntry" | "conversationEntries" | "conversation_entry" => {
            Some(EntityKind::ConversationEntry)
        }
        "contact" | "contacts" => Some(EntityKind::Contact),
        _ => None,
    }
}

fn read_kind_changes(kind: EntityKind, section: &Map<String, Value>) -> Vec<RecordChange> {
    let mut changes = Vec::new();

    for record in records(kind, section, "created") {
        if let Some(pk) = record_pk(kind, &record) {
            changes.push(RecordChange::Created { pk, record });
        }
    }
    for record in records(kind, section, "updated") {
        if let Some(pk) = record_pk(kind, &record) {
            changes.push(RecordChange::Updated { pk, record });
        }
    }
    for id in records(kind, section, "deleted") {
        match id {
            Value::String(pk) => changes.push(RecordChange::Deleted { pk }),
            Value::Number(number) => changes.push(RecordChange::Deleted {
                pk: number.to_string(),
            }),
            other => tracing::warn!(%kind, "skipping deleted id of type {}", value_type(&other)),
        }
    }

    changes
}

fn records(kind: EntityKind, section: &Map<String, Value>, key: &str) -> Vec<Value> {
    match section.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            tracing::warn!(%kind, key, "expected an array, got {}", value_type(other));
            Vec::new()
        }
    }
}

fn record_pk(kind: EntityKind, record: &Value) -> Option<String> {
    let pk = match record.get("pk") {
        Some(Value::String(pk)) => Some(pk.clone()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    };
    if pk.is_none() {
        tracing::warn!(%kind, "skipping record without pk");
    }
    pk
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_sections_in_kind_order() {
        let event = RawEvent::new(json!({
            "contacts": {"deleted": ["c1"]},
            "mails": {
                "created": [{"pk": "m1"}],
                "updated": [{"pk": "m2", "unread": false}],
                "deleted": [3]
            }
        }));

        let changes = event.changes().expect("changes");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].0, EntityKind::Mail);
        let pks: Vec<&str> = changes[0].1.iter().map(RecordChange::pk).collect();
        assert_eq!(pks, ["m1", "m2", "3"]);
        assert_eq!(changes[1].0, EntityKind::Contact);
    }

    #[test]
    fn accepts_single_kind_shape() {
        let event = RawEvent::new(json!({"kind": "mail", "deleted": ["1"]}));
        let changes = event.changes().expect("changes");
        assert_eq!(
            changes,
            vec![(
                EntityKind::Mail,
                vec![RecordChange::Deleted { pk: "1".into() }]
            )]
        );
    }

    #[test]
    fn skips_malformed_records_but_keeps_the_rest() {
        let event = RawEvent::new(json!({
            "mails": {
                "created": [{"subject": "no pk"}, "junk", {"pk": "ok"}],
                "updated": {"pk": "not an array"},
                "deleted": [{"pk": "object"}, "gone"]
            },
            "folders": 42
        }));

        let changes = event.changes().expect("changes");
        assert_eq!(changes.len(), 1);
        let pks: Vec<&str> = changes[0].1.iter().map(RecordChange::pk).collect();
        assert_eq!(pks, ["ok", "gone"]);
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert!(RawEvent::new(json!([1, 2])).changes().is_err());
        assert!(RawEvent::new(json!({"kind": "calendar"})).changes().is_err());
    }
}
