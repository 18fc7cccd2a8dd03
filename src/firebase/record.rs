//! Application records and their local-only metadata
//!
//! A record is stored as one document keyed by its numeric id. Only `data`
//! is ever sent to the backend; `local` exists on this side alone.

use crate::firebase::backend::Document;
use crate::firebase::error::StoreError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Key of the sync flag in loose JSON records coming from the UI layer.
pub const LOCAL_SYNC_FIELD: &str = "_synced";
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(RecordId)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalMeta {
    /// Whether the local copy has been uploaded
    pub synced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    pub id: RecordId,
    pub data: T,
    pub local: LocalMeta,
}

impl<T> Record<T> {
    pub fn new(id: RecordId, data: T) -> Self {
        Self {
            id,
            data,
            local: LocalMeta::default(),
        }
    }

    pub fn with_synced(mut self, synced: bool) -> Self {
        self.local.synced = synced;
        self
    }
}

impl<T: Serialize> Record<T> {
    /// Fields written to the backend. Never includes local metadata.
    pub fn persisted_fields(&self) -> Result<Map<String, Value>, StoreError> {
        to_object(&self.data).map_err(|kind| {
            StoreError::InvalidRecord(format!(
                "record {} must serialize to an object, got {}",
                self.id, kind
            ))
        })
    }

    /// The record as the UI layer sees it: `id` plus persisted fields.
    pub fn to_json(&self) -> Result<Value, StoreError> {
        let mut object = Map::new();
        object.insert(ID_FIELD.to_string(), Value::from(self.id.0));
        for (key, value) in self.persisted_fields()? {
            if key != ID_FIELD {
                object.insert(key, value);
            }
        }
        Ok(Value::Object(object))
    }
}

impl<T: DeserializeOwned> Record<T> {
    /// Splits a loose object such as `{"id": 100, "amount": 50, "_synced": false}`
    /// into id, persisted data and local metadata.
    pub fn from_json(value: Value) -> Result<Self, StoreError> {
        let Value::Object(mut fields) = value else {
            return Err(StoreError::InvalidRecord(
                "record must be a JSON object".to_string(),
            ));
        };

        let id = match fields.remove(ID_FIELD) {
            Some(raw) => parse_id(&raw).ok_or_else(|| {
                StoreError::InvalidRecord(format!("`id` must be an integer, got {}", raw))
            })?,
            None => {
                return Err(StoreError::InvalidRecord(
                    "record is missing its `id` field".to_string(),
                ))
            }
        };

        let synced = match fields.remove(LOCAL_SYNC_FIELD) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => flag,
            Some(other) => {
                return Err(StoreError::InvalidRecord(format!(
                    "`{}` must be a boolean, got {}",
                    LOCAL_SYNC_FIELD, other
                )))
            }
        };

        let data = serde_json::from_value(Value::Object(fields))?;
        Ok(Record::new(id, data).with_synced(synced))
    }

    /// Rebuilds a record from a stored document. The id comes from the
    /// document key; anything read back from the backend counts as synced.
    pub fn from_document(doc: Document) -> Result<Self, StoreError> {
        let id: RecordId = doc.id.parse().map_err(|_| {
            StoreError::Decode(format!("document id `{}` is not an integer", doc.id))
        })?;

        let mut fields = doc.fields;
        fields.remove(ID_FIELD);

        let data = serde_json::from_value(Value::Object(fields))
            .map_err(|e| StoreError::Decode(format!("document {}: {}", doc.id, e)))?;

        Ok(Record::new(id, data).with_synced(true))
    }
}

fn parse_id(raw: &Value) -> Option<RecordId> {
    match raw {
        Value::Number(n) => n.as_i64().map(RecordId),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Serializes `value`, returning the JSON kind on non-objects.
pub(crate) fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, &'static str> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Err("null"),
        Ok(Value::Bool(_)) => Err("a boolean"),
        Ok(Value::Number(_)) => Err("a number"),
        Ok(Value::String(_)) => Err("a string"),
        Ok(Value::Array(_)) => Err("an array"),
        Err(_) => Err("an unserializable value"),
    }
}
