//! Client record document type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    core::revision::Revision,
    types::{RecordId, StateRowId},
};

/// One client record: a JSON object with a string `id`.
///
/// Fields other than `id` are opaque to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Stable record identifier, unique within a snapshot.
    pub id: RecordId,
    /// Remaining document fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ClientRecord {
    /// Builds a record from an id and a JSON object of fields.
    ///
    /// Non-object `fields` values are stored under a `value` key.
    pub fn new(id: impl Into<RecordId>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(mut map) => {
                map.remove("id");
                map
            }
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Returns the full JSON document, `id` included.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }
}

/// Full legacy array of records, in display order.
pub type RecordsSnapshot = Vec<ClientRecord>;

/// One row of the normalized v2 table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecordRow {
    /// Record id.
    pub id: RecordId,
    /// Decoded record document.
    pub record: ClientRecord,
    /// Content hash stored alongside the document.
    pub record_hash: String,
    /// Legacy singleton row this record was derived from.
    pub source_state_row_id: StateRowId,
    /// Legacy revision at which the row content was last written.
    pub source_state_updated_at: Option<Revision>,
    /// Row creation time.
    pub created_at: Option<Revision>,
    /// Last content change time.
    pub updated_at: Option<Revision>,
    /// Clock of the write operation that last touched this row.
    pub write_timestamp: Option<Revision>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn id_is_lifted_out_of_fields() {
        let rec = ClientRecord::new("c-1", json!({"id": "ignored", "name": "Acme"}));
        assert_eq!(rec.id, "c-1");
        assert_eq!(rec.to_value(), json!({"id": "c-1", "name": "Acme"}));
    }

    #[test]
    fn serde_flattens_fields() {
        let rec: ClientRecord =
            serde_json::from_value(json!({"id": "c-9", "balance": 12})).expect("decode");
        assert_eq!(rec.fields.get("balance"), Some(&json!(12)));
        assert_eq!(serde_json::to_value(&rec).expect("encode"), json!({"id": "c-9", "balance": 12}));
    }
}
