use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::metrics::{parse_amount, parse_date};
use crate::schema::{RowVariant, is_sequence_field};

/// Per-attachment cap enforced before a file is embedded in a row.
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("attachment '{name}' is {size} bytes, limit is {limit} bytes")]
    AttachmentTooLarge {
        name: String,
        size: usize,
        limit: usize,
    },
    #[error("unknown attachment slot '{0}'")]
    UnknownSlot(String),
    #[error("row must be a JSON object")]
    NotAnObject,
}

/// One row of a tracker table: the display sequence number plus the
/// variant's fields, kept as the strings the user entered.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct RowRecord {
    pub sno: u32,
    pub fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub base64: String,
}

impl Attachment {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.base64.as_bytes())
    }
}

impl RowRecord {
    /// A row with every field of the variant present and empty.
    pub fn blank(variant: RowVariant) -> Self {
        let fields = variant
            .schema()
            .field_names()
            .map(|name| (name.to_string(), String::new()))
            .collect();
        RowRecord { sno: 0, fields }
    }

    /// Build a row from `(name, value)` pairs, resolving aliases and defaulting
    /// the rest of the schema to empty strings. Unknown names are dropped.
    pub fn from_pairs<K, V, I>(variant: RowVariant, pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let schema = variant.schema();
        let mut row = RowRecord::blank(variant);
        for (key, value) in pairs {
            let key = key.as_ref();
            if is_sequence_field(key) {
                let value: String = value.into();
                row.sno = value.trim().parse().unwrap_or(0);
                continue;
            }
            if let Some(name) = schema.resolve(key) {
                row.fields.insert(name.to_string(), value.into());
            }
        }
        row
    }

    /// Accept a row as it arrives over the wire or out of a local store. Numbers
    /// and booleans are stringified, nulls become empty.
    pub fn from_json(variant: RowVariant, value: &Value) -> Result<Self, RecordError> {
        let obj = value.as_object().ok_or(RecordError::NotAnObject)?;
        let pairs = obj.iter().map(|(k, v)| (k.as_str(), json_to_string(v)));
        Ok(RowRecord::from_pairs(variant, pairs))
    }

    /// Flat wire shape: `{"sno": "1", "efile": "...", ...}`.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("sno".to_string(), Value::String(self.sno.to_string()));
        for (k, v) in &self.fields {
            obj.insert(k.clone(), Value::String(v.clone()));
        }
        Value::Object(obj)
    }

    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        parse_date(self.get(field))
    }

    pub fn amount(&self, field: &str) -> Option<f64> {
        parse_amount(self.get(field))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }

    /// Case-insensitive match against every visible field.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.sno.to_string() == needle
            || self
                .fields
                .iter()
                .filter(|(k, _)| !k.ends_with("Base64"))
                .any(|(_, v)| v.to_lowercase().contains(&needle))
    }

    pub fn attachment(&self, variant: RowVariant, slot: &str) -> Option<Attachment> {
        let spec = variant.schema().attachment(slot)?;
        let name = self.get(spec.name_field);
        let data = self.get(spec.data_field);
        if name.is_empty() || data.is_empty() {
            return None;
        }
        Some(Attachment {
            name: name.to_string(),
            mime: self.get(spec.type_field).to_string(),
            base64: data.to_string(),
        })
    }

    /// Embed a file into the row as base64. Oversized files are rejected and
    /// leave the row untouched.
    pub fn attach(
        &mut self,
        variant: RowVariant,
        slot: &str,
        name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> Result<(), RecordError> {
        let spec = variant
            .schema()
            .attachment(slot)
            .ok_or_else(|| RecordError::UnknownSlot(slot.to_string()))?;

        if bytes.len() > MAX_ATTACHMENT_BYTES {
            return Err(RecordError::AttachmentTooLarge {
                name: name.to_string(),
                size: bytes.len(),
                limit: MAX_ATTACHMENT_BYTES,
            });
        }

        self.set(spec.name_field, name);
        self.set(spec.type_field, mime);
        self.set(spec.data_field, BASE64.encode(bytes));
        Ok(())
    }

    pub fn detach(&mut self, variant: RowVariant, slot: &str) -> Result<(), RecordError> {
        let spec = variant
            .schema()
            .attachment(slot)
            .ok_or_else(|| RecordError::UnknownSlot(slot.to_string()))?;
        for field in [spec.name_field, spec.data_field, spec.type_field] {
            self.set(field, "");
        }
        Ok(())
    }
}

fn json_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Parse a JSON array of rows; entries that are not objects are skipped.
pub fn rows_from_json(variant: RowVariant, value: &Value) -> Vec<RowRecord> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| RowRecord::from_json(variant, item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

pub fn rows_to_json(rows: &[RowRecord]) -> Value {
    Value::Array(rows.iter().map(RowRecord::to_json).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_maps_database_columns() {
        let row = RowRecord::from_json(
            RowVariant::ContractorList,
            &json!({
                "id": 7,
                "sno": "3",
                "contractor": "Acme",
                "value": 125000,
                "end_date": "2025-01-31",
                "created_at": "2024-01-01T00:00:00",
                "gst": null
            }),
        )
        .unwrap();

        assert_eq!(row.sno, 3);
        assert_eq!(row.get("contractor"), "Acme");
        assert_eq!(row.get("value"), "125000");
        assert_eq!(row.get("endDate"), "2025-01-31");
        assert_eq!(row.get("gst"), "");
        assert!(!row.fields.contains_key("id"));
        assert!(!row.fields.contains_key("created_at"));
        assert!(row.fields.contains_key("description"));
    }

    #[test]
    fn attachment_cap_is_enforced() {
        let mut row = RowRecord::blank(RowVariant::Epbg);
        let big = vec![0u8; MAX_ATTACHMENT_BYTES + 1];
        let err = row
            .attach(RowVariant::Epbg, "file", "bg.pdf", "application/pdf", &big)
            .unwrap_err();
        assert!(matches!(err, RecordError::AttachmentTooLarge { .. }));
        assert_eq!(row.get("fileName"), "");

        row.attach(RowVariant::Epbg, "bgNoAttachment", "bg.pdf", "application/pdf", b"%PDF")
            .unwrap();
        let att = row.attachment(RowVariant::Epbg, "bgNoAttachment").unwrap();
        assert_eq!(att.name, "bg.pdf");
        assert_eq!(att.decode().unwrap(), b"%PDF");
        assert!(row.attachment(RowVariant::Epbg, "file").is_none());
    }

    #[test]
    fn search_ignores_attachment_payloads() {
        let mut row = RowRecord::blank(RowVariant::BillTracker);
        row.set("contractor", "Blue Ridge Works");
        row.set("fileBase64", "QUJD");
        assert!(row.matches("ridge"));
        assert!(!row.matches("qujd"));
        assert!(row.matches(""));
    }
}
