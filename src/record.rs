//! Result mapper: raw storage rows shaped into records according to the
//! projection the caller actually requested.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::error::{Result, TesseraError};
use crate::schema::EntityDef;
use crate::value::{Row, Value};

/// Relation payload attached to a record.
#[derive(Clone, Debug, PartialEq)]
pub enum RelationPayload {
    /// To-one relation: the related record, if any.
    One(Option<Box<Record>>),
    /// To-many relation: the (possibly windowed) child records.
    Many(Vec<Record>),
}

/// A typed result row: scalar fields plus any requested relation payloads
/// and `_count` projections. Fields never exceed what the projection asked
/// for.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Entity this record belongs to.
    pub entity: &'static str,
    /// Projected scalar fields, in schema order.
    pub fields: Vec<(&'static str, Value)>,
    /// Projected relations.
    pub relations: Vec<(&'static str, RelationPayload)>,
    /// Projected relation counts.
    pub counts: Vec<(&'static str, u64)>,
}

impl Record {
    /// Record carrying all scalar fields of a row (the `include`/default
    /// shape).
    pub fn from_row(entity: &EntityDef, row: &Row) -> Self {
        Self {
            entity: entity.name,
            fields: entity
                .fields
                .iter()
                .zip(row.iter())
                .map(|(def, value)| (def.name, value.clone()))
                .collect(),
            relations: Vec::new(),
            counts: Vec::new(),
        }
    }

    /// Record carrying only the selected scalar fields, in schema order.
    pub fn from_row_selected(entity: &EntityDef, row: &Row, selected: &[String]) -> Self {
        Self {
            entity: entity.name,
            fields: entity
                .fields
                .iter()
                .enumerate()
                .filter(|(_, def)| selected.iter().any(|s| s == def.name))
                .map(|(i, def)| (def.name, row[i].clone()))
                .collect(),
            relations: Vec::new(),
            counts: Vec::new(),
        }
    }

    /// Projected value of a scalar field, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Projected relation payload, if present.
    pub fn relation(&self, name: &str) -> Option<&RelationPayload> {
        self.relations
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Projected `_count` value, if present.
    pub fn count(&self, relation: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|(n, _)| *n == relation)
            .map(|(_, c)| *c)
    }

    fn required(&self, name: &str) -> Result<&Value> {
        self.get(name).ok_or_else(|| {
            TesseraError::validation(format!(
                "field '{}' not present in {} projection",
                name, self.entity
            ))
        })
    }

    /// Required string field.
    pub fn str_field(&self, name: &str) -> Result<&str> {
        match self.required(name)? {
            Value::String(s) => Ok(s),
            other => Err(decode_error(self.entity, name, "string", other)),
        }
    }

    /// Nullable string field.
    pub fn opt_str_field(&self, name: &str) -> Result<Option<&str>> {
        match self.required(name)? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Err(decode_error(self.entity, name, "string", other)),
        }
    }

    /// Required integer field.
    pub fn int_field(&self, name: &str) -> Result<i64> {
        match self.required(name)? {
            Value::Int(i) => Ok(*i),
            other => Err(decode_error(self.entity, name, "int", other)),
        }
    }

    /// Nullable integer field.
    pub fn opt_int_field(&self, name: &str) -> Result<Option<i64>> {
        match self.required(name)? {
            Value::Null => Ok(None),
            Value::Int(i) => Ok(Some(*i)),
            other => Err(decode_error(self.entity, name, "int", other)),
        }
    }

    /// Required boolean field.
    pub fn bool_field(&self, name: &str) -> Result<bool> {
        match self.required(name)? {
            Value::Bool(b) => Ok(*b),
            other => Err(decode_error(self.entity, name, "bool", other)),
        }
    }

    /// Required timestamp field (epoch nanoseconds).
    pub fn datetime_field(&self, name: &str) -> Result<i128> {
        match self.required(name)? {
            Value::DateTime(ns) => Ok(*ns),
            other => Err(decode_error(self.entity, name, "datetime", other)),
        }
    }

    /// Nullable timestamp field.
    pub fn opt_datetime_field(&self, name: &str) -> Result<Option<i128>> {
        match self.required(name)? {
            Value::Null => Ok(None),
            Value::DateTime(ns) => Ok(Some(*ns)),
            other => Err(decode_error(self.entity, name, "datetime", other)),
        }
    }

    /// JSON field in its stored tri-state form: `None` for the database
    /// null, otherwise the payload (which may be JSON `null`).
    pub fn json_field(&self, name: &str) -> Result<Option<&serde_json::Value>> {
        match self.required(name)? {
            Value::Null => Ok(None),
            Value::Json(v) => Ok(Some(v)),
            other => Err(decode_error(self.entity, name, "json", other)),
        }
    }
}

fn decode_error(entity: &'static str, field: &str, expected: &str, got: &Value) -> TesseraError {
    TesseraError::validation(format!(
        "cannot decode {entity}.{field} as {expected}; stored value is {}",
        got.type_name()
    ))
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let extra = usize::from(!self.counts.is_empty());
        let mut map =
            serializer.serialize_map(Some(self.fields.len() + self.relations.len() + extra))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        for (name, payload) in &self.relations {
            match payload {
                RelationPayload::One(rec) => map.serialize_entry(name, rec)?,
                RelationPayload::Many(recs) => map.serialize_entry(name, recs)?,
            }
        }
        if !self.counts.is_empty() {
            let counts: std::collections::BTreeMap<_, _> = self.counts.iter().copied().collect();
            map.serialize_entry("_count", &counts)?;
        }
        map.end()
    }
}
