//! Reference in-memory storage backend.
//!
//! One [`Table`] per entity, rows keyed by primary key in a `BTreeMap` so
//! scans are deterministic. The whole [`Tables`] value is cheap to clone,
//! which is what gives transactions their copy-on-write overlay: mutate the
//! clone, swap it in on commit, drop it on rollback.

mod raw;

pub use raw::{parse_statement, RawStatement, RawVerb};

use std::collections::BTreeMap;

use rand::RngCore;
use rustc_hash::FxHashMap;

use crate::error::{Result, TesseraError};
use crate::schema::Schema;
use crate::value::{Row, Value};

/// Rows of one entity, keyed by primary-key value.
#[derive(Clone, Debug, Default)]
pub struct Table {
    /// Stored rows in primary-key order.
    pub rows: BTreeMap<String, Row>,
}

/// All entity tables of one database.
#[derive(Clone, Debug, Default)]
pub struct Tables {
    tables: FxHashMap<&'static str, Table>,
}

impl Tables {
    /// Empty tables for every entity in the schema.
    pub fn new(schema: &Schema) -> Self {
        let mut tables = FxHashMap::default();
        for entity in schema.entities() {
            tables.insert(entity.name, Table::default());
        }
        Self { tables }
    }

    /// Read access to an entity's table.
    pub fn table(&self, entity: &str) -> Result<&Table> {
        self.tables
            .get(entity)
            .ok_or_else(|| TesseraError::Storage(format!("no table for entity '{entity}'")))
    }

    /// Write access to an entity's table.
    pub fn table_mut(&mut self, entity: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(entity)
            .ok_or_else(|| TesseraError::Storage(format!("no table for entity '{entity}'")))
    }

    /// Clones all rows of an entity for the planner pipeline.
    pub fn scan(&self, entity: &str) -> Result<Vec<Row>> {
        Ok(self.table(entity)?.rows.values().cloned().collect())
    }
}

/// Generates a collision-resistant row identifier (`c` + 24 hex chars).
pub fn generate_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("c{}", hex::encode(bytes))
}

/// Generates a random UUID-shaped string (version 4 layout).
pub fn generate_uuid() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let h = hex::encode(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

/// Extracts the primary-key string of a row.
pub fn row_pk(row: &Row, pk_pos: usize) -> Result<&str> {
    match &row[pk_pos] {
        Value::String(s) => Ok(s),
        other => Err(TesseraError::Storage(format!(
            "primary key is not a string (found {})",
            other.type_name()
        ))),
    }
}
