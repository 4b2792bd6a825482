//! Mutation engine: create/update/delete primitives with referential
//! integrity over the schema's relation graph.
//!
//! Deletes run in two phases: a planning pass walks the relation graph and
//! collects every row to remove or detach (failing on a restrict policy
//! before anything changes), then an apply pass executes the plan. Batch
//! callers validate every row up front, so a failure leaves zero effect.

use std::cmp::Ordering;

use tracing::debug;

use crate::error::{ConstraintKind, Result, TesseraError};
use crate::schema::{
    Cardinality, DefaultValue, EntityDef, FieldDef, FieldType, ReferentialAction, Schema,
};
use crate::store::{self, Tables};
use crate::value::{JsonInput, Row, Value};

/// Value written by a create or `set` update.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteValue {
    /// A scalar value.
    Value(Value),
    /// A JSON column write with explicit null kind.
    Json(JsonInput),
}

/// Field values supplied to `create`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateData {
    /// Field name/value pairs; omitted fields take schema defaults.
    pub fields: Vec<(String, WriteValue)>,
}

impl CreateData {
    /// Empty create (all defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a scalar field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields
            .push((field.into(), WriteValue::Value(value.into())));
        self
    }

    /// Sets a JSON field with an explicit null kind.
    pub fn set_json(mut self, field: impl Into<String>, value: JsonInput) -> Self {
        self.fields.push((field.into(), WriteValue::Json(value)));
        self
    }

    fn get(&self, field: &str) -> Option<&WriteValue> {
        self.fields.iter().find(|(n, _)| n == field).map(|(_, v)| v)
    }
}

/// One field mutation inside an update.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldUpdate {
    /// Overwrite the stored value.
    Set(WriteValue),
    /// Add to a numeric field.
    Increment(Value),
    /// Subtract from a numeric field.
    Decrement(Value),
    /// Multiply a numeric field.
    Multiply(Value),
    /// Divide a numeric field; a zero operand fails validation.
    Divide(Value),
}

/// Field mutations supplied to `update`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateData {
    /// Field name/mutation pairs.
    pub fields: Vec<(String, FieldUpdate)>,
}

impl UpdateData {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a scalar field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((
            field.into(),
            FieldUpdate::Set(WriteValue::Value(value.into())),
        ));
        self
    }

    /// Overwrites a JSON field with an explicit null kind.
    pub fn set_json(mut self, field: impl Into<String>, value: JsonInput) -> Self {
        self.fields
            .push((field.into(), FieldUpdate::Set(WriteValue::Json(value))));
        self
    }

    /// Adds to a numeric field.
    pub fn increment(mut self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.fields
            .push((field.into(), FieldUpdate::Increment(by.into())));
        self
    }

    /// Subtracts from a numeric field.
    pub fn decrement(mut self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.fields
            .push((field.into(), FieldUpdate::Decrement(by.into())));
        self
    }

    /// Multiplies a numeric field.
    pub fn multiply(mut self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.fields
            .push((field.into(), FieldUpdate::Multiply(by.into())));
        self
    }

    /// Divides a numeric field.
    pub fn divide(mut self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.fields
            .push((field.into(), FieldUpdate::Divide(by.into())));
        self
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a.partial_cmp_value(b) == Some(Ordering::Equal)
}

fn validate_scalar_write(
    schema: &Schema,
    entity: &EntityDef,
    def: &FieldDef,
    value: &Value,
) -> Result<()> {
    if value.is_null() {
        if !def.nullable {
            return Err(TesseraError::validation(format!(
                "field '{}.{}' is required and cannot be null",
                entity.name, def.name
            )));
        }
        return Ok(());
    }
    let ok = match def.ty {
        FieldType::String => matches!(value, Value::String(_)),
        FieldType::Int => matches!(value, Value::Int(_)),
        FieldType::Float => matches!(value, Value::Int(_) | Value::Float(_)),
        FieldType::Bool => matches!(value, Value::Bool(_)),
        FieldType::DateTime => matches!(value, Value::DateTime(_)),
        FieldType::Enum(name) => match value {
            Value::String(s) => {
                if !schema.enum_values(name)?.contains(&s.as_str()) {
                    return Err(TesseraError::validation(format!(
                        "'{s}' is not a variant of enum {name}"
                    )));
                }
                true
            }
            _ => false,
        },
        FieldType::Json => matches!(value, Value::Json(_)),
    };
    if !ok {
        return Err(TesseraError::validation(format!(
            "cannot write {} into '{}.{}' ({:?})",
            value.type_name(),
            entity.name,
            def.name,
            def.ty
        )));
    }
    Ok(())
}

fn resolve_write(
    schema: &Schema,
    entity: &EntityDef,
    def: &FieldDef,
    write: &WriteValue,
) -> Result<Option<Value>> {
    match write {
        WriteValue::Value(v) => {
            validate_scalar_write(schema, entity, def, v)?;
            Ok(Some(v.clone()))
        }
        WriteValue::Json(input) => {
            if def.ty != FieldType::Json {
                return Err(TesseraError::validation(format!(
                    "JSON write applied to non-JSON field '{}.{}'",
                    entity.name, def.name
                )));
            }
            match input.clone().into_stored() {
                Some(Value::Null) if !def.nullable => Err(TesseraError::validation(format!(
                    "field '{}.{}' is required and cannot be null",
                    entity.name, def.name
                ))),
                resolved => Ok(resolved),
            }
        }
    }
}

fn default_value(def: &FieldDef) -> Option<Value> {
    match def.default.as_ref()? {
        DefaultValue::Value(v) => Some(v.clone()),
        DefaultValue::Now => Some(Value::now()),
        DefaultValue::GeneratedId => Some(Value::String(store::generate_id())),
        DefaultValue::GeneratedUuid => Some(Value::String(store::generate_uuid())),
    }
}

/// Builds a full row from create data, applying schema defaults. Performs
/// no table-level checks; see [`insert`].
pub fn build_row(schema: &Schema, entity: &EntityDef, data: &CreateData) -> Result<Row> {
    for (name, _) in &data.fields {
        entity.field_def(name)?;
    }
    let mut row = Vec::with_capacity(entity.fields.len());
    for def in &entity.fields {
        let value = match data.get(def.name) {
            Some(write) => resolve_write(schema, entity, def, write)?
                .or_else(|| default_value(def)),
            None => default_value(def),
        };
        match value {
            Some(v) => row.push(v),
            None => {
                return Err(TesseraError::validation(format!(
                    "missing required field '{}.{}'",
                    entity.name, def.name
                )))
            }
        }
    }
    Ok(row)
}

/// Checks every unique key of the row against the table, excluding
/// `exclude_pk` (for updates).
pub fn check_uniques(
    entity: &EntityDef,
    tables: &Tables,
    row: &Row,
    exclude_pk: Option<&str>,
) -> Result<()> {
    let table = tables.table(entity.name)?;
    for key in &entity.uniques {
        let positions: Vec<usize> = key
            .fields
            .iter()
            .map(|f| entity.field_pos(f).expect("schema-checked"))
            .collect();
        // Null members opt the row out of the constraint.
        if positions.iter().any(|p| row[*p].is_null()) {
            continue;
        }
        for (pk, existing) in &table.rows {
            if exclude_pk == Some(pk.as_str()) {
                continue;
            }
            if positions.iter().all(|p| values_equal(&existing[*p], &row[*p])) {
                return Err(TesseraError::constraint(
                    entity.name,
                    ConstraintKind::Unique,
                    key.name,
                ));
            }
        }
    }
    Ok(())
}

/// Checks that every non-null foreign key on the row resolves to an
/// existing target row. Ownership keys (`userId`) report as ownership
/// violations.
pub fn check_foreign_keys(
    schema: &Schema,
    entity: &EntityDef,
    tables: &Tables,
    row: &Row,
) -> Result<()> {
    for rel in &entity.relations {
        if rel.cardinality != Cardinality::One {
            continue;
        }
        let fk_pos = entity.field_pos(rel.fk_field).expect("schema-checked");
        let fk = &row[fk_pos];
        if fk.is_null() {
            continue;
        }
        let target = schema.entity(rel.target)?;
        let ref_pos = target.field_pos(rel.references).expect("schema-checked");
        let exists = tables
            .table(rel.target)?
            .rows
            .values()
            .any(|r| values_equal(&r[ref_pos], fk));
        if !exists {
            let kind = if rel.fk_field == "userId" {
                ConstraintKind::Ownership
            } else {
                ConstraintKind::ForeignKey
            };
            return Err(TesseraError::constraint(entity.name, kind, rel.fk_field));
        }
    }
    Ok(())
}

/// Walks the parent chain from `parent_pk` and fails if it reaches
/// `own_pk`. Bounded by the table size, so a pre-existing corrupt loop
/// cannot hang the walk.
pub fn check_ancestry(
    entity: &EntityDef,
    tables: &Tables,
    fk_pos: usize,
    own_pk: &str,
    parent_pk: &Value,
) -> Result<()> {
    let table = tables.table(entity.name)?;
    let mut current = parent_pk.clone();
    for _ in 0..=table.rows.len() {
        let Value::String(pk) = &current else {
            return Ok(());
        };
        if pk == own_pk {
            return Err(TesseraError::constraint(
                entity.name,
                ConstraintKind::Cycle,
                "parentId",
            ));
        }
        match table.rows.get(pk) {
            Some(row) => current = row[fk_pos].clone(),
            None => return Ok(()),
        }
    }
    Ok(())
}

fn check_self_relations(
    entity: &EntityDef,
    tables: &Tables,
    row: &Row,
    own_pk: &str,
) -> Result<()> {
    for rel in &entity.relations {
        if rel.cardinality != Cardinality::One || !rel.self_referential {
            continue;
        }
        let fk_pos = entity.field_pos(rel.fk_field).expect("schema-checked");
        let fk = &row[fk_pos];
        if !fk.is_null() {
            check_ancestry(entity, tables, fk_pos, own_pk, fk)?;
        }
    }
    Ok(())
}

/// Validates and inserts one row built from create data. Returns the stored
/// row.
pub fn insert(
    schema: &Schema,
    tables: &mut Tables,
    entity: &EntityDef,
    data: &CreateData,
) -> Result<Row> {
    let row = build_row(schema, entity, data)?;
    let pk = store::row_pk(&row, entity.pk_pos())?.to_owned();
    check_uniques(entity, tables, &row, None)?;
    check_foreign_keys(schema, entity, tables, &row)?;
    check_self_relations(entity, tables, &row, &pk)?;
    debug!(entity = entity.name, id = %pk, "row created");
    tables.table_mut(entity.name)?.rows.insert(pk, row.clone());
    Ok(row)
}

fn apply_numeric(
    entity: &EntityDef,
    def: &FieldDef,
    stored: &Value,
    update: &FieldUpdate,
) -> Result<Value> {
    if !def.ty.is_numeric() {
        return Err(TesseraError::validation(format!(
            "relative update requires a numeric field, '{}.{}' is {:?}",
            entity.name, def.name, def.ty
        )));
    }
    let operand = match update {
        FieldUpdate::Increment(v)
        | FieldUpdate::Decrement(v)
        | FieldUpdate::Multiply(v)
        | FieldUpdate::Divide(v) => v,
        FieldUpdate::Set(_) => unreachable!("set handled by caller"),
    };
    if !matches!(operand, Value::Int(_) | Value::Float(_)) {
        return Err(TesseraError::validation(format!(
            "numeric operand expected for '{}.{}', got {}",
            entity.name,
            def.name,
            operand.type_name()
        )));
    }
    if matches!(update, FieldUpdate::Divide(_)) && is_zero(operand) {
        return Err(TesseraError::validation(format!(
            "division by zero on '{}.{}'",
            entity.name, def.name
        )));
    }
    // A stored null stays null under relative updates.
    if stored.is_null() {
        return Ok(Value::Null);
    }
    match def.ty {
        FieldType::Int => {
            let (Value::Int(current), Some(by)) = (stored, as_i64(operand)) else {
                return Err(TesseraError::validation(format!(
                    "integer operand expected for '{}.{}'",
                    entity.name, def.name
                )));
            };
            let next = match update {
                FieldUpdate::Increment(_) => current.wrapping_add(by),
                FieldUpdate::Decrement(_) => current.wrapping_sub(by),
                FieldUpdate::Multiply(_) => current.wrapping_mul(by),
                // i64::MIN / -1 overflows; wrap like the other operators.
                FieldUpdate::Divide(_) => current.wrapping_div(by),
                FieldUpdate::Set(_) => unreachable!(),
            };
            Ok(Value::Int(next))
        }
        _ => {
            let current = match stored {
                Value::Float(f) => *f,
                Value::Int(i) => *i as f64,
                _ => {
                    return Err(TesseraError::validation(format!(
                        "numeric value expected in '{}.{}'",
                        entity.name, def.name
                    )))
                }
            };
            let by = as_f64(operand);
            let next = match update {
                FieldUpdate::Increment(_) => current + by,
                FieldUpdate::Decrement(_) => current - by,
                FieldUpdate::Multiply(_) => current * by,
                FieldUpdate::Divide(_) => current / by,
                FieldUpdate::Set(_) => unreachable!(),
            };
            Ok(Value::Float(next))
        }
    }
}

fn is_zero(v: &Value) -> bool {
    matches!(v, Value::Int(0)) || matches!(v, Value::Float(f) if *f == 0.0)
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

/// Applies an update to the row identified by `pk`, enforcing immutability
/// of the primary key and of ownership, re-checking unique keys and foreign
/// keys, and bumping update-tracked timestamps. Returns the stored row.
pub fn apply_update(
    schema: &Schema,
    tables: &mut Tables,
    entity: &EntityDef,
    pk: &str,
    data: &UpdateData,
) -> Result<Row> {
    let mut row = tables
        .table(entity.name)?
        .rows
        .get(pk)
        .cloned()
        .ok_or(TesseraError::NotFound {
            entity: entity.name,
        })?;

    for (name, update) in &data.fields {
        let def = entity.field_def(name)?;
        let pos = entity.field_pos(name).expect("validated");
        if pos == entity.pk_pos() {
            return Err(TesseraError::validation(format!(
                "primary key '{}.{}' is immutable",
                entity.name, name
            )));
        }
        if name == "userId" {
            return Err(TesseraError::validation(format!(
                "ownership field '{}.userId' is immutable once set",
                entity.name
            )));
        }
        row[pos] = match update {
            FieldUpdate::Set(write) => {
                resolve_write(schema, entity, def, write)?.unwrap_or_else(|| row[pos].clone())
            }
            relative => apply_numeric(entity, def, &row[pos], relative)?,
        };
    }

    for (pos, def) in entity.fields.iter().enumerate() {
        if def.updated_at {
            row[pos] = Value::now();
        }
    }

    check_uniques(entity, tables, &row, Some(pk))?;
    check_foreign_keys(schema, entity, tables, &row)?;
    check_self_relations(entity, tables, &row, pk)?;
    debug!(entity = entity.name, id = %pk, "row updated");
    tables
        .table_mut(entity.name)?
        .rows
        .insert(pk.to_owned(), row.clone());
    Ok(row)
}

/// Deletion plan: rows to remove, foreign keys to null out, and restrict
/// constraints to verify once the full victim set is known.
#[derive(Debug, Default)]
struct DeletePlan {
    victims: Vec<(&'static str, String)>,
    detach: Vec<(&'static str, String, usize)>,
    restrict: Vec<RestrictCheck>,
}

#[derive(Debug)]
struct RestrictCheck {
    owner: &'static str,
    relation: &'static str,
    target: &'static str,
    fk_pos: usize,
    anchor: Value,
}

impl DeletePlan {
    fn is_victim(&self, entity: &str, pk: &str) -> bool {
        self.victims.iter().any(|(e, p)| *e == entity && p == pk)
    }
}

fn collect_victims(
    schema: &Schema,
    tables: &Tables,
    entity: &EntityDef,
    pk: &str,
    plan: &mut DeletePlan,
) -> Result<()> {
    if plan.is_victim(entity.name, pk) {
        return Ok(());
    }
    plan.victims.push((entity.name, pk.to_owned()));

    let anchor_row = tables
        .table(entity.name)?
        .rows
        .get(pk)
        .ok_or(TesseraError::NotFound {
            entity: entity.name,
        })?;

    for rel in &entity.relations {
        if rel.cardinality != Cardinality::Many {
            continue;
        }
        let target = schema.entity(rel.target)?;
        let fk_pos = target.field_pos(rel.fk_field).expect("schema-checked");
        let anchor_pos = entity.field_pos(rel.references).expect("schema-checked");
        let anchor = anchor_row[anchor_pos].clone();
        match rel.on_delete {
            // Checked after the victim set is complete: a dependent that is
            // itself deleted by a cascade from another path never restricts.
            ReferentialAction::Restrict => {
                plan.restrict.push(RestrictCheck {
                    owner: entity.name,
                    relation: rel.name,
                    target: rel.target,
                    fk_pos,
                    anchor,
                });
            }
            ReferentialAction::Cascade => {
                let dependents: Vec<String> = tables
                    .table(rel.target)?
                    .rows
                    .iter()
                    .filter(|(_, dep_row)| values_equal(&dep_row[fk_pos], &anchor))
                    .map(|(dep_pk, _)| dep_pk.clone())
                    .collect();
                for dep_pk in dependents {
                    collect_victims(schema, tables, target, &dep_pk, plan)?;
                }
            }
            ReferentialAction::SetNull => {
                let fk_def = target.field_def(rel.fk_field)?;
                if !fk_def.nullable {
                    return Err(TesseraError::constraint(
                        rel.target,
                        ConstraintKind::ForeignKey,
                        rel.fk_field,
                    ));
                }
                for (dep_pk, dep_row) in &tables.table(rel.target)?.rows {
                    if values_equal(&dep_row[fk_pos], &anchor) {
                        plan.detach.push((rel.target, dep_pk.clone(), fk_pos));
                    }
                }
            }
        }
    }
    Ok(())
}

fn plan_delete(
    schema: &Schema,
    tables: &Tables,
    entity: &EntityDef,
    pk: &str,
    plan: &mut DeletePlan,
) -> Result<()> {
    collect_victims(schema, tables, entity, pk, plan)?;
    for check in &plan.restrict {
        let surviving = tables
            .table(check.target)?
            .rows
            .iter()
            .any(|(dep_pk, dep_row)| {
                values_equal(&dep_row[check.fk_pos], &check.anchor)
                    && !plan.is_victim(check.target, dep_pk)
            });
        if surviving {
            return Err(TesseraError::constraint(
                check.owner,
                ConstraintKind::Restrict,
                check.relation,
            ));
        }
    }
    Ok(())
}

/// Deletes the row identified by `pk`, applying each relation's referential
/// action. Returns the number of rows removed. Nothing is changed when the
/// plan fails.
pub fn delete(
    schema: &Schema,
    tables: &mut Tables,
    entity: &EntityDef,
    pk: &str,
) -> Result<u64> {
    let mut plan = DeletePlan::default();
    plan_delete(schema, tables, entity, pk, &mut plan)?;

    for (target, dep_pk, fk_pos) in &plan.detach {
        if plan.is_victim(target, dep_pk) {
            continue;
        }
        if let Some(row) = tables.table_mut(target)?.rows.get_mut(dep_pk) {
            row[*fk_pos] = Value::Null;
        }
    }
    let mut removed = 0u64;
    for (victim_entity, victim_pk) in &plan.victims {
        if tables
            .table_mut(victim_entity)?
            .rows
            .remove(victim_pk)
            .is_some()
        {
            removed += 1;
        }
    }
    debug!(
        entity = entity.name,
        id = %pk,
        removed,
        detached = plan.detach.len(),
        "delete applied"
    );
    Ok(removed)
}
