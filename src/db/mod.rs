//! Database facade: the per-entity operation surface, transactions, and the
//! raw escape hatch.
//!
//! One generic [`EntityClient`] serves every entity in the schema; there is
//! no per-entity code generation. Read operations run against a shared read
//! snapshot; single mutations take the write lock for their duration; batch
//! mutations validate and apply against a scratch overlay so a failure has
//! zero effect.

pub mod config;
pub mod transaction;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::aggregate::{self, AggregateArgs, AggregateResult, GroupByArgs, GroupRecord};
use crate::error::{Result, TesseraError, TimeoutPhase};
use crate::filter::{self, Filter, FilterLimits};
use crate::mutation::{self, CreateData, UpdateData};
use crate::query::{self, CursorMiss, FindManyArgs};
use crate::record::Record;
use crate::relation::{self, Projection};
use crate::schema::{EntityDef, Schema};
use crate::store::{self, RawStatement, Tables};
use crate::value::{Row, Value};

pub use config::{DatabaseOptions, IsolationLevel, TransactionOptions};
pub use transaction::{Transaction, TxState};

/// A unique-key lookup: field/value pairs that together form one of the
/// entity's unique keys.
#[derive(Clone, Debug, PartialEq)]
pub struct UniqueWhere {
    /// Key member fields and their values.
    pub fields: Vec<(String, Value)>,
}

impl UniqueWhere {
    /// Primary-key lookup.
    pub fn id(value: impl Into<Value>) -> Self {
        Self::field("id", value)
    }

    /// Single-field unique lookup.
    pub fn field(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            fields: vec![(name.into(), value.into())],
        }
    }

    /// Composite unique lookup.
    pub fn composite(fields: impl IntoIterator<Item = (impl Into<String>, impl Into<Value>)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// The database: an immutable schema plus the table state it guards.
pub struct Database {
    pub(crate) schema: Arc<Schema>,
    pub(crate) tables: RwLock<Tables>,
    pub(crate) options: DatabaseOptions,
}

impl Database {
    /// Opens an empty database over the given schema with default options.
    pub fn open(schema: Schema) -> Self {
        Self::new(schema, DatabaseOptions::default())
    }

    /// Opens an empty database with explicit options.
    pub fn new(schema: Schema, options: DatabaseOptions) -> Self {
        let tables = Tables::new(&schema);
        Self {
            schema: Arc::new(schema),
            tables: RwLock::new(tables),
            options,
        }
    }

    /// The schema this database was opened with.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Lock acquisition is bounded by the default transaction `max_wait` so
    /// a client call issued while a transaction holds the write guard fails
    /// with `TransactionTimeout` instead of blocking indefinitely.
    pub(crate) fn read_tables(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .try_read_for(self.options.transaction.max_wait)
            .ok_or(TesseraError::TransactionTimeout {
                phase: TimeoutPhase::Acquire,
            })
    }

    pub(crate) fn write_tables(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .try_write_for(self.options.transaction.max_wait)
            .ok_or(TesseraError::TransactionTimeout {
                phase: TimeoutPhase::Acquire,
            })
    }

    /// Client for one entity's operation surface.
    pub fn entity(&self, name: &str) -> Result<EntityClient<'_>> {
        let entity = self.schema.entity(name)?.name;
        Ok(EntityClient { db: self, entity })
    }

    /// Starts an explicit transaction.
    pub fn begin(&self, options: TransactionOptions) -> Result<Transaction<'_>> {
        Transaction::begin(self, options)
    }

    /// Runs the callback inside a transaction with the database's default
    /// transaction options, committing on `Ok` and rolling back on `Err`.
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<R>,
    ) -> Result<R> {
        self.transaction_with(self.options.transaction, f)
    }

    /// Runs the callback inside a transaction with explicit options.
    pub fn transaction_with<R>(
        &self,
        options: TransactionOptions,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<R>,
    ) -> Result<R> {
        let mut tx = self.begin(options)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Executes a parameterized raw statement, returning the affected (or
    /// matched) row count. Bypasses the filter compiler and relation
    /// resolver; parameters are bound by position, never interpolated.
    /// Referential actions do not apply on this path.
    pub fn execute_raw(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let stmt = store::parse_statement(sql)?;
        match stmt.verb {
            store::RawVerb::Select => {
                let tables = self.read_tables()?;
                Ok(raw_matches(&self.schema, &tables, &stmt, params)?.len() as u64)
            }
            store::RawVerb::Delete => {
                let mut tables = self.write_tables()?;
                let pks = raw_matches(&self.schema, &tables, &stmt, params)?;
                let entity = raw_entity(&self.schema, &stmt)?.name;
                let table = tables.table_mut(entity)?;
                let mut removed = 0u64;
                for pk in pks {
                    if table.rows.remove(&pk).is_some() {
                        removed += 1;
                    }
                }
                debug!(entity, removed, "raw delete applied");
                Ok(removed)
            }
        }
    }

    /// Executes a parameterized raw query, returning full rows as records.
    pub fn query_raw(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let stmt = store::parse_statement(sql)?;
        if stmt.verb != store::RawVerb::Select {
            return Err(TesseraError::Storage(
                "query_raw requires a SELECT statement".to_owned(),
            ));
        }
        let tables = self.read_tables()?;
        let entity = raw_entity(&self.schema, &stmt)?;
        let pks = raw_matches(&self.schema, &tables, &stmt, params)?;
        let table = tables.table(entity.name)?;
        Ok(pks
            .iter()
            .filter_map(|pk| table.rows.get(pk))
            .map(|row| Record::from_row(entity, row))
            .collect())
    }
}

fn raw_entity<'a>(schema: &'a Schema, stmt: &RawStatement) -> Result<&'a EntityDef> {
    schema
        .entity(&stmt.entity)
        .map_err(|_| TesseraError::Storage(format!("unknown table '{}'", stmt.entity)))
}

fn raw_matches(
    schema: &Schema,
    tables: &Tables,
    stmt: &RawStatement,
    params: &[Value],
) -> Result<Vec<String>> {
    let entity = raw_entity(schema, stmt)?;
    let mut bound = Vec::with_capacity(stmt.bindings.len());
    for (field, index) in &stmt.bindings {
        let pos = entity.field_pos(field).ok_or_else(|| {
            TesseraError::Storage(format!("unknown column '{}.{}'", stmt.entity, field))
        })?;
        let value = params.get(index - 1).ok_or_else(|| {
            TesseraError::Storage(format!("missing parameter ${index}"))
        })?;
        bound.push((pos, value));
    }
    Ok(tables
        .table(entity.name)?
        .rows
        .iter()
        .filter(|(_, row)| {
            bound.iter().all(|(pos, value)| {
                row[*pos].partial_cmp_value(value) == Some(std::cmp::Ordering::Equal)
            })
        })
        .map(|(pk, _)| pk.clone())
        .collect())
}

/// Non-transactional per-entity client. Cheap to construct; every call
/// acquires the appropriate lock for its duration.
pub struct EntityClient<'db> {
    db: &'db Database,
    entity: &'static str,
}

impl EntityClient<'_> {
    fn def(&self) -> &EntityDef {
        self.db.schema.entity(self.entity).expect("resolved at construction")
    }

    /// Finds one row by unique key.
    pub fn find_unique(&self, key: &UniqueWhere, projection: &Projection) -> Result<Option<Record>> {
        let tables = self.db.read_tables()?;
        op_find_unique(&self.db.schema, &self.db.options.limits, &tables, self.def(), key, projection)
    }

    /// Finds one row by unique key, failing with `NotFound` when absent.
    pub fn find_unique_or_throw(&self, key: &UniqueWhere, projection: &Projection) -> Result<Record> {
        self.find_unique(key, projection)?
            .ok_or(TesseraError::NotFound { entity: self.entity })
    }

    /// Finds the first row matching the arguments.
    pub fn find_first(&self, args: &FindManyArgs, projection: &Projection) -> Result<Option<Record>> {
        let tables = self.db.read_tables()?;
        op_find_first(
            &self.db.schema,
            &self.db.options.limits,
            &tables,
            self.def(),
            args,
            projection,
            CursorMiss::Empty,
        )
    }

    /// Finds the first matching row, failing with `NotFound` when none
    /// matches (strict cursor semantics included).
    pub fn find_first_or_throw(&self, args: &FindManyArgs, projection: &Projection) -> Result<Record> {
        let tables = self.db.read_tables()?;
        op_find_first(
            &self.db.schema,
            &self.db.options.limits,
            &tables,
            self.def(),
            args,
            projection,
            CursorMiss::Throw,
        )?
        .ok_or(TesseraError::NotFound { entity: self.entity })
    }

    /// Finds all rows matching the arguments, windowed and ordered.
    pub fn find_many(&self, args: &FindManyArgs, projection: &Projection) -> Result<Vec<Record>> {
        let tables = self.db.read_tables()?;
        op_find_many(
            &self.db.schema,
            &self.db.options.limits,
            &tables,
            self.def(),
            args,
            projection,
            CursorMiss::Empty,
        )
    }

    /// Creates one row.
    pub fn create(&self, data: &CreateData, projection: &Projection) -> Result<Record> {
        let mut tables = self.db.write_tables()?;
        op_create(&self.db.schema, &self.db.options.limits, &mut tables, self.def(), data, projection)
    }

    /// Creates a batch atomically, returning the created count.
    pub fn create_many(&self, data: &[CreateData]) -> Result<u64> {
        let mut tables = self.db.write_tables()?;
        op_create_many(&self.db.schema, &mut tables, self.def(), data).map(|rows| rows.len() as u64)
    }

    /// Creates a batch atomically and returns the created records.
    pub fn create_many_and_return(&self, data: &[CreateData], projection: &Projection) -> Result<Vec<Record>> {
        let mut tables = self.db.write_tables()?;
        let rows = op_create_many(&self.db.schema, &mut tables, self.def(), data)?;
        relation::resolve(&self.db.schema, self.def(), &rows, projection, &tables, &self.db.options.limits)
    }

    /// Updates one row by unique key, failing with `NotFound` when absent.
    pub fn update(&self, key: &UniqueWhere, data: &UpdateData, projection: &Projection) -> Result<Record> {
        let mut tables = self.db.write_tables()?;
        op_update(&self.db.schema, &self.db.options.limits, &mut tables, self.def(), key, data, projection)
    }

    /// Updates all rows matching the filter atomically, returning the count.
    pub fn update_many(&self, filter: Option<&Filter>, data: &UpdateData) -> Result<u64> {
        let mut tables = self.db.write_tables()?;
        op_update_many(&self.db.schema, &self.db.options.limits, &mut tables, self.def(), filter, data)
    }

    /// Updates the row matching the key, or creates it when absent.
    pub fn upsert(
        &self,
        key: &UniqueWhere,
        create: &CreateData,
        update: &UpdateData,
        projection: &Projection,
    ) -> Result<Record> {
        let mut tables = self.db.write_tables()?;
        op_upsert(&self.db.schema, &self.db.options.limits, &mut tables, self.def(), key, create, update, projection)
    }

    /// Deletes one row by unique key, returning it as it was. Referential
    /// actions apply to dependents.
    pub fn delete(&self, key: &UniqueWhere, projection: &Projection) -> Result<Record> {
        let mut tables = self.db.write_tables()?;
        op_delete(&self.db.schema, &self.db.options.limits, &mut tables, self.def(), key, projection)
    }

    /// Deletes all rows matching the filter atomically, returning the count
    /// of matched rows removed.
    pub fn delete_many(&self, filter: Option<&Filter>) -> Result<u64> {
        let mut tables = self.db.write_tables()?;
        op_delete_many(&self.db.schema, &self.db.options.limits, &mut tables, self.def(), filter)
    }

    /// Computes aggregates over matching rows.
    pub fn aggregate(&self, args: &AggregateArgs) -> Result<AggregateResult> {
        let tables = self.db.read_tables()?;
        op_aggregate(&self.db.schema, &self.db.options.limits, &tables, self.def(), args)
    }

    /// Groups matching rows and computes per-group aggregates.
    pub fn group_by(&self, args: &GroupByArgs) -> Result<Vec<GroupRecord>> {
        let tables = self.db.read_tables()?;
        op_group_by(&self.db.schema, &self.db.options.limits, &tables, self.def(), args)
    }

    /// Counts matching rows.
    pub fn count(&self, filter: Option<&Filter>) -> Result<u64> {
        let tables = self.db.read_tables()?;
        op_count(&self.db.schema, &self.db.options.limits, &tables, self.def(), filter)
    }
}

/// Transactional per-entity client operating on the transaction's overlay.
/// Mirrors [`EntityClient`]; every call checks the body deadline.
pub struct TxEntityClient<'t> {
    pub(crate) schema: &'t Schema,
    pub(crate) limits: &'t FilterLimits,
    pub(crate) tables: &'t mut Tables,
    pub(crate) entity: &'static str,
    pub(crate) deadline: Instant,
}

impl<'t> TxEntityClient<'t> {
    fn def(&self) -> &'t EntityDef {
        self.schema.entity(self.entity).expect("resolved at construction")
    }

    fn check_deadline(&self) -> Result<()> {
        if Instant::now() > self.deadline {
            return Err(TesseraError::TransactionTimeout {
                phase: crate::error::TimeoutPhase::Execute,
            });
        }
        Ok(())
    }

    /// See [`EntityClient::find_unique`].
    pub fn find_unique(&self, key: &UniqueWhere, projection: &Projection) -> Result<Option<Record>> {
        self.check_deadline()?;
        op_find_unique(self.schema, self.limits, self.tables, self.def(), key, projection)
    }

    /// See [`EntityClient::find_unique_or_throw`].
    pub fn find_unique_or_throw(&self, key: &UniqueWhere, projection: &Projection) -> Result<Record> {
        self.find_unique(key, projection)?
            .ok_or(TesseraError::NotFound { entity: self.entity })
    }

    /// See [`EntityClient::find_first`].
    pub fn find_first(&self, args: &FindManyArgs, projection: &Projection) -> Result<Option<Record>> {
        self.check_deadline()?;
        op_find_first(self.schema, self.limits, self.tables, self.def(), args, projection, CursorMiss::Empty)
    }

    /// See [`EntityClient::find_first_or_throw`].
    pub fn find_first_or_throw(&self, args: &FindManyArgs, projection: &Projection) -> Result<Record> {
        self.check_deadline()?;
        op_find_first(self.schema, self.limits, self.tables, self.def(), args, projection, CursorMiss::Throw)?
            .ok_or(TesseraError::NotFound { entity: self.entity })
    }

    /// See [`EntityClient::find_many`].
    pub fn find_many(&self, args: &FindManyArgs, projection: &Projection) -> Result<Vec<Record>> {
        self.check_deadline()?;
        op_find_many(self.schema, self.limits, self.tables, self.def(), args, projection, CursorMiss::Empty)
    }

    /// See [`EntityClient::create`].
    pub fn create(&mut self, data: &CreateData, projection: &Projection) -> Result<Record> {
        self.check_deadline()?;
        let entity = self.def();
        op_create(self.schema, self.limits, self.tables, entity, data, projection)
    }

    /// See [`EntityClient::create_many`].
    pub fn create_many(&mut self, data: &[CreateData]) -> Result<u64> {
        self.check_deadline()?;
        let entity = self.def();
        op_create_many(self.schema, self.tables, entity, data).map(|rows| rows.len() as u64)
    }

    /// See [`EntityClient::create_many_and_return`].
    pub fn create_many_and_return(&mut self, data: &[CreateData], projection: &Projection) -> Result<Vec<Record>> {
        self.check_deadline()?;
        let entity = self.def();
        let rows = op_create_many(self.schema, self.tables, entity, data)?;
        relation::resolve(self.schema, entity, &rows, projection, self.tables, self.limits)
    }

    /// See [`EntityClient::update`].
    pub fn update(&mut self, key: &UniqueWhere, data: &UpdateData, projection: &Projection) -> Result<Record> {
        self.check_deadline()?;
        let entity = self.def();
        op_update(self.schema, self.limits, self.tables, entity, key, data, projection)
    }

    /// See [`EntityClient::update_many`].
    pub fn update_many(&mut self, filter: Option<&Filter>, data: &UpdateData) -> Result<u64> {
        self.check_deadline()?;
        let entity = self.def();
        op_update_many(self.schema, self.limits, self.tables, entity, filter, data)
    }

    /// See [`EntityClient::upsert`].
    pub fn upsert(
        &mut self,
        key: &UniqueWhere,
        create: &CreateData,
        update: &UpdateData,
        projection: &Projection,
    ) -> Result<Record> {
        self.check_deadline()?;
        let entity = self.def();
        op_upsert(self.schema, self.limits, self.tables, entity, key, create, update, projection)
    }

    /// See [`EntityClient::delete`].
    pub fn delete(&mut self, key: &UniqueWhere, projection: &Projection) -> Result<Record> {
        self.check_deadline()?;
        let entity = self.def();
        op_delete(self.schema, self.limits, self.tables, entity, key, projection)
    }

    /// See [`EntityClient::delete_many`].
    pub fn delete_many(&mut self, filter: Option<&Filter>) -> Result<u64> {
        self.check_deadline()?;
        let entity = self.def();
        op_delete_many(self.schema, self.limits, self.tables, entity, filter)
    }

    /// See [`EntityClient::aggregate`].
    pub fn aggregate(&self, args: &AggregateArgs) -> Result<AggregateResult> {
        self.check_deadline()?;
        op_aggregate(self.schema, self.limits, self.tables, self.def(), args)
    }

    /// See [`EntityClient::group_by`].
    pub fn group_by(&self, args: &GroupByArgs) -> Result<Vec<GroupRecord>> {
        self.check_deadline()?;
        op_group_by(self.schema, self.limits, self.tables, self.def(), args)
    }

    /// See [`EntityClient::count`].
    pub fn count(&self, filter: Option<&Filter>) -> Result<u64> {
        self.check_deadline()?;
        op_count(self.schema, self.limits, self.tables, self.def(), filter)
    }
}

fn resolve_unique(
    entity: &EntityDef,
    tables: &Tables,
    key: &UniqueWhere,
) -> Result<Option<(String, Row)>> {
    let names: Vec<&str> = key.fields.iter().map(|(n, _)| n.as_str()).collect();
    if entity.matching_unique(&names).is_none() {
        return Err(TesseraError::validation(format!(
            "fields [{}] do not form a unique key of {}",
            names.join(", "),
            entity.name
        )));
    }
    let mut positions = Vec::with_capacity(key.fields.len());
    for (name, value) in &key.fields {
        let pos = entity.field_pos(name).ok_or_else(|| {
            TesseraError::validation(format!("unknown field '{}.{}'", entity.name, name))
        })?;
        positions.push((pos, value));
    }
    Ok(tables
        .table(entity.name)?
        .rows
        .iter()
        .find(|(_, row)| {
            positions.iter().all(|(pos, value)| {
                row[*pos].partial_cmp_value(value) == Some(std::cmp::Ordering::Equal)
            })
        })
        .map(|(pk, row)| (pk.clone(), row.clone())))
}

fn op_find_unique(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &Tables,
    entity: &EntityDef,
    key: &UniqueWhere,
    projection: &Projection,
) -> Result<Option<Record>> {
    match resolve_unique(entity, tables, key)? {
        Some((_, row)) => {
            let records = relation::resolve(schema, entity, &[row], projection, tables, limits)?;
            Ok(records.into_iter().next())
        }
        None => Ok(None),
    }
}

fn op_find_many(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &Tables,
    entity: &EntityDef,
    args: &FindManyArgs,
    projection: &Projection,
    on_cursor_miss: CursorMiss,
) -> Result<Vec<Record>> {
    let compiled = filter::compile(schema, entity, args.filter.as_ref(), limits)?;
    let rows = query::execute(entity, tables.scan(entity.name)?, &compiled, args, on_cursor_miss)?;
    relation::resolve(schema, entity, &rows, projection, tables, limits)
}

fn op_find_first(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &Tables,
    entity: &EntityDef,
    args: &FindManyArgs,
    projection: &Projection,
    on_cursor_miss: CursorMiss,
) -> Result<Option<Record>> {
    let mut args = args.clone();
    args.take = Some(1);
    let records = op_find_many(schema, limits, tables, entity, &args, projection, on_cursor_miss)?;
    Ok(records.into_iter().next())
}

fn op_create(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &mut Tables,
    entity: &EntityDef,
    data: &CreateData,
    projection: &Projection,
) -> Result<Record> {
    let row = mutation::insert(schema, tables, entity, data)?;
    let records = relation::resolve(schema, entity, &[row], projection, tables, limits)?;
    records.into_iter().next().ok_or_else(|| {
        TesseraError::Storage("created row vanished during projection".to_owned())
    })
}

fn op_create_many(
    schema: &Schema,
    tables: &mut Tables,
    entity: &EntityDef,
    data: &[CreateData],
) -> Result<Vec<Row>> {
    let mut scratch = tables.clone();
    let mut rows = Vec::with_capacity(data.len());
    for item in data {
        rows.push(mutation::insert(schema, &mut scratch, entity, item)?);
    }
    *tables = scratch;
    Ok(rows)
}

fn op_update(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &mut Tables,
    entity: &EntityDef,
    key: &UniqueWhere,
    data: &UpdateData,
    projection: &Projection,
) -> Result<Record> {
    let (pk, _) = resolve_unique(entity, tables, key)?.ok_or(TesseraError::NotFound {
        entity: entity.name,
    })?;
    let row = mutation::apply_update(schema, tables, entity, &pk, data)?;
    let records = relation::resolve(schema, entity, &[row], projection, tables, limits)?;
    records.into_iter().next().ok_or_else(|| {
        TesseraError::Storage("updated row vanished during projection".to_owned())
    })
}

fn op_update_many(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &mut Tables,
    entity: &EntityDef,
    filter: Option<&Filter>,
    data: &UpdateData,
) -> Result<u64> {
    let compiled = filter::compile(schema, entity, filter, limits)?;
    let pks: Vec<String> = tables
        .table(entity.name)?
        .rows
        .iter()
        .filter(|(_, row)| compiled.matches(row))
        .map(|(pk, _)| pk.clone())
        .collect();
    let mut scratch = tables.clone();
    for pk in &pks {
        mutation::apply_update(schema, &mut scratch, entity, pk, data)?;
    }
    *tables = scratch;
    Ok(pks.len() as u64)
}

#[allow(clippy::too_many_arguments)]
fn op_upsert(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &mut Tables,
    entity: &EntityDef,
    key: &UniqueWhere,
    create: &CreateData,
    update: &UpdateData,
    projection: &Projection,
) -> Result<Record> {
    match resolve_unique(entity, tables, key)? {
        Some(_) => op_update(schema, limits, tables, entity, key, update, projection),
        None => op_create(schema, limits, tables, entity, create, projection),
    }
}

fn op_delete(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &mut Tables,
    entity: &EntityDef,
    key: &UniqueWhere,
    projection: &Projection,
) -> Result<Record> {
    let (pk, row) = resolve_unique(entity, tables, key)?.ok_or(TesseraError::NotFound {
        entity: entity.name,
    })?;
    // Shape the record before the row disappears.
    let records = relation::resolve(schema, entity, &[row], projection, tables, limits)?;
    let record = records.into_iter().next().ok_or_else(|| {
        TesseraError::Storage("row vanished during projection".to_owned())
    })?;
    mutation::delete(schema, tables, entity, &pk)?;
    Ok(record)
}

fn op_delete_many(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &mut Tables,
    entity: &EntityDef,
    filter: Option<&Filter>,
) -> Result<u64> {
    let compiled = filter::compile(schema, entity, filter, limits)?;
    let pks: Vec<String> = tables
        .table(entity.name)?
        .rows
        .iter()
        .filter(|(_, row)| compiled.matches(row))
        .map(|(pk, _)| pk.clone())
        .collect();
    let mut scratch = tables.clone();
    for pk in &pks {
        // A cascade from an earlier victim may have removed this row already.
        if scratch.table(entity.name)?.rows.contains_key(pk) {
            mutation::delete(schema, &mut scratch, entity, pk)?;
        }
    }
    *tables = scratch;
    Ok(pks.len() as u64)
}

fn op_aggregate(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &Tables,
    entity: &EntityDef,
    args: &AggregateArgs,
) -> Result<AggregateResult> {
    aggregate::aggregate(schema, entity, tables.scan(entity.name)?, args, limits)
}

fn op_group_by(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &Tables,
    entity: &EntityDef,
    args: &GroupByArgs,
) -> Result<Vec<GroupRecord>> {
    aggregate::group_by(schema, entity, tables.scan(entity.name)?, args, limits)
}

fn op_count(
    schema: &Schema,
    limits: &FilterLimits,
    tables: &Tables,
    entity: &EntityDef,
    filter: Option<&Filter>,
) -> Result<u64> {
    let compiled = filter::compile(schema, entity, filter, limits)?;
    Ok(tables
        .table(entity.name)?
        .rows
        .values()
        .filter(|row| compiled.matches(row))
        .count() as u64)
}
