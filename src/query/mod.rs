//! Query planner: resolves `where` + `orderBy` + cursor/`take`/`skip` +
//! `distinct` into a bounded, deterministically ordered row window.
//!
//! Ordering is always total: the caller's `orderBy` list first, then the
//! primary key as tie-break. Cursor semantics: a positive `take` returns the
//! window starting at the cursor row (inclusive); a negative `take` returns
//! the `|take|` rows immediately before the cursor row (exclusive), so
//! walking a page backwards from the first row of a page yields exactly the
//! preceding page.

use std::cmp::Ordering;

use rustc_hash::FxHashSet;

use crate::error::{Result, TesseraError};
use crate::filter::{CompiledFilter, Filter};
use crate::schema::EntityDef;
use crate::value::{Row, Value};

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Placement of database nulls relative to non-null values.
///
/// Defaults follow the direction: nulls last when ascending, first when
/// descending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullsOrder {
    /// Nulls before all non-null values.
    First,
    /// Nulls after all non-null values.
    Last,
}

/// One `orderBy` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    /// Field to sort by.
    pub field: String,
    /// Direction.
    pub direction: SortOrder,
    /// Null placement override for nullable fields.
    pub nulls: Option<NullsOrder>,
}

impl OrderBy {
    /// Ascending order on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Asc,
            nulls: None,
        }
    }

    /// Descending order on a field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Desc,
            nulls: None,
        }
    }

    /// Overrides null placement.
    pub fn nulls(mut self, order: NullsOrder) -> Self {
        self.nulls = Some(order);
        self
    }
}

/// Position marker for cursor pagination: a unique-key field and its value.
#[derive(Clone, Debug, PartialEq)]
pub struct Cursor {
    /// Unique field anchoring the window.
    pub field: String,
    /// Value identifying the anchor row.
    pub value: Value,
}

impl Cursor {
    /// Cursor over the given unique field.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Arguments accepted by `findMany`-shaped operations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindManyArgs {
    /// Predicate tree; `None` matches all rows.
    pub filter: Option<Filter>,
    /// Ordering, applied before the primary-key tie-break.
    pub order_by: Vec<OrderBy>,
    /// Window anchor.
    pub cursor: Option<Cursor>,
    /// Signed window size; negative walks backwards from the cursor.
    pub take: Option<i64>,
    /// Rows to skip after anchoring.
    pub skip: usize,
    /// Distinct-key field subset; first-seen row wins per tuple.
    pub distinct: Vec<String>,
}

impl FindManyArgs {
    /// Sets the predicate.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends an ordering entry.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Sets the cursor anchor.
    pub fn cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Sets the signed window size.
    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    /// Sets the skip count.
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the distinct field subset.
    pub fn distinct(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.distinct = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// How a cursor that resolves to no row is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorMiss {
    /// Yield an empty result set.
    Empty,
    /// Fail with [`TesseraError::NotFound`].
    Throw,
}

/// Sorts rows by the given ordering plus the primary-key tie-break.
pub fn sort_rows(entity: &EntityDef, rows: &mut [Row], order_by: &[OrderBy]) -> Result<()> {
    let mut keys = Vec::with_capacity(order_by.len());
    for entry in order_by {
        let pos = entity
            .field_pos(&entry.field)
            .ok_or_else(|| {
                TesseraError::validation(format!(
                    "orderBy references unknown field '{}.{}'",
                    entity.name, entry.field
                ))
            })?;
        let nulls = entry.nulls.unwrap_or(match entry.direction {
            SortOrder::Asc => NullsOrder::Last,
            SortOrder::Desc => NullsOrder::First,
        });
        keys.push((pos, entry.direction, nulls));
    }
    let pk = entity.pk_pos();
    rows.sort_by(|a, b| {
        for (pos, direction, nulls) in &keys {
            let ord = compare_with_nulls(&a[*pos], &b[*pos], *direction, *nulls);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a[pk].sort_cmp(&b[pk])
    });
    Ok(())
}

pub(crate) fn compare_with_nulls(
    a: &Value,
    b: &Value,
    direction: SortOrder,
    nulls: NullsOrder,
) -> Ordering {
    let ord = match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => {
            return match nulls {
                NullsOrder::First => Ordering::Less,
                NullsOrder::Last => Ordering::Greater,
            }
        }
        (false, true) => {
            return match nulls {
                NullsOrder::First => Ordering::Greater,
                NullsOrder::Last => Ordering::Less,
            }
        }
        (false, false) => a.sort_cmp(b),
    };
    match direction {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
    }
}

/// Runs the full pipeline over pre-fetched rows: filter → sort → distinct →
/// cursor anchoring → skip/take windowing.
pub fn execute(
    entity: &EntityDef,
    rows: Vec<Row>,
    compiled: &CompiledFilter,
    args: &FindManyArgs,
    on_cursor_miss: CursorMiss,
) -> Result<Vec<Row>> {
    let mut rows: Vec<Row> = rows.into_iter().filter(|r| compiled.matches(r)).collect();
    sort_rows(entity, &mut rows, &args.order_by)?;

    if !args.distinct.is_empty() {
        rows = apply_distinct(entity, rows, &args.distinct)?;
    }

    let cursor_idx = match &args.cursor {
        Some(cursor) => {
            let pos = cursor_field_pos(entity, &cursor.field)?;
            match rows.iter().position(|r| {
                r[pos].partial_cmp_value(&cursor.value) == Some(Ordering::Equal)
            }) {
                Some(idx) => Some(idx),
                None => {
                    return match on_cursor_miss {
                        CursorMiss::Empty => Ok(Vec::new()),
                        CursorMiss::Throw => Err(TesseraError::NotFound {
                            entity: entity.name,
                        }),
                    }
                }
            }
        }
        None => None,
    };

    Ok(window(rows, cursor_idx, args.take, args.skip))
}

fn cursor_field_pos(entity: &EntityDef, field: &str) -> Result<usize> {
    if entity.matching_unique(&[field]).is_none() {
        return Err(TesseraError::validation(format!(
            "cursor field '{}.{}' is not a unique key",
            entity.name, field
        )));
    }
    entity.field_pos(field).ok_or_else(|| {
        TesseraError::validation(format!(
            "cursor references unknown field '{}.{}'",
            entity.name, field
        ))
    })
}

fn apply_distinct(entity: &EntityDef, rows: Vec<Row>, fields: &[String]) -> Result<Vec<Row>> {
    let mut positions = Vec::with_capacity(fields.len());
    for field in fields {
        positions.push(entity.field_pos(field).ok_or_else(|| {
            TesseraError::validation(format!(
                "distinct references unknown field '{}.{}'",
                entity.name, field
            ))
        })?);
    }
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for row in rows {
        let key_values: Vec<&Value> = positions.iter().map(|p| &row[*p]).collect();
        let key = serde_json::to_string(&key_values).unwrap_or_default();
        if seen.insert(key) {
            out.push(row);
        }
    }
    Ok(out)
}

fn window(rows: Vec<Row>, cursor_idx: Option<usize>, take: Option<i64>, skip: usize) -> Vec<Row> {
    let backwards = take.map_or(false, |t| t < 0);
    if backwards {
        // Rows strictly before the anchor; skip counts backwards from it.
        let end = cursor_idx.unwrap_or(rows.len()).saturating_sub(skip);
        let len = take.expect("checked above").unsigned_abs() as usize;
        let start = end.saturating_sub(len);
        rows[start..end].to_vec()
    } else {
        let start = cursor_idx.unwrap_or(0).saturating_add(skip);
        if start >= rows.len() {
            return Vec::new();
        }
        let len = take.map(|t| t as usize).unwrap_or(rows.len());
        let end = start.saturating_add(len).min(rows.len());
        rows[start..end].to_vec()
    }
}
