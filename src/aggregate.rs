//! Aggregation engine: `count`/`min`/`max`/`avg`/`sum` and `groupBy` with
//! `having`, all validated against the schema before any row is touched.
//!
//! `having` and windowed `orderBy` may only reference fields in the `by`
//! set; violations are validation errors, never runtime query failures.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;

use crate::error::{Result, TesseraError};
use crate::filter::{self, Filter, FilterLimits, ScalarCond};
use crate::query::{self, NullsOrder, OrderBy, SortOrder};
use crate::schema::{EntityDef, FieldType, Schema};
use crate::value::{Row, Value};

/// Shape of a `count` selection.
#[derive(Clone, Debug, PartialEq)]
pub enum CountMode {
    /// Total row count.
    All,
    /// Per-field count of non-null values.
    Fields(Vec<String>),
}

/// Aggregate selections shared by `aggregate` and `groupBy`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregateSelections {
    /// Row or per-field counting.
    pub count: Option<CountMode>,
    /// Minimum per field (any orderable scalar).
    pub min: Vec<String>,
    /// Maximum per field (any orderable scalar).
    pub max: Vec<String>,
    /// Mean per field (numeric fields only).
    pub avg: Vec<String>,
    /// Sum per field (numeric fields only).
    pub sum: Vec<String>,
}

impl AggregateSelections {
    /// Selects the total row count.
    pub fn count_all(mut self) -> Self {
        self.count = Some(CountMode::All);
        self
    }

    /// Selects per-field non-null counts.
    pub fn count_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.count = Some(CountMode::Fields(
            fields.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Adds `min` fields.
    pub fn min(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.min.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Adds `max` fields.
    pub fn max(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.max.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Adds `avg` fields.
    pub fn avg(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.avg.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Adds `sum` fields.
    pub fn sum(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sum.extend(fields.into_iter().map(Into::into));
        self
    }
}

/// Arguments of an `aggregate` operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregateArgs {
    /// Row predicate applied before aggregation.
    pub filter: Option<Filter>,
    /// Requested aggregates.
    pub selections: AggregateSelections,
}

/// Computed `count` output.
#[derive(Clone, Debug, PartialEq)]
pub enum CountResult {
    /// Total row count.
    Total(u64),
    /// Non-null count per requested field.
    Fields(Vec<(String, u64)>),
}

/// Computed aggregates. Absent inputs (all-null or empty sets) yield
/// `Value::Null` entries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregateResult {
    /// Count output, when requested.
    pub count: Option<CountResult>,
    /// Minimum per field.
    pub min: Vec<(String, Value)>,
    /// Maximum per field.
    pub max: Vec<(String, Value)>,
    /// Mean per field.
    pub avg: Vec<(String, Value)>,
    /// Sum per field.
    pub sum: Vec<(String, Value)>,
}

/// Aggregate operator referenced by a `having` leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggOp {
    /// Group row count.
    Count,
    /// Group minimum.
    Min,
    /// Group maximum.
    Max,
    /// Group mean.
    Avg,
    /// Group sum.
    Sum,
}

/// Post-grouping predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum Having {
    /// Every child must hold.
    And(Vec<Having>),
    /// At least one child must hold.
    Or(Vec<Having>),
    /// Child must not hold.
    Not(Box<Having>),
    /// Condition on a grouping field's value.
    Field {
        /// Field name; must be a member of `by`.
        field: String,
        /// Condition over the group's value.
        cond: ScalarCond,
    },
    /// Condition on an aggregate computed over the group.
    Aggregate {
        /// Aggregate operator.
        op: AggOp,
        /// Aggregated field; `None` only for [`AggOp::Count`].
        field: Option<String>,
        /// Condition over the computed aggregate.
        cond: ScalarCond,
    },
}

/// Arguments of a `groupBy` operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupByArgs {
    /// Grouping fields; must be non-empty.
    pub by: Vec<String>,
    /// Row predicate applied before grouping.
    pub filter: Option<Filter>,
    /// Post-grouping predicate; may only reference `by` fields and
    /// aggregates.
    pub having: Option<Having>,
    /// Group ordering; restricted to `by` fields.
    pub order_by: Vec<OrderBy>,
    /// Group window size (non-negative).
    pub take: Option<i64>,
    /// Groups to skip.
    pub skip: usize,
    /// Aggregates computed per group.
    pub selections: AggregateSelections,
}

/// One output group: its key values plus computed aggregates.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupRecord {
    /// Grouping-field values, in `by` order.
    pub by: Vec<(String, Value)>,
    /// Computed aggregates for the group.
    pub aggregates: AggregateResult,
}

impl GroupRecord {
    /// Value of a grouping field.
    pub fn by_value(&self, field: &str) -> Option<&Value> {
        self.by.iter().find(|(n, _)| n == field).map(|(_, v)| v)
    }
}

fn validate_selections(entity: &EntityDef, selections: &AggregateSelections) -> Result<()> {
    if let Some(CountMode::Fields(fields)) = &selections.count {
        for field in fields {
            entity.field_def(field)?;
        }
    }
    for field in selections.min.iter().chain(&selections.max) {
        let def = entity.field_def(field)?;
        if def.ty == FieldType::Json {
            return Err(TesseraError::validation(format!(
                "min/max not supported on JSON field '{}.{}'",
                entity.name, field
            )));
        }
    }
    for (fields, op) in [(&selections.avg, "avg"), (&selections.sum, "sum")] {
        for field in fields {
            let def = entity.field_def(field)?;
            if !def.ty.is_numeric() {
                return Err(TesseraError::validation(format!(
                    "{op}() requires a numeric field, '{}.{}' is {:?}",
                    entity.name, field, def.ty
                )));
            }
        }
    }
    Ok(())
}

fn compute(entity: &EntityDef, rows: &[&Row], selections: &AggregateSelections) -> AggregateResult {
    let mut out = AggregateResult::default();
    if let Some(mode) = &selections.count {
        out.count = Some(match mode {
            CountMode::All => CountResult::Total(rows.len() as u64),
            CountMode::Fields(fields) => CountResult::Fields(
                fields
                    .iter()
                    .map(|field| {
                        let pos = entity.field_pos(field).expect("validated");
                        let n = rows.iter().filter(|r| !r[pos].is_null()).count() as u64;
                        (field.clone(), n)
                    })
                    .collect(),
            ),
        });
    }
    for (fields, want_min, dest) in [
        (&selections.min, true, &mut out.min),
        (&selections.max, false, &mut out.max),
    ] {
        for field in fields {
            let pos = entity.field_pos(field).expect("validated");
            let mut best: Option<&Value> = None;
            for row in rows {
                let v = &row[pos];
                if v.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        let keep_new = match v.partial_cmp_value(b) {
                            Some(Ordering::Less) => want_min,
                            Some(Ordering::Greater) => !want_min,
                            _ => false,
                        };
                        if keep_new {
                            v
                        } else {
                            b
                        }
                    }
                });
            }
            dest.push((field.clone(), best.cloned().unwrap_or(Value::Null)));
        }
    }
    for field in &selections.avg {
        let pos = entity.field_pos(field).expect("validated");
        let nums = numeric_values(rows, pos);
        let value = if nums.is_empty() {
            Value::Null
        } else {
            Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
        };
        out.avg.push((field.clone(), value));
    }
    for field in &selections.sum {
        let pos = entity.field_pos(field).expect("validated");
        let def = entity.field_def(field).expect("validated");
        let mut any = false;
        let value = match def.ty {
            FieldType::Int => {
                // Accumulated at i128 so partial sums cannot wrap; the
                // reported total saturates at the i64 bounds.
                let mut acc: i128 = 0;
                for row in rows {
                    if let Value::Int(i) = &row[pos] {
                        acc += *i as i128;
                        any = true;
                    }
                }
                Value::Int(acc.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
            }
            _ => {
                let nums = numeric_values(rows, pos);
                any = !nums.is_empty();
                Value::Float(nums.iter().sum())
            }
        };
        out.sum.push((field.clone(), if any { value } else { Value::Null }));
    }
    out
}

fn numeric_values(rows: &[&Row], pos: usize) -> Vec<f64> {
    rows.iter()
        .filter_map(|r| match &r[pos] {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        })
        .collect()
}

/// Runs an `aggregate` operation over pre-fetched rows.
pub fn aggregate(
    schema: &Schema,
    entity: &EntityDef,
    rows: Vec<Row>,
    args: &AggregateArgs,
    limits: &FilterLimits,
) -> Result<AggregateResult> {
    validate_selections(entity, &args.selections)?;
    let compiled = filter::compile(schema, entity, args.filter.as_ref(), limits)?;
    let matched: Vec<&Row> = rows.iter().filter(|r| compiled.matches(r)).collect();
    Ok(compute(entity, &matched, &args.selections))
}

fn validate_having(entity: &EntityDef, by: &[String], having: &Having) -> Result<()> {
    match having {
        Having::And(children) | Having::Or(children) => {
            children.iter().try_for_each(|c| validate_having(entity, by, c))
        }
        Having::Not(inner) => validate_having(entity, by, inner),
        Having::Field { field, cond } => {
            if !by.iter().any(|b| b == field) {
                return Err(TesseraError::validation(format!(
                    "having references field '{}' outside the groupBy set",
                    field
                )));
            }
            check_having_cond(cond)?;
            entity.field_def(field).map(|_| ())
        }
        Having::Aggregate { op, field, cond } => {
            check_having_cond(cond)?;
            match (op, field) {
                (AggOp::Count, None) => Ok(()),
                (_, None) => Err(TesseraError::validation(
                    "aggregate having requires a field for min/max/avg/sum",
                )),
                (op, Some(field)) => {
                    let def = entity.field_def(field)?;
                    if matches!(op, AggOp::Avg | AggOp::Sum) && !def.ty.is_numeric() {
                        return Err(TesseraError::validation(format!(
                            "having {:?} requires a numeric field, '{}.{}' is {:?}",
                            op, entity.name, field, def.ty
                        )));
                    }
                    Ok(())
                }
            }
        }
    }
}

fn check_having_cond(cond: &ScalarCond) -> Result<()> {
    if cond.contains.is_some() || cond.starts_with.is_some() || cond.ends_with.is_some() {
        return Err(TesseraError::validation(
            "string pattern operators are not valid in having conditions",
        ));
    }
    if cond.r#in.is_some() && cond.equals.is_some() {
        return Err(TesseraError::validation(
            "having condition combines 'in' and 'equals'",
        ));
    }
    Ok(())
}

fn eval_having(
    entity: &EntityDef,
    group_rows: &[&Row],
    by_values: &[(String, Value)],
    having: &Having,
) -> bool {
    match having {
        Having::And(children) => children
            .iter()
            .all(|c| eval_having(entity, group_rows, by_values, c)),
        Having::Or(children) => children
            .iter()
            .any(|c| eval_having(entity, group_rows, by_values, c)),
        Having::Not(inner) => !eval_having(entity, group_rows, by_values, inner),
        Having::Field { field, cond } => {
            let value = by_values
                .iter()
                .find(|(n, _)| n == field)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            eval_cond(cond, &value)
        }
        Having::Aggregate { op, field, cond } => {
            let value = match (op, field) {
                (AggOp::Count, None) => Value::Int(group_rows.len() as i64),
                (op, Some(field)) => {
                    let selections = match op {
                        AggOp::Count => AggregateSelections::default()
                            .count_fields([field.clone()]),
                        AggOp::Min => AggregateSelections::default().min([field.clone()]),
                        AggOp::Max => AggregateSelections::default().max([field.clone()]),
                        AggOp::Avg => AggregateSelections::default().avg([field.clone()]),
                        AggOp::Sum => AggregateSelections::default().sum([field.clone()]),
                    };
                    let result = compute(entity, group_rows, &selections);
                    match op {
                        AggOp::Count => match result.count {
                            Some(CountResult::Fields(fields)) => {
                                Value::Int(fields.first().map(|(_, n)| *n as i64).unwrap_or(0))
                            }
                            _ => Value::Int(0),
                        },
                        AggOp::Min => take_first(result.min),
                        AggOp::Max => take_first(result.max),
                        AggOp::Avg => take_first(result.avg),
                        AggOp::Sum => take_first(result.sum),
                    }
                }
                // Rejected during validation.
                _ => Value::Null,
            };
            eval_cond(cond, &value)
        }
    }
}

fn take_first(mut entries: Vec<(String, Value)>) -> Value {
    if entries.is_empty() {
        Value::Null
    } else {
        entries.swap_remove(0).1
    }
}

fn eval_cond(cond: &ScalarCond, value: &Value) -> bool {
    let eq = |literal: &Value| {
        if literal.is_null() {
            value.is_null()
        } else {
            value.partial_cmp_value(literal) == Some(Ordering::Equal)
        }
    };
    let cmp = |literal: &Value, check: fn(Ordering) -> bool| {
        value
            .partial_cmp_value(literal)
            .map(check)
            .unwrap_or(false)
    };
    if let Some(v) = &cond.equals {
        if !eq(v) {
            return false;
        }
    }
    if let Some(v) = &cond.not {
        if eq(v) {
            return false;
        }
    }
    if let Some(list) = &cond.r#in {
        if !list.iter().any(|v| eq(v)) {
            return false;
        }
    }
    if let Some(list) = &cond.not_in {
        if list.iter().any(|v| eq(v)) {
            return false;
        }
    }
    if let Some(v) = &cond.lt {
        if !cmp(v, |o| o == Ordering::Less) {
            return false;
        }
    }
    if let Some(v) = &cond.lte {
        if !cmp(v, |o| o != Ordering::Greater) {
            return false;
        }
    }
    if let Some(v) = &cond.gt {
        if !cmp(v, |o| o == Ordering::Greater) {
            return false;
        }
    }
    if let Some(v) = &cond.gte {
        if !cmp(v, |o| o != Ordering::Less) {
            return false;
        }
    }
    true
}

/// Runs a `groupBy` operation over pre-fetched rows.
pub fn group_by(
    schema: &Schema,
    entity: &EntityDef,
    rows: Vec<Row>,
    args: &GroupByArgs,
    limits: &FilterLimits,
) -> Result<Vec<GroupRecord>> {
    if args.by.is_empty() {
        return Err(TesseraError::validation("groupBy requires a non-empty 'by' set"));
    }
    let mut by_positions = Vec::with_capacity(args.by.len());
    for field in &args.by {
        entity.field_def(field)?;
        by_positions.push(entity.field_pos(field).expect("validated"));
    }
    validate_selections(entity, &args.selections)?;
    if let Some(having) = &args.having {
        validate_having(entity, &args.by, having)?;
    }
    if let Some(take) = args.take {
        if take < 0 {
            return Err(TesseraError::validation("groupBy take must be non-negative"));
        }
    }
    for entry in &args.order_by {
        if !args.by.iter().any(|b| *b == entry.field) {
            return Err(TesseraError::validation(format!(
                "groupBy orderBy references field '{}' outside the 'by' set",
                entry.field
            )));
        }
    }

    let compiled = filter::compile(schema, entity, args.filter.as_ref(), limits)?;
    let matched: Vec<&Row> = rows.iter().filter(|r| compiled.matches(r)).collect();

    // Group by serialized key tuple; remember first-seen order for stability.
    let mut groups: FxHashMap<String, Vec<&Row>> = FxHashMap::default();
    let mut order: Vec<(String, Vec<(String, Value)>)> = Vec::new();
    for row in matched {
        let values: Vec<(String, Value)> = args
            .by
            .iter()
            .zip(&by_positions)
            .map(|(name, pos)| (name.clone(), row[*pos].clone()))
            .collect();
        let key = serde_json::to_string(&values.iter().map(|(_, v)| v).collect::<Vec<_>>())
            .unwrap_or_default();
        if !groups.contains_key(&key) {
            order.push((key.clone(), values));
        }
        groups.entry(key).or_default().push(row);
    }

    let mut records: Vec<(Vec<(String, Value)>, Vec<&Row>)> = order
        .into_iter()
        .map(|(key, values)| {
            let rows = groups.remove(&key).unwrap_or_default();
            (values, rows)
        })
        .collect();

    if let Some(having) = &args.having {
        records.retain(|(values, rows)| eval_having(entity, rows, values, having));
    }

    if !args.order_by.is_empty() {
        let order_by = args.order_by.clone();
        records.sort_by(|(a, _), (b, _)| {
            for entry in &order_by {
                let av = a
                    .iter()
                    .find(|(n, _)| *n == entry.field)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null);
                let bv = b
                    .iter()
                    .find(|(n, _)| *n == entry.field)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null);
                let nulls = entry.nulls.unwrap_or(match entry.direction {
                    SortOrder::Asc => NullsOrder::Last,
                    SortOrder::Desc => NullsOrder::First,
                });
                let ord = query::compare_with_nulls(&av, &bv, entry.direction, nulls);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    let start = args.skip.min(records.len());
    let end = match args.take {
        Some(take) => start.saturating_add(take as usize).min(records.len()),
        None => records.len(),
    };

    Ok(records[start..end]
        .iter()
        .map(|(values, rows)| GroupRecord {
            by: values.clone(),
            aggregates: compute(entity, rows, &args.selections),
        })
        .collect())
}
