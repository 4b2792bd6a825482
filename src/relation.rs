//! Relation resolver: expands `select`/`include` directives into nested
//! fetches and `_count` projections.
//!
//! The two projection styles are mutually exclusive by construction:
//! [`Projection`] is a tagged variant, so a request carrying both cannot be
//! represented. Self-referential relations (`parent`/`children`) expand one
//! level per request; a nested self-referential expansion is rejected so
//! plan size stays bounded. Full subtrees are built by the caller via
//! repeated calls.

use std::cmp::Ordering;

use crate::error::{Result, TesseraError};
use crate::filter::{self, Filter, FilterLimits};
use crate::query::{self, CursorMiss, FindManyArgs};
use crate::record::{Record, RelationPayload};
use crate::schema::{Cardinality, EntityDef, Schema};
use crate::store::Tables;
use crate::value::{Row, Value};

/// Requested result shape: an explicit allow-list (`Select`) or the default
/// scalars plus named relations (`Include`). Holding both is
/// unrepresentable.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Projection {
    /// All scalar fields, no relations.
    #[default]
    Default,
    /// Explicit field/relation allow-list.
    Select(SelectSpec),
    /// Default scalars plus the named relations.
    Include(IncludeSpec),
}

/// Body of a `select` projection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectSpec {
    /// Scalar fields to project.
    pub fields: Vec<String>,
    /// Relations to expand.
    pub relations: Vec<RelationSelection>,
    /// `_count` projections.
    pub counts: Vec<CountSelection>,
}

impl SelectSpec {
    /// Select the given scalar fields.
    pub fn fields(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds a relation expansion.
    pub fn relation(mut self, selection: RelationSelection) -> Self {
        self.relations.push(selection);
        self
    }

    /// Adds a `_count` projection.
    pub fn count(mut self, count: CountSelection) -> Self {
        self.counts.push(count);
        self
    }
}

/// Body of an `include` projection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IncludeSpec {
    /// Relations to expand.
    pub relations: Vec<RelationSelection>,
    /// `_count` projections.
    pub counts: Vec<CountSelection>,
}

impl IncludeSpec {
    /// Empty include (default scalars only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a relation expansion.
    pub fn relation(mut self, selection: RelationSelection) -> Self {
        self.relations.push(selection);
        self
    }

    /// Adds a `_count` projection.
    pub fn count(mut self, count: CountSelection) -> Self {
        self.counts.push(count);
        self
    }
}

/// One relation expansion request.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationSelection {
    /// Relation name on the parent entity.
    pub relation: String,
    /// Child-collection list arguments (to-many relations only).
    pub args: FindManyArgs,
    /// Nested projection applied to the related records.
    pub projection: Option<Box<Projection>>,
}

impl RelationSelection {
    /// Expands a relation with default arguments and shape.
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            args: FindManyArgs::default(),
            projection: None,
        }
    }

    /// Scopes the child collection with `where`/`orderBy`/cursor/window
    /// arguments.
    pub fn args(mut self, args: FindManyArgs) -> Self {
        self.args = args;
        self
    }

    /// Applies a nested projection to the related records.
    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = Some(Box::new(projection));
        self
    }
}

/// One `_count` projection, independently filterable.
#[derive(Clone, Debug, PartialEq)]
pub struct CountSelection {
    /// To-many relation to count.
    pub relation: String,
    /// Relation-scoped predicate.
    pub filter: Option<Filter>,
}

impl CountSelection {
    /// Counts all related rows.
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            filter: None,
        }
    }

    /// Counts only related rows matching the predicate.
    pub fn filtered(relation: impl Into<String>, filter: Filter) -> Self {
        Self {
            relation: relation.into(),
            filter: Some(filter),
        }
    }
}

/// Shapes a batch of rows according to the projection, expanding relations
/// from the supplied tables.
pub fn resolve(
    schema: &Schema,
    entity: &EntityDef,
    rows: &[Row],
    projection: &Projection,
    tables: &Tables,
    limits: &FilterLimits,
) -> Result<Vec<Record>> {
    rows.iter()
        .map(|row| resolve_row(schema, entity, row, projection, tables, limits, false))
        .collect()
}

fn resolve_row(
    schema: &Schema,
    entity: &EntityDef,
    row: &Row,
    projection: &Projection,
    tables: &Tables,
    limits: &FilterLimits,
    inside_self_relation: bool,
) -> Result<Record> {
    let (mut record, relations, counts) = match projection {
        Projection::Default => (Record::from_row(entity, row), &[][..], &[][..]),
        Projection::Select(spec) => {
            for field in &spec.fields {
                entity.field_def(field)?;
            }
            (
                Record::from_row_selected(entity, row, &spec.fields),
                spec.relations.as_slice(),
                spec.counts.as_slice(),
            )
        }
        Projection::Include(spec) => (
            Record::from_row(entity, row),
            spec.relations.as_slice(),
            spec.counts.as_slice(),
        ),
    };

    for selection in relations {
        let rel = entity.relation_def(&selection.relation)?;
        if inside_self_relation && rel.self_referential {
            return Err(TesseraError::validation(format!(
                "self-referential relation '{}.{}' cannot be expanded more than one level per \
                 request; issue a follow-up query instead",
                entity.name, rel.name
            )));
        }
        let target = schema.entity(rel.target)?;
        let nested = selection.projection.as_deref().unwrap_or(&Projection::Default);
        let nested_in_self = inside_self_relation || rel.self_referential;

        let payload = match rel.cardinality {
            Cardinality::One => {
                if selection.args != FindManyArgs::default() {
                    return Err(TesseraError::validation(format!(
                        "relation '{}.{}' is to-one and accepts no list arguments",
                        entity.name, rel.name
                    )));
                }
                let fk_pos = entity.field_pos(rel.fk_field).expect("schema-checked");
                let fk = &row[fk_pos];
                if fk.is_null() {
                    RelationPayload::One(None)
                } else {
                    let ref_pos = target.field_pos(rel.references).expect("schema-checked");
                    let related = tables
                        .table(rel.target)?
                        .rows
                        .values()
                        .find(|r| values_equal(&r[ref_pos], fk));
                    match related {
                        Some(related_row) => RelationPayload::One(Some(Box::new(resolve_row(
                            schema,
                            target,
                            related_row,
                            nested,
                            tables,
                            limits,
                            nested_in_self,
                        )?))),
                        None => RelationPayload::One(None),
                    }
                }
            }
            Cardinality::Many => {
                let children = child_rows(entity, target, rel.fk_field, rel.references, row, tables)?;
                let compiled = filter::compile(schema, target, selection.args.filter.as_ref(), limits)?;
                let windowed = query::execute(
                    target,
                    children,
                    &compiled,
                    &selection.args,
                    CursorMiss::Empty,
                )?;
                let mut records = Vec::with_capacity(windowed.len());
                for child in &windowed {
                    records.push(resolve_row(
                        schema,
                        target,
                        child,
                        nested,
                        tables,
                        limits,
                        nested_in_self,
                    )?);
                }
                RelationPayload::Many(records)
            }
        };
        record.relations.push((rel.name, payload));
    }

    for count in counts {
        let rel = entity.relation_def(&count.relation)?;
        if rel.cardinality != Cardinality::Many {
            return Err(TesseraError::validation(format!(
                "_count requires a to-many relation, '{}.{}' is to-one",
                entity.name, rel.name
            )));
        }
        let target = schema.entity(rel.target)?;
        let children = child_rows(entity, target, rel.fk_field, rel.references, row, tables)?;
        let compiled = filter::compile(schema, target, count.filter.as_ref(), limits)?;
        let n = children.iter().filter(|r| compiled.matches(r)).count() as u64;
        record.counts.push((rel.name, n));
    }

    Ok(record)
}

fn child_rows(
    entity: &EntityDef,
    target: &EntityDef,
    fk_field: &str,
    references: &str,
    parent: &Row,
    tables: &Tables,
) -> Result<Vec<Row>> {
    let ref_pos = entity.field_pos(references).expect("schema-checked");
    let fk_pos = target.field_pos(fk_field).expect("schema-checked");
    let anchor = &parent[ref_pos];
    Ok(tables
        .table(target.name)?
        .rows
        .values()
        .filter(|r| values_equal(&r[fk_pos], anchor))
        .cloned()
        .collect())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a.partial_cmp_value(b) == Some(Ordering::Equal)
}
