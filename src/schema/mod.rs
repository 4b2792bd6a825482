//! Schema registry: the static description of entities, scalar fields,
//! enums, unique keys, and relations that every other layer consults.
//!
//! A [`Schema`] is assembled once at startup through the builder API, then
//! shared read-only (`Arc<Schema>`) across all concurrent callers.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{Result, TesseraError};
use crate::value::Value;

/// Semantic type of a scalar field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// Boolean.
    Bool,
    /// Timestamp (epoch nanoseconds, UTC).
    DateTime,
    /// Named enum; values are validated against the registered variant set.
    Enum(&'static str),
    /// Free-form structured JSON with tri-state null semantics.
    Json,
}

impl FieldType {
    /// Whether `avg`/`sum` and relative numeric updates apply.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::Float)
    }
}

/// Server-assigned default applied when a create omits the field.
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValue {
    /// A fixed literal.
    Value(Value),
    /// Current timestamp at insert time.
    Now,
    /// Generated collision-resistant row identifier.
    GeneratedId,
    /// Generated UUID string.
    GeneratedUuid,
}

/// One scalar field of an entity.
#[derive(Clone, Debug)]
pub struct FieldDef {
    /// Field name as exposed to callers.
    pub name: &'static str,
    /// Semantic type.
    pub ty: FieldType,
    /// Whether the stored value may be a database null.
    pub nullable: bool,
    /// Default applied on create when the field is omitted.
    pub default: Option<DefaultValue>,
    /// Bumped to the current timestamp on every successful update.
    pub updated_at: bool,
}

impl FieldDef {
    /// Required scalar field with no default.
    pub fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: None,
            updated_at: false,
        }
    }

    /// Nullable scalar field defaulting to database null.
    pub fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            default: Some(DefaultValue::Value(Value::Null)),
            updated_at: false,
        }
    }

    /// Attaches a default to the field.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Marks the field as an update-tracked timestamp.
    pub fn tracks_updates(mut self) -> Self {
        self.updated_at = true;
        self
    }
}

/// Relation cardinality as seen from the declaring entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    /// To-one: the foreign key lives on the declaring entity.
    One,
    /// To-many: the foreign key lives on the target entity.
    Many,
}

/// Policy applied to dependent rows when their referenced row is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferentialAction {
    /// Fail the delete while dependents exist.
    Restrict,
    /// Delete dependents transitively.
    Cascade,
    /// Detach dependents by nulling their foreign key.
    SetNull,
}

/// One relation field of an entity.
#[derive(Clone, Debug)]
pub struct RelationDef {
    /// Relation name as exposed to callers (`parent`, `children`, ...).
    pub name: &'static str,
    /// Target entity name.
    pub target: &'static str,
    /// Cardinality from the declaring side.
    pub cardinality: Cardinality,
    /// Foreign-key field: on the declaring entity for [`Cardinality::One`],
    /// on the target entity for [`Cardinality::Many`].
    pub fk_field: &'static str,
    /// Referenced field on the other side, normally the primary key.
    pub references: &'static str,
    /// Delete policy, meaningful on the [`Cardinality::Many`] side.
    pub on_delete: ReferentialAction,
    /// True when the relation targets the declaring entity itself.
    pub self_referential: bool,
}

impl RelationDef {
    /// To-one relation with the foreign key on the declaring entity.
    pub fn one(name: &'static str, target: &'static str, fk_field: &'static str) -> Self {
        Self {
            name,
            target,
            cardinality: Cardinality::One,
            fk_field,
            references: "id",
            on_delete: ReferentialAction::Restrict,
            self_referential: false,
        }
    }

    /// To-many relation with the foreign key on the target entity.
    pub fn many(name: &'static str, target: &'static str, fk_field: &'static str) -> Self {
        Self {
            name,
            target,
            cardinality: Cardinality::Many,
            fk_field,
            references: "id",
            on_delete: ReferentialAction::Restrict,
            self_referential: false,
        }
    }

    /// Sets the delete policy for dependents of this relation.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Marks the relation as self-referential (folder trees).
    pub fn self_ref(mut self) -> Self {
        self.self_referential = true;
        self
    }
}

/// A unique-key set over one or more fields.
#[derive(Clone, Debug)]
pub struct UniqueKey {
    /// Constraint name reported on violations.
    pub name: &'static str,
    /// Member fields, in declaration order.
    pub fields: SmallVec<[&'static str; 2]>,
}

/// Full description of one entity.
#[derive(Clone, Debug)]
pub struct EntityDef {
    /// Entity name.
    pub name: &'static str,
    /// Ordered scalar fields.
    pub fields: Vec<FieldDef>,
    /// Relation fields.
    pub relations: Vec<RelationDef>,
    /// Unique-key sets (the primary key is always one of them).
    pub uniques: Vec<UniqueKey>,
    field_index: FxHashMap<&'static str, usize>,
}

impl EntityDef {
    /// Starts a new entity description. Every entity carries an `id` string
    /// primary key with a generated default.
    pub fn new(name: &'static str) -> Self {
        let mut def = Self {
            name,
            fields: Vec::new(),
            relations: Vec::new(),
            uniques: vec![UniqueKey {
                name: "id",
                fields: SmallVec::from_slice(&["id"]),
            }],
            field_index: FxHashMap::default(),
        };
        def.push_field(
            FieldDef::required("id", FieldType::String).with_default(DefaultValue::GeneratedId),
        );
        def
    }

    /// Adds a scalar field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.push_field(field);
        self
    }

    /// Adds a relation field.
    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Adds a unique-key set. All member fields must already be declared.
    pub fn unique(mut self, name: &'static str, fields: &[&'static str]) -> Self {
        self.uniques.push(UniqueKey {
            name,
            fields: SmallVec::from_slice(fields),
        });
        self
    }

    fn push_field(&mut self, field: FieldDef) {
        self.field_index.insert(field.name, self.fields.len());
        self.fields.push(field);
    }

    /// Position of a field in the row layout.
    pub fn field_pos(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    /// Looks up a field definition, failing with a validation error.
    pub fn field_def(&self, name: &str) -> Result<&FieldDef> {
        self.field_pos(name)
            .map(|i| &self.fields[i])
            .ok_or_else(|| {
                TesseraError::validation(format!("unknown field '{}' on {}", name, self.name))
            })
    }

    /// Looks up a relation definition, failing with a validation error.
    pub fn relation_def(&self, name: &str) -> Result<&RelationDef> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                TesseraError::validation(format!("unknown relation '{}' on {}", name, self.name))
            })
    }

    /// Position of the primary-key field.
    pub fn pk_pos(&self) -> usize {
        // "id" is inserted first by `new`.
        0
    }

    /// Whether the given field set matches one of the unique keys.
    pub fn matching_unique(&self, fields: &[&str]) -> Option<&UniqueKey> {
        self.uniques.iter().find(|key| {
            key.fields.len() == fields.len() && key.fields.iter().all(|f| fields.contains(f))
        })
    }
}

/// Immutable registry of entities and enums.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    entities: Vec<EntityDef>,
    entity_index: FxHashMap<&'static str, usize>,
    enums: FxHashMap<&'static str, &'static [&'static str]>,
}

impl Schema {
    /// Starts an empty schema builder.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            schema: Schema::default(),
        }
    }

    /// Looks up an entity, failing with a validation error.
    pub fn entity(&self, name: &str) -> Result<&EntityDef> {
        self.entity_index
            .get(name)
            .map(|i| &self.entities[*i])
            .ok_or_else(|| TesseraError::validation(format!("unknown entity '{name}'")))
    }

    /// All registered entities, in registration order.
    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    /// Variant names of a registered enum.
    pub fn enum_values(&self, name: &str) -> Result<&'static [&'static str]> {
        self.enums
            .get(name)
            .copied()
            .ok_or_else(|| TesseraError::validation(format!("unknown enum '{name}'")))
    }
}

/// Fluent builder for a [`Schema`].
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    /// Registers an enum with its variant names.
    pub fn with_enum(mut self, name: &'static str, values: &'static [&'static str]) -> Self {
        self.schema.enums.insert(name, values);
        self
    }

    /// Registers an entity.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.schema
            .entity_index
            .insert(entity.name, self.schema.entities.len());
        self.schema.entities.push(entity);
        self
    }

    /// Overrides the delete policy of one relation. Panics on unknown names;
    /// this is a startup-time configuration path.
    pub fn on_delete(
        mut self,
        entity: &'static str,
        relation: &'static str,
        action: ReferentialAction,
    ) -> Self {
        let idx = *self
            .schema
            .entity_index
            .get(entity)
            .unwrap_or_else(|| panic!("unknown entity '{entity}' in on_delete override"));
        let rel = self.schema.entities[idx]
            .relations
            .iter_mut()
            .find(|r| r.name == relation)
            .unwrap_or_else(|| panic!("unknown relation '{entity}.{relation}' in on_delete override"));
        rel.on_delete = action;
        self
    }

    /// Finalizes the schema. Cross-checks that every relation target and
    /// foreign-key field exists.
    pub fn build(self) -> Result<Schema> {
        let schema = self.schema;
        for entity in &schema.entities {
            for rel in &entity.relations {
                let target = schema.entity(rel.target)?;
                let fk_holder = match rel.cardinality {
                    Cardinality::One => entity,
                    Cardinality::Many => target,
                };
                if fk_holder.field_pos(rel.fk_field).is_none() {
                    return Err(TesseraError::validation(format!(
                        "relation {}.{} names missing foreign-key field '{}'",
                        entity.name, rel.name, rel.fk_field
                    )));
                }
                if target.field_pos(rel.references).is_none() {
                    return Err(TesseraError::validation(format!(
                        "relation {}.{} references missing field '{}.{}'",
                        entity.name, rel.name, rel.target, rel.references
                    )));
                }
            }
        }
        Ok(schema)
    }
}
