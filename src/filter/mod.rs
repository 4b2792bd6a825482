//! Filter compiler: a declarative predicate tree lowered into an executable
//! row matcher.
//!
//! Compilation validates every referenced field against the schema and
//! rejects malformed leaves before any storage access. Evaluation is
//! two-valued: a comparison against a stored null is simply false, and
//! `NOT` is plain boolean negation, so De Morgan equivalences hold.

use crate::error::{Result, TesseraError};
use crate::schema::{EntityDef, FieldType, Schema};
use crate::value::{JsonNullFilter, Row, Value};

/// String-operator matching mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StringMode {
    /// Byte-exact comparison.
    #[default]
    Default,
    /// ASCII case-insensitive comparison.
    Insensitive,
}

/// Leaf condition over a scalar field. Multiple operators in one leaf are
/// conjoined; `in` together with `equals` is rejected at compile time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScalarCond {
    /// Exact match; `Value::Null` is the null test.
    pub equals: Option<Value>,
    /// Negated exact match.
    pub not: Option<Value>,
    /// Membership in a non-null literal list.
    pub r#in: Option<Vec<Value>>,
    /// Negated membership.
    pub not_in: Option<Vec<Value>>,
    /// Strictly less than.
    pub lt: Option<Value>,
    /// Less than or equal.
    pub lte: Option<Value>,
    /// Strictly greater than.
    pub gt: Option<Value>,
    /// Greater than or equal.
    pub gte: Option<Value>,
    /// Substring match (string fields only).
    pub contains: Option<String>,
    /// Prefix match (string fields only).
    pub starts_with: Option<String>,
    /// Suffix match (string fields only).
    pub ends_with: Option<String>,
    /// Matching mode for the string operators.
    pub mode: StringMode,
}

impl ScalarCond {
    /// Exact-match condition.
    pub fn equals(value: impl Into<Value>) -> Self {
        Self {
            equals: Some(value.into()),
            ..Self::default()
        }
    }

    /// Null test for nullable fields.
    pub fn is_null() -> Self {
        Self::equals(Value::Null)
    }

    /// Negated exact match.
    pub fn not(value: impl Into<Value>) -> Self {
        Self {
            not: Some(value.into()),
            ..Self::default()
        }
    }

    /// List-membership condition.
    pub fn is_in(values: Vec<Value>) -> Self {
        Self {
            r#in: Some(values),
            ..Self::default()
        }
    }

    /// Strictly-less-than condition.
    pub fn lt(value: impl Into<Value>) -> Self {
        Self {
            lt: Some(value.into()),
            ..Self::default()
        }
    }

    /// Greater-than-or-equal condition.
    pub fn gte(value: impl Into<Value>) -> Self {
        Self {
            gte: Some(value.into()),
            ..Self::default()
        }
    }

    /// Substring condition.
    pub fn contains(needle: impl Into<String>) -> Self {
        Self {
            contains: Some(needle.into()),
            ..Self::default()
        }
    }

    /// Switches the string operators to case-insensitive matching.
    pub fn insensitive(mut self) -> Self {
        self.mode = StringMode::Insensitive;
        self
    }
}

/// Target of a JSON `equals` leaf.
#[derive(Clone, Debug, PartialEq)]
pub enum JsonTarget {
    /// One of the null sentinels (column-level; requires an empty path).
    Sentinel(JsonNullFilter),
    /// A concrete JSON value compared at the leaf's path.
    Value(serde_json::Value),
}

/// Leaf condition over a structured JSON field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonCond {
    /// Path into the payload: object keys or numeric array indexes.
    pub path: Vec<String>,
    /// Exact match against a sentinel or concrete value.
    pub equals: Option<JsonTarget>,
    /// The string at `path` contains this substring.
    pub string_contains: Option<String>,
    /// The string at `path` starts with this prefix.
    pub string_starts_with: Option<String>,
    /// The string at `path` ends with this suffix.
    pub string_ends_with: Option<String>,
    /// The array at `path` contains the element (or every element of the
    /// given array).
    pub array_contains: Option<serde_json::Value>,
    /// The array at `path` begins with this element.
    pub array_starts_with: Option<serde_json::Value>,
    /// The array at `path` ends with this element.
    pub array_ends_with: Option<serde_json::Value>,
}

impl JsonCond {
    /// Column-level null-sentinel match.
    pub fn null_sentinel(kind: JsonNullFilter) -> Self {
        Self {
            equals: Some(JsonTarget::Sentinel(kind)),
            ..Self::default()
        }
    }

    /// Exact payload match at the root.
    pub fn equals(value: serde_json::Value) -> Self {
        Self {
            equals: Some(JsonTarget::Value(value)),
            ..Self::default()
        }
    }

    /// Scopes the condition to a path inside the payload.
    pub fn at_path(mut self, path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }
}

/// Declarative predicate tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Every child must match. `And([])` matches all rows.
    And(Vec<Filter>),
    /// At least one child must match. `Or([])` matches no rows.
    Or(Vec<Filter>),
    /// Child must not match.
    Not(Box<Filter>),
    /// Scalar leaf condition.
    Scalar {
        /// Field name.
        field: String,
        /// Conjoined operators.
        cond: ScalarCond,
    },
    /// JSON leaf condition.
    Json {
        /// Field name.
        field: String,
        /// Conjoined operators.
        cond: JsonCond,
    },
}

impl Filter {
    /// Leaf over a scalar field.
    pub fn scalar(field: impl Into<String>, cond: ScalarCond) -> Self {
        Filter::Scalar {
            field: field.into(),
            cond,
        }
    }

    /// Leaf over a JSON field.
    pub fn json(field: impl Into<String>, cond: JsonCond) -> Self {
        Filter::Json {
            field: field.into(),
            cond,
        }
    }

    /// Negation combinator.
    pub fn not(inner: Filter) -> Self {
        Filter::Not(Box::new(inner))
    }
}

/// Budgets applied while compiling a predicate tree.
#[derive(Clone, Copy, Debug)]
pub struct FilterLimits {
    /// Maximum combinator nesting depth.
    pub max_depth: usize,
    /// Maximum total tree nodes.
    pub max_nodes: usize,
    /// Maximum literals in one `in`/`notIn` list.
    pub max_in_list: usize,
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_nodes: 512,
            max_in_list: 1024,
        }
    }
}

#[derive(Debug)]
enum Node {
    All,
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Scalar { pos: usize, ops: Vec<ScalarOp> },
    Json { pos: usize, ops: Vec<JsonOp> },
}

#[derive(Debug)]
enum ScalarOp {
    Equals(Value),
    NotEquals(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Contains(String, StringMode),
    StartsWith(String, StringMode),
    EndsWith(String, StringMode),
}

#[derive(Debug)]
enum JsonOp {
    Sentinel(JsonNullFilter),
    Equals(Vec<String>, serde_json::Value),
    StringContains(Vec<String>, String),
    StringStartsWith(Vec<String>, String),
    StringEndsWith(Vec<String>, String),
    ArrayContains(Vec<String>, serde_json::Value),
    ArrayStartsWith(Vec<String>, serde_json::Value),
    ArrayEndsWith(Vec<String>, serde_json::Value),
}

/// Opaque compiled condition consumed by the planner and mutation engine.
#[derive(Debug)]
pub struct CompiledFilter {
    root: Node,
}

impl CompiledFilter {
    /// Matcher that accepts every row.
    pub fn match_all() -> Self {
        Self { root: Node::All }
    }

    /// Whether the row satisfies the predicate.
    pub fn matches(&self, row: &Row) -> bool {
        eval(&self.root, row)
    }
}

/// Compiles a predicate tree against an entity. `None` compiles to match-all.
pub fn compile(
    schema: &Schema,
    entity: &EntityDef,
    filter: Option<&Filter>,
    limits: &FilterLimits,
) -> Result<CompiledFilter> {
    let Some(filter) = filter else {
        return Ok(CompiledFilter::match_all());
    };
    let mut budget = Budget {
        limits,
        nodes: 0,
    };
    let root = lower(schema, entity, filter, 0, &mut budget)?;
    Ok(CompiledFilter { root })
}

struct Budget<'a> {
    limits: &'a FilterLimits,
    nodes: usize,
}

impl Budget<'_> {
    fn charge(&mut self, depth: usize) -> Result<()> {
        self.nodes += 1;
        if self.nodes > self.limits.max_nodes {
            return Err(TesseraError::validation(format!(
                "predicate tree exceeds {} nodes",
                self.limits.max_nodes
            )));
        }
        if depth > self.limits.max_depth {
            return Err(TesseraError::validation(format!(
                "predicate tree exceeds depth {}",
                self.limits.max_depth
            )));
        }
        Ok(())
    }
}

fn lower(
    schema: &Schema,
    entity: &EntityDef,
    filter: &Filter,
    depth: usize,
    budget: &mut Budget<'_>,
) -> Result<Node> {
    budget.charge(depth)?;
    match filter {
        Filter::And(children) => {
            if children.is_empty() {
                return Ok(Node::All);
            }
            let lowered = children
                .iter()
                .map(|c| lower(schema, entity, c, depth + 1, budget))
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::And(lowered))
        }
        Filter::Or(children) => {
            let lowered = children
                .iter()
                .map(|c| lower(schema, entity, c, depth + 1, budget))
                .collect::<Result<Vec<_>>>()?;
            Ok(Node::Or(lowered))
        }
        Filter::Not(inner) => Ok(Node::Not(Box::new(lower(
            schema,
            entity,
            inner,
            depth + 1,
            budget,
        )?))),
        Filter::Scalar { field, cond } => lower_scalar(schema, entity, field, cond, budget),
        Filter::Json { field, cond } => lower_json(entity, field, cond),
    }
}

fn lower_scalar(
    schema: &Schema,
    entity: &EntityDef,
    field: &str,
    cond: &ScalarCond,
    budget: &mut Budget<'_>,
) -> Result<Node> {
    let def = entity.field_def(field)?;
    if def.ty == FieldType::Json {
        return Err(TesseraError::validation(format!(
            "field '{}.{}' is a JSON field; use a JSON condition",
            entity.name, field
        )));
    }
    if cond.r#in.is_some() && cond.equals.is_some() {
        return Err(TesseraError::validation(format!(
            "condition on '{}.{}' combines 'in' and 'equals'",
            entity.name, field
        )));
    }
    let string_field = def.ty == FieldType::String;
    let orderable = matches!(
        def.ty,
        FieldType::String | FieldType::Int | FieldType::Float | FieldType::DateTime
    );

    let mut ops = Vec::new();
    if let Some(v) = &cond.equals {
        check_literal(schema, entity, def, v, "equals")?;
        ops.push(ScalarOp::Equals(v.clone()));
    }
    if let Some(v) = &cond.not {
        check_literal(schema, entity, def, v, "not")?;
        ops.push(ScalarOp::NotEquals(v.clone()));
    }
    for (list, negated) in [(&cond.r#in, false), (&cond.not_in, true)] {
        let Some(list) = list else { continue };
        let op_name = if negated { "notIn" } else { "in" };
        if list.len() > budget.limits.max_in_list {
            return Err(TesseraError::validation(format!(
                "{op_name}() list exceeds maximum of {} literals",
                budget.limits.max_in_list
            )));
        }
        for v in list {
            if v.is_null() {
                return Err(TesseraError::validation(format!(
                    "{op_name}() does not accept null literals"
                )));
            }
            check_literal(schema, entity, def, v, op_name)?;
        }
        ops.push(if negated {
            ScalarOp::NotIn(list.clone())
        } else {
            ScalarOp::In(list.clone())
        });
    }
    for (value, build, name) in [
        (&cond.lt, ScalarOp::Lt as fn(Value) -> ScalarOp, "lt"),
        (&cond.lte, ScalarOp::Lte as fn(Value) -> ScalarOp, "lte"),
        (&cond.gt, ScalarOp::Gt as fn(Value) -> ScalarOp, "gt"),
        (&cond.gte, ScalarOp::Gte as fn(Value) -> ScalarOp, "gte"),
    ] {
        let Some(v) = value else { continue };
        if !orderable {
            return Err(TesseraError::validation(format!(
                "{name}() not supported on '{}.{}' ({:?})",
                entity.name, field, def.ty
            )));
        }
        if v.is_null() {
            return Err(TesseraError::validation(format!(
                "{name}() does not accept null literals"
            )));
        }
        check_literal(schema, entity, def, v, name)?;
        ops.push(build(v.clone()));
    }
    for (value, name) in [
        (&cond.contains, "contains"),
        (&cond.starts_with, "startsWith"),
        (&cond.ends_with, "endsWith"),
    ] {
        if value.is_some() && !string_field {
            return Err(TesseraError::validation(format!(
                "{name}() requires a string field, '{}.{}' is {:?}",
                entity.name, field, def.ty
            )));
        }
    }
    if let Some(s) = &cond.contains {
        ops.push(ScalarOp::Contains(s.clone(), cond.mode));
    }
    if let Some(s) = &cond.starts_with {
        ops.push(ScalarOp::StartsWith(s.clone(), cond.mode));
    }
    if let Some(s) = &cond.ends_with {
        ops.push(ScalarOp::EndsWith(s.clone(), cond.mode));
    }

    Ok(Node::Scalar {
        pos: entity.field_pos(field).expect("validated above"),
        ops,
    })
}

fn check_literal(
    schema: &Schema,
    entity: &EntityDef,
    def: &crate::schema::FieldDef,
    value: &Value,
    op: &str,
) -> Result<()> {
    if value.is_null() {
        // Null tests are permitted everywhere; a non-nullable field simply
        // never matches.
        return Ok(());
    }
    let ok = match def.ty {
        FieldType::String => matches!(value, Value::String(_)),
        FieldType::Int | FieldType::Float => matches!(value, Value::Int(_) | Value::Float(_)),
        FieldType::Bool => matches!(value, Value::Bool(_)),
        FieldType::DateTime => matches!(value, Value::DateTime(_)),
        FieldType::Enum(name) => match value {
            Value::String(s) => {
                let variants = schema.enum_values(name)?;
                if !variants.contains(&s.as_str()) {
                    return Err(TesseraError::validation(format!(
                        "'{s}' is not a variant of enum {name}"
                    )));
                }
                true
            }
            _ => false,
        },
        FieldType::Json => false,
    };
    if !ok {
        return Err(TesseraError::validation(format!(
            "{op}() literal of type {} does not match '{}.{}' ({:?})",
            value.type_name(),
            entity.name,
            def.name,
            def.ty
        )));
    }
    Ok(())
}

fn lower_json(entity: &EntityDef, field: &str, cond: &JsonCond) -> Result<Node> {
    let def = entity.field_def(field)?;
    if def.ty != FieldType::Json {
        return Err(TesseraError::validation(format!(
            "JSON condition applied to non-JSON field '{}.{}'",
            entity.name, field
        )));
    }
    let mut ops = Vec::new();
    match &cond.equals {
        Some(JsonTarget::Sentinel(kind)) => {
            if !cond.path.is_empty() {
                return Err(TesseraError::validation(
                    "null sentinels apply at the column level; path must be empty",
                ));
            }
            ops.push(JsonOp::Sentinel(*kind));
        }
        Some(JsonTarget::Value(v)) => ops.push(JsonOp::Equals(cond.path.clone(), v.clone())),
        None => {}
    }
    if let Some(s) = &cond.string_contains {
        ops.push(JsonOp::StringContains(cond.path.clone(), s.clone()));
    }
    if let Some(s) = &cond.string_starts_with {
        ops.push(JsonOp::StringStartsWith(cond.path.clone(), s.clone()));
    }
    if let Some(s) = &cond.string_ends_with {
        ops.push(JsonOp::StringEndsWith(cond.path.clone(), s.clone()));
    }
    if let Some(v) = &cond.array_contains {
        ops.push(JsonOp::ArrayContains(cond.path.clone(), v.clone()));
    }
    if let Some(v) = &cond.array_starts_with {
        ops.push(JsonOp::ArrayStartsWith(cond.path.clone(), v.clone()));
    }
    if let Some(v) = &cond.array_ends_with {
        ops.push(JsonOp::ArrayEndsWith(cond.path.clone(), v.clone()));
    }
    Ok(Node::Json {
        pos: entity.field_pos(field).expect("validated above"),
        ops,
    })
}

fn eval(node: &Node, row: &Row) -> bool {
    match node {
        Node::All => true,
        Node::And(children) => children.iter().all(|c| eval(c, row)),
        Node::Or(children) => children.iter().any(|c| eval(c, row)),
        Node::Not(inner) => !eval(inner, row),
        Node::Scalar { pos, ops } => ops.iter().all(|op| eval_scalar(op, &row[*pos])),
        Node::Json { pos, ops } => ops.iter().all(|op| eval_json(op, &row[*pos])),
    }
}

fn eval_scalar(op: &ScalarOp, stored: &Value) -> bool {
    match op {
        ScalarOp::Equals(v) => value_eq(stored, v),
        ScalarOp::NotEquals(v) => !value_eq(stored, v),
        ScalarOp::In(list) => list.iter().any(|v| value_eq(stored, v)),
        ScalarOp::NotIn(list) => !list.iter().any(|v| value_eq(stored, v)),
        ScalarOp::Lt(v) => cmp_is(stored, v, |o| o == std::cmp::Ordering::Less),
        ScalarOp::Lte(v) => cmp_is(stored, v, |o| o != std::cmp::Ordering::Greater),
        ScalarOp::Gt(v) => cmp_is(stored, v, |o| o == std::cmp::Ordering::Greater),
        ScalarOp::Gte(v) => cmp_is(stored, v, |o| o != std::cmp::Ordering::Less),
        ScalarOp::Contains(needle, mode) => with_str(stored, |s| match mode {
            StringMode::Default => s.contains(needle),
            StringMode::Insensitive => fold(s).contains(&fold(needle)),
        }),
        ScalarOp::StartsWith(prefix, mode) => with_str(stored, |s| match mode {
            StringMode::Default => s.starts_with(prefix),
            StringMode::Insensitive => fold(s).starts_with(&fold(prefix)),
        }),
        ScalarOp::EndsWith(suffix, mode) => with_str(stored, |s| match mode {
            StringMode::Default => s.ends_with(suffix),
            StringMode::Insensitive => fold(s).ends_with(&fold(suffix)),
        }),
    }
}

fn value_eq(stored: &Value, literal: &Value) -> bool {
    if literal.is_null() {
        return stored.is_null();
    }
    stored.partial_cmp_value(literal) == Some(std::cmp::Ordering::Equal)
}

fn cmp_is(stored: &Value, literal: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    stored
        .partial_cmp_value(literal)
        .map(check)
        .unwrap_or(false)
}

fn with_str(stored: &Value, f: impl Fn(&str) -> bool) -> bool {
    match stored {
        Value::String(s) => f(s),
        _ => false,
    }
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

fn eval_json(op: &JsonOp, stored: &Value) -> bool {
    let payload = match stored {
        Value::Json(v) => Some(v),
        _ => None,
    };
    match op {
        JsonOp::Sentinel(kind) => kind.matches(stored),
        JsonOp::Equals(path, target) => at_path(payload, path).map_or(false, |v| v == target),
        JsonOp::StringContains(path, needle) => {
            json_str(payload, path).map_or(false, |s| s.contains(needle))
        }
        JsonOp::StringStartsWith(path, prefix) => {
            json_str(payload, path).map_or(false, |s| s.starts_with(prefix))
        }
        JsonOp::StringEndsWith(path, suffix) => {
            json_str(payload, path).map_or(false, |s| s.ends_with(suffix))
        }
        JsonOp::ArrayContains(path, target) => {
            let Some(serde_json::Value::Array(items)) = at_path(payload, path) else {
                return false;
            };
            match target {
                serde_json::Value::Array(wanted) => wanted.iter().all(|w| items.contains(w)),
                single => items.contains(single),
            }
        }
        JsonOp::ArrayStartsWith(path, target) => {
            let Some(serde_json::Value::Array(items)) = at_path(payload, path) else {
                return false;
            };
            items.first() == Some(target)
        }
        JsonOp::ArrayEndsWith(path, target) => {
            let Some(serde_json::Value::Array(items)) = at_path(payload, path) else {
                return false;
            };
            items.last() == Some(target)
        }
    }
}

fn at_path<'a>(
    payload: Option<&'a serde_json::Value>,
    path: &[String],
) -> Option<&'a serde_json::Value> {
    let mut current = payload?;
    for segment in path {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn json_str<'a>(payload: Option<&'a serde_json::Value>, path: &[String]) -> Option<&'a str> {
    match at_path(payload, path)? {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    }
}
