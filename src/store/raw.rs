//! Minimal parameterized statement grammar for the raw escape hatch.
//!
//! This is the stand-in for an external SQL dialect translator. The grammar
//! is deliberately tiny: single-table `SELECT *` and `DELETE`, with a
//! conjunction of `field = $n` bindings. Parameters are bound by position,
//! never interpolated into the statement text, so caller-supplied text stays
//! opaque. Anything outside the grammar is a storage error.

use crate::error::{Result, TesseraError};

/// Verb of a parsed raw statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawVerb {
    /// `SELECT * FROM ...`
    Select,
    /// `DELETE FROM ...`
    Delete,
}

/// A parsed raw statement: verb, target table, and `field = $n` bindings.
#[derive(Clone, Debug, PartialEq)]
pub struct RawStatement {
    /// Statement verb.
    pub verb: RawVerb,
    /// Target entity/table name, as written.
    pub entity: String,
    /// Equality bindings: field name and 1-based parameter index.
    pub bindings: Vec<(String, usize)>,
}

fn unsupported(sql: &str) -> TesseraError {
    TesseraError::Storage(format!("unsupported raw statement: '{sql}'"))
}

/// Parses a raw statement. The parameter values themselves are bound later;
/// this only records their positions.
pub fn parse_statement(sql: &str) -> Result<RawStatement> {
    let tokens: Vec<&str> = sql.split_whitespace().collect();
    let kw = |t: &str, expected: &str| t.eq_ignore_ascii_case(expected);

    let (verb, rest) = match tokens.as_slice() {
        [sel, star, from, entity, rest @ ..]
            if kw(sel, "select") && *star == "*" && kw(from, "from") =>
        {
            (RawVerb::Select, (entity, rest))
        }
        [del, from, entity, rest @ ..] if kw(del, "delete") && kw(from, "from") => {
            (RawVerb::Delete, (entity, rest))
        }
        _ => return Err(unsupported(sql)),
    };
    let (entity, rest) = rest;

    let mut bindings = Vec::new();
    if !rest.is_empty() {
        let mut it = rest.iter();
        let first = it.next().ok_or_else(|| unsupported(sql))?;
        if !kw(first, "where") {
            return Err(unsupported(sql));
        }
        loop {
            let field = it.next().ok_or_else(|| unsupported(sql))?;
            let eq = it.next().ok_or_else(|| unsupported(sql))?;
            let param = it.next().ok_or_else(|| unsupported(sql))?;
            if *eq != "=" || !param.starts_with('$') {
                return Err(unsupported(sql));
            }
            let index: usize = param[1..]
                .parse()
                .map_err(|_| unsupported(sql))?;
            if index == 0 {
                return Err(unsupported(sql));
            }
            bindings.push(((*field).to_owned(), index));
            match it.next() {
                None => break,
                Some(and) if kw(and, "and") => continue,
                Some(_) => return Err(unsupported(sql)),
            }
        }
    }

    Ok(RawStatement {
        verb,
        entity: (*entity).to_owned(),
        bindings,
    })
}
