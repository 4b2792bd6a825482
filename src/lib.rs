//! Tessera: an embedded typed data-access engine.
//!
//! A schema registry describes entities, relations, and unique keys once at
//! startup; a single generic client then serves every entity with the full
//! operation surface: unique and filtered finds, cursor-windowed listing,
//! select/include relation shaping, aggregation and grouping, validated
//! mutations with referential actions, and copy-on-write transactions. A
//! small parameterized raw statement grammar is the escape hatch.
//!
//! ```no_run
//! use tessera::db::{Database, UniqueWhere};
//! use tessera::mutation::CreateData;
//! use tessera::relation::Projection;
//!
//! # fn main() -> tessera::error::Result<()> {
//! let db = Database::open(tessera::model::schema());
//! let users = db.entity("User")?;
//! let data = CreateData::new().set("email", "ada@example.com");
//! let user = users.create(&data, &Projection::Default)?;
//! let key = UniqueWhere::id(user.str_field("id")?);
//! let again = users.find_unique_or_throw(&key, &Projection::Default)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod db;
pub mod error;
pub mod filter;
pub mod model;
pub mod mutation;
pub mod query;
pub mod record;
pub mod relation;
pub mod schema;
pub mod store;
pub mod value;

pub use db::{Database, DatabaseOptions, EntityClient, Transaction, TransactionOptions, UniqueWhere};
pub use error::{Result, TesseraError};
pub use record::Record;
pub use value::Value;
