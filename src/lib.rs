//! An embedded, schemaless table database: each record is a primary
//! key mapped to an ordered set of named columns, searchable through
//! secondary indices (lexical, decimal, or token) and a small query
//! planner/executor. See `Tdb` for the public entry point.

pub mod btree;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod lock;
pub mod query;
pub mod tdb;
pub mod txn;
pub mod uid;
pub mod util;

pub use btree::IndexKind;
pub use codec::ColumnMap;
pub use config::{parse_dsn, Config, OpenFlags, TuneFlags};
pub use error::{Error, Result};
pub use index::SetIndexMode;
pub use query::{Operator, OrderType, ProcFlags, Query};
pub use tdb::Tdb;
