//! Core abstractions shared by every component of a live migration.
//!
//! - [`value`]: SQL values and result rows
//! - [`traits`]: the [`Store`] and [`Transaction`] traits
//! - [`dialect`]: SQL syntax differences between the supported engines
//! - [`entity`]: the contract a migratable record exposes
//! - [`records`]: typed, keyset-paged access to an entity table
//!
//! The SQL drivers and the dual-write pool both implement [`Store`], so the
//! validator and fixer never know whether they talk to one database or to a
//! pool that mirrors writes to two.

pub mod dialect;
pub mod entity;
pub mod records;
pub mod traits;
pub mod value;

pub use dialect::Dialect;
pub use entity::{Entity, TableEntity};
pub use records::{Cursor, Records, Watermark};
pub use traits::{ExecResult, Prepared, Store, Transaction};
pub use value::{Row, SqlValue};
