//! The contract a migratable record exposes.
//!
//! [`Entity`] is what the validator needs to compare two copies of a record.
//! [`TableEntity`] adds the table mapping used to read and write it.

use crate::error::Result;

use super::value::{Row, SqlValue};

/// A record that can be compared across the base and target stores.
pub trait Entity: Send + Sync + 'static {
    /// Primary key.
    fn id(&self) -> i64;

    /// Business equality with the copy of the same record in the other store.
    ///
    /// The validator always calls `base.compare_to(&target)`. Implementations
    /// decide which columns matter and may be asymmetric.
    fn compare_to(&self, other: &Self) -> bool;
}

/// An [`Entity`] stored in one SQL table.
///
/// `COLUMNS` lists every mirrored column; it must contain `ID_COLUMN` and,
/// for incremental validation, `UPDATED_AT_COLUMN`. [`TableEntity::values`]
/// returns values in `COLUMNS` order.
pub trait TableEntity: Entity + Sized {
    /// Table name.
    const TABLE: &'static str;

    /// Mirrored columns.
    const COLUMNS: &'static [&'static str];

    /// Primary key column.
    const ID_COLUMN: &'static str = "id";

    /// Last-modified column, holding a monotonically increasing integer time.
    const UPDATED_AT_COLUMN: &'static str = "utime";

    /// Decode a row selected with `COLUMNS`.
    fn from_row(row: &Row) -> Result<Self>;

    /// Column values in `COLUMNS` order.
    fn values(&self) -> Vec<SqlValue>;

    /// Last-modified time.
    fn updated_at(&self) -> i64;
}
