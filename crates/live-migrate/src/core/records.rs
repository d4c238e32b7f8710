//! Typed access to one entity table on one store.
//!
//! All scans use keyset pagination: the cursor names the last key already
//! seen, and `skip` steps over rows that failed to read so a broken row
//! never pins the scan in place.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::entity::TableEntity;
use super::traits::Store;
use super::value::SqlValue;

/// Position in an incremental scan: `(updated_at, id)` of the last row seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    pub utime: i64,
    pub id: i64,
}

impl Watermark {
    /// Cursor that admits only rows modified strictly after `utime`.
    pub fn after_utime(utime: i64) -> Self {
        Self { utime, id: i64::MAX }
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::after_utime(0)
    }
}

/// Keyset cursor for scanning a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Rows with `id` greater than the value, ordered by id.
    Id(i64),
    /// Rows after the watermark, ordered by `(updated_at, id)`.
    Modified(Watermark),
}

impl Cursor {
    /// Cursor positioned before the first row of the table.
    pub fn start() -> Self {
        Cursor::Id(i64::MIN)
    }

    /// Move the cursor past `entity`.
    pub fn advance<T: TableEntity>(self, entity: &T) -> Self {
        match self {
            Cursor::Id(_) => Cursor::Id(entity.id()),
            Cursor::Modified(_) => Cursor::Modified(Watermark {
                utime: entity.updated_at(),
                id: entity.id(),
            }),
        }
    }
}

/// Reader and writer for the `T` table on a single store.
pub struct Records<T> {
    store: Arc<dyn Store>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Records<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _entity: PhantomData,
        }
    }
}

impl<T: TableEntity> Records<T> {
    /// Bind the table to a store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn ident(&self, name: &str) -> String {
        self.store.dialect().quote_ident(name)
    }

    fn select_from(&self) -> String {
        format!(
            "SELECT {} FROM {}",
            self.store.dialect().column_list(T::COLUMNS),
            self.ident(T::TABLE)
        )
    }

    /// Fetch one row by id.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<T>> {
        let sql = format!("{} WHERE {} = ?", self.select_from(), self.ident(T::ID_COLUMN));
        match self.store.query_row(&sql, &[SqlValue::I64(id)]).await? {
            Some(row) => T::from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    /// Fetch up to `limit` rows after `cursor`, skipping the first `skip`.
    pub async fn page(&self, cursor: Cursor, skip: u64, limit: usize) -> Result<Vec<T>> {
        let id = self.ident(T::ID_COLUMN);
        let (filter, order, mut args) = match cursor {
            Cursor::Id(after) => (
                format!("{id} > ?"),
                id.clone(),
                vec![SqlValue::I64(after)],
            ),
            Cursor::Modified(mark) => {
                let utime = self.ident(T::UPDATED_AT_COLUMN);
                (
                    format!("({utime} > ? OR ({utime} = ? AND {id} > ?))"),
                    format!("{utime}, {id}"),
                    vec![
                        SqlValue::I64(mark.utime),
                        SqlValue::I64(mark.utime),
                        SqlValue::I64(mark.id),
                    ],
                )
            }
        };
        let sql = format!(
            "{} WHERE {filter} ORDER BY {order} LIMIT ? OFFSET ?",
            self.select_from()
        );
        args.push(SqlValue::I64(limit as i64));
        args.push(SqlValue::I64(skip as i64));

        self.store
            .query(&sql, &args)
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    /// Fetch the single next row after `cursor`.
    pub async fn next(&self, cursor: Cursor, skip: u64) -> Result<Option<T>> {
        Ok(self.page(cursor, skip, 1).await?.into_iter().next())
    }

    /// Page through primary keys only.
    pub async fn ids_after(&self, after: i64, skip: u64, limit: usize) -> Result<Vec<i64>> {
        let id = self.ident(T::ID_COLUMN);
        let sql = format!(
            "SELECT {id} FROM {} WHERE {id} > ? ORDER BY {id} LIMIT ? OFFSET ?",
            self.ident(T::TABLE)
        );
        let args = [
            SqlValue::I64(after),
            SqlValue::I64(limit as i64),
            SqlValue::I64(skip as i64),
        ];
        self.store
            .query(&sql, &args)
            .await?
            .iter()
            .map(|row| row.try_i64(T::ID_COLUMN))
            .collect()
    }

    /// Fetch every row whose id is in `ids`.
    pub async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{} WHERE {} IN ({})",
            self.select_from(),
            self.ident(T::ID_COLUMN),
            self.store.dialect().placeholders(ids.len())
        );
        let args: Vec<SqlValue> = ids.iter().copied().map(SqlValue::I64).collect();
        self.store
            .query(&sql, &args)
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    /// The subset of `ids` present in the table.
    pub async fn existing_ids(&self, ids: &[i64]) -> Result<HashSet<i64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let id = self.ident(T::ID_COLUMN);
        let sql = format!(
            "SELECT {id} FROM {} WHERE {id} IN ({})",
            self.ident(T::TABLE),
            self.store.dialect().placeholders(ids.len())
        );
        let args: Vec<SqlValue> = ids.iter().copied().map(SqlValue::I64).collect();
        self.store
            .query(&sql, &args)
            .await?
            .iter()
            .map(|row| row.try_i64(T::ID_COLUMN))
            .collect()
    }

    /// Insert the entity, overwriting every column if the id already exists.
    pub async fn upsert(&self, entity: &T) -> Result<u64> {
        let sql = self
            .store
            .dialect()
            .build_upsert_query(T::TABLE, T::COLUMNS, T::ID_COLUMN);
        let res = self.store.exec(&sql, &entity.values()).await?;
        Ok(res.rows_affected)
    }

    /// Delete by id. Deleting an absent row affects zero rows.
    pub async fn delete_by_id(&self, id: i64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.ident(T::TABLE),
            self.ident(T::ID_COLUMN)
        );
        let res = self.store.exec(&sql, &[SqlValue::I64(id)]).await?;
        Ok(res.rows_affected)
    }
}
