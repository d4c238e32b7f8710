//! SQL syntax strategy for the supported engines.
//!
//! Both engines accept `?` placeholders; they differ in identifier quoting
//! and in the upsert statement.

use serde::{Deserialize, Serialize};

/// SQL dialect of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Mysql,
    Sqlite,
}

impl Dialect {
    /// Get the dialect identifier.
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Quote an identifier (table name, column name, etc.).
    ///
    /// - MySQL: `` `identifier` ``
    /// - SQLite: `"identifier"`
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Comma separated list of `n` placeholders.
    pub fn placeholders(self, n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    /// Quoted, comma separated column list.
    pub fn column_list(self, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build an insert-or-update statement keyed on `pk`.
    ///
    /// Every non-key column is overwritten on conflict.
    pub fn build_upsert_query(self, table: &str, columns: &[&str], pk: &str) -> String {
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_ident(table),
            self.column_list(columns),
            self.placeholders(columns.len())
        );
        let updates: Vec<&&str> = columns.iter().filter(|c| **c != pk).collect();

        match self {
            Dialect::Mysql => {
                if updates.is_empty() {
                    let pk = self.quote_ident(pk);
                    return format!("{insert} ON DUPLICATE KEY UPDATE {pk} = {pk}");
                }
                // Row alias form, MySQL 8.0.19 or later.
                let set: Vec<String> = updates
                    .iter()
                    .map(|c| {
                        let c = self.quote_ident(c);
                        format!("{c} = new.{c}")
                    })
                    .collect();
                format!("{insert} AS new ON DUPLICATE KEY UPDATE {}", set.join(", "))
            }
            Dialect::Sqlite => {
                let pk = self.quote_ident(pk);
                if updates.is_empty() {
                    return format!("{insert} ON CONFLICT({pk}) DO NOTHING");
                }
                let set: Vec<String> = updates
                    .iter()
                    .map(|c| {
                        let c = self.quote_ident(c);
                        format!("{c} = excluded.{c}")
                    })
                    .collect();
                format!("{insert} ON CONFLICT({pk}) DO UPDATE SET {}", set.join(", "))
            }
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
