//! # live-migrate
//!
//! Consistency machinery for moving a live table from one relational store
//! to another without downtime.
//!
//! - **Dual writes**: [`DualWritePool`] stands in for the application's
//!   store and mirrors every write according to a runtime-switchable
//!   [`Pattern`]
//! - **Validation**: [`Validator`] scans both stores concurrently, in full or
//!   incremental mode, and publishes an [`InconsistentEvent`] per divergent id
//! - **Repair**: [`RepairConsumer`] makes the non-authoritative side match
//!   the authoritative one, idempotently
//! - **Resume**: [`ValidationState`] persists the incremental watermark
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use live_migrate::{
//!     channel, drivers, Config, RepairConsumer, Validator, ValidatorConfig,
//! };
//! # use live_migrate::{Entity, Row, SqlValue, TableEntity};
//! # struct Interactive { id: i64, utime: i64 }
//! # impl Entity for Interactive {
//! #     fn id(&self) -> i64 { self.id }
//! #     fn compare_to(&self, _: &Self) -> bool { true }
//! # }
//! # impl TableEntity for Interactive {
//! #     const TABLE: &'static str = "interactives";
//! #     const COLUMNS: &'static [&'static str] = &["id", "utime"];
//! #     fn from_row(row: &Row) -> live_migrate::Result<Self> {
//! #         Ok(Self { id: row.try_i64("id")?, utime: row.try_i64("utime")? })
//! #     }
//! #     fn values(&self) -> Vec<SqlValue> { vec![self.id.into(), self.utime.into()] }
//! #     fn updated_at(&self) -> i64 { self.utime }
//! # }
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> live_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let base = drivers::connect(&config.base).await?;
//!     let target = drivers::connect(&config.target).await?;
//!
//!     let (producer, consumer) = channel(1024);
//!     let validator = Validator::<Interactive>::new(
//!         base.clone(),
//!         target.clone(),
//!         Arc::new(producer),
//!         ValidatorConfig::new(config.validator.direction),
//!     );
//!     let repair = RepairConsumer::<Interactive>::new(base, target);
//!
//!     let cancel = CancellationToken::new();
//!     let scan = {
//!         let cancel = cancel.clone();
//!         async move { validator.validate(&cancel).await }
//!     };
//!     let (stats, _) = tokio::join!(scan, consumer.run(&repair, &cancel));
//!     println!("{} inconsistencies repaired", stats?.inconsistencies());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod events;
pub mod fixer;
pub mod pool;
pub mod state;
pub mod validator;

#[cfg(test)]
mod testutil;

// Re-exports for convenient access
pub use crate::core::{
    Cursor, Dialect, Entity, ExecResult, Prepared, Records, Row, SqlValue, Store, TableEntity,
    Transaction, Watermark,
};
pub use config::{Config, PoolConfig, RepairConfig, StoreConfig, ValidatorSection};
pub use error::{MigrateError, Result};
pub use events::{
    channel, ChannelConsumer, ChannelProducer, ConsumeStats, Direction, EventHandler,
    InconsistencyType, InconsistentEvent, Producer, RetryPolicy,
};
pub use fixer::{FixOutcome, OverrideFixer, RepairConsumer};
pub use pool::{DualWritePool, DualWriteTx, Pattern};
pub use state::{RunStatus, ValidationState};
pub use validator::{Mode, Strategy, ValidateStats, Validator, ValidatorConfig};
