//! Inconsistency events linking the validator to the repair consumer.
//!
//! An event names a record id, the side that is authoritative for its
//! repair ([`Direction`]) and what the validator saw ([`InconsistencyType`]).
//! Only the direction drives repair; the type is diagnostic.
//!
//! Events travel as JSON:
//!
//! ```json
//! {"ID":42,"Direction":"SRC","Type":"target_missing"}
//! ```

pub mod channel;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

pub use channel::{channel, ChannelConsumer, ChannelProducer, ConsumeStats, RetryPolicy};

/// The store treated as authoritative when repairing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Base (source) store wins.
    #[serde(rename = "SRC")]
    Src,
    /// Target (destination) store wins.
    #[serde(rename = "DST")]
    Dst,
}

impl Direction {
    /// Wire literal.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Src => "SRC",
            Direction::Dst => "DST",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SRC" => Ok(Direction::Src),
            "DST" => Ok(Direction::Dst),
            _ => Err(MigrateError::Config(format!(
                "direction must be 'SRC' or 'DST', got '{s}'"
            ))),
        }
    }
}

/// What the validator observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InconsistencyType {
    /// Base has the row, target does not.
    #[serde(rename = "target_missing")]
    TargetMissing,
    /// Target has the row, base does not.
    #[serde(rename = "base_missing")]
    BaseMissing,
    /// Both have the row but it differs.
    #[serde(rename = "neq")]
    NotEqual,
}

impl InconsistencyType {
    /// Wire literal.
    pub fn as_str(self) -> &'static str {
        match self {
            InconsistencyType::TargetMissing => "target_missing",
            InconsistencyType::BaseMissing => "base_missing",
            InconsistencyType::NotEqual => "neq",
        }
    }
}

impl fmt::Display for InconsistencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InconsistentEvent {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Direction")]
    pub direction: Direction,
    #[serde(rename = "Type")]
    pub kind: InconsistencyType,
}

impl InconsistentEvent {
    pub fn new(id: i64, direction: Direction, kind: InconsistencyType) -> Self {
        Self {
            id,
            direction,
            kind,
        }
    }

    /// Encode to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the JSON wire format.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Publishing side of the inconsistency channel.
///
/// Delivery must be at-least-once; ordering is not required.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce_inconsistent_event(&self, event: &InconsistentEvent) -> Result<()>;
}

/// Consuming side of the inconsistency channel.
///
/// An error asks the transport to redeliver the event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InconsistentEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let event = InconsistentEvent::new(42, Direction::Src, InconsistencyType::TargetMissing);
        let json = String::from_utf8(event.encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"ID":42,"Direction":"SRC","Type":"target_missing"}"#);
    }

    #[test]
    fn test_decode_neq() {
        let event =
            InconsistentEvent::decode(br#"{"ID":7,"Direction":"DST","Type":"neq"}"#).unwrap();
        assert_eq!(event.id, 7);
        assert_eq!(event.direction, Direction::Dst);
        assert_eq!(event.kind, InconsistencyType::NotEqual);
    }

    #[test]
    fn test_decode_rejects_unknown_direction() {
        let err = InconsistentEvent::decode(br#"{"ID":7,"Direction":"BOTH","Type":"neq"}"#)
            .unwrap_err();
        assert!(matches!(err, MigrateError::Json(_)));
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("src".parse::<Direction>().unwrap(), Direction::Src);
        assert_eq!("DST".parse::<Direction>().unwrap(), Direction::Dst);
        assert!("left".parse::<Direction>().is_err());
    }
}
