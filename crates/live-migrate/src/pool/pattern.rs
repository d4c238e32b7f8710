//! Migration phases and the lock-free cell holding the active one.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Which store serves reads and which store(s) receive writes.
///
/// Phases advance `SrcOnly -> SrcFirst -> DstFirst -> DstOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Pattern {
    /// Base only.
    #[default]
    SrcOnly = 0,
    /// Base authoritative, writes mirrored to target.
    SrcFirst = 1,
    /// Target authoritative, writes mirrored to base.
    DstFirst = 2,
    /// Target only.
    DstOnly = 3,
}

/// The two physical stores behind the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Src,
    Dst,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Src => "src",
            Side::Dst => "dst",
        }
    }
}

impl Pattern {
    pub const ALL: [Pattern; 4] = [
        Pattern::SrcOnly,
        Pattern::SrcFirst,
        Pattern::DstFirst,
        Pattern::DstOnly,
    ];

    /// Literal form used by the admin surface.
    pub fn as_str(self) -> &'static str {
        match self {
            Pattern::SrcOnly => "src_only",
            Pattern::SrcFirst => "src_first",
            Pattern::DstFirst => "dst_first",
            Pattern::DstOnly => "dst_only",
        }
    }

    /// The authoritative store: every read and the caller-visible write.
    pub fn primary(self) -> Side {
        match self {
            Pattern::SrcOnly | Pattern::SrcFirst => Side::Src,
            Pattern::DstFirst | Pattern::DstOnly => Side::Dst,
        }
    }

    /// The store receiving best-effort mirrored writes, if any.
    pub fn secondary(self) -> Option<Side> {
        match self {
            Pattern::SrcFirst => Some(Side::Dst),
            Pattern::DstFirst => Some(Side::Src),
            Pattern::SrcOnly | Pattern::DstOnly => None,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(usize::from(v)).copied()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pattern {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| MigrateError::UnknownPattern(s.to_string()))
    }
}

/// Process state holding the active [`Pattern`].
///
/// Reads and writes are single atomic operations; the write path never
/// waits on a lock.
#[derive(Debug)]
pub struct AtomicPattern(AtomicU8);

impl AtomicPattern {
    pub fn new(pattern: Pattern) -> Self {
        Self(AtomicU8::new(pattern as u8))
    }

    pub fn load(&self) -> Pattern {
        let raw = self.0.load(Ordering::Acquire);
        match Pattern::from_u8(raw) {
            Some(p) => p,
            None => unreachable!("AtomicPattern only stores valid patterns, found {raw}"),
        }
    }

    /// Install `pattern`, returning the previous one.
    pub fn swap(&self, pattern: Pattern) -> Pattern {
        let raw = self.0.swap(pattern as u8, Ordering::AcqRel);
        match Pattern::from_u8(raw) {
            Some(p) => p,
            None => unreachable!("AtomicPattern only stores valid patterns, found {raw}"),
        }
    }
}

impl Default for AtomicPattern {
    fn default() -> Self {
        Self::new(Pattern::default())
    }
}
