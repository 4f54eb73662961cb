//! Record lifecycle state.
//!
//! A stored record is Active until it is marked unused, may be restored
//! while Unused, and is physically removed once its unused-since timestamp
//! falls behind a collection deadline. Deleted is terminal.
//!
//! The backing table persists this as a nullable `unused_since` column; the
//! tagged enum here is the in-memory view.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle state of a stored binary record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RecordState {
    /// Referenced content.
    Active {
        #[serde(with = "time::serde::rfc3339")]
        created_at: OffsetDateTime,
    },
    /// Unreferenced content awaiting collection.
    Unused {
        #[serde(with = "time::serde::rfc3339")]
        created_at: OffsetDateTime,
        #[serde(with = "time::serde::rfc3339")]
        unused_since: OffsetDateTime,
    },
    /// Physically removed.
    Deleted,
}

impl RecordState {
    /// Build the state from persisted columns (epoch milliseconds).
    ///
    /// `None` means no row exists.
    pub fn from_columns(row: Option<(i64, Option<i64>)>) -> crate::Result<Self> {
        match row {
            None => Ok(Self::Deleted),
            Some((created, None)) => Ok(Self::Active {
                created_at: from_epoch_millis(created)?,
            }),
            Some((created, Some(unused))) => Ok(Self::Unused {
                created_at: from_epoch_millis(created)?,
                unused_since: from_epoch_millis(unused)?,
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_unused(&self) -> bool {
        matches!(self, Self::Unused { .. })
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Active -> Unused. Returns `None` from any other state.
    pub fn mark_unused(self, at: OffsetDateTime) -> Option<Self> {
        match self {
            Self::Active { created_at } => Some(Self::Unused {
                created_at,
                unused_since: at,
            }),
            _ => None,
        }
    }

    /// Unused -> Active. Returns `None` from any other state.
    pub fn restore(self) -> Option<Self> {
        match self {
            Self::Unused { created_at, .. } => Some(Self::Active { created_at }),
            _ => None,
        }
    }

    /// Whether a collection run with this deadline removes the record.
    pub fn is_expired(&self, deadline: OffsetDateTime) -> bool {
        match self {
            Self::Unused { unused_since, .. } => *unused_since < deadline,
            _ => false,
        }
    }

    /// Unused -> Deleted when expired. Returns `None` otherwise.
    pub fn expire(self, deadline: OffsetDateTime) -> Option<Self> {
        self.is_expired(deadline).then_some(Self::Deleted)
    }
}

/// Convert a timestamp to the persisted epoch-millisecond form.
pub fn to_epoch_millis(ts: OffsetDateTime) -> i64 {
    let millis = ts.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(if millis < 0 { i64::MIN } else { i64::MAX })
}

/// Convert a persisted epoch-millisecond value back to a timestamp.
pub fn from_epoch_millis(millis: i64) -> crate::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|e| crate::Error::InvalidTimestamp(format!("{millis}: {e}")))
}
