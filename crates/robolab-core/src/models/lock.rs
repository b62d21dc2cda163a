//! Lease lock models

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-scoped identity of a lock holder.
///
/// Generated once per coordinator from a UUID v7, which combines the current
/// wall-clock time with random bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId(String);

impl HolderId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HolderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the remote lock table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Locked resource name (unique)
    pub name: String,
    /// Holder that owns the lease
    pub holder_id: String,
    /// Absolute lease expiry (Unix ms)
    pub expires_at: i64,
}

impl LockRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, holder_id: impl Into<String>, expires_at: i64) -> Self {
        Self {
            name: name.into(),
            holder_id: holder_id.into(),
            expires_at,
        }
    }

    /// A record is live while its expiry is strictly in the future.
    #[must_use]
    pub const fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }
}

/// Answer to "is this resource held by someone else?"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockStatus {
    pub locked: bool,
    /// The other holder, when known
    pub holder_id: Option<String>,
}

impl LockStatus {
    #[must_use]
    pub const fn unlocked() -> Self {
        Self {
            locked: false,
            holder_id: None,
        }
    }

    #[must_use]
    pub const fn held_by(holder_id: String) -> Self {
        Self {
            locked: true,
            holder_id: Some(holder_id),
        }
    }
}
