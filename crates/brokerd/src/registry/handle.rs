//! Handle identifiers and kinds.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier naming a server-side object across calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(String);

impl HandleId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrowed string form sent to clients.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<String> for HandleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HandleId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Category of object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    /// Database connection.
    Connection,
    /// Prepared statement bound to a connection.
    Statement,
    /// Cipher context.
    Cipher,
    /// Lock file manager.
    LockManager,
    /// Held lock file.
    Lock,
    /// Spreadsheet workbook.
    Workbook,
    /// Remote session such as SFTP.
    Session,
}

impl HandleKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Connection,
        Self::Statement,
        Self::Cipher,
        Self::LockManager,
        Self::Lock,
        Self::Workbook,
        Self::Session,
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Statement => "statement",
            Self::Cipher => "cipher",
            Self::LockManager => "lock_manager",
            Self::Lock => "lock",
            Self::Workbook => "workbook",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
