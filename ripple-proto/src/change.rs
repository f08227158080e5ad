//! Change announcements published on the `changes` exchange

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::validation::{ValidationError, Validator};

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
    /// The path was renamed away. The new name arrives as its own create.
    Move,
}

impl ChangeKind {
    /// Create and modify carry content that peers pull.
    pub fn carries_content(self) -> bool {
        matches!(self, ChangeKind::Create | ChangeKind::Modify)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Create => "create",
            ChangeKind::Modify => "modify",
            ChangeKind::Delete => "delete",
            ChangeKind::Move => "move",
        };
        f.write_str(name)
    }
}

/// One filesystem mutation observed by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Originating node identity
    pub source: String,
    /// Path relative to the sync root, `/`-separated
    pub path: String,
    /// When the originating node observed the change
    pub mod_date: DateTime<Utc>,
    pub kind: ChangeKind,
    /// Hex content digest; empty for delete and move
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

impl Change {
    pub fn new(
        source: impl Into<String>,
        path: impl Into<String>,
        kind: ChangeKind,
        checksum: impl Into<String>,
    ) -> Self {
        let checksum = if kind.carries_content() {
            checksum.into()
        } else {
            String::new()
        };

        Self {
            source: source.into(),
            path: path.into(),
            mod_date: Utc::now(),
            kind,
            checksum,
        }
    }

    /// Check the structural invariants a peer relies on
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        Validator::validate_node_id(&self.source)?;
        Validator::validate_path(&self.path)?;

        if self.kind.carries_content() {
            Validator::validate_hash(&self.checksum)?;
        } else if !self.checksum.is_empty() {
            return Err(ValidationError::InvalidHash {
                reason: format!("{} change must not carry a checksum", self.kind),
            });
        }

        Ok(())
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize and validate a record received from the broker
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let change: Change = serde_json::from_slice(bytes)?;
        change.validate()?;
        Ok(change)
    }
}
