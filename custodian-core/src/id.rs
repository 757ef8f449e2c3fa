/*!
Protected entity identifiers.

The canonical string form is `type:id` or `type:id:snapshot`. Segments are
ASCII-colon delimited, so none of them may contain a colon themselves.
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CustodianError, Result};

const SEPARATOR: char = ':';

/// Backend-opaque snapshot identifier.
///
/// Kept as its own type so it can never be passed where a base entity id is
/// expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectedEntitySnapshotId(String);

impl ProtectedEntitySnapshotId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtectedEntitySnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies an addressable protected entity, optionally qualified by one of
/// its snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtectedEntityId {
    pe_type: String,
    id: String,
    snapshot_id: Option<ProtectedEntitySnapshotId>,
}

impl ProtectedEntityId {
    /// Create a base (non-snapshot) identifier.
    ///
    /// # Errors
    /// `MalformedIdentifier` if either segment is empty or contains
    /// the separator, since such an id could not round-trip through its string
    /// form.
    pub fn new<S1, S2>(pe_type: S1, id: S2) -> Result<Self>
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        let pe_type = pe_type.into();
        let id = id.into();
        if pe_type.is_empty() {
            return Err(CustodianError::malformed(
                format!("{pe_type}{SEPARATOR}{id}"),
                "type segment is empty",
            ));
        }
        if id.is_empty() {
            return Err(CustodianError::malformed(
                format!("{pe_type}{SEPARATOR}"),
                "id segment is empty",
            ));
        }
        check_segment(&pe_type, "type")?;
        check_segment(&id, "id")?;
        Ok(Self {
            pe_type,
            id,
            snapshot_id: None,
        })
    }

    /// Returns a new identifier naming `snapshot_id` of this entity.
    ///
    /// # Errors
    /// `InvalidOperation` if this identifier already names a snapshot,
    /// `MalformedIdentifier` if the snapshot id is empty or contains a colon.
    pub fn with_snapshot(&self, snapshot_id: ProtectedEntitySnapshotId) -> Result<Self> {
        if self.has_snapshot() {
            return Err(CustodianError::invalid_operation(format!(
                "{self} already names a snapshot"
            )));
        }
        if snapshot_id.as_str().is_empty() {
            return Err(CustodianError::malformed(
                format!("{self}{SEPARATOR}"),
                "snapshot segment is empty",
            ));
        }
        check_segment(snapshot_id.as_str(), "snapshot")?;
        Ok(Self {
            pe_type: self.pe_type.clone(),
            id: self.id.clone(),
            snapshot_id: Some(snapshot_id),
        })
    }

    /// The owning base entity's identifier. Idempotent.
    pub fn base_id(&self) -> Self {
        Self {
            pe_type: self.pe_type.clone(),
            id: self.id.clone(),
            snapshot_id: None,
        }
    }

    pub fn pe_type(&self) -> &str {
        &self.pe_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot_id.is_some()
    }

    pub fn snapshot_id(&self) -> Option<&ProtectedEntitySnapshotId> {
        self.snapshot_id.as_ref()
    }
}

fn check_segment(segment: &str, name: &str) -> Result<()> {
    if segment.contains(SEPARATOR) {
        return Err(CustodianError::malformed(
            segment,
            format!("{name} segment may not contain '{SEPARATOR}'"),
        ));
    }
    Ok(())
}

impl fmt::Display for ProtectedEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.pe_type, self.id)?;
        if let Some(snapshot_id) = &self.snapshot_id {
            write!(f, "{SEPARATOR}{snapshot_id}")?;
        }
        Ok(())
    }
}

impl FromStr for ProtectedEntityId {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split(SEPARATOR).collect();
        match segments.as_slice() {
            [pe_type, id] | [pe_type, id, _] if pe_type.is_empty() || id.is_empty() => Err(
                CustodianError::malformed(s, "type and id segments must be non-empty"),
            ),
            [pe_type, id] => Self::new(*pe_type, *id),
            [pe_type, id, snapshot] => {
                if snapshot.is_empty() {
                    return Err(CustodianError::malformed(s, "snapshot segment is empty"));
                }
                Self::new(*pe_type, *id)?.with_snapshot(ProtectedEntitySnapshotId::new(*snapshot))
            }
            _ => Err(CustodianError::malformed(
                s,
                format!(
                    "expected 2 or 3 '{SEPARATOR}'-delimited segments, found {}",
                    segments.len()
                ),
            )),
        }
    }
}

impl TryFrom<String> for ProtectedEntityId {
    type Error = CustodianError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ProtectedEntityId> for String {
    fn from(value: ProtectedEntityId) -> Self {
        value.to_string()
    }
}
