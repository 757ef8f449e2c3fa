/*!
Descriptive metadata for a protected entity at a point in time.
*/

use serde::{Deserialize, Serialize};

use crate::{DataTransport, ProtectedEntityId};

/// Size value used when a backend cannot tell how large an entity is.
pub const UNKNOWN_SIZE: i64 = -1;

/// Immutable description of one protected entity.
///
/// This is the payload of the `.peinfo` archive entry, so the field names on
/// the wire are part of the archive format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedEntityInfo {
    id: ProtectedEntityId,
    name: String,
    size: i64,
    data_transports: Vec<DataTransport>,
    metadata_transports: Vec<DataTransport>,
    combined_transports: Vec<DataTransport>,
    component_ids: Vec<ProtectedEntityId>,
}

impl ProtectedEntityInfo {
    pub fn new<S: Into<String>>(
        id: ProtectedEntityId,
        name: S,
        size: i64,
        data_transports: Vec<DataTransport>,
        metadata_transports: Vec<DataTransport>,
        combined_transports: Vec<DataTransport>,
        component_ids: Vec<ProtectedEntityId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            data_transports,
            metadata_transports,
            combined_transports,
            component_ids,
        }
    }

    pub fn id(&self) -> &ProtectedEntityId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared size in bytes, [`UNKNOWN_SIZE`] if unbounded or unknown.
    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn data_transports(&self) -> &[DataTransport] {
        &self.data_transports
    }

    pub fn metadata_transports(&self) -> &[DataTransport] {
        &self.metadata_transports
    }

    pub fn combined_transports(&self) -> &[DataTransport] {
        &self.combined_transports
    }

    pub fn component_ids(&self) -> &[ProtectedEntityId] {
        &self.component_ids
    }
}
