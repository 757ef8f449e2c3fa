/*!
Capability contracts every backend implements.

A backend provides one [`ProtectedEntityTypeManager`] which hands out
[`ProtectedEntity`] views. Views borrow their type manager for shared
configuration and sessions, so they never outlive it.
*/

use std::fmt;
use std::io::Read;

use crate::{
    Context, ProtectedEntityId, ProtectedEntityInfo, ProtectedEntitySnapshotId, Result,
};

/// Sequential, single-pass byte source for an entity stream. Dropping it
/// releases the underlying resource.
pub type EntityStream = Box<dyn Read + Send>;

/// How a type manager should place the object produced by a copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyCreateOptions {
    /// Create a new object with a backend-allocated id
    AllocateNewObject,
    /// Overwrite the object named by the source id
    UpdateExistingObject,
    /// Create a new object that reuses the source id
    AllocateObjectWithId,
}

impl fmt::Display for CopyCreateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AllocateNewObject => "AllocateNewObject",
            Self::UpdateExistingObject => "UpdateExistingObject",
            Self::AllocateObjectWithId => "AllocateObjectWithId",
        };
        f.write_str(name)
    }
}

/// One live, addressable backend resource: a base object or one snapshot of
/// it, decided by whether its id carries a snapshot component.
pub trait ProtectedEntity: Send + Sync {
    fn id(&self) -> &ProtectedEntityId;

    /// Current description of this entity.
    fn info(&self, ctx: &Context) -> Result<ProtectedEntityInfo>;

    /// Info for this entity followed by the info of each of its snapshots.
    fn combined_info(&self, ctx: &Context) -> Result<Vec<ProtectedEntityInfo>>;

    /// Take a point-in-time snapshot. Fails with `InvalidOperation` when this
    /// entity is already a snapshot.
    fn snapshot(&self, ctx: &Context) -> Result<ProtectedEntitySnapshotId>;

    /// Snapshots of a base entity. Fails with `InvalidOperation` on a snapshot.
    fn list_snapshots(&self, ctx: &Context) -> Result<Vec<ProtectedEntitySnapshotId>>;

    /// Remove one snapshot, returning whether anything was deleted.
    fn delete_snapshot(&self, ctx: &Context, snapshot_id: &ProtectedEntitySnapshotId)
        -> Result<bool>;

    fn info_for_snapshot(
        &self,
        ctx: &Context,
        snapshot_id: &ProtectedEntitySnapshotId,
    ) -> Result<ProtectedEntityInfo>;

    /// Child entities owned by this one, in a stable order. Empty for leaves.
    fn components<'a>(&'a self, ctx: &Context) -> Result<Vec<Box<dyn ProtectedEntity + 'a>>>;

    /// Primary data, or `None` when the entity has no data stream.
    fn data_reader(&self, ctx: &Context) -> Result<Option<EntityStream>>;

    /// Descriptive metadata, or `None` when the entity has none.
    fn metadata_reader(&self, ctx: &Context) -> Result<Option<EntityStream>>;
}

/// Factory and registry for every protected entity of one type tag.
pub trait ProtectedEntityTypeManager: Send + Sync {
    fn type_name(&self) -> &str;

    fn get_protected_entity<'a>(
        &'a self,
        ctx: &Context,
        id: &ProtectedEntityId,
    ) -> Result<Box<dyn ProtectedEntity + 'a>>;

    /// Every base entity of this type.
    fn get_protected_entities(&self, ctx: &Context) -> Result<Vec<ProtectedEntityId>>;

    /// Create an entity of this type from another entity's streams. Options
    /// the backend cannot honour fail with `UnsupportedOperation`.
    fn copy<'a>(
        &'a self,
        ctx: &Context,
        source: &dyn ProtectedEntity,
        options: CopyCreateOptions,
    ) -> Result<Box<dyn ProtectedEntity + 'a>>;

    /// Create an entity of this type from a description of another entity.
    fn copy_from_info<'a>(
        &'a self,
        ctx: &Context,
        info: &ProtectedEntityInfo,
        options: CopyCreateOptions,
    ) -> Result<Box<dyn ProtectedEntity + 'a>>;

    fn delete(&self, ctx: &Context, id: &ProtectedEntityId) -> Result<()>;
}
