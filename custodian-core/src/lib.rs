/*!
# Custodian Core

Backend-agnostic model for backing up "protected entities": any resource
(a directory, a volume, a database, a cluster namespace) that can be
snapshotted, described, serialized and copied.

This crate provides:

- Identifiers of the form `type:id[:snapshot]`
- Capability traits every backend implements ([`ProtectedEntity`],
  [`ProtectedEntityTypeManager`]) and a registry dispatching on the type tag
  ([`ProtectedEntityManager`])
- Data transports describing where an entity's streams can be fetched
- A recursive archive serializer producing one self-similar ZIP per entity
- A streaming copy engine with a bounded producer/consumer conduit
- A filesystem reference backend (feature `fs`) and an AWS SDK presigner
  (feature `s3`)

## Usage

```rust,no_run
use custodian_core::{
    Context, CopyDestination, CopyEngine, CopySource, ManagerConfig, ProtectedEntityManager,
};

let config = ManagerConfig::from_dir("/etc/custodian")?;
let manager = ProtectedEntityManager::from_config(&config)?;
let ctx = Context::new();

let report = CopyEngine::new(&manager).copy(
    &ctx,
    &CopySource::parse("fs:projects"),
    &CopyDestination::parse("/backups/projects.zip"),
)?;
println!("copied {} bytes", report.bytes_copied);
# Ok::<(), custodian_core::CustodianError>(())
```
*/

pub mod archive;
pub mod conduit;
pub mod config;
pub mod context;
pub mod copy;
pub mod data_transport;
pub mod entity;
pub mod error;
pub mod id;
pub mod info;
pub mod manager;
pub mod observability;

#[cfg(feature = "fs")]
pub mod fs;

#[cfg(feature = "s3")]
pub mod s3;

pub use archive::write_archive;
pub use config::{FsConfig, ManagerConfig, S3Config};
pub use context::Context;
pub use copy::{stream_copy, CopyDestination, CopyEngine, CopyReport, CopySource};
pub use data_transport::{DataTransport, Presigner, S3TransportFactory};
pub use entity::{CopyCreateOptions, EntityStream, ProtectedEntity, ProtectedEntityTypeManager};
pub use error::{CustodianError, Result};
pub use id::{ProtectedEntityId, ProtectedEntitySnapshotId};
pub use info::{ProtectedEntityInfo, UNKNOWN_SIZE};
pub use manager::{ProtectedEntityManager, ProtectedEntityManagerBuilder};

#[cfg(feature = "s3")]
pub use s3::S3Presigner;
