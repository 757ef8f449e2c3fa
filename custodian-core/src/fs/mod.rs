/*!
Filesystem backend.

Every non-hidden entry directly under the configured root is one protected
entity of type `fs`. A regular file streams its bytes as data; a directory
streams a tar archive of its contents. Snapshots are materialized copies of
both streams kept under the snapshots directory:

```text
<snapshots-dir>/<entity-id>/<snapshot-id>.fs-snap-data
<snapshots-dir>/<entity-id>/<snapshot-id>.fs-snap-md
```
*/

mod entity;
mod type_manager;

pub use entity::{FsEntryKind, FsMetadata, FsProtectedEntity};
pub use type_manager::FsTypeManager;

use crate::data_transport::object_location;
use crate::{DataTransport, ProtectedEntityId, Result, S3TransportFactory};

/// Type tag of filesystem entities.
pub const TYPE_NAME: &str = "fs";

/// Suffix of a snapshot's data file.
pub const SNAPSHOT_DATA_EXT: &str = ".fs-snap-data";

/// Suffix of a snapshot's metadata file.
pub const SNAPSHOT_MD_EXT: &str = ".fs-snap-md";

/// How filesystem entities advertise where their streams can be fetched.
#[derive(Debug, Clone, Default)]
pub enum TransportSource {
    /// No remote location is advertised.
    #[default]
    None,
    /// Plain object-storage URLs under a fixed base.
    UrlBase(String),
    /// Presigned object-storage URLs.
    Presigned(S3TransportFactory),
}

impl TransportSource {
    pub(crate) fn transports(&self, id: &ProtectedEntityId, ext: &str) -> Result<Vec<DataTransport>> {
        match self {
            Self::None => Ok(Vec::new()),
            Self::UrlBase(base) => {
                let (bucket, key) = object_location(id, ext);
                let url = format!("{}/{bucket}/{key}", base.trim_end_matches('/'));
                Ok(vec![DataTransport::s3_url(url)])
            }
            Self::Presigned(factory) => Ok(vec![factory.transport_for(id, ext)?]),
        }
    }
}
