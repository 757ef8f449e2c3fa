/*!
Data transports describe how the data, metadata or combined stream of a
protected entity can be fetched. They carry parameters only and never move
bytes themselves.
*/

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::S3Config;
use crate::{CustodianError, ProtectedEntityId, Result};

/// Transport type tag for object-storage transports.
pub const S3_TRANSPORT_TYPE: &str = "s3";
pub const S3_URL_PARAM: &str = "url";
pub const S3_HOST_PARAM: &str = "host";
pub const S3_BUCKET_PARAM: &str = "bucket";
pub const S3_KEY_PARAM: &str = "key";

/// Object key suffixes for the four transport flavours.
pub const DATA_EXT: &str = "";
pub const METADATA_EXT: &str = ".md";
pub const COMBINED_EXT: &str = ".zip";
pub const PE_INFO_EXT: &str = ".peinfo";

/// Validity of presigned retrieval URLs.
pub const PRESIGN_VALIDITY: Duration = Duration::from_secs(15 * 60);

/// An access method for one stream of one entity.
///
/// The wire form is a JSON object with exactly `transportType` and `params`;
/// parameter keys the core does not know about are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransport {
    transport_type: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

impl DataTransport {
    pub fn new<S: Into<String>>(transport_type: S, params: BTreeMap<String, String>) -> Self {
        Self {
            transport_type: transport_type.into(),
            params,
        }
    }

    /// Object-storage transport addressed by a single URL.
    pub fn s3_url<S: Into<String>>(url: S) -> Self {
        let mut params = BTreeMap::new();
        params.insert(S3_URL_PARAM.to_string(), url.into());
        Self::new(S3_TRANSPORT_TYPE, params)
    }

    /// Object-storage transport addressed by host, bucket and key.
    pub fn s3_object(host: &str, bucket: &str, key: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert(
            S3_URL_PARAM.to_string(),
            format!("http://{host}/{bucket}/{key}"),
        );
        params.insert(S3_HOST_PARAM.to_string(), host.to_string());
        params.insert(S3_BUCKET_PARAM.to_string(), bucket.to_string());
        params.insert(S3_KEY_PARAM.to_string(), key.to_string());
        Self::new(S3_TRANSPORT_TYPE, params)
    }

    pub fn transport_type(&self) -> &str {
        &self.transport_type
    }

    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

/// Issues time-limited retrieval URLs for objects in a bucket.
#[cfg_attr(test, mockall::automock)]
pub trait Presigner: Send + Sync {
    fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String>;
}

/// Bucket and object key for one transport flavour of an entity: the bucket
/// is the entity type and the key is the canonical id plus the extension.
pub fn object_location(id: &ProtectedEntityId, ext: &str) -> (String, String) {
    (id.pe_type().to_string(), format!("{id}{ext}"))
}

/// Builds presigned object-storage transports for protected entities.
#[derive(Clone)]
pub struct S3TransportFactory {
    config: S3Config,
    presigner: Arc<dyn Presigner>,
}

impl S3TransportFactory {
    pub fn new(config: S3Config, presigner: Arc<dyn Presigner>) -> Self {
        Self { config, presigner }
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    pub fn data_transport(&self, id: &ProtectedEntityId) -> Result<DataTransport> {
        self.transport_for(id, DATA_EXT)
    }

    pub fn metadata_transport(&self, id: &ProtectedEntityId) -> Result<DataTransport> {
        self.transport_for(id, METADATA_EXT)
    }

    pub fn combined_transport(&self, id: &ProtectedEntityId) -> Result<DataTransport> {
        self.transport_for(id, COMBINED_EXT)
    }

    pub fn pe_info_transport(&self, id: &ProtectedEntityId) -> Result<DataTransport> {
        self.transport_for(id, PE_INFO_EXT)
    }

    /// Presign a retrieval URL for `id` with the given extension.
    ///
    /// # Errors
    /// `TransportConstruction` naming the entity if presigning fails.
    pub fn transport_for(&self, id: &ProtectedEntityId, ext: &str) -> Result<DataTransport> {
        let (bucket, key) = object_location(id, ext);
        let url = self
            .presigner
            .presign_get(&bucket, &key, PRESIGN_VALIDITY)
            .map_err(|e| CustodianError::TransportConstruction {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        debug!(id = %id, bucket = %bucket, key = %key, "Presigned object-storage transport");
        Ok(DataTransport::s3_url(url))
    }
}

impl std::fmt::Debug for S3TransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3TransportFactory")
            .field("endpoint", &self.config.endpoint_url())
            .finish()
    }
}
