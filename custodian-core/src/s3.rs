/*!
AWS SDK backed presigner for object-storage transports.

Presigning is a local signing step, but the SDK only exposes it as an async
API, so the presigner owns a small Tokio runtime and blocks on it. Do not
call it from inside another Tokio runtime.
*/

use std::sync::Arc;
use std::time::Duration;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::config::S3Config;
use crate::data_transport::Presigner;
use crate::{CustodianError, Result};

/// Presigns `GET` requests against an S3-compatible endpoint
///
/// Uses the static credentials from [`S3Config`] when both the access key and
/// secret are set, otherwise the standard AWS credential provider chain
/// (environment, profile, instance role).
#[derive(Debug)]
pub struct S3Presigner {
    client: S3Client,
    runtime: Arc<Runtime>,
}

impl S3Presigner {
    /// Build a presigner for the endpoint described by `config`
    ///
    /// # Errors
    /// `Config` if the configuration is invalid, `Backend` if the runtime
    /// cannot be created
    pub fn new(config: &S3Config) -> Result<Self> {
        config.validate()?;
        let runtime = Runtime::new().map_err(|e| {
            CustodianError::backend(format!("Failed to create async runtime for S3 presigner: {e}"))
        })?;

        let region = Region::new(config.region.clone());
        let endpoint = config.endpoint_url();

        let s3_config = if config.has_static_credentials() {
            let credentials = Credentials::new(
                config.access_key.clone(),
                config.secret.clone(),
                None,
                None,
                "custodian-static",
            );
            aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(credentials)
                .endpoint_url(endpoint.clone())
                .force_path_style(true)
                .build()
        } else {
            let sdk_config = runtime.block_on(async {
                aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await
            });
            aws_sdk_s3::config::Builder::from(&sdk_config)
                .endpoint_url(endpoint.clone())
                .force_path_style(true)
                .build()
        };

        info!(
            endpoint = %endpoint,
            static_credentials = config.has_static_credentials(),
            "Initialized S3 presigner"
        );

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            runtime: Arc::new(runtime),
        })
    }
}

impl Presigner for S3Presigner {
    fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| {
            CustodianError::backend(format!("Invalid presign validity {expires_in:?}: {e}"))
        })?;

        let request = self
            .runtime
            .block_on(async {
                self.client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .presigned(presigning)
                    .await
            })
            .map_err(|e| {
                CustodianError::backend(format!("Failed to presign s3://{bucket}/{key}: {e}"))
            })?;

        debug!(bucket = %bucket, key = %key, "Presigned GET request");
        Ok(request.uri().to_string())
    }
}
