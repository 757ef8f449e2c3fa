/*!
Top-level registry dispatching protected entity lookups to the type manager
named by the identifier's type tag.
*/

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::{
    Context, CustodianError, ProtectedEntity, ProtectedEntityId, ProtectedEntityTypeManager,
    Result,
};

/// Maps each type tag to exactly one type manager.
///
/// The mapping is fixed once built, so lookups need no locking.
pub struct ProtectedEntityManager {
    type_managers: BTreeMap<String, Box<dyn ProtectedEntityTypeManager>>,
}

impl ProtectedEntityManager {
    pub fn builder() -> ProtectedEntityManagerBuilder {
        ProtectedEntityManagerBuilder::default()
    }

    /// Build a manager with every backend the configuration names.
    ///
    /// Types this build has no backend for are skipped with a warning.
    pub fn from_config(config: &ManagerConfig) -> Result<Self> {
        let mut builder = Self::builder();
        for type_name in config.type_params.keys() {
            match type_name.as_str() {
                #[cfg(feature = "fs")]
                crate::fs::TYPE_NAME => {
                    let fs_config: crate::config::FsConfig = config
                        .params_for(type_name)?
                        .ok_or_else(|| CustodianError::config("missing fs parameters"))?;
                    let transports = transports_from_config(config)?;
                    builder = builder.register(Box::new(
                        crate::fs::FsTypeManager::new(fs_config, transports)?,
                    ))?;
                }
                other => warn!(type_name = %other, "No backend available for configured type, skipping"),
            }
        }
        Ok(builder.build())
    }

    pub fn get_type_manager(&self, type_name: &str) -> Option<&dyn ProtectedEntityTypeManager> {
        self.type_managers.get(type_name).map(|tm| tm.as_ref())
    }

    /// Registered type managers, ordered by type name.
    pub fn list_entity_type_managers(&self) -> Vec<&dyn ProtectedEntityTypeManager> {
        self.type_managers.values().map(|tm| tm.as_ref()).collect()
    }

    /// Resolve `id` through the type manager named by its type tag.
    ///
    /// # Errors
    /// `UnknownEntityType` when no manager is registered for the tag, plus
    /// whatever the type manager reports (typically `EntityNotFound`).
    pub fn get_protected_entity<'a>(
        &'a self,
        ctx: &Context,
        id: &ProtectedEntityId,
    ) -> Result<Box<dyn ProtectedEntity + 'a>> {
        ctx.check()?;
        let type_manager = self
            .get_type_manager(id.pe_type())
            .ok_or_else(|| CustodianError::UnknownEntityType(id.pe_type().to_string()))?;
        debug!(id = %id, "Dispatching protected entity lookup");
        type_manager.get_protected_entity(ctx, id)
    }
}

impl std::fmt::Debug for ProtectedEntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedEntityManager")
            .field("types", &self.type_managers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Collects type managers before the registry is frozen.
#[derive(Default)]
pub struct ProtectedEntityManagerBuilder {
    type_managers: BTreeMap<String, Box<dyn ProtectedEntityTypeManager>>,
}

impl ProtectedEntityManagerBuilder {
    /// Register a type manager under its own type name.
    ///
    /// # Errors
    /// `Config` if a manager for the same type is already registered.
    pub fn register(mut self, type_manager: Box<dyn ProtectedEntityTypeManager>) -> Result<Self> {
        let type_name = type_manager.type_name().to_string();
        if self.type_managers.contains_key(&type_name) {
            return Err(CustodianError::config(format!(
                "type manager for {type_name} registered twice"
            )));
        }
        info!(type_name = %type_name, "Registered protected entity type manager");
        self.type_managers.insert(type_name, type_manager);
        Ok(self)
    }

    pub fn build(self) -> ProtectedEntityManager {
        ProtectedEntityManager {
            type_managers: self.type_managers,
        }
    }
}

#[cfg(feature = "fs")]
fn transports_from_config(config: &ManagerConfig) -> Result<crate::fs::TransportSource> {
    use crate::fs::TransportSource;

    let Some(s3) = config.s3.clone() else {
        return Ok(TransportSource::None);
    };

    #[cfg(feature = "s3")]
    {
        let presigner = crate::s3::S3Presigner::new(&s3)?;
        Ok(TransportSource::Presigned(
            crate::data_transport::S3TransportFactory::new(s3, std::sync::Arc::new(presigner)),
        ))
    }

    #[cfg(not(feature = "s3"))]
    {
        match s3.url_base {
            Some(url_base) => Ok(TransportSource::UrlBase(url_base)),
            None => {
                warn!("S3 endpoint configured but presigning support is not enabled");
                Ok(TransportSource::None)
            }
        }
    }
}
