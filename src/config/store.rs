//! Single source of truth for the routing config.
//!
//! The store serializes access to the JSON file behind an async `RwLock`:
//! reads share it, updates hold it exclusively from the re-read until the
//! new file has been renamed into place. An update is only written when the
//! mutated config converts into a router instance, so an invalid config can
//! never reach the disk through the store.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    config::{
        models::Config,
        validation::{ConfigValidator, ValidationError},
    },
    core::{
        path_template::PathTemplate,
        registry::{MiddlewareRegistry, RegistryError, ResourceRegistry},
        resource::{BaseResource, ResourceError},
        router::{BindContext, MountedResource, RouterInstance},
        service::{ServiceManager, ServiceSpec},
    },
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode config file '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode config: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("config file '{}' already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("given timestamp is in the past (stored {stored}, given {given})")]
    StaleTimestamp { stored: i64, given: i64 },

    #[error("route with ID {0} already exists")]
    DuplicateRoute(String),

    #[error("route with ID {0} doesn't exist")]
    UnknownRoute(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("route '{route}' could not be constructed: {source}")]
    Construct {
        route: String,
        #[source]
        source: RegistryError,
    },

    #[error("route '{route}' cannot be mounted: {source}")]
    Mount {
        route: String,
        #[source]
        source: ResourceError,
    },
}

impl ConfigError {
    /// Whether the error describes a config that cannot be turned into a
    /// router instance, as opposed to a storage or concurrency failure.
    pub fn is_invalid_config(&self) -> bool {
        matches!(
            self,
            Self::Invalid(_) | Self::Registry(_) | Self::Construct { .. } | Self::Mount { .. }
        )
    }
}

pub struct ConfigStore {
    path: PathBuf,
    lock: RwLock<()>,
    resources: Arc<ResourceRegistry>,
    middleware: Arc<MiddlewareRegistry>,
    services: Arc<ServiceManager>,
}

impl ConfigStore {
    pub fn new(
        path: impl Into<PathBuf>,
        resources: Arc<ResourceRegistry>,
        middleware: Arc<MiddlewareRegistry>,
        services: Arc<ServiceManager>,
    ) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
            resources,
            middleware,
            services,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resource_registry(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn middleware_registry(&self) -> &MiddlewareRegistry {
        &self.middleware
    }

    pub fn service_manager(&self) -> &Arc<ServiceManager> {
        &self.services
    }

    /// Load and decode the config file.
    pub async fn read(&self) -> Result<Config, ConfigError> {
        let _guard = self.lock.read().await;
        read_config(&self.path).await
    }

    /// Apply `mutator` to a freshly read config and persist the result.
    ///
    /// The mutated config must convert into a router instance; nothing is
    /// written otherwise. Returns the config as written.
    pub async fn update<F>(&self, mutator: F) -> Result<Config, ConfigError>
    where
        F: FnOnce(&mut Config) -> Result<(), ConfigError>,
    {
        let _guard = self.lock.write().await;

        let mut config = read_config(&self.path).await?;
        mutator(&mut config)?;
        self.to_router_instance(&config, &BindContext::detached())?;
        write_config(&self.path, &config).await?;

        tracing::info!(
            path = %self.path.display(),
            last_updated = config.last_updated,
            "Config updated"
        );
        Ok(config)
    }

    /// Materialize `config` into an unstarted router instance.
    pub fn to_router_instance(
        &self,
        config: &Config,
        ctx: &BindContext,
    ) -> Result<RouterInstance, ConfigError> {
        ConfigValidator::validate(config)?;

        let middleware = config
            .middleware
            .iter()
            .map(|name| -> Result<_, ConfigError> {
                Ok((name.clone(), self.middleware.resolve(name)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut resources = Vec::with_capacity(config.routes.len());
        for route in &config.routes {
            let resource = self
                .resources
                .construct(
                    &route.resource.resource_type,
                    BaseResource::new(route.id.clone()),
                    route.resource.params.clone(),
                )
                .map_err(|source| ConfigError::Construct {
                    route: route.id.clone(),
                    source,
                })?;

            resource
                .validate_mount(&PathTemplate::parse(&route.route))
                .map_err(|source| ConfigError::Mount {
                    route: route.id.clone(),
                    source,
                })?;

            resources.push(MountedResource {
                route_id: route.id.clone(),
                mount: route.route.clone(),
                resource,
            });
        }

        let services = config
            .services
            .iter()
            .map(|service| {
                let spec = ServiceSpec {
                    remote: service.remote.clone(),
                    commit_hash: service.commit_hash.clone(),
                    build_command: service.build_command.clone(),
                    start_command: service.start_command.clone(),
                    stop_command: service.stop_command.clone(),
                };
                (
                    service.id.clone(),
                    Arc::new(self.services.service(service.id.clone(), spec)),
                )
            })
            .collect::<BTreeMap<_, _>>();

        Ok(RouterInstance::new(
            config.last_updated,
            middleware,
            resources,
            services,
            ctx,
        ))
    }

    /// Write the starter config to `path`. Refuses to overwrite an existing
    /// file unless `force` is set.
    pub async fn write_starter(path: &Path, force: bool) -> Result<Config, ConfigError> {
        if !force && tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        let config = Config::starter();
        write_config(path, &config).await?;
        Ok(config)
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

async fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize next to the destination, then rename over it.
async fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let mut bytes = serde_json::to_vec_pretty(config).map_err(ConfigError::Encode)?;
    bytes.push(b'\n');

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.json".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, &bytes).await.map_err(write_err)?;
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(source));
    }
    Ok(())
}
