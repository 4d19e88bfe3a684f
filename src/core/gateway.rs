//! Hot-swappable router core.
//!
//! The `Gateway` owns the slot holding the current [`RouterInstance`]:
//! * Lock-free loads on the request path (`arc-swap`)
//! * Serialized publishes behind an async mutex
//! * Reload from the Config Store, with services started before the swap
//! * Retirement of the outgoing instance once it has been replaced
//!
//! Requests already dispatched keep their `Arc` to the old instance and
//! finish against it; new requests see the new instance as soon as the swap
//! has happened.
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    config::store::{ConfigError, ConfigStore},
    core::{
        resource::ResourceError,
        router::{BindContext, RouterInstance},
        service::ServiceError,
    },
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("no router instance has been published yet")]
    NotInitialized,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("service '{id}' failed to start: {source}")]
    Service {
        id: String,
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

pub struct Gateway {
    current: ArcSwapOption<RouterInstance>,
    store: Arc<ConfigStore>,
    publish_lock: Mutex<()>,
    self_ref: Weak<Gateway>,
}

impl Gateway {
    pub fn new(store: Arc<ConfigStore>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            current: ArcSwapOption::empty(),
            store,
            publish_lock: Mutex::new(()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Context handed to resources built for this gateway.
    pub fn bind_context(&self) -> BindContext {
        BindContext::new(self.self_ref.clone())
    }

    /// The currently published instance, if any.
    pub fn current(&self) -> Option<Arc<RouterInstance>> {
        self.current.load_full()
    }

    /// Replace the current instance with an already started one and retire
    /// the previous instance.
    pub async fn publish(&self, instance: Arc<RouterInstance>) {
        let _guard = self.publish_lock.lock().await;
        self.swap_and_retire(Some(instance)).await;
    }

    /// Read the stored config, build and start a new instance from it and
    /// publish it. The live instance is untouched on failure.
    pub async fn reload(&self) -> Result<i64, GatewayError> {
        let _guard = self.publish_lock.lock().await;

        let config = self.store.read().await?;
        let instance = self
            .store
            .to_router_instance(&config, &self.bind_context())?;
        instance.start().await?;

        let generation = instance.generation();
        self.swap_and_retire(Some(Arc::new(instance))).await;
        tracing::info!(generation, "Router instance published");
        Ok(generation)
    }

    /// Route a request through the current instance.
    pub async fn dispatch(&self, req: Request<Body>) -> Result<Response<Body>, GatewayError> {
        let instance = self.current.load_full().ok_or(GatewayError::NotInitialized)?;
        Ok(instance.dispatch(req).await)
    }

    /// Unpublish and retire the current instance.
    pub async fn shutdown(&self) {
        let _guard = self.publish_lock.lock().await;
        self.swap_and_retire(None).await;
        tracing::info!("Gateway shut down");
    }

    async fn swap_and_retire(&self, next: Option<Arc<RouterInstance>>) {
        if let Some(old) = self.current.swap(next) {
            old.retire().await;
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field(
                "generation",
                &self.current.load().as_ref().map(|i| i.generation()),
            )
            .finish_non_exhaustive()
    }
}
