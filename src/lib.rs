//! Canopy - a config-driven HTTP gateway with hot-swappable routing.
//!
//! A JSON config file lists middleware, routes and backing services. Canopy
//! turns that config into an immutable [`RouterInstance`] and publishes it
//! atomically; in-flight requests keep the instance they started with, new
//! requests see the new one. Routes mount typed resources (static files,
//! directories, redirects, proxies and the management API) chosen by name
//! from a registry, so new resource kinds plug in without touching the core.
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping routing and lifecycle logic inside `core`. Built-in resource
//! kinds live in `resources`.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use canopy::{
//!     Gateway, GitCli, HttpClientAdapter, ShellRuntime,
//!     adapters::middleware,
//!     config::ConfigStore,
//!     core::{
//!         registry::{MiddlewareRegistry, ResourceRegistry},
//!         service::ServiceManager,
//!     },
//!     resources,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let mut resource_registry = ResourceRegistry::new();
//! resources::register_builtin(&mut resource_registry, Arc::new(HttpClientAdapter::new()?))?;
//! let mut middleware_registry = MiddlewareRegistry::new();
//! middleware::register_builtin(&mut middleware_registry)?;
//!
//! let services = Arc::new(ServiceManager::new(
//!     "./services",
//!     Arc::new(GitCli::new()),
//!     Arc::new(ShellRuntime::new()),
//! ));
//! let store = Arc::new(ConfigStore::new(
//!     "canopy.json",
//!     Arc::new(resource_registry),
//!     Arc::new(middleware_registry),
//!     services,
//! ));
//! let gateway = Gateway::new(store);
//! gateway.reload().await?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Library APIs return domain error enums built with `thiserror`; the binary
//! wraps them in `eyre` reports with context.
pub mod adapters;
pub mod config;
pub mod core;
pub mod ports;
pub mod resources;
pub mod tracing_setup;
pub mod utils;

pub use crate::{
    adapters::{FileSystemAdapter, GitCli, HttpClientAdapter, HttpHandler, ShellRuntime},
    core::{Gateway, GatewayError, RouterInstance},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
