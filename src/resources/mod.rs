//! Built-in resource kinds.
pub mod api;
pub mod proxy;
pub mod redirect;
pub mod static_directory;
pub mod static_file;

use std::sync::Arc;

pub use api::{Api, ApiParams};
pub use proxy::{Proxy, ProxyParams};
pub use redirect::{Redirect, RedirectParams};
pub use static_directory::{StaticDirectory, StaticDirectoryParams};
pub use static_file::{StaticFile, StaticFileParams};

use crate::{
    core::registry::{RegistryResult, ResourceRegistry},
    ports::http_client::HttpClient,
};

/// Register every built-in resource type. Proxies share `http_client`.
pub fn register_builtin(
    registry: &mut ResourceRegistry,
    http_client: Arc<dyn HttpClient>,
) -> RegistryResult<()> {
    registry.register("static_file", StaticFile::new)?;
    registry.register("directory", StaticDirectory::new)?;
    registry.register("redirect", Redirect::new)?;
    registry.register("proxy", move |base, params: ProxyParams| {
        Proxy::new(base, params, Arc::clone(&http_client))
    })?;
    registry.register("api", Api::new)?;
    Ok(())
}
