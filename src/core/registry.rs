//! Name-keyed registries used to materialize a config into live objects.
//!
//! Both registries are filled once at start-up through `&mut self` and then
//! shared read-only behind an `Arc`, so registration can never race with a
//! lookup.
use std::{
    collections::BTreeMap,
    sync::Arc,
};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::core::{
    middleware::Middleware,
    resource::{BaseResource, Resource},
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("\"{0}\" resource constructor has already been registered")]
    DuplicateResourceType(String),

    #[error("\"{0}\" middleware has already been registered")]
    DuplicateMiddleware(String),

    #[error("unable to find \"{0}\" resource constructor")]
    UnknownResourceType(String),

    #[error("unable to find \"{0}\" middleware")]
    UnknownMiddleware(String),

    #[error("unable to parse \"{resource_type}\" parameters: {source}")]
    ParamsDecode {
        resource_type: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

type Factory = Box<dyn Fn(BaseResource, serde_json::Value) -> RegistryResult<Arc<dyn Resource>> + Send + Sync>;

struct ResourceEntry {
    factory: Factory,
    shape: serde_json::Value,
}

/// Resource type name → typed constructor.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: BTreeMap<String, ResourceEntry>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` for `resource_type`. Parameters are decoded into
    /// `P` before the constructor runs; `P::default()` doubles as the
    /// parameter shape reported to config authoring tools.
    pub fn register<P, F, R>(&mut self, resource_type: &str, constructor: F) -> RegistryResult<()>
    where
        P: DeserializeOwned + Serialize + Default + 'static,
        F: Fn(BaseResource, P) -> R + Send + Sync + 'static,
        R: Resource,
    {
        if self.entries.contains_key(resource_type) {
            return Err(RegistryError::DuplicateResourceType(
                resource_type.to_string(),
            ));
        }

        // Unit structs serialize to `null`; report them as an empty object.
        let shape = match serde_json::to_value(P::default()) {
            Ok(serde_json::Value::Null) | Err(_) => serde_json::Value::Object(Default::default()),
            Ok(value) => value,
        };

        let type_name = resource_type.to_string();
        let factory: Factory = Box::new(move |base, raw| {
            let params: P = decode_params(&type_name, raw)?;
            Ok(Arc::new(constructor(base, params)) as Arc<dyn Resource>)
        });

        tracing::debug!(resource = resource_type, "Registered resource constructor");
        self.entries
            .insert(resource_type.to_string(), ResourceEntry { factory, shape });
        Ok(())
    }

    /// Build a resource of `resource_type` from raw JSON parameters.
    pub fn construct(
        &self,
        resource_type: &str,
        base: BaseResource,
        raw_params: serde_json::Value,
    ) -> RegistryResult<Arc<dyn Resource>> {
        let entry = self
            .entries
            .get(resource_type)
            .ok_or_else(|| RegistryError::UnknownResourceType(resource_type.to_string()))?;
        (entry.factory)(base, raw_params)
    }

    /// Registered type names in sorted order.
    pub fn available_types(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn params_shape(&self, resource_type: &str) -> RegistryResult<serde_json::Value> {
        self.entries
            .get(resource_type)
            .map(|entry| entry.shape.clone())
            .ok_or_else(|| RegistryError::UnknownResourceType(resource_type.to_string()))
    }
}

fn decode_params<P: DeserializeOwned>(
    resource_type: &str,
    raw: serde_json::Value,
) -> RegistryResult<P> {
    // Parameterless resources are commonly configured with `null` params.
    let raw = if raw.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        raw
    };
    serde_json::from_value(raw).map_err(|source| RegistryError::ParamsDecode {
        resource_type: resource_type.to_string(),
        source,
    })
}

/// Middleware name → shared middleware instance.
#[derive(Default)]
pub struct MiddlewareRegistry {
    entries: BTreeMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        middleware: Arc<dyn Middleware>,
    ) -> RegistryResult<()> {
        if self.entries.contains_key(name) {
            return Err(RegistryError::DuplicateMiddleware(name.to_string()));
        }
        tracing::debug!(middleware = name, "Registered middleware");
        self.entries.insert(name.to_string(), middleware);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> RegistryResult<Arc<dyn Middleware>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownMiddleware(name.to_string()))
    }

    pub fn available(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::core::{
        resource::ResourceError,
        router::{BindContext, DispatchTable},
    };

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct EchoParams {
        message: String,
        #[serde(default)]
        repeat: u32,
    }

    struct Echo {
        base: BaseResource,
        params: EchoParams,
    }

    impl Resource for Echo {
        fn base(&self) -> &BaseResource {
            &self.base
        }

        fn add_handlers(
            self: Arc<Self>,
            _mount: &str,
            _table: &mut DispatchTable,
            _ctx: &BindContext,
        ) -> Result<(), ResourceError> {
            Ok(())
        }
    }

    fn registry() -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        registry
            .register("echo", |base, params: EchoParams| Echo { base, params })
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = registry();
        let err = registry
            .register("echo", |base, params: EchoParams| Echo { base, params })
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateResourceType(name) if name == "echo"));
    }

    #[test]
    fn test_construct_decodes_params() {
        let registry = registry();
        let resource = registry
            .construct(
                "echo",
                BaseResource::new("e1"),
                serde_json::json!({"Message": "hi", "Repeat": 2}),
            )
            .unwrap();
        assert_eq!(resource.id(), "e1");
    }

    #[test]
    fn test_construct_unknown_type() {
        let err = registry()
            .construct("nope", BaseResource::new("x"), serde_json::Value::Null)
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::UnknownResourceType(_)));
    }

    #[test]
    fn test_construct_rejects_malformed_params() {
        let err = registry()
            .construct(
                "echo",
                BaseResource::new("x"),
                serde_json::json!({"Message": 5}),
            )
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::ParamsDecode { .. }));
    }

    #[test]
    fn test_introspection() {
        let mut registry = registry();
        registry
            .register("alpha", |base, params: EchoParams| Echo { base, params })
            .unwrap();
        assert_eq!(registry.available_types(), vec!["alpha", "echo"]);
        assert_eq!(
            registry.params_shape("echo").unwrap(),
            serde_json::json!({"Message": "", "Repeat": 0})
        );
        assert!(registry.params_shape("missing").is_err());
    }
}
