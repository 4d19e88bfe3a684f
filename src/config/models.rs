//! Data structures of the JSON routing config.
//!
//! Field names are PascalCase on disk (`LastUpdated`, `Routes`, ...). Every
//! mutation helper checks the caller's timestamp against `LastUpdated` first
//! and records it on success, so the helpers double as the optimistic
//! concurrency check of the management API.
use serde::{Deserialize, Serialize};

use crate::config::store::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub middleware: Vec<String>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteConfig {
    pub id: String,
    pub route: String,
    pub resource: ResourceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceConfig {
    pub resource_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceConfig {
    pub id: String,
    pub remote: String,
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_command: Option<String>,
}

impl Config {
    /// Accept `timestamp` unless the stored config is newer, then record it.
    pub fn verify_timestamp(&mut self, timestamp: i64) -> Result<(), ConfigError> {
        self.check_timestamp(timestamp)?;
        self.last_updated = timestamp;
        Ok(())
    }

    /// Same acceptance rule as [`Config::verify_timestamp`], without recording.
    pub fn check_timestamp(&self, timestamp: i64) -> Result<(), ConfigError> {
        if self.last_updated > timestamp {
            return Err(ConfigError::StaleTimestamp {
                stored: self.last_updated,
                given: timestamp,
            });
        }
        Ok(())
    }

    pub fn route(&self, id: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|route| route.id == id)
    }

    pub fn service(&self, id: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|service| service.id == id)
    }

    fn route_mut(&mut self, id: &str) -> Result<&mut RouteConfig, ConfigError> {
        self.routes
            .iter_mut()
            .find(|route| route.id == id)
            .ok_or_else(|| ConfigError::UnknownRoute(id.to_string()))
    }

    pub fn set_middleware(&mut self, middleware: Vec<String>, timestamp: i64) -> Result<(), ConfigError> {
        self.verify_timestamp(timestamp)?;
        self.middleware = middleware;
        Ok(())
    }

    pub fn add_route(&mut self, route: RouteConfig, timestamp: i64) -> Result<(), ConfigError> {
        self.verify_timestamp(timestamp)?;
        if self.route(&route.id).is_some() {
            return Err(ConfigError::DuplicateRoute(route.id));
        }
        self.routes.push(route);
        Ok(())
    }

    /// Remove route `id`. Removing a route that does not exist is a no-op.
    pub fn delete_route(&mut self, id: &str, timestamp: i64) -> Result<(), ConfigError> {
        self.verify_timestamp(timestamp)?;
        self.routes.retain(|route| route.id != id);
        Ok(())
    }

    pub fn update_route(
        &mut self,
        id: &str,
        resource: ResourceConfig,
        timestamp: i64,
    ) -> Result<(), ConfigError> {
        self.verify_timestamp(timestamp)?;
        self.route_mut(id)?.resource = resource;
        Ok(())
    }

    pub fn change_route(&mut self, id: &str, route: String, timestamp: i64) -> Result<(), ConfigError> {
        self.verify_timestamp(timestamp)?;
        self.route_mut(id)?.route = route;
        Ok(())
    }

    /// Config written by `canopy init`: the management API under `/admin`
    /// and the logger middleware.
    pub fn starter() -> Self {
        Self {
            last_updated: 0,
            middleware: vec!["logger".to_string()],
            routes: vec![RouteConfig {
                id: "admin".to_string(),
                route: "/admin".to_string(),
                resource: ResourceConfig {
                    resource_type: "api".to_string(),
                    params: serde_json::json!({}),
                },
            }],
            services: Vec::new(),
        }
    }
}
