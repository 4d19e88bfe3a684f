use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::models::{Config, RouteConfig, ServiceConfig};

/// Service ids become folder names under the services directory.
static SERVICE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid service id pattern"));

/// scp-like git remotes such as `git@github.com:org/repo.git`.
static SCP_REMOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.-]+@[\w.-]+:[\w./~-]+$").expect("valid remote pattern"));

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Structural checks on a routing config, run before any resource is built.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire config, reporting every problem found.
    pub fn validate(config: &Config) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let mut route_ids = HashSet::new();
        for (index, route) in config.routes.iter().enumerate() {
            errors.extend(Self::validate_route(index, route));
            if !route.id.is_empty() && !route_ids.insert(route.id.as_str()) {
                errors.push(ValidationError::DuplicateId {
                    kind: "route",
                    id: route.id.clone(),
                });
            }
        }

        let mut service_ids = HashSet::new();
        for (index, service) in config.services.iter().enumerate() {
            errors.extend(Self::validate_service(index, service));
            if !service.id.is_empty() && !service_ids.insert(service.id.as_str()) {
                errors.push(ValidationError::DuplicateId {
                    kind: "service",
                    id: service.id.clone(),
                });
            }
        }

        for (index, name) in config.middleware.iter().enumerate() {
            if name.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("Middleware[{index}]"),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(&errors),
            })
        }
    }

    fn validate_route(index: usize, route: &RouteConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if route.id.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("Routes[{index}].Id"),
            });
        }

        if !route.route.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("route '{}'", route.id),
                message: format!("Route paths must start with '/', got '{}'", route.route),
            });
        }

        if route.resource.resource_type.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("Routes[{index}].Resource.ResourceType"),
            });
        }

        errors
    }

    fn validate_service(index: usize, service: &ServiceConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if service.id.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("Services[{index}].Id"),
            });
        } else if !SERVICE_ID.is_match(&service.id) {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{}'", service.id),
                message: "Service ids may only contain letters, digits, '.', '_' and '-'"
                    .to_string(),
            });
        }

        if service.commit_hash.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("Services[{index}].CommitHash"),
            });
        }

        if let Err(e) = Self::validate_remote(&service.remote, &format!("service '{}' remote", service.id)) {
            errors.push(e);
        }

        errors
    }

    /// Accept URL remotes (`https://`, `ssh://`, `git://`, `file://`) and
    /// scp-like `user@host:path` remotes.
    fn validate_remote(remote: &str, context: &str) -> ValidationResult<()> {
        if SCP_REMOTE.is_match(remote) {
            return Ok(());
        }

        match url::Url::parse(remote) {
            Ok(url) => match url.scheme() {
                "http" | "https" | "ssh" | "git" => {
                    if url.host().is_none() {
                        return Err(ValidationError::InvalidField {
                            field: context.to_string(),
                            message: "URL must have a valid host".to_string(),
                        });
                    }
                    Ok(())
                }
                "file" => Ok(()),
                other => Err(ValidationError::InvalidField {
                    field: context.to_string(),
                    message: format!("Unsupported remote scheme '{other}'"),
                }),
            },
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid remote format: {e}"),
            }),
        }
    }

    fn format_multiple_errors(errors: &[ValidationError]) -> String {
        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
