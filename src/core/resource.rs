use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use thiserror::Error;

use crate::core::{
    path_template::PathTemplate,
    router::{BindContext, DispatchTable},
};

const STATUS_NOT_STARTED: u8 = 0;
const STATUS_STARTED: u8 = 1;
const STATUS_STOPPING: u8 = 2;
const STATUS_STOPPED: u8 = 3;

/// Lifecycle of a resource inside one router instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    NotStarted,
    Started,
    Stopping,
    Stopped,
}

impl ResourceStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            STATUS_STARTED => Self::Started,
            STATUS_STOPPING => Self::Stopping,
            STATUS_STOPPED => Self::Stopped,
            _ => Self::NotStarted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => STATUS_NOT_STARTED,
            Self::Started => STATUS_STARTED,
            Self::Stopping => STATUS_STOPPING,
            Self::Stopped => STATUS_STOPPED,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Errors raised by resources while validating, binding or changing state.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ResourceError {
    #[error("cannot {operation} resource '{id}' while it is {status}")]
    InvalidState {
        id: String,
        operation: &'static str,
        status: ResourceStatus,
    },

    #[error("target path '{target}' is not compatible with mount path '{mount}'")]
    IncompatiblePaths { mount: String, target: String },

    #[error("invalid parameters for resource '{id}': {message}")]
    InvalidParams { id: String, message: String },

    #[error("failed to bind handler at '{path}': {message}")]
    Bind { path: String, message: String },
}

/// Identity and lifecycle state shared by every resource kind.
#[derive(Debug)]
pub struct BaseResource {
    id: String,
    status: AtomicU8,
}

impl BaseResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AtomicU8::new(STATUS_NOT_STARTED),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ResourceStatus {
        ResourceStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn transition(
        &self,
        operation: &'static str,
        from: ResourceStatus,
        to: ResourceStatus,
    ) -> Result<(), ResourceError> {
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| ResourceError::InvalidState {
                id: self.id.clone(),
                operation,
                status: ResourceStatus::from_u8(actual),
            })
    }

    /// `NotStarted -> Started`.
    pub fn mark_started(&self) -> Result<(), ResourceError> {
        self.transition("start", ResourceStatus::NotStarted, ResourceStatus::Started)
    }

    /// `Started -> Stopping -> Stopped`.
    pub fn mark_stopped(&self) -> Result<(), ResourceError> {
        self.transition("stop", ResourceStatus::Started, ResourceStatus::Stopping)?;
        self.transition("stop", ResourceStatus::Stopping, ResourceStatus::Stopped)
    }
}

/// A pluggable unit of routable behavior bound under one mount path.
///
/// Implementations only need to provide [`Resource::base`] and
/// [`Resource::add_handlers`]; lifecycle handling defaults to the status kept
/// in [`BaseResource`].
pub trait Resource: Send + Sync + 'static {
    fn base(&self) -> &BaseResource;

    fn id(&self) -> &str {
        self.base().id()
    }

    fn status(&self) -> ResourceStatus {
        self.base().status()
    }

    fn start(&self) -> Result<(), ResourceError> {
        self.base().mark_started()
    }

    fn stop(&self) -> Result<(), ResourceError> {
        self.base().mark_stopped()
    }

    /// Check that this resource can be mounted at `mount`. Called while a
    /// config is converted, so a failure rejects the whole config.
    fn validate_mount(&self, _mount: &PathTemplate) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Register this resource's handlers under `mount`.
    fn add_handlers(
        self: Arc<Self>,
        mount: &str,
        table: &mut DispatchTable,
        ctx: &BindContext,
    ) -> Result<(), ResourceError>;
}

/// Shared mount/target compatibility check for resources that rebuild paths.
pub fn ensure_proxy_compatible(
    mount: &PathTemplate,
    target: &PathTemplate,
) -> Result<(), ResourceError> {
    if mount.is_proxy_compatible(target) {
        Ok(())
    } else {
        Err(ResourceError::IncompatiblePaths {
            mount: mount.to_string(),
            target: target.to_string(),
        })
    }
}
