pub mod gateway;
pub mod middleware;
pub mod path_template;
pub mod registry;
pub mod resource;
pub mod router;
pub mod service;

pub use gateway::{Gateway, GatewayError};
pub use router::RouterInstance;
