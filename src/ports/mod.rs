//! Traits at the edges of the gateway. Adapters implement them; tests
//! substitute in-memory fakes.
pub mod file_system;
pub mod http_client;
pub mod service_runtime;
pub mod source_control;
