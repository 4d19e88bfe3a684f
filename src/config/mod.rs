pub mod loader;
pub mod models;
pub mod store;
pub mod validation;

pub use loader::{LogFormat, Settings, load_settings};
pub use models::*;
pub use store::{ConfigError, ConfigStore};
pub use validation::{ConfigValidator, ValidationError, ValidationResult};
