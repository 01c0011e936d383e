pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigError, load_config, load_with_env};
pub use models::*;
pub use validation::{ConfigValidator, ValidationError};
