pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env, load, load_from_file};
pub use schema::{Config, LockConfig};
pub use validation::validate_config;
