//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → StoreConfig::normalize (KV prefixes, once)
//!     → validation.rs (semantic checks)
//!     → StoreConfig (validated, immutable)
//!     → persistence::connect builds the backing store
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    FileConfig, KvBackendKind, KvConfig, LogFormat, ObservabilityConfig, ProviderConfig,
    StorageConfig, StorageMode, StoreConfig,
};
pub use validation::ValidationError;
