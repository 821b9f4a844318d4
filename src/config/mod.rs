//! Configuration module
//!
//! Loads, validates and persists `ScareBox` settings, and parses the
//! merge-patches clients send at runtime.

pub mod patch;
pub mod schema;
pub mod store;
pub mod validation;

pub use patch::{ConfigField, ConfigPatch, PatchEntry, PatchValue, RejectedField, UnknownField};
pub use schema::*;
pub use store::{ConfigStore, MemoryStore, YamlFileStore, parse_settings, unknown_keys};
pub use validation::{ValidationResult, Validator};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "SCAREBOX_CONFIG";
