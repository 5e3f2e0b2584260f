//! Configuration module for the mesh hub
//!
//! Supports loading configuration from TOML files and environment variables.

mod settings;

pub use settings::*;
