//! Configuration management
//!
//! Node identity, peers, mining and storage settings, read from defaults, a TOML
//! file and environment variables.

pub mod settings;

pub use settings::Config;
