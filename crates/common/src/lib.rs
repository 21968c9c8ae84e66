//! Taskwright Common Library
//!
//! Configuration, backing store access, and value types shared by the
//! harness core and the command line front end.

pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use config::{ConfigLoader, HarnessConfig};
pub use db::{BackingStore, Database, LazyDatabase};
pub use error::{Error, Result};
pub use types::{Row, SqlValue};

/// Taskwright version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "taskwright.toml";
