//! CLI Commands

pub mod fixtures;
pub mod list;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use taskwright_common::{ConfigLoader, HarnessConfig, LazyDatabase};
use taskwright_e2e::FixtureStore;
use tracing::debug;

/// Read the config file (defaults when absent) plus `TASKWRIGHT_*` overrides
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    let loader = ConfigLoader::new(path);
    let config = loader
        .get()
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    debug!("Configuration: {:?}", config);
    Ok(config.clone())
}

/// Fixture access over a store connection opened on first use
pub fn fixture_store(config: &HarnessConfig) -> FixtureStore {
    FixtureStore::new(Arc::new(LazyDatabase::new(config.store.path.clone())))
}
