//! Process-wide configuration access.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;

use fennec_config::{Config, Error, Overrides};

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// The current configuration.
pub fn config() -> Arc<Config> {
    CONFIG.load().clone()
}

/// Load the configuration file from disk and install it.
pub fn load(path: &Path) -> Result<Config, Error> {
    let config = Config::load(path)?;
    set(config)
}

pub fn set(config: Config) -> Result<Config, Error> {
    config.check()?;
    CONFIG.store(Arc::new(config.clone()));
    Ok(config)
}

/// Apply command-line overrides on top of the installed configuration.
pub fn overrides(overrides: Overrides) -> Config {
    let mut config = (*config()).clone();
    if let Some(workers) = overrides.workers {
        config.general.workers = workers;
    }
    if let Some(replica_path) = overrides.replica_path {
        config.replication.replica_path = replica_path;
    }
    CONFIG.store(Arc::new(config.clone()));
    config
}
