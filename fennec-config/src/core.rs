use std::fs::read_to_string;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Client, Error, General, Purge, Replication};

/// Top-level configuration, loaded from `fennec.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: General,

    #[serde(default)]
    pub replication: Replication,

    #[serde(default)]
    pub client: Client,

    #[serde(default)]
    pub purge: Purge,
}

impl Config {
    /// Load and validate configuration from disk. A missing file yields
    /// defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config = if path.exists() {
            let text =
                read_to_string(path).map_err(|err| Error::Io(path.to_path_buf(), err))?;
            toml::from_str(&text)?
        } else {
            warn!("config file \"{}\" not found, using defaults", path.display());
            Config::default()
        };

        config.check()?;
        Ok(config)
    }

    /// Validate cross-field invariants.
    pub fn check(&self) -> Result<(), Error> {
        let app_id = &self.replication.app_id;
        if app_id.is_empty()
            || !app_id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(Error::BadAppId(app_id.clone()));
        }

        if self.replication.table_copy_workers == 0 {
            return Err(Error::NoCopyWorkers);
        }

        Ok(())
    }
}
