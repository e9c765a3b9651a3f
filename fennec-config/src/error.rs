use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config file \"{0}\": {1}")]
    Io(PathBuf, std::io::Error),

    #[error("config parse: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("app_id \"{0}\" may only contain lowercase letters, digits and underscores")]
    BadAppId(String),

    #[error("at least one publication is required")]
    NoPublications,

    #[error("table_copy_workers must be at least 1")]
    NoCopyWorkers,
}
