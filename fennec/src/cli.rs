use std::path::PathBuf;

use clap::{Parser, Subcommand};

use fennec_config::Config;

use crate::backend::replicator::Replica;

/// Fennec is a client-side sync engine for PostgreSQL.
#[derive(Parser, Debug)]
#[command(name = "fennec", version)]
pub struct Cli {
    /// Path to the configuration file. Default: "fennec.toml"
    #[arg(short, long, default_value = "fennec.toml")]
    pub config: PathBuf,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the sync service.
    Run {
        /// Number of Tokio workers; overrides the config file.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Path to the SQLite replica; overrides the config file.
        #[arg(short, long)]
        replica: Option<PathBuf>,
    },

    /// Check the configuration file for errors.
    Configcheck,

    /// Print a replica's watermark and tables.
    ReplicaInfo {
        /// Path to the SQLite replica.
        #[arg(short, long)]
        replica: PathBuf,
    },
}

/// Validate configuration and report.
pub fn config_check(path: &PathBuf) -> Result<Config, fennec_config::Error> {
    let config = Config::load(path)?;
    println!(
        "configuration valid: app \"{}\", shard {}, {} publication(s)",
        config.replication.app_id,
        config.replication.shard_num,
        config.replication.publications.len()
    );
    Ok(config)
}

/// Inspect a replica file.
pub fn replica_info(path: &PathBuf) -> Result<(), crate::backend::changes::Error> {
    let replica = Replica::open(path)?;
    println!("watermark: {}", replica.watermark()?);
    for (table, pk) in replica.tables()? {
        println!("table {} (key: {})", table, pk.join(", "));
    }
    Ok(())
}
