//! Fennec, a client-side sync engine for PostgreSQL.

use clap::Parser;
use fennec::backend::replicator::Replica;
use fennec::cli::{self, Commands};
use tokio::runtime::Builder;
use tokio::signal::ctrl_c;
use tracing::info;

use std::process::exit;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::Cli::parse();

    fennec::logger();

    match args.command {
        Some(Commands::Configcheck) => {
            if let Err(err) = cli::config_check(&args.config) {
                eprintln!("Configuration error: {}", err);
                exit(1);
            }
            exit(0);
        }

        Some(Commands::ReplicaInfo { ref replica }) => {
            if let Err(err) = cli::replica_info(replica) {
                eprintln!("Replica error: {}", err);
                exit(1);
            }
            exit(0);
        }

        _ => (),
    }

    info!("🦊 Fennec v{}", env!("CARGO_PKG_VERSION"));

    fennec::config::load(&args.config)?;

    let overrides = match args.command {
        Some(Commands::Run { workers, replica }) => fennec_config::Overrides {
            workers,
            replica_path: replica,
        },
        _ => fennec_config::Overrides::default(),
    };
    let config = fennec::config::overrides(overrides);

    let runtime = match config.general.workers {
        0 => {
            let mut builder = Builder::new_current_thread();
            builder.enable_all();
            builder
        }
        workers => {
            info!("spawning {} workers", workers);
            let mut builder = Builder::new_multi_thread();
            builder.worker_threads(workers).enable_all();
            builder
        }
    }
    .build()?;

    runtime.block_on(async move { fennec_main(config).await })?;

    Ok(())
}

async fn fennec_main(config: fennec_config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let replica = Replica::open(&config.replication.replica_path)?;
    info!(
        "replica \"{}\" at {}",
        config.replication.replica_path.display(),
        replica.watermark()?
    );

    // Upstream connectivity, client transport and worker spawning are
    // wired by the embedding deployment; the process supervises the
    // replica and waits for shutdown.
    info!(
        "🦊 Fennec shard \"{}\" ready",
        config.replication.shard_schema()
    );

    ctrl_c().await?;

    info!("🦊 Fennec is shutting down");
    Ok(())
}
