//! Persistence downloader.
//!
//! Bootstraps and catches up a node's on-disk persistence from the remote
//! bucket, then exits. Intended to run to completion before the node
//! process is started.
//!
//! ```bash
//! downloader -s /data -b chain-bucket -n devnet
//! ```

use clap::Parser;
use persistence_sync::{GcsBucket, SyncConfig, Synchronizer};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Downloads a node's persistence from a remote bucket
#[derive(Parser, Debug)]
#[command(name = "downloader")]
#[command(about = "Downloads a node's persistence from a remote bucket")]
struct Args {
    /// The path to download the persistence to
    #[arg(long, short = 's')]
    storage_path: PathBuf,

    /// The name of the bucket
    #[arg(long, short = 'b')]
    bucket_name: String,

    /// The name of the testnet
    #[arg(long, short = 'n')]
    testnet_name: String,

    /// The (maximum) number of threads to use when downloading persistence
    #[arg(long, short = 't', default_value_t = persistence_sync::sync::DEFAULT_DOWNLOAD_WORKERS)]
    threads: usize,

    /// Skip micro-block content classes (txEpochs, txBodies, microBlock,
    /// minerInfo)
    #[arg(long)]
    exclude_micro_blocks: bool,

    /// Tx blocks per DS epoch; enables applying diffs when the tip
    /// advances without crossing a snapshot rotation
    #[arg(long)]
    ds_epoch_length: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = SyncConfig::new(
        args.storage_path,
        args.bucket_name.clone(),
        args.testnet_name,
    );
    config.download_workers = args.threads;
    config.exclude_micro_blocks = args.exclude_micro_blocks;
    config.ds_epoch_length = args.ds_epoch_length;

    let client = GcsBucket::new(args.bucket_name);
    let synchronizer = Synchronizer::new(client, config);

    match synchronizer.run().await {
        Ok(()) => {
            info!("Persistence download complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
