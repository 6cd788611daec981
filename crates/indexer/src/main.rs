//! bloomdex-index — offline index builder CLI.
//!
//! Calls `bloomdex-core` directly with no server overhead.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use bloomdex_core::config::IndexerConfig;
use bloomdex_core::indexer::{discover_tree, index_directory};
use bloomdex_core::reader::JsonlColumnarReader;

/// bloomdex-index — build Bloom/Range filter artifacts from shard files.
#[derive(Parser)]
#[command(name = "bloomdex-index", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build filter artifacts for every shard file in a directory
    Build {
        /// Directory containing one shard file per shard (JSONL rows)
        input_dir: PathBuf,

        /// Directory to write `<shard_id>/<column>.pickle` artifacts into
        output_dir: PathBuf,

        /// Distinct-value threshold above which a range filter is preferred
        #[arg(long, default_value_t = bloomdex_core::config::DEFAULT_RANGE_FILTER_THRESHOLD)]
        range_filter_threshold: u64,

        /// Bloom filter false-positive rate
        #[arg(long, default_value_t = bloomdex_core::config::DEFAULT_ERROR_RATE)]
        error_rate: f64,
    },
    /// List the shards and artifacts discovered under an index directory
    Discover {
        /// Index root directory
        index_root: PathBuf,

        /// Output as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bloomdex=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input_dir, output_dir, range_filter_threshold, error_rate } => {
            let config = IndexerConfig { range_filter_threshold, error_rate };
            let reader = JsonlColumnarReader;
            match index_directory(&reader, &input_dir, &output_dir, &config) {
                Ok(shards) => {
                    tracing::info!(shards, output_dir = %output_dir.display(), "indexing complete");
                }
                Err(e) => {
                    tracing::error!(error = %e, input_dir = %input_dir.display(), "could not read input directory");
                    std::process::exit(1);
                }
            }
        }
        Commands::Discover { index_root, json } => {
            let tree = discover_tree(&index_root);
            if json {
                println!("{}", serde_json::to_string_pretty(&tree).unwrap());
            } else {
                for (shard_id, columns) in &tree {
                    println!("{shard_id}:");
                    for column in columns {
                        println!("  {column}");
                    }
                }
                tracing::info!(shards = tree.len(), "discovery complete");
            }
        }
    }
}
