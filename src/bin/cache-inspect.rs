#![forbid(unsafe_code)]
//! Inspect a compact block cache from the command line

use clap::{Parser, Subcommand};
use colored::*;
use compact_block_cache::{load_config, BlockRecord, CacheDb, TxRecord};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cache-inspect", about = "Read-side diagnostics for a compact block cache")]
struct Cli {
    /// Path to the cache config file
    #[arg(short, long, default_value = "cache.toml")]
    config: PathBuf,

    /// Override the database path from the config file
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the current tip height
    Tip,
    /// Show the block stored at a height
    Block {
        height: u32,
        /// Print the payload as hex
        #[arg(long)]
        payload: bool,
    },
    /// Show a block by its hash
    BlockByHash { hash: String },
    /// Show a transaction by hash, or by block position
    Tx {
        #[arg(long, conflicts_with_all = ["height", "block_hash"])]
        hash: Option<String>,
        #[arg(long, requires = "index", conflicts_with = "block_hash")]
        height: Option<u32>,
        #[arg(long, requires = "index")]
        block_hash: Option<String>,
        #[arg(long)]
        index: Option<u32>,
    },
    /// Stream a height range and list what is stored
    Range { start: u32, end: u32 },
    /// Drop every block above a height and lower the tip
    Rollback { height: u32 },
}

fn print_block(block: &BlockRecord, with_payload: bool) {
    println!("{} {}", "height:".bright_cyan(), block.height);
    println!("{} {}", "hash:".bright_cyan(), block.hash);
    println!("{} {}", "prev_hash:".bright_cyan(), block.prev_hash);
    println!("{} {}", "sapling:".bright_cyan(), block.sapling_flag);
    println!("{} {} bytes", "payload:".bright_cyan(), block.payload.len());
    if with_payload {
        println!("{}", hex::encode(&block.payload));
    }
}

fn print_tx(tx: &TxRecord) {
    println!("{} {}", "tx_hash:".bright_cyan(), tx.tx_hash);
    println!("{} {}:{}", "position:".bright_cyan(), tx.block_height, tx.tx_index);
    println!("{} {}", "block_hash:".bright_cyan(), tx.block_hash);
    println!("{} {}", "payload:".bright_cyan(), hex::encode(&tx.payload));
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    let db = CacheDb::open(&config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Tip => {
            let state = db.get_chain_state(&cancel)?;
            println!(
                "{} {} (updated {})",
                "tip:".bright_green().bold(),
                state.height,
                state.updated_at.to_rfc3339()
            );
        }
        Command::Block { height, payload } => {
            print_block(&db.get_block_record(&cancel, height)?, payload);
        }
        Command::BlockByHash { hash } => {
            print_block(&db.get_block_record_by_hash(&cancel, &hash)?, false);
        }
        Command::Tx {
            hash,
            height,
            block_hash,
            index,
        } => {
            let tx = match (hash, height, block_hash, index) {
                (Some(hash), _, _, _) => db.get_tx_by_hash(&cancel, &hash)?,
                (None, Some(height), _, Some(index)) => {
                    db.get_tx_by_height_and_index(&cancel, height, index)?
                }
                (None, None, Some(block_hash), Some(index)) => {
                    db.get_tx_by_hash_and_index(&cancel, &block_hash, index)?
                }
                _ => return Err("pass --hash, or --height/--block-hash with --index".into()),
            };
            print_tx(&tx);
        }
        Command::Range { start, end } => {
            let mut stream = db.stream_block_range(start, end, &cancel)?;
            let mut count = 0usize;
            while let Some(item) = stream.next().await {
                let block = item?;
                println!("{:>10}  {} bytes", block.height, block.payload.len());
                count += 1;
            }
            let span = u64::from(end - start) + 1;
            println!(
                "{} {} of {} heights stored",
                "range:".bright_green().bold(),
                count,
                span
            );
        }
        Command::Rollback { height } => {
            let removed = db.rollback_to(&cancel, height)?;
            println!("{} removed {} blocks", "rollback:".bright_yellow().bold(), removed);
        }
    }

    Ok(())
}
