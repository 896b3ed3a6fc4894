//! Trestle CLI
//!
//! Resumable peer-to-peer file transfer over TCP: send a file to a paired
//! device, or listen and receive into a directory. Peers share a master key
//! provisioned once with `trestle pair`.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use config::Config;
use progress::{format_bytes, TransferProgress};
use trestle_crypto::{FileKeyStore, KeyManager, KeyStore, MASTER_KEY_LEN};
use trestle_engine::{
    Direction, StreamConnection, TransferReceiver, TransferSender, TransferSession,
};

/// Trestle - resumable peer-to-peer file transfer
#[derive(Parser)]
#[command(name = "trestle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file to a peer
    Send {
        /// File to send
        file: PathBuf,

        /// Peer address, host:port
        addr: String,

        /// Peer name the shared key is filed under
        #[arg(short, long, default_value = "default")]
        peer: String,

        /// Compress chunks before encryption
        #[arg(long)]
        compress: bool,

        /// Send in plaintext
        #[arg(long)]
        no_encrypt: bool,

        /// Cap the send rate, bytes per second
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Listen for incoming transfers
    Receive {
        /// Listen address
        #[arg(short, long, default_value = "0.0.0.0:7846")]
        bind: String,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Peer name the shared key is filed under
        #[arg(short, long, default_value = "default")]
        peer: String,

        /// Exit after one completed transfer
        #[arg(long)]
        once: bool,
    },

    /// Show the persisted transfer queue
    Queue,

    /// Manage shared peer keys
    #[command(subcommand)]
    Pair(PairAction),

    /// Show the active configuration
    Config,
}

#[derive(Subcommand)]
enum PairAction {
    /// Print the master key for a peer, generating one if needed
    Show {
        /// Peer name
        peer: String,
    },

    /// Install a master key provisioned on another device
    Import {
        /// Peer name
        peer: String,

        /// 64-character hex key
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.transfer_config().validate()?;

    match cli.command {
        Commands::Send {
            file,
            addr,
            peer,
            compress,
            no_encrypt,
            limit,
        } => send_file(file, addr, peer, compress, no_encrypt, limit, &config).await,
        Commands::Receive {
            bind,
            output,
            peer,
            once,
        } => receive_files(bind, output, peer, once, &config).await,
        Commands::Queue => queue_status(&config),
        Commands::Pair(action) => pair(action, &config).await,
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config)?;
            println!("# {}", Config::default_path().display());
            print!("{rendered}");
            Ok(())
        }
    }
}

fn key_manager(config: &Config) -> anyhow::Result<Arc<KeyManager>> {
    let store = FileKeyStore::new(config.key_dir())
        .with_context(|| format!("opening key store {}", config.key_dir().display()))?;
    Ok(Arc::new(KeyManager::new(Arc::new(store) as Arc<dyn KeyStore>)))
}

async fn send_file(
    file: PathBuf,
    addr: String,
    peer: String,
    compress: bool,
    no_encrypt: bool,
    limit: Option<u64>,
    config: &Config,
) -> anyhow::Result<()> {
    let mut transfer_config = config.transfer_config();
    if compress {
        transfer_config.compress = true;
    }
    if no_encrypt {
        transfer_config.encrypt = false;
    }
    if let Some(limit) = limit {
        transfer_config.max_transfer_speed = limit;
    }
    transfer_config.validate()?;

    let label = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("transfer")
        .to_owned();

    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    stream.set_nodelay(true)?;

    let session = TransferSession::new(Uuid::new_v4().to_string(), Direction::Send);
    let bar = TransferProgress::spawn(session.clone(), &label);

    let sender = TransferSender::new(transfer_config, key_manager(config)?);
    match sender
        .send_file(StreamConnection::new(stream), &file, &peer, &session)
        .await
    {
        Ok(metadata) => {
            bar.finish("sent").await;
            println!(
                "{} {} ({}) to {addr}",
                style("Sent").green().bold(),
                metadata.file_name,
                format_bytes(metadata.file_size),
            );
            Ok(())
        }
        Err(e) => {
            bar.finish("failed").await;
            Err(anyhow::Error::new(e).context(format!("sending {}", file.display())))
        }
    }
}

async fn receive_files(
    bind: String,
    output: Option<PathBuf>,
    peer: String,
    once: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| config.download_dir());
    tokio::fs::create_dir_all(&output)
        .await
        .with_context(|| format!("creating output directory {}", output.display()))?;

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    println!(
        "{} {} -> {}",
        style("Listening").cyan().bold(),
        listener.local_addr()?,
        output.display(),
    );

    let receiver = Arc::new(TransferReceiver::new(&output, key_manager(config)?));

    loop {
        let (stream, remote) = listener.accept().await?;
        stream.set_nodelay(true)?;
        tracing::debug!(%remote, "connection accepted");

        let receiver = Arc::clone(&receiver);
        let peer = peer.clone();
        let handle = tokio::spawn(async move {
            let session = TransferSession::new(Uuid::new_v4().to_string(), Direction::Receive);
            receiver
                .receive_file(StreamConnection::new(stream), &peer, &session)
                .await
        });

        if once {
            match handle.await? {
                Ok(path) => {
                    println!("{} {}", style("Received").green().bold(), path.display());
                    return Ok(());
                }
                Err(e) => return Err(anyhow::Error::new(e).context("receiving transfer")),
            }
        }

        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(path)) => {
                    println!("{} {}", style("Received").green().bold(), path.display());
                }
                Ok(Err(e)) => eprintln!("{} {e}", style("Transfer failed:").red().bold()),
                Err(e) => eprintln!("{} {e}", style("Transfer task panicked:").red().bold()),
            }
        });
    }
}

fn queue_status(config: &Config) -> anyhow::Result<()> {
    let entries = trestle_engine::QueueStore::new(config.queue_path())
        .load()
        .context("loading queue snapshot")?;
    if entries.is_empty() {
        println!("queue is empty");
        return Ok(());
    }

    for entry in entries {
        let progress = if entry.total_bytes > 0 {
            format!(
                "{}/{}",
                format_bytes(entry.bytes_transferred),
                format_bytes(entry.total_bytes),
            )
        } else {
            "-".to_owned()
        };
        println!(
            "{:36}  {:<12}  {:<7}  {:>19}  {}",
            entry.id,
            format!("{:?}", entry.state).to_lowercase(),
            format!("{:?}", entry.priority).to_lowercase(),
            progress,
            entry.file_path.display(),
        );
        if let Some(error) = &entry.last_error {
            println!("{:38}{}", "", style(error).red());
        }
    }
    Ok(())
}

async fn pair(action: PairAction, config: &Config) -> anyhow::Result<()> {
    let manager = key_manager(config)?;
    match action {
        PairAction::Show { peer } => {
            let key = manager.master_key(&peer).await?;
            println!("{}", hex::encode(key));
            eprintln!(
                "{} run `trestle pair import {peer} <key>` on the other device",
                style("Note:").yellow().bold(),
            );
            Ok(())
        }
        PairAction::Import { peer, key } => {
            let bytes = hex::decode(key.trim()).context("key is not valid hex")?;
            let key: [u8; MASTER_KEY_LEN] = bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("key must be {MASTER_KEY_LEN} bytes"))?;
            manager.import_master_key(&peer, key).await?;
            println!("{} key installed for {peer}", style("Paired").green().bold());
            Ok(())
        }
    }
}
