//! peerdrop - direct peer-to-peer file transfer

use anyhow::Result;
use clap::{Parser, Subcommand};
use peerdrop_client::config::{expand_path, Config};
use peerdrop_client::transfer::OutgoingFile;
use peerdrop_client::{
    rtc, HandshakeState, Integrity, PeerTarget, RelayLink, SendOutcome, SessionController,
    SessionEvent, SessionOrigin,
};
use peerdrop_core::ConnectionStatus;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "peerdrop")]
#[command(about = "Direct peer-to-peer file transfer", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.peerdrop/config.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Signaling relay URL (overrides config)
    #[arg(long)]
    relay: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file to a peer
    Send {
        /// Path to the file to send
        #[arg(required = true)]
        file: PathBuf,

        /// Peer id or shareable link; without it, wait for the peer to connect
        #[arg(short, long)]
        peer: Option<String>,
    },

    /// Receive a file from a peer
    Receive {
        /// Peer id or shareable link; without it, wait for the peer to connect
        #[arg(short, long)]
        peer: Option<String>,

        /// Directory to save the file in (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Initialize configuration
    Init,
}

enum Task {
    Send(OutgoingFile),
    Receive(PathBuf),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let mut config = Config::load_or_default(&expand_path(&cli.config))?;
    if let Some(relay) = cli.relay {
        config.relay_url = relay;
    }

    match cli.command {
        Commands::Send { file, peer } => {
            if !file.exists() {
                anyhow::bail!("File not found: {}", file.display());
            }
            let outgoing = OutgoingFile::open(&file).await?;
            run_session(&config, peer.as_deref(), Task::Send(outgoing)).await?;
        }
        Commands::Receive { peer, output } => {
            let dir = output.unwrap_or_else(|| config.download_dir());
            run_session(&config, peer.as_deref(), Task::Receive(dir)).await?;
        }
        Commands::Init => {
            init_config().await?;
        }
    }

    Ok(())
}

async fn run_session(config: &Config, peer: Option<&str>, task: Task) -> Result<()> {
    let origin = match peer {
        Some(peer) => SessionOrigin::SharedLink(PeerTarget::parse(peer)?.into_id()),
        None => SessionOrigin::Direct,
    };

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (peer_connection, channel) = rtc::create(config, events_tx.clone()).await?;
    let channel = Arc::new(channel);
    let relay = RelayLink::connect(&config.relay_url, events_tx).await?;
    let mut session = SessionController::new(origin, peer_connection, channel.clone(), relay)
        .with_share_origin(&config.share_origin);

    let (mut outgoing, download_dir) = match task {
        Task::Send(file) => (Some(file), None),
        Task::Receive(dir) => (None, Some(dir)),
    };
    let mut announced = false;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };
        let Some(event) = event else {
            break;
        };
        let relay_closed = event == SessionEvent::RelayClosed;

        if let Some(file) = session.handle_event(event).await {
            if let Some(dir) = &download_dir {
                let path = file.save_to(dir).await?;
                println!("Received: {} ({} bytes)", file.name, file.size());
                println!("Saved to: {}", path.display());
                println!("BLAKE3: {}", file.digest());
                if let Integrity::SizeMismatch { declared, received } = file.integrity() {
                    println!(
                        "Warning: sender announced {} bytes, received {}",
                        declared, received
                    );
                }
                break;
            }
        }

        let snapshot = session.snapshot();
        if !announced {
            if let Some(id) = &snapshot.local_id {
                announced = true;
                println!("Your id: {}", id);
                if let Some(link) = &snapshot.share_link {
                    println!("Share link: {}", link);
                }
            }
        }

        if snapshot.status == ConnectionStatus::Connected {
            if let Some(file) = outgoing.take() {
                if let Some(remote) = &snapshot.remote_id {
                    println!("Connected to {}", remote);
                }
                let outcome = session.send_file(&file.metadata, file.file).await?;
                channel.wait_for_drain().await;
                if let SendOutcome::Sent { bytes, chunks } = outcome {
                    println!(
                        "Sent: {} ({} bytes, {} chunks)",
                        file.metadata.name, bytes, chunks
                    );
                }
                break;
            }
        }

        if snapshot.handshake == HandshakeState::Closed {
            anyhow::bail!("Connection to peer closed");
        }
        if relay_closed && snapshot.status != ConnectionStatus::Connected {
            anyhow::bail!("Lost connection to relay at {}", config.relay_url);
        }
    }

    session.close().await?;
    Ok(())
}

async fn init_config() -> Result<()> {
    let config_dir = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?
        .join(".peerdrop");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        tracing::info!("Created config directory: {}", config_dir.display());
    }

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        return Ok(());
    }

    let config = Config::default();
    let toml = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, toml)?;

    println!("Initialized peerdrop at: {}", config_dir.display());

    Ok(())
}
