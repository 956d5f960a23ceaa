//! Umbra overlay daemon.
//!
//! Binds a UDP socket and drives a [`PeerMgt`] with the two-call contract:
//! every received datagram goes through `handle_incoming`, and the outbound
//! scheduler is drained whenever the socket is writable. The manager itself
//! is synchronous; tokio only multiplexes the socket and timers.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use umbra_core::{PeerAddr, PeerMgt, PeerMgtConfig, DGRAM_MAX, FLAG_RELAY, FLAG_USERDATA};
use umbra_crypto::NodeKey;

/// Umbra - authenticated encrypted peer-to-peer overlay
#[derive(Parser)]
#[command(name = "umbra")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "umbra.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the overlay daemon
    Run {
        /// Override the listen address
        #[arg(short, long)]
        bind: Option<String>,

        /// Override the network name
        #[arg(short, long)]
        network: Option<String>,

        /// Additional bootstrap peers (host:port)
        #[arg(short, long)]
        peer: Vec<String>,
    },

    /// Generate a new identity key file
    Keygen {
        /// Output file for the identity secret
        #[arg(short, long, default_value = "umbra.key")]
        output: PathBuf,
    },

    /// Print a default configuration file
    ExampleConfig,
}

fn init_logging(cli_verbose: bool, configured: &str) {
    let fallback = if cli_verbose { "debug" } else { configured };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_or_create_key(path: &PathBuf) -> anyhow::Result<NodeKey> {
    if path.exists() {
        let key = NodeKey::load(path).context("loading identity key")?;
        Ok(key)
    } else {
        let key = NodeKey::generate();
        key.save(path).context("writing identity key")?;
        info!(path = %path.display(), "generated new identity");
        Ok(key)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::ExampleConfig => {
            println!("{}", Config::example());
            Ok(())
        }
        Commands::Keygen { output } => {
            let key = NodeKey::generate();
            key.save(&output).context("writing identity key")?;
            println!("{}", key.node_id());
            Ok(())
        }
        Commands::Run {
            bind,
            network,
            peer,
        } => {
            let mut config = if cli.config.exists() {
                Config::load(&cli.config).context("loading configuration")?
            } else {
                Config::default()
            };
            if let Some(bind) = bind {
                config.network.listen_addr = bind;
            }
            if let Some(network) = network {
                config.overlay.network = network;
            }
            config.overlay.peers.extend(peer);
            init_logging(cli.verbose, &config.logging.level);
            run(config).await
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let node_key = load_or_create_key(&config.node.key_file)?;
    let node_id = node_key.node_id();

    let mgt_config = PeerMgtConfig::new(config.node.peer_slots, config.node.auth_slots, node_key);
    let mut mgt = PeerMgt::new(&mgt_config).context("building peer manager")?;
    mgt.set_netname(&config.overlay.network);
    mgt.set_password(config.overlay.password.as_bytes());
    mgt.set_loopback(config.overlay.loopback);
    mgt.set_fragmentation(config.overlay.fragmentation);
    mgt.set_fastauth(config.overlay.fastauth);

    let mut flags = 0u16;
    if config.overlay.userdata {
        flags |= FLAG_USERDATA;
    }
    if config.overlay.relay {
        flags |= FLAG_RELAY;
    }
    mgt.set_flags(flags);

    let socket = UdpSocket::bind(&config.network.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.network.listen_addr))?;
    info!(
        node_id = %node_id,
        listen = %socket.local_addr()?,
        network = %config.overlay.network,
        "umbra daemon up"
    );

    for peer in &config.overlay.peers {
        match tokio::net::lookup_host(peer).await {
            Ok(mut addrs) => {
                if let Some(addr) = addrs.next() {
                    if mgt.connect(PeerAddr::Direct(addr)) {
                        info!(peer = %addr, "dialing bootstrap peer");
                    }
                }
            }
            Err(err) => warn!(peer = %peer, %err, "cannot resolve bootstrap peer"),
        }
    }

    let mut recv_buf = [0u8; DGRAM_MAX];
    let mut send_buf = [0u8; DGRAM_MAX];
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    let status_every = config.logging.status_interval;
    let mut last_status = std::time::Instant::now();

    loop {
        tokio::select! {
            received = socket.recv_from(&mut recv_buf) => {
                let (len, src): (usize, SocketAddr) = received?;
                mgt.handle_incoming(&recv_buf[..len], PeerAddr::Direct(src));
            }
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }

        // drain the scheduler, bounded per wakeup
        for _ in 0..32 {
            let Some((len, target)) = mgt.take_next_outgoing(&mut send_buf) else {
                break;
            };
            match target {
                PeerAddr::Direct(addr) => {
                    if let Err(err) = socket.send_to(&send_buf[..len], addr).await {
                        warn!(%addr, %err, "send failed");
                    }
                }
                // indirect targets are encapsulated inside the manager;
                // anything still internal here is undeliverable
                other => debug!(addr = %other, "dropping undeliverable datagram"),
            }
        }

        while let Some(msg) = mgt.recv_userdata() {
            info!(
                from = %msg.from_peer_id,
                len = msg.data.len(),
                "userdata received"
            );
        }

        if status_every > 0 && last_status.elapsed().as_secs() >= status_every {
            last_status = std::time::Instant::now();
            debug!("status:\n{}", mgt.status().trim_end_matches('\0'));
        }
    }
}
