//! LanShare CLI
//!
//! Find devices on the local network and move files and folders between them.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::{Term, style};
use lanshare_core::{Engine, ReceiverState, SenderState, TransferReceiver, TransferSender};
use lanshare_transport::DEFAULT_PING_TIMEOUT;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration, format_rate, spinner};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// LanShare - send files to devices on your local network
#[derive(Parser)]
#[command(name = "lanshare")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path [default: <config dir>/lanshare/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file or folder to a receiver
    Send {
        /// File or folder to send
        path: PathBuf,

        /// Receiver address as host:port
        target: String,

        /// Name to show the receiver [default: device name from config]
        #[arg(long)]
        name: Option<String>,

        /// Data frame size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Wait for a sender and receive one transfer
    Receive {
        /// Output directory [default: transfer.output_dir from config]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fixed TCP port [default: first free of 42424-42434]
        #[arg(short, long)]
        port: Option<u16>,

        /// Accept without asking
        #[arg(short, long)]
        yes: bool,

        /// Do not announce this receiver on the network
        #[arg(long)]
        no_announce: bool,
    },

    /// List devices announcing themselves on the network
    Discover {
        /// UDP discovery port [default: discovery.port from config]
        #[arg(short, long)]
        port: Option<u16>,

        /// Local interface address to announce from
        #[arg(long)]
        bind_ip: Option<Ipv4Addr>,

        /// How long to listen
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,

        /// Print peers as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether something accepts TCP connections at host:port
    Ping {
        /// Address as host:port
        target: String,
    },

    /// Hold a TCP port open so another device can ping it
    Probe {
        /// Port to bind (0 picks one)
        port: u16,
    },

    /// Print a freshly generated device ID
    Id,

    /// Print a six-digit pairing code
    PairingCode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("cannot load config from {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug".to_string()
        } else {
            config.logging.level.to_lowercase()
        })
        .init();

    config.validate()?;

    match cli.command {
        Commands::Send {
            path,
            target,
            name,
            chunk_size,
        } => send(path, &target, name, chunk_size, &config).await,
        Commands::Receive {
            output,
            port,
            yes,
            no_announce,
        } => receive(output, port, yes, !no_announce, &config).await,
        Commands::Discover {
            port,
            bind_ip,
            seconds,
            json,
        } => discover(port, bind_ip, Duration::from_secs(seconds), json, &config).await,
        Commands::Ping { target } => ping(&target).await,
        Commands::Probe { port } => probe(port).await,
        Commands::Id => {
            let engine = Engine::new(&config.device.name, config.engine_config())?;
            println!("{}", engine.device_id());
            Ok(())
        }
        Commands::PairingCode => {
            println!("{}", lanshare_core::generate_pairing_code());
            Ok(())
        }
    }
}

async fn resolve(target: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(target)
        .await
        .with_context(|| format!("cannot resolve {target} (expected host:port)"))?
        .next()
        .with_context(|| format!("no address found for {target}"))
}

// ═══════════════════════════════════════════════════════════════════════════
// send
// ═══════════════════════════════════════════════════════════════════════════

async fn send(
    path: PathBuf,
    target: &str,
    name: Option<String>,
    chunk_size: Option<usize>,
    config: &Config,
) -> anyhow::Result<()> {
    let addr = resolve(target).await?;
    let sender = TransferSender::with_config(&path, &config.engine_config().transfer)?;
    if let Some(bytes) = chunk_size {
        sender.set_chunk_size(bytes)?;
    }
    let name = name.unwrap_or_else(|| config.device.name.clone());

    println!(
        "{} {} ({}{})",
        style("Sending").bold(),
        sender.file_name(),
        format_bytes(sender.file_size()),
        if sender.is_folder() { ", folder" } else { "" }
    );
    println!("{} {addr}", style("To").bold());

    let waiting = spinner("Waiting for the receiver to accept...");
    let mut task = {
        let sender = sender.clone();
        tokio::spawn(async move { sender.start(addr, &name).await })
    };

    let mut bar: Option<TransferProgress> = None;
    let mut started = Instant::now();
    let result = loop {
        tokio::select! {
            joined = &mut task => break joined.context("sender task failed")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; cancelling");
                sender.cancel();
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                if bar.is_none() && sender.state() == SenderState::Streaming {
                    waiting.finish_and_clear();
                    started = Instant::now();
                    bar = Some(TransferProgress::new(sender.file_size(), sender.file_name()));
                }
                if let Some(bar) = &bar {
                    bar.update(sender.bytes_sent());
                }
            }
        }
    };
    waiting.finish_and_clear();

    match result {
        Ok(()) => {
            let elapsed = started.elapsed();
            if let Some(bar) = &bar {
                bar.finish(format!("{} verified by receiver", sender.file_name()));
            }
            let moved = sender.file_size() - sender.resumed_from();
            println!(
                "{} {} in {} ({})",
                style("Sent").green().bold(),
                format_bytes(moved),
                format_duration(elapsed),
                format_rate(moved, elapsed)
            );
            if sender.resumed_from() > 0 {
                println!(
                    "{} first {} were already at the receiver",
                    style("Resumed:").bold(),
                    format_bytes(sender.resumed_from())
                );
            }
            if let Some(checksum) = sender.checksum() {
                println!("{} {checksum}", style("BLAKE3").bold());
            }
            Ok(())
        }
        Err(e) => {
            if let Some(bar) = &bar {
                bar.abandon(e.to_string());
            }
            if e.should_retry() {
                println!(
                    "{} the receiver may not be listening yet; run the same command again once it is",
                    style("Hint:").yellow()
                );
            } else if e.is_transient() {
                println!(
                    "{} the network stalled; a retried file send continues from what the receiver kept",
                    style("Hint:").yellow()
                );
            }
            Err(e.into())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// receive
// ═══════════════════════════════════════════════════════════════════════════

async fn receive(
    output: Option<PathBuf>,
    port: Option<u16>,
    yes: bool,
    announce: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| config.transfer.output_dir.clone());
    std::fs::create_dir_all(&output)
        .with_context(|| format!("cannot create {}", output.display()))?;

    let mut engine_config = config.engine_config();
    engine_config.transfer.listen_port = port;
    let engine = Engine::new(&config.device.name, engine_config)?;

    let receiver = engine.receiver();
    let port = receiver.start().await?;
    println!(
        "{} on TCP {port} as {:?}, saving to {}",
        style("Listening").bold(),
        engine.device_name(),
        output.display()
    );

    if announce {
        engine.advertise_port(port).await;
        if let Err(e) = engine
            .start_discovery(config.discovery.port, config.discovery.bind_ip)
            .await
        {
            tracing::warn!(error = %e, "not announcing; senders must use this address directly");
        }
    }

    let result = receive_one(&receiver, &output, yes).await;
    receiver.stop().await;
    if let Err(e) = engine.stop_discovery().await {
        tracing::debug!(error = %e, "discovery shutdown");
    }
    result
}

async fn receive_one(receiver: &TransferReceiver, output: &Path, yes: bool) -> anyhow::Result<()> {
    let term = Term::stdout();
    let mut bar: Option<TransferProgress> = None;
    let mut started = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if let Some(bar) = &bar {
                    bar.abandon("interrupted".to_string());
                }
                println!("Stopped");
                return Ok(());
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        match receiver.state() {
            ReceiverState::AwaitingAccept => {
                let Some(pending) = receiver.pending() else {
                    continue;
                };
                if let Some(previous) = bar.take() {
                    previous.abandon("sender went away".to_string());
                }
                println!(
                    "\n{} wants to send {} {:?} ({})",
                    style(&pending.sender_name).cyan().bold(),
                    if pending.is_folder { "folder" } else { "file" },
                    pending.file_name,
                    format_bytes(pending.file_size)
                );

                let accepted = yes || confirm(&term).await?;
                let answer = if accepted {
                    receiver.accept(output)
                } else {
                    receiver.reject()
                };
                match answer {
                    Ok(()) if accepted => {
                        started = Instant::now();
                        bar = Some(TransferProgress::new(pending.file_size, &pending.file_name));
                    }
                    Ok(()) => println!("Rejected; still listening"),
                    Err(e) => println!("{} {e}", style("Could not answer:").yellow()),
                }
            }
            ReceiverState::Receiving => {
                if let Some(bar) = &bar {
                    bar.update(receiver.bytes_received());
                }
            }
            ReceiverState::Completed => {
                let elapsed = started.elapsed();
                let bytes = receiver.bytes_received();
                if let Some(bar) = &bar {
                    bar.finish("verified".to_string());
                }
                println!(
                    "{} {} in {} ({})",
                    style("Received").green().bold(),
                    format_bytes(bytes),
                    format_duration(elapsed),
                    format_rate(bytes, elapsed)
                );
                if let Some(path) = receiver.saved_path() {
                    println!("{} {}", style("Saved to").bold(), path.display());
                }
                if let Some(checksum) = receiver.checksum() {
                    println!("{} {checksum}", style("BLAKE3").bold());
                }
                return Ok(());
            }
            ReceiverState::Error => {
                let reason = receiver
                    .last_error()
                    .map_or_else(|| "unknown error".to_string(), |e| e.to_string());
                if let Some(bar) = &bar {
                    bar.abandon(reason.clone());
                }
                anyhow::bail!("transfer failed: {reason}");
            }
            ReceiverState::Idle | ReceiverState::Listening => {}
        }
    }
}

async fn confirm(term: &Term) -> anyhow::Result<bool> {
    term.write_str("Accept? [y/N] ")?;
    let term = term.clone();
    let answer = tokio::task::spawn_blocking(move || term.read_line()).await??;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

// ═══════════════════════════════════════════════════════════════════════════
// discover / ping / probe
// ═══════════════════════════════════════════════════════════════════════════

async fn discover(
    port: Option<u16>,
    bind_ip: Option<Ipv4Addr>,
    wait: Duration,
    json: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let engine = Engine::new(&config.device.name, config.engine_config())?;
    let port = port.unwrap_or(config.discovery.port);
    let bind_ip = bind_ip.or(config.discovery.bind_ip);

    engine
        .start_discovery(port, bind_ip)
        .await
        .with_context(|| format!("cannot listen for peers on UDP {port}"))?;

    let waiting = (!json).then(|| spinner(&format!("Listening for peers on UDP {port}...")));
    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    if let Some(waiting) = waiting {
        waiting.finish_and_clear();
    }
    engine.stop_discovery().await?;

    let peers = engine.peers();
    if json {
        println!("{}", serde_json::to_string_pretty(&peers)?);
        return Ok(());
    }
    if peers.is_empty() {
        println!("No peers found");
        return Ok(());
    }
    for peer in &peers {
        println!(
            "  {:<24} {:<21} {}",
            peer.device_name,
            peer.socket_addr().to_string(),
            style(&peer.device_id).dim()
        );
    }
    Ok(())
}

async fn ping(target: &str) -> anyhow::Result<()> {
    let addr = resolve(target).await?;
    if lanshare_transport::ping_async(addr, DEFAULT_PING_TIMEOUT).await {
        println!("{addr} is reachable");
        Ok(())
    } else {
        anyhow::bail!("{addr} did not answer within {}", format_duration(DEFAULT_PING_TIMEOUT))
    }
}

async fn probe(port: u16) -> anyhow::Result<()> {
    let addr = lanshare_transport::start_server(port)?;
    println!("Holding TCP port {} open; Ctrl+C to stop", addr.port());
    tokio::signal::ctrl_c().await?;
    lanshare_transport::stop_server(addr.port());
    Ok(())
}
