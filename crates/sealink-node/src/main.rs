//! `sealink`: run a Sealink node from the command line.
//!
//! ```text
//! sealink keygen --dir keys --name alice
//! sealink run --identity-dir keys --name alice --listen 0.0.0.0:12000 --peer 10.0.0.2:12001
//! sealink demo
//! ```

#![forbid(unsafe_code)]

mod config;
mod relay;

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sealink_core::{
    Engine, EngineConfig, IdentityStore, PemIdentity, RoutingMethod, Switch, SystemEnv,
};
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::NodeConfig,
    relay::{NodeHandler, run_relay},
};

type UdpEngine = Engine<UdpSocket, SystemEnv>;

#[derive(Parser)]
#[command(name = "sealink", about = "Authenticated, encrypted datagram tunnels", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an Ed25519 key and self-signed certificate
    Keygen(KeygenArgs),
    /// Run a node until Ctrl-C
    Run(RunArgs),
    /// Run alice, bob and chris on 127.0.0.1:12000-12002
    Demo,
}

#[derive(Args)]
struct KeygenArgs {
    #[arg(long, default_value = ".")]
    dir: PathBuf,
    #[arg(long)]
    name: String,
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding `<name>.crt` and `<name>.key`
    #[arg(long, default_value = ".")]
    identity_dir: PathBuf,
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "0.0.0.0:12000")]
    listen: SocketAddr,
    /// Peer to greet on startup; repeatable
    #[arg(long = "peer", value_name = "ADDR:PORT")]
    peers: Vec<SocketAddr>,
    /// Override `engine.workers`
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

const DEMO_BASE_PORT: u16 = 12000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Keygen(args) => keygen(&args),
        Command::Run(args) => run(args).await,
        Command::Demo => demo().await,
    }
}

fn keygen(args: &KeygenArgs) -> Result<()> {
    let identity = PemIdentity::generate(&args.name)?;
    identity
        .save(&args.dir, &args.name)
        .with_context(|| format!("failed to write identity to {}", args.dir.display()))?;
    println!(
        "wrote {} and {}",
        args.dir.join(format!("{}.crt", args.name)).display(),
        args.dir.join(format!("{}.key", args.name)).display()
    );
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let node_config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    let mut engine_config = node_config.engine_config();
    if let Some(workers) = args.workers {
        engine_config.workers = workers.max(1);
    }

    let identity = IdentityStore::load(&args.identity_dir, &args.name)
        .with_context(|| format!("cannot load identity {:?}", args.name))?;
    let engine = start_node(
        &args.name,
        identity,
        args.listen,
        engine_config,
        node_config.trust.subjects.clone(),
        node_config.routing_method(),
    )
    .await?;

    for peer in args.peers {
        spawn_greet(&engine, peer);
    }

    shutdown_on_ctrl_c(&[engine]).await
}

async fn demo() -> Result<()> {
    let names = ["alice", "bob", "chris"];
    let mut engines = Vec::with_capacity(names.len());
    for (name, port) in names.into_iter().zip(DEMO_BASE_PORT..) {
        let identity = IdentityStore::generate(name)?;
        let listen = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let config = EngineConfig { workers: 2, ..EngineConfig::default() };
        engines.push(
            start_node(name, identity, listen, config, Vec::new(), RoutingMethod::LearningSwitch)
                .await?,
        );
    }

    let bob = SocketAddr::from((Ipv4Addr::LOCALHOST, DEMO_BASE_PORT + 1));
    let (alice, chris) = (&engines[0], &engines[2]);
    alice.greet(bob).await.context("alice could not reach bob")?;
    chris.greet(bob).await.context("chris could not reach bob")?;

    // Give both session handshakes a moment, then broadcast an Ethernet frame
    // from alice; bob's switch floods it to chris.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let mut frame = vec![0xff; 6];
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x0a]);
    frame.extend_from_slice(&[0x88, 0xb5]);
    frame.extend_from_slice(b"hello from alice");
    alice.send_data(bob, &frame).await.context("alice could not send")?;
    info!("demo running, press Ctrl-C to stop");

    shutdown_on_ctrl_c(&engines).await
}

async fn start_node(
    name: &str,
    identity: IdentityStore,
    listen: SocketAddr,
    config: EngineConfig,
    trusted_subjects: Vec<String>,
    routing: RoutingMethod,
) -> Result<UdpEngine> {
    let socket =
        UdpSocket::bind(listen).await.with_context(|| format!("cannot bind {listen}"))?;
    let (handler, relay_events) = NodeHandler::new(name, trusted_subjects);
    let engine = Engine::spawn(identity, socket, SystemEnv, config, handler);

    let switch = Arc::new(Switch::new(routing));
    tokio::spawn(run_relay(name.to_string(), engine.clone(), switch, relay_events));

    info!(node = name, local = %engine.local_addr()?, "node listening");
    Ok(engine)
}

fn spawn_greet(engine: &UdpEngine, peer: SocketAddr) {
    let engine = engine.clone();
    tokio::spawn(async move {
        if let Err(error) = engine.greet(peer).await {
            warn!(%peer, %error, "peer unreachable");
        }
    });
}

async fn shutdown_on_ctrl_c(engines: &[UdpEngine]) -> Result<()> {
    tokio::signal::ctrl_c().await.context("cannot listen for Ctrl-C")?;
    info!("shutting down");
    for engine in engines {
        engine.close();
    }
    for engine in engines {
        engine.join().await;
    }
    Ok(())
}
