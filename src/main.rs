use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use message_broker::config::ClusterFile;
use message_broker::consensus::{ConsensusEngine, Core, TimeoutConfig};
use message_broker::node;
use message_broker::http;
use message_broker::transport::HttpTransport;

/// A single node in a replicated, topic-partitioned message broker.
#[derive(Parser, Debug)]
#[command(name = "broker", about = "Raft-replicated message broker node")]
struct Cli {
    /// Path to the JSON cluster file listing every member's address.
    path_to_config: std::path::PathBuf,

    /// This node's position (0-based) in the cluster file's address list.
    index: usize,
}

/// Fatal configuration errors (spec §7f) are reported via `anyhow` at this
/// boundary and translate to a non-zero exit; everything below `run` uses
/// `BrokerError`/`TransportError` for the recoverable kinds.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "broker=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "fatal error during startup");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cluster = ClusterFile::load(&cli.path_to_config.to_string_lossy())
        .with_context(|| format!("loading cluster config from {}", cli.path_to_config.display()))?;

    let node_id = cli.index as u64;
    let own_addr = *cluster.address_for(cli.index).context("resolving this node's own address")?;

    let mut peer_addrs = HashMap::new();
    let mut peer_ids = Vec::new();
    for (i, addr) in cluster.addresses.iter().enumerate() {
        if i == cli.index {
            continue;
        }
        let peer_id = i as u64;
        peer_addrs.insert(peer_id, *addr);
        peer_ids.push(peer_id);
    }

    let (election_min, election_max) = cluster.election_timeout_range();
    let timeouts = TimeoutConfig {
        election: node::ElectionTimeoutRange { min: election_min, max: election_max },
        tick_interval: cluster.tick_interval(),
        heartbeat_interval: cluster.heartbeat_interval(),
        rpc_timeout: cluster.rpc_timeout(),
        fanout_pool_size: cluster.fanout_pool_size,
    };

    let core = Arc::new(Core::new(node_id, peer_ids, timeouts));
    let http_client =
        reqwest::Client::builder().timeout(cluster.rpc_timeout()).build().context("building peer RPC client")?;
    let transport = Arc::new(HttpTransport::new(http_client, peer_addrs));
    let engine = Arc::new(ConsensusEngine::new(core, transport));

    tokio::spawn(engine.clone().run());

    let app = http::create_app(engine);
    let bind_addr: SocketAddr =
        format!("0.0.0.0:{}", own_addr.port).parse().context("constructing bind address")?;

    tracing::info!(node = node_id, %bind_addr, "starting broker node");
    let listener = tokio::net::TcpListener::bind(bind_addr).await.context("binding HTTP listener")?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("serving HTTP")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}
