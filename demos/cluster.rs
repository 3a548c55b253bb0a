//! Cluster example demonstrating Bimodal Multicast dissemination.
//!
//! This example starts several nodes on an in-memory network with message
//! loss and latency, connects them as a star, and shows:
//! - A chat message spreading from one node to every other node
//! - Peer membership spreading through add-peer announcements
//! - Per-node statistics after convergence
//!
//! Run with: cargo run --example cluster
//!
//! Set `RUST_LOG=bimodal_multicast=debug` to watch individual rounds.

use bimodal_multicast::testing::{serve, ChaosConfig, MemoryNetwork, MemoryPeer};
use bimodal_multicast::{Bmmc, CallbackError, Config, Element};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const NODES: usize = 8;

/// Chat message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    from: String,
    text: String,
}

fn chat_callback(el: &Element) -> Result<(), CallbackError> {
    let msg: ChatMessage = serde_json::from_value(el.msg.clone())?;
    tracing::info!("<{}> {}", msg.from, msg.text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let network = MemoryNetwork::with_chaos(
        ChaosConfig::new()
            .with_message_loss_rate(0.1)
            .with_latency(Duration::from_millis(2))
            .with_jitter(Duration::from_millis(5)),
    );

    let mut nodes: Vec<Bmmc<MemoryPeer>> = Vec::with_capacity(NODES);
    for i in 0..NODES {
        let (peer, inbound) = network.register(format!("node-{}", i));
        let config = Config::new(peer, 256)
            .with_round_duration(Duration::from_millis(50))
            .with_callback("chat", chat_callback);
        let node = Bmmc::new(config)?;
        tokio::spawn(serve(node.clone(), inbound));
        node.start()?;
        nodes.push(node);
    }

    // Star topology: node-0 knows everyone, everyone knows node-0.
    for i in 1..NODES {
        nodes[0].add_peer(nodes[i].host())?;
        nodes[i].add_peer(nodes[0].host())?;
    }

    let started = Instant::now();
    nodes[NODES - 1].add_typed_message(
        &ChatMessage {
            from: nodes[NODES - 1].host().to_string(),
            text: "hello, everyone".into(),
        },
        "chat",
    )?;

    while !nodes.iter().all(|n| n.get_messages().len() == 1) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if started.elapsed() > Duration::from_secs(10) {
            println!("cluster did not converge within 10s");
            break;
        }
    }
    println!("converged in {:?}", started.elapsed());

    // Give membership announcements a few more rounds.
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!();
    println!("{:<8} {:>6} {:>6} {:>8} {:>8} {:>8}", "node", "round", "peers", "gossips", "syncs", "dups");
    for node in &nodes {
        let stats = node.stats();
        println!(
            "{:<8} {:>6} {:>6} {:>8} {:>8} {:>8}",
            node.host(),
            stats.round,
            stats.peers,
            stats.gossips_sent,
            stats.synchronizations_sent,
            stats.duplicates
        );
    }

    let net = network.stats();
    println!();
    println!(
        "network: {} envelopes, {} dropped, delivery rate {:.1}%",
        net.messages_total,
        net.messages_dropped,
        net.delivery_rate() * 100.0
    );

    for node in &nodes {
        node.stop();
    }
    Ok(())
}
