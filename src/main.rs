use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use raft_lite::{ApplyMsg, LocalNetwork, MemoryPersister, RaftConfig, RaftNode};

#[derive(Parser, Debug)]
#[command(name = "raft-lite")]
#[command(about = "An in-process Raft cluster demo")]
struct Args {
    /// Number of peers in the cluster
    #[arg(long, default_value = "3")]
    nodes: u64,

    /// Number of commands to submit once a leader is elected
    #[arg(long, default_value = "10")]
    commands: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let ids: Vec<u64> = (1..=args.nodes).collect();
    let network = LocalNetwork::new();

    let mut nodes = HashMap::new();
    let mut apply_rxs = HashMap::new();
    for &id in &ids {
        let peers: Vec<u64> = ids.iter().copied().filter(|&p| p != id).collect();
        let (apply_tx, apply_rx) = mpsc::channel(64);
        let node = RaftNode::new(
            id,
            peers,
            RaftConfig::default(),
            network.endpoint(id),
            Arc::new(MemoryPersister::new()),
            apply_tx,
        )?;
        network.register(id, Arc::clone(&node)).await;
        node.spawn();
        nodes.insert(id, node);
        apply_rxs.insert(id, apply_rx);
    }

    tracing::info!(nodes = args.nodes, "Cluster started, waiting for a leader");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received ctrl-c, shutting down");
        }
        _ = run_demo(&args, &nodes, &mut apply_rxs) => {}
    }

    for node in nodes.values() {
        node.kill();
    }
    Ok(())
}

/// Elect a leader, submit the requested commands, and print what each node
/// applied.
async fn run_demo(
    args: &Args,
    nodes: &HashMap<u64, Arc<RaftNode>>,
    apply_rxs: &mut HashMap<u64, mpsc::Receiver<ApplyMsg>>,
) {
    let leader = loop {
        let mut found = None;
        for node in nodes.values() {
            if node.is_leader().await {
                found = Some(Arc::clone(node));
                break;
            }
        }
        match found {
            Some(leader) => break leader,
            None => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    };
    tracing::info!(leader_id = leader.id, "Leader elected");

    for i in 0..args.commands {
        let command = format!("command-{i}").into_bytes();
        match leader.start(command).await {
            Ok((index, term)) => tracing::info!(index, term, "Submitted command"),
            Err(e) => tracing::warn!(error = %e, "Submission failed"),
        }
    }

    for (&id, apply_rx) in apply_rxs.iter_mut() {
        let mut applied = Vec::new();
        while applied.len() < args.commands as usize {
            match tokio::time::timeout(Duration::from_secs(5), apply_rx.recv()).await {
                Ok(Some(msg)) => applied.push(msg),
                _ => break,
            }
        }
        let commands: Vec<String> = applied
            .iter()
            .map(|m| String::from_utf8_lossy(&m.command).into_owned())
            .collect();
        println!("node {id} applied {} commands: {commands:?}", applied.len());
    }
}
