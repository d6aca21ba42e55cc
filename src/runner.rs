//! Command-line runner for an RTI server node.

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use accord_server::{serve, ServerOptions};

#[derive(Debug, Parser)]
#[command(name = "accord-rti", about = "accord RTI server node")]
pub struct Args {
    /// Address to listen on for federates and child servers.
    #[arg(long, default_value = "127.0.0.1:14321")]
    pub listen: SocketAddr,

    /// Address of the parent server node. Without it this node is the root
    /// server of its tree.
    #[arg(long)]
    pub parent: Option<SocketAddr>,

    /// Name this node reports in the connect handshake.
    #[arg(long, default_value = "accord-rti")]
    pub name: String,

    /// Refuse time regulation for federates on this node.
    #[arg(long)]
    pub deny_time_regulation: bool,
}

/// Run a server node until the process is stopped.
pub async fn run(args: Args) -> anyhow::Result<()> {
    let options = ServerOptions {
        name: args.name,
        permit_time_regulation: !args.deny_time_regulation,
    };
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;

    let handles = serve(options, listener, args.parent)
        .await
        .context("starting server node")?;

    tracing::info!(addr = %handles.local_addr, "RTI node running.");
    handles.node_handle.await.context("node task failed")?;
    Ok(())
}
