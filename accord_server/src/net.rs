//! TCP front end of a server node.
//!
//! One task owns the [`ServerNode`]; per-connect reader tasks funnel every
//! decoded message into its command queue and a writer task drains the
//! per-connect sender onto the framed socket. This keeps all state mutation
//! serialized while the sockets run concurrently.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Framed;

use accord_core::{ConnectHandle, RtiError};
use accord_model::{codec, ConnectKind, RtiMsg};

use crate::connect::MessageSender;
use crate::node::{ServerNode, ServerOptions};

/// Everything the node task can be asked to do.
enum NodeCommand {
    Register {
        name: String,
        kind: ConnectKind,
        sender: MessageSender,
        reply: oneshot::Sender<Result<ConnectHandle, RtiError>>,
    },
    Incoming(ConnectHandle, RtiMsg),
    Closed(ConnectHandle),
}

/// Handles of a running server node.
pub struct ServerHandles {
    pub local_addr: SocketAddr,
    pub node_handle: JoinHandle<()>,
    pub listener_handle: JoinHandle<()>,
}

/// Start a server node on `listener`. With a `parent_addr` the node joins an
/// existing server tree as a child; without one it is the root server.
pub async fn serve(
    options: ServerOptions,
    listener: TcpListener,
    parent_addr: Option<SocketAddr>,
) -> Result<ServerHandles, RtiError> {
    let local_addr = listener
        .local_addr()
        .map_err(|err| RtiError::TransportError(err.to_string()))?;
    tracing::info!(%local_addr, name = %options.name, "Server node listening.");

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let mut node = ServerNode::new(options.clone());

    if let Some(parent_addr) = parent_addr {
        connect_to_parent(&options, parent_addr, &mut node, command_tx.clone()).await?;
    }

    let node_handle = tokio::spawn(run_node(node, command_rx));
    let listener_handle = tokio::spawn(accept_loop(listener, command_tx));

    Ok(ServerHandles {
        local_addr,
        node_handle,
        listener_handle,
    })
}

/// The single task that owns the node state.
async fn run_node(mut node: ServerNode, mut commands: mpsc::UnboundedReceiver<NodeCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            NodeCommand::Register {
                name,
                kind,
                sender,
                reply,
            } => {
                let _ = reply.send(node.insert_connect(name, kind, sender));
            }
            NodeCommand::Incoming(connect, msg) => node.dispatch(connect, msg),
            NodeCommand::Closed(connect) => {
                tracing::info!(?connect, "Connect closed.");
                node.erase_connect(connect);
            }
        }
    }
}

async fn connect_to_parent(
    options: &ServerOptions,
    parent_addr: SocketAddr,
    node: &mut ServerNode,
    command_tx: mpsc::UnboundedSender<NodeCommand>,
) -> Result<(), RtiError> {
    tracing::info!(%parent_addr, "Connecting to parent server.");
    let socket = TcpStream::connect(parent_addr)
        .await
        .map_err(|err| RtiError::TransportError(err.to_string()))?;
    let mut frame = Framed::new(socket, codec::create::<RtiMsg>());

    frame
        .send(RtiMsg::ConnectRequest {
            name: options.name.clone(),
            kind: ConnectKind::Node,
        })
        .await
        .map_err(|err| RtiError::TransportError(err.to_string()))?;
    let parent_name = match frame.next().await {
        Some(Ok(RtiMsg::ConnectResponse { node_name })) => node_name,
        other => {
            tracing::error!(?other, "Parent did not answer the connect handshake.");
            return Err(RtiError::ConnectionFailed);
        }
    };
    tracing::info!(%parent_name, "Connected to parent server.");

    let (sender, receiver) = mpsc::unbounded_channel();
    let parent_handle = node.insert_parent_connect(parent_name, sender)?;

    let (sink, stream) = frame.split();
    tokio::spawn(UnboundedReceiverStream::new(receiver).map(Ok).forward(sink));
    tokio::spawn(read_loop(stream, parent_handle, command_tx));
    Ok(())
}

async fn accept_loop(listener: TcpListener, command_tx: mpsc::UnboundedSender<NodeCommand>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                tracing::info!(%peer_addr, "Accepted connection.");
                tokio::spawn(handle_connection(socket, command_tx.clone()));
            }
            Err(err) => {
                tracing::error!(%err, "Failed to accept a connection.");
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, command_tx: mpsc::UnboundedSender<NodeCommand>) {
    let mut frame = Framed::new(socket, codec::create::<RtiMsg>());

    // The peer introduces itself before anything else happens.
    let (name, kind) = match frame.next().await {
        Some(Ok(RtiMsg::ConnectRequest { name, kind })) => (name, kind),
        other => {
            tracing::warn!(?other, "Peer did not start with a connect handshake.");
            let _ = frame.close().await;
            return;
        }
    };

    let (sender, receiver) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    if command_tx
        .send(NodeCommand::Register {
            name: name.clone(),
            kind,
            sender,
            reply: reply_tx,
        })
        .is_err()
    {
        let _ = frame.close().await;
        return;
    }
    let connect = match reply_rx.await {
        Ok(Ok(connect)) => connect,
        _ => {
            tracing::error!("Node refused the connect.");
            let _ = frame.close().await;
            return;
        }
    };

    // Replaying the handshake through the node produces the response on the
    // freshly registered sender.
    let _ = command_tx.send(NodeCommand::Incoming(
        connect,
        RtiMsg::ConnectRequest { name, kind },
    ));

    let (sink, stream) = frame.split();
    let writer = tokio::spawn(UnboundedReceiverStream::new(receiver).map(Ok).forward(sink));
    read_loop(stream, connect, command_tx).await;
    writer.abort();
}

async fn read_loop<St>(
    mut stream: St,
    connect: ConnectHandle,
    command_tx: mpsc::UnboundedSender<NodeCommand>,
) where
    St: futures::Stream<Item = Result<RtiMsg, bincode::Error>> + Unpin + Send,
{
    while let Some(result) = stream.next().await {
        match result {
            Ok(msg) => {
                if command_tx
                    .send(NodeCommand::Incoming(connect, msg))
                    .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                // A malformed message from a peer is fatal to the connect.
                tracing::error!(?connect, %err, "Error decoding message; dropping connect.");
                break;
            }
        }
    }
    let _ = command_tx.send(NodeCommand::Closed(connect));
}
