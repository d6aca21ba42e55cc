//! Connect bookkeeping at a server node.

use tokio::sync::mpsc;

use accord_core::ConnectHandle;
use accord_model::{ConnectKind, RtiMsg};

/// The sending half of a connect. The network front end drains the paired
/// receiver into the framed transport.
pub type MessageSender = mpsc::UnboundedSender<RtiMsg>;

/// One bidirectional message channel known to the node.
#[derive(Debug)]
pub struct ConnectData {
    pub handle: ConnectHandle,
    pub name: String,
    pub kind: ConnectKind,
    /// Cleared when the transport goes away; sends become no-ops while the
    /// teardown cascade runs.
    sender: Option<MessageSender>,
    /// Server option: whether federates behind this connect may become time
    /// regulating.
    pub permit_time_regulation: bool,
}

impl ConnectData {
    pub fn new(
        handle: ConnectHandle,
        name: String,
        kind: ConnectKind,
        sender: MessageSender,
        permit_time_regulation: bool,
    ) -> Self {
        Self {
            handle,
            name,
            kind,
            sender: Some(sender),
            permit_time_regulation,
        }
    }

    pub fn send(&self, msg: RtiMsg) {
        if let Some(sender) = &self.sender {
            if sender.send(msg).is_err() {
                tracing::debug!(connect = ?self.handle, "Dropping message for closed connect.");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    pub fn set_inactive(&mut self) {
        self.sender = None;
    }
}
