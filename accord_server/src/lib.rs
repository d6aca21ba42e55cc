//! The accord federation server node.
//!
//! A node is one vertex of the server tree. It owns the authoritative state
//! of its federations (the root node) or a tracking replica (child nodes),
//! routes protocol messages between its connects, and runs the
//! publish/subscribe and time-coordination bookkeeping.
//!
//! All state mutation is single-threaded: the network front end serializes
//! every incoming message into one queue consumed by one node task.

pub mod connect;
pub mod federation;
pub mod instance;
pub mod interaction_class;
pub mod net;
pub mod node;
pub mod object_class;
pub mod pubsub;
pub mod region;
pub mod sync;
#[cfg(test)]
mod tests;
pub mod time;

pub use connect::{ConnectData, MessageSender};
pub use federation::Federation;
pub use net::{serve, ServerHandles};
pub use node::{ServerNode, ServerOptions};
pub use pubsub::Propagation;
