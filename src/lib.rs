//! accord — an HLA (IEEE 1516) Run-Time Infrastructure core in Rust.
//!
//! A federation is served by a tree of server nodes ([`accord_server`]);
//! federates participate through an ambassador ([`accord_federate`]). The
//! shared object model and wire protocol live in [`accord_model`], the
//! handle/time/error vocabulary in [`accord_core`].
//!
//! ## Feature flags
#![doc = document_features::document_features!()]

pub use accord_core as core;
pub use accord_model as model;

#[cfg(feature = "federate")]
pub use accord_federate as federate;

#[cfg(feature = "server")]
pub use accord_server as server;

#[cfg(feature = "runner")]
pub mod runner;
