//! Core vocabulary types for the accord RTI: typed handles, handle
//! allocation, logical time and the error sum type.

pub mod alloc;
pub mod error;
pub mod handle;
pub mod payload;
pub mod time;

pub use alloc::{Candidate, HandleAllocator};
pub use error::RtiError;
pub use handle::*;
pub use payload::Payload;
pub use time::{LogicalTime, LogicalTimeInterval, TIME_FACTORY_FLOAT64};
