//! The shared model of the accord RTI: FOM modules and their merge engine,
//! the wire message set, and the framing codec.

pub mod codec;
pub mod fom;
pub mod messages;
pub mod module_set;
pub mod types;

pub use fom::*;
pub use messages::*;
pub use module_set::FomModuleSet;
pub use types::*;
