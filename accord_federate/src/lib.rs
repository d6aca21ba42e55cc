//! The federate ambassador: the client side of the accord RTI.
//!
//! [`connect`] establishes the channel to a server node; the returned
//! [`Ambassador`] mirrors federation state, queues callbacks and runs the
//! federate's time-management state machine. All processing is cooperative:
//! protocol messages are handled inside API calls and
//! [`Ambassador::evoke_callback`], never on a background thread.

mod ambassador;
pub mod callbacks;
pub mod state;
pub mod time;

pub use ambassador::{connect, Ambassador};
pub use callbacks::FederateCallback;
pub use time::AdvanceMode;
