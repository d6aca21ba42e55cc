//! Opaque payload data: user tags, attribute and parameter values, encoded
//! logical times.
//!
//! [`bytes::Bytes`] gives the sharing semantics the RTI needs when one update
//! fans out to many connects: clones are reference-counted views, reads need
//! no synchronization, and writers build fresh buffers instead of mutating
//! shared ones.
pub type Payload = bytes::Bytes;
