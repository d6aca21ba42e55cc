//! Typed integer handles for every entity kind the RTI tracks.
//!
//! Handles are what travel on the wire and what the server tree routes by;
//! all cross-subsystem references are handles resolved on demand. Each kind
//! has a fixed-width big-endian encoding.

use serde::{Deserialize, Serialize};

/// Common behavior of the macro-generated handle kinds.
pub trait HandleKind: Copy + Ord + std::fmt::Debug {
    /// Number of bytes in the wire encoding of this handle kind.
    const ENCODED_LEN: usize;
    /// Largest representable handle value.
    const LAST_INDEX: u64;

    fn from_index(index: u64) -> Self;
    fn index(self) -> u64;
}

#[macro_export]
macro_rules! handle_type {
    ($(#[$outer:meta])* $vis:vis $name:ident($repr:ty)) => {
        $(#[$outer])*
        #[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        $vis struct $name($repr);

        impl $name {
            pub const fn from_raw(value: $repr) -> Self {
                Self(value)
            }

            pub const fn raw(self) -> $repr {
                self.0
            }

            /// Encode as big-endian into `buf`, returning the bytes written.
            pub fn encode(self, buf: &mut [u8]) -> usize {
                let bytes = self.0.to_be_bytes();
                buf[..bytes.len()].copy_from_slice(&bytes);
                bytes.len()
            }

            /// Decode a big-endian value from the front of `buf`.
            pub fn decode(buf: &[u8]) -> Option<Self> {
                let bytes = buf.get(..std::mem::size_of::<$repr>())?;
                Some(Self(<$repr>::from_be_bytes(bytes.try_into().ok()?)))
            }
        }

        impl $crate::handle::HandleKind for $name {
            const ENCODED_LEN: usize = std::mem::size_of::<$repr>();
            const LAST_INDEX: u64 = <$repr>::MAX as u64;

            fn from_index(index: u64) -> Self {
                Self(index as $repr)
            }

            fn index(self) -> u64 {
                self.0 as u64
            }
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_type! {
    /// Handle for a federation execution, unique within a server tree.
    pub FederationHandle(u16)
}

handle_type! {
    /// Handle for a joined federate, unique within a federation.
    pub FederateHandle(u32)
}

handle_type! {
    /// Handle for an object class in the federation object model.
    pub ObjectClassHandle(u32)
}

handle_type! {
    /// Handle for a class attribute; handle 0 is the privilege-to-delete
    /// attribute of the root object class.
    pub AttributeHandle(u32)
}

handle_type! {
    /// Handle for an interaction class in the federation object model.
    pub InteractionClassHandle(u32)
}

handle_type! {
    /// Handle for an interaction parameter.
    pub ParameterHandle(u32)
}

handle_type! {
    /// Handle for a DDM dimension.
    pub DimensionHandle(u32)
}

handle_type! {
    /// Handle for a registered object instance, unique within a federation.
    pub ObjectInstanceHandle(u32)
}

handle_type! {
    /// Handle for a merged FOM module.
    pub ModuleHandle(u16)
}

handle_type! {
    /// Handle for a connect (one bidirectional message channel) at a node.
    pub ConnectHandle(u32)
}

handle_type! {
    /// Handle for a transportation type.
    pub TransportationHandle(u8)
}

handle_type! {
    /// Handle for an order type.
    pub OrderingHandle(u8)
}

handle_type! {
    /// Handle for an update rate.
    pub UpdateRateHandle(u32)
}

handle_type! {
    /// Region handle local to its creating federate.
    pub LocalRegionHandle(u32)
}

impl AttributeHandle {
    /// Attribute 0 carries delete ownership of the whole instance.
    pub const PRIVILEGE_TO_DELETE: AttributeHandle = AttributeHandle(0);
}

/// Identifies a timestamped message for retraction: a `(federate, serial)`
/// pair packed into 64 bits so messages can be routed back to their sender
/// without a central registry.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MessageRetractionHandle(u64);

impl MessageRetractionHandle {
    pub fn new(federate: FederateHandle, serial: u32) -> Self {
        Self(u64::from(federate.raw()) << 32 | u64::from(serial))
    }

    pub fn federate(self) -> FederateHandle {
        FederateHandle::from_raw((self.0 >> 32) as u32)
    }

    pub fn serial(self) -> u32 {
        self.0 as u32
    }

    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn encode(self, buf: &mut [u8]) -> usize {
        buf[..8].copy_from_slice(&self.0.to_be_bytes());
        8
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self(u64::from_be_bytes(buf.get(..8)?.try_into().ok()?)))
    }
}

impl std::fmt::Debug for MessageRetractionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MessageRetractionHandle({},{})",
            self.federate(),
            self.serial()
        )
    }
}

/// Regions are private to their creator, so the global handle is the
/// creating federate paired with a federate-local region handle. This avoids
/// tracking region handles globally.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RegionHandle(u64);

impl RegionHandle {
    pub fn new(federate: FederateHandle, local: LocalRegionHandle) -> Self {
        Self(u64::from(federate.raw()) << 32 | u64::from(local.raw()))
    }

    pub fn federate(self) -> FederateHandle {
        FederateHandle::from_raw((self.0 >> 32) as u32)
    }

    pub fn local(self) -> LocalRegionHandle {
        LocalRegionHandle::from_raw(self.0 as u32)
    }

    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn encode(self, buf: &mut [u8]) -> usize {
        buf[..8].copy_from_slice(&self.0.to_be_bytes());
        8
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self(u64::from_be_bytes(buf.get(..8)?.try_into().ok()?)))
    }
}

impl std::fmt::Debug for RegionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegionHandle({},{})", self.federate(), self.local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_round_trip_simple() {
        let mut buf = [0u8; 8];
        let h = ObjectClassHandle::from_raw(0x01020304);
        assert_eq!(h.encode(&mut buf), 4);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert_eq!(ObjectClassHandle::decode(&buf), Some(h));

        let h = FederationHandle::from_raw(0x0a0b);
        assert_eq!(h.encode(&mut buf), 2);
        assert_eq!(FederationHandle::decode(&buf), Some(h));

        let h = TransportationHandle::from_raw(7);
        assert_eq!(h.encode(&mut buf), 1);
        assert_eq!(TransportationHandle::decode(&buf), Some(h));
    }

    #[test]
    fn encode_round_trip_composite() {
        let mut buf = [0u8; 8];
        let h = MessageRetractionHandle::new(FederateHandle::from_raw(42), 7);
        assert_eq!(h.encode(&mut buf), 8);
        assert_eq!(MessageRetractionHandle::decode(&buf), Some(h));
        assert_eq!(h.federate(), FederateHandle::from_raw(42));
        assert_eq!(h.serial(), 7);

        let r = RegionHandle::new(FederateHandle::from_raw(3), LocalRegionHandle::from_raw(9));
        assert_eq!(r.encode(&mut buf), 8);
        assert_eq!(RegionHandle::decode(&buf), Some(r));
        assert_eq!(r.federate(), FederateHandle::from_raw(3));
        assert_eq!(r.local(), LocalRegionHandle::from_raw(9));
    }

    #[test]
    fn decode_short_buffer() {
        assert_eq!(ObjectClassHandle::decode(&[1, 2]), None);
        assert_eq!(MessageRetractionHandle::decode(&[0; 4]), None);
    }
}
