//! Logical time values.
//!
//! The core supports the `HLAfloat64Time` representation: a totally ordered
//! float64 time point plus a non-negative interval used for lookaheads.
//! Logical-time factory selection stays outside the core; federations record
//! the factory *name* and joining with a different name is rejected.

use serde::{Deserialize, Serialize};

use crate::error::RtiError;
use crate::payload::Payload;

/// The logical time factory name the core implements.
pub const TIME_FACTORY_FLOAT64: &str = "HLAfloat64Time";

/// A point in logical time. Ordering is total (`f64::total_cmp`), so logical
/// times are usable as priority-queue and map keys.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LogicalTime(f64);

impl LogicalTime {
    /// The initial logical time of every federation.
    pub const ZERO: LogicalTime = LogicalTime(0.0);
    /// The time no message can be stamped beyond.
    pub const FINAL: LogicalTime = LogicalTime(f64::MAX);

    pub const fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    pub const fn as_seconds(self) -> f64 {
        self.0
    }

    pub fn is_final(self) -> bool {
        self == Self::FINAL
    }

    /// This time advanced by `interval`, saturating at [`LogicalTime::FINAL`].
    pub fn advanced_by(self, interval: LogicalTimeInterval) -> Self {
        let sum = self.0 + interval.0;
        if sum.is_finite() {
            Self(sum)
        } else {
            Self::FINAL
        }
    }

    /// Fixed 8-byte big-endian encoding (HLAfloat64Time wire layout).
    pub fn encode(self) -> [u8; 8] {
        self.0.to_bits().to_be_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RtiError> {
        let bytes: [u8; 8] = buf
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or(RtiError::InvalidLogicalTime)?;
        Ok(Self(f64::from_bits(u64::from_be_bytes(bytes))))
    }

    pub fn to_payload(self) -> Payload {
        Payload::copy_from_slice(&self.encode())
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, RtiError> {
        Self::decode(payload)
    }
}

impl PartialEq for LogicalTime {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}

impl Eq for LogicalTime {}

impl PartialOrd for LogicalTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogicalTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-negative span of logical time, used for lookaheads.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LogicalTimeInterval(f64);

impl LogicalTimeInterval {
    pub const ZERO: LogicalTimeInterval = LogicalTimeInterval(0.0);

    pub const fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    pub const fn as_seconds(self) -> f64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }

    /// A valid lookahead is finite and non-negative.
    pub fn is_valid(self) -> bool {
        self.0.is_finite() && self.0 >= 0.0
    }
}

impl PartialEq for LogicalTimeInterval {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}

impl Eq for LogicalTimeInterval {}

impl PartialOrd for LogicalTimeInterval {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogicalTimeInterval {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::fmt::Display for LogicalTimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add<LogicalTimeInterval> for LogicalTime {
    type Output = LogicalTime;

    fn add(self, rhs: LogicalTimeInterval) -> LogicalTime {
        self.advanced_by(rhs)
    }
}
