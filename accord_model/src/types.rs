//! Enumerated vocabulary of the federation object model.

use serde::{Deserialize, Serialize};

use accord_core::RtiError;

/// Delivery ordering of an attribute or interaction class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Receive,
    #[default]
    Timestamp,
}

impl OrderType {
    /// Resolve an FDD order-type name, case-insensitively.
    pub fn from_fdd_name(name: &str) -> Result<Self, RtiError> {
        if name.eq_ignore_ascii_case("timestamp") {
            Ok(OrderType::Timestamp)
        } else if name.eq_ignore_ascii_case("receive") {
            Ok(OrderType::Receive)
        } else {
            Err(RtiError::ErrorReadingFdd(format!(
                "unknown order type \"{name}\""
            )))
        }
    }
}

/// Transport class of an attribute or interaction class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportationType {
    #[default]
    Reliable,
    BestEffort,
}

impl TransportationType {
    /// Resolve an FDD transportation-type name.
    pub fn from_fdd_name(name: &str) -> Result<Self, RtiError> {
        if name == "HLAreliable" || name.eq_ignore_ascii_case("reliable") {
            Ok(TransportationType::Reliable)
        } else if name == "HLAbestEffort" || name.eq_ignore_ascii_case("best_effort") {
            Ok(TransportationType::BestEffort)
        } else {
            Err(RtiError::ErrorReadingFdd(format!(
                "unsupported transportation type \"{name}\""
            )))
        }
    }
}

/// What the RTI does with a federate's objects and ownerships when the
/// federate resigns or its connect drops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResignAction {
    UnconditionallyDivestAttributes,
    DeleteObjects,
    CancelPendingOwnershipAcquisitions,
    DeleteObjectsThenDivest,
    #[default]
    CancelThenDeleteThenDivest,
    NoAction,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicationType {
    #[default]
    Unpublished,
    Published,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubscriptionType {
    #[default]
    Unsubscribed,
    SubscribedPassive,
    SubscribedActive,
}

impl SubscriptionType {
    pub fn is_subscribed(self) -> bool {
        self != SubscriptionType::Unsubscribed
    }
}

/// Which committed lower-bound timestamp a commit message updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LowerBoundCommitType {
    TimeAdvance,
    NextMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fdd_names_resolve_case_insensitively() {
        assert_eq!(
            OrderType::from_fdd_name("TimeStamp").unwrap(),
            OrderType::Timestamp
        );
        assert_eq!(
            OrderType::from_fdd_name("receive").unwrap(),
            OrderType::Receive
        );
        assert!(OrderType::from_fdd_name("fifo").is_err());

        assert_eq!(
            TransportationType::from_fdd_name("HLAreliable").unwrap(),
            TransportationType::Reliable
        );
        assert_eq!(
            TransportationType::from_fdd_name("BEST_EFFORT").unwrap(),
            TransportationType::BestEffort
        );
        assert!(TransportationType::from_fdd_name("carrier-pigeon").is_err());
    }
}
