//! Server-side time-coordination records.
//!
//! Nodes never decode timestamps; they store and route the encoded payloads
//! and leave GALT arithmetic to the ambassadors, which own the logical-time
//! representation. What a node does track is which federates regulate and
//! their latest committed bounds, so joiners can be brought up to date.

use accord_core::Payload;
use accord_model::{LowerBoundCommitType, TimeRegulatingState};

/// The committed lower-bound timestamps of one time-regulating federate.
/// Commit ids increase per federate; the acknowledgement of a commit id
/// gates when the federate may consider the commit globally visible.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub time_advance_timestamp: Payload,
    pub next_message_timestamp: Payload,
    pub commit_id: u32,
}

impl CommitRecord {
    pub fn new(timestamp: Payload, commit_id: u32) -> Self {
        Self {
            time_advance_timestamp: timestamp.clone(),
            next_message_timestamp: timestamp,
            commit_id,
        }
    }

    pub fn apply(&mut self, commit_type: LowerBoundCommitType, timestamp: Payload, commit_id: u32) {
        match commit_type {
            LowerBoundCommitType::TimeAdvance => self.time_advance_timestamp = timestamp,
            LowerBoundCommitType::NextMessage => self.next_message_timestamp = timestamp,
        }
        self.commit_id = commit_id;
    }

    pub fn replay_state(&self, federate: accord_core::FederateHandle) -> TimeRegulatingState {
        TimeRegulatingState {
            federate,
            time_advance_timestamp: self.time_advance_timestamp.clone(),
            next_message_timestamp: self.next_message_timestamp.clone(),
            commit_id: self.commit_id,
        }
    }
}
