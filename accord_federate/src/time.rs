//! The federate-side time-management state machine.
//!
//! Tracks regulation and constrained state, the committed lower bounds of
//! every other regulating federate, and the timestamp-ordered queue. GALT is
//! the minimum over the other regulators' committed bounds; a federate parked
//! in a next-message request caps its contribution with the lock timestamp it
//! announced, so the message it waits for cannot be overtaken.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};

use accord_core::{
    FederateHandle, LogicalTime, LogicalTimeInterval, MessageRetractionHandle, RtiError,
};
use accord_model::LowerBoundCommitType;

use crate::callbacks::FederateCallback;

/// What the state machine wants the ambassador to do: send a commit, send a
/// lock announcement, or queue a callback. Ordering within the vector is the
/// delivery order.
#[derive(Debug)]
pub enum TimeAction {
    Commit {
        timestamp: LogicalTime,
        commit_type: LowerBoundCommitType,
        commit_id: u32,
    },
    Lock {
        timestamp: LogicalTime,
    },
    Callback(FederateCallback),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    TimeAdvanceRequest,
    TimeAdvanceRequestAvailable,
    NextMessageRequest,
    NextMessageRequestAvailable,
    FlushQueueRequest,
}

#[derive(Debug)]
enum RegulationState {
    Disabled,
    /// Waiting for responses from the federates that were joined when the
    /// request went out.
    Pending {
        outstanding: BTreeSet<FederateHandle>,
        start: LogicalTime,
    },
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstrainedState {
    Disabled,
    Pending,
    Enabled,
}

#[derive(Debug, Clone, Copy)]
enum AdvanceState {
    Granted,
    Pending { mode: AdvanceMode, time: LogicalTime },
}

/// One other time-regulating federate as this federate sees it.
#[derive(Debug, Clone, Copy)]
struct Regulator {
    time_advance: LogicalTime,
    next_message: LogicalTime,
    /// Set while the federate sits in a next-message request.
    lock: Option<LogicalTime>,
}

impl Regulator {
    fn new(timestamp: LogicalTime) -> Self {
        Self {
            time_advance: timestamp,
            next_message: timestamp,
            lock: None,
        }
    }

    /// The lowest timestamp this regulator may still send.
    fn bound(&self) -> LogicalTime {
        let bound = self.time_advance.max(self.next_message);
        match self.lock {
            Some(lock) => bound.min(lock),
            None => bound,
        }
    }
}

/// A timestamped callback waiting in the TSO queue. The serial breaks ties so
/// equal timestamps deliver in arrival order.
#[derive(Debug)]
struct TsoEntry {
    timestamp: LogicalTime,
    serial: u64,
    callback: FederateCallback,
}

impl PartialEq for TsoEntry {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.serial == other.serial
    }
}

impl Eq for TsoEntry {}

impl PartialOrd for TsoEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TsoEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.serial.cmp(&other.serial))
    }
}

#[derive(Debug)]
pub struct TimeManager {
    federate: FederateHandle,
    regulation: RegulationState,
    constrained: ConstrainedState,
    advance: AdvanceState,
    logical_time: LogicalTime,
    lookahead: LogicalTimeInterval,
    /// Our own committed lower bound, the promise every outgoing timestamp
    /// must respect.
    committed_lbts: LogicalTime,
    asynchronous_delivery: bool,
    retraction_serial: u32,
    commit_id: u32,
    acknowledged_commit_id: u32,
    regulators: BTreeMap<FederateHandle, Regulator>,
    tso: BinaryHeap<Reverse<TsoEntry>>,
    tso_serial: u64,
    /// Receive-order callbacks held back while delivery is gated.
    held_receive_order: VecDeque<FederateCallback>,
}

impl TimeManager {
    pub fn new(federate: FederateHandle) -> Self {
        Self {
            federate,
            regulation: RegulationState::Disabled,
            constrained: ConstrainedState::Disabled,
            advance: AdvanceState::Granted,
            logical_time: LogicalTime::ZERO,
            lookahead: LogicalTimeInterval::ZERO,
            committed_lbts: LogicalTime::ZERO,
            asynchronous_delivery: false,
            retraction_serial: 0,
            commit_id: 0,
            acknowledged_commit_id: 0,
            regulators: BTreeMap::new(),
            tso: BinaryHeap::new(),
            tso_serial: 0,
            held_receive_order: VecDeque::new(),
        }
    }

    // -- queries -----------------------------------------------------------

    pub fn logical_time(&self) -> LogicalTime {
        self.logical_time
    }

    pub fn lookahead(&self) -> LogicalTimeInterval {
        self.lookahead
    }

    pub fn committed_lbts(&self) -> LogicalTime {
        self.committed_lbts
    }

    pub fn is_regulating(&self) -> bool {
        matches!(self.regulation, RegulationState::Enabled)
    }

    pub fn is_regulation_pending(&self) -> bool {
        matches!(self.regulation, RegulationState::Pending { .. })
    }

    pub fn is_constrained(&self) -> bool {
        self.constrained == ConstrainedState::Enabled
    }

    pub fn is_advance_pending(&self) -> bool {
        matches!(self.advance, AdvanceState::Pending { .. })
    }

    pub fn asynchronous_delivery(&self) -> bool {
        self.asynchronous_delivery
    }

    /// Greatest available logical time: the lowest timestamp any other
    /// regulator may still produce. `None` with no regulators around, which
    /// means time is unbounded.
    pub fn galt(&self) -> Option<LogicalTime> {
        self.regulators.values().map(Regulator::bound).min()
    }

    /// Lowest incoming timestamp: the head of the TSO queue.
    pub fn lits(&self) -> Option<LogicalTime> {
        self.tso.peek().map(|Reverse(entry)| entry.timestamp)
    }

    pub fn next_retraction_handle(&mut self) -> MessageRetractionHandle {
        let serial = self.retraction_serial;
        self.retraction_serial += 1;
        MessageRetractionHandle::new(self.federate, serial)
    }

    fn next_commit_id(&mut self) -> u32 {
        self.commit_id += 1;
        self.commit_id
    }

    /// Validate an outgoing timestamp against our committed promise.
    pub fn validate_outgoing_timestamp(&self, timestamp: LogicalTime) -> Result<(), RtiError> {
        if !self.is_regulating() {
            return Ok(());
        }
        if timestamp < self.committed_lbts {
            return Err(RtiError::InvalidLogicalTime);
        }
        Ok(())
    }

    // -- regulation --------------------------------------------------------

    /// Start enabling time regulation. `others` is the set of federates that
    /// must answer before the state flips to enabled.
    pub fn enable_regulation(
        &mut self,
        lookahead: LogicalTimeInterval,
        others: BTreeSet<FederateHandle>,
    ) -> Result<(LogicalTime, u32, Vec<TimeAction>), RtiError> {
        if !lookahead.is_valid() {
            return Err(RtiError::InvalidLookahead);
        }
        match self.regulation {
            RegulationState::Enabled => return Err(RtiError::TimeRegulationAlreadyEnabled),
            RegulationState::Pending { .. } => {
                return Err(RtiError::RequestForTimeRegulationPending)
            }
            RegulationState::Disabled => {}
        }
        if self.is_advance_pending() {
            return Err(RtiError::InTimeAdvancingState);
        }

        self.lookahead = lookahead;
        let proposed = self.logical_time + lookahead;
        let commit_id = self.next_commit_id();
        let mut actions = Vec::new();
        if others.is_empty() {
            self.regulation = RegulationState::Enabled;
            self.committed_lbts = proposed;
            actions.push(TimeAction::Callback(FederateCallback::TimeRegulationEnabled {
                time: self.logical_time,
            }));
        } else {
            self.regulation = RegulationState::Pending {
                outstanding: others,
                start: self.logical_time,
            };
        }
        Ok((proposed, commit_id, actions))
    }

    /// Another federate answered our enable request.
    pub fn handle_regulation_response(
        &mut self,
        responding: FederateHandle,
        timestamp: Option<LogicalTime>,
    ) -> Vec<TimeAction> {
        // A response from ourselves is the server denying the request.
        if responding == self.federate {
            tracing::warn!("Time regulation denied by the server node.");
            self.regulation = RegulationState::Disabled;
            return Vec::new();
        }
        let RegulationState::Pending { outstanding, start } = &mut self.regulation else {
            return Vec::new();
        };
        outstanding.remove(&responding);
        if let Some(timestamp) = timestamp {
            if *start < timestamp {
                *start = timestamp;
            }
        }
        if !outstanding.is_empty() {
            return Vec::new();
        }

        let start = *start;
        self.regulation = RegulationState::Enabled;
        self.logical_time = start;
        self.committed_lbts = start + self.lookahead;
        let commit_id = self.next_commit_id();
        vec![
            TimeAction::Commit {
                timestamp: self.committed_lbts,
                commit_type: LowerBoundCommitType::TimeAdvance,
                commit_id,
            },
            TimeAction::Callback(FederateCallback::TimeRegulationEnabled { time: start }),
        ]
    }

    /// A federate resigned or never answers: stop waiting for it.
    pub fn forget_federate(&mut self, federate: FederateHandle) -> Vec<TimeAction> {
        self.regulators.remove(&federate);
        let mut actions = Vec::new();
        if let RegulationState::Pending { outstanding, .. } = &mut self.regulation {
            outstanding.remove(&federate);
            if outstanding.is_empty() {
                // Last answer will never come; finish enabling.
                actions = self.handle_regulation_response(FederateHandle::from_raw(u32::MAX), None);
            }
        }
        actions.extend(self.evaluate());
        actions
    }

    pub fn disable_regulation(&mut self) -> Result<(), RtiError> {
        if !self.is_regulating() {
            return Err(RtiError::TimeRegulationIsNotEnabled);
        }
        self.regulation = RegulationState::Disabled;
        Ok(())
    }

    // -- constrained -------------------------------------------------------

    pub fn enable_constrained(&mut self) -> Result<Vec<TimeAction>, RtiError> {
        match self.constrained {
            ConstrainedState::Enabled => return Err(RtiError::TimeConstrainedAlreadyEnabled),
            ConstrainedState::Pending => {
                return Err(RtiError::RequestForTimeConstrainedPending)
            }
            ConstrainedState::Disabled => {}
        }
        if self.is_advance_pending() {
            return Err(RtiError::InTimeAdvancingState);
        }
        self.constrained = ConstrainedState::Pending;
        Ok(self.evaluate())
    }

    pub fn disable_constrained(&mut self) -> Result<Vec<TimeAction>, RtiError> {
        if self.constrained != ConstrainedState::Enabled {
            return Err(RtiError::TimeConstrainedIsNotEnabled);
        }
        self.constrained = ConstrainedState::Disabled;
        // Nothing gates the queues anymore.
        let mut actions: Vec<TimeAction> = Vec::new();
        while let Some(Reverse(entry)) = self.tso.pop() {
            actions.push(TimeAction::Callback(entry.callback));
        }
        while let Some(callback) = self.held_receive_order.pop_front() {
            actions.push(TimeAction::Callback(callback));
        }
        Ok(actions)
    }

    // -- asynchronous delivery ---------------------------------------------

    pub fn set_asynchronous_delivery(&mut self, enabled: bool) -> Result<Vec<TimeAction>, RtiError> {
        if enabled == self.asynchronous_delivery {
            return Err(if enabled {
                RtiError::AsynchronousDeliveryAlreadyEnabled
            } else {
                RtiError::AsynchronousDeliveryAlreadyDisabled
            });
        }
        self.asynchronous_delivery = enabled;
        Ok(self.release_held_receive_order())
    }

    // -- other regulators ---------------------------------------------------

    pub fn add_regulator(&mut self, federate: FederateHandle, timestamp: LogicalTime) {
        self.regulators.insert(federate, Regulator::new(timestamp));
    }

    pub fn apply_commit(
        &mut self,
        federate: FederateHandle,
        commit_type: LowerBoundCommitType,
        timestamp: LogicalTime,
    ) -> Vec<TimeAction> {
        let regulator = self
            .regulators
            .entry(federate)
            .or_insert_with(|| Regulator::new(timestamp));
        match commit_type {
            LowerBoundCommitType::TimeAdvance => {
                regulator.time_advance = timestamp;
                // A fresh grant clears the next-message freeze.
                regulator.lock = None;
            }
            LowerBoundCommitType::NextMessage => regulator.next_message = timestamp,
        }
        self.evaluate()
    }

    pub fn apply_lock(&mut self, federate: FederateHandle, timestamp: LogicalTime) -> Vec<TimeAction> {
        if let Some(regulator) = self.regulators.get_mut(&federate) {
            regulator.lock = Some(timestamp);
        }
        self.evaluate()
    }

    pub fn acknowledge_commit(&mut self, commit_id: u32) {
        if self.acknowledged_commit_id < commit_id {
            self.acknowledged_commit_id = commit_id;
        }
    }

    // -- advances ----------------------------------------------------------

    pub fn advance_request(
        &mut self,
        mode: AdvanceMode,
        time: LogicalTime,
    ) -> Result<Vec<TimeAction>, RtiError> {
        if self.is_advance_pending() {
            return Err(RtiError::InTimeAdvancingState);
        }
        if self.is_regulation_pending() {
            return Err(RtiError::RequestForTimeRegulationPending);
        }
        if self.constrained == ConstrainedState::Pending {
            return Err(RtiError::RequestForTimeConstrainedPending);
        }
        if time < self.logical_time {
            return Err(RtiError::LogicalTimeAlreadyPassed);
        }

        self.advance = AdvanceState::Pending { mode, time };
        let mut actions = Vec::new();

        if self.is_regulating() {
            match mode {
                AdvanceMode::TimeAdvanceRequest
                | AdvanceMode::TimeAdvanceRequestAvailable
                | AdvanceMode::FlushQueueRequest => {
                    let bound = (time + self.lookahead).max(self.committed_lbts);
                    if self.committed_lbts < bound {
                        self.committed_lbts = bound;
                        let commit_id = self.next_commit_id();
                        actions.push(TimeAction::Commit {
                            timestamp: bound,
                            commit_type: LowerBoundCommitType::TimeAdvance,
                            commit_id,
                        });
                    }
                }
                AdvanceMode::NextMessageRequest | AdvanceMode::NextMessageRequestAvailable => {
                    let target = self.lits().map_or(time, |lits| lits.min(time));
                    let bound = target + self.lookahead;
                    let commit_id = self.next_commit_id();
                    actions.push(TimeAction::Commit {
                        timestamp: bound,
                        commit_type: LowerBoundCommitType::NextMessage,
                        commit_id,
                    });
                    actions.push(TimeAction::Lock { timestamp: bound });
                }
            }
        }

        // An active advance opens the receive-order gate.
        actions.extend(self.release_held_receive_order());
        actions.extend(self.evaluate());
        Ok(actions)
    }

    /// Queue a timestamped callback. Outside of enabled constrained state the
    /// timestamp order degrades to receive order.
    pub fn queue_timestamped(
        &mut self,
        timestamp: LogicalTime,
        callback: FederateCallback,
    ) -> Vec<TimeAction> {
        if !self.is_constrained() {
            return self.queue_receive_order(callback);
        }
        let serial = self.tso_serial;
        self.tso_serial += 1;
        self.tso.push(Reverse(TsoEntry {
            timestamp,
            serial,
            callback,
        }));
        self.evaluate()
    }

    /// Queue a receive-order callback, honoring the asynchronous-delivery
    /// gate.
    pub fn queue_receive_order(&mut self, callback: FederateCallback) -> Vec<TimeAction> {
        if !self.is_constrained() || self.asynchronous_delivery || self.is_advance_pending() {
            vec![TimeAction::Callback(callback)]
        } else {
            self.held_receive_order.push_back(callback);
            Vec::new()
        }
    }

    fn release_held_receive_order(&mut self) -> Vec<TimeAction> {
        if self.is_constrained() && !self.asynchronous_delivery && !self.is_advance_pending() {
            return Vec::new();
        }
        self.held_receive_order
            .drain(..)
            .map(TimeAction::Callback)
            .collect()
    }

    /// Re-evaluate pending state transitions after anything moved.
    pub fn evaluate(&mut self) -> Vec<TimeAction> {
        let mut actions = Vec::new();

        if self.constrained == ConstrainedState::Pending {
            // Constrained state begins at the federate's current time; there
            // is nothing to wait for.
            self.constrained = ConstrainedState::Enabled;
            actions.push(TimeAction::Callback(FederateCallback::TimeConstrainedEnabled {
                time: self.logical_time,
            }));
        }

        let AdvanceState::Pending { mode, time } = self.advance else {
            return actions;
        };

        let galt = self.galt();
        let galt_at_least = |bound: LogicalTime| galt.map_or(true, |galt| galt >= bound);
        let galt_beyond = |bound: LogicalTime| galt.map_or(true, |galt| galt > bound);

        let granted = match mode {
            AdvanceMode::TimeAdvanceRequest => galt_at_least(time).then_some((time, false)),
            AdvanceMode::TimeAdvanceRequestAvailable => galt_at_least(time).then_some((time, true)),
            AdvanceMode::NextMessageRequest => {
                let target = self.lits().map_or(time, |lits| lits.min(time));
                galt_beyond(target).then_some((target, true))
            }
            AdvanceMode::NextMessageRequestAvailable => {
                let target = self.lits().map_or(time, |lits| lits.min(time));
                galt_at_least(target).then_some((target, true))
            }
            AdvanceMode::FlushQueueRequest => Some((time, true)),
        };

        let Some((granted_time, inclusive)) = granted else {
            return actions;
        };

        // Flush-queue hands over everything; the other modes release up to
        // the grant bound.
        loop {
            let Some(Reverse(head)) = self.tso.peek() else {
                break;
            };
            let release = match mode {
                AdvanceMode::FlushQueueRequest => true,
                _ if inclusive => head.timestamp <= granted_time,
                _ => head.timestamp < granted_time,
            };
            if !release {
                break;
            }
            let Reverse(entry) = self.tso.pop().expect("peeked");
            actions.push(TimeAction::Callback(entry.callback));
        }

        self.advance = AdvanceState::Granted;
        self.logical_time = granted_time;

        if self.is_regulating() {
            let bound = granted_time + self.lookahead;
            if self.committed_lbts < bound {
                self.committed_lbts = bound;
                let commit_id = self.next_commit_id();
                actions.push(TimeAction::Commit {
                    timestamp: bound,
                    commit_type: LowerBoundCommitType::TimeAdvance,
                    commit_id,
                });
            }
        }

        actions.push(TimeAction::Callback(FederateCallback::TimeAdvanceGrant {
            time: granted_time,
        }));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::Payload;

    fn federate(n: u32) -> FederateHandle {
        FederateHandle::from_raw(n)
    }

    fn callbacks(actions: &[TimeAction]) -> Vec<&FederateCallback> {
        actions
            .iter()
            .filter_map(|action| match action {
                TimeAction::Callback(callback) => Some(callback),
                _ => None,
            })
            .collect()
    }

    fn interaction_at(time: f64) -> FederateCallback {
        FederateCallback::ReceiveInteraction {
            interaction_class: accord_core::InteractionClassHandle::from_raw(1),
            parameter_values: Vec::new(),
            tag: Payload::new(),
            order: accord_model::OrderType::Timestamp,
            transportation: accord_model::TransportationType::Reliable,
            timestamp: Some(LogicalTime::from_seconds(time)),
            retraction: None,
        }
    }

    #[test]
    fn committed_lbts_is_time_plus_lookahead() {
        let mut time = TimeManager::new(federate(1));
        let (proposed, _id, actions) = time
            .enable_regulation(LogicalTimeInterval::from_seconds(1.0), BTreeSet::new())
            .unwrap();
        assert_eq!(proposed, LogicalTime::from_seconds(1.0));
        assert!(time.is_regulating());
        assert_eq!(time.committed_lbts(), LogicalTime::from_seconds(1.0));
        assert!(matches!(
            callbacks(&actions)[..],
            [FederateCallback::TimeRegulationEnabled { .. }]
        ));

        // Advancing commits the new bound before the grant fires.
        let actions = time
            .advance_request(AdvanceMode::TimeAdvanceRequest, LogicalTime::from_seconds(10.0))
            .unwrap();
        assert_eq!(time.committed_lbts(), LogicalTime::from_seconds(11.0));
        assert_eq!(time.logical_time(), LogicalTime::from_seconds(10.0));
        assert!(actions
            .iter()
            .any(|action| matches!(action, TimeAction::Commit { timestamp, .. }
                if *timestamp == LogicalTime::from_seconds(11.0))));
    }

    #[test]
    fn constrained_federate_waits_for_galt() {
        let mut time = TimeManager::new(federate(2));
        for action in time.enable_constrained().unwrap() {
            assert!(matches!(
                action,
                TimeAction::Callback(FederateCallback::TimeConstrainedEnabled { .. })
            ));
        }

        // A regulator with LBTS 1.0 blocks the advance.
        time.add_regulator(federate(1), LogicalTime::from_seconds(1.0));
        let actions = time
            .advance_request(AdvanceMode::TimeAdvanceRequest, LogicalTime::from_seconds(10.0))
            .unwrap();
        assert!(callbacks(&actions).is_empty());
        assert!(time.is_advance_pending());

        // The regulator commits 11.0: grant fires.
        let actions = time.apply_commit(
            federate(1),
            LowerBoundCommitType::TimeAdvance,
            LogicalTime::from_seconds(11.0),
        );
        assert!(matches!(
            callbacks(&actions)[..],
            [FederateCallback::TimeAdvanceGrant { time }]
                if *time == LogicalTime::from_seconds(10.0)
        ));
        assert_eq!(time.galt(), Some(LogicalTime::from_seconds(11.0)));
    }

    #[test]
    fn tso_messages_deliver_in_timestamp_order_before_the_grant() {
        let mut time = TimeManager::new(federate(2));
        time.enable_constrained().unwrap();
        time.add_regulator(federate(1), LogicalTime::from_seconds(1.0));

        assert!(time.queue_timestamped(LogicalTime::from_seconds(7.0), interaction_at(7.0)).is_empty());
        assert!(time.queue_timestamped(LogicalTime::from_seconds(5.0), interaction_at(5.0)).is_empty());

        time.advance_request(AdvanceMode::TimeAdvanceRequest, LogicalTime::from_seconds(10.0))
            .unwrap();
        let actions = time.apply_commit(
            federate(1),
            LowerBoundCommitType::TimeAdvance,
            LogicalTime::from_seconds(11.0),
        );
        let delivered = callbacks(&actions);
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[0], &interaction_at(5.0));
        assert_eq!(delivered[1], &interaction_at(7.0));
        assert!(matches!(
            delivered[2],
            FederateCallback::TimeAdvanceGrant { time }
                if *time == LogicalTime::from_seconds(10.0)
        ));
    }

    #[test]
    fn strict_release_excludes_the_grant_time_for_tar() {
        let mut time = TimeManager::new(federate(2));
        time.enable_constrained().unwrap();
        time.add_regulator(federate(1), LogicalTime::from_seconds(20.0));

        time.queue_timestamped(LogicalTime::from_seconds(10.0), interaction_at(10.0));
        let actions = time
            .advance_request(AdvanceMode::TimeAdvanceRequest, LogicalTime::from_seconds(10.0))
            .unwrap();
        // Strictly-less release: the message at exactly 10.0 stays queued.
        let delivered = callbacks(&actions);
        assert_eq!(delivered.len(), 1);
        assert!(matches!(delivered[0], FederateCallback::TimeAdvanceGrant { .. }));
        assert_eq!(time.lits(), Some(LogicalTime::from_seconds(10.0)));

        // The available variant picks it up.
        let actions = time
            .advance_request(
                AdvanceMode::TimeAdvanceRequestAvailable,
                LogicalTime::from_seconds(10.0),
            )
            .unwrap();
        assert_eq!(callbacks(&actions).len(), 2);
    }

    #[test]
    fn next_message_request_grants_at_the_message_time() {
        let mut time = TimeManager::new(federate(2));
        time.enable_constrained().unwrap();
        time.add_regulator(federate(1), LogicalTime::from_seconds(9.0));

        time.queue_timestamped(LogicalTime::from_seconds(5.0), interaction_at(5.0));
        let actions = time
            .advance_request(AdvanceMode::NextMessageRequest, LogicalTime::from_seconds(20.0))
            .unwrap();
        let delivered = callbacks(&actions);
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0], &interaction_at(5.0));
        assert!(matches!(
            delivered[1],
            FederateCallback::TimeAdvanceGrant { time }
                if *time == LogicalTime::from_seconds(5.0)
        ));

        // Without a message the next-message request behaves like a plain
        // advance to the requested time.
        let actions = time.apply_commit(
            federate(1),
            LowerBoundCommitType::TimeAdvance,
            LogicalTime::from_seconds(30.0),
        );
        assert!(callbacks(&actions).is_empty());
        let actions = time
            .advance_request(AdvanceMode::NextMessageRequest, LogicalTime::from_seconds(20.0))
            .unwrap();
        assert!(matches!(
            callbacks(&actions)[..],
            [FederateCallback::TimeAdvanceGrant { time }]
                if *time == LogicalTime::from_seconds(20.0)
        ));
    }

    #[test]
    fn receive_order_gated_until_advance_unless_asynchronous() {
        let mut time = TimeManager::new(federate(2));
        time.enable_constrained().unwrap();

        let ro = FederateCallback::AnnounceSynchronizationPoint {
            label: "L".into(),
            tag: Payload::new(),
        };
        assert!(time.queue_receive_order(ro.clone()).is_empty());

        // Enabling asynchronous delivery releases the held callback.
        let actions = time.set_asynchronous_delivery(true).unwrap();
        assert_eq!(callbacks(&actions), vec![&ro]);
        // Re-enabling is an error.
        assert!(matches!(
            time.set_asynchronous_delivery(true),
            Err(RtiError::AsynchronousDeliveryAlreadyEnabled)
        ));

        // With asynchronous delivery on, receive order flows immediately.
        assert_eq!(callbacks(&time.queue_receive_order(ro.clone())), vec![&ro]);
    }

    #[test]
    fn advance_into_the_past_is_rejected() {
        let mut time = TimeManager::new(federate(1));
        time.advance_request(AdvanceMode::TimeAdvanceRequest, LogicalTime::from_seconds(5.0))
            .unwrap();
        assert!(matches!(
            time.advance_request(AdvanceMode::TimeAdvanceRequest, LogicalTime::from_seconds(3.0)),
            Err(RtiError::LogicalTimeAlreadyPassed)
        ));
    }

    #[test]
    fn locked_regulator_caps_galt() {
        let mut time = TimeManager::new(federate(3));
        time.add_regulator(federate(1), LogicalTime::from_seconds(2.0));
        time.apply_commit(
            federate(1),
            LowerBoundCommitType::TimeAdvance,
            LogicalTime::from_seconds(50.0),
        );
        assert_eq!(time.galt(), Some(LogicalTime::from_seconds(50.0)));

        time.apply_lock(federate(1), LogicalTime::from_seconds(6.0));
        assert_eq!(time.galt(), Some(LogicalTime::from_seconds(6.0)));

        // The next time-advance commit clears the lock.
        time.apply_commit(
            federate(1),
            LowerBoundCommitType::TimeAdvance,
            LogicalTime::from_seconds(51.0),
        );
        assert_eq!(time.galt(), Some(LogicalTime::from_seconds(51.0)));
    }
}
