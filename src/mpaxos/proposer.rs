// Copyright 2021 The sdcons Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashSet;

use log::{debug, info, trace};

use crate::ballot::{equal, less_than};
use crate::constant::*;
use crate::types::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Phase1,
    Phase2,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The transient state of one proposal attempt. It is rebuilt every time a
/// new ballot or a new slot is tried.
#[derive(Debug, Clone)]
pub struct ProposerRound {
    pub slot: Slot,
    pub ballot: Ballot,
    pub propose_value: Option<Value>,

    /// The value carried by the highest-ballot promise seen so far.
    pub highest_promised: Option<AcceptedValue>,

    /// Acceptors who promised this ballot.
    pub promised: HashSet<NodeId>,
    /// Acceptors who accepted `propose_value` under this ballot.
    pub accepted: HashSet<NodeId>,
}

impl ProposerRound {
    fn new(slot: Slot, ballot: Ballot) -> ProposerRound {
        ProposerRound {
            slot,
            ballot,
            propose_value: None,
            highest_promised: None,
            promised: HashSet::new(),
            accepted: HashSet::new(),
        }
    }

    pub fn promise_count(&self) -> usize {
        self.promised.len()
    }

    pub fn accept_count(&self) -> usize {
        self.accepted.len()
    }

    pub fn token(&self) -> TimerToken {
        TimerToken {
            slot: self.slot,
            ballot: self.ballot,
        }
    }
}

/// The proposer role of a node: drives phase 1 (prepare/promise) and phase 2
/// (accept/accepted) of one slot at a time.
#[derive(Debug)]
pub struct Proposer {
    local_id: NodeId,
    rank: Rank,
    majority: usize,

    /// The highest round observed in any reject.
    max_round: u64,
    last_ballot: Ballot,
    next_slot: Slot,

    phase: Phase,
    round: Option<ProposerRound>,
}

impl Proposer {
    pub fn new(local_id: NodeId, rank: Rank, num_acceptors: usize) -> Proposer {
        Proposer {
            local_id,
            rank,
            majority: majority(num_acceptors),
            max_round: INITIAL_ROUND,
            last_ballot: Ballot::new(INITIAL_ROUND, rank),
            next_slot: FIRST_SLOT,
            phase: Phase::Idle,
            round: None,
        }
    }

    pub fn majority(&self) -> usize {
        self.majority
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn next_slot(&self) -> Slot {
        self.next_slot
    }

    pub fn max_round(&self) -> u64 {
        self.max_round
    }

    pub fn round(&self) -> Option<&ProposerRound> {
        self.round.as_ref()
    }

    pub fn is_proposing(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Does an attempt identified by `slot` and `ballot` still in flight?
    pub fn is_current(&self, slot: Slot, ballot: &Ballot) -> bool {
        self.round
            .as_ref()
            .map(|r| r.slot == slot && equal(&r.ballot, ballot))
            .unwrap_or(false)
    }

    pub fn current_token(&self) -> Option<TimerToken> {
        self.round.as_ref().map(|r| r.token())
    }

    /// Move the slot to fill forward, never backward.
    pub fn advance_next_slot(&mut self, slot: Slot) {
        if self.next_slot < slot {
            debug!(
                "node {} advance next slot from {} to {}",
                self.local_id, self.next_slot, slot
            );
            self.next_slot = slot;
        }
    }

    fn to(&mut self, target: Phase, reason: &'static str) -> Phase {
        info!(
            "node {} slot {} change phase from {} to {}, reason: {}",
            self.local_id, self.next_slot, self.phase, target, reason
        );
        let prev = self.phase;
        self.phase = target;
        prev
    }

    /// Starts a new attempt on `next_slot` with a ballot strictly higher than
    /// every ballot this proposer used or observed before.
    pub fn to_phase1(&mut self, reason: &'static str) -> &ProposerRound {
        let _prev = self.to(Phase::Phase1, reason);
        let round = std::cmp::max(self.max_round, self.last_ballot.round);
        let ballot = Ballot::next(round, self.rank);
        self.last_ballot = ballot;
        debug!(
            "node {} slot {} start phase 1 with ballot {}",
            self.local_id, self.next_slot, ballot
        );
        self.round.insert(ProposerRound::new(self.next_slot, ballot))
    }

    /// Counts a promise, returns true when the promise makes the quorum.
    pub fn receive_promise(&mut self, from: NodeId, msg: &PromiseMsg) -> bool {
        let local_id = self.local_id;
        let majority = self.majority;
        let round = match self.round.as_mut() {
            Some(r) if self.phase == Phase::Phase1 => r,
            _ => return false,
        };
        if round.slot != msg.slot || !equal(&round.ballot, &msg.ballot) {
            trace!(
                "node {} slot {} ignore staled promise from {} for slot {} ballot {}",
                local_id,
                round.slot,
                from,
                msg.slot,
                msg.ballot
            );
            return false;
        }

        if let Some(prior) = &msg.prior {
            let adopt = match &round.highest_promised {
                Some(best) => less_than(&best.ballot, &prior.ballot),
                None => true,
            };
            if adopt {
                debug!(
                    "node {} slot {} adopt {:?} accepted at ballot {} by {}",
                    local_id, round.slot, prior.value, prior.ballot, from
                );
                round.highest_promised = Some(prior.clone());
            }
        }

        if !round.promised.insert(from) {
            return false;
        }
        trace!(
            "node {} slot {} receive promise from {}, {} of {}",
            local_id,
            round.slot,
            from,
            round.promise_count(),
            majority
        );
        round.promise_count() == majority
    }

    /// Handles a reject of the attempt in flight. Returns true if the attempt
    /// must be retried.
    pub fn receive_reject(&mut self, from: NodeId, msg: &RejectMsg) -> bool {
        if self.phase == Phase::Idle || !self.is_current(msg.slot, &msg.rejected) {
            trace!(
                "node {} ignore staled reject from {}: slot {}, ballot {}",
                self.local_id,
                from,
                msg.slot,
                msg.rejected
            );
            return false;
        }
        debug!(
            "node {} slot {} ballot {} rejected by {}, observed {}",
            self.local_id, msg.slot, msg.rejected, from, msg.observed
        );
        if msg.observed.round >= self.max_round {
            self.max_round = msg.observed.round;
        }
        true
    }

    /// Enters phase 2. The value to propose is the one of the highest-ballot
    /// promise if any, otherwise `queued`.
    pub fn to_phase2(&mut self, queued: Option<&Value>) -> Option<&ProposerRound> {
        let value = {
            let round = self.round.as_ref()?;
            match &round.highest_promised {
                Some(prior) => prior.value.clone(),
                None => queued?.clone(),
            }
        };
        let _prev = self.to(Phase::Phase2, "promised");
        let round = self.round.as_mut()?;
        debug!(
            "node {} slot {} propose {:?} with ballot {}",
            self.local_id, round.slot, value, round.ballot
        );
        round.accepted.clear();
        round.propose_value = Some(value);
        Some(&*round)
    }

    /// Counts an accept, returns true when the accept makes the quorum.
    pub fn receive_accepted(&mut self, from: NodeId, msg: &AcceptedMsg) -> bool {
        let local_id = self.local_id;
        let majority = self.majority;
        let round = match self.round.as_mut() {
            Some(r) if self.phase == Phase::Phase2 => r,
            _ => return false,
        };
        if round.slot != msg.slot || !equal(&round.ballot, &msg.ballot) {
            trace!(
                "node {} slot {} ignore staled accepted from {} for slot {} ballot {}",
                local_id,
                round.slot,
                from,
                msg.slot,
                msg.ballot
            );
            return false;
        }
        if !round.accepted.insert(from) {
            return false;
        }
        trace!(
            "node {} slot {} receive accepted from {}, {} of {}",
            local_id,
            round.slot,
            from,
            round.accept_count(),
            majority
        );
        round.accept_count() == majority
    }

    /// The value of the attempt in flight is chosen, builds the notification
    /// and moves on to the next slot.
    pub fn decide(&mut self) -> Option<ChosenMsg> {
        let round = self.round.take()?;
        let value = round.propose_value?;
        let _prev = self.to(Phase::Idle, "chosen");
        self.next_slot = round.slot + 1;
        Some(ChosenMsg {
            slot: round.slot,
            ballot: round.ballot,
            proposer_rank: self.rank,
            value,
        })
    }

    /// Drops the attempt in flight.
    pub fn abandon(&mut self, reason: &'static str) {
        if self.phase != Phase::Idle {
            let _prev = self.to(Phase::Idle, reason);
        }
        self.round = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(id: u64) -> Value {
        Value::new(id, vec![1, 2, 3])
    }

    fn promise(slot: Slot, ballot: Ballot, prior: Option<(Ballot, u64)>) -> PromiseMsg {
        PromiseMsg {
            slot,
            ballot,
            prior: prior.map(|(b, v)| AcceptedValue {
                ballot: b,
                value: value(v),
            }),
        }
    }

    fn accepted(slot: Slot, ballot: Ballot, v: u64) -> AcceptedMsg {
        AcceptedMsg {
            slot,
            ballot,
            acceptor_rank: 0,
            value: value(v),
        }
    }

    #[test]
    fn phase1_ballot_uses_rank() {
        let mut p = Proposer::new(1, 4, 3);
        let ballot = p.to_phase1("test").ballot;
        assert_eq!(ballot, Ballot::new(1, 4));
        assert_eq!(p.phase(), Phase::Phase1);
        assert_eq!(p.round().unwrap().slot, 0);
    }

    #[test]
    fn retry_uses_strictly_higher_ballot() {
        let mut p = Proposer::new(1, 0, 3);
        let first = p.to_phase1("test").ballot;
        let second = p.to_phase1("timeout").ballot;
        assert!(less_than(&first, &second));
        assert_eq!(second, Ballot::new(2, 0));
    }

    #[test]
    fn promise_quorum_counts_distinct_acceptors() {
        let mut p = Proposer::new(1, 0, 3);
        let b = p.to_phase1("test").ballot;
        assert!(!p.receive_promise(1, &promise(0, b, None)));
        assert!(!p.receive_promise(1, &promise(0, b, None)));
        assert!(p.receive_promise(2, &promise(0, b, None)));
        // Promises after the quorum don't trigger another transition.
        assert!(!p.receive_promise(3, &promise(0, b, None)));
    }

    #[test]
    fn ignore_promise_of_other_attempt() {
        let mut p = Proposer::new(1, 0, 3);
        let old = p.to_phase1("test").ballot;
        let b = p.to_phase1("timeout").ballot;
        assert!(!p.receive_promise(2, &promise(0, old, None)));
        assert!(!p.receive_promise(2, &promise(1, b, None)));
        assert_eq!(p.round().unwrap().promise_count(), 0);
    }

    #[test]
    fn adopt_highest_promised_value() {
        let mut p = Proposer::new(1, 2, 5);
        let b = p.to_phase1("test").ballot;
        p.receive_promise(1, &promise(0, b, Some((Ballot::new(1, 0), 10))));
        p.receive_promise(2, &promise(0, b, Some((Ballot::new(1, 1), 11))));
        p.receive_promise(3, &promise(0, b, Some((Ballot::new(0, 9), 12))));
        let round = p.to_phase2(Some(&value(99))).unwrap();
        assert_eq!(round.propose_value, Some(value(11)));
        assert_eq!(p.phase(), Phase::Phase2);
    }

    #[test]
    fn propose_queued_value_without_prior() {
        let mut p = Proposer::new(1, 2, 3);
        let b = p.to_phase1("test").ballot;
        p.receive_promise(1, &promise(0, b, None));
        p.receive_promise(2, &promise(0, b, None));
        let round = p.to_phase2(Some(&value(7))).unwrap();
        assert_eq!(round.propose_value, Some(value(7)));
    }

    #[test]
    fn reject_raises_max_round() {
        let mut p = Proposer::new(1, 0, 3);
        let b = p.to_phase1("test").ballot;
        let reject = RejectMsg {
            slot: 0,
            rejected: b,
            observed: Ballot::new(4, 2),
        };
        assert!(p.receive_reject(2, &reject));
        assert_eq!(p.max_round(), 4);
        let retry = p.to_phase1("rejected").ballot;
        assert_eq!(retry, Ballot::new(5, 0));

        // The reject of the previous attempt is staled now.
        assert!(!p.receive_reject(2, &reject));
    }

    #[test]
    fn decide_after_accept_quorum() {
        let mut p = Proposer::new(1, 1, 3);
        let b = p.to_phase1("test").ballot;
        p.receive_promise(1, &promise(0, b, None));
        p.receive_promise(2, &promise(0, b, None));
        p.to_phase2(Some(&value(3)));

        assert!(!p.receive_accepted(1, &accepted(0, Ballot::new(9, 9), 3)));
        assert!(!p.receive_accepted(1, &accepted(0, b, 3)));
        assert!(p.receive_accepted(3, &accepted(0, b, 3)));

        let chosen = p.decide().unwrap();
        assert_eq!(chosen.slot, 0);
        assert_eq!(chosen.ballot, b);
        assert_eq!(chosen.proposer_rank, 1);
        assert_eq!(chosen.value, value(3));
        assert_eq!(p.next_slot(), 1);
        assert_eq!(p.phase(), Phase::Idle);
        assert!(p.round().is_none());
    }

    #[test]
    fn next_slot_only_moves_forward() {
        let mut p = Proposer::new(1, 1, 3);
        p.advance_next_slot(4);
        p.advance_next_slot(2);
        assert_eq!(p.next_slot(), 4);
        assert_eq!(p.to_phase1("test").slot, 4);
    }
}
