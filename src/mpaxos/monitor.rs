//! The crate `monitor` defines the observers notified by a node about the
//! values it proposes and chooses.
//!
//! Monitors never feed anything back into the protocol, they are used to
//! verify a cluster from outside. A monitor shared by every node of a cluster
//! is registered as `Rc<RefCell<M>>`.

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

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::trace;

use crate::ballot::less_than;
use crate::types::*;

pub trait Monitor {
    /// A proposer sent `value` to the acceptors, in either phase.
    fn notify_proposed(&mut self, _value: &Value) {}

    /// A proposer entered phase 2 of `slot` with `value`.
    fn notify_value_proposed(&mut self, _slot: Slot, _ballot: &Ballot, _value: &Value) {}

    /// A proposer received a quorum of accepts for `value`.
    fn notify_value_chosen(&mut self, _slot: Slot, _ballot: &Ballot, _value: &Value) {}
}

impl<M: Monitor> Monitor for Rc<RefCell<M>> {
    fn notify_proposed(&mut self, value: &Value) {
        self.borrow_mut().notify_proposed(value)
    }

    fn notify_value_proposed(&mut self, slot: Slot, ballot: &Ballot, value: &Value) {
        self.borrow_mut().notify_value_proposed(slot, ballot, value)
    }

    fn notify_value_chosen(&mut self, slot: Slot, ballot: &Ballot, value: &Value) {
        self.borrow_mut().notify_value_chosen(slot, ballot, value)
    }
}

/// Checks agreement: one value per slot, and once a value is chosen at some
/// ballot, every higher ballot proposes the same value for that slot.
#[derive(Debug, Default)]
pub struct SafetyMonitor {
    chosen: HashMap<Slot, (Ballot, Value)>,
}

impl SafetyMonitor {
    pub fn new() -> SafetyMonitor {
        SafetyMonitor::default()
    }

    pub fn chosen(&self, slot: Slot) -> Option<&Value> {
        self.chosen.get(&slot).map(|(_, v)| v)
    }

    pub fn num_chosen(&self) -> usize {
        self.chosen.len()
    }
}

impl Monitor for SafetyMonitor {
    fn notify_value_proposed(&mut self, slot: Slot, ballot: &Ballot, value: &Value) {
        if let Some((chosen_ballot, chosen_value)) = self.chosen.get(&slot) {
            if less_than(chosen_ballot, ballot) {
                assert!(
                    chosen_value == value,
                    "slot {} proposes {:?} at ballot {}, but {:?} was chosen at ballot {}",
                    slot,
                    value,
                    ballot,
                    chosen_value,
                    chosen_ballot
                );
            }
        }
    }

    fn notify_value_chosen(&mut self, slot: Slot, ballot: &Ballot, value: &Value) {
        match self.chosen.get_mut(&slot) {
            Some((chosen_ballot, chosen_value)) => {
                assert!(
                    chosen_value == value,
                    "slot {} chooses {:?} at ballot {}, but {:?} was chosen at ballot {}",
                    slot,
                    value,
                    ballot,
                    chosen_value,
                    chosen_ballot
                );
                if less_than(ballot, chosen_ballot) {
                    *chosen_ballot = *ballot;
                }
            }
            None => {
                trace!("monitor slot {} chosen {:?} at ballot {}", slot, value, ballot);
                self.chosen.insert(slot, (*ballot, value.clone()));
            }
        }
    }
}

/// Checks validity: a chosen value was proposed by some node before.
#[derive(Debug, Default)]
pub struct ValidityMonitor {
    proposed: HashSet<Value>,
    num_chosen: usize,
}

impl ValidityMonitor {
    pub fn new() -> ValidityMonitor {
        ValidityMonitor::default()
    }

    pub fn num_chosen(&self) -> usize {
        self.num_chosen
    }
}

impl Monitor for ValidityMonitor {
    fn notify_proposed(&mut self, value: &Value) {
        self.proposed.insert(value.clone());
    }

    fn notify_value_chosen(&mut self, slot: Slot, _ballot: &Ballot, value: &Value) {
        assert!(
            self.proposed.contains(value),
            "slot {} chooses {:?} which was never proposed",
            slot,
            value
        );
        self.num_chosen += 1;
    }
}
