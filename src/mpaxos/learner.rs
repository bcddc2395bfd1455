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

use std::collections::BTreeMap;

use chrono::prelude::*;
use log::{debug, trace};

use crate::constant::FIRST_SLOT;
use crate::types::*;

/// A slot learned as chosen.
#[derive(Debug, Clone)]
pub struct LearnedEntry {
    pub ballot: Ballot,
    pub proposer_rank: Rank,
    pub value: Value,

    /// Wall clock time in nanoseconds when the slot was learned.
    pub learned_at: i64,
}

/// The learner role of a node. Keeps every chosen slot, and applies them to
/// the replicated state machine without gaps.
#[derive(Debug)]
pub struct Learner {
    local_id: NodeId,
    log: BTreeMap<Slot, LearnedEntry>,
    last_executed_slot: Option<Slot>,
}

impl Learner {
    pub fn new(local_id: NodeId) -> Learner {
        Learner {
            local_id,
            log: BTreeMap::new(),
            last_executed_slot: None,
        }
    }

    pub fn get(&self, slot: Slot) -> Option<&LearnedEntry> {
        self.log.get(&slot)
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.log.contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// The highest slot applied, `None` until slot 0 is applied.
    pub fn last_executed_slot(&self) -> Option<Slot> {
        self.last_executed_slot
    }

    /// The first slot not learned yet, starting from `from`.
    pub fn next_unlearned(&self, from: Slot) -> Slot {
        let mut slot = from;
        while self.log.contains_key(&slot) {
            slot += 1;
        }
        slot
    }

    /// Records a chosen value. Returns false if the slot was learned before
    /// with the same value.
    ///
    /// Two different values chosen for one slot break the agreement of paxos,
    /// the node panics.
    pub fn learn(&mut self, msg: &ChosenMsg) -> bool {
        if let Some(entry) = self.log.get(&msg.slot) {
            assert!(
                entry.value == msg.value,
                "node {} slot {} has chosen {:?} at ballot {}, but receive another chosen {:?} at ballot {}",
                self.local_id,
                msg.slot,
                entry.value,
                entry.ballot,
                msg.value,
                msg.ballot
            );
            trace!(
                "node {} slot {} ignore duplicated chosen from rank {}",
                self.local_id,
                msg.slot,
                msg.proposer_rank
            );
            return false;
        }

        debug!(
            "node {} slot {} learn {:?} chosen at ballot {} by rank {}",
            self.local_id, msg.slot, msg.value, msg.ballot, msg.proposer_rank
        );
        self.log.insert(
            msg.slot,
            LearnedEntry {
                ballot: msg.ballot,
                proposer_rank: msg.proposer_rank,
                value: msg.value.clone(),
                learned_at: Local::now().timestamp_nanos_opt().unwrap_or_default(),
            },
        );
        true
    }

    /// Applies the learned slots following the last executed one, stops at
    /// the first gap.
    pub fn advance(&mut self) -> Vec<(Slot, Value)> {
        let mut applied = Vec::new();
        loop {
            let next = self
                .last_executed_slot
                .map(|s| s + 1)
                .unwrap_or(FIRST_SLOT);
            match self.log.get(&next) {
                Some(entry) => {
                    applied.push((next, entry.value.clone()));
                    self.last_executed_slot = Some(next);
                }
                None => break,
            }
        }
        if !applied.is_empty() {
            debug!(
                "node {} apply {} slots, last executed slot {:?}",
                self.local_id,
                applied.len(),
                self.last_executed_slot
            );
        }
        applied
    }
}
