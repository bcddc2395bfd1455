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

use std::collections::HashMap;

use log::{debug, trace};

use crate::ballot::{equal, less_than};
use crate::types::*;

/// The per-slot state kept by an acceptor.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AcceptorRecord {
    /// The highest ballot this acceptor has promised.
    pub promised: Ballot,

    /// The last accepted ballot and value, absent if never accepted.
    pub accepted: Option<AcceptedValue>,
}

impl AcceptorRecord {
    fn promise(ballot: Ballot) -> AcceptorRecord {
        AcceptorRecord {
            promised: ballot,
            accepted: None,
        }
    }
}

/// The acceptor role of a node. Records are created lazily, on the first
/// Prepare of a slot, and live as long as the node.
#[derive(Debug)]
pub struct Acceptor {
    id: NodeId,
    rank: Rank,
    records: HashMap<Slot, AcceptorRecord>,
}

impl Acceptor {
    pub fn new(id: NodeId, rank: Rank) -> Acceptor {
        Acceptor {
            id,
            rank,
            records: HashMap::new(),
        }
    }

    pub fn record(&self, slot: Slot) -> Option<&AcceptorRecord> {
        self.records.get(&slot)
    }

    /// Phase 1b. Replies with a `Promise` carrying the value accepted before,
    /// or a `Reject` if a higher ballot has been promised already.
    pub fn handle_prepare(&mut self, from: NodeId, slot: Slot, ballot: Ballot) -> MsgDetail {
        let record = match self.records.get_mut(&slot) {
            Some(r) => r,
            None => {
                debug!(
                    "node {} slot {} first prepare from {} with ballot {}, promise",
                    self.id, slot, from, ballot
                );
                self.records.insert(slot, AcceptorRecord::promise(ballot));
                return MsgDetail::Promise(PromiseMsg {
                    slot,
                    ballot,
                    prior: None,
                });
            }
        };

        if less_than(&ballot, &record.promised) {
            debug!(
                "node {} slot {} reject prepare from {}: ballot {} is lower than promised {}",
                self.id, slot, from, ballot, record.promised
            );
            return MsgDetail::Reject(RejectMsg {
                slot,
                rejected: ballot,
                observed: record.promised,
            });
        }

        // The accepted ballot is kept for ordering; raising the promise above it
        // withdraws the older ballot from any further accept.
        debug!(
            "node {} slot {} promise {} to {}, previous promised {}, accepted {:?}",
            self.id, slot, ballot, from, record.promised, record.accepted
        );
        record.promised = ballot;
        MsgDetail::Promise(PromiseMsg {
            slot,
            ballot,
            prior: record.accepted.clone(),
        })
    }

    /// Phase 2b. Returns `None` if the slot was never prepared on this
    /// acceptor, the accept is dropped in that case.
    pub fn handle_accept(
        &mut self,
        from: NodeId,
        slot: Slot,
        ballot: Ballot,
        value: Value,
    ) -> Option<MsgDetail> {
        let record = match self.records.get_mut(&slot) {
            Some(r) => r,
            None => {
                debug!(
                    "node {} slot {} drop accept from {} with ballot {}: no prepare received",
                    self.id, slot, from, ballot
                );
                return None;
            }
        };

        if !equal(&ballot, &record.promised) {
            debug!(
                "node {} slot {} reject accept from {}: ballot {} isn't the promised {}",
                self.id, slot, from, ballot, record.promised
            );
            return Some(MsgDetail::Reject(RejectMsg {
                slot,
                rejected: ballot,
                observed: record.promised,
            }));
        }

        if let Some(prev) = &record.accepted {
            assert!(
                !less_than(&ballot, &prev.ballot),
                "node {} slot {} accepts ballot {} lower than the accepted {}",
                self.id,
                slot,
                ballot,
                prev.ballot
            );
        }

        trace!(
            "node {} slot {} accept {:?} with ballot {} from {}",
            self.id,
            slot,
            value,
            ballot,
            from
        );
        record.accepted = Some(AcceptedValue {
            ballot,
            value: value.clone(),
        });
        Some(MsgDetail::Accepted(AcceptedMsg {
            slot,
            ballot,
            acceptor_rank: self.rank,
            value,
        }))
    }
}
