//! The crate `types` defines a set types used by mpaxos.

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

use serde::{Deserialize, Serialize};

pub use crate::ballot::Ballot;

/// Identity of a node in the cluster.
pub type NodeId = u64;

/// The rank of a node, used as the tie-breaker of ballots and by the leader
/// election.
pub type Rank = u64;

/// The index of a position in the replicated log.
pub type Slot = u64;

/// The value agreed upon in a slot.
#[derive(Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Value {
    pub request_id: u64,
    pub data: Vec<u8>,
}

impl Value {
    pub fn new(request_id: u64, data: Vec<u8>) -> Value {
        Value { request_id, data }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("request_id", &self.request_id)
            .field("num_bytes", &self.data.len())
            .finish()
    }
}

/// A value together with the ballot under which an acceptor accepted it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AcceptedValue {
    pub ballot: Ballot,
    pub value: Value,
}

/// Identifies one proposal attempt. A timer armed for an attempt carries its
/// token, so a timeout racing with the end of that attempt can be recognized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct TimerToken {
    pub slot: Slot,
    pub ballot: Ballot,
}

/// Commands issued to the timer service.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimerCmd {
    Start(TimerToken),
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub enum ElectionMsg {
    Ping { rank: Rank },
}

/// Commands issued to the leader election service.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ElectionCmd {
    Configure {
        peers: Vec<NodeId>,
        id: NodeId,
        rank: Rank,
    },
    Deliver {
        from: NodeId,
        msg: ElectionMsg,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteMsg {
    pub value: Value,
    /// How many times this write has been forwarded to a believed leader.
    pub hops: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareMsg {
    pub slot: Slot,
    pub ballot: Ballot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromiseMsg {
    pub slot: Slot,
    /// The ballot this promise is made for.
    pub ballot: Ballot,
    /// The value accepted before, if any.
    pub prior: Option<AcceptedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectMsg {
    pub slot: Slot,
    /// The ballot refused by the acceptor.
    pub rejected: Ballot,
    /// The ballot the acceptor has already promised.
    pub observed: Ballot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptMsg {
    pub slot: Slot,
    pub ballot: Ballot,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedMsg {
    pub slot: Slot,
    pub ballot: Ballot,
    pub acceptor_rank: Rank,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChosenMsg {
    pub slot: Slot,
    pub ballot: Ballot,
    pub proposer_rank: Rank,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MsgDetail {
    None,
    Write(WriteMsg),
    Prepare(PrepareMsg),
    Promise(PromiseMsg),
    Reject(RejectMsg),
    Accept(AcceptMsg),
    Accepted(AcceptedMsg),
    Chosen(ChosenMsg),
    Election(ElectionMsg),
}

impl std::fmt::Display for MsgDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match &self {
            MsgDetail::Write(_) => "Write",
            MsgDetail::Prepare(_) => "Prepare",
            MsgDetail::Promise(_) => "Promise",
            MsgDetail::Reject(_) => "Reject",
            MsgDetail::Accept(_) => "Accept",
            MsgDetail::Accepted(_) => "Accepted",
            MsgDetail::Chosen(_) => "Chosen",
            MsgDetail::Election(_) => "Election",
            MsgDetail::None => "none",
        };
        write!(f, "{}", msg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from: NodeId,

    /// Who this message send to.
    pub to: NodeId,

    pub detail: MsgDetail,
}
