//! # mpaxos
//!
//! `mpaxos` is an implementation of Multi-Paxos, the classic consensus
//! algorithm for a replicated log. It is based on the paper:
//!
//! > Paxos Made Simple (ACM SIGACT News 2001)
//!
//! Each node plays the three roles of the paper at once:
//!
//! - the acceptor, which promises and accepts ballots slot by slot,
//! - the proposer, which drives phase 1 and phase 2 of one slot at a time,
//! - the learner, which records chosen values and applies them without gaps.
//!
//! A node doesn't perform any I/O. Messages, timeouts and leader changes are
//! fed into it, and the outbound messages, the timer commands and the applied
//! values are collected from `Node::advance`. The leader election and the
//! timer are external services; `RankElection` and `TickTimer` are simple
//! tick driven implementations of them.
//!
//! Ballots are `(round, rank)` pairs, the rank of a node breaks the tie when
//! two proposers choose the same round.

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

extern crate chrono;
extern crate log;
extern crate rand;
extern crate serde;
extern crate thiserror;

mod ballot;
mod error;
mod node;

pub mod acceptor;
pub mod constant;
pub mod election;
pub mod learner;
pub mod monitor;
pub mod proposer;
pub mod table;
pub mod timer;
pub mod types;

pub use crate::ballot::{equal, less_than};
pub use crate::election::{ElectionReady, RankElection};
pub use crate::error::Error;
pub use crate::monitor::{Monitor, SafetyMonitor, ValidityMonitor};
pub use crate::node::{Node, PaxosOption, Ready};
pub use crate::table::NodeState;
pub use crate::timer::TickTimer;
