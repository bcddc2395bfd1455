//! The crate `ballot` defines the ordering key of proposals.

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

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::constant::INITIAL_ROUND;

/// A ballot is a pair of round and the rank of the proposer which picked the
/// round. Two proposers choosing the same round are told apart by their rank.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Ballot {
    pub round: u64,
    pub rank: u64,
}

impl Ballot {
    pub fn new(round: u64, rank: u64) -> Ballot {
        Ballot { round, rank }
    }

    /// Builds the ballot following `round` for the proposer `rank`.
    pub fn next(round: u64, rank: u64) -> Ballot {
        Ballot::new(round + 1, rank)
    }
}

impl Default for Ballot {
    fn default() -> Ballot {
        Ballot {
            round: INITIAL_ROUND,
            rank: 0,
        }
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({}, {})", self.round, self.rank)
    }
}

/// Is ballot `a` ordered before ballot `b`? Rounds are compared first, the
/// proposer rank breaks ties.
#[inline(always)]
pub fn less_than(a: &Ballot, b: &Ballot) -> bool {
    a.round < b.round || (a.round == b.round && a.rank < b.rank)
}

#[inline(always)]
pub fn equal(a: &Ballot, b: &Ballot) -> bool {
    a.round == b.round && a.rank == b.rank
}

impl PartialOrd for Ballot {
    fn partial_cmp(&self, other: &Ballot) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ballot {
    fn cmp(&self, other: &Ballot) -> Ordering {
        if less_than(self, other) {
            Ordering::Less
        } else if equal(self, other) {
            Ordering::Equal
        } else {
            Ordering::Greater
        }
    }
}
