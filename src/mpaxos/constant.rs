//! The crate `constant` defines a set constant used by mpaxos.

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

/// A special value is used to mark illegal or invalid id of node.
pub const INVALID_NODE_ID: u64 = std::u64::MAX;

/// The round every node starts from. Proposals always use a round strictly
/// larger than this one, so a ballot of this round never names a real
/// proposal.
pub const INITIAL_ROUND: u64 = 0;

/// The first slot of the replicated log.
pub const FIRST_SLOT: u64 = 0;

/// Majority of a cluster with `len` members: `floor(len / 2) + 1`.
#[inline(always)]
pub fn majority(len: usize) -> usize {
    len / 2 + 1
}
