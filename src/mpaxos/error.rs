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

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The node hasn't received its rank and peer set yet.
    #[error("node is not configured")]
    Unconfigured,

    /// Identity and peers are immutable once configured.
    #[error("node is already configured")]
    AlreadyConfigured,

    #[error("the peer set is empty")]
    EmptyPeers,

    /// The local node must be one of the acceptors it talks to.
    #[error("node {0} is not a member of the peer set")]
    NotMember(u64),

    /// The commit queue is full, the submitted write is rejected.
    #[error("system is busy")]
    Busy,

    #[error("invalid node id (expected in range [0, {}))", std::u64::MAX)]
    InvalidNodeId(u64),
}
