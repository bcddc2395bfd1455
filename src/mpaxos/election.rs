//! The crate `election` provides a leader election service for paxos nodes.
//!
//! Every node pings its peers each tick. At the end of each window, the node
//! who has the lowest rank among the ones heard from (itself included) is
//! elected.

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

use log::{debug, info, warn};

use crate::constant::INVALID_NODE_ID;
use crate::types::*;

/// The output of an election tick.
#[derive(Debug, Default)]
pub struct ElectionReady {
    pub msgs: Vec<(NodeId, ElectionMsg)>,

    /// Set when the elected leader changes: `(rank, id)`.
    pub new_leader: Option<(Rank, NodeId)>,
}

#[derive(Debug)]
pub struct RankElection {
    window_tick: u32,
    elapsed_tick: u32,

    id: NodeId,
    rank: Rank,
    peers: Vec<NodeId>,

    heard: BTreeMap<Rank, NodeId>,
    leader: Option<(Rank, NodeId)>,
}

impl RankElection {
    pub fn new(window_tick: u32) -> RankElection {
        RankElection {
            window_tick: std::cmp::max(1, window_tick),
            elapsed_tick: 0,
            id: INVALID_NODE_ID,
            rank: 0,
            peers: Vec::new(),
            heard: BTreeMap::new(),
            leader: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.id != INVALID_NODE_ID
    }

    pub fn leader(&self) -> Option<(Rank, NodeId)> {
        self.leader
    }

    pub fn apply(&mut self, cmd: ElectionCmd) {
        match cmd {
            ElectionCmd::Configure { peers, id, rank } => {
                info!(
                    "node {} configure election with rank {}, peers {:?}",
                    id, rank, peers
                );
                self.id = id;
                self.rank = rank;
                self.peers = peers;
                self.heard.clear();
                self.elapsed_tick = 0;
            }
            ElectionCmd::Deliver { from, msg } => {
                if !self.is_configured() {
                    warn!("election receive {:?} from {} before configured", msg, from);
                    return;
                }
                match msg {
                    ElectionMsg::Ping { rank } => {
                        self.heard.insert(rank, from);
                    }
                }
            }
        }
    }

    pub fn tick(&mut self) -> ElectionReady {
        let mut ready = ElectionReady::default();
        if !self.is_configured() {
            return ready;
        }

        for to in &self.peers {
            if *to != self.id {
                ready
                    .msgs
                    .push((*to, ElectionMsg::Ping { rank: self.rank }));
            }
        }

        self.elapsed_tick += 1;
        if self.elapsed_tick < self.window_tick {
            return ready;
        }
        self.elapsed_tick = 0;

        let mut heard = std::mem::take(&mut self.heard);
        heard.insert(self.rank, self.id);
        let elected = heard
            .iter()
            .next()
            .map(|(rank, id)| (*rank, *id))
            .unwrap_or((self.rank, self.id));
        if self.leader != Some(elected) {
            info!(
                "node {} elect leader {} with rank {}, previous {:?}",
                self.id, elected.1, elected.0, self.leader
            );
            self.leader = Some(elected);
            ready.new_leader = Some(elected);
        } else {
            debug!("node {} leader {} is still alive", self.id, elected.1);
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(id: NodeId, rank: Rank) -> RankElection {
        let mut e = RankElection::new(2);
        e.apply(ElectionCmd::Configure {
            peers: vec![1, 2, 3],
            id,
            rank,
        });
        e
    }

    #[test]
    fn ping_every_peer() {
        let mut e = configured(2, 1);
        let ready = e.tick();
        let targets = ready.msgs.iter().map(|(to, _)| *to).collect::<Vec<_>>();
        assert_eq!(targets, vec![1, 3]);
        assert!(ready.new_leader.is_none());
    }

    #[test]
    fn elect_lowest_rank_heard() {
        let mut e = configured(2, 1);
        e.apply(ElectionCmd::Deliver {
            from: 3,
            msg: ElectionMsg::Ping { rank: 2 },
        });
        e.apply(ElectionCmd::Deliver {
            from: 1,
            msg: ElectionMsg::Ping { rank: 0 },
        });
        e.tick();
        assert_eq!(e.tick().new_leader, Some((0, 1)));

        // Rank 0 stops answering.
        e.apply(ElectionCmd::Deliver {
            from: 3,
            msg: ElectionMsg::Ping { rank: 2 },
        });
        e.tick();
        assert_eq!(e.tick().new_leader, Some((1, 2)));
        assert_eq!(e.leader(), Some((1, 2)));
    }

    #[test]
    fn unconfigured_election_is_silent() {
        let mut e = RankElection::new(1);
        e.apply(ElectionCmd::Deliver {
            from: 1,
            msg: ElectionMsg::Ping { rank: 0 },
        });
        let ready = e.tick();
        assert!(ready.msgs.is_empty());
        assert!(ready.new_leader.is_none());
    }
}
