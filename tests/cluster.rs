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
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use log::{info, Metadata, Record};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mpaxos::types::*;
use mpaxos::{
    Node, PaxosOption, RankElection, SafetyMonitor, TickTimer, ValidityMonitor,
};

struct SimpleLogger;
impl log::Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        println!(
            "[{} - {} - {}:{}] {}",
            record.level(),
            record.target(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: SimpleLogger = SimpleLogger;
static SETUP_LOGGER: std::sync::Once = std::sync::Once::new();

fn setup_logger() {
    SETUP_LOGGER.call_once(|| {
        log::set_logger(&LOGGER)
            .map(|()| log::set_max_level(log::LevelFilter::Info))
            .expect("init logger");
    });
}

fn value(id: u64) -> Value {
    Value::new(id, format!("request-{}", id).into_bytes())
}

/// A simulated cluster. Messages travel through a json encoded wire, the
/// paxos messages are dropped randomly with `loss_ratio`; election pings are
/// always delivered so that the leader stays stable.
struct Cluster {
    ids: Vec<NodeId>,
    nodes: HashMap<NodeId, Node>,
    timers: HashMap<NodeId, TickTimer>,
    elections: HashMap<NodeId, RankElection>,

    wire: VecDeque<(NodeId, String)>,
    rng: StdRng,
    loss_ratio: f64,
    num_dropped: usize,
    down: HashSet<NodeId>,

    applied: HashMap<NodeId, Vec<(Slot, Value)>>,
    safety: Rc<RefCell<SafetyMonitor>>,
    validity: Rc<RefCell<ValidityMonitor>>,
}

impl Cluster {
    /// Node `i` has id `i + 1` and rank `i`.
    fn new(size: u64, seed: u64, loss_ratio: f64) -> Cluster {
        setup_logger();
        let option = PaxosOption::default();
        let ids = (1..=size).collect::<Vec<_>>();
        let safety = Rc::new(RefCell::new(SafetyMonitor::new()));
        let validity = Rc::new(RefCell::new(ValidityMonitor::new()));

        let mut cluster = Cluster {
            ids: ids.clone(),
            nodes: HashMap::new(),
            timers: HashMap::new(),
            elections: HashMap::new(),
            wire: VecDeque::new(),
            rng: StdRng::seed_from_u64(seed),
            loss_ratio,
            num_dropped: 0,
            down: HashSet::new(),
            applied: HashMap::new(),
            safety,
            validity,
        };
        for id in &ids {
            let mut node = Node::new(*id, option.clone());
            node.register_monitor(Box::new(cluster.safety.clone()));
            node.register_monitor(Box::new(cluster.validity.clone()));
            node.configure(*id - 1, ids.clone()).unwrap();
            cluster.nodes.insert(*id, node);
            cluster
                .timers
                .insert(*id, TickTimer::new(option.base_timeout_tick));
            cluster
                .elections
                .insert(*id, RankElection::new(option.election_window_tick));
            cluster.collect(*id);
        }
        cluster
    }

    fn send(&mut self, msg: &Message) {
        if self.down.contains(&msg.from) || self.down.contains(&msg.to) {
            return;
        }
        let is_election = matches!(msg.detail, MsgDetail::Election(_));
        if !is_election && self.loss_ratio > 0.0 && self.rng.gen_bool(self.loss_ratio) {
            self.num_dropped += 1;
            return;
        }
        let bytes = serde_json::to_string(msg).expect("encode message");
        self.wire.push_back((msg.to, bytes));
    }

    /// Moves the effects of a node to its services and to the wire.
    fn collect(&mut self, id: NodeId) {
        let ready = self.nodes.get_mut(&id).unwrap().advance();
        for cmd in ready.timer {
            self.timers.get_mut(&id).unwrap().apply(cmd);
        }
        for cmd in ready.election {
            self.elections.get_mut(&id).unwrap().apply(cmd);
        }
        self.applied.entry(id).or_default().extend(ready.applied);

        let mut msgs = ready.msgs.into_iter().collect::<Vec<_>>();
        msgs.sort_by_key(|(to, _)| *to);
        for (_, msgs) in msgs {
            for msg in &msgs {
                self.send(msg);
            }
        }
    }

    /// Delivers messages until the wire is quiet.
    fn deliver(&mut self) {
        while let Some((to, bytes)) = self.wire.pop_front() {
            if self.down.contains(&to) {
                continue;
            }
            let msg: Message = serde_json::from_str(&bytes).expect("decode message");
            self.nodes.get_mut(&to).unwrap().step(msg);
            self.collect(to);
        }
    }

    fn tick(&mut self) {
        for id in self.ids.clone() {
            if self.down.contains(&id) {
                continue;
            }
            if let Some(token) = self.timers.get_mut(&id).unwrap().tick() {
                self.nodes.get_mut(&id).unwrap().on_timeout(token);
            }
            let ready = self.elections.get_mut(&id).unwrap().tick();
            for (to, msg) in ready.msgs {
                self.send(&Message {
                    from: id,
                    to,
                    detail: MsgDetail::Election(msg),
                });
            }
            if let Some((rank, leader)) = ready.new_leader {
                self.nodes.get_mut(&id).unwrap().on_new_leader(rank, leader);
            }
            self.collect(id);
        }
        self.deliver();
    }

    fn submit(&mut self, id: NodeId, value: Value) {
        self.nodes.get_mut(&id).unwrap().submit(value).unwrap();
        self.collect(id);
        self.deliver();
    }

    fn crash(&mut self, id: NodeId) {
        info!("crash node {}", id);
        self.down.insert(id);
    }

    /// Ticks until every live node believes `leader` is the leader.
    fn wait_leader(&mut self, leader: NodeId, max_ticks: usize) -> bool {
        for _ in 0..max_ticks {
            self.tick();
            let stable = self
                .ids
                .iter()
                .filter(|id| !self.down.contains(*id))
                .all(|id| self.nodes[id].leader() == Some((leader - 1, leader)));
            if stable {
                return true;
            }
        }
        false
    }

    /// The request ids learned by `id`, in slot order, stops at the first gap.
    fn learned_requests(&self, id: NodeId) -> Vec<u64> {
        let learner = self.nodes[&id].learner();
        let mut requests = vec![];
        let mut slot = 0;
        while let Some(entry) = learner.get(slot) {
            requests.push(entry.value.request_id);
            slot += 1;
        }
        requests
    }

    fn check_agreement(&self) {
        for a in &self.ids {
            for b in &self.ids {
                let la = self.nodes[a].learner();
                let lb = self.nodes[b].learner();
                let max_slot = std::cmp::max(la.len(), lb.len()) as Slot * 2;
                for slot in 0..max_slot {
                    if let (Some(x), Some(y)) = (la.get(slot), lb.get(slot)) {
                        assert_eq!(
                            x.value, y.value,
                            "node {} and node {} disagree on slot {}",
                            a, b, slot
                        );
                    }
                }
            }
            let applied = &self.applied[a];
            for (idx, (slot, _)) in applied.iter().enumerate() {
                assert_eq!(*slot, idx as Slot, "node {} applies with a gap", a);
            }
        }
    }
}

#[test]
fn three_nodes_agree_on_forwarded_writes() {
    let mut cluster = Cluster::new(3, 1, 0.0);
    assert!(cluster.wait_leader(1, 20));

    let num_requests = 20;
    for request_id in 0..num_requests {
        let id = cluster.ids[cluster.rng.gen_range(0..cluster.ids.len())];
        cluster.submit(id, value(request_id));
        if request_id % 5 == 4 {
            cluster.tick();
        }
    }
    for _ in 0..10 {
        cluster.tick();
    }

    cluster.check_agreement();
    let leader_applied = cluster.applied[&1].clone();
    assert_eq!(leader_applied.len(), num_requests as usize);
    for id in &cluster.ids {
        assert_eq!(cluster.applied[id], leader_applied, "node {}", id);
        assert_eq!(cluster.nodes[id].num_pending_writes(), 0);
    }
    let mut requests = cluster.learned_requests(2);
    requests.sort();
    assert_eq!(requests, (0..num_requests).collect::<Vec<_>>());

    assert_eq!(cluster.safety.borrow().num_chosen(), num_requests as usize);
    assert!(cluster.validity.borrow().num_chosen() >= num_requests as usize);
}

#[test]
fn five_nodes_survive_message_loss() {
    let mut cluster = Cluster::new(5, 7, 0.15);
    assert!(cluster.wait_leader(1, 20));

    let num_requests = 30;
    for request_id in 0..num_requests {
        cluster.submit(1, value(request_id));
    }
    let mut committed = false;
    for _ in 0..5000 {
        cluster.tick();
        if cluster.nodes[&1].num_pending_writes() == 0 {
            committed = true;
            break;
        }
    }
    assert!(committed, "writes are not committed in time");
    assert!(cluster.num_dropped > 0);

    cluster.check_agreement();
    let mut requests = cluster.learned_requests(1);
    requests.sort();
    requests.dedup();
    assert_eq!(requests, (0..num_requests).collect::<Vec<_>>());

    // The other nodes may miss some chosen messages, but what they applied is
    // a prefix of the leader's log.
    let leader_applied = cluster.applied[&1].clone();
    for id in &cluster.ids {
        let applied = &cluster.applied[id];
        assert!(applied.len() <= leader_applied.len());
        assert_eq!(applied[..], leader_applied[..applied.len()], "node {}", id);
    }
}

#[test]
fn new_leader_continues_the_log() {
    let mut cluster = Cluster::new(3, 3, 0.0);
    assert!(cluster.wait_leader(1, 20));
    for request_id in 0..5 {
        cluster.submit(1, value(request_id));
    }
    assert_eq!(cluster.learned_requests(3), vec![0, 1, 2, 3, 4]);

    cluster.crash(1);
    assert!(cluster.wait_leader(2, 20));
    for request_id in 5..10 {
        cluster.submit(3, value(request_id));
    }
    for _ in 0..10 {
        cluster.tick();
    }

    cluster.check_agreement();
    for id in &[2, 3] {
        assert_eq!(
            cluster.learned_requests(*id),
            (0..10).collect::<Vec<_>>(),
            "node {}",
            id
        );
        assert_eq!(cluster.nodes[id].learner().last_executed_slot(), Some(9));
    }
    assert_eq!(cluster.nodes[&2].proposer().next_slot(), 10);
}
