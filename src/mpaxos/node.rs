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

use std::collections::{HashMap, VecDeque};

use log::{debug, info, trace, warn};

use crate::acceptor::Acceptor;
use crate::constant::*;
use crate::error::Error;
use crate::learner::Learner;
use crate::monitor::Monitor;
use crate::proposer::Proposer;
use crate::table::{Action, EventKind, NodeState, StateTable, Transition};
use crate::types::*;

#[derive(Debug, Clone)]
pub struct PaxosOption {
    /// Specify the base timeout tick of a proposal attempt. The timer service
    /// randomly chooses a value between [`base_timeout_tick`,
    /// `2 * base_timeout_tick`] as the timeout of each attempt, so that
    /// competing proposers don't retry in lockstep.
    ///
    /// default: 10
    pub base_timeout_tick: u32,

    /// Specify the number of ticks of an election window. A leader which
    /// isn't heard during a whole window is replaced.
    ///
    /// default: 3
    pub election_window_tick: u32,

    /// Specify how many times a write can be forwarded to the believed
    /// leader before it is dropped.
    ///
    /// default: 3
    pub max_forward_hops: u32,

    /// Specify the limit of writes queued on a node. `submit` returns
    /// `Error::Busy` once it is reached.
    ///
    /// default: 1024
    pub max_pending_writes: usize,
}

impl Default for PaxosOption {
    fn default() -> PaxosOption {
        PaxosOption {
            base_timeout_tick: 10,
            election_window_tick: 3,
            max_forward_hops: 3,
            max_pending_writes: 1024,
        }
    }
}

/// The effects produced by a node since the last `advance`.
#[derive(Debug, Default)]
pub struct Ready {
    /// Outbound messages, keyed by destination.
    pub msgs: HashMap<NodeId, Vec<Message>>,

    /// Commands for the timer service, in issue order.
    pub timer: Vec<TimerCmd>,

    /// Commands for the leader election service, in issue order.
    pub election: Vec<ElectionCmd>,

    /// The values applied to the replicated state machine, in slot order.
    pub applied: Vec<(Slot, Value)>,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
            && self.timer.is_empty()
            && self.election.is_empty()
            && self.applied.is_empty()
    }

    fn send_msg(&mut self, msg: Message) {
        assert_ne!(msg.to, INVALID_NODE_ID);
        self.msgs.entry(msg.to).or_insert_with(Vec::new).push(msg);
    }
}

#[derive(Debug)]
enum Event {
    Configure,
    Write(WriteMsg),
    Prepare(NodeId, PrepareMsg),
    Accept(NodeId, AcceptMsg),
    Promise(NodeId, PromiseMsg),
    Reject(NodeId, RejectMsg),
    Accepted(NodeId, AcceptedMsg),
    Timeout(TimerToken),
    Chosen(NodeId, ChosenMsg),
    NewLeader(Rank, NodeId),
    Election(NodeId, ElectionMsg),

    Propose,
    Promised,
    Decided,
    Satisfied,
}

impl Event {
    fn from_message(msg: Message) -> Option<Event> {
        let from = msg.from;
        let event = match msg.detail {
            MsgDetail::Write(d) => Event::Write(d),
            MsgDetail::Prepare(d) => Event::Prepare(from, d),
            MsgDetail::Accept(d) => Event::Accept(from, d),
            MsgDetail::Promise(d) => Event::Promise(from, d),
            MsgDetail::Reject(d) => Event::Reject(from, d),
            MsgDetail::Accepted(d) => Event::Accepted(from, d),
            MsgDetail::Chosen(d) => Event::Chosen(from, d),
            MsgDetail::Election(d) => Event::Election(from, d),
            MsgDetail::None => return None,
        };
        Some(event)
    }

    fn kind(&self) -> EventKind {
        match self {
            Event::Configure => EventKind::Configure,
            Event::Write(_) => EventKind::Write,
            Event::Prepare(..) => EventKind::Prepare,
            Event::Accept(..) => EventKind::Accept,
            Event::Promise(..) => EventKind::Promise,
            Event::Reject(..) => EventKind::Reject,
            Event::Accepted(..) => EventKind::Accepted,
            Event::Timeout(_) => EventKind::Timeout,
            Event::Chosen(..) => EventKind::Chosen,
            Event::NewLeader(..) => EventKind::NewLeader,
            Event::Election(..) => EventKind::Election,
            Event::Propose => EventKind::Propose,
            Event::Promised => EventKind::Promised,
            Event::Decided => EventKind::Decided,
            Event::Satisfied => EventKind::Satisfied,
        }
    }
}

fn transition_reason(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Configure => "configured",
        EventKind::Propose => "propose",
        EventKind::Promised => "promised",
        EventKind::Reject => "rejected",
        EventKind::Timeout => "timeout",
        EventKind::Decided => "chosen",
        EventKind::Satisfied => "satisfied",
        _ => "event",
    }
}

/// A multi-paxos node, playing the proposer, acceptor and learner roles of a
/// replicated log at once.
///
/// The node never performs I/O itself: inputs are fed through `step`,
/// `submit`, `on_timeout` and `on_new_leader`, and the effects are collected
/// through `advance`. Every input is processed to completion, including the
/// messages the node addresses to itself, before the call returns.
pub struct Node {
    id: NodeId,
    rank: Rank,
    peers: Vec<NodeId>,
    option: PaxosOption,

    /// The current leader belief: `(rank, id)`.
    leader: Option<(Rank, NodeId)>,

    table: StateTable,
    states: Vec<NodeState>,

    acceptor: Acceptor,
    proposer: Proposer,
    learner: Learner,

    /// Values submitted locally and not chosen yet, the head is the value
    /// the node is trying to commit.
    commit_queue: VecDeque<Value>,

    /// Events raised while handling another event.
    raised: VecDeque<Event>,
    /// Messages addressed to the node itself.
    mailbox: VecDeque<Message>,
    deferred: VecDeque<Event>,

    monitors: Vec<Box<dyn Monitor>>,
    ready: Ready,
}

impl Node {
    pub fn new(id: NodeId, option: PaxosOption) -> Node {
        Node {
            id,
            rank: 0,
            peers: Vec::new(),
            option,
            leader: None,
            table: StateTable::build(),
            states: vec![NodeState::Uninitialized],
            acceptor: Acceptor::new(id, 0),
            proposer: Proposer::new(id, 0, 1),
            learner: Learner::new(id),
            commit_queue: VecDeque::new(),
            raised: VecDeque::new(),
            mailbox: VecDeque::new(),
            deferred: VecDeque::new(),
            monitors: Vec::new(),
            ready: Ready::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    pub fn option(&self) -> &PaxosOption {
        &self.option
    }

    pub fn state(&self) -> NodeState {
        self.states
            .last()
            .cloned()
            .unwrap_or(NodeState::Uninitialized)
    }

    pub fn leader(&self) -> Option<(Rank, NodeId)> {
        self.leader
    }

    pub fn is_leader(&self) -> bool {
        self.leader.map(|(rank, _)| rank == self.rank).unwrap_or(false)
    }

    pub fn acceptor(&self) -> &Acceptor {
        &self.acceptor
    }

    pub fn proposer(&self) -> &Proposer {
        &self.proposer
    }

    pub fn learner(&self) -> &Learner {
        &self.learner
    }

    pub fn num_pending_writes(&self) -> usize {
        self.commit_queue.len()
    }

    pub fn register_monitor(&mut self, monitor: Box<dyn Monitor>) {
        self.monitors.push(monitor);
    }

    /// Configures the identity of this node and the peer set of the
    /// cluster. `peers` must contain this node.
    pub fn configure(&mut self, rank: Rank, peers: Vec<NodeId>) -> Result<(), Error> {
        if self.state() != NodeState::Uninitialized {
            return Err(Error::AlreadyConfigured);
        }
        if self.id == INVALID_NODE_ID {
            return Err(Error::InvalidNodeId(self.id));
        }
        if peers.is_empty() {
            return Err(Error::EmptyPeers);
        }
        if let Some(id) = peers.iter().find(|id| **id == INVALID_NODE_ID) {
            return Err(Error::InvalidNodeId(*id));
        }
        if !peers.contains(&self.id) {
            return Err(Error::NotMember(self.id));
        }

        let mut members = Vec::with_capacity(peers.len());
        for id in peers {
            if !members.contains(&id) {
                members.push(id);
            }
        }
        self.rank = rank;
        self.peers = members;
        self.run(Event::Configure);
        Ok(())
    }

    /// Submits a client write. The value is proposed by this node if it
    /// believes itself the leader, otherwise it is forwarded.
    pub fn submit(&mut self, value: Value) -> Result<(), Error> {
        if self.state() == NodeState::Uninitialized {
            return Err(Error::Unconfigured);
        }
        if self.commit_queue.len() >= self.option.max_pending_writes {
            return Err(Error::Busy);
        }
        self.run(Event::Write(WriteMsg { value, hops: 0 }));
        Ok(())
    }

    pub fn step(&mut self, msg: Message) {
        if msg.to != self.id {
            warn!(
                "node {} drop {} message from {} addressed to {}",
                self.id, msg.detail, msg.from, msg.to
            );
            return;
        }
        if let Some(event) = Event::from_message(msg) {
            self.run(event);
        }
    }

    /// A timer started with `token` has expired.
    pub fn on_timeout(&mut self, token: TimerToken) {
        self.run(Event::Timeout(token));
    }

    /// The leader election service elected a new leader.
    pub fn on_new_leader(&mut self, rank: Rank, id: NodeId) {
        self.run(Event::NewLeader(rank, id));
    }

    pub fn advance(&mut self) -> Ready {
        std::mem::take(&mut self.ready)
    }
}

impl Node {
    fn run(&mut self, event: Event) {
        self.handle(event);
        loop {
            if let Some(event) = self.raised.pop_front() {
                self.handle(event);
                continue;
            }
            match self.mailbox.pop_front() {
                Some(msg) => {
                    if let Some(event) = Event::from_message(msg) {
                        self.handle(event);
                    }
                }
                None => break,
            }
        }
    }

    fn raise(&mut self, event: Event) {
        self.raised.push_back(event);
    }

    fn handle(&mut self, event: Event) {
        let state = self.state();
        let kind = event.kind();
        let rule = match self.table.lookup(state, kind) {
            Some(rule) => rule,
            None => {
                warn!(
                    "node {} state {} receive unexpected event {:?}",
                    self.id, state, event
                );
                return;
            }
        };

        match rule.transition {
            Transition::Ignore => {
                if state == NodeState::Uninitialized {
                    warn!("node {} ignore {:?} before configured", self.id, kind);
                } else {
                    trace!("node {} state {} ignore {:?}", self.id, state, kind);
                }
                return;
            }
            Transition::Defer => {
                debug!("node {} state {} defer {:?}", self.id, state, kind);
                self.deferred.push_back(event);
                return;
            }
            _ => {}
        }

        if !self.perform(rule.action, event) {
            return;
        }

        let reason = transition_reason(kind);
        match rule.transition {
            Transition::Goto(target) => {
                self.states.pop();
                self.enter(target, reason);
            }
            Transition::Push(target) => self.enter(target, reason),
            Transition::Pop => {
                self.states.pop();
            }
            _ => {}
        }

        let current = self.state();
        if current != state {
            debug!(
                "node {} state change from {} to {}, reason: {}",
                self.id, state, current, reason
            );
            while let Some(event) = self.deferred.pop_front() {
                self.raised.push_back(event);
            }
        }
    }

    /// Executes the action of a rule. Returns false if the event turns out to
    /// be staled, the transition of the rule isn't taken in that case.
    fn perform(&mut self, action: Action, event: Event) -> bool {
        match (action, event) {
            (Action::None, _) => true,
            (Action::Configure, Event::Configure) => {
                self.setup();
                true
            }
            (Action::CheckLeader, Event::Write(write)) => {
                self.check_leader(write);
                true
            }
            (Action::Enqueue, Event::Write(write)) => {
                self.enqueue(write.value);
                true
            }
            (Action::HandlePrepare, Event::Prepare(from, msg)) => {
                let reply = self.acceptor.handle_prepare(from, msg.slot, msg.ballot);
                self.reply(from, reply);
                true
            }
            (Action::HandleAccept, Event::Accept(from, msg)) => {
                if let Some(reply) =
                    self.acceptor
                        .handle_accept(from, msg.slot, msg.ballot, msg.value)
                {
                    self.reply(from, reply);
                }
                true
            }
            (Action::CountPromise, Event::Promise(from, msg)) => {
                if self.proposer.receive_promise(from, &msg) {
                    self.raise(Event::Promised);
                }
                true
            }
            (Action::CountAccepted, Event::Accepted(from, msg)) => {
                if self.proposer.receive_accepted(from, &msg) {
                    self.raise(Event::Decided);
                }
                true
            }
            (Action::Rejected, Event::Reject(from, msg)) => {
                if !self.proposer.receive_reject(from, &msg) {
                    return false;
                }
                self.ready.timer.push(TimerCmd::Cancel);
                true
            }
            (Action::Promised, Event::Promised) => {
                self.ready.timer.push(TimerCmd::Cancel);
                true
            }
            (Action::CheckTimeout, Event::Timeout(token)) => {
                if self.proposer.current_token() != Some(token) {
                    debug!(
                        "node {} ignore staled timeout of slot {} ballot {}",
                        self.id, token.slot, token.ballot
                    );
                    return false;
                }
                info!(
                    "node {} slot {} ballot {} timeout",
                    self.id, token.slot, token.ballot
                );
                true
            }
            (Action::Decide, Event::Decided) => {
                self.decide();
                true
            }
            (Action::Learn, Event::Chosen(_, msg)) => {
                self.learn(msg);
                true
            }
            (Action::UpdateLeader, Event::NewLeader(rank, id)) => {
                info!(
                    "node {} leader belief change from {:?} to ({}, {})",
                    self.id, self.leader, rank, id
                );
                self.leader = Some((rank, id));
                true
            }
            (Action::ForwardElection, Event::Election(from, msg)) => {
                self.ready.election.push(ElectionCmd::Deliver { from, msg });
                true
            }
            (Action::Abandon, Event::Satisfied) => {
                self.proposer.abandon("satisfied");
                self.ready.timer.push(TimerCmd::Cancel);
                true
            }
            (action, event) => panic!(
                "node {} action {:?} doesn't apply to event {:?}",
                self.id, action, event
            ),
        }
    }

    fn enter(&mut self, state: NodeState, reason: &'static str) {
        self.states.push(state);
        match state {
            NodeState::Phase1 => self.start_phase1(reason),
            NodeState::Phase2 => self.start_phase2(),
            _ => {}
        }
    }

    fn setup(&mut self) {
        info!(
            "node {} configure with rank {}, peers {:?}, majority {}",
            self.id,
            self.rank,
            self.peers,
            majority(self.peers.len())
        );
        self.acceptor = Acceptor::new(self.id, self.rank);
        self.proposer = Proposer::new(self.id, self.rank, self.peers.len());
        self.leader = Some((self.rank, self.id));
        self.ready.election.push(ElectionCmd::Configure {
            peers: self.peers.clone(),
            id: self.id,
            rank: self.rank,
        });
    }

    fn check_leader(&mut self, write: WriteMsg) {
        match self.leader {
            Some((rank, id)) if rank != self.rank => self.forward(id, write),
            _ => {
                if self.enqueue(write.value) {
                    self.raise(Event::Propose);
                }
            }
        }
    }

    fn forward(&mut self, leader: NodeId, write: WriteMsg) {
        if write.hops >= self.option.max_forward_hops {
            warn!(
                "node {} drop write {:?}, it has been forwarded {} times",
                self.id, write.value, write.hops
            );
            return;
        }
        debug!(
            "node {} forward write {:?} to leader {}",
            self.id, write.value, leader
        );
        let mut msg = self.build_msg_header(leader);
        msg.detail = MsgDetail::Write(WriteMsg {
            value: write.value,
            hops: write.hops + 1,
        });
        self.send_msg(msg);
    }

    fn enqueue(&mut self, value: Value) -> bool {
        if self.commit_queue.len() >= self.option.max_pending_writes {
            warn!(
                "node {} drop write {:?}, too many pending writes",
                self.id, value
            );
            return false;
        }
        trace!(
            "node {} enqueue write {:?}, {} pending",
            self.id,
            value,
            self.commit_queue.len() + 1
        );
        self.commit_queue.push_back(value);
        true
    }

    fn start_phase1(&mut self, reason: &'static str) {
        let slot = self.learner.next_unlearned(self.proposer.next_slot());
        self.proposer.advance_next_slot(slot);
        let (slot, ballot, token) = {
            let round = self.proposer.to_phase1(reason);
            (round.slot, round.ballot, round.token())
        };
        self.ready.timer.push(TimerCmd::Cancel);
        self.ready.timer.push(TimerCmd::Start(token));

        if let Some(value) = self.commit_queue.front() {
            for m in &mut self.monitors {
                m.notify_proposed(value);
            }
        }
        debug!(
            "node {} slot {} broadcast prepare with ballot {}",
            self.id, slot, ballot
        );
        self.bcast(MsgDetail::Prepare(PrepareMsg { slot, ballot }));
    }

    fn start_phase2(&mut self) {
        let attempt = self
            .proposer
            .to_phase2(self.commit_queue.front())
            .and_then(|round| {
                round
                    .propose_value
                    .clone()
                    .map(|value| (round.slot, round.ballot, round.token(), value))
            });
        let (slot, ballot, token, value) = match attempt {
            Some(attempt) => attempt,
            None => {
                warn!(
                    "node {} has nothing to propose after phase 1, back to {}",
                    self.id,
                    NodeState::Ready
                );
                self.proposer.abandon("nothing to propose");
                self.ready.timer.push(TimerCmd::Cancel);
                self.states.pop();
                return;
            }
        };
        self.ready.timer.push(TimerCmd::Cancel);
        self.ready.timer.push(TimerCmd::Start(token));

        for m in &mut self.monitors {
            m.notify_value_proposed(slot, &ballot, &value);
            m.notify_proposed(&value);
        }
        debug!(
            "node {} slot {} broadcast accept {:?} with ballot {}",
            self.id, slot, value, ballot
        );
        self.bcast(MsgDetail::Accept(AcceptMsg {
            slot,
            ballot,
            value,
        }));
    }

    fn decide(&mut self) {
        let chosen = match self.proposer.decide() {
            Some(chosen) => chosen,
            None => return,
        };
        self.ready.timer.push(TimerCmd::Cancel);
        for m in &mut self.monitors {
            m.notify_value_chosen(chosen.slot, &chosen.ballot, &chosen.value);
        }
        info!(
            "node {} slot {} value {:?} is chosen with ballot {}",
            self.id, chosen.slot, chosen.value, chosen.ballot
        );
        self.bcast(MsgDetail::Chosen(chosen));
    }

    fn learn(&mut self, msg: ChosenMsg) {
        if !self.learner.learn(&msg) {
            return;
        }
        let applied = self.learner.advance();
        self.ready.applied.extend(applied);

        if self.commit_queue.front() == Some(&msg.value) {
            self.commit_queue.pop_front();
            debug!(
                "node {} slot {} write {:?} is committed, {} pending",
                self.id,
                msg.slot,
                msg.value,
                self.commit_queue.len()
            );
            self.raise(Event::Satisfied);
            if !self.commit_queue.is_empty() {
                self.raise(Event::Propose);
            }
            return;
        }

        if self.commit_queue.is_empty() {
            return;
        }
        let bumped = match self.proposer.round() {
            Some(round) => round.slot == msg.slot,
            None => !self.proposer.is_proposing(),
        };
        if bumped {
            debug!(
                "node {} slot {} is chosen by rank {}, propose {:?} again",
                self.id,
                msg.slot,
                msg.proposer_rank,
                self.commit_queue.front()
            );
            self.raise(Event::Propose);
        }
    }

    fn build_msg_header(&self, to: NodeId) -> Message {
        Message {
            from: self.id,
            to,
            detail: MsgDetail::None,
        }
    }

    fn send_msg(&mut self, msg: Message) {
        if msg.to == self.id {
            self.mailbox.push_back(msg);
        } else {
            self.ready.send_msg(msg);
        }
    }

    fn reply(&mut self, to: NodeId, detail: MsgDetail) {
        let mut msg = self.build_msg_header(to);
        msg.detail = detail;
        self.send_msg(msg);
    }

    /// Sends `detail` to every peer, this node included.
    fn bcast(&mut self, detail: MsgDetail) {
        for idx in 0..self.peers.len() {
            let to = self.peers[idx];
            let mut msg = self.build_msg_header(to);
            msg.detail = detail.clone();
            self.send_msg(msg);
        }
    }
}
