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

/// The states of a paxos node. `Ready` is the bottom of the state stack, the
/// proposer phases are pushed on top of it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    Uninitialized,
    Ready,
    Phase1,
    Phase2,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The kinds of events a node reacts to. The last four are raised by the node
/// itself while handling another event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Configure,
    Write,
    Prepare,
    Accept,
    Promise,
    Reject,
    Accepted,
    Timeout,
    Chosen,
    NewLeader,
    Election,

    Propose,
    Promised,
    Decided,
    Satisfied,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    Configure,
    CheckLeader,
    Enqueue,
    HandlePrepare,
    HandleAccept,
    CountPromise,
    CountAccepted,
    /// Records a reject and cancels the timer of the attempt.
    Rejected,
    /// Cancels the timer of the attempt, the phase 1 quorum is reached.
    Promised,
    /// Drops a timeout armed for an attempt no longer in flight.
    CheckTimeout,
    Decide,
    Learn,
    UpdateLeader,
    ForwardElection,
    /// Drops the attempt in flight.
    Abandon,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Stay,
    /// Replaces the top state, the entry action of the target runs even if
    /// it is the same state.
    Goto(NodeState),
    Push(NodeState),
    Pop,
    /// Keeps the event until the node leaves the current state.
    Defer,
    /// Drops the event silently.
    Ignore,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub action: Action,
    pub transition: Transition,
}

/// `state -> { event kind -> (action, transition) }`. Built once per node and
/// interpreted by the dispatcher; an event without a rule is unexpected in
/// that state.
#[derive(Debug)]
pub struct StateTable {
    rules: HashMap<(NodeState, EventKind), Rule>,
}

impl StateTable {
    fn on(&mut self, state: NodeState, kind: EventKind, action: Action, transition: Transition) {
        self.rules.insert((state, kind), Rule { action, transition });
    }

    /// Acceptor, learner and election duties run in every configured state,
    /// independently of the proposer phase.
    fn on_configured(&mut self, state: NodeState) {
        use self::Action::*;
        use self::EventKind::*;
        use self::Transition::*;

        self.on(state, EventKind::Prepare, HandlePrepare, Stay);
        self.on(state, EventKind::Accept, HandleAccept, Stay);
        self.on(state, Chosen, Learn, Stay);
        self.on(state, NewLeader, UpdateLeader, Stay);
        self.on(state, Election, ForwardElection, Stay);
        self.on(state, EventKind::Configure, Action::None, Ignore);
    }

    pub fn build() -> StateTable {
        use self::Action::*;
        use self::EventKind::*;
        use self::NodeState::*;
        use self::Transition::*;

        let mut t = StateTable {
            rules: HashMap::new(),
        };

        t.on(Uninitialized, EventKind::Configure, Action::Configure, Goto(Ready));
        t.on(Uninitialized, Election, Action::None, Defer);
        for kind in &[
            Write,
            EventKind::Prepare,
            EventKind::Accept,
            Promise,
            Reject,
            Accepted,
            Timeout,
            Chosen,
            NewLeader,
        ] {
            t.on(Uninitialized, *kind, Action::None, Ignore);
        }

        t.on_configured(Ready);
        t.on(Ready, Write, CheckLeader, Stay);
        t.on(Ready, Propose, Action::None, Push(Phase1));
        t.on(Ready, Satisfied, Action::None, Stay);
        for kind in &[Promise, Reject, Accepted, Timeout, EventKind::Promised, Decided] {
            t.on(Ready, *kind, Action::None, Ignore);
        }

        t.on_configured(Phase1);
        t.on(Phase1, Write, Enqueue, Stay);
        t.on(Phase1, Promise, CountPromise, Stay);
        t.on(Phase1, EventKind::Promised, Action::Promised, Goto(Phase2));
        t.on(Phase1, Reject, Rejected, Goto(Phase1));
        t.on(Phase1, Timeout, CheckTimeout, Goto(Phase1));
        t.on(Phase1, Propose, Action::None, Goto(Phase1));
        t.on(Phase1, Satisfied, Abandon, Pop);
        t.on(Phase1, Accepted, Action::None, Ignore);
        t.on(Phase1, Decided, Action::None, Ignore);

        t.on_configured(Phase2);
        t.on(Phase2, Write, Enqueue, Stay);
        t.on(Phase2, Accepted, CountAccepted, Stay);
        t.on(Phase2, Decided, Decide, Pop);
        t.on(Phase2, Reject, Rejected, Goto(Phase1));
        t.on(Phase2, Timeout, CheckTimeout, Goto(Phase1));
        t.on(Phase2, Propose, Action::None, Goto(Phase1));
        t.on(Phase2, Satisfied, Abandon, Pop);
        t.on(Phase2, Promise, Action::None, Ignore);
        t.on(Phase2, EventKind::Promised, Action::None, Ignore);

        t
    }

    pub fn lookup(&self, state: NodeState, kind: EventKind) -> Option<Rule> {
        self.rules.get(&(state, kind)).copied()
    }
}
