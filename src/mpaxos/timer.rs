//! The crate `timer` provides a tick driven timer service for proposers.

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

use log::trace;
use rand::{thread_rng, RngCore};

use crate::types::{TimerCmd, TimerToken};

/// Randomly generate the next timeout tick between `[base, 2 * base]`.
#[inline(always)]
fn generate_timeout_tick(base: u32) -> u32 {
    base + thread_rng().next_u32() % (base + 1)
}

/// A single-shot timer. Starting it again re-arms it for the new token, so at
/// most one timeout is pending at any time.
#[derive(Debug)]
pub struct TickTimer {
    base_timeout_tick: u32,
    armed: Option<TimerToken>,
    elapsed_tick: u32,
    timeout_tick: u32,
}

impl TickTimer {
    pub fn new(base_timeout_tick: u32) -> TickTimer {
        let base_timeout_tick = std::cmp::max(1, base_timeout_tick);
        TickTimer {
            base_timeout_tick,
            armed: None,
            elapsed_tick: 0,
            timeout_tick: generate_timeout_tick(base_timeout_tick),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn apply(&mut self, cmd: TimerCmd) {
        match cmd {
            TimerCmd::Start(token) => {
                trace!("timer start for slot {} ballot {}", token.slot, token.ballot);
                self.armed = Some(token);
                self.elapsed_tick = 0;
                self.timeout_tick = generate_timeout_tick(self.base_timeout_tick);
            }
            TimerCmd::Cancel => {
                self.armed = None;
            }
        }
    }

    /// Returns the token of the armed timer if it times out at this tick.
    pub fn tick(&mut self) -> Option<TimerToken> {
        self.armed?;
        self.elapsed_tick += 1;
        if self.elapsed_tick >= self.timeout_tick {
            self.armed.take()
        } else {
            None
        }
    }
}
