// Copyright 2026 Daniel Pelikan
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

//! Controller state tracking.

use parking_lot::RwLock;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which socket strategy a user action selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Fixed RFCOMM channel, no service lookup.
    #[default]
    Old,
    /// Service-record lookup by UUID.
    New,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Old => "old",
            Mode::New => "new",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "old" | "legacy" => Ok(Mode::Old),
            "new" | "standard" => Ok(Mode::New),
            other => Err(format!("unknown mode '{}', expected old or new", other)),
        }
    }
}

/// Where the controller is in a scan/connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Resolving,
    ResolvedPaired,
    Scanning,
    Connecting,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "Idle",
            ControllerState::Resolving => "Resolving",
            ControllerState::ResolvedPaired => "Resolved (paired)",
            ControllerState::Scanning => "Scanning",
            ControllerState::Connecting => "Connecting",
        }
    }
}

/// Shared controller status.
#[derive(Debug)]
pub struct StateTracker {
    current: RwLock<ControllerState>,
    history: RwLock<Vec<ControllerState>>,
    last_mode: RwLock<Mode>,
    ready: RwLock<bool>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            current: RwLock::new(ControllerState::Idle),
            history: RwLock::new(vec![ControllerState::Idle]),
            last_mode: RwLock::new(Mode::default()),
            ready: RwLock::new(false),
        }
    }
}

impl StateTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, state: ControllerState) {
        *self.current.write() = state;
        self.history.write().push(state);
    }

    pub fn get(&self) -> ControllerState {
        *self.current.read()
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> Vec<ControllerState> {
        self.history.read().clone()
    }

    pub fn set_last_mode(&self, mode: Mode) {
        *self.last_mode.write() = mode;
    }

    /// Mode of the most recent user action.
    pub fn last_mode(&self) -> Mode {
        *self.last_mode.read()
    }

    pub fn set_ready(&self, ready: bool) {
        *self.ready.write() = ready;
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.read()
    }
}
