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

//! Console display and command input.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::log_buffer::DisplaySink;
use crate::state::Mode;

/// Help text for interactive mode.
pub const HELP: &str = "Commands: old (legacy channel socket), new (service record socket), status, log, help, quit";

/// Actions the user can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Connect(Mode),
    ShowStatus,
    ShowLog,
    Help,
    Quit,
}

impl UserAction {
    /// Parse a typed command. Empty input yields `None`.
    pub fn parse(input: &str) -> Option<Result<Self, String>> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let action = match input.to_lowercase().as_str() {
            "status" | "s" => Ok(UserAction::ShowStatus),
            "log" | "l" => Ok(UserAction::ShowLog),
            "help" | "h" | "?" => Ok(UserAction::Help),
            "quit" | "q" | "exit" => Ok(UserAction::Quit),
            "o" | "1" => Ok(UserAction::Connect(Mode::Old)),
            "n" | "2" => Ok(UserAction::Connect(Mode::New)),
            other => other.parse::<Mode>().map(UserAction::Connect),
        };
        Some(action)
    }
}

/// Prints the log to stdout, one line at a time.
///
/// It is handed the full rendered text on every update and prints only the
/// lines it has not printed yet.
#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    printed: usize,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines of `text` not printed yet.
    fn pending<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.lines().skip(self.printed).collect()
    }
}

impl DisplaySink for ConsoleDisplay {
    fn render(&mut self, text: &str) {
        let pending = self.pending(text);
        if pending.is_empty() {
            return;
        }

        let mut out = std::io::stdout().lock();
        for line in &pending {
            let _ = writeln!(out, "{}", line);
        }
        let _ = out.flush();
        self.printed += pending.len();
    }
}

/// Render every log update on `sink` until the log is dropped.
pub async fn run_display<S: DisplaySink>(mut rx: watch::Receiver<String>, sink: Arc<Mutex<S>>) {
    while rx.changed().await.is_ok() {
        let text = rx.borrow_and_update().clone();
        sink.lock().render(&text);
    }
    debug!("Display closed");
}

/// Read commands from stdin. End of input sends `Quit`.
pub fn spawn_input() -> mpsc::UnboundedReceiver<UserAction> {
    let (action_tx, action_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match UserAction::parse(&line) {
                    Some(Ok(action)) => {
                        if action_tx.send(action).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => eprintln!("{}. {}", e, HELP),
                    None => {}
                },
                Ok(None) | Err(_) => {
                    let _ = action_tx.send(UserAction::Quit);
                    break;
                }
            }
        }
    });

    action_rx
}
