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

//! Append-only, timestamped log shown to the user.
//!
//! Every append re-renders the whole buffer and publishes it on a
//! `watch` channel. The display task owns the receiving end, so the
//! terminal is only ever written from one place.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Line logged at the start of each user action.
pub const BANNER: &str = "*********************************";

/// Line closing a step or an attempt.
pub const SEPARATOR: &str = "----------------------";

/// A single log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub at: DateTime<Local>,
    pub text: String,
}

impl LogLine {
    /// Render as `[HH:MM:SS] text`. Blank lines stay blank.
    pub fn render(&self) -> String {
        if self.text.is_empty() {
            String::new()
        } else {
            format!("[{}] {}", self.at.format("%H:%M:%S"), self.text)
        }
    }
}

/// Shared handle to the log. Cloning is cheap.
#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<RwLock<Vec<LogLine>>>,
    rendered: Arc<watch::Sender<String>>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        let (rendered, _) = watch::channel(String::new());
        Self {
            lines: Arc::new(RwLock::new(Vec::new())),
            rendered: Arc::new(rendered),
        }
    }

    /// Append a line and publish the full rendered text.
    pub fn append(&self, text: impl Into<String>) {
        let line = LogLine {
            at: Local::now(),
            text: text.into(),
        };
        if !line.text.is_empty() {
            info!("{}", line.text);
        }

        let mut lines = self.lines.write();
        lines.push(line);
        // Published under the lock so renders are never reordered.
        self.rendered.send_replace(render_lines(&lines));
    }

    /// Append the separator line.
    pub fn separator(&self) {
        self.append(SEPARATOR);
    }

    /// Subscribe to the rendered text.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.rendered.subscribe()
    }

    /// Full rendered text.
    pub fn render(&self) -> String {
        render_lines(&self.lines.read())
    }

    /// Snapshot of the line texts, without timestamps.
    pub fn texts(&self) -> Vec<String> {
        self.lines.read().iter().map(|l| l.text.clone()).collect()
    }
}

fn render_lines(lines: &[LogLine]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.render());
        out.push('\n');
    }
    out
}

/// Receives the full rendered log text on every update.
pub trait DisplaySink: Send {
    fn render(&mut self, text: &str);
}
