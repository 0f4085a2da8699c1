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

//! The two socket-opening strategies under test.

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use super::adapter::{BluetoothAdapter, Device, RfcommSocket};
use crate::config::RfcommConfig;
use crate::log_buffer::LogBuffer;
use crate::state::Mode;

/// How to obtain the RFCOMM socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStrategy {
    /// Connect straight to a fixed channel, skipping the SDP lookup.
    Legacy { channel: u8 },
    /// Resolve the channel through the service record for `uuid`.
    Standard { uuid: Uuid },
}

/// Result of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Connected, then closed cleanly.
    Closed,
    /// No socket handle could be created.
    NullHandle,
    /// Creating or connecting the socket failed.
    OpenFailed(String),
    /// Connected, but closing failed.
    CloseFailed(String),
}

impl ConnectOutcome {
    /// The line that ends an attempt in the log.
    pub fn terminal_line(&self) -> String {
        match self {
            ConnectOutcome::Closed => "Socket closed".to_string(),
            ConnectOutcome::NullHandle => "Created socket is null".to_string(),
            ConnectOutcome::OpenFailed(msg) => format!("Error opening socket: {}", msg),
            ConnectOutcome::CloseFailed(msg) => format!("Error closing socket: {}", msg),
        }
    }
}

impl ConnectStrategy {
    pub fn for_mode(mode: Mode, config: &RfcommConfig) -> Self {
        match mode {
            Mode::Old => ConnectStrategy::Legacy {
                channel: config.legacy_channel,
            },
            Mode::New => ConnectStrategy::Standard {
                uuid: config.service_uuid,
            },
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            ConnectStrategy::Legacy { .. } => Mode::Old,
            ConnectStrategy::Standard { .. } => Mode::New,
        }
    }

    fn header(&self) -> &'static str {
        match self {
            ConnectStrategy::Legacy { .. } => "* Try to open the socket the old way *",
            ConnectStrategy::Standard { .. } => "* Try to open the socket the new way *",
        }
    }

    async fn create_socket(
        &self,
        adapter: &dyn BluetoothAdapter,
        device: &Device,
    ) -> Result<Option<Box<dyn RfcommSocket>>> {
        match *self {
            ConnectStrategy::Legacy { channel } => {
                adapter.create_channel_socket(device, channel).await
            }
            ConnectStrategy::Standard { uuid } => adapter.create_service_socket(device, uuid).await,
        }
    }

    /// Open a socket to `device`, then close it straight away.
    ///
    /// Never fails: every problem ends up as a log line. Each attempt logs
    /// exactly one terminal line followed by one separator.
    pub async fn connect(
        &self,
        adapter: &dyn BluetoothAdapter,
        device: &Device,
        log: &LogBuffer,
    ) -> ConnectOutcome {
        log.append(self.header());
        debug!("Connecting to {} using {:?}", device, self);

        let outcome = match self.create_socket(adapter, device).await {
            Err(e) => ConnectOutcome::OpenFailed(format!("{:#}", e)),
            Ok(None) => ConnectOutcome::NullHandle,
            Ok(Some(mut socket)) => match socket.connect().await {
                Err(e) => ConnectOutcome::OpenFailed(format!("{:#}", e)),
                Ok(()) => {
                    log.append("Socket connected");
                    match socket.close().await {
                        Ok(()) => ConnectOutcome::Closed,
                        Err(e) => ConnectOutcome::CloseFailed(format!("{:#}", e)),
                    }
                }
            },
        };

        if outcome != ConnectOutcome::Closed {
            warn!("Connection attempt to {} failed: {:?}", device, outcome);
        }
        log.append(outcome.terminal_line());
        log.separator();
        log.append("");
        outcome
    }
}
