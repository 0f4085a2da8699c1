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

//! Scriptable in-memory adapter for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::Address;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::adapter::{BluetoothAdapter, Device, RfcommSocket};

/// Build a named device with a distinguishing last address byte.
pub fn named(name: &str, id: u8) -> Device {
    Device::new(Some(name.to_string()), Address::new([0xAA, 0, 0, 0, 0, id]))
}

/// How created sockets behave.
#[derive(Debug, Clone)]
pub enum SocketBehavior {
    Ok,
    Null,
    CreateError(String),
    ConnectError(String),
    CloseError(String),
}

#[derive(Debug, Clone)]
enum DiscoveryScript {
    Fail(String),
    Events {
        events: Vec<(Duration, Device)>,
        hold_open: bool,
    },
}

/// Fake adapter that records the calls made on it.
pub struct FakeAdapter {
    powered: Mutex<bool>,
    bonded: Result<Vec<Device>, String>,
    discovery: DiscoveryScript,
    socket: SocketBehavior,
    lookup_delay: Duration,
    connect_delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
    undelivered: Arc<Mutex<Vec<Device>>>,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdapter {
    /// Powered adapter with no bonded devices and a silent, open-ended discovery.
    pub fn new() -> Self {
        Self {
            powered: Mutex::new(true),
            bonded: Ok(Vec::new()),
            discovery: DiscoveryScript::Events {
                events: Vec::new(),
                hold_open: true,
            },
            socket: SocketBehavior::Ok,
            lookup_delay: Duration::ZERO,
            connect_delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
            undelivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_powered(self, powered: bool) -> Self {
        *self.powered.lock() = powered;
        self
    }

    pub fn with_bonded(mut self, devices: Vec<Device>) -> Self {
        self.bonded = Ok(devices);
        self
    }

    pub fn with_bonded_error(mut self, message: &str) -> Self {
        self.bonded = Err(message.to_string());
        self
    }

    /// Emit `events` after their delays, then keep the discovery open.
    pub fn with_discovery(mut self, events: Vec<(Duration, Device)>) -> Self {
        self.discovery = DiscoveryScript::Events {
            events,
            hold_open: true,
        };
        self
    }

    /// Emit `events`, then end the discovery stream.
    pub fn with_finite_discovery(mut self, events: Vec<(Duration, Device)>) -> Self {
        self.discovery = DiscoveryScript::Events {
            events,
            hold_open: false,
        };
        self
    }

    pub fn with_discovery_error(mut self, message: &str) -> Self {
        self.discovery = DiscoveryScript::Fail(message.to_string());
        self
    }

    pub fn with_socket(mut self, behavior: SocketBehavior) -> Self {
        self.socket = behavior;
        self
    }

    /// Make every bonded device lookup take `delay`.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    /// Make every socket connect take `delay`.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Discovery events that could not be delivered because the listener was gone.
    pub fn undelivered(&self) -> Vec<Device> {
        self.undelivered.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn make_socket(&self) -> Result<Option<Box<dyn RfcommSocket>>> {
        match &self.socket {
            SocketBehavior::Null => Ok(None),
            SocketBehavior::CreateError(msg) => Err(anyhow!("{}", msg)),
            behavior => Ok(Some(Box::new(FakeSocket {
                behavior: behavior.clone(),
                delay: self.connect_delay,
                calls: self.calls.clone(),
            }))),
        }
    }
}

#[async_trait]
impl BluetoothAdapter for FakeAdapter {
    fn name(&self) -> String {
        "hci-fake".to_string()
    }

    async fn is_powered(&self) -> Result<bool> {
        Ok(*self.powered.lock())
    }

    async fn set_powered(&self, powered: bool) -> Result<()> {
        self.record(format!("set_powered:{}", powered));
        *self.powered.lock() = powered;
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<Device>> {
        self.record("bonded_devices");
        if !self.lookup_delay.is_zero() {
            tokio::time::sleep(self.lookup_delay).await;
        }
        self.bonded.clone().map_err(|e| anyhow!("{}", e))
    }

    async fn start_discovery(&self) -> Result<mpsc::Receiver<Device>> {
        self.record("start_discovery");
        let (events, hold_open) = match &self.discovery {
            DiscoveryScript::Fail(msg) => return Err(anyhow!("{}", msg)),
            DiscoveryScript::Events { events, hold_open } => (events.clone(), *hold_open),
        };

        let (tx, rx) = mpsc::channel(16);
        let undelivered = self.undelivered.clone();
        tokio::spawn(async move {
            for (delay, device) in events {
                tokio::time::sleep(delay).await;
                if let Err(e) = tx.send(device).await {
                    undelivered.lock().push(e.0);
                }
            }
            if hold_open {
                tx.closed().await;
            }
        });
        Ok(rx)
    }

    async fn cancel_discovery(&self) -> Result<()> {
        self.record("cancel_discovery");
        Ok(())
    }

    async fn create_channel_socket(
        &self,
        _device: &Device,
        channel: u8,
    ) -> Result<Option<Box<dyn RfcommSocket>>> {
        self.record(format!("channel_socket:{}", channel));
        self.make_socket()
    }

    async fn create_service_socket(
        &self,
        _device: &Device,
        uuid: Uuid,
    ) -> Result<Option<Box<dyn RfcommSocket>>> {
        self.record(format!("service_socket:{}", uuid));
        self.make_socket()
    }
}

struct FakeSocket {
    behavior: SocketBehavior,
    delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RfcommSocket for FakeSocket {
    async fn connect(&mut self) -> Result<()> {
        self.calls.lock().push("connect".to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behavior {
            SocketBehavior::ConnectError(msg) => Err(anyhow!("{}", msg)),
            _ => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.calls.lock().push("close".to_string());
        match &self.behavior {
            SocketBehavior::CloseError(msg) => Err(anyhow!("{}", msg)),
            _ => Ok(()),
        }
    }
}
