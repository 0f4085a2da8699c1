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

//! Platform abstraction over the local Bluetooth adapter.

use anyhow::Result;
use async_trait::async_trait;
use bluer::Address;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A remote Bluetooth device, either bonded or found by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Remote name, if the device has reported one.
    pub name: Option<String>,
    /// Bluetooth address.
    pub address: Address,
}

impl Device {
    pub fn new(name: Option<String>, address: Address) -> Self {
        Self { name, address }
    }

    /// Name for display, falling back to the address.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Name predicate used to recognise the target device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMatcher {
    token: String,
}

impl DeviceMatcher {
    /// Match devices whose name contains `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Unnamed devices never match.
    pub fn matches(&self, device: &Device) -> bool {
        device
            .name
            .as_deref()
            .is_some_and(|name| name.contains(&self.token))
    }
}

/// An RFCOMM socket handle that has been created but not yet connected.
#[async_trait]
pub trait RfcommSocket: Send {
    /// Open the connection to the remote device.
    async fn connect(&mut self) -> Result<()>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Operations the probe needs from the local Bluetooth adapter.
#[async_trait]
pub trait BluetoothAdapter: Send + Sync + 'static {
    /// Adapter name (e.g. "hci0").
    fn name(&self) -> String;

    async fn is_powered(&self) -> Result<bool>;

    async fn set_powered(&self, powered: bool) -> Result<()>;

    /// Devices already bonded with this adapter.
    async fn bonded_devices(&self) -> Result<Vec<Device>>;

    /// Start discovery and subscribe to "device found" events.
    ///
    /// Dropping the receiver deregisters the listener.
    async fn start_discovery(&self) -> Result<mpsc::Receiver<Device>>;

    /// Stop discovery. Stopping when no discovery is running is a no-op.
    async fn cancel_discovery(&self) -> Result<()>;

    /// Create a socket bound to a fixed RFCOMM channel on `device`.
    async fn create_channel_socket(
        &self,
        device: &Device,
        channel: u8,
    ) -> Result<Option<Box<dyn RfcommSocket>>>;

    /// Create a socket resolved through the service record for `uuid`.
    async fn create_service_socket(
        &self,
        device: &Device,
        uuid: Uuid,
    ) -> Result<Option<Box<dyn RfcommSocket>>>;
}
