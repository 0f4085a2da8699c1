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

//! BlueZ implementation of [`BluetoothAdapter`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role, SocketAddr, Stream};
use bluer::{AdapterEvent, Session};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::adapter::{BluetoothAdapter, Device, RfcommSocket};

/// Upper bound for the service-record connection handshake.
const PROFILE_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Local adapter accessed through the BlueZ D-Bus API.
pub struct BluezAdapter {
    session: Session,
    adapter: bluer::Adapter,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezAdapter {
    /// Open a BlueZ session and select `adapter_name`, or the default adapter.
    pub async fn new(adapter_name: Option<&str>) -> Result<Self> {
        let session = Session::new().await.context("creating BlueZ session")?;
        info!("BlueZ session created");

        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            session,
            adapter,
            discovery: Mutex::new(None),
        })
    }
}

#[async_trait]
impl BluetoothAdapter for BluezAdapter {
    fn name(&self) -> String {
        self.adapter.name().to_string()
    }

    async fn is_powered(&self) -> Result<bool> {
        Ok(self.adapter.is_powered().await?)
    }

    async fn set_powered(&self, powered: bool) -> Result<()> {
        self.adapter.set_powered(powered).await?;
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<Device>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                devices.push(Device::new(device.name().await?, addr));
            }
        }

        debug!("{} bonded devices", devices.len());
        Ok(devices)
    }

    async fn start_discovery(&self) -> Result<mpsc::Receiver<Device>> {
        // Remote names usually arrive after inquiry as property changes.
        let events = self.adapter.discover_devices_with_changes().await?;
        let (tx, rx) = mpsc::channel(32);
        let adapter = self.adapter.clone();

        // Discovery runs for as long as the event stream is alive.
        let task = tokio::spawn(async move {
            pin_mut!(events);
            let mut forwarded = HashSet::new();
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(addr)) => {
                            if forwarded.contains(&addr) {
                                continue;
                            }
                            let name = match adapter.device(addr) {
                                Ok(device) => device.name().await.ok().flatten(),
                                Err(_) => None,
                            };
                            let Some(name) = name else {
                                debug!("{} has no name yet", addr);
                                continue;
                            };
                            forwarded.insert(addr);
                            if tx.send(Device::new(Some(name), addr)).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            debug!("Discovery stream closed");
        });

        if let Some(previous) = self.discovery.lock().replace(task) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn cancel_discovery(&self) -> Result<()> {
        if let Some(task) = self.discovery.lock().take() {
            task.abort();
            debug!("Discovery cancelled");
        }
        Ok(())
    }

    async fn create_channel_socket(
        &self,
        device: &Device,
        channel: u8,
    ) -> Result<Option<Box<dyn RfcommSocket>>> {
        Ok(Some(Box::new(ChannelSocket {
            target: SocketAddr::new(device.address, channel),
            stream: None,
        })))
    }

    async fn create_service_socket(
        &self,
        device: &Device,
        uuid: Uuid,
    ) -> Result<Option<Box<dyn RfcommSocket>>> {
        let remote = self.adapter.device(device.address)?;
        let profile = Profile {
            uuid,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let handle = self
            .session
            .register_profile(profile)
            .await
            .with_context(|| format!("registering profile {}", uuid))?;

        Ok(Some(Box::new(ServiceSocket {
            device: remote,
            uuid,
            handle: Some(handle),
            stream: None,
        })))
    }
}

/// Socket on a fixed RFCOMM channel.
struct ChannelSocket {
    target: SocketAddr,
    stream: Option<Stream>,
}

#[async_trait]
impl RfcommSocket for ChannelSocket {
    async fn connect(&mut self) -> Result<()> {
        debug!("Connecting to {:?}", self.target);
        self.stream = Some(Stream::connect(self.target).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

/// Socket whose channel BlueZ resolves from the remote service record.
struct ServiceSocket {
    device: bluer::Device,
    uuid: Uuid,
    handle: Option<ProfileHandle>,
    stream: Option<Stream>,
}

impl ServiceSocket {
    async fn handshake(&mut self) -> Result<Stream> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| anyhow!("profile {} is not registered", self.uuid))?;

        let connect = self.device.connect_profile(&self.uuid);
        pin_mut!(connect);
        let mut connect_done = false;

        let request = loop {
            tokio::select! {
                res = &mut connect, if !connect_done => {
                    res?;
                    connect_done = true;
                }
                req = handle.next() => {
                    break req.ok_or_else(|| anyhow!("profile closed before a connection arrived"))?;
                }
            }
        };

        Ok(request.accept()?)
    }
}

#[async_trait]
impl RfcommSocket for ServiceSocket {
    async fn connect(&mut self) -> Result<()> {
        debug!("Connecting profile {} on {}", self.uuid, self.device.address());
        let stream = tokio::time::timeout(PROFILE_CONNECT_TIMEOUT, self.handshake())
            .await
            .map_err(|_| anyhow!("timed out connecting profile {}", self.uuid))??;
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let result = match self.stream.take() {
            Some(mut stream) => stream.shutdown().await.map_err(Into::into),
            None => Ok(()),
        };
        // Dropping the handle unregisters the profile.
        self.handle = None;
        result
    }
}
