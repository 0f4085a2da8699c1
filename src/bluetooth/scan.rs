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

//! Discovery scan for the target device.
//!
//! A session listens to "device found" events until the first device
//! accepted by the matcher shows up or the timeout guard fires. The result
//! is delivered once, over a oneshot channel.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::adapter::{BluetoothAdapter, Device, DeviceMatcher};
use crate::log_buffer::LogBuffer;

/// How a scan session finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A matching device was found. Discovery has been stopped.
    Matched(Device),
    /// The timeout guard fired before any match.
    TimedOut,
    /// The platform ended discovery before any match.
    Ended,
}

/// Single delayed action guarding a scan.
///
/// Cancelling is idempotent: cancelling an already fired or already
/// cancelled timer does nothing.
#[derive(Debug)]
pub struct ScanTimer {
    handle: JoinHandle<()>,
}

impl ScanTimer {
    /// Arm a timer that fires once after `after`.
    pub fn arm(after: Duration) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(());
        });
        (Self { handle }, rx)
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for ScanTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Handle to a running scan.
pub struct ScanSession {
    adapter: Arc<dyn BluetoothAdapter>,
    timer: Arc<ScanTimer>,
    task: JoinHandle<()>,
}

impl ScanSession {
    /// Start discovery and arm the timeout guard.
    ///
    /// On failure to start discovery the error is logged and returned; no
    /// timer is armed.
    pub async fn start(
        adapter: Arc<dyn BluetoothAdapter>,
        matcher: DeviceMatcher,
        timeout: Duration,
        log: LogBuffer,
    ) -> Result<(Self, oneshot::Receiver<ScanOutcome>)> {
        log.append("Scanning for bluetooth devices");

        let listener = match adapter.start_discovery().await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Failed to start discovery: {:#}", e);
                log.append(format!("Scanning failed: {}", e));
                log.separator();
                return Err(e);
            }
        };

        let (timer, fired) = ScanTimer::arm(timeout);
        let timer = Arc::new(timer);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        info!("Discovery started, timeout {:?}", timeout);
        let task = tokio::spawn(Self::run(
            adapter.clone(),
            listener,
            matcher,
            timer.clone(),
            fired,
            log,
            outcome_tx,
        ));

        Ok((
            Self {
                adapter,
                timer,
                task,
            },
            outcome_rx,
        ))
    }

    /// Abort the session: cancel the timer, drop the listener and stop discovery.
    ///
    /// The outcome receiver sees the sender dropped.
    pub async fn cancel(&self) {
        self.timer.cancel();
        self.task.abort();
        if let Err(e) = self.adapter.cancel_discovery().await {
            warn!("Failed to stop discovery: {:#}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    async fn run(
        adapter: Arc<dyn BluetoothAdapter>,
        mut listener: mpsc::Receiver<Device>,
        matcher: DeviceMatcher,
        timer: Arc<ScanTimer>,
        mut fired: oneshot::Receiver<()>,
        log: LogBuffer,
        outcome_tx: oneshot::Sender<ScanOutcome>,
    ) {
        enum Step {
            Timer(bool),
            Event(Option<Device>),
        }

        let mut timer_live = true;
        let outcome = loop {
            let step = tokio::select! {
                biased;
                res = &mut fired, if timer_live => Step::Timer(res.is_ok()),
                event = listener.recv() => Step::Event(event),
            };

            match step {
                Step::Timer(true) => {
                    drop(listener);
                    stop_discovery(adapter.as_ref()).await;
                    log.append("Scanning timeout");
                    log.separator();
                    break ScanOutcome::TimedOut;
                }
                Step::Timer(false) => {
                    timer_live = false;
                }
                Step::Event(Some(device)) => {
                    let Some(name) = device.name.clone() else {
                        debug!("Ignoring unnamed device {}", device.address);
                        continue;
                    };
                    log.append(format!("Found: {}", name));

                    if matcher.matches(&device) {
                        timer.cancel();
                        drop(listener);
                        stop_discovery(adapter.as_ref()).await;
                        log.append(format!("{} is recognised", name));
                        break ScanOutcome::Matched(device);
                    }
                }
                Step::Event(None) => {
                    timer.cancel();
                    log.append("Scanning stopped before a device was recognised");
                    log.separator();
                    break ScanOutcome::Ended;
                }
            }
        };

        debug!("Scan finished: {:?}", outcome);
        let _ = outcome_tx.send(outcome);
    }
}

async fn stop_discovery(adapter: &dyn BluetoothAdapter) {
    if let Err(e) = adapter.cancel_discovery().await {
        warn!("Failed to stop discovery: {:#}", e);
    }
}
