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

//! Scan-and-connect controller.
//!
//! Each user action runs one cycle: resolve the target (bonded lookup,
//! otherwise a discovery scan), then open and close a socket with the
//! strategy chosen by that action.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bluetooth::{
    find_paired_match, BluetoothAdapter, ConnectStrategy, Device, DeviceMatcher, ScanOutcome,
    ScanSession,
};
use crate::config::Config;
use crate::log_buffer::{LogBuffer, BANNER};
use crate::state::{ControllerState, Mode, StateTracker};

/// Ownership of the controller by the most recent user action.
///
/// Only the cycle holding the current generation may change the state or
/// own the running scan.
#[derive(Default)]
struct CycleSlot {
    generation: u64,
    in_flight: bool,
    scan: Option<Arc<ScanSession>>,
}

/// Drives device resolution and connection attempts.
#[derive(Clone)]
pub struct ScanAndConnectController {
    adapter: Arc<dyn BluetoothAdapter>,
    config: Arc<Config>,
    matcher: DeviceMatcher,
    log: LogBuffer,
    state: Arc<StateTracker>,
    cycle: Arc<Mutex<CycleSlot>>,
    // Serialises scan start-up so a superseded cycle never races a newer
    // one on the adapter's discovery.
    scan_gate: Arc<tokio::sync::Mutex<()>>,
}

impl ScanAndConnectController {
    pub fn new(adapter: Arc<dyn BluetoothAdapter>, config: Config, log: LogBuffer) -> Self {
        let matcher = DeviceMatcher::new(config.target.name_token.clone());
        Self {
            adapter,
            config: Arc::new(config),
            matcher,
            log,
            state: StateTracker::new(),
            cycle: Arc::new(Mutex::new(CycleSlot::default())),
            scan_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn state(&self) -> &Arc<StateTracker> {
        &self.state
    }

    pub fn matcher(&self) -> &DeviceMatcher {
        &self.matcher
    }

    /// Check the adapter is usable, powering it on if configured to.
    ///
    /// Until this returns `true`, user actions are ignored.
    pub async fn check_readiness(&self) -> bool {
        let name = self.adapter.name();

        let mut powered = match self.adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                error!("Failed to query adapter {}: {:#}", name, e);
                self.log
                    .append(format!("Adapter {} is unavailable: {}", name, e));
                self.state.set_ready(false);
                return false;
            }
        };

        if !powered && self.config.bluetooth.power_on {
            self.log.append(format!("Powering on adapter {}", name));
            match self.adapter.set_powered(true).await {
                Ok(()) => powered = self.adapter.is_powered().await.unwrap_or(false),
                Err(e) => self
                    .log
                    .append(format!("Failed to power on adapter {}: {}", name, e)),
            }
        }

        if powered {
            self.log.append(format!("Adapter {} is powered", name));
        } else {
            self.log.append(format!("Adapter {} is not powered", name));
        }
        self.state.set_ready(powered);
        powered
    }

    /// Start a cycle for a user action. Returns immediately.
    pub fn trigger(&self, mode: Mode) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run_cycle(mode).await })
    }

    async fn run_cycle(&self, mode: Mode) {
        if !self.state.is_ready() {
            self.log
                .append("Bluetooth adapter is not ready, action ignored");
            return;
        }

        // Fixed for the whole cycle, whatever the user does meanwhile.
        let strategy = ConnectStrategy::for_mode(mode, &self.config.rfcomm);

        let (generation, previous_scan, previous_busy) = {
            let mut slot = self.cycle.lock();
            slot.generation += 1;
            let busy = std::mem::replace(&mut slot.in_flight, true);
            self.state.set_last_mode(strategy.mode());
            (slot.generation, slot.scan.take(), busy)
        };

        match previous_scan {
            Some(previous) if !previous.is_finished() => {
                previous.cancel().await;
                self.log.append("Previous scan cancelled");
            }
            _ if previous_busy => self.log.append("Previous action superseded"),
            _ => {}
        }

        self.log.append(BANNER);
        self.log.append("");
        info!("Starting {} cycle #{}", mode, generation);
        self.set_state(generation, ControllerState::Resolving);

        if let Some(device) =
            find_paired_match(self.adapter.as_ref(), &self.matcher, &self.log).await
        {
            if self.set_state(generation, ControllerState::ResolvedPaired) {
                self.connect(generation, strategy, device).await;
            }
            return;
        }

        let gate = self.scan_gate.lock().await;
        if !self.is_current(generation) {
            debug!("Cycle #{} superseded before scanning", generation);
            return;
        }

        self.log.append("No existing devices found");
        self.set_state(generation, ControllerState::Scanning);

        let started = ScanSession::start(
            self.adapter.clone(),
            self.matcher.clone(),
            self.config.scan.timeout(),
            self.log.clone(),
        )
        .await;
        let (session, outcome) = match started {
            Ok(started) => started,
            Err(_) => {
                self.finish(generation);
                return;
            }
        };

        let session = Arc::new(session);
        let owned = {
            let mut slot = self.cycle.lock();
            if slot.generation == generation {
                slot.scan = Some(session.clone());
                true
            } else {
                false
            }
        };
        if !owned {
            // A newer action arrived while discovery was starting.
            session.cancel().await;
            debug!("Cycle #{} superseded while scanning", generation);
            return;
        }
        drop(gate);

        match outcome.await {
            Ok(ScanOutcome::Matched(device)) => {
                self.connect(generation, strategy, device).await;
            }
            Ok(ScanOutcome::TimedOut) | Ok(ScanOutcome::Ended) => {
                self.finish(generation);
            }
            Err(_) => {
                // Superseded by a newer action, which now owns the state.
                debug!("Scan of cycle #{} cancelled", generation);
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.cycle.lock().generation == generation
    }

    /// Set the state if `generation` still owns the controller.
    fn set_state(&self, generation: u64, state: ControllerState) -> bool {
        let slot = self.cycle.lock();
        if slot.generation != generation {
            return false;
        }
        self.state.set(state);
        true
    }

    /// Return to Idle if `generation` still owns the controller.
    fn finish(&self, generation: u64) {
        let mut slot = self.cycle.lock();
        if slot.generation == generation {
            slot.in_flight = false;
            slot.scan = None;
            self.state.set(ControllerState::Idle);
        }
    }

    /// Run the connection attempt on a background task.
    async fn connect(&self, generation: u64, strategy: ConnectStrategy, device: Device) {
        if !self.set_state(generation, ControllerState::Connecting) {
            debug!("Cycle #{} superseded before connecting", generation);
            return;
        }

        let adapter = self.adapter.clone();
        let log = self.log.clone();
        let attempt =
            tokio::spawn(async move { strategy.connect(adapter.as_ref(), &device, &log).await });

        match attempt.await {
            Ok(outcome) => debug!("Connection attempt finished: {:?}", outcome),
            Err(e) => error!("Connection task failed: {}", e),
        }
        self.finish(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::fake::{named, FakeAdapter, SocketBehavior};
    use crate::config::SPP_UUID;
    use crate::log_buffer::SEPARATOR;
    use std::time::Duration;
    use ControllerState::*;

    async fn ready_controller(adapter: Arc<FakeAdapter>) -> ScanAndConnectController {
        let controller = ScanAndConnectController::new(adapter, Config::default(), LogBuffer::new());
        assert!(controller.check_readiness().await);
        controller
    }

    fn position(texts: &[String], text: &str) -> usize {
        texts
            .iter()
            .position(|t| t == text)
            .unwrap_or_else(|| panic!("'{}' not logged: {:?}", text, texts))
    }

    #[tokio::test]
    async fn test_paired_device_legacy() {
        let adapter = Arc::new(
            FakeAdapter::new().with_bonded(vec![named("Headset", 1), named("Worldpay-Term-04", 4)]),
        );
        let controller = ready_controller(adapter.clone()).await;

        controller.trigger(Mode::Old).await.unwrap();

        assert_eq!(
            controller.state().history(),
            vec![Idle, Resolving, ResolvedPaired, Connecting, Idle]
        );
        let texts = controller.log().texts();
        let found = position(&texts, "Found paired device: Worldpay-Term-04");
        let attempt = position(&texts, "* Try to open the socket the old way *");
        assert!(found < attempt);
        assert!(texts.contains(&"Socket closed".to_string()));
        assert_eq!(adapter.count("start_discovery"), 0);
        assert!(adapter.calls().contains(&"channel_socket:1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_then_standard_connect() {
        let adapter = Arc::new(FakeAdapter::new().with_discovery(vec![
            (Duration::from_secs(2), named("OtherDevice", 1)),
            (Duration::from_secs(2), named("Worldpay-Term-09", 9)),
        ]));
        let controller = ready_controller(adapter.clone()).await;

        controller.trigger(Mode::New).await.unwrap();

        let texts = controller.log().texts();
        let no_paired = position(&texts, "No existing devices found");
        let other = position(&texts, "Found: OtherDevice");
        let target = position(&texts, "Found: Worldpay-Term-09");
        let recognised = position(&texts, "Worldpay-Term-09 is recognised");
        let attempt = position(&texts, "* Try to open the socket the new way *");
        assert!(no_paired < other && other < target && target < recognised && recognised < attempt);
        assert!(!texts.contains(&"OtherDevice is recognised".to_string()));

        assert_eq!(adapter.count("cancel_discovery"), 1);
        assert!(adapter
            .calls()
            .contains(&format!("service_socket:{}", SPP_UUID)));
        assert_eq!(
            controller.state().history(),
            vec![Idle, Resolving, Scanning, Connecting, Idle]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_timeout_returns_to_idle() {
        let adapter = Arc::new(FakeAdapter::new());
        let controller = ready_controller(adapter.clone()).await;

        controller.trigger(Mode::Old).await.unwrap();

        let texts = controller.log().texts();
        assert_eq!(
            &texts[texts.len() - 2..],
            &["Scanning timeout".to_string(), SEPARATOR.to_string()]
        );
        assert_eq!(controller.state().get(), Idle);
        assert_eq!(
            controller.state().history(),
            vec![Idle, Resolving, Scanning, Idle]
        );
        assert_eq!(adapter.count("connect"), 0);
        assert!(!adapter.calls().iter().any(|c| c.contains("socket")));
    }

    #[tokio::test]
    async fn test_scan_failure_returns_to_idle() {
        let adapter = Arc::new(FakeAdapter::new().with_discovery_error("Resource Not Ready"));
        let controller = ready_controller(adapter.clone()).await;

        controller.trigger(Mode::Old).await.unwrap();

        let texts = controller.log().texts();
        assert!(texts.contains(&"Scanning failed: Resource Not Ready".to_string()));
        assert_eq!(controller.state().get(), Idle);
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back_to_scan() {
        let adapter = Arc::new(
            FakeAdapter::new()
                .with_bonded_error("org.bluez.Error.NotReady")
                .with_finite_discovery(vec![(Duration::ZERO, named("Worldpay-Term-02", 2))]),
        );
        let controller = ready_controller(adapter.clone()).await;

        controller.trigger(Mode::Old).await.unwrap();

        let texts = controller.log().texts();
        assert!(texts.contains(&"Looking failed: org.bluez.Error.NotReady".to_string()));
        assert!(texts.contains(&"Worldpay-Term-02 is recognised".to_string()));
        assert!(texts.contains(&"Socket closed".to_string()));
    }

    #[tokio::test]
    async fn test_connect_failure_is_not_fatal() {
        let adapter = Arc::new(
            FakeAdapter::new()
                .with_bonded(vec![named("Worldpay-Term-04", 4)])
                .with_socket(SocketBehavior::ConnectError("Host is down".to_string())),
        );
        let controller = ready_controller(adapter).await;

        controller.trigger(Mode::Old).await.unwrap();
        controller.trigger(Mode::New).await.unwrap();

        let texts = controller.log().texts();
        assert_eq!(
            texts
                .iter()
                .filter(|t| *t == "Error opening socket: Host is down")
                .count(),
            2
        );
        assert_eq!(controller.state().get(), Idle);
    }

    #[tokio::test]
    async fn test_not_ready_ignores_actions() {
        let adapter = Arc::new(FakeAdapter::new().with_powered(false));
        let mut config = Config::default();
        config.bluetooth.power_on = false;
        let controller = ScanAndConnectController::new(adapter.clone(), config, LogBuffer::new());

        assert!(!controller.check_readiness().await);
        controller.trigger(Mode::Old).await.unwrap();

        let texts = controller.log().texts();
        assert!(texts.contains(&"Adapter hci-fake is not powered".to_string()));
        assert!(texts.contains(&"Bluetooth adapter is not ready, action ignored".to_string()));
        assert_eq!(adapter.count("bonded_devices"), 0);
        assert_eq!(controller.state().history(), vec![Idle]);
    }

    #[tokio::test]
    async fn test_readiness_powers_on_adapter() {
        let adapter = Arc::new(FakeAdapter::new().with_powered(false));
        let controller = ScanAndConnectController::new(adapter.clone(), Config::default(), LogBuffer::new());

        assert!(controller.check_readiness().await);
        assert_eq!(adapter.count("set_powered:true"), 1);
        assert!(controller
            .log()
            .texts()
            .contains(&"Adapter hci-fake is powered".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_fixed_at_trigger() {
        let adapter = Arc::new(FakeAdapter::new().with_discovery(vec![(
            Duration::from_secs(30),
            named("Worldpay-Term-09", 9),
        )]));
        let controller = ready_controller(adapter.clone()).await;

        let cycle = controller.trigger(Mode::Old);
        tokio::time::sleep(Duration::from_secs(5)).await;
        controller.state().set_last_mode(Mode::New);
        cycle.await.unwrap();

        assert!(adapter.calls().contains(&"channel_socket:1".to_string()));
        assert!(!adapter.calls().iter().any(|c| c.starts_with("service_socket")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_action_supersedes_running_scan() {
        let adapter = Arc::new(FakeAdapter::new());
        let controller = ready_controller(adapter.clone()).await;

        let first = controller.trigger(Mode::Old);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(controller.state().get(), Scanning);

        let second = controller.trigger(Mode::New);
        first.await.unwrap();
        second.await.unwrap();

        let texts = controller.log().texts();
        assert_eq!(texts.iter().filter(|t| *t == "Previous scan cancelled").count(), 1);
        assert_eq!(texts.iter().filter(|t| *t == "Scanning timeout").count(), 1);
        assert_eq!(adapter.count("start_discovery"), 2);
        assert_eq!(controller.state().last_mode(), Mode::New);
        assert_eq!(controller.state().get(), Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_action_during_lookup_scans_once() {
        let adapter = Arc::new(FakeAdapter::new().with_lookup_delay(Duration::from_secs(1)));
        let controller = ready_controller(adapter.clone()).await;

        let first = controller.trigger(Mode::Old);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = controller.trigger(Mode::New);
        first.await.unwrap();
        second.await.unwrap();

        let texts = controller.log().texts();
        assert_eq!(texts.iter().filter(|t| *t == "Previous action superseded").count(), 1);
        assert_eq!(texts.iter().filter(|t| *t == "No existing devices found").count(), 1);
        assert_eq!(texts.iter().filter(|t| *t == "Scanning timeout").count(), 1);
        assert_eq!(adapter.count("bonded_devices"), 2);
        assert_eq!(adapter.count("start_discovery"), 1);
        assert_eq!(
            controller.state().history(),
            vec![Idle, Resolving, Resolving, Scanning, Idle]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_connect_does_not_reset_newer_cycle() {
        let adapter = Arc::new(
            FakeAdapter::new()
                .with_bonded(vec![named("Worldpay-Term-04", 4)])
                .with_connect_delay(Duration::from_secs(20)),
        );
        let controller = ready_controller(adapter.clone()).await;

        let first = controller.trigger(Mode::Old);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(controller.state().get(), Connecting);

        let second = controller.trigger(Mode::New);
        first.await.unwrap();
        assert_eq!(controller.state().get(), Connecting);

        second.await.unwrap();
        assert_eq!(controller.state().get(), Idle);
        assert_eq!(
            controller.state().history(),
            vec![
                Idle,
                Resolving,
                ResolvedPaired,
                Connecting,
                Resolving,
                ResolvedPaired,
                Connecting,
                Idle
            ]
        );

        let texts = controller.log().texts();
        assert_eq!(texts.iter().filter(|t| *t == "Previous action superseded").count(), 1);
        assert_eq!(texts.iter().filter(|t| *t == "Socket closed").count(), 2);
    }
}
