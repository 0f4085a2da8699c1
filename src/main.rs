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

//! rfcomm-probe command-line entry point.

use anyhow::Result;
use clap::Parser;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rfcomm_probe::bluetooth::BluezAdapter;
use rfcomm_probe::config::Config;
use rfcomm_probe::controller::ScanAndConnectController;
use rfcomm_probe::log_buffer::{DisplaySink, LogBuffer};
use rfcomm_probe::state::Mode;
use rfcomm_probe::ui::{self, ConsoleDisplay, UserAction};

/// Probe RFCOMM connectivity to a Bluetooth Classic device.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (default: <config dir>/rfcomm-probe/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Substring the target device name must contain.
    #[arg(long)]
    target: Option<String>,

    /// Discovery timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Bluetooth adapter to use, e.g. hci0.
    #[arg(long)]
    adapter: Option<String>,

    /// Run a single cycle with this strategy (old or new) and exit.
    #[arg(long)]
    mode: Option<Mode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout belongs to the probe log
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rfcomm_probe=info")),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting rfcomm-probe v{}...", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(target) = cli.target {
        config.target.name_token = target;
    }
    if let Some(timeout) = cli.timeout {
        config.scan.timeout_secs = timeout;
    }
    if cli.adapter.is_some() {
        config.bluetooth.adapter = cli.adapter;
    }
    info!(
        "Looking for devices named *{}*, scan timeout {}s",
        config.target.name_token, config.scan.timeout_secs
    );

    let log = LogBuffer::new();
    let display = Arc::new(Mutex::new(ConsoleDisplay::new()));
    let display_task = tokio::spawn(ui::run_display(log.subscribe(), display.clone()));

    let adapter = Arc::new(BluezAdapter::new(config.bluetooth.adapter.as_deref()).await?);
    let controller = ScanAndConnectController::new(adapter, config, log.clone());
    controller.check_readiness().await;

    if let Some(mode) = cli.mode {
        let cycle = controller.trigger(mode);
        tokio::select! {
            _ = cycle => {}
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        }
    } else {
        run_interactive(&controller).await;
    }

    display_task.abort();
    display.lock().render(&log.render());
    info!("rfcomm-probe stopped");
    Ok(())
}

async fn run_interactive(controller: &ScanAndConnectController) {
    println!("{}", ui::HELP);
    let mut action_rx = ui::spawn_input();

    loop {
        tokio::select! {
            Some(action) = action_rx.recv() => {
                match action {
                    UserAction::Connect(mode) => {
                        controller.trigger(mode);
                    }
                    UserAction::ShowStatus => {
                        let state = controller.state();
                        println!(
                            "State: {}, last mode: {}, adapter ready: {}, target: {}",
                            state.get().as_str(),
                            state.last_mode(),
                            state.is_ready(),
                            controller.matcher().token()
                        );
                    }
                    UserAction::ShowLog => print!("{}", controller.log().render()),
                    UserAction::Help => println!("{}", ui::HELP),
                    UserAction::Quit => {
                        info!("Quit requested");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}
