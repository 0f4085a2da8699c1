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

//! Lookup of an already bonded target device.

use tracing::warn;

use super::adapter::{BluetoothAdapter, Device, DeviceMatcher};
use crate::log_buffer::LogBuffer;

/// Return the first bonded device accepted by `matcher`.
///
/// Registry failures are logged and reported as "not found".
pub async fn find_paired_match<A: BluetoothAdapter + ?Sized>(
    adapter: &A,
    matcher: &DeviceMatcher,
    log: &LogBuffer,
) -> Option<Device> {
    log.append("Looking for a paired device");

    match adapter.bonded_devices().await {
        Ok(devices) => {
            let found = devices.into_iter().find(|d| matcher.matches(d));
            if let Some(device) = &found {
                log.append(format!("Found paired device: {}", device.display_name()));
            }
            found
        }
        Err(e) => {
            warn!("Bonded device lookup failed: {:#}", e);
            log.append(format!("Looking failed: {}", e));
            log.separator();
            None
        }
    }
}
