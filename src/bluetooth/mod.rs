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

//! Bluetooth module.
//!
//! Device lookup, discovery scans and the RFCOMM socket strategies, on top
//! of a platform adapter trait with a BlueZ implementation.

mod adapter;
mod bluez;
mod resolver;
mod scan;
mod strategy;

#[cfg(test)]
pub(crate) mod fake;

pub use adapter::{BluetoothAdapter, Device, DeviceMatcher, RfcommSocket};
pub use bluez::BluezAdapter;
pub use resolver::find_paired_match;
pub use scan::{ScanOutcome, ScanSession, ScanTimer};
pub use strategy::{ConnectOutcome, ConnectStrategy};
