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

//! RFCOMM connection probe.
//!
//! Resolves a target Bluetooth Classic device (bonded lookup or discovery)
//! and checks whether an RFCOMM socket can be opened to it, either on a
//! fixed channel or through the Serial Port Profile service record.

pub mod bluetooth;
pub mod config;
pub mod controller;
pub mod log_buffer;
pub mod state;
pub mod ui;
