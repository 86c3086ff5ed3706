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

//! Bluetooth communication module.
//!
//! Listens for and initiates RFCOMM connections and manages the single live
//! session between two peers.

mod initiator;
mod listener;
mod manager;
#[cfg(feature = "bluez")]
mod rfcomm;
mod session;
mod transport;

pub use initiator::Initiator;
pub use listener::{Handoff, Listener};
pub use manager::{ConnectionManager, ManagerOptions, SendOutcome};
#[cfg(feature = "bluez")]
pub use rfcomm::RfcommTransport;
pub use session::{Session, SessionEvent, READ_BUFFER_SIZE};
pub use transport::{
    Acceptor, Connection, DeviceIdentity, Link, Transport, RFCOMM_CHANNEL, SERVICE_NAME,
    SERVICE_UUID,
};
