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

//! Transport seam between the connection core and the platform Bluetooth stack.

use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::error::Result;

/// Serial Port Profile UUID used to match the CrisisLink RFCOMM service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Service name advertised in the SDP record.
pub const SERVICE_NAME: &str = "CrisisLink";

/// RFCOMM channel shared by both peers.
pub const RFCOMM_CHANNEL: u8 = 1;

/// Identity of a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// Opaque address string, e.g. `00:11:22:33:44:55`.
    pub address: String,
    /// Display name, if the stack knows one.
    pub name: Option<String>,
}

impl DeviceIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Display name, falling back to the address.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Byte stream usable as a session connection.
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Link for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// An open bidirectional stream, exclusively owned by whoever holds it.
pub type Connection = Box<dyn Link>;

/// A listening channel. Dropping it closes the channel.
#[async_trait]
pub trait Acceptor: Send {
    /// Block until a peer connects.
    async fn accept(&mut self) -> Result<(Connection, DeviceIdentity)>;
}

/// Platform Bluetooth stack as seen by the connection core.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Check platform preconditions (adapter present and enabled, access granted).
    async fn ensure_ready(&self) -> Result<()>;

    /// Open a listening channel registered under the service identity.
    async fn listen(&self) -> Result<Box<dyn Acceptor>>;

    /// Open one outbound stream to `target`.
    async fn connect(&self, target: &DeviceIdentity) -> Result<Connection>;

    /// Stop any discovery running on the shared adapter.
    async fn cancel_discovery(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_prefers_name() {
        let bare = DeviceIdentity::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(bare.label(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(bare.to_string(), "AA:BB:CC:DD:EE:FF");

        let named = bare.with_name("Rescue Phone");
        assert_eq!(named.label(), "Rescue Phone");
        assert_eq!(named.to_string(), "Rescue Phone (AA:BB:CC:DD:EE:FF)");
    }

    #[test]
    fn test_service_uuid() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
    }
}
