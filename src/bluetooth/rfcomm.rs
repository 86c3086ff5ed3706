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

//! Bluetooth RFCOMM transport on top of BlueZ.

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::StreamExt;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::transport::{Acceptor, Connection, DeviceIdentity, Transport};
use crate::config::BluetoothConfig;
use crate::error::{Error, Result};

/// RFCOMM transport using the default BlueZ adapter.
pub struct RfcommTransport {
    session: Session,
    adapter: Adapter,
    service_uuid: Uuid,
    service_name: String,
    channel: u8,
    power_on: bool,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl RfcommTransport {
    /// Connect to BlueZ and prepare the default adapter.
    pub async fn new(config: &BluetoothConfig) -> Result<Self> {
        info!("Initializing Bluetooth transport...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        let transport = Self {
            session,
            adapter,
            service_uuid: config.service_uuid,
            service_name: config.service_name.clone(),
            channel: config.rfcomm_channel,
            power_on: config.power_on,
            discovery: Mutex::new(None),
        };

        transport.ensure_ready().await?;
        transport
            .adapter
            .set_alias(config.device_name.clone())
            .await?;
        info!("Bluetooth name set to: {}", config.device_name);

        Ok(transport)
    }

    /// Get the adapter address.
    pub async fn address(&self) -> Result<Address> {
        Ok(self.adapter.address().await?)
    }

    /// Get paired devices.
    pub async fn paired_devices(&self) -> Result<Vec<DeviceIdentity>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                devices.push(describe(&self.adapter, addr).await);
            }
        }

        Ok(devices)
    }

    /// Start device discovery. Found devices arrive on the returned channel
    /// until [`stop_discovery`](Self::stop_discovery) is called.
    pub async fn start_discovery(&self) -> Result<mpsc::Receiver<DeviceIdentity>> {
        let events = self.adapter.discover_devices().await?;
        let (found_tx, found_rx) = mpsc::channel(32);
        let adapter = self.adapter.clone();

        let task = tokio::spawn(async move {
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(addr) = event {
                    let device = describe(&adapter, addr).await;
                    debug!("Found device: {}", device);
                    if found_tx.send(device).await.is_err() {
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.discovery.lock().replace(task) {
            previous.abort();
        }
        info!("Discovery started");
        Ok(found_rx)
    }

    /// Stop device discovery if it is running.
    pub fn stop_discovery(&self) {
        if let Some(task) = self.discovery.lock().take() {
            task.abort();
            info!("Discovery stopped");
        }
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    async fn ensure_ready(&self) -> Result<()> {
        if self.adapter.is_powered().await? {
            return Ok(());
        }
        if !self.power_on {
            return Err(Error::AdapterDisabled);
        }
        info!("Powering on Bluetooth adapter...");
        self.adapter.set_powered(true).await?;
        Ok(())
    }

    async fn listen(&self) -> Result<Box<dyn Acceptor>> {
        let profile = Profile {
            uuid: self.service_uuid,
            name: Some(self.service_name.clone()),
            role: Some(Role::Server),
            channel: Some(self.channel.into()),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let handle = self.session.register_profile(profile).await?;
        info!(
            "RFCOMM service '{}' listening on channel {} (UUID: {})",
            self.service_name, self.channel, self.service_uuid
        );

        Ok(Box::new(ProfileAcceptor {
            handle: Box::pin(handle),
            adapter: self.adapter.clone(),
        }))
    }

    /// Connect to the peer's service record rather than a fixed channel, so
    /// BlueZ resolves the RFCOMM channel through SDP.
    async fn connect(&self, target: &DeviceIdentity) -> Result<Connection> {
        let address: Address = target
            .address
            .parse()
            .map_err(|_| Error::InvalidAddress(target.address.clone()))?;
        let device = self.adapter.device(address)?;

        let profile = Profile {
            uuid: self.service_uuid,
            name: Some(self.service_name.clone()),
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        // Unregistered when dropped; the accepted stream stays open.
        let mut handle = Box::pin(self.session.register_profile(profile).await?);

        debug!("Connecting to service {} on {}", self.service_uuid, address);
        let request = tokio::select! {
            request = handle.next() => request,
            result = device.connect_profile(&self.service_uuid) => {
                result?;
                handle.next().await
            }
        };
        let request = request.ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "RFCOMM client profile unregistered",
            ))
        })?;

        let stream = request.accept()?;
        let connection: Connection = Box::new(stream);
        Ok(connection)
    }

    async fn cancel_discovery(&self) {
        self.stop_discovery();
    }
}

/// Accepts connections arriving on a registered RFCOMM profile.
/// Dropping it unregisters the profile.
struct ProfileAcceptor {
    handle: Pin<Box<ProfileHandle>>,
    adapter: Adapter,
}

#[async_trait]
impl Acceptor for ProfileAcceptor {
    async fn accept(&mut self) -> Result<(Connection, DeviceIdentity)> {
        let request = self.handle.next().await.ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "RFCOMM profile unregistered",
            ))
        })?;

        let address = request.device();
        let stream = request.accept()?;
        let remote = describe(&self.adapter, address).await;
        let connection: Connection = Box::new(stream);
        Ok((connection, remote))
    }
}

/// Build an identity for `address`, using its name when BlueZ knows one.
async fn describe(adapter: &Adapter, address: Address) -> DeviceIdentity {
    let identity = DeviceIdentity::new(address.to_string());
    let Ok(device) = adapter.device(address) else {
        return identity;
    };
    match device.name().await {
        Ok(Some(name)) => identity.with_name(name),
        _ => identity,
    }
}
