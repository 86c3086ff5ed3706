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

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::bluetooth::{READ_BUFFER_SIZE, RFCOMM_CHANNEL, SERVICE_NAME, SERVICE_UUID};
use crate::storage::RECENT_LIMIT;

const APP_DIR: &str = "crisislink";

/// Get a sanitized hostname suitable for Bluetooth device name.
/// Bluetooth names should only contain alphanumeric chars, spaces, and hyphens.
fn get_sanitized_hostname() -> String {
    sanitize_device_name(&gethostname().to_string_lossy())
}

fn sanitize_device_name(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == ' ' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "CrisisLink".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Data directory for the message database.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Message settings.
    pub messages: MessagesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter alias. Always computed at runtime from the system hostname.
    #[serde(skip)]
    pub device_name: String,

    /// Service name in the SDP record.
    pub service_name: String,

    /// Service UUID both peers match on.
    pub service_uuid: Uuid,

    /// RFCOMM channel both peers use.
    pub rfcomm_channel: u8,

    /// Power the adapter on if it is off, instead of failing.
    pub power_on: bool,

    /// Open a new listener once a session ends.
    pub relisten: bool,

    /// Receive buffer size in bytes.
    pub read_buffer_size: usize,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_name: get_sanitized_hostname(),
            service_name: SERVICE_NAME.to_string(),
            service_uuid: SERVICE_UUID,
            rfcomm_channel: RFCOMM_CHANNEL,
            power_on: true,
            relisten: true,
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    /// Sender name stored on messages we send.
    pub local_label: String,

    /// Sender address stored on messages we send.
    pub local_address: String,

    /// Messages shown by the history view.
    pub recent_limit: u32,

    /// Maximum number of stored messages.
    pub max_entries: u32,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            local_label: "Me".to_string(),
            local_address: "Local Device".to_string(),
            recent_limit: RECENT_LIMIT,
            max_entries: 10000,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let mut config = Self::load_from(&config_dir.join("config.toml"))?;

        config.data_dir = data_dir();
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Load from `path`, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(path, content)?;
            config
        };
        config.data_dir = data_dir();
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let config_path = config_dir().join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_device_name() {
        assert_eq!(sanitize_device_name("field-laptop.local"), "field-laptop-local");
        assert_eq!(sanitize_device_name("..."), "CrisisLink");
        assert_eq!(sanitize_device_name("Base Camp 2"), "Base Camp 2");
    }

    #[test]
    fn test_defaults_written_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.bluetooth.service_name, "CrisisLink");
        assert_eq!(config.bluetooth.service_uuid, SERVICE_UUID);
        assert_eq!(config.bluetooth.read_buffer_size, 1024);
        assert!(config.bluetooth.relisten);
        assert_eq!(config.messages.local_label, "Me");
        assert_eq!(config.messages.recent_limit, 10);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bluetooth]\nrelisten = false\nrfcomm_channel = 3\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(!config.bluetooth.relisten);
        assert_eq!(config.bluetooth.rfcomm_channel, 3);
        assert_eq!(config.bluetooth.service_name, "CrisisLink");
        assert_eq!(config.messages.local_address, "Local Device");
    }
}
