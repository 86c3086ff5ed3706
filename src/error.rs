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

//! Error types for the connection core.

use thiserror::Error;

/// Errors surfaced at the connection manager's call boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Accept, connect, read or write failed on the underlying stream.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// No session is connected.
    #[error("no active session")]
    NotConnected,

    /// The platform refused access to Bluetooth.
    #[error("bluetooth permission denied: {0}")]
    PermissionDenied(String),

    /// The Bluetooth adapter is powered off.
    #[error("bluetooth adapter is disabled")]
    AdapterDisabled,

    /// The target address could not be parsed.
    #[error("invalid device address: {0}")]
    InvalidAddress(String),

    /// Any other failure reported by the Bluetooth stack.
    #[error("bluetooth error: {0}")]
    Bluetooth(String),

    /// The persistence collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The manager has been shut down.
    #[error("connection manager is shut down")]
    ShutDown,
}

impl Error {
    /// Whether this error is a precondition failure rather than a transport fault.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::PermissionDenied(_) | Error::AdapterDisabled)
    }
}

#[cfg(feature = "bluez")]
impl From<bluer::Error> for Error {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            bluer::ErrorKind::NotAuthorized | bluer::ErrorKind::NotPermitted => {
                Error::PermissionDenied(err.message)
            }
            bluer::ErrorKind::NotReady => Error::AdapterDisabled,
            _ => Error::Bluetooth(err.to_string()),
        }
    }
}

/// Result alias for connection operations.
pub type Result<T> = std::result::Result<T, Error>;
