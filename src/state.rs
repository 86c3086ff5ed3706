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

//! Application state shared with the front end.

use parking_lot::RwLock;
use std::sync::Arc;

/// Connection lifecycle as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Connecting,
    Connected,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Listening => "Waiting for a peer...",
            SessionState::Connecting => "Connecting...",
            SessionState::Connected => "Connected",
            SessionState::Closed => "Closed",
        }
    }
}

/// Shared application state.
///
/// Written by the connection manager, read by whatever renders status.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub session_state: RwLock<SessionState>,

    /// Connected device label.
    pub connected_device: RwLock<Option<String>>,

    /// Last received text.
    pub last_text: RwLock<Option<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            session_state: RwLock::new(SessionState::Idle),
            connected_device: RwLock::new(None),
            last_text: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, state: SessionState, device: Option<String>) {
        *self.session_state.write() = state;
        *self.connected_device.write() = device;
    }

    pub fn get_status(&self) -> SessionState {
        *self.session_state.read()
    }

    pub fn get_device_name(&self) -> Option<String> {
        self.connected_device.read().clone()
    }

    pub fn set_last_text(&self, text: String) {
        *self.last_text.write() = Some(text);
    }

    pub fn get_last_text(&self) -> Option<String> {
        self.last_text.read().clone()
    }

    /// One-line status for display.
    pub fn summary(&self) -> String {
        match (self.get_status(), self.get_device_name()) {
            (SessionState::Connected, Some(device)) => format!("Connected to {}", device),
            (state, _) => state.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let state = AppState::new();
        assert_eq!(state.summary(), "Idle");

        state.set_status(SessionState::Connected, Some("Rescue Phone".into()));
        assert_eq!(state.summary(), "Connected to Rescue Phone");

        state.set_status(SessionState::Listening, None);
        assert_eq!(state.summary(), "Waiting for a peer...");
        assert_eq!(state.get_device_name(), None);
    }
}
