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

//! Connection manager.
//!
//! Owns the listener, the outbound initiator and the live session, and routes
//! session traffic to storage and notification. All mutable state sits behind
//! one mutex; at most one session exists at any time.

use chrono::Local;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::initiator::Initiator;
use super::listener::{Handoff, Listener};
use super::session::{Session, SessionEvent, READ_BUFFER_SIZE};
use super::transport::{DeviceIdentity, Transport};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::state::{AppState, SessionState};
use crate::storage::{Message, MessageStore};

/// Tunables for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Receive buffer size for sessions.
    pub read_buffer_size: usize,
    /// Open a new listener after a session ends or an outbound attempt fails.
    pub relisten: bool,
    /// Sender name stored on outbound messages.
    pub local_label: String,
    /// Sender address stored on outbound messages.
    pub local_address: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: READ_BUFFER_SIZE,
            relisten: true,
            local_label: "Me".to_string(),
            local_address: "Local Device".to_string(),
        }
    }
}

impl From<&Config> for ManagerOptions {
    fn from(config: &Config) -> Self {
        Self {
            read_buffer_size: config.bluetooth.read_buffer_size,
            relisten: config.bluetooth.relisten,
            local_label: config.messages.local_label.clone(),
            local_address: config.messages.local_address.clone(),
        }
    }
}

/// Result of a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the peer and recorded.
    Sent,
    /// No session was connected; nothing was written or recorded.
    Dropped,
}

/// Remembers the last text we sent so the transport echoing it back is not
/// taken for a message from the peer.
#[derive(Debug, Default)]
pub(crate) struct EchoGuard {
    pending: Option<String>,
}

impl EchoGuard {
    /// Remember `text`, replacing whatever was pending.
    pub(crate) fn arm(&mut self, text: &str) {
        self.pending = Some(text.to_owned());
    }

    /// Returns `true` and clears the slot if `text` is the pending value.
    pub(crate) fn take_echo(&mut self, text: &str) -> bool {
        if self.pending.as_deref() == Some(text) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

/// Which component produced a stream.
#[derive(Debug, Clone, Copy)]
enum Origin {
    Listener(u64),
    Initiator(u64),
}

#[derive(Default)]
struct ManagerState {
    started: bool,
    shut_down: bool,
    listener: Option<(u64, Listener)>,
    initiator: Option<(u64, Initiator)>,
    session: Option<Arc<Session>>,
    connected_device: Option<DeviceIdentity>,
    echo_guard: EchoGuard,
    last_id: u64,
}

impl ManagerState {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|session| session.id())
    }

    fn session_state(&self) -> SessionState {
        if self.shut_down {
            SessionState::Closed
        } else if self.session.is_some() {
            SessionState::Connected
        } else if self.initiator.is_some() {
            SessionState::Connecting
        } else if self.listener.is_some() {
            SessionState::Listening
        } else {
            SessionState::Idle
        }
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Closing session {} with {}", session.id(), session.remote());
            session.cancel();
        }
        self.connected_device = None;
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    app_state: Arc<AppState>,
    options: ManagerOptions,
    state: Mutex<ManagerState>,
}

/// Coordinates listener, initiator and session lifecycles.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        app_state: Arc<AppState>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                notifier,
                app_state,
                options,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    /// Start listening for an inbound connection. Calling it again is a no-op.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return Err(Error::ShutDown);
            }
            if state.started {
                debug!("Connection manager already started");
                return Ok(());
            }
            state.started = true;
        }

        let result = match self.inner.transport.ensure_ready().await {
            Ok(()) => self.inner.open_listener().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.inner.state.lock().started = false;
            return Err(e);
        }

        info!("Connection manager started");
        Ok(())
    }

    /// Drop any live session and start one outbound attempt to `target`.
    ///
    /// Returns once the attempt is under way; the outcome arrives asynchronously.
    pub async fn connect_to_device(&self, target: DeviceIdentity) -> Result<()> {
        self.inner.transport.ensure_ready().await?;

        let (attempt, outcome_rx) = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return Err(Error::ShutDown);
            }
            state.close_session();
            if let Some((_, stale)) = state.initiator.take() {
                info!("Abandoning connect attempt to {}", stale.target());
                stale.cancel();
            }

            let attempt = state.next_id();
            let (initiator, outcome_rx) =
                Initiator::spawn(Arc::clone(&self.inner.transport), target.clone());
            state.initiator = Some((attempt, initiator));
            self.inner.publish(&state);
            (attempt, outcome_rx)
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match outcome_rx.await {
                Ok(Ok(handoff)) => inner.on_socket_established(Origin::Initiator(attempt), handoff),
                Ok(Err(e)) => inner.on_connect_failed(attempt, e).await,
                Err(_) => debug!("Connect attempt {} abandoned", attempt),
            }
        });
        Ok(())
    }

    /// Send a text message to the connected peer.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome> {
        self.send(text, false).await
    }

    /// Send a timestamped SOS to the connected peer and record it as an emergency.
    pub async fn send_emergency_alert(&self) -> Result<SendOutcome> {
        let alert = format!("🚨 EMERGENCY SOS at {}", Local::now().format("%H:%M:%S"));
        self.send(&alert, true).await
    }

    /// Close the listener, any attempt in flight and the live session.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        if let Some((_, listener)) = state.listener.take() {
            listener.cancel();
        }
        if let Some((_, initiator)) = state.initiator.take() {
            initiator.cancel();
        }
        state.close_session();
        state.echo_guard = EchoGuard::default();
        self.inner.publish(&state);
        info!("Connection manager shut down");
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().session_state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    pub fn connected_device(&self) -> Option<DeviceIdentity> {
        self.inner.state.lock().connected_device.clone()
    }

    /// Label of the connected peer, if any.
    pub fn connected_device_name(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .connected_device
            .as_ref()
            .map(|device| device.label().to_string())
    }

    async fn send(&self, text: &str, is_emergency: bool) -> Result<SendOutcome> {
        let session = {
            let mut state = self.inner.state.lock();
            match state.session.clone() {
                Some(session) => {
                    state.echo_guard.arm(text);
                    session
                }
                None => {
                    warn!("Not connected, message dropped");
                    return Ok(SendOutcome::Dropped);
                }
            }
        };

        session.write(text).await?;

        let options = &self.inner.options;
        let message = Message::sent(
            text,
            options.local_label.as_str(),
            options.local_address.as_str(),
            is_emergency,
        );
        self.inner.persist(message);
        Ok(SendOutcome::Sent)
    }
}

impl Inner {
    /// Open a listening channel and wait for its single handoff in the background.
    async fn open_listener(self: &Arc<Self>) -> Result<()> {
        let acceptor = self.transport.listen().await?;

        let (id, handoff_rx) = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Ok(());
            }
            if state.listener.is_some() {
                debug!("Listener already open");
                return Ok(());
            }
            let id = state.next_id();
            let (listener, handoff_rx) = Listener::spawn(acceptor);
            state.listener = Some((id, listener));
            self.publish(&state);
            (id, handoff_rx)
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match handoff_rx.await {
                Ok(handoff) => inner.on_socket_established(Origin::Listener(id), handoff),
                Err(_) => inner.on_listener_ended(id),
            }
        });
        Ok(())
    }

    fn on_listener_ended(&self, id: u64) {
        let mut state = self.state.lock();
        if matches!(state.listener, Some((current, _)) if current == id) {
            state.listener = None;
            info!("Listener {} ended without a connection", id);
            self.publish(&state);
        }
    }

    fn on_socket_established(self: &Arc<Self>, origin: Origin, handoff: Handoff) {
        let Handoff { connection, remote } = handoff;

        let (id, events) = {
            let mut state = self.state.lock();
            if state.shut_down {
                info!("Shut down, closing connection from {}", remote);
                return;
            }

            match origin {
                Origin::Listener(id) => {
                    if matches!(state.listener, Some((current, _)) if current == id) {
                        state.listener = None;
                    }
                }
                Origin::Initiator(id) => {
                    if !matches!(state.initiator, Some((current, _)) if current == id) {
                        info!("Discarding superseded connection to {}", remote);
                        return;
                    }
                    state.initiator = None;
                }
            }

            state.close_session();

            let id = state.next_id();
            let (session, events) = Session::spawn(
                id,
                connection,
                remote.clone(),
                self.options.read_buffer_size,
            );
            state.session = Some(Arc::new(session));
            state.connected_device = Some(remote.clone());
            self.publish(&state);
            (id, events)
        };

        info!("Session {} established with {}", id, remote);
        let inner = Arc::clone(self);
        tokio::spawn(inner.pump(id, events));
    }

    async fn on_connect_failed(self: &Arc<Self>, attempt: u64, error: Error) {
        let relisten = {
            let mut state = self.state.lock();
            if !matches!(state.initiator, Some((current, _)) if current == attempt) {
                return;
            }
            state.initiator = None;
            info!("Connect attempt {} failed: {}", attempt, error);
            self.publish(&state);
            self.should_relisten(&state)
        };

        if relisten {
            self.relisten().await;
        }
    }

    /// Deliver session events until the session ends.
    async fn pump(self: Arc<Self>, id: u64, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::TextReceived(text) => self.on_text_received(id, text),
                SessionEvent::Ended => {
                    self.on_session_ended(id).await;
                    break;
                }
            }
        }
    }

    fn on_text_received(&self, id: u64, text: String) {
        let remote = {
            let mut state = self.state.lock();
            if state.session_id() != Some(id) {
                debug!("Ignoring text from closed session {}", id);
                return;
            }
            if state.echo_guard.take_echo(&text) {
                debug!("Suppressed echo of our own message");
                return;
            }
            match state.connected_device.clone() {
                Some(remote) => remote,
                None => return,
            }
        };

        let message = Message::received(text, remote.label(), remote.address.as_str());
        self.app_state.set_last_text(message.content.clone());
        self.notifier.notify(&message);
        self.persist(message);
    }

    async fn on_session_ended(self: &Arc<Self>, id: u64) {
        let relisten = {
            let mut state = self.state.lock();
            if state.session_id() != Some(id) {
                return;
            }
            state.session = None;
            state.connected_device = None;
            info!("Session {} ended", id);
            self.publish(&state);
            self.should_relisten(&state)
        };

        if relisten {
            self.relisten().await;
        }
    }

    fn should_relisten(&self, state: &ManagerState) -> bool {
        self.options.relisten
            && state.started
            && !state.shut_down
            && state.listener.is_none()
            && state.initiator.is_none()
            && state.session.is_none()
    }

    async fn relisten(self: &Arc<Self>) {
        info!("Reopening listener");
        if let Err(e) = self.open_listener().await {
            warn!("Failed to reopen listener: {}", e);
        }
    }

    /// Hand a message to storage on a blocking worker.
    fn persist(&self, message: Message) {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.insert(&message) {
                error!("Failed to store message: {}", e);
            }
        });
    }

    fn publish(&self, state: &ManagerState) {
        let device = state
            .connected_device
            .as_ref()
            .map(|device| device.label().to_string());
        self.app_state.set_status(state.session_state(), device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_guard_single_use() {
        let mut guard = EchoGuard::default();
        assert!(!guard.take_echo("HELLO"));

        guard.arm("HELLO");
        assert!(!guard.take_echo("HELLO!"));
        assert!(guard.take_echo("HELLO"));
        assert!(!guard.take_echo("HELLO"));
    }

    #[test]
    fn test_echo_guard_replaced_by_next_send() {
        let mut guard = EchoGuard::default();
        guard.arm("first");
        guard.arm("second");

        assert!(!guard.take_echo("first"));
        assert!(guard.take_echo("second"));
    }

    #[test]
    fn test_session_state_derivation() {
        let mut state = ManagerState::default();
        assert_eq!(state.session_state(), SessionState::Idle);

        state.shut_down = true;
        assert_eq!(state.session_state(), SessionState::Closed);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.bluetooth.relisten = false;
        config.bluetooth.read_buffer_size = 512;
        config.messages.local_label = "Base".into();

        let options = ManagerOptions::from(&config);
        assert!(!options.relisten);
        assert_eq!(options.read_buffer_size, 512);
        assert_eq!(options.local_label, "Base");
        assert_eq!(options.local_address, "Local Device");
    }
}
