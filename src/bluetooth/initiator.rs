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

//! One-shot outbound connection attempt.

use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::listener::Handoff;
use super::transport::{DeviceIdentity, Transport};
use crate::error::Result;

/// Connects once to a target device and reports the outcome.
pub struct Initiator {
    target: DeviceIdentity,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Initiator {
    /// Start connecting to `target` in a dedicated task.
    ///
    /// The receiver yields the stream on success or the transport error on
    /// failure. It resolves to a `RecvError` if the attempt was cancelled.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        target: DeviceIdentity,
    ) -> (Self, oneshot::Receiver<Result<Handoff>>) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(Self::connect_once(
            transport,
            target.clone(),
            cancel_rx,
            outcome_tx,
        ));

        let initiator = Self {
            target,
            cancel_tx,
            task,
        };
        (initiator, outcome_rx)
    }

    pub fn target(&self) -> &DeviceIdentity {
        &self.target
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Abandon the attempt, closing the socket if one was opened and not yet handed off.
    pub fn cancel(&self) {
        if !self.cancel_tx.send_replace(true) {
            debug!("Connect attempt to {} cancelled", self.target);
        }
    }

    async fn connect_once(
        transport: Arc<dyn Transport>,
        target: DeviceIdentity,
        mut cancel_rx: watch::Receiver<bool>,
        outcome_tx: oneshot::Sender<Result<Handoff>>,
    ) {
        // Discovery slows down connection setup considerably.
        transport.cancel_discovery().await;

        info!("Connecting to {}...", target);
        let result = tokio::select! {
            biased;
            _ = cancel_rx.changed() => {
                info!("Connect attempt to {} abandoned", target);
                return;
            }
            result = transport.connect(&target) => result,
        };

        match result {
            Ok(connection) => {
                if *cancel_rx.borrow() {
                    info!("Connect attempt to {} superseded, closing socket", target);
                    return;
                }
                info!("Connected to {}", target);
                let handoff = Handoff {
                    connection,
                    remote: target,
                };
                if outcome_tx.send(Ok(handoff)).is_err() {
                    debug!("Nobody waiting for outbound connection, closing it");
                }
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", target, e);
                let _ = outcome_tx.send(Err(e));
            }
        }
    }
}

impl Drop for Initiator {
    fn drop(&mut self) {
        self.cancel();
    }
}
