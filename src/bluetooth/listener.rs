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

//! Single-shot listener for inbound connections.

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{Acceptor, Connection, DeviceIdentity};

/// A freshly established stream together with the peer it leads to.
pub struct Handoff {
    pub connection: Connection,
    pub remote: DeviceIdentity,
}

/// Accepts at most one inbound connection, then closes its channel.
///
/// The accepted stream is delivered through the `oneshot` receiver returned
/// by [`Listener::spawn`]. If the receiver resolves to an error, the listener
/// ended without a connection (cancelled or accept failed).
pub struct Listener {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Start accepting on `acceptor` in a dedicated task.
    pub fn spawn(acceptor: Box<dyn Acceptor>) -> (Self, oneshot::Receiver<Handoff>) {
        let (handoff_tx, handoff_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(Self::accept_once(acceptor, cancel_rx, handoff_tx));

        (Self { cancel_tx, task }, handoff_rx)
    }

    /// Close the listening channel. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.cancel_tx.send_replace(true) {
            debug!("Listener cancelled");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    async fn accept_once(
        mut acceptor: Box<dyn Acceptor>,
        mut cancel_rx: watch::Receiver<bool>,
        handoff_tx: oneshot::Sender<Handoff>,
    ) {
        info!("Waiting for connections...");

        let accepted = tokio::select! {
            biased;
            _ = cancel_rx.changed() => {
                info!("Listener stopped before a peer connected");
                None
            }
            result = acceptor.accept() => match result {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    None
                }
            }
        };

        // Close the listening channel before handing the stream off.
        drop(acceptor);

        if let Some((connection, remote)) = accepted {
            info!("Connection from: {}", remote);
            if handoff_tx.send(Handoff { connection, remote }).is_err() {
                debug!("Nobody waiting for accepted connection, closing it");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Acceptor fed by the test through a channel.
    struct QueuedAcceptor {
        incoming: mpsc::Receiver<Result<(Connection, DeviceIdentity)>>,
        accepts: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Acceptor for QueuedAcceptor {
        async fn accept(&mut self) -> Result<(Connection, DeviceIdentity)> {
            self.accepts.fetch_add(1, Ordering::SeqCst);
            match self.incoming.recv().await {
                Some(result) => result,
                None => Err(Error::Io(std::io::ErrorKind::BrokenPipe.into())),
            }
        }
    }

    impl Drop for QueuedAcceptor {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        incoming: mpsc::Sender<Result<(Connection, DeviceIdentity)>>,
        accepts: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    fn acceptor() -> (Box<dyn Acceptor>, Harness) {
        let (tx, rx) = mpsc::channel(4);
        let accepts = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let acceptor = QueuedAcceptor {
            incoming: rx,
            accepts: Arc::clone(&accepts),
            closed: Arc::clone(&closed),
        };
        let harness = Harness {
            incoming: tx,
            accepts,
            closed,
        };
        (Box::new(acceptor), harness)
    }

    #[tokio::test]
    async fn test_hands_off_single_connection() {
        let (acceptor, harness) = acceptor();
        let (listener, handoff_rx) = Listener::spawn(acceptor);

        let (local, _remote) = duplex(64);
        let peer = DeviceIdentity::new("AA:AA:AA:AA:AA:AA").with_name("X");
        harness
            .incoming
            .send(Ok((Box::new(local) as Connection, peer.clone())))
            .await
            .unwrap();

        let handoff = timeout(Duration::from_secs(2), handoff_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handoff.remote, peer);

        timeout(Duration::from_secs(2), async {
            while !listener.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(harness.closed.load(Ordering::SeqCst));
        assert_eq!(harness.accepts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_accept() {
        let (acceptor, harness) = acceptor();
        let (listener, handoff_rx) = Listener::spawn(acceptor);

        listener.cancel();
        listener.cancel();

        let result = timeout(Duration::from_secs(2), handoff_rx).await.unwrap();
        assert!(result.is_err());
        assert!(harness.closed.load(Ordering::SeqCst));
        listener.cancel();
    }

    #[tokio::test]
    async fn test_accept_failure_ends_without_retry() {
        let (acceptor, harness) = acceptor();
        let (_listener, handoff_rx) = Listener::spawn(acceptor);

        harness
            .incoming
            .send(Err(Error::AdapterDisabled))
            .await
            .unwrap();

        let result = timeout(Duration::from_secs(2), handoff_rx).await.unwrap();
        assert!(result.is_err());
        assert_eq!(harness.accepts.load(Ordering::SeqCst), 1);
    }
}
