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

//! A single live connection to a peer.
//!
//! The receive loop runs on its own task and publishes every chunk it reads
//! as one [`SessionEvent::TextReceived`]. There is no framing on the wire, so
//! rapid sends from the peer may arrive coalesced or split.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::transport::{Connection, DeviceIdentity};
use crate::error::{Error, Result};

/// Default size of the receive buffer.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// One chunk of text read from the stream.
    TextReceived(String),
    /// The receive loop exited. Sent exactly once, always last.
    Ended,
}

type SharedWriter = Arc<Mutex<Option<WriteHalf<Connection>>>>;

/// Owner of one connected stream.
pub struct Session {
    id: u64,
    remote: DeviceIdentity,
    writer: SharedWriter,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Session {
    /// Take ownership of `connection` and start reading from it immediately.
    pub fn spawn(
        id: u64,
        connection: Connection,
        remote: DeviceIdentity,
        buffer_size: usize,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (reader, writer) = tokio::io::split(connection);
        let writer: SharedWriter = Arc::new(Mutex::new(Some(writer)));

        let task = tokio::spawn(Self::receive_loop(
            id,
            reader,
            Arc::clone(&writer),
            buffer_size.max(1),
            cancel_rx,
            event_tx,
        ));

        let session = Self {
            id,
            remote,
            writer,
            cancel_tx,
            task,
        };
        (session, event_rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote(&self) -> &DeviceIdentity {
        &self.remote
    }

    /// Whether the receive loop is still running and the session was not cancelled.
    pub fn is_active(&self) -> bool {
        !*self.cancel_tx.borrow() && !self.task.is_finished()
    }

    /// Write `text` to the peer and flush.
    ///
    /// A failed write is reported to the caller only; the receive loop keeps running.
    /// A write still pending when the session is cancelled is abandoned with
    /// [`Error::NotConnected`] and releases the stream.
    pub async fn write(&self, text: &str) -> Result<()> {
        let mut cancel_rx = self.cancel_tx.subscribe();
        let write = async {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(Error::NotConnected)?;
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await?;
            Ok::<(), Error>(())
        };

        tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                debug!("Session {} write abandoned", self.id);
                Err(Error::NotConnected)
            }
            result = write => {
                if result.is_ok() {
                    debug!("Session {} sent {} bytes", self.id, text.len());
                }
                result
            }
        }
    }

    /// Close the stream. Any pending read is abandoned and the loop exits.
    pub fn cancel(&self) {
        let was_cancelled = self.cancel_tx.send_replace(true);
        if !was_cancelled {
            debug!("Session {} cancelled", self.id);
        }
    }

    async fn receive_loop(
        id: u64,
        mut reader: ReadHalf<Connection>,
        writer: SharedWriter,
        buffer_size: usize,
        mut cancel_rx: watch::Receiver<bool>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) {
        info!("Session {} receive loop started", id);
        let mut buf = vec![0u8; buffer_size];

        loop {
            tokio::select! {
                biased;
                _ = cancel_rx.changed() => {
                    info!("Session {} closed locally", id);
                    break;
                }
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        info!("Session {} closed by remote", id);
                        break;
                    }
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        debug!("Session {} received {} bytes", id, n);
                        if event_tx.send(SessionEvent::TextReceived(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Session {} read error: {}", id, e);
                        break;
                    }
                }
            }
        }

        drop(reader);
        if let Some(mut writer) = writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = event_tx.send(SessionEvent::Ended).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
    use tokio::time::timeout;

    /// Stream that reads normally but fails every write.
    struct BrokenWriter {
        inner: DuplexStream,
    }

    impl AsyncRead for BrokenWriter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    fn peer() -> DeviceIdentity {
        DeviceIdentity::new("11:22:33:44:55:66")
    }

    async fn next(rx: &mut mpsc::Receiver<SessionEvent>) -> Option<SessionEvent> {
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap()
    }

    #[tokio::test]
    async fn test_chunk_becomes_one_event() {
        let (local, mut remote) = duplex(256);
        let (_session, mut events) = Session::spawn(1, Box::new(local), peer(), READ_BUFFER_SIZE);

        remote.write_all(b"help needed").await.unwrap();

        assert_eq!(
            next(&mut events).await,
            Some(SessionEvent::TextReceived("help needed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_large_write_is_split_by_buffer() {
        let (local, mut remote) = duplex(256);
        let (_session, mut events) = Session::spawn(2, Box::new(local), peer(), 4);

        remote.write_all(b"abcdefghij").await.unwrap();

        let mut received = String::new();
        let mut chunks = 0;
        while received.len() < 10 {
            match next(&mut events).await {
                Some(SessionEvent::TextReceived(chunk)) => {
                    assert!(chunk.len() <= 4);
                    received.push_str(&chunk);
                    chunks += 1;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(received, "abcdefghij");
        assert!(chunks >= 3);
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (local, mut remote) = duplex(256);
        let (session, _events) = Session::spawn(3, Box::new(local), peer(), READ_BUFFER_SIZE);

        session.write("on my way").await.unwrap();

        let mut buf = [0u8; 32];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"on my way");
    }

    #[tokio::test]
    async fn test_remote_close_ends_session_once() {
        let (local, remote) = duplex(256);
        let (session, mut events) = Session::spawn(4, Box::new(local), peer(), READ_BUFFER_SIZE);

        drop(remote);

        assert_eq!(next(&mut events).await, Some(SessionEvent::Ended));
        assert_eq!(next(&mut events).await, None);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (local, _remote) = duplex(256);
        let (session, mut events) = Session::spawn(5, Box::new(local), peer(), READ_BUFFER_SIZE);

        session.cancel();
        session.cancel();

        assert_eq!(next(&mut events).await, Some(SessionEvent::Ended));
        assert_eq!(next(&mut events).await, None);

        session.cancel();
        assert!(!session.is_active());
        assert!(matches!(session.write("late").await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_cancel_closes_stream_for_peer() {
        let (local, mut remote) = duplex(256);
        let (session, mut events) = Session::spawn(6, Box::new(local), peer(), READ_BUFFER_SIZE);

        session.cancel();
        assert_eq!(next(&mut events).await, Some(SessionEvent::Ended));

        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(2), remote.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_receiving() {
        let (local, mut remote) = duplex(256);
        let connection = Box::new(BrokenWriter { inner: local });
        let (session, mut events) = Session::spawn(7, connection, peer(), READ_BUFFER_SIZE);

        assert!(matches!(session.write("lost").await, Err(Error::Io(_))));
        assert!(session.is_active());

        remote.write_all(b"still here").await.unwrap();
        assert_eq!(
            next(&mut events).await,
            Some(SessionEvent::TextReceived("still here".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cancel_releases_blocked_write() {
        let (local, mut remote) = duplex(16);
        let (session, mut events) = Session::spawn(8, Box::new(local), peer(), READ_BUFFER_SIZE);
        let session = Arc::new(session);

        let writer = Arc::clone(&session);
        let pending = tokio::spawn(async move { writer.write(&"x".repeat(4096)).await });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        session.cancel();

        let result = timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(next(&mut events).await, Some(SessionEvent::Ended));

        // The peer drains what was buffered, then sees the stream closed.
        let mut drained = Vec::new();
        timeout(Duration::from_secs(2), remote.read_to_end(&mut drained))
            .await
            .unwrap()
            .unwrap();
        assert!(drained.len() < 4096);
    }
}
