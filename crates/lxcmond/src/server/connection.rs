//! Per-subscriber connection state.
//!
//! Subscribers never send anything meaningful; the read half is only
//! watched for hang-up. Records are pushed with non-blocking writes so one
//! stalled subscriber cannot hold up the others.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project's panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Write failures end the subscriber, never the daemon

use std::io;

use lxcmon_protocol::{TransportError, RECORD_SIZE};
use tokio::io::AsyncReadExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Identifier assigned to each accepted subscriber.
pub type ClientId = u64;

/// What happened to a record offered to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The whole record was queued on the socket.
    Sent,
    /// The socket buffer was full; this record was skipped.
    Dropped,
    /// The subscriber is gone or broken and must be removed.
    Disconnected,
}

/// A connected subscriber.
///
/// Dropping it stops the hang-up watcher and closes the socket.
pub struct Subscriber {
    id: ClientId,
    writer: OwnedWriteHalf,
    watcher: JoinHandle<()>,
}

impl Subscriber {
    /// Takes over `stream` and reports `id` on `hangups` once the peer
    /// closes its end.
    pub fn spawn(id: ClientId, stream: UnixStream, hangups: mpsc::UnboundedSender<ClientId>) -> Self {
        let (mut reader, writer) = stream.into_split();

        let watcher = tokio::spawn(async move {
            let mut discard = [0u8; 64];
            loop {
                match reader.read(&mut discard).await {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(client_id = id, error = %e, "Subscriber read failed");
                        break;
                    }
                }
            }
            let _ = hangups.send(id);
        });

        Self {
            id,
            writer,
            watcher,
        }
    }

    /// Returns the subscriber's identifier.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Offers one record without waiting for buffer space.
    pub fn deliver(&self, record: &[u8; RECORD_SIZE]) -> Delivery {
        match self.writer.try_write(record) {
            Ok(n) if n == RECORD_SIZE => Delivery::Sent,
            Ok(n) => {
                let e = TransportError::ShortWrite {
                    expected: RECORD_SIZE,
                    actual: n,
                };
                warn!(client_id = self.id, error = %e, "Partial write to subscriber");
                Delivery::Disconnected
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!(client_id = self.id, "Subscriber socket full, dropping record");
                Delivery::Dropped
            }
            Err(e) => {
                debug!(client_id = self.id, error = %e, "Failed to send record to subscriber");
                Delivery::Disconnected
            }
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lxcmon_protocol::WireMessage;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_deliver_sends_whole_record() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber::spawn(7, ours, tx);

        let record = WireMessage::exit_code("c1", 0).encode();
        assert_eq!(subscriber.deliver(&record), Delivery::Sent);

        let mut buf = [0u8; RECORD_SIZE];
        theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, record);
    }

    #[tokio::test]
    async fn test_hangup_is_reported() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber::spawn(3, ours, tx);
        assert_eq!(subscriber.id(), 3);

        drop(theirs);

        let id = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(id, Some(3));
    }

    #[tokio::test]
    async fn test_full_socket_drops_records() {
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber::spawn(1, ours, tx);

        let record = WireMessage::exit_code("c1", 0).encode();
        let mut outcomes = Vec::new();
        // Nobody reads, so the socket buffer eventually fills up.
        for _ in 0..100_000 {
            let outcome = subscriber.deliver(&record);
            outcomes.push(outcome);
            if outcome != Delivery::Sent {
                break;
            }
        }

        let last = outcomes.last().copied();
        assert!(matches!(
            last,
            Some(Delivery::Dropped) | Some(Delivery::Disconnected)
        ));
    }
}
