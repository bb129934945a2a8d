//! Serialized, timeout-bounded outbound path for one connection.
//!
//! Every message for a client goes through its [`WriteGuard`]. The guard
//! only enqueues: a single writer task owns the socket's write half, so
//! writes to the same socket are serialized while writes to different
//! sockets never contend. Callers can hold the league lock while writing.
//!
//! Failures never propagate to the caller. A closed guard, a full queue, a
//! write that does not start within the timeout, or an I/O error is logged
//! and the message is dropped. A message is never cut short and followed by
//! another: if the timeout fires after part of it went out, the guard is
//! closed and the writer stops.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// What happened to a message handed to [`WriteGuard::write_safe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Queued,
    /// The socket was already closed; nothing was written.
    Closed,
    /// The queue was full (client not reading); the message was dropped.
    Overflow,
}

/// Sending half of a connection's outbound queue.
#[derive(Clone)]
pub struct WriteGuard {
    name: Arc<str>,
    tx: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
}

/// Receiving half, consumed by the writer task.
pub struct Outbox {
    name: Arc<str>,
    rx: mpsc::Receiver<String>,
    closed: Arc<AtomicBool>,
}

impl WriteGuard {
    pub fn channel(name: &str, capacity: usize) -> (WriteGuard, Outbox) {
        let name: Arc<str> = Arc::from(name);
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let guard = WriteGuard {
            name: Arc::clone(&name),
            tx,
            closed: Arc::clone(&closed),
        };
        (guard, Outbox { name, rx, closed })
    }

    pub fn write_safe(&self, text: &str) -> WriteOutcome {
        if self.is_closed() {
            tracing::warn!(player = %self.name, "{}'s socket has been closed.", self.name);
            return WriteOutcome::Closed;
        }
        match self.tx.try_send(text.to_string()) {
            Ok(()) => WriteOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                tracing::error!(player = %self.name, "Send buffer for {} is full, message dropped", self.name);
                WriteOutcome::Overflow
            }
            Err(TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::Relaxed);
                tracing::warn!(player = %self.name, "{}'s socket has been closed.", self.name);
                WriteOutcome::Closed
            }
        }
    }

    /// Marks the socket closed. Later writes are dropped without an attempt.
    #[cfg(test)]
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed) || self.tx.is_closed()
    }
}

impl Outbox {
    /// Next queued message, if any, without a writer task.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Spawns the writer task. It ends once every [`WriteGuard`] is dropped
    /// and the queue is drained, or on the first I/O error, and then shuts
    /// the socket down.
    pub fn spawn<W>(self, writer: W, eol: &'static str, timeout: Duration) -> JoinHandle<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(self.run(writer, eol, timeout))
    }

    async fn run<W>(mut self, mut writer: W, eol: &'static str, timeout: Duration)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        while let Some(text) = self.rx.recv().await {
            let text = if eol == "\n" {
                text
            } else {
                text.replace('\n', eol)
            };
            let bytes = text.as_bytes();
            let mut written = 0;
            let write = async {
                while written < bytes.len() {
                    let n = writer.write(&bytes[written..]).await?;
                    if n == 0 {
                        return Err(io::Error::from(io::ErrorKind::WriteZero));
                    }
                    written += n;
                }
                writer.flush().await
            };
            let result = tokio::time::timeout(timeout, write).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(player = %self.name, "Failed to send a message to {}. {e}", self.name);
                    break;
                }
                Err(_) if written == 0 => {
                    tracing::error!(player = %self.name, "Sending a message to {} timed up.", self.name);
                }
                Err(_) => {
                    tracing::error!(
                        player = %self.name,
                        written,
                        total = bytes.len(),
                        "Sending a message to {} timed up part way, closing.",
                        self.name
                    );
                    break;
                }
            }
        }
        self.closed.store(true, Ordering::Relaxed);
        self.rx.close();
        match tokio::time::timeout(timeout, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(player = %self.name, "Socket shutdown failed: {e}"),
            Err(_) => tracing::debug!(player = %self.name, "Socket shutdown timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::io::AsyncReadExt;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock()).matches(needle).count()
        }
    }

    fn capture_logs(f: impl FnOnce()) -> CapturedLogs {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        logs
    }

    #[tokio::test]
    async fn queued_messages_reach_the_socket_in_order() {
        let (guard, outbox) = WriteGuard::channel("alice", 16);
        let (client, server) = tokio::io::duplex(1024);
        let handle = outbox.spawn(server, "\n", Duration::from_secs(1));

        assert_eq!(guard.write_safe("one\n"), WriteOutcome::Queued);
        assert_eq!(guard.write_safe("two\n"), WriteOutcome::Queued);
        drop(guard);
        handle.await.unwrap();

        let mut received = String::new();
        let mut client = client;
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "one\ntwo\n");
    }

    #[tokio::test]
    async fn crlf_connections_get_translated_line_endings() {
        let (guard, outbox) = WriteGuard::channel("bob", 16);
        let (mut client, server) = tokio::io::duplex(1024);
        let handle = outbox.spawn(server, "\r\n", Duration::from_secs(1));
        guard.write_safe("##[WHO] a\n##[WHO] +OK\n");
        drop(guard);
        handle.await.unwrap();

        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "##[WHO] a\r\n##[WHO] +OK\r\n");
    }

    #[test]
    fn closed_guard_drops_without_writing() {
        let (guard, mut outbox) = WriteGuard::channel("carol", 16);
        guard.close();
        assert_eq!(guard.write_safe("hello\n"), WriteOutcome::Closed);
        assert!(outbox.try_recv().is_none());
    }

    #[test]
    fn dropped_writer_task_reports_closed() {
        let (guard, outbox) = WriteGuard::channel("dave", 16);
        drop(outbox);
        assert_eq!(guard.write_safe("hello\n"), WriteOutcome::Closed);
        assert!(guard.is_closed());
    }

    #[test]
    fn each_write_to_a_closed_guard_is_logged_once() {
        let logs = capture_logs(|| {
            let (guard, _outbox) = WriteGuard::channel("carol", 16);
            guard.close();
            guard.write_safe("one\n");
            guard.write_safe("two\n");
        });
        assert_eq!(logs.count("carol's socket has been closed."), 2);

        let logs = capture_logs(|| {
            let (guard, outbox) = WriteGuard::channel("dave", 16);
            drop(outbox);
            guard.write_safe("one\n");
        });
        assert_eq!(logs.count("dave's socket has been closed."), 1);
    }

    #[test]
    fn full_queue_overflows_instead_of_blocking() {
        let (guard, _outbox) = WriteGuard::channel("erin", 1);
        assert_eq!(guard.write_safe("a\n"), WriteOutcome::Queued);
        assert_eq!(guard.write_safe("b\n"), WriteOutcome::Overflow);
    }

    #[tokio::test]
    async fn stalled_socket_times_out_and_stays_usable() {
        let (guard, outbox) = WriteGuard::channel("frank", 16);
        // Capacity 4: the second write blocks until the timeout fires.
        let (mut client, server) = tokio::io::duplex(4);
        let handle = outbox.spawn(server, "\n", Duration::from_millis(50));
        guard.write_safe("abc\n");
        guard.write_safe("0123456789\n");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!guard.is_closed());

        let mut first = [0u8; 4];
        client.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"abc\n");
        // The dropped message left nothing behind.
        guard.write_safe("next\n");
        let mut next = [0u8; 5];
        client.read_exact(&mut next).await.unwrap();
        assert_eq!(&next, b"next\n");
        drop(guard);
        drop(client);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn write_cut_short_by_timeout_closes_the_guard() {
        let (guard, outbox) = WriteGuard::channel("grace", 16);
        // Capacity 8: the second message stalls after four bytes.
        let (mut client, server) = tokio::io::duplex(8);
        let handle = outbox.spawn(server, "\n", Duration::from_millis(50));
        guard.write_safe("abc\n");
        guard.write_safe("0123456789\n");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(guard.is_closed());
        assert_eq!(guard.write_safe("next\n"), WriteOutcome::Closed);
        handle.await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abc\n0123");
    }
}
