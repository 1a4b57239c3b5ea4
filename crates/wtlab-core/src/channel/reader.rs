//! Per-stream reader task.
//!
//! Pulls chunks from one readable half until the peer finishes the stream,
//! a read fails, or the session's closure is observed. The read result is
//! authoritative; the closure signal only lets the loop leave early.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::{format_bytes, ChannelKind, EventSink, LogEntry};
use crate::shutdown::CancelSignal;
use crate::transport::{RecvStream, SendStream};

/// Size of the buffer each reader allocates.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How a reader task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The peer finished the stream.
    Finished { chunks: u64 },
    /// Session closure was observed before the stream finished.
    Closed { chunks: u64 },
    /// A read failed.
    Failed { chunks: u64 },
}

impl ReadOutcome {
    pub fn chunks(&self) -> u64 {
        match *self {
            ReadOutcome::Finished { chunks }
            | ReadOutcome::Closed { chunks }
            | ReadOutcome::Failed { chunks } => chunks,
        }
    }
}

/// Read `recv` to exhaustion, logging every chunk under `kind`.
pub async fn read_stream(
    mut recv: Box<dyn RecvStream>,
    kind: ChannelKind,
    sink: Arc<dyn EventSink>,
    closed: CancelSignal,
) -> ReadOutcome {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut chunks = 0u64;
    let outcome = loop {
        if closed.is_cancelled() {
            break ReadOutcome::Closed { chunks };
        }

        let read = tokio::select! {
            biased;
            _ = closed.cancelled() => break ReadOutcome::Closed { chunks },
            r = recv.read(&mut buf) => r,
        };

        match read {
            Ok(Some(n)) => {
                chunks += 1;
                sink.on_log(LogEntry::info(format!(
                    "Read from {kind}: {}",
                    format_bytes(&buf[..n])
                )));
            }
            Ok(None) => break ReadOutcome::Finished { chunks },
            Err(e) => {
                sink.on_log(LogEntry::error(format!("{kind} stream closed with error: {e}")));
                break ReadOutcome::Failed { chunks };
            }
        }
    };

    debug!(%kind, ?outcome, "stream reader finished");
    outcome
}

/// Spawn a reader task for `recv`.
///
/// For bidirectional streams pass the writable half as `keep_alive`: it is
/// held until the reader ends so the peer does not see the stream finish
/// early.
pub fn spawn_stream_reader(
    recv: Box<dyn RecvStream>,
    keep_alive: Option<Box<dyn SendStream>>,
    kind: ChannelKind,
    sink: Arc<dyn EventSink>,
    closed: CancelSignal,
) -> JoinHandle<ReadOutcome> {
    tokio::spawn(async move {
        let _keep_alive = keep_alive;
        read_stream(recv, kind, sink, closed).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Observer, Severity};
    use crate::mock::pipe;
    use std::time::Duration;

    fn chunk_logs(observer: &Observer) -> usize {
        observer
            .entries()
            .iter()
            .filter(|e| e.message.starts_with("Read from"))
            .count()
    }

    #[tokio::test]
    async fn reads_until_finished() {
        let observer = Arc::new(Observer::new());
        let (mut tx, rx) = pipe();
        tx.write_all(&[1, 2, 3]).await.unwrap();
        tx.write_all(&[4]).await.unwrap();
        tx.finish().await.unwrap();

        let outcome = read_stream(
            Box::new(rx),
            ChannelKind::Bidirectional,
            observer.clone(),
            CancelSignal::new(),
        )
        .await;

        assert_eq!(outcome, ReadOutcome::Finished { chunks: 2 });
        let entries = observer.entries();
        assert_eq!(entries[0].message, "Read from bidirectional: 1,2,3");
        assert_eq!(entries[1].message, "Read from bidirectional: 4");
        // Stream counters are bumped at accept time, never per chunk.
        assert_eq!(observer.count(ChannelKind::Bidirectional), 0);
    }

    #[tokio::test]
    async fn read_error_is_logged_and_ends_task() {
        let observer = Arc::new(Observer::new());
        let (mut tx, rx) = pipe();
        tx.write_all(&[7]).await.unwrap();
        tx.fail("reset by peer");

        let outcome = read_stream(
            Box::new(rx),
            ChannelKind::Unidirectional,
            observer.clone(),
            CancelSignal::new(),
        )
        .await;

        assert_eq!(outcome, ReadOutcome::Failed { chunks: 1 });
        let last = observer.entries().pop().unwrap();
        assert_eq!(last.severity, Severity::Error);
        assert!(last.message.contains("reset by peer"));
    }

    #[tokio::test]
    async fn closure_stops_reader_within_one_read() {
        let observer = Arc::new(Observer::new());
        let closed = CancelSignal::new();
        let (mut tx, rx) = pipe();
        for i in 0..3u8 {
            tx.write_all(&[i]).await.unwrap();
        }

        let handle = spawn_stream_reader(
            Box::new(rx),
            None,
            ChannelKind::Bidirectional,
            observer.clone(),
            closed.clone(),
        );

        while chunk_logs(&observer) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        closed.cancel();
        let before = chunk_logs(&observer);

        // The peer keeps writing; the reader must not keep consuming.
        for i in 3..50u8 {
            let _ = tx.write_all(&[i]).await;
        }

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reader did not stop after closure")
            .unwrap();
        assert!(matches!(outcome, ReadOutcome::Closed { .. }));
        assert!(chunk_logs(&observer) <= before + 1);
    }

    #[tokio::test]
    async fn already_closed_reader_never_reads() {
        let observer = Arc::new(Observer::new());
        let closed = CancelSignal::new();
        closed.cancel();
        let (mut tx, rx) = pipe();
        tx.write_all(&[1]).await.unwrap();

        let outcome = read_stream(
            Box::new(rx),
            ChannelKind::Unidirectional,
            observer.clone(),
            closed,
        )
        .await;
        assert_eq!(outcome, ReadOutcome::Closed { chunks: 0 });
        assert!(observer.entries().is_empty());
    }

    #[tokio::test]
    async fn closure_with_backlog_stops_after_current_chunk() {
        let observer = Arc::new(Observer::new());
        let closed = CancelSignal::new();
        let (mut tx, rx) = pipe();
        tx.write_all(&[0]).await.unwrap();

        let handle = spawn_stream_reader(
            Box::new(rx),
            None,
            ChannelKind::Unidirectional,
            observer.clone(),
            closed.clone(),
        );
        while chunk_logs(&observer) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Closure and a large backlog become visible together.
        closed.cancel();
        for i in 1..50u8 {
            tx.write_all(&[i]).await.unwrap();
        }

        let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.chunks() <= 2, "read {} chunks", outcome.chunks());
        assert!(matches!(outcome, ReadOutcome::Closed { .. }));
    }
}
