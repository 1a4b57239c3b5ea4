//! Incoming stream dispatcher.
//!
//! One loop per stream kind accepts peer-initiated streams and hands each
//! one to its own reader task. Spawning never blocks the next accept and
//! there is no admission limit.

use std::sync::Arc;
use tracing::debug;

use super::reader::spawn_stream_reader;
use super::{LoopExit, StreamKind};
use crate::error::WtResult;
use crate::events::{EventSink, LogEntry};
use crate::shutdown::CancelSignal;
use crate::transport::{RecvStream, SendStream, Session};

struct Incoming {
    recv: Box<dyn RecvStream>,
    send: Option<Box<dyn SendStream>>,
}

async fn accept(session: &dyn Session, kind: StreamKind) -> WtResult<Option<Incoming>> {
    match kind {
        StreamKind::Bidirectional => Ok(session.accept_bi().await?.map(|bi| Incoming {
            recv: bi.recv,
            send: Some(bi.send),
        })),
        StreamKind::Unidirectional => Ok(session
            .accept_uni()
            .await?
            .map(|recv| Incoming { recv, send: None })),
    }
}

/// Accept `kind` streams from `session` until it ends, fails, or `stop`
/// fires. Reader tasks watch `stop` for session closure.
pub async fn run_incoming_streams(
    session: Arc<dyn Session>,
    kind: StreamKind,
    sink: Arc<dyn EventSink>,
    stop: CancelSignal,
) -> LoopExit {
    let channel = kind.channel();
    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break LoopExit::Stopped,
            r = accept(&*session, kind) => r,
        };

        match next {
            Ok(Some(incoming)) => {
                let n = sink.on_count(channel);
                sink.on_log(LogEntry::info(format!("Received {channel} stream")));
                debug!(session = session.id(), %channel, n, "accepted stream");
                spawn_stream_reader(
                    incoming.recv,
                    incoming.send,
                    channel,
                    sink.clone(),
                    stop.clone(),
                );
            }
            Ok(None) => break LoopExit::Ended,
            Err(e) => {
                sink.on_log(LogEntry::error(format!(
                    "incoming {channel} streams closed with error: {e}"
                )));
                break LoopExit::Failed;
            }
        }
    };
    debug!(session = session.id(), %channel, ?exit, "stream dispatcher finished");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelKind, Observer, Severity};
    use crate::mock::MockSession;
    use std::time::Duration;

    async fn wait_for(observer: &Observer, pred: impl Fn(&Observer) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !pred(observer) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn counts_every_accepted_bidirectional_stream() {
        let (client, server) = MockSession::pair();
        let observer = Arc::new(Observer::new());
        let stop = CancelSignal::new();
        let handle = tokio::spawn(run_incoming_streams(
            client.clone(),
            StreamKind::Bidirectional,
            observer.clone(),
            stop.clone(),
        ));

        // Open from many tasks at once; arrival order is arbitrary.
        let mut openers = Vec::new();
        for i in 0..25u8 {
            let server = server.clone();
            openers.push(tokio::spawn(async move {
                let mut bi = server.open_bi().await.unwrap();
                bi.send.write_all(&[i]).await.unwrap();
                bi
            }));
        }
        let mut held = Vec::new();
        for o in openers {
            held.push(o.await.unwrap());
        }

        wait_for(&observer, |o| o.count(ChannelKind::Bidirectional) == 25).await;
        wait_for(&observer, |o| {
            o.entries()
                .iter()
                .filter(|e| e.message.starts_with("Read from bidirectional"))
                .count()
                == 25
        })
        .await;

        stop.cancel();
        assert_eq!(handle.await.unwrap(), LoopExit::Stopped);
        assert_eq!(observer.count(ChannelKind::Unidirectional), 0);
    }

    #[tokio::test]
    async fn slow_stream_does_not_block_next_accept() {
        let (client, server) = MockSession::pair();
        let observer = Arc::new(Observer::new());
        tokio::spawn(run_incoming_streams(
            client.clone(),
            StreamKind::Unidirectional,
            observer.clone(),
            CancelSignal::new(),
        ));

        // First stream never sends anything.
        let _idle = server.open_uni().await.unwrap();
        let mut second = server.open_uni().await.unwrap();
        second.write_all(&[42]).await.unwrap();

        wait_for(&observer, |o| {
            o.entries()
                .iter()
                .any(|e| e.message == "Read from unidirectional: 42")
        })
        .await;
        assert_eq!(observer.count(ChannelKind::Unidirectional), 2);
    }

    #[tokio::test]
    async fn finished_stream_leaves_others_alone() {
        let (client, server) = MockSession::pair();
        let observer = Arc::new(Observer::new());
        tokio::spawn(run_incoming_streams(
            client.clone(),
            StreamKind::Bidirectional,
            observer.clone(),
            CancelSignal::new(),
        ));

        let mut first = server.open_bi().await.unwrap();
        let mut second = server.open_bi().await.unwrap();
        first.send.write_all(&[0]).await.unwrap();
        wait_for(&observer, |o| o.entries().len() >= 3).await;
        // Finishing the first stream ends its reader; the second one
        // keeps going.
        first.send.finish().await.unwrap();
        second.send.write_all(&[5]).await.unwrap();
        wait_for(&observer, |o| {
            o.entries()
                .iter()
                .any(|e| e.message == "Read from bidirectional: 5")
        })
        .await;
        assert!(observer
            .entries()
            .iter()
            .all(|e| e.severity != Severity::Error));
    }

    #[tokio::test]
    async fn session_close_ends_dispatcher() {
        let (client, server) = MockSession::pair();
        let handle = tokio::spawn(run_incoming_streams(
            client,
            StreamKind::Bidirectional,
            Arc::new(Observer::new()),
            CancelSignal::new(),
        ));
        server.close(0, b"");
        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, LoopExit::Ended);
    }

    #[tokio::test]
    async fn session_failure_is_logged() {
        let (client, server) = MockSession::pair();
        let observer = Arc::new(Observer::new());
        let handle = tokio::spawn(run_incoming_streams(
            client,
            StreamKind::Unidirectional,
            observer.clone(),
            CancelSignal::new(),
        ));
        server.fail("handshake lost");
        assert_eq!(handle.await.unwrap(), LoopExit::Failed);
        assert_eq!(observer.entries()[0].severity, Severity::Error);
    }
}
