//! Locally-initiated streams and the periodic writer.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::{WtError, WtResult};
use crate::events::{EventSink, LogEntry};
use crate::shutdown::CancelSignal;
use crate::transport::{BiStream, SendStream, Session};

fn creation_error(e: WtError) -> WtError {
    match e {
        WtError::StreamCreation(_) => e,
        other => WtError::StreamCreation(other.to_string()),
    }
}

/// Open a bidirectional stream. The caller owns both halves.
pub async fn create_bidirectional(session: &dyn Session, sink: &dyn EventSink) -> WtResult<BiStream> {
    match session.open_bi().await {
        Ok(bi) => {
            sink.on_log(LogEntry::info("Created bidirectional stream"));
            Ok(bi)
        }
        Err(e) => {
            let e = creation_error(e);
            sink.on_log(LogEntry::error(format!(
                "failed to create bidirectional stream: {e}"
            )));
            Err(e)
        }
    }
}

/// Open a unidirectional stream and return its writer.
pub async fn create_unidirectional(
    session: &dyn Session,
    sink: &dyn EventSink,
) -> WtResult<Box<dyn SendStream>> {
    match session.open_uni().await {
        Ok(send) => {
            sink.on_log(LogEntry::info("Created unidirectional stream"));
            Ok(send)
        }
        Err(e) => {
            let e = creation_error(e);
            sink.on_log(LogEntry::error(format!(
                "failed to create unidirectional stream: {e}"
            )));
            Err(e)
        }
    }
}

/// Why a periodic writer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// The stop signal fired; the stream was finished.
    Stopped { writes: u64 },
    /// A write failed: the stream or session is gone.
    WriterClosed { writes: u64 },
}

/// The payload of write number `n`: `[3n, 3n+1, 3n+2]`, wrapping at 256.
pub fn counter_payload(n: u64) -> [u8; 3] {
    let i = (n.wrapping_mul(3) % 256) as u8;
    [i, i.wrapping_add(1), i.wrapping_add(2)]
}

/// Write an incrementing byte sequence to `send` every `period` until a
/// write fails or `stop` fires. The timer never outlives the writer.
pub fn spawn_periodic_writer(
    mut send: Box<dyn SendStream>,
    period: Duration,
    sink: Arc<dyn EventSink>,
    stop: CancelSignal,
) -> JoinHandle<WriterExit> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut writes = 0u64;

        let exit = loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    let _ = send.finish().await;
                    break WriterExit::Stopped { writes };
                }
                _ = ticker.tick() => {}
            }

            let payload = counter_payload(writes);
            if let Err(e) = send.write_all(&payload).await {
                sink.on_log(LogEntry::error(format!("writer closed with error: {e}")));
                break WriterExit::WriterClosed { writes };
            }
            writes += 1;
        };
        debug!(?exit, "periodic writer finished");
        exit
    })
}
