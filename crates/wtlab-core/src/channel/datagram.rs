//! Datagram channel: receive loop and fire-and-forget send.

use std::sync::Arc;
use tracing::debug;

use super::LoopExit;
use crate::error::WtResult;
use crate::events::{format_bytes, ChannelKind, EventSink, LogEntry};
use crate::shutdown::CancelSignal;
use crate::transport::Session;

/// Receive datagrams until the session ends, fails, or `stop` fires.
///
/// Every datagram bumps the datagram counter and is logged.
pub async fn run_datagram_loop(
    session: Arc<dyn Session>,
    sink: Arc<dyn EventSink>,
    stop: CancelSignal,
) -> LoopExit {
    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break LoopExit::Stopped,
            r = session.receive_datagram() => r,
        };

        match next {
            Ok(Some(payload)) => {
                sink.on_count(ChannelKind::Datagram);
                sink.on_log(LogEntry::info(format!(
                    "Read from datagram: {}",
                    format_bytes(&payload)
                )));
            }
            Ok(None) => break LoopExit::Ended,
            Err(e) => {
                sink.on_log(LogEntry::error(format!(
                    "datagram reader closed with error: {e}"
                )));
                break LoopExit::Failed;
            }
        }
    };
    debug!(session = session.id(), ?exit, "datagram loop finished");
    exit
}

/// Send one datagram. A failure is logged and returned but leaves the
/// session untouched.
pub fn send_datagram(session: &dyn Session, payload: &[u8], sink: &dyn EventSink) -> WtResult<()> {
    match session.send_datagram(payload) {
        Ok(()) => {
            debug!(session = session.id(), len = payload.len(), "datagram sent");
            Ok(())
        }
        Err(e) => {
            sink.on_log(LogEntry::error(format!("failed to send datagram: {e}")));
            Err(e)
        }
    }
}
