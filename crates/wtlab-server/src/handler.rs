//! Per-session behaviour.
//!
//! Once a session is accepted the server exercises every channel type:
//! it opens a bidirectional stream with a periodic writer, reads what the
//! client sends back on it, runs the datagram loop, sends two greeting
//! datagrams, and dispatches client-initiated streams to reader tasks.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info_span, Instrument};
use wtlab_core::channel::{
    create_bidirectional, send_datagram, spawn_periodic_writer, spawn_stream_reader,
};
use wtlab_core::{start_channel_loops, CancelSignal, ChannelKind, EventSink, LogEntry, Session};

/// Datagrams sent to every new session.
pub const GREETING_DATAGRAMS: [&[u8]; 2] = [&[1, 2, 3, 4, 5], &[6, 7, 8, 9, 10]];

/// Drive `session` until it closes or `shutdown` fires.
pub async fn handle_session(
    session: Arc<dyn Session>,
    sink: Arc<dyn EventSink>,
    write_interval: Duration,
    shutdown: CancelSignal,
) {
    let id = session.id();
    let span = info_span!("session", id);
    run(session, sink, write_interval, shutdown)
        .instrument(span)
        .await;
}

async fn run(
    session: Arc<dyn Session>,
    sink: Arc<dyn EventSink>,
    write_interval: Duration,
    shutdown: CancelSignal,
) {
    // Stops this session's loops and writer; independent of other sessions.
    let stop = CancelSignal::new();
    sink.on_log(LogEntry::success("WebTransport is ready"));

    let tasks = start_channel_loops(session.clone(), sink.clone(), stop.clone());

    if let Ok(bi) = create_bidirectional(&*session, &*sink).await {
        spawn_periodic_writer(bi.send, write_interval, sink.clone(), stop.clone());
        spawn_stream_reader(
            bi.recv,
            None,
            ChannelKind::Bidirectional,
            sink.clone(),
            stop.clone(),
        );
    }

    for payload in GREETING_DATAGRAMS {
        let _ = send_datagram(&*session, payload, &*sink);
    }

    let outcome = tokio::select! {
        outcome = session.closed() => outcome,
        _ = shutdown.cancelled() => {
            session.close(0, b"server shutdown");
            session.closed().await
        }
    };
    match outcome {
        Ok(()) => sink.on_log(LogEntry::info("WebTransport is closed")),
        Err(e) => sink.on_log(LogEntry::error(format!(
            "WebTransport is closed with error: {e}"
        ))),
    }

    stop.cancel();
    let exits = tasks.join().await;
    debug!(?exits, "session handler finished");
}
