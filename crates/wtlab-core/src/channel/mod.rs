//! The channel engine shared by client and server.
//!
//! Once a session is ready, [`start_channel_loops`] starts the datagram
//! loop and one incoming-stream dispatcher per stream kind. Each accepted
//! stream gets its own reader task. Everything stops when the session ends
//! or the session's stop signal fires.

pub mod datagram;
pub mod dispatcher;
pub mod initiator;
pub mod reader;

pub use datagram::{run_datagram_loop, send_datagram};
pub use dispatcher::run_incoming_streams;
pub use initiator::{
    counter_payload, create_bidirectional, create_unidirectional, spawn_periodic_writer,
    WriterExit,
};
pub use reader::{read_stream, spawn_stream_reader, ReadOutcome};

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::events::{ChannelKind, EventSink};
use crate::shutdown::CancelSignal;
use crate::transport::Session;

/// How a channel loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The session reported end-of-channel.
    Ended,
    /// The stop signal fired.
    Stopped,
    /// The transport reported an error.
    Failed,
}

/// Stream kinds a dispatcher can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Bidirectional,
    Unidirectional,
}

impl StreamKind {
    pub fn channel(self) -> ChannelKind {
        match self {
            StreamKind::Bidirectional => ChannelKind::Bidirectional,
            StreamKind::Unidirectional => ChannelKind::Unidirectional,
        }
    }
}

/// Handles of the loops started for one ready session.
pub struct ChannelTasks {
    pub datagrams: JoinHandle<LoopExit>,
    pub incoming_bi: JoinHandle<LoopExit>,
    pub incoming_uni: JoinHandle<LoopExit>,
}

impl ChannelTasks {
    /// Wait for all three loops to end.
    pub async fn join(self) -> [LoopExit; 3] {
        let (d, b, u) = tokio::join!(self.datagrams, self.incoming_bi, self.incoming_uni);
        [d, b, u].map(|r| r.unwrap_or(LoopExit::Stopped))
    }

    pub fn abort(&self) {
        self.datagrams.abort();
        self.incoming_bi.abort();
        self.incoming_uni.abort();
    }
}

/// Start the datagram loop and both dispatchers for `session`.
pub fn start_channel_loops(
    session: Arc<dyn Session>,
    sink: Arc<dyn EventSink>,
    stop: CancelSignal,
) -> ChannelTasks {
    ChannelTasks {
        datagrams: tokio::spawn(run_datagram_loop(
            session.clone(),
            sink.clone(),
            stop.clone(),
        )),
        incoming_bi: tokio::spawn(run_incoming_streams(
            session.clone(),
            StreamKind::Bidirectional,
            sink.clone(),
            stop.clone(),
        )),
        incoming_uni: tokio::spawn(run_incoming_streams(
            session,
            StreamKind::Unidirectional,
            sink,
            stop,
        )),
    }
}
