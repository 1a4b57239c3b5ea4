//! wtlab-core: shared engine for the wtlab WebTransport client and server.
//!
//! Provides the error taxonomy, the observability sink, certificate pins,
//! the abstract session traits with their `wtransport` adapter, and the
//! channel engine (datagram loop, incoming stream dispatcher, per-stream
//! reader tasks, local stream initiator).

pub mod channel;
pub mod error;
pub mod events;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod pin;
pub mod shutdown;
pub mod transport;
pub mod webtransport;

// Re-export commonly used items at crate root.
pub use channel::{start_channel_loops, ChannelTasks, LoopExit, StreamKind};
pub use error::{WtError, WtResult};
pub use events::{ChannelCounters, ChannelKind, EventSink, LogBook, LogEntry, Observer, Severity, TracingSink};
pub use pin::{CertificatePin, HashAlgorithm};
pub use shutdown::CancelSignal;
pub use transport::{BiStream, RecvStream, SendStream, Session};
pub use webtransport::WebTransportSession;
