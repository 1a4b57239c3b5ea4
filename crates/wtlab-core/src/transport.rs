//! Abstract transport session for wtlab.
//!
//! The secure multiplexed transport itself is provided by a runtime
//! (`wtransport` in production, the `mock` module in tests). The channel
//! engine only talks to these traits. Methods return boxed `Send` futures
//! so sessions can be shared as `Arc<dyn Session>` across spawned tasks.

use crate::error::WtResult;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Readable half of a stream.
pub trait RecvStream: Send {
    /// Read the next chunk into `buf`. `Ok(None)` means the peer finished
    /// the stream and no more data will arrive.
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, WtResult<Option<usize>>>;
}

/// Writable half of a stream.
pub trait SendStream: Send {
    /// Write all bytes.
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, WtResult<()>>;

    /// Gracefully finish the stream.
    fn finish(&mut self) -> BoxFuture<'_, WtResult<()>>;
}

/// Both halves of a bidirectional stream.
pub struct BiStream {
    pub send: Box<dyn SendStream>,
    pub recv: Box<dyn RecvStream>,
}

/// One established transport session.
///
/// Accept and receive calls resolve to `Ok(None)` once the session has
/// closed gracefully: that is the end-of-channel signal for the loops.
pub trait Session: Send + Sync {
    /// Process-unique identifier, used as a registry key and in logs.
    fn id(&self) -> u64;

    /// Wait for the next peer-initiated bidirectional stream.
    fn accept_bi(&self) -> BoxFuture<'_, WtResult<Option<BiStream>>>;

    /// Wait for the next peer-initiated unidirectional stream.
    fn accept_uni(&self) -> BoxFuture<'_, WtResult<Option<Box<dyn RecvStream>>>>;

    /// Open a locally-initiated bidirectional stream.
    fn open_bi(&self) -> BoxFuture<'_, WtResult<BiStream>>;

    /// Open a locally-initiated unidirectional stream.
    fn open_uni(&self) -> BoxFuture<'_, WtResult<Box<dyn SendStream>>>;

    /// Wait for the next datagram.
    fn receive_datagram(&self) -> BoxFuture<'_, WtResult<Option<Vec<u8>>>>;

    /// Send a datagram. Delivery is not guaranteed.
    fn send_datagram(&self, payload: &[u8]) -> WtResult<()>;

    /// Request termination with an application code and reason.
    fn close(&self, code: u32, reason: &[u8]);

    /// Resolves when the session is gone: `Ok(())` for a graceful close
    /// (either side), `Err(WtError::Session)` for a transport failure.
    fn closed(&self) -> BoxFuture<'_, WtResult<()>>;
}
