//! `wtransport` adapter: a WebTransport `Connection` exposed as a [`Session`].
//!
//! Used by both the client connector and the server listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use wtransport::error::ConnectionError;
use wtransport::{Connection, VarInt};

use crate::error::{WtError, WtResult};
use crate::transport::{BiStream, BoxFuture, RecvStream, SendStream, Session};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique session id.
pub fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Closure initiated by us, or an application close from the peer, ends
/// the channels without error. Everything else is a transport failure.
fn is_graceful(e: &ConnectionError) -> bool {
    matches!(
        e,
        ConnectionError::LocallyClosed | ConnectionError::ApplicationClosed(_)
    )
}

fn end_or_error<T>(e: ConnectionError, what: &str) -> WtResult<Option<T>> {
    if is_graceful(&e) {
        Ok(None)
    } else {
        Err(WtError::Session(format!("{what}: {e}")))
    }
}

struct WtRecvStream(wtransport::RecvStream);

impl RecvStream for WtRecvStream {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, WtResult<Option<usize>>> {
        Box::pin(async move {
            self.0
                .read(buf)
                .await
                .map_err(|e| WtError::StreamRead(format!("read failed: {e}")))
        })
    }
}

struct WtSendStream(wtransport::SendStream);

impl SendStream for WtSendStream {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, WtResult<()>> {
        Box::pin(async move {
            self.0
                .write_all(data)
                .await
                .map_err(|e| WtError::StreamWrite(format!("write failed: {e}")))
        })
    }

    fn finish(&mut self) -> BoxFuture<'_, WtResult<()>> {
        Box::pin(async move {
            self.0
                .finish()
                .await
                .map_err(|e| WtError::StreamWrite(format!("finish failed: {e}")))
        })
    }
}

fn bi(send: wtransport::SendStream, recv: wtransport::RecvStream) -> BiStream {
    BiStream {
        send: Box::new(WtSendStream(send)),
        recv: Box::new(WtRecvStream(recv)),
    }
}

/// WebTransport session backed by a `wtransport::Connection`.
pub struct WebTransportSession {
    id: u64,
    connection: Connection,
}

impl WebTransportSession {
    pub fn new(connection: Connection) -> Self {
        Self {
            id: next_session_id(),
            connection,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }
}

impl Session for WebTransportSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn accept_bi(&self) -> BoxFuture<'_, WtResult<Option<BiStream>>> {
        Box::pin(async move {
            match self.connection.accept_bi().await {
                Ok((send, recv)) => Ok(Some(bi(send, recv))),
                Err(e) => end_or_error(e, "accept bidirectional stream"),
            }
        })
    }

    fn accept_uni(&self) -> BoxFuture<'_, WtResult<Option<Box<dyn RecvStream>>>> {
        Box::pin(async move {
            match self.connection.accept_uni().await {
                Ok(recv) => Ok(Some(Box::new(WtRecvStream(recv)) as Box<dyn RecvStream>)),
                Err(e) => end_or_error(e, "accept unidirectional stream"),
            }
        })
    }

    fn open_bi(&self) -> BoxFuture<'_, WtResult<BiStream>> {
        Box::pin(async move {
            let opening = self
                .connection
                .open_bi()
                .await
                .map_err(|e| WtError::StreamCreation(format!("open bidirectional stream: {e}")))?;
            let (send, recv) = opening
                .await
                .map_err(|e| WtError::StreamCreation(format!("open bidirectional stream: {e}")))?;
            Ok(bi(send, recv))
        })
    }

    fn open_uni(&self) -> BoxFuture<'_, WtResult<Box<dyn SendStream>>> {
        Box::pin(async move {
            let opening = self
                .connection
                .open_uni()
                .await
                .map_err(|e| WtError::StreamCreation(format!("open unidirectional stream: {e}")))?;
            let send = opening
                .await
                .map_err(|e| WtError::StreamCreation(format!("open unidirectional stream: {e}")))?;
            Ok(Box::new(WtSendStream(send)) as Box<dyn SendStream>)
        })
    }

    fn receive_datagram(&self) -> BoxFuture<'_, WtResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            match self.connection.receive_datagram().await {
                Ok(datagram) => Ok(Some(datagram.payload().to_vec())),
                Err(e) => end_or_error(e, "receive datagram"),
            }
        })
    }

    fn send_datagram(&self, payload: &[u8]) -> WtResult<()> {
        self.connection
            .send_datagram(payload)
            .map_err(|e| WtError::Datagram(format!("send datagram: {e}")))
    }

    fn close(&self, code: u32, reason: &[u8]) {
        self.connection.close(VarInt::from_u32(code), reason);
    }

    fn closed(&self) -> BoxFuture<'_, WtResult<()>> {
        Box::pin(async move {
            let e = self.connection.closed().await;
            if is_graceful(&e) {
                Ok(())
            } else {
                Err(WtError::Session(e.to_string()))
            }
        })
    }
}
