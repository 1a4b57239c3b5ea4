//! In-memory loopback transport.
//!
//! `MockSession::pair()` returns two connected sessions: streams opened on
//! one side are accepted on the other, datagrams sent on one side are
//! received on the other, and closing either side closes both. Used by the
//! tests of every crate in the workspace.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::{WtError, WtResult};
use crate::transport::{BiStream, BoxFuture, RecvStream, SendStream, Session};
use crate::webtransport::next_session_id;

type Chunk = Result<Vec<u8>, String>;

/// Create a connected in-memory stream.
pub fn pipe() -> (MockSendStream, MockRecvStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockSendStream { tx: Some(tx) },
        MockRecvStream {
            rx,
            pending: Vec::new(),
        },
    )
}

/// Writable end of a [`pipe`].
pub struct MockSendStream {
    tx: Option<mpsc::UnboundedSender<Chunk>>,
}

impl MockSendStream {
    /// Make the reader's next read fail with `reason`.
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

impl SendStream for MockSendStream {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, WtResult<()>> {
        Box::pin(async move {
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| WtError::StreamWrite("stream already finished".into()))?;
            tx.send(Ok(data.to_vec()))
                .map_err(|_| WtError::StreamWrite("peer stopped reading".into()))
        })
    }

    fn finish(&mut self) -> BoxFuture<'_, WtResult<()>> {
        Box::pin(async move {
            self.tx.take();
            Ok(())
        })
    }
}

/// Readable end of a [`pipe`].
pub struct MockRecvStream {
    rx: mpsc::UnboundedReceiver<Chunk>,
    pending: Vec<u8>,
}

impl MockRecvStream {
    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl RecvStream for MockRecvStream {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, WtResult<Option<usize>>> {
        Box::pin(async move {
            if !self.pending.is_empty() {
                return Ok(Some(self.drain_pending(buf)));
            }
            match self.rx.recv().await {
                Some(Ok(chunk)) => {
                    self.pending = chunk;
                    Ok(Some(self.drain_pending(buf)))
                }
                Some(Err(reason)) => Err(WtError::StreamRead(reason)),
                None => Ok(None),
            }
        })
    }
}

struct Inbox {
    bi: Mutex<mpsc::UnboundedReceiver<BiStream>>,
    uni: Mutex<mpsc::UnboundedReceiver<Box<dyn RecvStream>>>,
    datagrams: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

struct Outbox {
    bi: mpsc::UnboundedSender<BiStream>,
    uni: mpsc::UnboundedSender<Box<dyn RecvStream>>,
    datagrams: mpsc::UnboundedSender<Vec<u8>>,
}

fn mailbox() -> (Outbox, Inbox) {
    let (bi_tx, bi_rx) = mpsc::unbounded_channel();
    let (uni_tx, uni_rx) = mpsc::unbounded_channel();
    let (dg_tx, dg_rx) = mpsc::unbounded_channel();
    (
        Outbox {
            bi: bi_tx,
            uni: uni_tx,
            datagrams: dg_tx,
        },
        Inbox {
            bi: Mutex::new(bi_rx),
            uni: Mutex::new(uni_rx),
            datagrams: Mutex::new(dg_rx),
        },
    )
}

/// `None` while open, then the closure outcome shared by both ends.
type LinkState = watch::Sender<Option<Result<(), String>>>;

/// One end of an in-memory session pair.
pub struct MockSession {
    id: u64,
    link: Arc<LinkState>,
    inbox: Inbox,
    peer: Outbox,
    close_calls: AtomicUsize,
    reject_open: AtomicBool,
}

impl MockSession {
    /// Two connected session ends.
    pub fn pair() -> (Arc<MockSession>, Arc<MockSession>) {
        let (link, _) = watch::channel(None);
        let link = Arc::new(link);
        let (to_a, a_inbox) = mailbox();
        let (to_b, b_inbox) = mailbox();
        let a = MockSession {
            id: next_session_id(),
            link: link.clone(),
            inbox: a_inbox,
            peer: to_b,
            close_calls: AtomicUsize::new(0),
            reject_open: AtomicBool::new(false),
        };
        let b = MockSession {
            id: next_session_id(),
            link,
            inbox: b_inbox,
            peer: to_a,
            close_calls: AtomicUsize::new(0),
            reject_open: AtomicBool::new(false),
        };
        (Arc::new(a), Arc::new(b))
    }

    /// Number of times `close` was called on this end.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.link.borrow().is_some()
    }

    /// Simulate a transport failure on both ends.
    pub fn fail(&self, reason: &str) {
        self.link.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(Err(reason.to_string()));
            true
        });
    }

    /// Make subsequent `open_bi`/`open_uni` calls on this end fail as if
    /// the peer refused the stream.
    pub fn reject_streams(&self, reject: bool) {
        self.reject_open.store(reject, Ordering::SeqCst);
    }

    async fn wait_closed(&self) -> WtResult<()> {
        let mut rx = self.link.subscribe();
        let outcome = match rx.wait_for(|state| state.is_some()).await {
            Ok(state) => state.clone(),
            Err(_) => Some(Ok(())),
        };
        match outcome {
            Some(Err(reason)) => Err(WtError::Session(reason)),
            _ => Ok(()),
        }
    }

    /// End of channel once closed: `Ok(None)` when graceful, the error otherwise.
    async fn end_of_channel<T>(&self) -> WtResult<Option<T>> {
        self.wait_closed().await.map(|_| None)
    }

    fn check_open(&self) -> WtResult<()> {
        if self.is_closed() {
            return Err(WtError::StreamCreation("session is closed".into()));
        }
        if self.reject_open.load(Ordering::SeqCst) {
            return Err(WtError::StreamCreation("stream rejected by peer".into()));
        }
        Ok(())
    }
}

impl Session for MockSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn accept_bi(&self) -> BoxFuture<'_, WtResult<Option<BiStream>>> {
        Box::pin(async move {
            let mut rx = self.inbox.bi.lock().await;
            tokio::select! {
                biased;
                r = self.end_of_channel() => r,
                s = rx.recv() => Ok(s),
            }
        })
    }

    fn accept_uni(&self) -> BoxFuture<'_, WtResult<Option<Box<dyn RecvStream>>>> {
        Box::pin(async move {
            let mut rx = self.inbox.uni.lock().await;
            tokio::select! {
                biased;
                r = self.end_of_channel() => r,
                s = rx.recv() => Ok(s),
            }
        })
    }

    fn open_bi(&self) -> BoxFuture<'_, WtResult<BiStream>> {
        Box::pin(async move {
            self.check_open()?;
            let (local_send, remote_recv) = pipe();
            let (remote_send, local_recv) = pipe();
            self.peer
                .bi
                .send(BiStream {
                    send: Box::new(remote_send),
                    recv: Box::new(remote_recv),
                })
                .map_err(|_| WtError::StreamCreation("peer is gone".into()))?;
            Ok(BiStream {
                send: Box::new(local_send),
                recv: Box::new(local_recv),
            })
        })
    }

    fn open_uni(&self) -> BoxFuture<'_, WtResult<Box<dyn SendStream>>> {
        Box::pin(async move {
            self.check_open()?;
            let (send, recv) = pipe();
            self.peer
                .uni
                .send(Box::new(recv))
                .map_err(|_| WtError::StreamCreation("peer is gone".into()))?;
            Ok(Box::new(send) as Box<dyn SendStream>)
        })
    }

    fn receive_datagram(&self) -> BoxFuture<'_, WtResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            let mut rx = self.inbox.datagrams.lock().await;
            tokio::select! {
                biased;
                r = self.end_of_channel() => r,
                d = rx.recv() => Ok(d),
            }
        })
    }

    fn send_datagram(&self, payload: &[u8]) -> WtResult<()> {
        if self.is_closed() {
            return Err(WtError::Datagram("session is closed".into()));
        }
        self.peer
            .datagrams
            .send(payload.to_vec())
            .map_err(|_| WtError::Datagram("peer is gone".into()))
    }

    fn close(&self, _code: u32, _reason: &[u8]) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.link.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(Ok(()));
            true
        });
    }

    fn closed(&self) -> BoxFuture<'_, WtResult<()>> {
        Box::pin(self.wait_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipe_delivers_chunks_then_end() {
        let (mut tx, mut rx) = pipe();
        tx.write_all(b"abc").await.unwrap();
        tx.finish().await.unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(rx.read(&mut buf).await.unwrap(), Some(2));
        assert_eq!(&buf, b"ab");
        assert_eq!(rx.read(&mut buf).await.unwrap(), Some(1));
        assert_eq!(buf[0], b'c');
        assert_eq!(rx.read(&mut buf).await.unwrap(), None);
        assert!(tx.write_all(b"late").await.is_err());
    }

    #[tokio::test]
    async fn streams_cross_the_pair() {
        let (a, b) = MockSession::pair();
        let mut local = a.open_bi().await.unwrap();
        let mut remote = b.accept_bi().await.unwrap().unwrap();

        local.send.write_all(&[1, 2]).await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(remote.recv.read(&mut buf).await.unwrap(), Some(2));

        remote.send.write_all(&[9]).await.unwrap();
        assert_eq!(local.recv.read(&mut buf).await.unwrap(), Some(1));
        assert_eq!(buf[0], 9);
    }

    #[tokio::test]
    async fn close_ends_both_sides() {
        let (a, b) = MockSession::pair();
        a.close(0, b"bye");
        assert!(b.accept_uni().await.unwrap().is_none());
        assert!(b.receive_datagram().await.unwrap().is_none());
        assert!(b.closed().await.is_ok());
        assert!(a.open_bi().await.is_err());
        assert_eq!(a.close_calls(), 1);
    }

    #[tokio::test]
    async fn failure_surfaces_as_session_error() {
        let (a, b) = MockSession::pair();
        b.fail("connection reset");
        assert!(matches!(a.accept_bi().await, Err(WtError::Session(_))));
        assert!(matches!(a.closed().await, Err(WtError::Session(_))));
    }
}
