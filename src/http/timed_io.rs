use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Transitions observed on the wire of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    /// A flush pushed out everything written since the previous flush.
    RequestWritten(Instant),
    /// First bytes read after a request was written.
    FirstByte(Instant),
}

/// Wraps a connection stream and reports when a request finished writing and
/// when its response started arriving.
///
/// The stream is owned by the spawned connection task, so instants travel
/// back to the dispatching request over a channel.
pub struct TimedIo<T> {
    inner: T,
    events: UnboundedSender<IoEvent>,
    unflushed: bool,
    awaiting_response: bool,
}

impl<T> TimedIo<T> {
    pub fn new(inner: T) -> (Self, UnboundedReceiver<IoEvent>) {
        let (events, rx) = unbounded_channel();
        let io = Self {
            inner,
            events,
            unflushed: false,
            awaiting_response: false,
        };
        (io, rx)
    }

    fn wrote(&mut self, n: usize) {
        if n > 0 {
            self.unflushed = true;
        }
    }

    fn emit(&self, event: IoEvent) {
        // The receiver goes away with the pooled connection.
        let _ = self.events.send(event);
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TimedIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            if this.awaiting_response && buf.filled().len() > before {
                this.awaiting_response = false;
                this.emit(IoEvent::FirstByte(Instant::now()));
            }
        }
        res
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TimedIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = res {
            this.wrote(n);
        }
        res
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = res {
            this.wrote(n);
        }
        res
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_flush(cx);
        if let Poll::Ready(Ok(())) = res {
            if this.unflushed {
                this.unflushed = false;
                this.awaiting_response = true;
                this.emit(IoEvent::RequestWritten(Instant::now()));
            }
        }
        res
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
