//! `AsyncRead`/`AsyncWrite` over a route group
//!
//! [`RouteGroupStream`] lets a route group stand in wherever tokio expects a
//! byte stream: `tokio::io::copy`, buffered readers, codecs. Reads and
//! writes go through the group, so its deadlines apply. End of stream is a
//! zero-length read and shutdown closes the group.

use std::fmt::Debug;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use meshline_core::CloseCode;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::RouteGroupResult;
use crate::route_group::RouteGroup;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A route group as a tokio byte stream
pub struct RouteGroupStream {
    group: Arc<RouteGroup>,
    close_code: CloseCode,
    /// Bytes taken from the group but not yet handed to a reader
    leftover: Bytes,
    read: Option<BoxFuture<RouteGroupResult<Bytes>>>,
    write: Option<BoxFuture<RouteGroupResult<usize>>>,
    shutdown: Option<BoxFuture<RouteGroupResult<()>>>,
}

impl RouteGroupStream {
    pub fn new(group: Arc<RouteGroup>) -> Self {
        Self {
            group,
            close_code: CloseCode::Finished,
            leftover: Bytes::new(),
            read: None,
            write: None,
            shutdown: None,
        }
    }

    /// Code sent when the stream is shut down
    pub fn with_close_code(mut self, code: CloseCode) -> Self {
        self.close_code = code;
        self
    }

    pub fn group(&self) -> &Arc<RouteGroup> {
        &self.group
    }
}

impl From<Arc<RouteGroup>> for RouteGroupStream {
    fn from(group: Arc<RouteGroup>) -> Self {
        Self::new(group)
    }
}

impl AsyncRead for RouteGroupStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if this.leftover.is_empty() {
            let max = buf.remaining();
            let read = this.read.get_or_insert_with(|| {
                let group = Arc::clone(&this.group);
                Box::pin(async move { group.read_chunk(max).await })
            });

            let result = ready!(read.as_mut().poll(cx));
            this.read = None;
            match result {
                Ok(chunk) => this.leftover = chunk,
                Err(e) if e.is_end_of_stream() => return Poll::Ready(Ok(())),
                Err(e) => return Poll::Ready(Err(e.into())),
            }
        }

        let n = this.leftover.len().min(buf.remaining());
        buf.put_slice(&this.leftover.split_to(n));
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for RouteGroupStream {
    /// A write that returned `Pending` is finished by the next call, which
    /// must pass the same bytes.
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let write = this.write.get_or_insert_with(|| {
            let group = Arc::clone(&this.group);
            let data = Bytes::copy_from_slice(buf);
            Box::pin(async move { group.write(&data).await })
        });

        let result = ready!(write.as_mut().poll(cx));
        this.write = None;
        Poll::Ready(result.map_err(io::Error::from))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Completed writes are already on the links.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let shutdown = this.shutdown.get_or_insert_with(|| {
            let group = Arc::clone(&this.group);
            let code = this.close_code;
            Box::pin(async move { group.close(code).await })
        });

        let result = ready!(shutdown.as_mut().poll(cx));
        this.shutdown = None;
        Poll::Ready(result.map_err(io::Error::from))
    }
}

impl Debug for RouteGroupStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteGroupStream")
            .field("group", &self.group)
            .field("leftover", &self.leftover.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use meshline_core::{KeyPair, Port, RouteDescriptor};
    use meshline_routing::MemoryRuleTable;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::assert_pending;

    use super::*;
    use crate::config::RouteGroupConfig;

    fn make_stream() -> RouteGroupStream {
        let keys = KeyPair::generate_many(2);
        let desc = RouteDescriptor::new(keys[0].public_key(), keys[1].public_key(), Port(5), Port(6));
        let group = RouteGroup::new(
            RouteGroupConfig::default(),
            Arc::new(MemoryRuleTable::default()),
            desc.invert(),
        );
        RouteGroupStream::new(Arc::new(group))
    }

    #[tokio::test]
    async fn test_abandoned_read_keeps_its_bytes() {
        let mut stream = make_stream();
        let mut big = [0u8; 16];
        {
            let mut pending = tokio_test::task::spawn(stream.read(&mut big));
            assert_pending!(pending.poll());
        }

        stream.group().deliver(Bytes::from_static(b"abcdef")).await;

        // The parked read completes into the next, smaller read.
        let mut small = [0u8; 2];
        assert_eq!(stream.read(&mut small).await.unwrap(), 2);
        assert_eq!(&small, b"ab");
        assert_eq!(stream.read(&mut big).await.unwrap(), 4);
        assert_eq!(&big[..4], b"cdef");
        assert_eq!(stream.group().queued(), 0);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_zero_read() {
        let mut stream = make_stream();
        stream.group().deliver(Bytes::from_static(b"tail")).await;
        stream.group().handle_close_packet(CloseCode::Finished).unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"tail");
    }

    #[tokio::test]
    async fn test_shutdown_closes_group() {
        let mut stream = make_stream().with_close_code(CloseCode::RouteClosed);

        stream.shutdown().await.unwrap();
        assert!(stream.group().is_closed());
        assert_eq!(stream.group().close_code(), Some(CloseCode::RouteClosed));

        let err = stream.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_fails_pending_read() {
        let mut stream = make_stream();
        let group = Arc::clone(stream.group());

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            stream.read(&mut buf).await
        });
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());

        group.set_read_deadline(Some(tokio::time::Instant::now()));
        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
