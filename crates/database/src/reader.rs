//! Streaming reads that keep their statement and connection alive.

use crate::connection::{OwnedConnection, release_quietly};
use binstore_core::ContentKey;
use bytes::Bytes;
use sqlx::any::AnyStatement;
use std::fmt;
use std::io::{self, BufRead, Cursor, Read, Seek, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncSeek, ReadBuf};

/// Payload reader returned by [`crate::ContentStore::read`].
///
/// The payload is fetched in full and buffered in memory; reads never touch
/// the database. What is deferred is the release of the resources behind the
/// lookup: the reader owns the prepared statement (client-side metadata only,
/// no server cursor) and the connection that found the payload.
/// [`ContentReader::close`] releases the statement first and the connection
/// second; dropping the reader releases them in the same order.
/// Release failures are logged and never surface to the caller.
pub struct ContentReader<C: OwnedConnection> {
    key: ContentKey,
    // Field order is release order.
    payload: Cursor<Bytes>,
    statement: Option<AnyStatement<'static>>,
    connection: Option<C>,
    mark: u64,
}

impl<C: OwnedConnection> ContentReader<C> {
    /// Wrap a fetched payload. A `None` payload (some drivers report empty
    /// binaries as NULL) reads as an empty stream.
    pub(crate) fn new(
        key: ContentKey,
        payload: Option<Vec<u8>>,
        statement: AnyStatement<'static>,
        connection: C,
    ) -> Self {
        Self {
            key,
            payload: Cursor::new(payload.map(Bytes::from).unwrap_or_default()),
            statement: Some(statement),
            connection: Some(connection),
            mark: 0,
        }
    }

    /// Key of the payload being read.
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    /// Total payload length in bytes.
    pub fn len(&self) -> u64 {
        self.payload.get_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.payload.get_ref().is_empty()
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.payload.position())
    }

    pub fn position(&self) -> u64 {
        self.payload.position()
    }

    /// Skip up to `n` bytes; returns how many were skipped.
    pub fn skip(&mut self, n: u64) -> u64 {
        let skipped = n.min(self.remaining());
        self.payload.set_position(self.payload.position() + skipped);
        skipped
    }

    /// Remember the current position for a later [`ContentReader::reset`].
    pub fn mark(&mut self) {
        self.mark = self.payload.position();
    }

    /// Return to the last marked position (the start if never marked).
    pub fn reset(&mut self) {
        self.payload.set_position(self.mark);
    }

    /// Whether the connection and statement are still held.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Release the statement, then the connection.
    pub async fn close(mut self) {
        self.release_statement();
        if let Some(conn) = self.connection.take() {
            release_quietly(conn).await;
        }
        tracing::trace!(key = %self.key, "closed content reader");
    }

    /// Unread bytes, closing the reader.
    pub async fn into_bytes(self) -> Bytes {
        let start = usize::try_from(self.payload.position()).unwrap_or(usize::MAX);
        let bytes = self.payload.get_ref().slice(start.min(self.payload.get_ref().len())..);
        self.close().await;
        bytes
    }

    fn release_statement(&mut self) {
        if self.statement.take().is_some() {
            tracing::trace!(key = %self.key, "released statement");
        }
    }
}

impl<C: OwnedConnection> Drop for ContentReader<C> {
    fn drop(&mut self) {
        self.release_statement();
        if self.connection.take().is_some() {
            tracing::trace!(key = %self.key, "content reader dropped without close");
        }
    }
}

impl<C: OwnedConnection> fmt::Debug for ContentReader<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentReader")
            .field("key", &self.key)
            .field("len", &self.len())
            .field("position", &self.position())
            .field("open", &self.is_open())
            .finish()
    }
}

impl<C: OwnedConnection> Read for ContentReader<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.payload.read(buf)
    }
}

impl<C: OwnedConnection> BufRead for ContentReader<C> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.payload.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.payload.consume(amt);
    }
}

impl<C: OwnedConnection> Seek for ContentReader<C> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.payload.seek(pos)
    }
}

impl<C: OwnedConnection + Unpin> AsyncRead for ContentReader<C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().payload).poll_read(cx, buf)
    }
}

impl<C: OwnedConnection + Unpin> AsyncBufRead for ContentReader<C> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().payload).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().payload).consume(amt);
    }
}

impl<C: OwnedConnection + Unpin> AsyncSeek for ContentReader<C> {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.get_mut().payload).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.get_mut().payload).poll_complete(cx)
    }
}
