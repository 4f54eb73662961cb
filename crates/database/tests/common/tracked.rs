//! Connection and payload wrappers that record when they are released.

use async_trait::async_trait;
use binstore_database::OwnedConnection;
use sqlx::{AnyConnection, Connection};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Counts releases of the connections it hands out.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct ReleaseTracker {
    released: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ReleaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `inner` so its release is counted.
    pub fn track(&self, inner: AnyConnection) -> TrackedConnection {
        TrackedConnection {
            inner,
            released: self.released.clone(),
            fail_release: false,
        }
    }

    /// Like [`ReleaseTracker::track`], but releasing reports an error.
    pub fn track_failing(&self, inner: AnyConnection) -> TrackedConnection {
        TrackedConnection {
            fail_release: true,
            ..self.track(inner)
        }
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[allow(dead_code)]
pub struct TrackedConnection {
    inner: AnyConnection,
    released: Arc<AtomicUsize>,
    fail_release: bool,
}

#[async_trait]
impl OwnedConnection for TrackedConnection {
    fn connection(&mut self) -> &mut AnyConnection {
        &mut self.inner
    }

    async fn release(self) -> Result<(), sqlx::Error> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await?;
        if self.fail_release {
            return Err(sqlx::Error::Protocol("simulated close failure".to_string()));
        }
        Ok(())
    }
}

/// Payload reader that flags when it is dropped.
#[allow(dead_code)]
pub struct TrackedPayload {
    inner: Cursor<Vec<u8>>,
    dropped: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl TrackedPayload {
    /// A reader over `data` and the flag set when it is dropped.
    pub fn new(data: &[u8]) -> (Self, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        let payload = Self {
            inner: Cursor::new(data.to_vec()),
            dropped: dropped.clone(),
        };
        (payload, dropped)
    }
}

impl AsyncRead for TrackedPayload {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedPayload {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}
