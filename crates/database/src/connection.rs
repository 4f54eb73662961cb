//! Owned connection handles.
//!
//! The store never opens connections itself. Most operations borrow one for
//! the duration of a call; [`crate::ContentStore::read`] instead takes a
//! handle by value and hands it to the returned reader, which releases it
//! when the caller is done streaming.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, Connection};

/// A connection handle the store can take ownership of and later release.
#[async_trait]
pub trait OwnedConnection: Send + Sized + 'static {
    /// Borrow the underlying connection.
    fn connection(&mut self) -> &mut AnyConnection;

    /// Give the connection back: close it, or return it to its pool.
    async fn release(self) -> Result<(), sqlx::Error>;
}

#[async_trait]
impl OwnedConnection for AnyConnection {
    fn connection(&mut self) -> &mut AnyConnection {
        self
    }

    async fn release(self) -> Result<(), sqlx::Error> {
        self.close().await
    }
}

#[async_trait]
impl OwnedConnection for PoolConnection<Any> {
    fn connection(&mut self) -> &mut AnyConnection {
        &mut **self
    }

    async fn release(self) -> Result<(), sqlx::Error> {
        // Dropping a pooled connection returns it to the pool.
        drop(self);
        Ok(())
    }
}

/// Release a connection, logging instead of returning failures.
pub(crate) async fn release_quietly<C: OwnedConnection>(conn: C) {
    if let Err(e) = conn.release().await {
        tracing::debug!(error = %e, "cannot close connection");
    }
}
