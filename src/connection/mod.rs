//! Connections to individual shards.
//!
//! A [`ShardConnector`] knows how to open a connection for a [`ShardSource`];
//! a [`ShardConnection`] streams the rows of one query at a time. The fetcher
//! only ever holds a connection through a [`ConnectionGuard`], which releases
//! it on every exit path.

mod memory;
#[cfg(feature = "postgres")]
mod pg;

pub use memory::{MemoryConnector, MemoryShard};
#[cfg(feature = "postgres")]
pub use pg::PostgresConnector;

use log::{trace, warn};

use crate::entity::EntityQuery;
use crate::error::Result;
use crate::row::Row;
use crate::shard::ShardSource;

/// Opens connections to shards.
///
/// Implementations are shared by all fetcher threads of a run.
pub trait ShardConnector: Send + Sync {
    /// Open a live connection to `source`.
    ///
    /// # Returns
    /// - Ok(connection) if the shard accepted the connection
    /// - Err(ExportError::Connection) if the shard is unreachable or rejected it
    fn connect(&self, source: &ShardSource) -> Result<Box<dyn ShardConnection>>;
}

/// One live connection to one shard.
pub trait ShardConnection: Send {
    /// Run `query` and hand each result row to `on_row`, in result order.
    ///
    /// Rows are delivered as they are read; an error returned by `on_row`
    /// stops the stream and is returned unchanged. Query failures are
    /// reported as `ExportError::Query`.
    fn stream_rows(
        &mut self,
        query: &EntityQuery,
        on_row: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()>;

    /// Close the connection.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Scoped ownership of a shard connection.
///
/// The connection is closed by [`ConnectionGuard::close`] or, if that is never
/// reached, when the guard is dropped.
pub struct ConnectionGuard {
    shard_id: usize,
    connection: Option<Box<dyn ShardConnection>>,
}

impl ConnectionGuard {
    pub fn open(connector: &dyn ShardConnector, source: &ShardSource) -> Result<Self> {
        let connection = connector.connect(source)?;
        trace!("Opened connection to shard {}", source.id());
        Ok(Self {
            shard_id: source.id(),
            connection: Some(connection),
        })
    }

    pub fn stream_rows(
        &mut self,
        query: &EntityQuery,
        on_row: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()> {
        match self.connection.as_mut() {
            Some(connection) => connection.stream_rows(query, on_row),
            None => Err(crate::error::ExportError::Other(format!(
                "connection to shard {} already closed",
                self.shard_id
            ))),
        }
    }

    /// Close the connection, reporting any error from the backend.
    pub fn close(mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => {
                trace!("Closing connection to shard {}", self.shard_id);
                connection.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                warn!("Failed to close connection to shard {}: {}", self.shard_id, e);
            }
        }
    }
}
