use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::connection::{ShardConnection, ShardConnector};
use crate::entity::EntityQuery;
use crate::error::{ExportError, Result};
use crate::row::Row;
use crate::shard::ShardSource;

/// Contents and failure behaviour of one in-memory shard.
#[derive(Debug, Clone, Default)]
pub struct MemoryShard {
    tables: HashMap<String, Vec<Row>>,
    refuse_connections: bool,
    failing_tables: HashMap<String, usize>,
    row_delay: Option<Duration>,
}

impl MemoryShard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rows returned for `table`, in result order.
    pub fn with_table(mut self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.insert(table.into(), rows);
        self
    }

    /// Make every connection attempt fail.
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    /// Make queries on `table` fail after `rows` rows have been delivered.
    pub fn failing_after(mut self, table: impl Into<String>, rows: usize) -> Self {
        self.failing_tables.insert(table.into(), rows);
        self
    }

    /// Sleep before delivering each row.
    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = Some(delay);
        self
    }
}

/// A shard connector backed by in-process tables.
///
/// Shards are looked up by connection descriptor. The connector counts the
/// connections currently open so callers can check that every connection was
/// released.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shards: HashMap<String, Arc<MemoryShard>>,
    open: Arc<AtomicUsize>,
    opened_total: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shard under `descriptor`.
    pub fn with_shard(mut self, descriptor: impl Into<String>, shard: MemoryShard) -> Self {
        self.shards.insert(descriptor.into(), Arc::new(shard));
        self
    }

    /// Number of connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of connections ever opened.
    pub fn total_connections(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

impl ShardConnector for MemoryConnector {
    fn connect(&self, source: &ShardSource) -> Result<Box<dyn ShardConnection>> {
        let shard = self
            .shards
            .get(source.descriptor())
            .ok_or_else(|| ExportError::Connection {
                shard_id: source.id(),
                message: "unknown shard".to_string(),
            })?;

        if shard.refuse_connections {
            return Err(ExportError::Connection {
                shard_id: source.id(),
                message: "connection refused".to_string(),
            });
        }

        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shard_id: source.id(),
            shard: Arc::clone(shard),
            open: Arc::clone(&self.open),
        }))
    }
}

struct MemoryConnection {
    shard_id: usize,
    shard: Arc<MemoryShard>,
    open: Arc<AtomicUsize>,
}

impl ShardConnection for MemoryConnection {
    fn stream_rows(
        &mut self,
        query: &EntityQuery,
        on_row: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()> {
        let rows = self
            .shard
            .tables
            .get(&query.table)
            .ok_or_else(|| ExportError::Query {
                shard_id: self.shard_id,
                message: format!("relation \"{}\" does not exist", query.table),
            })?;
        let fail_after = self.shard.failing_tables.get(&query.table).copied();

        for (delivered, row) in rows.iter().enumerate() {
            if fail_after == Some(delivered) {
                return Err(ExportError::Query {
                    shard_id: self.shard_id,
                    message: format!("query on \"{}\" failed after {} rows", query.table, delivered),
                });
            }
            if let Some(delay) = self.shard.row_delay {
                thread::sleep(delay);
            }
            on_row(row.clone())?;
        }

        if let Some(limit) = fail_after {
            if limit >= rows.len() {
                return Err(ExportError::Query {
                    shard_id: self.shard_id,
                    message: format!("query on \"{}\" failed after {} rows", query.table, rows.len()),
                });
            }
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        // Drop performs the release.
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
