// Copyright 2024
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Row fetching from a single shard.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace};

use crate::connection::{ConnectionGuard, ShardConnector};
use crate::entity::Entity;
use crate::error::{ExportError, Result};
use crate::parallel::delivery_queue::DeliveryQueue;
use crate::shard::ShardSource;

/// Streams the records of one entity kind from one shard.
///
/// The fetcher opens its own connection, runs the entity query and pushes
/// every decoded record onto the delivery queue as soon as it is decoded.
/// The connection is released before [`RowFetcher::run`] returns, whether the
/// fetch succeeded or not.
pub struct RowFetcher<'a, E: Entity> {
    source: &'a ShardSource,
    connector: &'a dyn ShardConnector,
    abort: &'a AtomicBool,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> RowFetcher<'a, E> {
    /// # Arguments
    /// * `source` - The shard to read
    /// * `connector` - Opens the shard connection
    /// * `abort` - Checked before each record; once set the fetch stops with `Aborted`
    pub fn new(
        source: &'a ShardSource,
        connector: &'a dyn ShardConnector,
        abort: &'a AtomicBool,
    ) -> Self {
        Self {
            source,
            connector,
            abort,
            _entity: PhantomData,
        }
    }

    /// Fetch every record of `E` from the shard into `queue`.
    ///
    /// # Returns
    /// The number of records delivered, or the first error:
    /// `Connection` if the shard cannot be opened, `Query` if the query or a
    /// row decode fails, `Aborted` if the run is being torn down.
    pub fn run(&self, queue: &DeliveryQueue<E>) -> Result<u64> {
        let shard_id = self.source.id();
        let query = E::query();

        if self.abort.load(Ordering::Acquire) {
            return Err(ExportError::Aborted);
        }

        let mut connection = ConnectionGuard::open(self.connector, self.source)?;
        debug!("Fetching {} from shard {}", E::KIND, shard_id);

        let mut delivered: u64 = 0;
        let streamed = connection.stream_rows(&query, &mut |row| {
            if self.abort.load(Ordering::Acquire) {
                return Err(ExportError::Aborted);
            }

            let record = E::decode(shard_id, &row).map_err(|e| match e {
                ExportError::Decode(message) => ExportError::Query { shard_id, message },
                other => other,
            })?;

            queue.push_back(record).map_err(|e| match e {
                // The consumer went away, which only happens when the run failed.
                ExportError::QueueClosed(_) => ExportError::Aborted,
                other => other,
            })?;
            delivered += 1;
            Ok(())
        });

        // Release the connection before reporting; a stream error wins over a close error.
        let closed = connection.close();
        streamed?;
        closed?;

        trace!(
            "Shard {} delivered {} {} records",
            shard_id,
            delivered,
            E::KIND
        );
        Ok(delivered)
    }
}
