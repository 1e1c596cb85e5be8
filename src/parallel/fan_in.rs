// Fan-in aggregation of per-shard fetchers
//
// One worker thread per shard runs a RowFetcher into a shared delivery queue.
// The consumer reads the merged stream; the last worker to finish closes the
// queue, which marks the end of the stream.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use log::{debug, error, trace};

use crate::connection::ShardConnector;
use crate::entity::Entity;
use crate::error::{ExportError, Result};
use crate::fetcher::RowFetcher;
use crate::parallel::delivery_queue::DeliveryQueue;
use crate::shard::ShardSource;

/// Configuration for the fan-in aggregator
#[derive(Debug, Clone, Default)]
pub struct FanInConfig {
    /// Maximum number of undelivered records before fetchers block.
    /// `None` (the default) never blocks fetchers.
    pub queue_capacity: Option<usize>,
}

impl FanInConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }
}

/// Worker thread state
struct Worker {
    shard_id: usize,
    handle: JoinHandle<Result<u64>>,
}

/// Merges the record streams of all shards for one entity kind.
///
/// Records from one shard arrive in the order the shard returned them;
/// records from different shards interleave in no particular order. The first
/// fetcher failure sets the shared abort flag, fails the queue and is returned
/// by the next read, ahead of anything still queued.
pub struct FanIn<E: Entity> {
    /// Queue shared by all fetchers
    queue: Arc<DeliveryQueue<E>>,

    workers: Vec<Worker>,

    /// Set on the first failure anywhere in the run
    abort: Arc<AtomicBool>,

    /// Tracks the number of fetchers still running
    active_workers: Arc<AtomicUsize>,
}

impl<E: Entity> FanIn<E> {
    /// Start one fetcher thread per shard.
    ///
    /// # Arguments
    /// * `shards` - The shards to read, each fetched exactly once
    /// * `connector` - Opens shard connections
    /// * `config` - Queue configuration
    /// * `abort` - Shared abort flag, set by this aggregator when a fetcher fails
    pub fn spawn(
        shards: &[ShardSource],
        connector: Arc<dyn ShardConnector>,
        config: &FanInConfig,
        abort: Arc<AtomicBool>,
    ) -> Result<Self> {
        let queue = Arc::new(DeliveryQueue::with_capacity(config.queue_capacity));
        let active_workers = Arc::new(AtomicUsize::new(shards.len()));

        if shards.is_empty() {
            debug!("No shards to fetch {} from", E::KIND);
            queue.close()?;
        }

        let mut fan_in = Self {
            queue,
            workers: Vec::with_capacity(shards.len()),
            abort,
            active_workers,
        };

        for source in shards {
            let source = source.clone();
            let shard_id = source.id();
            let connector = Arc::clone(&connector);
            let queue = Arc::clone(&fan_in.queue);
            let abort = Arc::clone(&fan_in.abort);
            let active_workers = Arc::clone(&fan_in.active_workers);

            let spawned = thread::Builder::new()
                .name(format!("fetch-{}-{}", E::KIND, shard_id))
                .spawn(move || Self::worker_loop(source, connector, queue, abort, active_workers));

            match spawned {
                Ok(handle) => fan_in.workers.push(Worker { shard_id, handle }),
                Err(e) => {
                    // Workers that never started still count as active; fail so
                    // the consumer does not wait on them.
                    let err = ExportError::Other(format!(
                        "failed to spawn fetcher for shard {}: {}",
                        shard_id, e
                    ));
                    fan_in.abort.store(true, Ordering::Release);
                    if let Err(queue_err) = fan_in.queue.fail(ExportError::Other(err.to_string())) {
                        error!("Failed to report spawn failure: {}", queue_err);
                    }
                    return Err(err);
                }
            }
        }

        Ok(fan_in)
    }

    /// Worker thread body: fetch one shard, then report completion.
    fn worker_loop(
        source: ShardSource,
        connector: Arc<dyn ShardConnector>,
        queue: Arc<DeliveryQueue<E>>,
        abort: Arc<AtomicBool>,
        active_workers: Arc<AtomicUsize>,
    ) -> Result<u64> {
        let shard_id = source.id();
        debug!("Fetcher for {} shard {} starting", E::KIND, shard_id);

        let result = RowFetcher::<E>::new(&source, connector.as_ref(), &abort).run(&queue);

        match &result {
            Ok(count) => {
                debug!("Fetcher for {} shard {} finished with {} records", E::KIND, shard_id, count);
            }
            Err(ExportError::Aborted) => {
                trace!("Fetcher for {} shard {} aborted", E::KIND, shard_id);
            }
            Err(e) => {
                error!("Fetcher for {} shard {} failed: {}", E::KIND, shard_id, e);
                abort.store(true, Ordering::Release);
                let first = queue.fail(clone_for_consumer(e));
                if let Err(queue_err) = first {
                    error!("Failed to report shard {} failure: {}", shard_id, queue_err);
                }
            }
        }

        // The last fetcher to finish ends the stream
        let remaining = active_workers.fetch_sub(1, Ordering::SeqCst);
        if remaining == 1 {
            debug!("Last {} fetcher exiting, closing delivery queue", E::KIND);
            if let Err(e) = queue.close() {
                error!("Failed to close {} delivery queue: {}", E::KIND, e);
            }
        }

        result
    }

    /// Read the next merged record.
    ///
    /// Blocks until a record is available or every fetcher has finished.
    ///
    /// # Returns
    /// Ok(Some(record)), Ok(None) at the end of the stream, or the first
    /// fetcher error.
    pub fn next_record(&self) -> Result<Option<E>> {
        self.queue.read_front()
    }

    /// Number of fetchers still running.
    pub fn active_fetchers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Stop all fetchers.
    ///
    /// Sets the abort flag and closes the queue so blocked fetchers wake up.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
        if let Err(e) = self.queue.fail(ExportError::Aborted) {
            error!("Failed to abort {} delivery queue: {}", E::KIND, e);
        }
    }
}

/// Copy a fetcher error so the worker can both hand it to the consumer and
/// return it from its thread.
fn clone_for_consumer(e: &ExportError) -> ExportError {
    match e {
        ExportError::Connection { shard_id, message } => ExportError::Connection {
            shard_id: *shard_id,
            message: message.clone(),
        },
        ExportError::Query { shard_id, message } => ExportError::Query {
            shard_id: *shard_id,
            message: message.clone(),
        },
        ExportError::Decode(message) => ExportError::Decode(message.clone()),
        other => ExportError::Other(other.to_string()),
    }
}

/// Iterator over the merged stream; ends after the first error.
impl<E: Entity> Iterator for FanIn<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(ExportError::QueueClosed(_)) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<E: Entity> Drop for FanIn<E> {
    fn drop(&mut self) {
        let finished = self.active_fetchers() == 0;
        if !finished {
            // Dropped before the end of the stream: stop the remaining fetchers.
            self.abort();
        }

        let workers = std::mem::take(&mut self.workers);
        for worker in workers {
            // A fetcher blocked on a hung shard must not stall the caller.
            if !finished && !worker.handle.is_finished() {
                trace!("Detaching fetcher for shard {}", worker.shard_id);
                continue;
            }
            match worker.handle.join() {
                Ok(Ok(_)) | Ok(Err(ExportError::Aborted)) => {}
                Ok(Err(e)) => {
                    trace!("Fetcher for shard {} returned error in drop: {}", worker.shard_id, e);
                }
                Err(e) => {
                    error!("Failed to join fetcher for shard {} in drop: {:?}", worker.shard_id, e);
                }
            }
        }
    }
}
