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

//! Pipeline orchestration.
//!
//! A run exports every entity kind concurrently, each through its own fan-in
//! aggregator and export sink, then archives the output files:
//!
//! ```text
//! shards ──► FanIn<UserRecord>  ──► ExportSink (users.csv) ──┐
//!        └─► FanIn<OrderRecord> ──► ExportSink (sales.csv) ──┴─► Archiver ──► backup-*.tar.gz
//! ```
//!
//! Any failure aborts the whole run. Files already written are left on disk
//! but are not reported.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, error, info};

use crate::archive::{ArchiveManifest, Archiver};
use crate::connection::ShardConnector;
use crate::entity::{Entity, EntityKind, OrderRecord, UserRecord};
use crate::error::{ExportError, Result};
use crate::parallel::fan_in::{FanIn, FanInConfig};
use crate::shard::ShardSource;
use crate::sink::{ExportSink, SinkReport};

/// State of an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    FetchingAndWriting,
    Archiving,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::FetchingAndWriting => "fetching and writing",
            PipelineState::Archiving => "archiving",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Configuration for the export pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Users output file name, relative to the output directory (default: "users.csv")
    pub users_file_name: String,

    /// Orders output file name, relative to the output directory (default: "sales.csv")
    pub orders_file_name: String,

    /// Archive directory name, relative to the output directory (default: "archive")
    pub archive_dir_name: String,

    /// Delivery queue bound per entity kind; `None` is unbounded
    pub queue_capacity: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            users_file_name: EntityKind::Users.default_file_name().to_string(),
            orders_file_name: EntityKind::Orders.default_file_name().to_string(),
            archive_dir_name: "archive".to_string(),
            queue_capacity: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_users_file_name(mut self, name: impl Into<String>) -> Self {
        self.users_file_name = name.into();
        self
    }

    pub fn with_orders_file_name(mut self, name: impl Into<String>) -> Self {
        self.orders_file_name = name.into();
        self
    }

    pub fn with_archive_dir_name(mut self, name: impl Into<String>) -> Self {
        self.archive_dir_name = name.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    fn file_name(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Users => &self.users_file_name,
            EntityKind::Orders => &self.orders_file_name,
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub users: u64,
    pub orders: u64,
    pub users_path: PathBuf,
    pub orders_path: PathBuf,
    pub archive_path: PathBuf,
}

/// Drives a complete export: concurrent per-entity pipelines, then the archive.
pub struct ExportPipeline {
    connector: Arc<dyn ShardConnector>,
    config: PipelineConfig,
    state: Mutex<PipelineState>,
}

impl ExportPipeline {
    pub fn new(connector: Arc<dyn ShardConnector>, config: PipelineConfig) -> Self {
        Self {
            connector,
            config,
            state: Mutex::new(PipelineState::Idle),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current state of the most recent run.
    pub fn state(&self) -> PipelineState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn transition(&self, next: PipelineState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!("Export run: {} -> {}", *state, next);
        *state = next;
    }

    /// Export every shard in `shards` into `output_dir` and archive the result.
    ///
    /// Shards are numbered by their position in `shards`. The output directory
    /// is created if it does not exist.
    ///
    /// On failure this returns as soon as the first error is known. The other
    /// entity pipeline keeps its output file locked until its fetchers observe
    /// the abort, which is at their next row, or when a blocked connection
    /// returns. A run started on the same directory before then fails with a
    /// `Write` error for that file.
    pub fn run<S: AsRef<str>>(&self, shards: &[S], output_dir: impl AsRef<Path>) -> Result<ExportSummary> {
        let sources = ShardSource::from_descriptors(shards.iter().map(|s| s.as_ref()));
        self.run_sources(&sources, output_dir.as_ref())
    }

    /// Like [`ExportPipeline::run`] with an explicit shard list.
    pub fn run_sources(&self, shards: &[ShardSource], output_dir: &Path) -> Result<ExportSummary> {
        self.transition(PipelineState::FetchingAndWriting);
        let result = self.execute(shards, output_dir);
        match &result {
            Ok(_) => self.transition(PipelineState::Done),
            Err(e) => {
                error!("Export failed: {}", e);
                self.transition(PipelineState::Failed);
            }
        }
        result
    }

    fn execute(&self, shards: &[ShardSource], output_dir: &Path) -> Result<ExportSummary> {
        info!("Backup started...");
        debug!("Exporting {} shards into {}", shards.len(), output_dir.display());
        fs::create_dir_all(output_dir).map_err(|e| ExportError::write(output_dir, e))?;

        let abort = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let users_path = output_dir.join(self.config.file_name(EntityKind::Users));
        let orders_path = output_dir.join(self.config.file_name(EntityKind::Orders));

        self.spawn_entity::<UserRecord>(shards, users_path, &abort, tx.clone())?;
        if let Err(e) = self.spawn_entity::<OrderRecord>(shards, orders_path, &abort, tx) {
            abort.store(true, Ordering::Release);
            return Err(e);
        }

        let mut users = None;
        let mut orders = None;
        for (kind, result) in rx.iter() {
            match result {
                Ok(report) => match kind {
                    EntityKind::Users => users = Some(report),
                    EntityKind::Orders => orders = Some(report),
                },
                Err(e) => {
                    // Fail fast: stop every fetcher and return without waiting
                    // for the other pipeline.
                    abort.store(true, Ordering::Release);
                    return Err(e);
                }
            }
        }

        let (users, orders) = match (users, orders) {
            (Some(users), Some(orders)) => (users, orders),
            _ => {
                return Err(ExportError::Other(
                    "an export pipeline ended without reporting".to_string(),
                ))
            }
        };
        info!("Backup done.");
        info!("Backed up {} users and {} orders.", users.records, orders.records);

        self.transition(PipelineState::Archiving);
        info!("Archive started...");
        // Users always precede orders, whichever pipeline finished first.
        let manifest = ArchiveManifest::new()
            .with_entry(&users.path)
            .with_entry(&orders.path);
        let archiver = Archiver::new(output_dir.join(&self.config.archive_dir_name));
        let archive_path = archiver.archive(manifest)?;
        info!("Archive done: {}", archive_path.display());

        Ok(ExportSummary {
            users: users.records,
            orders: orders.records,
            users_path: users.path,
            orders_path: orders.path,
            archive_path,
        })
    }

    /// Start the fan-in and sink for one entity kind on its own thread.
    fn spawn_entity<E: Entity>(
        &self,
        shards: &[ShardSource],
        path: PathBuf,
        abort: &Arc<AtomicBool>,
        tx: mpsc::Sender<(EntityKind, Result<SinkReport>)>,
    ) -> Result<()> {
        let shards = shards.to_vec();
        let connector = Arc::clone(&self.connector);
        let abort = Arc::clone(abort);
        let fan_in_config = FanInConfig {
            queue_capacity: self.config.queue_capacity,
        };

        thread::Builder::new()
            .name(format!("export-{}", E::KIND))
            .spawn(move || {
                let result = export_entity::<E>(&shards, connector, &fan_in_config, &path, abort);
                // The receiver is gone once the run has already failed.
                let _ = tx.send((E::KIND, result));
            })
            .map(|_| ())
            .map_err(|e| ExportError::Other(format!("failed to spawn {} pipeline: {}", E::KIND, e)))
    }
}

/// One entity pipeline: fan-in over all shards drained into one sink.
fn export_entity<E: Entity>(
    shards: &[ShardSource],
    connector: Arc<dyn ShardConnector>,
    config: &FanInConfig,
    path: &Path,
    abort: Arc<AtomicBool>,
) -> Result<SinkReport> {
    let sink = ExportSink::create(path)?;
    let fan_in = FanIn::<E>::spawn(shards, connector, config, Arc::clone(&abort))?;

    let result = sink.drain(fan_in);
    if result.is_err() {
        abort.store(true, Ordering::Release);
    }
    result
}
