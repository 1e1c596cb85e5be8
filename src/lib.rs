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

//! Shardump exports identically-shaped database shards into flat files.
//!
//! Every shard holds a `users` and a `sales` table with the same schema. A run
//! reads all shards in parallel, writes one CSV file per entity kind with each
//! row tagged by the shard it came from, and packages both files into a
//! timestamped `.tar.gz` archive.
//!
//! ```no_run
//! use std::sync::Arc;
//! use shardump::{ExportPipeline, PipelineConfig, PostgresConnector};
//!
//! let pipeline = ExportPipeline::new(Arc::new(PostgresConnector::new()), PipelineConfig::default());
//! let summary = pipeline.run(&["host=db0 dbname=shop", "host=db1 dbname=shop"], "./backup")?;
//! println!("{} users, {} orders", summary.users, summary.orders);
//! # Ok::<(), shardump::ExportError>(())
//! ```

pub mod archive;
pub mod config;
pub mod connection;
pub mod csv;
pub mod entity;
pub mod error;
pub mod fetcher;
pub mod parallel;
pub mod pipeline;
pub mod row;
pub mod shard;
pub mod sink;

// Re-exports for a cleaner API
pub use archive::{ArchiveManifest, Archiver};
pub use config::BackupConfig;
#[cfg(feature = "postgres")]
pub use connection::PostgresConnector;
pub use connection::{MemoryConnector, MemoryShard, ShardConnection, ShardConnector};
pub use entity::{Entity, EntityKind, OrderRecord, UserRecord};
pub use error::{ErrorKind, ExportError, Result};
pub use pipeline::{ExportPipeline, ExportSummary, PipelineConfig, PipelineState};
pub use row::{Row, Value};
pub use shard::ShardSource;
