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

//! Export sink: writes one entity kind's merged record stream to its output file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, info};

use crate::csv::encode_row;
use crate::entity::Entity;
use crate::error::{ExportError, Result};

/// Final state of a drained sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub path: PathBuf,
    pub records: u64,
}

/// Owns one output file for the duration of a run.
///
/// The file is truncated on open and held under an exclusive advisory lock
/// until the sink is finished or dropped. Each record is rendered and written
/// as soon as it is received.
pub struct ExportSink {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl ExportSink {
    /// Create (or truncate) the output file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Truncate only once the lock is held.
        #[allow(clippy::suspicious_open_options)]
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| ExportError::write(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|e| ExportError::write(&path, e))?;
        file.set_len(0).map_err(|e| ExportError::write(&path, e))?;

        debug!("Opened export file {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Render and write a single record.
    pub fn write_record<E: Entity>(&mut self, record: &E) -> Result<()> {
        let line = encode_row(&record.fields());
        self.writer
            .write_all(line.as_bytes())
            .map_err(|e| ExportError::write(&self.path, e))?;
        self.records += 1;
        Ok(())
    }

    /// Consume `records` until the stream ends, then flush and close the file.
    ///
    /// Stops at the first error, whether it comes from the stream or from a write.
    pub fn drain<E, I>(mut self, records: I) -> Result<SinkReport>
    where
        E: Entity,
        I: IntoIterator<Item = Result<E>>,
    {
        for record in records {
            let record = record?;
            self.write_record(&record)?;
        }
        self.finish()
    }

    /// Flush buffered rows to disk, release the file and report the count.
    pub fn finish(self) -> Result<SinkReport> {
        let ExportSink {
            path,
            writer,
            records,
        } = self;

        let file = writer
            .into_inner()
            .map_err(|e| ExportError::write(&path, e.into_error()))?;
        file.sync_all().map_err(|e| ExportError::write(&path, e))?;
        file.unlock().map_err(|e| ExportError::write(&path, e))?;

        info!("Wrote {} records to {}", records, path.display());
        Ok(SinkReport { path, records })
    }
}
