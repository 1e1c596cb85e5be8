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

//! Backup configuration file.
//!
//! ```toml
//! databases = [
//!     "host=db0 user=backup dbname=shop",
//!     "host=db1 user=backup dbname=shop",
//! ]
//! backup_path = "/var/backups/shop"
//! connect_timeout_secs = 10
//! queue_capacity = 4096
//! ```
//!
//! The capitalised keys `Databases` and `BackupPath` are accepted as aliases.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ExportError, Result};
use crate::pipeline::PipelineConfig;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// One connection descriptor per shard, in shard order.
    #[serde(alias = "Databases", default)]
    pub databases: Vec<String>,

    /// Output directory. The command line `--backup` flag is used only when this is unset.
    #[serde(alias = "BackupPath", default)]
    pub backup_path: Option<PathBuf>,

    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

impl BackupConfig {
    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ExportError::Config(format!(
                "config file is missing: {}",
                path.display()
            )));
        }
        let text = fs::read_to_string(path).map_err(|e| {
            ExportError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
            .map_err(|e| ExportError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text.
    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Resolve the output directory: `backup_path` from the file, then the
    /// command line flag, then the current directory.
    pub fn output_dir(&self, flag: Option<&Path>) -> PathBuf {
        self.backup_path
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
            .cloned()
            .or_else(|| flag.map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("./"))
    }

    /// Pipeline settings derived from this file.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default().with_queue_capacity(self.queue_capacity.map(|c| c.max(1)))
    }
}
