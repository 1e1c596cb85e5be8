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

//! Integration tests checking that the archive of a run unpacks to exactly the
//! files the run wrote.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tempfile::tempdir;

use shardump::error::Result;
use shardump::{row, ExportPipeline, MemoryConnector, MemoryShard, PipelineConfig};

fn connector() -> MemoryConnector {
    MemoryConnector::new()
        .with_shard(
            "a",
            MemoryShard::new()
                .with_table("users", vec![row![1, "Ann"], row![2, "Smith, Bo"]])
                .with_table("sales", vec![row![1, 2, 12.5], row![2, 1, 0.333]]),
        )
        .with_shard(
            "b",
            MemoryShard::new()
                .with_table("users", vec![row![1, "Kai \"K\" Lee"]])
                .with_table("sales", vec![row![9, 1, 1e6]]),
        )
}

/// Unpack every regular file of a `.tar.gz` into `into`, returning the
/// unpacked paths in archive order.
fn unpack(archive: &Path, into: &Path) -> Vec<PathBuf> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
    let mut unpacked = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().into_owned();
        assert!(name.is_relative(), "absolute entry name {}", name.display());
        let target = into.join(&name);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        entry.unpack(&target).unwrap();
        unpacked.push(target);
    }
    unpacked
}

#[test]
fn test_archive_matches_output_files() -> Result<()> {
    let dir = tempdir().unwrap();
    let pipeline = ExportPipeline::new(Arc::new(connector()), PipelineConfig::default());
    let summary = pipeline.run(&["a", "b"], dir.path())?;

    let archive_name = summary.archive_path.file_name().unwrap().to_str().unwrap();
    assert!(archive_name.starts_with("backup-"));
    assert!(archive_name.ends_with(".tar.gz"));
    // backup-YYYY-MM-DD-HH-MM-SS.tar.gz
    assert_eq!(archive_name.len(), "backup-2024-01-01-00-00-00.tar.gz".len());

    let unpack_dir = tempdir().unwrap();
    let unpacked = unpack(&summary.archive_path, unpack_dir.path());
    assert_eq!(unpacked.len(), 2);

    // Users come first, then orders.
    assert_eq!(unpacked[0].file_name().unwrap(), "users.csv");
    assert_eq!(unpacked[1].file_name().unwrap(), "sales.csv");
    assert_eq!(fs::read(&unpacked[0]).unwrap(), fs::read(&summary.users_path).unwrap());
    assert_eq!(fs::read(&unpacked[1]).unwrap(), fs::read(&summary.orders_path).unwrap());
    Ok(())
}

#[test]
fn test_archive_of_empty_run() -> Result<()> {
    let dir = tempdir().unwrap();
    let connector = MemoryConnector::new().with_shard(
        "empty",
        MemoryShard::new()
            .with_table("users", vec![])
            .with_table("sales", vec![]),
    );
    let pipeline = ExportPipeline::new(Arc::new(connector), PipelineConfig::default());
    let summary = pipeline.run(&["empty"], dir.path())?;

    let unpack_dir = tempdir().unwrap();
    let unpacked = unpack(&summary.archive_path, unpack_dir.path());
    assert_eq!(unpacked.len(), 2);
    for path in &unpacked {
        assert_eq!(fs::metadata(path).unwrap().len(), 0);
    }
    Ok(())
}
