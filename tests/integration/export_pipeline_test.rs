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

//! Integration tests for complete export runs over in-memory shards.
//!
//! Shard contents are generated from a seeded RNG so that every run of a test
//! sees the same data.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use shardump::error::Result;
use shardump::{row, ErrorKind, ExportPipeline, MemoryConnector, MemoryShard, PipelineConfig, Row};

/// Per-shard fixture sizes, kept so tests can compute expected totals.
struct Fixture {
    connector: MemoryConnector,
    descriptors: Vec<String>,
    users: Vec<usize>,
    orders: Vec<usize>,
}

fn random_name(rng: &mut StdRng) -> String {
    // Names occasionally need quoting.
    const PARTS: [&str; 6] = ["Ann", "Bo", "Lee, Jr.", "Mo \"Max\"", "Kai", "Zoe"];
    PARTS[rng.gen_range(0..PARTS.len())].to_string()
}

fn build_fixture(seed: u64, shard_count: usize) -> Fixture {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut connector = MemoryConnector::new();
    let mut descriptors = Vec::new();
    let mut users = Vec::new();
    let mut orders = Vec::new();

    for shard in 0..shard_count {
        let user_count: usize = rng.gen_range(0..300);
        let order_count: usize = rng.gen_range(0..500);

        let user_rows: Vec<Row> = (0..user_count)
            .map(|i| row![i as i64 + 1, random_name(&mut rng)])
            .collect();
        let order_rows: Vec<Row> = (0..order_count)
            .map(|i| {
                let cents: i64 = rng.gen_range(0..1_000_000);
                row![
                    i as i64 + 1,
                    rng.gen_range(1..=user_count.max(1) as i64),
                    cents as f64 / 100.0
                ]
            })
            .collect();

        let descriptor = format!("host=shard{} dbname=shop", shard);
        connector = connector.with_shard(
            descriptor.clone(),
            MemoryShard::new()
                .with_table("users", user_rows)
                .with_table("sales", order_rows),
        );
        descriptors.push(descriptor);
        users.push(user_count);
        orders.push(order_count);
    }

    Fixture {
        connector,
        descriptors,
        users,
        orders,
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn sorted_lines(path: &Path) -> Vec<String> {
    let mut lines = read_lines(path);
    lines.sort();
    lines
}

/// Count lines per leading shard id.
fn lines_per_shard(lines: &[String]) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for line in lines {
        let shard: usize = line.split(',').next().unwrap().parse().unwrap();
        *counts.entry(shard).or_insert(0) += 1;
    }
    counts
}

/// Test that every row of every shard lands in the output exactly once.
#[test]
fn test_counts_match_shard_contents() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let fixture = build_fixture(7, 6);
    let dir = tempdir().unwrap();
    let pipeline = ExportPipeline::new(Arc::new(fixture.connector), PipelineConfig::default());

    let summary = pipeline.run(&fixture.descriptors, dir.path())?;

    let expected_users: usize = fixture.users.iter().sum();
    let expected_orders: usize = fixture.orders.iter().sum();
    assert_eq!(summary.users as usize, expected_users);
    assert_eq!(summary.orders as usize, expected_orders);

    let user_lines = read_lines(&summary.users_path);
    let order_lines = read_lines(&summary.orders_path);
    assert_eq!(user_lines.len(), expected_users);
    assert_eq!(order_lines.len(), expected_orders);

    // (shard_id, user_id) is unique per shard, so duplicates would show here
    let user_keys: HashSet<(String, String)> = user_lines
        .iter()
        .map(|line| {
            let mut fields = line.splitn(3, ',');
            (fields.next().unwrap().to_string(), fields.next().unwrap().to_string())
        })
        .collect();
    assert_eq!(user_keys.len(), expected_users);

    let per_shard = lines_per_shard(&order_lines);
    for (shard, &count) in fixture.orders.iter().enumerate() {
        assert_eq!(per_shard.get(&shard).copied().unwrap_or(0), count);
    }
    Ok(())
}

/// Test that no line carries a shard id outside the input list.
#[test]
fn test_shard_ids_come_from_input() -> Result<()> {
    let fixture = build_fixture(11, 4);
    let dir = tempdir().unwrap();
    let pipeline = ExportPipeline::new(Arc::new(fixture.connector), PipelineConfig::default());

    let summary = pipeline.run(&fixture.descriptors, dir.path())?;

    for path in [&summary.users_path, &summary.orders_path] {
        for shard in lines_per_shard(&read_lines(path)).keys() {
            assert!(*shard < fixture.descriptors.len(), "unexpected shard id {}", shard);
        }
    }
    Ok(())
}

/// Test that two runs over the same shards produce the same multiset of rows.
#[test]
fn test_rerun_produces_same_rows() -> Result<()> {
    let fixture = build_fixture(23, 5);
    let connector = Arc::new(fixture.connector);
    let pipeline = ExportPipeline::new(
        connector.clone(),
        PipelineConfig::default().with_queue_capacity(Some(16)),
    );

    let first_dir = tempdir().unwrap();
    let second_dir = tempdir().unwrap();
    let first = pipeline.run(&fixture.descriptors, first_dir.path())?;
    let second = pipeline.run(&fixture.descriptors, second_dir.path())?;

    assert_eq!(sorted_lines(&first.users_path), sorted_lines(&second.users_path));
    assert_eq!(sorted_lines(&first.orders_path), sorted_lines(&second.orders_path));
    assert_eq!(connector.open_connections(), 0);
    Ok(())
}

/// Test that re-running into the same directory replaces the previous output.
#[test]
fn test_rerun_same_directory_overwrites() -> Result<()> {
    let fixture = build_fixture(5, 3);
    let dir = tempdir().unwrap();
    let pipeline = ExportPipeline::new(Arc::new(fixture.connector), PipelineConfig::default());

    let first = pipeline.run(&fixture.descriptors, dir.path())?;
    let second = pipeline.run(&fixture.descriptors, dir.path())?;

    assert_eq!(first.users, second.users);
    assert_eq!(read_lines(&second.users_path).len() as u64, second.users);
    assert_eq!(read_lines(&second.orders_path).len() as u64, second.orders);
    Ok(())
}

/// Test that one failing shard fails the run and leaves no archive behind.
#[test]
fn test_failing_shard_produces_no_archive() {
    let fixture = build_fixture(3, 4);
    let connector = fixture.connector.with_shard(
        "host=broken dbname=shop",
        MemoryShard::new()
            .with_table("users", vec![row![1, "A"], row![2, "B"], row![3, "C"]])
            .with_table("sales", vec![row![1, 1, 2.5]])
            .failing_after("users", 1),
    );
    let mut descriptors = fixture.descriptors.clone();
    descriptors.insert(2, "host=broken dbname=shop".to_string());

    let dir = tempdir().unwrap();
    let pipeline = ExportPipeline::new(Arc::new(connector), PipelineConfig::default());

    match pipeline.run(&descriptors, dir.path()) {
        Err(e) => assert_eq!(e.kind(), ErrorKind::Query),
        Ok(summary) => panic!("Expected failure, archive written to {}", summary.archive_path.display()),
    }

    let archive_dir = dir.path().join("archive");
    let archived = fs::read_dir(&archive_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(archived, 0);
}

/// Test that an unknown shard surfaces as a connection failure.
#[test]
fn test_unreachable_shard_is_connection_error() {
    let fixture = build_fixture(9, 2);
    let mut descriptors = fixture.descriptors.clone();
    descriptors.push("host=nowhere".to_string());

    let dir = tempdir().unwrap();
    let pipeline = ExportPipeline::new(Arc::new(fixture.connector), PipelineConfig::default());
    let err = pipeline.run(&descriptors, dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

/// The worked two-shard example: three user lines, shard 0 in source order.
#[test]
fn test_two_shard_users_file() -> Result<()> {
    let connector = MemoryConnector::new()
        .with_shard(
            "s0",
            MemoryShard::new()
                .with_table("users", vec![row![1, "A"], row![2, "B"]])
                .with_table("sales", vec![]),
        )
        .with_shard(
            "s1",
            MemoryShard::new()
                .with_table("users", vec![row![1, "C"]])
                .with_table("sales", vec![]),
        );
    let dir = tempdir().unwrap();
    let pipeline = ExportPipeline::new(Arc::new(connector), PipelineConfig::default());

    let summary = pipeline.run(&["s0", "s1"], dir.path())?;
    let lines = read_lines(&summary.users_path);

    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["0,1,A", "0,2,B", "1,1,C"]);

    let a = lines.iter().position(|l| l == "0,1,A").unwrap();
    let b = lines.iter().position(|l| l == "0,2,B").unwrap();
    assert!(a < b);
    assert_eq!(fs::read_to_string(&summary.orders_path).unwrap(), "");
    Ok(())
}
