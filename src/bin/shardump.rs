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

//! Command line entry point: back up every configured shard into one directory.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use shardump::{BackupConfig, ExportPipeline, PostgresConnector, Result};

#[derive(Parser, Debug)]
#[command(name = "shardump", about = "Back up sharded users and sales tables")]
struct Cli {
    /// Config file path.
    #[arg(long, default_value = "./shardump.toml")]
    config: PathBuf,

    /// Output directory, used when the config file gives no backup_path [default: ./].
    #[arg(long)]
    backup: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = BackupConfig::load(&cli.config)?;
    let output_dir = config.output_dir(cli.backup.as_deref());

    let mut connector = PostgresConnector::new();
    if let Some(timeout) = config.connect_timeout() {
        connector = connector.with_connect_timeout(timeout);
    }
    let pipeline = ExportPipeline::new(Arc::new(connector), config.pipeline_config());

    info!("Backing up {} shards into {}", config.databases.len(), output_dir.display());
    let summary = pipeline.run(&config.databases, &output_dir)?;
    println!(
        "{}\t{}\t{}",
        summary.users,
        summary.orders,
        summary.archive_path.display()
    );
    Ok(())
}
