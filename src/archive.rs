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

//! Packaging of finished export files into a timestamped `.tar.gz` archive.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Local, TimeZone};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};
use tar::{Builder, EntryType, Header};

use crate::error::{ExportError, Result};

/// Archive file names are `backup-YYYY-MM-DD-HH-MM-SS.tar.gz`.
const ARCHIVE_NAME_FORMAT: &str = "backup-%Y-%m-%d-%H-%M-%S.tar.gz";

/// Ordered list of files to archive. Entries are written in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveManifest {
    entries: Vec<PathBuf>,
}

impl ArchiveManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, path: impl Into<PathBuf>) -> Self {
        self.entries.push(path.into());
        self
    }

    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(path.into());
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes gzip-compressed tar archives into a destination directory.
#[derive(Debug, Clone)]
pub struct Archiver {
    destination: PathBuf,
}

impl Archiver {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Archive `manifest`, naming the archive after the current local time.
    pub fn archive(&self, manifest: ArchiveManifest) -> Result<PathBuf> {
        self.archive_at(manifest, Local::now())
    }

    /// Archive `manifest`, naming the archive after `timestamp`.
    ///
    /// # Returns
    /// The path of the written archive.
    pub fn archive_at<Tz: TimeZone>(
        &self,
        manifest: ArchiveManifest,
        timestamp: DateTime<Tz>,
    ) -> Result<PathBuf>
    where
        Tz::Offset: std::fmt::Display,
    {
        fs::create_dir_all(&self.destination)
            .map_err(|e| ExportError::archive(&self.destination, e))?;

        let archive_name = timestamp.format(ARCHIVE_NAME_FORMAT).to_string();
        let archive_path = self.destination.join(&archive_name);
        // Renamed into place only once complete.
        let partial_path = self.destination.join(format!(".{}.partial", archive_name));
        info!("Archiving {} files into {}", manifest.len(), archive_path.display());

        if let Err(e) = write_archive(&partial_path, &manifest) {
            if let Err(remove_err) = fs::remove_file(&partial_path) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        "Failed to remove partial archive {}: {}",
                        partial_path.display(),
                        remove_err
                    );
                }
            }
            return Err(e);
        }

        fs::rename(&partial_path, &archive_path).map_err(|e| {
            let _ = fs::remove_file(&partial_path);
            ExportError::archive(&archive_path, e)
        })?;
        Ok(archive_path)
    }
}

/// Write the complete gzip-compressed tar stream for `manifest` to `path`.
fn write_archive(path: &Path, manifest: &ArchiveManifest) -> Result<()> {
    let file = File::create(path).map_err(|e| ExportError::archive(path, e))?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    for source in manifest.entries() {
        append_file(&mut builder, source)?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| ExportError::archive(path, e))?;
    let mut file = encoder
        .finish()
        .map_err(|e| ExportError::archive(path, e))?;
    file.flush()
        .and_then(|_| file.sync_all())
        .map_err(|e| ExportError::archive(path, e))
}

/// Write one header and the file contents. Metadata is read from the open
/// handle so that size and contents describe the same file.
fn append_file<W: Write>(builder: &mut Builder<W>, source: &Path) -> Result<()> {
    let name = entry_name(source).map_err(|e| ExportError::archive(source, e))?;
    let file = File::open(source).map_err(|e| ExportError::archive(source, e))?;
    let metadata = file.metadata().map_err(|e| ExportError::archive(source, e))?;

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(metadata.len());
    header.set_mode(file_mode(&metadata));
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    header.set_mtime(mtime);

    debug!("Adding {} ({} bytes) as {}", source.display(), metadata.len(), name.display());
    builder
        .append_data(&mut header, &name, file)
        .map_err(|e| ExportError::archive(source, e))
}

/// Tar entries must be relative: strip a leading root or drive prefix and
/// reject parent-directory components.
fn entry_name(path: &Path) -> io::Result<PathBuf> {
    let mut name = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {}
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "archive entry names must not contain `..`",
                ))
            }
            Component::Normal(part) => name.push(part),
        }
    }
    if name.as_os_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "archive entry name is empty",
        ));
    }
    Ok(name)
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
