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

use std::fmt;

/// One shard of the exported database.
///
/// The identifier is the shard's ordinal position in the shard list and is the
/// value written to the `shard_id` column of every exported row. The descriptor
/// is an opaque connection string interpreted only by a
/// [`ShardConnector`](crate::connection::ShardConnector).
#[derive(Clone, PartialEq, Eq)]
pub struct ShardSource {
    id: usize,
    descriptor: String,
}

impl ShardSource {
    /// Create a shard source with an explicit identifier.
    pub fn new(id: usize, descriptor: impl Into<String>) -> Self {
        Self {
            id,
            descriptor: descriptor.into(),
        }
    }

    /// Build the shard list from connection strings, numbering shards by position.
    pub fn from_descriptors<I, S>(descriptors: I) -> Vec<ShardSource>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        descriptors
            .into_iter()
            .enumerate()
            .map(|(id, descriptor)| ShardSource::new(id, descriptor))
            .collect()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

// Descriptors may carry credentials, keep them out of logs.
impl fmt::Debug for ShardSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardSource")
            .field("id", &self.id)
            .field("descriptor", &"<redacted>")
            .finish()
    }
}
