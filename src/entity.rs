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

//! Exported entity kinds and their queries.

use std::fmt;

use crate::csv::format_amount;
use crate::error::Result;
use crate::row::Row;

/// The kinds of entity exported from every shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Users,
    Orders,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Orders => "orders",
        }
    }

    /// File name used when the pipeline configuration does not override it.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            EntityKind::Users => "users.csv",
            EntityKind::Orders => "sales.csv",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The column list and source table of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityQuery {
    pub table: String,
    pub columns: Vec<String>,
}

impl EntityQuery {
    pub fn new<S: Into<String>>(table: impl Into<String>, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// SQL text for the query.
    pub fn sql(&self) -> String {
        format!("SELECT {} FROM {}", self.columns.join(", "), self.table)
    }
}

/// A record type that can be fetched from a shard and written to an export file.
///
/// Records are tagged with the shard they came from and are moved, never
/// shared, from the fetcher to the sink.
pub trait Entity: Send + Sized + 'static {
    const KIND: EntityKind;

    /// The query whose rows decode into this entity.
    fn query() -> EntityQuery;

    /// Decode one row returned by [`Entity::query`] on shard `shard_id`.
    fn decode(shard_id: usize, row: &Row) -> Result<Self>;

    /// Identifier of the shard this record was read from.
    fn shard_id(&self) -> usize;

    /// Output fields in their fixed column order.
    fn fields(&self) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub shard_id: usize,
    pub user_id: i64,
    pub name: String,
}

impl Entity for UserRecord {
    const KIND: EntityKind = EntityKind::Users;

    fn query() -> EntityQuery {
        EntityQuery::new("users", ["user_id", "name"])
    }

    fn decode(shard_id: usize, row: &Row) -> Result<Self> {
        Ok(Self {
            shard_id,
            user_id: row.get_int(0)?,
            name: row.get_text(1)?.to_string(),
        })
    }

    fn shard_id(&self) -> usize {
        self.shard_id
    }

    // shard_id, record_id, name
    fn fields(&self) -> Vec<String> {
        vec![
            self.shard_id.to_string(),
            self.user_id.to_string(),
            self.name.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub shard_id: usize,
    pub order_id: i64,
    pub user_id: i64,
    pub amount: f64,
}

impl Entity for OrderRecord {
    const KIND: EntityKind = EntityKind::Orders;

    fn query() -> EntityQuery {
        EntityQuery::new("sales", ["order_id", "user_id", "order_amount"])
    }

    fn decode(shard_id: usize, row: &Row) -> Result<Self> {
        Ok(Self {
            shard_id,
            order_id: row.get_int(0)?,
            user_id: row.get_int(1)?,
            amount: row.get_float(2)?,
        })
    }

    fn shard_id(&self) -> usize {
        self.shard_id
    }

    // shard_id, record_id, user_id, amount
    fn fields(&self) -> Vec<String> {
        vec![
            self.shard_id.to_string(),
            self.order_id.to_string(),
            self.user_id.to_string(),
            format_amount(self.amount),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_queries() {
        assert_eq!(UserRecord::query().sql(), "SELECT user_id, name FROM users");
        assert_eq!(
            OrderRecord::query().sql(),
            "SELECT order_id, user_id, order_amount FROM sales"
        );
    }

    #[test]
    fn test_user_decode_and_fields() {
        let user = UserRecord::decode(3, &row![42, "Ada"]).unwrap();
        assert_eq!(user.shard_id(), 3);
        assert_eq!(user.fields(), vec!["3", "42", "Ada"]);
    }

    #[test]
    fn test_order_decode_and_fields() {
        let order = OrderRecord::decode(1, &row![9, 42, 19.99]).unwrap();
        assert_eq!(order.fields(), vec!["1", "9", "42", "19.990000"]);

        // integer amount columns are accepted
        let order = OrderRecord::decode(0, &row![1, 2, 5]).unwrap();
        assert_eq!(order.amount, 5.0);
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(UserRecord::decode(0, &row!["x", "y"]).is_err());
        assert!(OrderRecord::decode(0, &row![1, 2]).is_err());
    }
}
