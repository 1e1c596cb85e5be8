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

//! Column values as delivered by a shard connection.
//!
//! Backends convert their native rows into [`Row`] so that entity decoding
//! does not depend on any particular database driver.

use crate::error::{ExportError, Result};

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One result row, columns in query order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn column(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or_else(|| {
            ExportError::Decode(format!(
                "column {} out of range for row with {} columns",
                index,
                self.values.len()
            ))
        })
    }

    /// Read an integer column.
    pub fn get_int(&self, index: usize) -> Result<i64> {
        match self.column(index)? {
            Value::Int(v) => Ok(*v),
            other => Err(mismatch(index, "integer", other)),
        }
    }

    /// Read a floating point column. Integer columns are widened.
    pub fn get_float(&self, index: usize) -> Result<f64> {
        match self.column(index)? {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(mismatch(index, "float", other)),
        }
    }

    /// Read a text column.
    pub fn get_text(&self, index: usize) -> Result<&str> {
        match self.column(index)? {
            Value::Text(v) => Ok(v),
            other => Err(mismatch(index, "text", other)),
        }
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

fn mismatch(index: usize, expected: &str, found: &Value) -> ExportError {
    ExportError::Decode(format!(
        "column {}: expected {}, found {}",
        index,
        expected,
        found.type_name()
    ))
}

/// Build a [`Row`] from a list of values convertible into [`Value`].
///
/// ```
/// use shardump::row;
/// let r = row![1, "alice"];
/// assert_eq!(r.len(), 2);
/// ```
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        $crate::row::Row::new(vec![$($crate::row::Value::from($value)),*])
    };
}
