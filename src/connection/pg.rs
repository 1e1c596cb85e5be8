use std::time::Duration;

use fallible_iterator::FallibleIterator;
use log::debug;
use postgres::types::{FromSql, Type};
use postgres::{Client, Config, NoTls};

use crate::connection::{ShardConnection, ShardConnector};
use crate::entity::EntityQuery;
use crate::error::{ExportError, Result};
use crate::row::{Row, Value};
use crate::shard::ShardSource;

/// Connects to PostgreSQL shards.
///
/// The shard descriptor is a libpq-style connection string, either
/// `host=... user=... dbname=...` or a `postgresql://` URL.
#[derive(Debug, Clone, Default)]
pub struct PostgresConnector {
    connect_timeout: Option<Duration>,
}

impl PostgresConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the time spent establishing each connection.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl ShardConnector for PostgresConnector {
    fn connect(&self, source: &ShardSource) -> Result<Box<dyn ShardConnection>> {
        let connection_error = |e: postgres::Error| ExportError::Connection {
            shard_id: source.id(),
            message: e.to_string(),
        };

        let mut config: Config = source.descriptor().parse().map_err(connection_error)?;
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout(timeout);
        }

        debug!("Connecting to shard {}", source.id());
        let client = config.connect(NoTls).map_err(connection_error)?;
        Ok(Box::new(PostgresConnection {
            shard_id: source.id(),
            client,
        }))
    }
}

struct PostgresConnection {
    shard_id: usize,
    client: Client,
}

impl ShardConnection for PostgresConnection {
    fn stream_rows(
        &mut self,
        query: &EntityQuery,
        on_row: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()> {
        let shard_id = self.shard_id;
        let sql = query.sql();
        let mut rows = self
            .client
            .query_raw(sql.as_str(), std::iter::empty::<String>())
            .map_err(|e| ExportError::Query {
                shard_id,
                message: e.to_string(),
            })?;

        while let Some(row) = rows.next().map_err(|e| ExportError::Query {
            shard_id,
            message: e.to_string(),
        })? {
            let decoded = convert_row(&row).map_err(|e| ExportError::Query {
                shard_id,
                message: e.to_string(),
            })?;
            on_row(decoded)?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let shard_id = self.shard_id;
        self.client.close().map_err(|e| ExportError::Query {
            shard_id,
            message: format!("close failed: {}", e),
        })
    }
}

/// How a result column is decoded into a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnDecoder {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
}

fn column_decoder(ty: &Type) -> Option<ColumnDecoder> {
    let decoder = if *ty == Type::INT2 {
        ColumnDecoder::Int2
    } else if *ty == Type::INT4 {
        ColumnDecoder::Int4
    } else if *ty == Type::INT8 {
        ColumnDecoder::Int8
    } else if *ty == Type::FLOAT4 {
        ColumnDecoder::Float4
    } else if *ty == Type::FLOAT8 {
        ColumnDecoder::Float8
    } else if *ty == Type::NUMERIC {
        ColumnDecoder::Numeric
    } else if [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME].contains(ty) {
        ColumnDecoder::Text
    } else {
        return None;
    };
    Some(decoder)
}

fn convert_row(row: &postgres::Row) -> std::result::Result<Row, String> {
    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let decoder = column_decoder(ty).ok_or_else(|| {
            format!("column \"{}\" has unsupported type {}", column.name(), ty)
        })?;
        let value = match decoder {
            ColumnDecoder::Int2 => row
                .try_get::<_, Option<i16>>(index)
                .map(|v| v.map_or(Value::Null, |v| Value::Int(v.into()))),
            ColumnDecoder::Int4 => row
                .try_get::<_, Option<i32>>(index)
                .map(|v| v.map_or(Value::Null, |v| Value::Int(v.into()))),
            ColumnDecoder::Int8 => row
                .try_get::<_, Option<i64>>(index)
                .map(|v| v.map_or(Value::Null, Value::Int)),
            ColumnDecoder::Float4 => row
                .try_get::<_, Option<f32>>(index)
                .map(|v| v.map_or(Value::Null, |v| Value::Float(v.into()))),
            ColumnDecoder::Float8 => row
                .try_get::<_, Option<f64>>(index)
                .map(|v| v.map_or(Value::Null, Value::Float)),
            ColumnDecoder::Numeric => row
                .try_get::<_, Option<Numeric>>(index)
                .map(|v| v.map_or(Value::Null, |v| Value::Float(v.0))),
            ColumnDecoder::Text => row
                .try_get::<_, Option<String>>(index)
                .map(|v| v.map_or(Value::Null, Value::Text)),
        };
        values.push(value.map_err(|e| format!("column \"{}\": {}", column.name(), e))?);
    }
    Ok(Row::new(values))
}

/// A NUMERIC column widened to `f64`.
struct Numeric(f64);

impl<'a> FromSql<'a> for Numeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Numeric(decode_numeric(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decode the binary NUMERIC wire format.
///
/// The header is `ndigits`, `weight`, `sign` and `dscale` (16 bits each, big
/// endian), followed by `ndigits` base-10000 digits. Digit `i` is worth
/// `10000^(weight - i)`. The value is rendered as decimal text and parsed so
/// that the result is the closest `f64`.
fn decode_numeric(raw: &[u8]) -> std::result::Result<f64, String> {
    let read_u16 = |at: usize| -> std::result::Result<u16, String> {
        raw.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| format!("numeric value truncated at byte {}", at))
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16 as i64;
    let sign = read_u16(4)?;

    match sign {
        NUMERIC_NAN => return Ok(f64::NAN),
        NUMERIC_PINF => return Ok(f64::INFINITY),
        NUMERIC_NINF => return Ok(f64::NEG_INFINITY),
        0 | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign {:#06x}", other)),
    }

    let mut digits = Vec::with_capacity(ndigits);
    for i in 0..ndigits {
        let digit = read_u16(8 + 2 * i)?;
        if digit >= 10_000 {
            return Err(format!("invalid numeric digit {}", digit));
        }
        digits.push(digit);
    }
    let digit_at = |i: i64| -> u16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                text.push_str(&digit_at(i).to_string());
            } else {
                text.push_str(&format!("{:04}", digit_at(i)));
            }
        }
    }
    text.push('.');
    for _ in 0..(-weight - 1).max(0) {
        text.push_str("0000");
    }
    let first_fraction = (weight + 1).max(0);
    if first_fraction >= ndigits as i64 {
        text.push('0');
    }
    for i in first_fraction..ndigits as i64 {
        text.push_str(&format!("{:04}", digit_at(i)));
    }

    text.parse::<f64>()
        .map_err(|e| format!("invalid numeric {}: {}", text, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a NUMERIC in wire format from its base-10000 digits.
    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for digit in digits {
            raw.extend_from_slice(&digit.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(column_decoder(&Type::INT2), Some(ColumnDecoder::Int2));
        assert_eq!(column_decoder(&Type::INT4), Some(ColumnDecoder::Int4));
        assert_eq!(column_decoder(&Type::INT8), Some(ColumnDecoder::Int8));
        assert_eq!(column_decoder(&Type::FLOAT4), Some(ColumnDecoder::Float4));
        assert_eq!(column_decoder(&Type::FLOAT8), Some(ColumnDecoder::Float8));
        assert_eq!(column_decoder(&Type::NUMERIC), Some(ColumnDecoder::Numeric));
        for ty in [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME] {
            assert_eq!(column_decoder(&ty), Some(ColumnDecoder::Text));
        }
        assert_eq!(column_decoder(&Type::BOOL), None);
        assert_eq!(column_decoder(&Type::TIMESTAMP), None);
    }

    #[test]
    fn test_numeric_accepts_only_numeric() {
        assert!(<Numeric as FromSql<'_>>::accepts(&Type::NUMERIC));
        assert!(!<Numeric as FromSql<'_>>::accepts(&Type::FLOAT8));
    }

    #[test]
    fn test_decode_numeric_values() {
        // 12.50
        assert_eq!(decode_numeric(&numeric(0, 0, 2, &[12, 5000])).unwrap(), 12.5);
        // -3.5
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NEG, 1, &[3, 5000])).unwrap(), -3.5);
        // 123456.7
        assert_eq!(
            decode_numeric(&numeric(1, 0, 1, &[12, 3456, 7000])).unwrap(),
            123456.7
        );
        // 10000, trailing zero digit groups are omitted on the wire
        assert_eq!(decode_numeric(&numeric(1, 0, 0, &[1])).unwrap(), 10000.0);
        // 0.0005
        assert_eq!(decode_numeric(&numeric(-1, 0, 4, &[5])).unwrap(), 0.0005);
        // 0.000005
        assert_eq!(decode_numeric(&numeric(-2, 0, 6, &[500])).unwrap(), 0.000005);
        // 0
        assert_eq!(decode_numeric(&numeric(0, 0, 0, &[])).unwrap(), 0.0);
    }

    #[test]
    fn test_decode_numeric_special_values() {
        assert!(decode_numeric(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap().is_nan());
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_PINF, 0, &[])).unwrap(), f64::INFINITY);
        assert_eq!(
            decode_numeric(&numeric(0, NUMERIC_NINF, 0, &[])).unwrap(),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_decode_numeric_rejects_malformed() {
        assert!(decode_numeric(&[0, 1]).is_err());
        // header says two digits, only one present
        let mut truncated = numeric(0, 0, 0, &[1, 2]);
        truncated.truncate(10);
        assert!(decode_numeric(&truncated).is_err());
        assert!(decode_numeric(&numeric(0, 0x1234, 0, &[1])).is_err());
        assert!(decode_numeric(&numeric(0, 0, 0, &[10_000])).is_err());
    }
}
