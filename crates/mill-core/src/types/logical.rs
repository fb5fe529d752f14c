// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-level encoding family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalType {
    Bool,
    I32,
    I64,
    Fp32,
    Fp64,
    String,
    Bytes,
}

impl PhysicalType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::I32 | Self::I64 | Self::Fp32 | Self::Fp64)
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }
}

impl fmt::Display for PhysicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Fp32 => "fp32",
            Self::Fp64 => "fp64",
            Self::String => "string",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// Domain-level value kind, independent of its wire encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalType {
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    String,
    Binary,
    /// Days since 1970-01-01
    Date,
    /// Nanoseconds since midnight
    Time,
    /// Epoch milliseconds, no zone
    Timestamp,
    /// Epoch milliseconds, UTC
    TimestampTz,
    /// Whole days
    IntervalDay,
    /// Whole months
    IntervalYear,
    /// 16 bytes, big-endian
    Uuid,
}

impl LogicalType {
    pub const ALL: [LogicalType; 16] = [
        Self::Bool,
        Self::TinyInt,
        Self::SmallInt,
        Self::Int,
        Self::BigInt,
        Self::Float,
        Self::Double,
        Self::String,
        Self::Binary,
        Self::Date,
        Self::Time,
        Self::Timestamp,
        Self::TimestampTz,
        Self::IntervalDay,
        Self::IntervalYear,
        Self::Uuid,
    ];

    /// Total and stable: the same logical type always encodes the same way.
    pub const fn physical(self) -> PhysicalType {
        match self {
            Self::Bool => PhysicalType::Bool,
            Self::TinyInt | Self::SmallInt | Self::Int => PhysicalType::I32,
            Self::IntervalDay | Self::IntervalYear => PhysicalType::I32,
            Self::BigInt | Self::Date | Self::Time => PhysicalType::I64,
            Self::Timestamp | Self::TimestampTz => PhysicalType::I64,
            Self::Float => PhysicalType::Fp32,
            Self::Double => PhysicalType::Fp64,
            Self::String => PhysicalType::String,
            Self::Binary | Self::Uuid => PhysicalType::Bytes,
        }
    }

    /// Canonical SQL type name, accepted back by `from_backend_type`
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Bool => "BOOLEAN",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Int => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Float => "REAL",
            Self::Double => "DOUBLE",
            Self::String => "VARCHAR",
            Self::Binary => "VARBINARY",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::TimestampTz => "TIMESTAMP WITH TIME ZONE",
            Self::IntervalDay => "INTERVAL DAY",
            Self::IntervalYear => "INTERVAL YEAR",
            Self::Uuid => "UUID",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporal_types_encode_as_integers() {
        assert_eq!(LogicalType::Date.physical(), PhysicalType::I64);
        assert_eq!(LogicalType::Time.physical(), PhysicalType::I64);
        assert_eq!(LogicalType::TimestampTz.physical(), PhysicalType::I64);
        assert_eq!(LogicalType::IntervalYear.physical(), PhysicalType::I32);
        assert_eq!(LogicalType::Uuid.physical(), PhysicalType::Bytes);
    }

    #[test]
    fn small_integers_widen_to_i32() {
        for t in [LogicalType::TinyInt, LogicalType::SmallInt, LogicalType::Int] {
            assert_eq!(t.physical(), PhysicalType::I32);
        }
    }
}
