// SPDX-License-Identifier: Apache-2.0

//! Mapping from backend column type names to logical types.

use super::LogicalType;
use crate::error::{MillError, MillResult};

impl LogicalType {
    /// Resolves a backend-reported column type.
    ///
    /// `type_name` is matched case-insensitively with any length/precision
    /// suffix (`VARCHAR(20)`, `DECIMAL(10,2)`) ignored. Exact numerics with
    /// zero scale become integers when the precision fits, otherwise they are
    /// carried as doubles.
    pub fn from_backend_type(
        type_name: &str,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> MillResult<LogicalType> {
        let upper = type_name.trim().to_ascii_uppercase();
        let base = upper
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        if base.starts_with("INTERVAL") {
            if base.contains("YEAR") || base.contains("MONTH") {
                return Ok(LogicalType::IntervalYear);
            }
            if base.contains("DAY") {
                return Ok(LogicalType::IntervalDay);
            }
        }

        let logical = match base.as_str() {
            "BOOLEAN" | "BOOL" | "BIT" => LogicalType::Bool,
            "TINYINT" | "INT1" => LogicalType::TinyInt,
            "SMALLINT" | "INT2" => LogicalType::SmallInt,
            "INT" | "INTEGER" | "INT4" | "MEDIUMINT" => LogicalType::Int,
            "BIGINT" | "INT8" => LogicalType::BigInt,
            "REAL" | "FLOAT" | "FLOAT4" => LogicalType::Float,
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => LogicalType::Double,
            "NUMERIC" | "DECIMAL" | "NUMBER" => exact_numeric(precision, scale),
            "CHAR" | "VARCHAR" | "NCHAR" | "NVARCHAR" | "TEXT" | "CLOB" | "NCLOB"
            | "CHARACTER" | "CHARACTER VARYING" | "STRING" => LogicalType::String,
            "BINARY" | "VARBINARY" | "BLOB" | "BYTEA" | "LONGVARBINARY" => LogicalType::Binary,
            "DATE" => LogicalType::Date,
            "TIME" | "TIME WITHOUT TIME ZONE" => LogicalType::Time,
            "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITHOUT TIME ZONE" => LogicalType::Timestamp,
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => LogicalType::TimestampTz,
            "UUID" | "UNIQUEIDENTIFIER" => LogicalType::Uuid,
            _ => {
                return Err(MillError::not_supported(format!(
                    "backend type '{type_name}' has no logical mapping"
                )))
            }
        };
        Ok(logical)
    }
}

fn exact_numeric(precision: Option<u32>, scale: Option<u32>) -> LogicalType {
    match (precision, scale) {
        (Some(p), Some(0)) if p <= 9 => LogicalType::Int,
        (Some(p), Some(0)) if p <= 18 => LogicalType::BigInt,
        _ => LogicalType::Double,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_name_is_inverse() {
        for t in LogicalType::ALL {
            assert_eq!(LogicalType::from_backend_type(t.sql_name(), None, None).unwrap(), t);
        }
    }

    #[test]
    fn ignores_case_and_length_suffix() {
        assert_eq!(
            LogicalType::from_backend_type("varchar(20)", None, None).unwrap(),
            LogicalType::String
        );
        assert_eq!(
            LogicalType::from_backend_type("Interval Day To Second", None, None).unwrap(),
            LogicalType::IntervalDay
        );
    }

    #[test]
    fn exact_numerics_depend_on_precision() {
        assert_eq!(
            LogicalType::from_backend_type("DECIMAL", Some(5), Some(0)).unwrap(),
            LogicalType::Int
        );
        assert_eq!(
            LogicalType::from_backend_type("NUMERIC", Some(15), Some(0)).unwrap(),
            LogicalType::BigInt
        );
        assert_eq!(
            LogicalType::from_backend_type("DECIMAL(10,2)", Some(10), Some(2)).unwrap(),
            LogicalType::Double
        );
    }

    #[test]
    fn unknown_type_is_not_supported() {
        assert!(matches!(
            LogicalType::from_backend_type("GEOMETRY", None, None),
            Err(MillError::NotSupported { .. })
        ));
    }
}
