// SPDX-License-Identifier: Apache-2.0

use super::block::{Field, Vector, VectorBlock, VectorValues};
use crate::error::{MillError, MillResult};
use crate::types::{from_wire, WireValue};
use crate::value::Value;

/// Typed random access over one vector.
///
/// Widening getters are exact. Narrowing getters truncate floating values
/// toward zero and fail with `TypeConversion` when the result does not fit.
/// Crossing between numeric and non-numeric kinds is a `TypeMismatch`.
/// All getters return `None` for null slots without looking at the value.
#[derive(Debug, Clone, Copy)]
pub struct VectorReader<'a> {
    field: &'a Field,
    vector: &'a Vector,
}

impl<'a> VectorReader<'a> {
    pub fn new(field: &'a Field, vector: &'a Vector) -> Self {
        Self { field, vector }
    }

    pub fn field(&self) -> &'a Field {
        self.field
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn is_null(&self, row: usize) -> MillResult<bool> {
        self.vector.nulls.get(row).copied().ok_or_else(|| {
            MillError::invalid_argument(format!(
                "row {row} out of bounds for {} rows",
                self.vector.len()
            ))
        })
    }

    fn mismatch(&self, getter: &str) -> MillError {
        MillError::type_mismatch(format!(
            "{getter} is not available on {} field '{}'",
            self.field.logical_type, self.field.name
        ))
    }

    pub fn get_boolean(&self, row: usize) -> MillResult<Option<bool>> {
        if self.is_null(row)? {
            return Ok(None);
        }
        match &self.vector.values {
            VectorValues::Bool(v) => Ok(Some(*slot(v, row)?)),
            _ => Err(self.mismatch("get_boolean")),
        }
    }

    pub fn get_int(&self, row: usize) -> MillResult<Option<i32>> {
        if self.is_null(row)? {
            return Ok(None);
        }
        let value = match &self.vector.values {
            VectorValues::I32(v) => *slot(v, row)?,
            VectorValues::I64(v) => narrow_int(*slot(v, row)?)?,
            VectorValues::Fp32(v) => narrow_int(truncate(f64::from(*slot(v, row)?))?)?,
            VectorValues::Fp64(v) => narrow_int(truncate(*slot(v, row)?)?)?,
            _ => return Err(self.mismatch("get_int")),
        };
        Ok(Some(value))
    }

    pub fn get_long(&self, row: usize) -> MillResult<Option<i64>> {
        if self.is_null(row)? {
            return Ok(None);
        }
        let value = match &self.vector.values {
            VectorValues::I32(v) => i64::from(*slot(v, row)?),
            VectorValues::I64(v) => *slot(v, row)?,
            VectorValues::Fp32(v) => truncate(f64::from(*slot(v, row)?))?,
            VectorValues::Fp64(v) => truncate(*slot(v, row)?)?,
            _ => return Err(self.mismatch("get_long")),
        };
        Ok(Some(value))
    }

    pub fn get_float(&self, row: usize) -> MillResult<Option<f32>> {
        if self.is_null(row)? {
            return Ok(None);
        }
        let value = match &self.vector.values {
            VectorValues::I32(v) => *slot(v, row)? as f32,
            VectorValues::I64(v) => *slot(v, row)? as f32,
            VectorValues::Fp32(v) => *slot(v, row)?,
            VectorValues::Fp64(v) => {
                let wide = *slot(v, row)?;
                let narrow = wide as f32;
                if wide.is_finite() && narrow.is_infinite() {
                    return Err(MillError::type_conversion(format!(
                        "{wide} does not fit in a 4-byte float"
                    )));
                }
                narrow
            }
            _ => return Err(self.mismatch("get_float")),
        };
        Ok(Some(value))
    }

    pub fn get_double(&self, row: usize) -> MillResult<Option<f64>> {
        if self.is_null(row)? {
            return Ok(None);
        }
        let value = match &self.vector.values {
            VectorValues::I32(v) => f64::from(*slot(v, row)?),
            VectorValues::I64(v) => *slot(v, row)? as f64,
            VectorValues::Fp32(v) => f64::from(*slot(v, row)?),
            VectorValues::Fp64(v) => *slot(v, row)?,
            _ => return Err(self.mismatch("get_double")),
        };
        Ok(Some(value))
    }

    pub fn get_string(&self, row: usize) -> MillResult<Option<&'a str>> {
        if self.is_null(row)? {
            return Ok(None);
        }
        match &self.vector.values {
            VectorValues::String(v) => Ok(Some(slot(v, row)?.as_str())),
            _ => Err(self.mismatch("get_string")),
        }
    }

    pub fn get_bytes(&self, row: usize) -> MillResult<Option<&'a [u8]>> {
        if self.is_null(row)? {
            return Ok(None);
        }
        match &self.vector.values {
            VectorValues::Bytes(v) => Ok(Some(slot(v, row)?.as_slice())),
            _ => Err(self.mismatch("get_bytes")),
        }
    }

    /// Domain value of the slot, decoded through the field's logical type
    pub fn get_object(&self, row: usize) -> MillResult<Value> {
        if self.is_null(row)? {
            return Ok(Value::Null);
        }
        let wire = match &self.vector.values {
            VectorValues::Bool(v) => WireValue::Bool(*slot(v, row)?),
            VectorValues::I32(v) => WireValue::I32(*slot(v, row)?),
            VectorValues::I64(v) => WireValue::I64(*slot(v, row)?),
            VectorValues::Fp32(v) => WireValue::Fp32(*slot(v, row)?),
            VectorValues::Fp64(v) => WireValue::Fp64(*slot(v, row)?),
            VectorValues::String(v) => WireValue::String(slot(v, row)?.clone()),
            VectorValues::Bytes(v) => WireValue::Bytes(slot(v, row)?.clone()),
        };
        from_wire(self.field.logical_type, &wire)
    }
}

/// Value slot of a vector whose value array may be shorter than its null
/// bitmap when the block skipped validation
fn slot<T>(values: &[T], row: usize) -> MillResult<&T> {
    values.get(row).ok_or_else(|| {
        MillError::invalid_argument(format!(
            "row {row} out of bounds for {} values",
            values.len()
        ))
    })
}

fn narrow_int(v: i64) -> MillResult<i32> {
    i32::try_from(v)
        .map_err(|_| MillError::type_conversion(format!("{v} does not fit in a 4-byte integer")))
}

fn truncate(v: f64) -> MillResult<i64> {
    let t = v.trunc();
    // i64::MAX is not exactly representable; 2^63 is the first value past it
    if !t.is_finite() || t < -9.223_372_036_854_776e18 || t >= 9.223_372_036_854_776e18 {
        return Err(MillError::type_conversion(format!(
            "{v} does not fit in an 8-byte integer"
        )));
    }
    Ok(t as i64)
}

/// Per-field readers and row materialisation over a whole block
#[derive(Debug, Clone, Copy)]
pub struct VectorBlockReader<'a> {
    block: &'a VectorBlock,
}

impl<'a> VectorBlockReader<'a> {
    pub fn new(block: &'a VectorBlock) -> Self {
        Self { block }
    }

    pub fn row_count(&self) -> usize {
        self.block.row_count()
    }

    pub fn reader(&self, index: usize) -> MillResult<VectorReader<'a>> {
        match (self.block.schema.fields.get(index), self.block.vectors.get(index)) {
            (Some(field), Some(vector)) => Ok(VectorReader::new(field, vector)),
            _ => Err(MillError::invalid_argument(format!(
                "field {index} out of bounds for {} fields",
                self.block.schema.fields.len()
            ))),
        }
    }

    pub fn reader_by_name(&self, name: &str) -> MillResult<VectorReader<'a>> {
        let index = self
            .block
            .schema
            .index_of(name)
            .ok_or_else(|| MillError::not_found(format!("field '{name}'")))?;
        self.reader(index)
    }

    pub fn row(&self, row: usize) -> MillResult<Vec<Value>> {
        (0..self.block.vectors.len())
            .map(|i| self.reader(i)?.get_object(row))
            .collect()
    }

    pub fn rows(&self) -> MillResult<Vec<Vec<Value>>> {
        (0..self.row_count()).map(|r| self.row(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogicalType;
    use crate::vectors::{BlockProducer, Schema};

    fn block() -> VectorBlock {
        let schema = Schema::new([
            ("small", LogicalType::SmallInt, true),
            ("big", LogicalType::BigInt, true),
            ("ratio", LogicalType::Double, true),
            ("label", LogicalType::String, true),
        ]);
        let mut producer = BlockProducer::new(schema, 4);
        producer
            .append_row(&[
                Value::Int(-7),
                Value::Int(i64::from(i32::MAX) + 1),
                Value::Float(-2.9),
                Value::Text("x".into()),
            ])
            .unwrap();
        producer
            .append_row(&[Value::Null, Value::Int(5), Value::Float(1e12), Value::Null])
            .unwrap();
        producer.take_block()
    }

    #[test]
    fn short_value_array_is_an_error() {
        let field = Field::new(0, "n", LogicalType::Int, true);
        let vector = Vector {
            nulls: vec![false, false],
            values: VectorValues::I32(vec![1]),
        };
        let reader = VectorReader::new(&field, &vector);
        assert_eq!(reader.get_int(0).unwrap(), Some(1));
        assert!(matches!(reader.get_int(1), Err(MillError::InvalidArgument { .. })));
        assert!(matches!(reader.get_object(1), Err(MillError::InvalidArgument { .. })));
    }

    #[test]
    fn widening_getters_are_exact() {
        let block = block();
        let reader = VectorBlockReader::new(&block);
        let small = reader.reader(0).unwrap();
        assert_eq!(small.get_int(0).unwrap(), Some(-7));
        assert_eq!(small.get_long(0).unwrap(), Some(-7));
        assert_eq!(small.get_double(0).unwrap(), Some(-7.0));
        assert_eq!(small.get_int(1).unwrap(), None);
    }

    #[test]
    fn narrowing_truncates_toward_zero() {
        let block = block();
        let ratio = VectorBlockReader::new(&block).reader(2).unwrap();
        assert_eq!(ratio.get_int(0).unwrap(), Some(-2));
        assert_eq!(ratio.get_long(0).unwrap(), Some(-2));
        assert!(matches!(
            ratio.get_int(1),
            Err(MillError::TypeConversion { .. })
        ));
        assert_eq!(ratio.get_long(1).unwrap(), Some(1_000_000_000_000));
    }

    #[test]
    fn narrowing_out_of_range_fails() {
        let block = block();
        let big = VectorBlockReader::new(&block).reader(1).unwrap();
        assert!(matches!(big.get_int(0), Err(MillError::TypeConversion { .. })));
        assert_eq!(big.get_int(1).unwrap(), Some(5));
    }

    #[test]
    fn crossing_kinds_is_mismatch() {
        let block = block();
        let reader = VectorBlockReader::new(&block);
        let label = reader.reader(3).unwrap();
        assert!(matches!(label.get_int(0), Err(MillError::TypeMismatch { .. })));
        assert!(matches!(
            reader.reader(0).unwrap().get_string(0),
            Err(MillError::TypeMismatch { .. })
        ));
        assert_eq!(label.get_string(0).unwrap(), Some("x"));
        assert_eq!(label.get_string(1).unwrap(), None);
    }

    #[test]
    fn out_of_bounds_row_is_invalid() {
        let block = block();
        let reader = VectorBlockReader::new(&block).reader(0).unwrap();
        assert!(matches!(
            reader.is_null(9),
            Err(MillError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn rows_materialise_domain_values() {
        let block = block();
        let rows = VectorBlockReader::new(&block).rows().unwrap();
        assert_eq!(rows[1][0], Value::Null);
        assert_eq!(rows[0][3], Value::Text("x".into()));
        assert_eq!(
            VectorBlockReader::new(&block)
                .reader_by_name("RATIO")
                .unwrap()
                .field()
                .index,
            2
        );
    }
}
