// SPDX-License-Identifier: Apache-2.0

use super::block::{Schema, Vector, VectorBlock, VectorValues};
use crate::error::{MillError, MillResult};
use crate::types::{to_wire, LogicalType, PhysicalType, WireValue};
use crate::value::Value;

/// A physical value type a vector can hold. `Default` is the null sentinel.
pub trait PhysicalValue: Clone + Default {
    const PHYSICAL: PhysicalType;

    fn into_values(values: Vec<Self>) -> VectorValues;
}

macro_rules! physical_value {
    ($ty:ty, $physical:ident) => {
        impl PhysicalValue for $ty {
            const PHYSICAL: PhysicalType = PhysicalType::$physical;

            fn into_values(values: Vec<Self>) -> VectorValues {
                VectorValues::$physical(values)
            }
        }
    };
}

physical_value!(bool, Bool);
physical_value!(i32, I32);
physical_value!(i64, I64);
physical_value!(f32, Fp32);
physical_value!(f64, Fp64);
physical_value!(String, String);
physical_value!(Vec<u8>, Bytes);

/// Append-only accumulator for one vector.
#[derive(Debug, Clone, Default)]
pub struct VectorProducer<T: PhysicalValue> {
    nulls: Vec<bool>,
    values: Vec<T>,
}

impl<T: PhysicalValue> VectorProducer<T> {
    pub fn new() -> Self {
        Self {
            nulls: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nulls: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, value: T) {
        self.nulls.push(false);
        self.values.push(value);
    }

    pub fn append_null(&mut self) {
        self.nulls.push(true);
        self.values.push(T::default());
    }

    pub fn append_all<I: IntoIterator<Item = T>>(&mut self, values: I) {
        for value in values {
            self.append(value);
        }
    }

    pub fn append_nulls(&mut self, count: usize) {
        self.nulls.resize(self.nulls.len() + count, true);
        self.values.resize(self.values.len() + count, T::default());
    }

    pub fn len(&self) -> usize {
        self.nulls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nulls.is_empty()
    }

    /// Clears the buffer, keeping its allocation
    pub fn reset(&mut self) {
        self.nulls.clear();
        self.values.clear();
    }

    /// Snapshot of the accumulated values; the buffer stays intact
    pub fn build(&self) -> Vector {
        Vector {
            nulls: self.nulls.clone(),
            values: T::into_values(self.values.clone()),
        }
    }

    /// Moves the accumulated values out, leaving an empty buffer of the
    /// same capacity behind
    pub fn take(&mut self) -> Vector {
        let capacity = self.nulls.capacity();
        let nulls = std::mem::replace(&mut self.nulls, Vec::with_capacity(capacity));
        let values = std::mem::replace(&mut self.values, Vec::with_capacity(capacity));
        Vector {
            nulls,
            values: T::into_values(values),
        }
    }
}

#[derive(Debug, Clone)]
enum ProducerKind {
    Bool(VectorProducer<bool>),
    I32(VectorProducer<i32>),
    I64(VectorProducer<i64>),
    Fp32(VectorProducer<f32>),
    Fp64(VectorProducer<f64>),
    String(VectorProducer<String>),
    Bytes(VectorProducer<Vec<u8>>),
}

macro_rules! each_producer {
    ($kind:expr, $p:ident => $body:expr) => {
        match $kind {
            ProducerKind::Bool($p) => $body,
            ProducerKind::I32($p) => $body,
            ProducerKind::I64($p) => $body,
            ProducerKind::Fp32($p) => $body,
            ProducerKind::Fp64($p) => $body,
            ProducerKind::String($p) => $body,
            ProducerKind::Bytes($p) => $body,
        }
    };
}

/// Producer for one column of a given logical type, accepting domain
/// values and encoding them through the type system's converters.
#[derive(Debug, Clone)]
pub struct ColumnProducer {
    logical_type: LogicalType,
    inner: ProducerKind,
}

impl ColumnProducer {
    pub fn new(logical_type: LogicalType, capacity: usize) -> Self {
        let inner = match logical_type.physical() {
            PhysicalType::Bool => ProducerKind::Bool(VectorProducer::with_capacity(capacity)),
            PhysicalType::I32 => ProducerKind::I32(VectorProducer::with_capacity(capacity)),
            PhysicalType::I64 => ProducerKind::I64(VectorProducer::with_capacity(capacity)),
            PhysicalType::Fp32 => ProducerKind::Fp32(VectorProducer::with_capacity(capacity)),
            PhysicalType::Fp64 => ProducerKind::Fp64(VectorProducer::with_capacity(capacity)),
            PhysicalType::String => ProducerKind::String(VectorProducer::with_capacity(capacity)),
            PhysicalType::Bytes => ProducerKind::Bytes(VectorProducer::with_capacity(capacity)),
        };
        Self {
            logical_type,
            inner,
        }
    }

    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// Converts a domain value without appending it
    pub fn encode(&self, value: &Value) -> MillResult<Option<WireValue>> {
        to_wire(self.logical_type, value)
    }

    pub fn append_value(&mut self, value: &Value) -> MillResult<()> {
        let wire = self.encode(value)?;
        self.append_wire(wire)
    }

    /// Appends an already encoded slot; `None` appends a null
    pub fn append_wire(&mut self, wire: Option<WireValue>) -> MillResult<()> {
        let Some(wire) = wire else {
            each_producer!(&mut self.inner, p => p.append_null());
            return Ok(());
        };
        match (&mut self.inner, wire) {
            (ProducerKind::Bool(p), WireValue::Bool(v)) => p.append(v),
            (ProducerKind::I32(p), WireValue::I32(v)) => p.append(v),
            (ProducerKind::I64(p), WireValue::I64(v)) => p.append(v),
            (ProducerKind::Fp32(p), WireValue::Fp32(v)) => p.append(v),
            (ProducerKind::Fp64(p), WireValue::Fp64(v)) => p.append(v),
            (ProducerKind::String(p), WireValue::String(v)) => p.append(v),
            (ProducerKind::Bytes(p), WireValue::Bytes(v)) => p.append(v),
            (_, wire) => {
                return Err(MillError::type_mismatch(format!(
                    "cannot append {} value to {} column",
                    wire.physical(),
                    self.logical_type
                )))
            }
        }
        Ok(())
    }

    pub fn append_nulls(&mut self, count: usize) {
        each_producer!(&mut self.inner, p => p.append_nulls(count));
    }

    pub fn len(&self) -> usize {
        each_producer!(&self.inner, p => p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&mut self) {
        each_producer!(&mut self.inner, p => p.reset());
    }

    pub fn build(&self) -> Vector {
        each_producer!(&self.inner, p => p.build())
    }

    pub fn take(&mut self) -> Vector {
        each_producer!(&mut self.inner, p => p.take())
    }
}

/// Row-at-a-time producer for a whole block
#[derive(Debug, Clone)]
pub struct BlockProducer {
    schema: Schema,
    columns: Vec<ColumnProducer>,
    row_count: usize,
}

impl BlockProducer {
    pub fn new(schema: Schema, capacity: usize) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|f| ColumnProducer::new(f.logical_type, capacity))
            .collect();
        Self {
            schema,
            columns,
            row_count: 0,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Appends one row. Every value is converted before any column is
    /// touched, so a failing row leaves the producer unchanged.
    pub fn append_row(&mut self, values: &[Value]) -> MillResult<()> {
        if values.len() != self.columns.len() {
            return Err(MillError::type_mismatch(format!(
                "row has {} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let encoded = self
            .columns
            .iter()
            .zip(values)
            .map(|(column, value)| column.encode(value))
            .collect::<MillResult<Vec<_>>>()?;
        for (column, wire) in self.columns.iter_mut().zip(encoded) {
            column.append_wire(wire)?;
        }
        self.row_count += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        for column in &mut self.columns {
            column.reset();
        }
        self.row_count = 0;
    }

    /// Moves the accumulated rows into a block and resets the producer
    pub fn take_block(&mut self) -> VectorBlock {
        let vectors = self.columns.iter_mut().map(ColumnProducer::take).collect();
        let block = VectorBlock {
            schema: self.schema.clone(),
            row_count: self.row_count as u32,
            vectors,
        };
        self.row_count = 0;
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::VectorBlockReader;
    use chrono::NaiveDate;

    #[test]
    fn null_slots_hold_sentinels() {
        let mut p = VectorProducer::<String>::new();
        p.append("a".to_string());
        p.append_null();
        p.append_nulls(2);
        let v = p.build();
        assert_eq!(v.nulls, vec![false, true, true, true]);
        assert_eq!(
            v.values,
            VectorValues::String(vec!["a".into(), String::new(), String::new(), String::new()])
        );
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut p = VectorProducer::<i64>::with_capacity(16);
        p.append_all([1, 2, 3]);
        assert_eq!(p.len(), 3);
        p.reset();
        assert!(p.is_empty());
        assert!(p.take().values.is_empty());
        p.append(9);
        assert_eq!(p.build().values, VectorValues::I64(vec![9]));
    }

    #[test]
    fn failing_row_leaves_no_partial_values() {
        let schema = Schema::new([
            ("id", LogicalType::Int, false),
            ("small", LogicalType::TinyInt, true),
        ]);
        let mut producer = BlockProducer::new(schema, 4);
        producer
            .append_row(&[Value::Int(1), Value::Int(2)])
            .unwrap();
        let err = producer.append_row(&[Value::Int(2), Value::Int(1_000)]);
        assert!(matches!(err, Err(MillError::TypeConversion { .. })));
        let block = producer.take_block();
        assert_eq!(block.row_count(), 1);
        block.validate().unwrap();
    }

    #[test]
    fn column_producer_encodes_dates() {
        let mut column = ColumnProducer::new(LogicalType::Date, 2);
        column
            .append_value(&Value::Date(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()))
            .unwrap();
        column.append_value(&Value::Null).unwrap();
        assert_eq!(column.build().values, VectorValues::I64(vec![1, 0]));
        assert!(column.append_wire(Some(WireValue::Bool(true))).is_err());
    }

    #[test]
    fn take_block_round_trips_through_reader() {
        let schema = Schema::new([("flag", LogicalType::Bool, true)]);
        let mut producer = BlockProducer::new(schema, 2);
        producer.append_row(&[Value::Bool(true)]).unwrap();
        producer.append_row(&[Value::Null]).unwrap();
        let block = producer.take_block();
        assert_eq!(producer.row_count(), 0);
        let rows = VectorBlockReader::new(&block).rows().unwrap();
        assert_eq!(rows, vec![vec![Value::Bool(true)], vec![Value::Null]]);
    }
}
