// SPDX-License-Identifier: Apache-2.0

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::{MillError, MillResult};
use crate::types::{LogicalType, PhysicalType};

/// One column of a schema. `index` always equals its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub index: u32,
    pub name: CompactString,
    pub logical_type: LogicalType,
    pub nullable: bool,
}

impl Field {
    pub fn new(
        index: u32,
        name: impl Into<CompactString>,
        logical_type: LogicalType,
        nullable: bool,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            logical_type,
            nullable,
        }
    }

    pub fn physical_type(&self) -> PhysicalType {
        self.logical_type.physical()
    }
}

/// Ordered field list. Names may repeat; access is positional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    /// Builds a schema, assigning each field its positional index.
    pub fn new<I, N>(columns: I) -> Self
    where
        I: IntoIterator<Item = (N, LogicalType, bool)>,
        N: Into<CompactString>,
    {
        let fields = columns
            .into_iter()
            .enumerate()
            .map(|(i, (name, logical_type, nullable))| {
                Field::new(i as u32, name, logical_type, nullable)
            })
            .collect();
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// First field with the given name, compared case-insensitively
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Values of one vector. Null slots hold the physical type's sentinel:
/// `false`, `0`, `0.0`, empty string or empty bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorValues {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    Fp32(Vec<f32>),
    Fp64(Vec<f64>),
    String(Vec<String>),
    Bytes(Vec<Vec<u8>>),
}

impl VectorValues {
    pub fn physical_type(&self) -> PhysicalType {
        match self {
            Self::Bool(_) => PhysicalType::Bool,
            Self::I32(_) => PhysicalType::I32,
            Self::I64(_) => PhysicalType::I64,
            Self::Fp32(_) => PhysicalType::Fp32,
            Self::Fp64(_) => PhysicalType::Fp64,
            Self::String(_) => PhysicalType::String,
            Self::Bytes(_) => PhysicalType::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::Fp32(v) => v.len(),
            Self::Fp64(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn empty(physical: PhysicalType) -> Self {
        match physical {
            PhysicalType::Bool => Self::Bool(Vec::new()),
            PhysicalType::I32 => Self::I32(Vec::new()),
            PhysicalType::I64 => Self::I64(Vec::new()),
            PhysicalType::Fp32 => Self::Fp32(Vec::new()),
            PhysicalType::Fp64 => Self::Fp64(Vec::new()),
            PhysicalType::String => Self::String(Vec::new()),
            PhysicalType::Bytes => Self::Bytes(Vec::new()),
        }
    }

    /// Whether the slot at `row` holds the null sentinel
    pub fn is_sentinel(&self, row: usize) -> bool {
        match self {
            Self::Bool(v) => v.get(row).is_some_and(|x| !*x),
            Self::I32(v) => v.get(row).is_some_and(|x| *x == 0),
            Self::I64(v) => v.get(row).is_some_and(|x| *x == 0),
            Self::Fp32(v) => v.get(row).is_some_and(|x| x.to_bits() == 0),
            Self::Fp64(v) => v.get(row).is_some_and(|x| x.to_bits() == 0),
            Self::String(v) => v.get(row).is_some_and(String::is_empty),
            Self::Bytes(v) => v.get(row).is_some_and(Vec::is_empty),
        }
    }
}

/// A single column: null bitmap (`true` = null) plus values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub nulls: Vec<bool>,
    pub values: VectorValues,
}

impl Vector {
    pub fn len(&self) -> usize {
        self.nulls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nulls.is_empty()
    }
}

/// One columnar batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorBlock {
    pub schema: Schema,
    pub row_count: u32,
    pub vectors: Vec<Vector>,
}

impl VectorBlock {
    /// A zero-row block that still carries the full schema
    pub fn empty(schema: Schema) -> Self {
        let vectors = schema
            .fields
            .iter()
            .map(|f| Vector {
                nulls: Vec::new(),
                values: VectorValues::empty(f.physical_type()),
            })
            .collect();
        Self {
            schema,
            row_count: 0,
            vectors,
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count as usize
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Checks the structural invariants of a block: one vector per field,
    /// positional field indexes, equal vector lengths, matching physical
    /// types and sentinels in every null slot.
    pub fn validate(&self) -> MillResult<()> {
        if self.vectors.len() != self.schema.fields.len() {
            return Err(MillError::internal(format!(
                "block has {} vectors for {} fields",
                self.vectors.len(),
                self.schema.fields.len()
            )));
        }
        let rows = self.row_count();
        for (pos, (field, vector)) in self.schema.fields.iter().zip(&self.vectors).enumerate() {
            if field.index as usize != pos {
                return Err(MillError::internal(format!(
                    "field '{}' has index {} at position {pos}",
                    field.name, field.index
                )));
            }
            if vector.nulls.len() != rows || vector.values.len() != rows {
                return Err(MillError::internal(format!(
                    "vector {pos} length does not match row count {rows}"
                )));
            }
            if vector.values.physical_type() != field.physical_type() {
                return Err(MillError::type_mismatch(format!(
                    "vector {pos} holds {} values for a {} field",
                    vector.values.physical_type(),
                    field.logical_type
                )));
            }
            for (row, is_null) in vector.nulls.iter().enumerate() {
                if *is_null && !vector.values.is_sentinel(row) {
                    return Err(MillError::internal(format!(
                        "null slot {row} of vector {pos} holds data"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Encodes the block as MessagePack
    pub fn to_wire_bytes(&self) -> MillResult<Vec<u8>> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| MillError::internal(format!("failed to encode block: {e}")))
    }

    /// Decodes and validates a MessagePack block
    pub fn from_wire_bytes(bytes: &[u8]) -> MillResult<Self> {
        let block: VectorBlock = rmp_serde::from_slice(bytes)
            .map_err(|e| MillError::invalid_argument(format!("malformed block: {e}")))?;
        block.validate()?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_column_schema() -> Schema {
        Schema::new([
            ("id", LogicalType::BigInt, false),
            ("name", LogicalType::String, true),
        ])
    }

    #[test]
    fn empty_block_keeps_schema() {
        let block = VectorBlock::empty(two_column_schema());
        assert_eq!(block.row_count(), 0);
        assert_eq!(block.vectors.len(), 2);
        assert_eq!(block.schema.fields[1].index, 1);
        block.validate().unwrap();
    }

    #[test]
    fn validate_rejects_data_in_null_slot() {
        let block = VectorBlock {
            schema: two_column_schema(),
            row_count: 1,
            vectors: vec![
                Vector {
                    nulls: vec![false],
                    values: VectorValues::I64(vec![7]),
                },
                Vector {
                    nulls: vec![true],
                    values: VectorValues::String(vec!["leak".into()]),
                },
            ],
        };
        assert!(block.validate().is_err());
    }

    #[test]
    fn validate_rejects_wrong_physical_type() {
        let block = VectorBlock {
            schema: two_column_schema(),
            row_count: 0,
            vectors: vec![
                Vector {
                    nulls: vec![],
                    values: VectorValues::I32(vec![]),
                },
                Vector {
                    nulls: vec![],
                    values: VectorValues::String(vec![]),
                },
            ],
        };
        assert!(matches!(
            block.validate(),
            Err(MillError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn wire_bytes_decode_validates() {
        let block = VectorBlock::empty(two_column_schema());
        let bytes = block.to_wire_bytes().unwrap();
        assert_eq!(VectorBlock::from_wire_bytes(&bytes).unwrap(), block);
        assert!(VectorBlock::from_wire_bytes(&[0xc1]).is_err());
    }

    #[test]
    fn index_of_ignores_case() {
        assert_eq!(two_column_schema().index_of("NAME"), Some(1));
        assert_eq!(two_column_schema().index_of("missing"), None);
    }
}
