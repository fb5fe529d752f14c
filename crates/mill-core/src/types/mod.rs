// SPDX-License-Identifier: Apache-2.0

//! Type System
//!
//! Logical domain types, their physical wire encodings, and the converters
//! between domain values and wire values.

mod backend;
mod convert;
mod logical;

pub use convert::{
    from_wire, to_wire, EpochDayConverter, EpochMillisConverter, EpochMillisTzConverter,
    IntervalDayConverter, NanoOfDayConverter, SmallIntConverter, TinyIntConverter,
    UuidBytesConverter, ValueConverter, WireValue, MAX_DAYS, MIN_DAYS,
};
pub use logical::{LogicalType, PhysicalType};
