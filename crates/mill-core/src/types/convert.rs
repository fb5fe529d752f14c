// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LogicalType, PhysicalType};
use crate::error::{MillError, MillResult};
use crate::value::Value;

/// 0001-01-01 as days since the Unix epoch
pub const MIN_DAYS: i64 = -719_162;
/// 9999-12-31 as days since the Unix epoch
pub const MAX_DAYS: i64 = 2_932_896;

const CE_EPOCH_OFFSET: i64 = 719_163;
const MILLIS_PER_DAY: i64 = 86_400_000;
const NANOS_PER_DAY: i64 = 86_400_000_000_000;
const MIN_MILLIS: i64 = MIN_DAYS * MILLIS_PER_DAY;
const MAX_MILLIS: i64 = (MAX_DAYS + 1) * MILLIS_PER_DAY - 1;

/// One physical slot of a vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    Fp32(f32),
    Fp64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl WireValue {
    pub fn physical(&self) -> PhysicalType {
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
}

/// Bidirectional conversion between a domain value and its wire form.
///
/// Implementations are inverses on every representable input; anything
/// outside the representable range fails with `TypeConversion`.
pub trait ValueConverter {
    type Domain;
    type Wire;

    fn to_wire(&self, value: &Self::Domain) -> MillResult<Self::Wire>;
    fn from_wire(&self, wire: &Self::Wire) -> MillResult<Self::Domain>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TinyIntConverter;

impl ValueConverter for TinyIntConverter {
    type Domain = i8;
    type Wire = i32;

    fn to_wire(&self, value: &i8) -> MillResult<i32> {
        Ok(i32::from(*value))
    }

    fn from_wire(&self, wire: &i32) -> MillResult<i8> {
        i8::try_from(*wire)
            .map_err(|_| MillError::type_conversion(format!("{wire} is out of TINYINT range")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SmallIntConverter;

impl ValueConverter for SmallIntConverter {
    type Domain = i16;
    type Wire = i32;

    fn to_wire(&self, value: &i16) -> MillResult<i32> {
        Ok(i32::from(*value))
    }

    fn from_wire(&self, wire: &i32) -> MillResult<i16> {
        i16::try_from(*wire)
            .map_err(|_| MillError::type_conversion(format!("{wire} is out of SMALLINT range")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EpochDayConverter;

impl ValueConverter for EpochDayConverter {
    type Domain = NaiveDate;
    type Wire = i64;

    fn to_wire(&self, value: &NaiveDate) -> MillResult<i64> {
        let days = i64::from(value.num_days_from_ce()) - CE_EPOCH_OFFSET;
        check_days(days)?;
        Ok(days)
    }

    fn from_wire(&self, wire: &i64) -> MillResult<NaiveDate> {
        check_days(*wire)?;
        i32::try_from(*wire + CE_EPOCH_OFFSET)
            .ok()
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .ok_or_else(|| MillError::type_conversion(format!("invalid epoch day {wire}")))
    }
}

fn check_days(days: i64) -> MillResult<()> {
    if (MIN_DAYS..=MAX_DAYS).contains(&days) {
        Ok(())
    } else {
        Err(MillError::type_conversion(format!(
            "epoch day {days} outside [{MIN_DAYS}, {MAX_DAYS}]"
        )))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NanoOfDayConverter;

impl ValueConverter for NanoOfDayConverter {
    type Domain = NaiveTime;
    type Wire = i64;

    fn to_wire(&self, value: &NaiveTime) -> MillResult<i64> {
        // chrono encodes leap seconds as nanosecond >= 1e9
        if value.nanosecond() >= 1_000_000_000 {
            return Err(MillError::type_conversion("leap second is not representable"));
        }
        Ok(i64::from(value.num_seconds_from_midnight()) * 1_000_000_000
            + i64::from(value.nanosecond()))
    }

    fn from_wire(&self, wire: &i64) -> MillResult<NaiveTime> {
        if !(0..NANOS_PER_DAY).contains(wire) {
            return Err(MillError::type_conversion(format!(
                "nano of day {wire} outside [0, {NANOS_PER_DAY})"
            )));
        }
        let secs = (wire / 1_000_000_000) as u32;
        let nanos = (wire % 1_000_000_000) as u32;
        NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
            .ok_or_else(|| MillError::type_conversion(format!("invalid nano of day {wire}")))
    }
}

/// Naive timestamps as epoch milliseconds. Sub-millisecond precision is
/// floored.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpochMillisConverter;

impl ValueConverter for EpochMillisConverter {
    type Domain = NaiveDateTime;
    type Wire = i64;

    fn to_wire(&self, value: &NaiveDateTime) -> MillResult<i64> {
        let millis = value.and_utc().timestamp_millis();
        check_millis(millis)?;
        Ok(millis)
    }

    fn from_wire(&self, wire: &i64) -> MillResult<NaiveDateTime> {
        EpochMillisTzConverter
            .from_wire(wire)
            .map(|dt| dt.naive_utc())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EpochMillisTzConverter;

impl ValueConverter for EpochMillisTzConverter {
    type Domain = DateTime<Utc>;
    type Wire = i64;

    fn to_wire(&self, value: &DateTime<Utc>) -> MillResult<i64> {
        let millis = value.timestamp_millis();
        check_millis(millis)?;
        Ok(millis)
    }

    fn from_wire(&self, wire: &i64) -> MillResult<DateTime<Utc>> {
        check_millis(*wire)?;
        DateTime::from_timestamp_millis(*wire)
            .ok_or_else(|| MillError::type_conversion(format!("invalid epoch millis {wire}")))
    }
}

fn check_millis(millis: i64) -> MillResult<()> {
    if (MIN_MILLIS..=MAX_MILLIS).contains(&millis) {
        Ok(())
    } else {
        Err(MillError::type_conversion(format!(
            "epoch millis {millis} outside supported timestamp range"
        )))
    }
}

/// Day intervals as a whole number of days
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalDayConverter;

impl ValueConverter for IntervalDayConverter {
    type Domain = TimeDelta;
    type Wire = i32;

    fn to_wire(&self, value: &TimeDelta) -> MillResult<i32> {
        if value.num_seconds() % 86_400 != 0 || value.subsec_nanos() != 0 {
            return Err(MillError::type_conversion(
                "day interval must be a whole number of days",
            ));
        }
        i32::try_from(value.num_days())
            .map_err(|_| MillError::type_conversion("day interval out of range"))
    }

    fn from_wire(&self, wire: &i32) -> MillResult<TimeDelta> {
        Ok(TimeDelta::days(i64::from(*wire)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidBytesConverter;

impl ValueConverter for UuidBytesConverter {
    type Domain = Uuid;
    type Wire = Vec<u8>;

    fn to_wire(&self, value: &Uuid) -> MillResult<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn from_wire(&self, wire: &Vec<u8>) -> MillResult<Uuid> {
        Uuid::from_slice(wire).map_err(|_| {
            MillError::type_conversion(format!("UUID needs 16 bytes, got {}", wire.len()))
        })
    }
}

fn mismatch(logical: LogicalType, value: &Value) -> MillError {
    MillError::type_mismatch(format!(
        "cannot store {} value in {} column",
        value.kind(),
        logical
    ))
}

fn int_in<T: TryFrom<i64>>(logical: LogicalType, v: i64) -> MillResult<T> {
    T::try_from(v)
        .map_err(|_| MillError::type_conversion(format!("{v} is out of {logical} range")))
}

/// Encodes a domain value for a column of the given logical type.
/// Returns `None` for `Value::Null`.
pub fn to_wire(logical: LogicalType, value: &Value) -> MillResult<Option<WireValue>> {
    if value.is_null() {
        return Ok(None);
    }
    let wire = match (logical, value) {
        (LogicalType::Bool, Value::Bool(b)) => WireValue::Bool(*b),
        (LogicalType::TinyInt, Value::Int(v)) => {
            WireValue::I32(TinyIntConverter.to_wire(&int_in::<i8>(logical, *v)?)?)
        }
        (LogicalType::SmallInt, Value::Int(v)) => {
            WireValue::I32(SmallIntConverter.to_wire(&int_in::<i16>(logical, *v)?)?)
        }
        (LogicalType::Int, Value::Int(v)) => WireValue::I32(int_in(logical, *v)?),
        (LogicalType::BigInt, Value::Int(v)) => WireValue::I64(*v),
        (LogicalType::Float, Value::Float(v)) => WireValue::Fp32(narrow_f32(*v)?),
        (LogicalType::Float, Value::Int(v)) => WireValue::Fp32(*v as f32),
        (LogicalType::Double, Value::Float(v)) => WireValue::Fp64(*v),
        (LogicalType::Double, Value::Int(v)) => WireValue::Fp64(*v as f64),
        (LogicalType::String, Value::Text(s)) => WireValue::String(s.clone()),
        (LogicalType::Binary, Value::Bytes(b)) => WireValue::Bytes(b.clone()),
        (LogicalType::Date, Value::Date(d)) => WireValue::I64(EpochDayConverter.to_wire(d)?),
        (LogicalType::Time, Value::Time(t)) => WireValue::I64(NanoOfDayConverter.to_wire(t)?),
        (LogicalType::Timestamp, Value::Timestamp(ts)) => {
            WireValue::I64(EpochMillisConverter.to_wire(ts)?)
        }
        (LogicalType::TimestampTz, Value::TimestampTz(ts)) => {
            WireValue::I64(EpochMillisTzConverter.to_wire(ts)?)
        }
        (LogicalType::TimestampTz, Value::Timestamp(ts)) => {
            WireValue::I64(EpochMillisTzConverter.to_wire(&ts.and_utc())?)
        }
        (LogicalType::IntervalDay, Value::IntervalDay(d)) => WireValue::I32(*d),
        (LogicalType::IntervalYear, Value::IntervalYear(m)) => WireValue::I32(*m),
        (LogicalType::Uuid, Value::Uuid(u)) => WireValue::Bytes(UuidBytesConverter.to_wire(u)?),
        (LogicalType::Uuid, Value::Bytes(b)) => {
            WireValue::Bytes(UuidBytesConverter.from_wire(b)?.as_bytes().to_vec())
        }
        _ => return Err(mismatch(logical, value)),
    };
    Ok(Some(wire))
}

fn narrow_f32(v: f64) -> MillResult<f32> {
    let narrowed = v as f32;
    if v.is_finite() && narrowed.is_infinite() {
        return Err(MillError::type_conversion(format!("{v} is out of REAL range")));
    }
    Ok(narrowed)
}

/// Decodes a wire value of a column with the given logical type back into
/// its domain value.
pub fn from_wire(logical: LogicalType, wire: &WireValue) -> MillResult<Value> {
    let value = match (logical, wire) {
        (LogicalType::Bool, WireValue::Bool(b)) => Value::Bool(*b),
        (LogicalType::TinyInt, WireValue::I32(v)) => {
            Value::Int(i64::from(TinyIntConverter.from_wire(v)?))
        }
        (LogicalType::SmallInt, WireValue::I32(v)) => {
            Value::Int(i64::from(SmallIntConverter.from_wire(v)?))
        }
        (LogicalType::Int, WireValue::I32(v)) => Value::Int(i64::from(*v)),
        (LogicalType::BigInt, WireValue::I64(v)) => Value::Int(*v),
        (LogicalType::Float, WireValue::Fp32(v)) => Value::Float(f64::from(*v)),
        (LogicalType::Double, WireValue::Fp64(v)) => Value::Float(*v),
        (LogicalType::String, WireValue::String(s)) => Value::Text(s.clone()),
        (LogicalType::Binary, WireValue::Bytes(b)) => Value::Bytes(b.clone()),
        (LogicalType::Date, WireValue::I64(v)) => Value::Date(EpochDayConverter.from_wire(v)?),
        (LogicalType::Time, WireValue::I64(v)) => Value::Time(NanoOfDayConverter.from_wire(v)?),
        (LogicalType::Timestamp, WireValue::I64(v)) => {
            Value::Timestamp(EpochMillisConverter.from_wire(v)?)
        }
        (LogicalType::TimestampTz, WireValue::I64(v)) => {
            Value::TimestampTz(EpochMillisTzConverter.from_wire(v)?)
        }
        (LogicalType::IntervalDay, WireValue::I32(v)) => Value::IntervalDay(*v),
        (LogicalType::IntervalYear, WireValue::I32(v)) => Value::IntervalYear(*v),
        (LogicalType::Uuid, WireValue::Bytes(b)) => Value::Uuid(UuidBytesConverter.from_wire(b)?),
        _ => {
            return Err(MillError::type_mismatch(format!(
                "{} wire value cannot decode as {}",
                wire.physical(),
                logical
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn epoch_day_bounds() {
        let min = NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
        let max = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        assert_eq!(EpochDayConverter.to_wire(&min).unwrap(), MIN_DAYS);
        assert_eq!(EpochDayConverter.to_wire(&max).unwrap(), MAX_DAYS);
        assert_eq!(
            EpochDayConverter
                .to_wire(&NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
                .unwrap(),
            0
        );
        assert!(matches!(
            EpochDayConverter.from_wire(&(MAX_DAYS + 1)),
            Err(MillError::TypeConversion { .. })
        ));
        let too_early = NaiveDate::from_ymd_opt(0, 12, 31).unwrap();
        assert!(EpochDayConverter.to_wire(&too_early).is_err());
    }

    #[test]
    fn small_integers_reject_overflow() {
        assert!(to_wire(LogicalType::TinyInt, &Value::Int(128)).is_err());
        assert!(to_wire(LogicalType::SmallInt, &Value::Int(-32_769)).is_err());
        assert!(to_wire(LogicalType::Int, &Value::Int(i64::from(i32::MAX) + 1)).is_err());
        assert_eq!(
            to_wire(LogicalType::TinyInt, &Value::Int(-128)).unwrap(),
            Some(WireValue::I32(-128))
        );
        assert!(matches!(
            from_wire(LogicalType::TinyInt, &WireValue::I32(300)),
            Err(MillError::TypeConversion { .. })
        ));
    }

    #[test]
    fn timestamp_floors_sub_millisecond() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_nano_opt(12, 0, 0, 1_999_999)
            .unwrap();
        let millis = EpochMillisConverter.to_wire(&ts).unwrap();
        let back = EpochMillisConverter.from_wire(&millis).unwrap();
        assert_eq!(back.and_utc().timestamp_subsec_millis(), 1);
        assert_eq!(
            back,
            ts.with_nanosecond(1_000_000).unwrap()
        );
    }

    #[test]
    fn pre_epoch_timestamp_floors_toward_negative() {
        let ts = DateTime::from_timestamp(-1, 500_000).unwrap();
        assert_eq!(EpochMillisTzConverter.to_wire(&ts).unwrap(), -1000);
    }

    #[test]
    fn interval_day_requires_whole_days() {
        assert_eq!(IntervalDayConverter.to_wire(&TimeDelta::days(3)).unwrap(), 3);
        assert!(IntervalDayConverter.to_wire(&TimeDelta::hours(30)).is_err());
    }

    #[test]
    fn uuid_is_big_endian_bytes() {
        let id = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let bytes = UuidBytesConverter.to_wire(&id).unwrap();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[15], 0xff);
        assert!(UuidBytesConverter.from_wire(&vec![1, 2, 3]).is_err());
    }

    #[test]
    fn incompatible_kind_is_mismatch() {
        assert!(matches!(
            to_wire(LogicalType::Date, &Value::Text("2024-01-01".into())),
            Err(MillError::TypeMismatch { .. })
        ));
        assert!(matches!(
            from_wire(LogicalType::Bool, &WireValue::I32(1)),
            Err(MillError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn null_has_no_wire_value() {
        for t in LogicalType::ALL {
            assert_eq!(to_wire(t, &Value::Null).unwrap(), None);
        }
    }

    proptest! {
        #[test]
        fn epoch_day_round_trips(days in MIN_DAYS..=MAX_DAYS) {
            let date = EpochDayConverter.from_wire(&days).unwrap();
            prop_assert_eq!(EpochDayConverter.to_wire(&date).unwrap(), days);
        }

        #[test]
        fn nano_of_day_round_trips(nanos in 0..NANOS_PER_DAY) {
            let time = NanoOfDayConverter.from_wire(&nanos).unwrap();
            prop_assert_eq!(NanoOfDayConverter.to_wire(&time).unwrap(), nanos);
        }

        #[test]
        fn epoch_millis_round_trips(millis in MIN_MILLIS..=MAX_MILLIS) {
            let ts = EpochMillisConverter.from_wire(&millis).unwrap();
            prop_assert_eq!(EpochMillisConverter.to_wire(&ts).unwrap(), millis);
            let tz = EpochMillisTzConverter.from_wire(&millis).unwrap();
            prop_assert_eq!(EpochMillisTzConverter.to_wire(&tz).unwrap(), millis);
        }

        #[test]
        fn out_of_range_millis_fail(millis in prop_oneof![i64::MIN..MIN_MILLIS, (MAX_MILLIS + 1)..i64::MAX]) {
            let failed = matches!(
                EpochMillisConverter.from_wire(&millis),
                Err(MillError::TypeConversion { .. })
            );
            prop_assert!(failed);
        }

        #[test]
        fn uuid_round_trips(raw in any::<u128>()) {
            let id = Uuid::from_u128(raw);
            let bytes = UuidBytesConverter.to_wire(&id).unwrap();
            prop_assert_eq!(UuidBytesConverter.from_wire(&bytes).unwrap(), id);
        }

        #[test]
        fn value_round_trips_through_wire(v in any::<i16>()) {
            let wire = to_wire(LogicalType::SmallInt, &Value::Int(i64::from(v))).unwrap().unwrap();
            prop_assert_eq!(from_wire(LogicalType::SmallInt, &wire).unwrap(), Value::Int(i64::from(v)));
        }

        #[test]
        fn bool_round_trips(v in any::<bool>()) {
            prop_assert_eq!(wire_round_trip(LogicalType::Bool, Value::Bool(v)), Value::Bool(v));
        }

        #[test]
        fn integers_round_trip(tiny in any::<i8>(), int in any::<i32>(), big in any::<i64>()) {
            let tiny = Value::Int(i64::from(tiny));
            prop_assert_eq!(wire_round_trip(LogicalType::TinyInt, tiny.clone()), tiny);
            let int = Value::Int(i64::from(int));
            prop_assert_eq!(wire_round_trip(LogicalType::Int, int.clone()), int);
            prop_assert_eq!(wire_round_trip(LogicalType::BigInt, Value::Int(big)), Value::Int(big));
        }

        #[test]
        fn float_round_trips(v in -3.0e38f32..3.0e38f32) {
            let value = Value::Float(f64::from(v));
            prop_assert_eq!(wire_round_trip(LogicalType::Float, value.clone()), value);
        }

        #[test]
        fn double_round_trips(v in -1.0e300f64..1.0e300f64) {
            prop_assert_eq!(wire_round_trip(LogicalType::Double, Value::Float(v)), Value::Float(v));
        }

        #[test]
        fn string_round_trips(s in ".{0,32}") {
            let value = Value::Text(s);
            prop_assert_eq!(wire_round_trip(LogicalType::String, value.clone()), value);
        }

        #[test]
        fn binary_round_trips(b in proptest::collection::vec(any::<u8>(), 0..64)) {
            let value = Value::Bytes(b);
            prop_assert_eq!(wire_round_trip(LogicalType::Binary, value.clone()), value);
        }

        #[test]
        fn intervals_round_trip(days in any::<i32>(), months in any::<i32>()) {
            prop_assert_eq!(
                wire_round_trip(LogicalType::IntervalDay, Value::IntervalDay(days)),
                Value::IntervalDay(days)
            );
            prop_assert_eq!(
                wire_round_trip(LogicalType::IntervalYear, Value::IntervalYear(months)),
                Value::IntervalYear(months)
            );
        }
    }

    fn wire_round_trip(logical: LogicalType, value: Value) -> Value {
        let wire = to_wire(logical, &value).unwrap().unwrap();
        assert_eq!(wire.physical(), logical.physical());
        from_wire(logical, &wire).unwrap()
    }
}
