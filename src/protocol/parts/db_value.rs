use crate::{
    protocol::{
        parts::row_descriptor::{
            FieldDescriptor, SQL_ARRAY, SQL_BLOB, SQL_BOOLEAN, SQL_DOUBLE, SQL_FLOAT, SQL_INT128,
            SQL_INT64, SQL_LONG, SQL_QUAD, SQL_SHORT, SQL_TEXT, SQL_TIMESTAMP, SQL_TYPE_DATE,
            SQL_TYPE_TIME, SQL_VARYING,
        },
        util_sync,
    },
    FbError, FbResult,
};
use bigdecimal::BigDecimal;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::io::Read;

// Day number of 1858-11-17, the epoch of the wire date encoding.
const DATE_EPOCH_JULIAN_DAY: i32 = 2_400_001;
// Time-of-day is transported in units of 100 microseconds.
const TIME_UNITS_PER_SECOND: u32 = 10_000;

/// Server-side identifier of a blob or array, a pair of 4-byte words.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BlobId(pub u64);

/// Enum for all supported database value types.
#[allow(non_camel_case_types)]
#[derive(Clone, Debug, PartialEq)]
pub enum DbValue {
    /// Representation of a database NULL value.
    NULL,
    /// Stores a 16-bit signed integer.
    SMALLINT(i16),
    /// Stores a 32-bit signed integer.
    INT(i32),
    /// Stores a 64-bit signed integer.
    BIGINT(i64),
    /// Stores a 128-bit signed integer, transported as a fixed 16-byte
    /// two's-complement little-endian buffer.
    INT128(i128),
    /// Representation for fixed-point NUMERIC/DECIMAL values.
    DECIMAL(BigDecimal),
    /// Stores a single-precision 32-bit floating-point number.
    FLOAT(f32),
    /// Stores a double-precision 64-bit floating-point number.
    DOUBLE(f64),
    /// Stores TRUE or FALSE.
    BOOLEAN(bool),
    /// Character data, fixed or varying per the describing field.
    STRING(String),
    /// Raw bytes of a field with character set OCTETS.
    BINARY(Vec<u8>),
    /// A 16-byte GUID; shares the wire layout of fixed 16-byte OCTETS data.
    GUID([u8; 16]),
    /// DATE with day precision.
    DATE(time::Date),
    /// TIME with 100-microsecond precision.
    TIME(time::Time),
    /// TIMESTAMP with 100-microsecond precision.
    TIMESTAMP(time::PrimitiveDateTime),
    /// Reference to a server-side large object.
    BLOB(BlobId),
    /// Reference to a server-side array.
    ARRAY(BlobId),
}

impl DbValue {
    /// Returns true if the value is a NULL value.
    pub fn is_null(&self) -> bool {
        matches!(*self, DbValue::NULL)
    }

    // The value as a scaled integer for the numeric carrier types.
    // Binding an unscaled integer into a scaled field multiplies it out;
    // a DECIMAL is rescaled to the field's scale.
    pub(crate) fn as_scaled_i128(&self, numeric_scale: i16) -> FbResult<i128> {
        let rescale = |raw: i128| -> FbResult<i128> {
            if numeric_scale == 0 {
                Ok(raw)
            } else {
                let factor = 10_i128
                    .checked_pow(u32::from(numeric_scale.unsigned_abs()))
                    .ok_or_else(|| {
                        FbError::Marshaling(format!("scale {numeric_scale} out of range"))
                    })?;
                let scaled = if numeric_scale < 0 {
                    raw.checked_mul(factor)
                } else {
                    raw.checked_div(factor)
                };
                scaled.ok_or_else(|| {
                    FbError::Marshaling(format!("{raw} does not fit the field's scale"))
                })
            }
        };
        match *self {
            DbValue::SMALLINT(i) => rescale(i128::from(i)),
            DbValue::INT(i) => rescale(i128::from(i)),
            DbValue::BIGINT(i) => rescale(i128::from(i)),
            DbValue::INT128(i) => rescale(i),
            DbValue::DECIMAL(ref bigdec) => {
                let (bigint, _exponent) =
                    bigdec.with_scale(i64::from(-numeric_scale)).into_bigint_and_exponent();
                bigint.to_i128().ok_or_else(|| {
                    FbError::Marshaling(format!("{bigdec} exceeds the numeric carrier"))
                })
            }
            ref other => Err(FbError::Marshaling(format!(
                "DbValue::{other:?} is not a numeric value"
            ))),
        }
    }

    pub(crate) fn as_bytes(&self) -> FbResult<std::borrow::Cow<'_, [u8]>> {
        use std::borrow::Cow;
        match *self {
            DbValue::STRING(ref s) => Ok(Cow::Borrowed(s.as_bytes())),
            DbValue::BINARY(ref v) => Ok(Cow::Borrowed(v)),
            DbValue::GUID(ref b) => Ok(Cow::Borrowed(&b[..])),
            ref other => Err(FbError::Marshaling(format!(
                "DbValue::{other:?} is not a text or binary value"
            ))),
        }
    }

    /// Writes the raw wire encoding of a non-null value, as dictated by the
    /// describing field. Null values have no wire payload; the caller marks
    /// them in the null bitmap instead.
    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn emit(
        &self,
        field: &FieldDescriptor,
        w: &mut dyn std::io::Write,
    ) -> FbResult<()> {
        match field.base_type() {
            SQL_TEXT => {
                let bytes = self.as_bytes()?;
                let capacity = usize::from(field.length());
                if bytes.len() > capacity {
                    return Err(FbError::Marshaling(format!(
                        "{} bytes exceed the field length {capacity}",
                        bytes.len()
                    )));
                }
                w.write_all(&bytes)?;
                let fill = if field.is_octets() { 0_u8 } else { b' ' };
                for _ in bytes.len()..capacity {
                    w.write_u8(fill)?;
                }
                for _ in 0..util_sync::padding_of(capacity) {
                    w.write_u8(0)?;
                }
            }
            SQL_VARYING => {
                let bytes = self.as_bytes()?;
                if bytes.len() > usize::from(field.length()) {
                    return Err(FbError::Marshaling(format!(
                        "{} bytes exceed the field length {}",
                        bytes.len(),
                        field.length()
                    )));
                }
                util_sync::emit_block(&bytes, w)?;
            }
            SQL_SHORT => {
                let raw = self.as_scaled_i128(field.numeric_scale())?;
                w.write_i32::<BigEndian>(i32::try_from(raw).map_err(|_| carrier_overflow(raw))?)?;
            }
            SQL_LONG => {
                let raw = self.as_scaled_i128(field.numeric_scale())?;
                w.write_i32::<BigEndian>(i32::try_from(raw).map_err(|_| carrier_overflow(raw))?)?;
            }
            SQL_INT64 => {
                let raw = self.as_scaled_i128(field.numeric_scale())?;
                w.write_i64::<BigEndian>(i64::try_from(raw).map_err(|_| carrier_overflow(raw))?)?;
            }
            SQL_INT128 => {
                let raw = self.as_scaled_i128(field.numeric_scale())?;
                w.write_all(&raw.to_le_bytes())?;
            }
            SQL_FLOAT => match *self {
                DbValue::FLOAT(f) => w.write_f32::<BigEndian>(f)?,
                ref other => return Err(type_mismatch(other, "FLOAT")),
            },
            SQL_DOUBLE => match *self {
                DbValue::DOUBLE(f) => w.write_f64::<BigEndian>(f)?,
                ref other => return Err(type_mismatch(other, "DOUBLE")),
            },
            SQL_BOOLEAN => match *self {
                DbValue::BOOLEAN(b) => w.write_u32::<BigEndian>(u32::from(b))?,
                ref other => return Err(type_mismatch(other, "BOOLEAN")),
            },
            SQL_TYPE_DATE => match *self {
                DbValue::DATE(date) => w.write_i32::<BigEndian>(wire_date(date))?,
                ref other => return Err(type_mismatch(other, "DATE")),
            },
            SQL_TYPE_TIME => match *self {
                DbValue::TIME(t) => w.write_u32::<BigEndian>(wire_time(t))?,
                ref other => return Err(type_mismatch(other, "TIME")),
            },
            SQL_TIMESTAMP => match *self {
                DbValue::TIMESTAMP(ts) => {
                    w.write_i32::<BigEndian>(wire_date(ts.date()))?;
                    w.write_u32::<BigEndian>(wire_time(ts.time()))?;
                }
                ref other => return Err(type_mismatch(other, "TIMESTAMP")),
            },
            SQL_BLOB | SQL_ARRAY | SQL_QUAD => match *self {
                DbValue::BLOB(id) | DbValue::ARRAY(id) => w.write_u64::<BigEndian>(id.0)?,
                ref other => return Err(type_mismatch(other, "BLOB")),
            },
            other => {
                return Err(FbError::Marshaling(format!(
                    "type code {other} cannot be sent to the database"
                )));
            }
        }
        Ok(())
    }

    /// Reads the raw wire encoding of a non-null value.
    pub(crate) fn parse(
        field: &FieldDescriptor,
        rdr: &mut dyn std::io::Read,
    ) -> FbResult<DbValue> {
        if field.base_type() == SQL_VARYING {
            let bytes = util_sync::parse_block(rdr)?;
            return varying_value(field, bytes);
        }
        let size = fixed_wire_size(field)?;
        let bytes = util_sync::parse_bytes(size, rdr)?;
        decode_fixed(field, &bytes)
    }

    /// Suspendable form of [`DbValue::parse`] with identical byte semantics.
    #[cfg(feature = "async")]
    pub(crate) async fn parse_async<R: tokio::io::AsyncReadExt + std::marker::Unpin>(
        field: &FieldDescriptor,
        rdr: &mut R,
    ) -> FbResult<DbValue> {
        use crate::protocol::util_async;
        if field.base_type() == SQL_VARYING {
            let bytes = util_async::parse_block(rdr).await?;
            return varying_value(field, bytes);
        }
        let size = fixed_wire_size(field)?;
        let bytes = util_async::parse_bytes(size, rdr).await?;
        decode_fixed(field, &bytes)
    }
}

fn carrier_overflow(raw: i128) -> FbError {
    FbError::Marshaling(format!("{raw} exceeds the numeric carrier"))
}

fn type_mismatch(value: &DbValue, expected: &str) -> FbError {
    FbError::Marshaling(format!("DbValue::{value:?} cannot be sent as {expected}"))
}

// Number of payload bytes of every type except SQL_VARYING.
pub(crate) fn fixed_wire_size(field: &FieldDescriptor) -> FbResult<usize> {
    Ok(match field.base_type() {
        SQL_TEXT => {
            let len = usize::from(field.length());
            len + util_sync::padding_of(len)
        }
        SQL_SHORT | SQL_LONG | SQL_FLOAT | SQL_BOOLEAN | SQL_TYPE_DATE | SQL_TYPE_TIME => 4,
        SQL_INT64 | SQL_DOUBLE | SQL_TIMESTAMP | SQL_BLOB | SQL_ARRAY | SQL_QUAD => 8,
        SQL_INT128 => 16,
        other => {
            return Err(FbError::Marshaling(format!(
                "type code {other} cannot be read from the wire"
            )));
        }
    })
}

fn varying_value(field: &FieldDescriptor, bytes: Vec<u8>) -> FbResult<DbValue> {
    Ok(if field.is_octets() {
        DbValue::BINARY(bytes)
    } else {
        DbValue::STRING(String::from_utf8_lossy(&bytes).to_string())
    })
}

#[allow(clippy::cast_possible_truncation)]
fn decode_fixed(field: &FieldDescriptor, bytes: &[u8]) -> FbResult<DbValue> {
    let mut rdr = std::io::Cursor::new(bytes);
    Ok(match field.base_type() {
        SQL_TEXT => {
            let payload = &bytes[..usize::from(field.length())];
            if field.is_octets() {
                if payload.len() == 16 {
                    let mut guid = [0_u8; 16];
                    guid.copy_from_slice(payload);
                    DbValue::GUID(guid)
                } else {
                    DbValue::BINARY(payload.to_vec())
                }
            } else {
                let s = String::from_utf8_lossy(payload);
                DbValue::STRING(s.trim_end_matches(' ').to_string())
            }
        }
        SQL_SHORT => scaled_value(i128::from(rdr.read_i32::<BigEndian>()?), field, |raw| {
            DbValue::SMALLINT(raw as i16)
        }),
        SQL_LONG => scaled_value(i128::from(rdr.read_i32::<BigEndian>()?), field, |raw| {
            DbValue::INT(raw as i32)
        }),
        SQL_INT64 => scaled_value(i128::from(rdr.read_i64::<BigEndian>()?), field, |raw| {
            DbValue::BIGINT(raw as i64)
        }),
        SQL_INT128 => {
            let mut raw = [0_u8; 16];
            rdr.read_exact(&mut raw)?;
            scaled_value(i128::from_le_bytes(raw), field, DbValue::INT128)
        }
        SQL_FLOAT => DbValue::FLOAT(rdr.read_f32::<BigEndian>()?),
        SQL_DOUBLE => DbValue::DOUBLE(rdr.read_f64::<BigEndian>()?),
        SQL_BOOLEAN => DbValue::BOOLEAN(rdr.read_u32::<BigEndian>()? != 0),
        SQL_TYPE_DATE => DbValue::DATE(date_from_wire(rdr.read_i32::<BigEndian>()?)?),
        SQL_TYPE_TIME => DbValue::TIME(time_from_wire(rdr.read_u32::<BigEndian>()?)?),
        SQL_TIMESTAMP => {
            let date = date_from_wire(rdr.read_i32::<BigEndian>()?)?;
            let time = time_from_wire(rdr.read_u32::<BigEndian>()?)?;
            DbValue::TIMESTAMP(time::PrimitiveDateTime::new(date, time))
        }
        SQL_BLOB => DbValue::BLOB(BlobId(rdr.read_u64::<BigEndian>()?)),
        SQL_ARRAY | SQL_QUAD => DbValue::ARRAY(BlobId(rdr.read_u64::<BigEndian>()?)),
        other => {
            return Err(FbError::Marshaling(format!(
                "type code {other} cannot be read from the wire"
            )));
        }
    })
}

// Scale 0 keeps the carrier's integer type; anything else materializes as
// DECIMAL with the field's scale.
pub(crate) fn scaled_value(
    raw: i128,
    field: &FieldDescriptor,
    unscaled: impl FnOnce(i128) -> DbValue,
) -> DbValue {
    if field.numeric_scale() == 0 {
        unscaled(raw)
    } else {
        DbValue::DECIMAL(BigDecimal::new(
            BigInt::from(raw),
            i64::from(-field.numeric_scale()),
        ))
    }
}

pub(crate) fn wire_date(date: time::Date) -> i32 {
    date.to_julian_day() - DATE_EPOCH_JULIAN_DAY
}

pub(crate) fn date_from_wire(days: i32) -> FbResult<time::Date> {
    time::Date::from_julian_day(days + DATE_EPOCH_JULIAN_DAY)
        .map_err(|e| FbError::ImplDetailed(format!("invalid wire date {days}: {e}")))
}

pub(crate) fn wire_time(t: time::Time) -> u32 {
    let (h, m, s, micro) = t.as_hms_micro();
    (u32::from(h) * 3600 + u32::from(m) * 60 + u32::from(s)) * TIME_UNITS_PER_SECOND + micro / 100
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn time_from_wire(units: u32) -> FbResult<time::Time> {
    let secs = units / TIME_UNITS_PER_SECOND;
    let micro = (units % TIME_UNITS_PER_SECOND) * 100;
    time::Time::from_hms_micro((secs / 3600) as u8, (secs / 60 % 60) as u8, (secs % 60) as u8, micro)
        .map_err(|e| FbError::ImplDetailed(format!("invalid wire time {units}: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::parts::row_descriptor::CHARSET_OCTETS;

    fn roundtrip(field: &FieldDescriptor, value: &DbValue) -> DbValue {
        let mut buf = Vec::new();
        value.emit(field, &mut buf).unwrap();
        assert_eq!(buf.len() % 4, 0, "wire encoding must stay 4-byte aligned");
        DbValue::parse(field, &mut std::io::Cursor::new(buf)).unwrap()
    }

    #[test]
    fn test_int128_is_little_endian() {
        let field = FieldDescriptor::new(SQL_INT128 + 1, 0, 0, 16);
        let mut buf = Vec::new();
        DbValue::INT128(1).emit(&field, &mut buf).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..], &[0_u8; 15]);
        assert_eq!(
            roundtrip(&field, &DbValue::INT128(-3)),
            DbValue::INT128(-3)
        );
    }

    #[test]
    fn test_guid_shares_octets_layout() {
        let guid_bytes = *b"0123456789abcdef";
        let field = FieldDescriptor::new(SQL_TEXT + 1, CHARSET_OCTETS, 0, 16);
        let mut from_guid = Vec::new();
        DbValue::GUID(guid_bytes).emit(&field, &mut from_guid).unwrap();
        let mut from_binary = Vec::new();
        DbValue::BINARY(guid_bytes.to_vec())
            .emit(&field, &mut from_binary)
            .unwrap();
        assert_eq!(from_guid, from_binary);
        assert_eq!(roundtrip(&field, &DbValue::GUID(guid_bytes)), DbValue::GUID(guid_bytes));
    }

    #[test]
    fn test_scaled_numeric_roundtrip() {
        use std::str::FromStr;
        let field = FieldDescriptor::new(SQL_LONG + 1, 1, -2, 4);
        let value = DbValue::DECIMAL(BigDecimal::from_str("123.45").unwrap());
        assert_eq!(roundtrip(&field, &value), value);

        // integers bound into a scaled field are multiplied out
        let mut buf = Vec::new();
        DbValue::INT(5).emit(&field, &mut buf).unwrap();
        assert_eq!(buf, 500_i32.to_be_bytes());
    }

    #[test]
    fn test_char_pads_with_spaces() {
        let field = FieldDescriptor::new(SQL_TEXT + 1, 0, 0, 6);
        let mut buf = Vec::new();
        DbValue::STRING("ab".to_string()).emit(&field, &mut buf).unwrap();
        assert_eq!(&buf, b"ab    \0\0");
        assert_eq!(
            roundtrip(&field, &DbValue::STRING("ab".to_string())),
            DbValue::STRING("ab".to_string())
        );
    }

    #[test]
    fn test_varying_too_long_is_rejected() {
        let field = FieldDescriptor::new(SQL_VARYING + 1, 0, 0, 3);
        let mut buf = Vec::new();
        assert!(matches!(
            DbValue::STRING("abcd".to_string()).emit(&field, &mut buf),
            Err(crate::FbError::Marshaling(_))
        ));
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let field = FieldDescriptor::new(SQL_TIMESTAMP + 1, 0, 0, 8);
        let ts = time::PrimitiveDateTime::new(
            time::macros::date!(2024 - 02 - 29),
            time::macros::time!(23:59:59.9999),
        );
        assert_eq!(roundtrip(&field, &DbValue::TIMESTAMP(ts)), DbValue::TIMESTAMP(ts));
    }

    #[test]
    fn test_date_epoch() {
        let field = FieldDescriptor::new(SQL_TYPE_DATE + 1, 0, 0, 4);
        let mut buf = Vec::new();
        DbValue::DATE(time::macros::date!(1858 - 11 - 17))
            .emit(&field, &mut buf)
            .unwrap();
        assert_eq!(buf, 0_i32.to_be_bytes());
    }
}
