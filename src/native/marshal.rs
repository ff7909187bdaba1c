use crate::{
    native::descriptor_area::{NativeDescriptorArea, IND_NOT_NULL, IND_NULL},
    protocol::parts::{
        db_value, DbValue, RowDescriptor, SQL_ARRAY, SQL_BLOB, SQL_BOOLEAN, SQL_DOUBLE, SQL_FLOAT,
        SQL_INT128, SQL_INT64, SQL_LONG, SQL_QUAD, SQL_SHORT, SQL_TEXT, SQL_TIMESTAMP,
        SQL_TYPE_DATE, SQL_TYPE_TIME, SQL_VARYING,
    },
    row::Row,
    FbError, FbResult,
};
use crate::protocol::parts::BlobId;

/// Copies the values bound in the descriptor into the native slots.
///
/// Integers are written in their native byte width, varying text and
/// binary as a 2-byte actual-length prefix plus payload, fixed text
/// space-padded; the indicator marks null slots. Values never overflow
/// their slot: oversized text truncates to a whole number of characters of
/// the field's character set.
pub fn write_values(
    descriptor: &RowDescriptor,
    area: &mut NativeDescriptorArea,
) -> FbResult<()> {
    if descriptor.len() != area.len() {
        return Err(FbError::Usage("the area does not mirror the descriptor"));
    }
    for (index, field) in descriptor.iter().enumerate() {
        if field.is_null() {
            area.set_indicator(index, IND_NULL)?;
            area.data_mut(index)?.fill(0);
            continue;
        }
        area.set_indicator(index, IND_NOT_NULL)?;
        let value = field.value();
        let scale = field.numeric_scale();
        let char_width = usize::from(field.bytes_per_char());
        let octets = field.is_octets();
        let slot = area.data_mut(index)?;
        match field.base_type() {
            SQL_TEXT => {
                let bytes = value.as_bytes()?;
                let usable = usable_text_len(bytes.len(), slot.len(), char_width);
                slot[..usable].copy_from_slice(&bytes[..usable]);
                slot[usable..].fill(if octets { 0 } else { b' ' });
            }
            SQL_VARYING => {
                let bytes = value.as_bytes()?;
                let usable = usable_text_len(bytes.len(), slot.len() - 2, char_width);
                slot[..2].copy_from_slice(&(usable as u16).to_ne_bytes());
                slot[2..2 + usable].copy_from_slice(&bytes[..usable]);
                slot[2 + usable..].fill(0);
            }
            SQL_SHORT => {
                let raw = value.as_scaled_i128(scale)?;
                let raw = i16::try_from(raw)
                    .map_err(|_| FbError::Marshaling(format!("{raw} exceeds the slot width")))?;
                slot.copy_from_slice(&raw.to_ne_bytes());
            }
            SQL_LONG => {
                let raw = value.as_scaled_i128(scale)?;
                let raw = i32::try_from(raw)
                    .map_err(|_| FbError::Marshaling(format!("{raw} exceeds the slot width")))?;
                slot.copy_from_slice(&raw.to_ne_bytes());
            }
            SQL_INT64 => {
                let raw = value.as_scaled_i128(scale)?;
                let raw = i64::try_from(raw)
                    .map_err(|_| FbError::Marshaling(format!("{raw} exceeds the slot width")))?;
                slot.copy_from_slice(&raw.to_ne_bytes());
            }
            SQL_INT128 => {
                let raw = value.as_scaled_i128(scale)?;
                slot.copy_from_slice(&raw.to_ne_bytes());
            }
            SQL_FLOAT => match *value {
                DbValue::FLOAT(f) => slot.copy_from_slice(&f.to_ne_bytes()),
                ref other => return Err(native_mismatch(other, "FLOAT")),
            },
            SQL_DOUBLE => match *value {
                DbValue::DOUBLE(f) => slot.copy_from_slice(&f.to_ne_bytes()),
                ref other => return Err(native_mismatch(other, "DOUBLE")),
            },
            SQL_BOOLEAN => match *value {
                DbValue::BOOLEAN(b) => slot[0] = u8::from(b),
                ref other => return Err(native_mismatch(other, "BOOLEAN")),
            },
            SQL_TYPE_DATE => match *value {
                DbValue::DATE(date) => {
                    slot.copy_from_slice(&db_value::wire_date(date).to_ne_bytes());
                }
                ref other => return Err(native_mismatch(other, "DATE")),
            },
            SQL_TYPE_TIME => match *value {
                DbValue::TIME(t) => slot.copy_from_slice(&db_value::wire_time(t).to_ne_bytes()),
                ref other => return Err(native_mismatch(other, "TIME")),
            },
            SQL_TIMESTAMP => match *value {
                DbValue::TIMESTAMP(ts) => {
                    slot[..4].copy_from_slice(&db_value::wire_date(ts.date()).to_ne_bytes());
                    slot[4..].copy_from_slice(&db_value::wire_time(ts.time()).to_ne_bytes());
                }
                ref other => return Err(native_mismatch(other, "TIMESTAMP")),
            },
            SQL_BLOB | SQL_ARRAY | SQL_QUAD => match *value {
                DbValue::BLOB(id) | DbValue::ARRAY(id) => {
                    slot.copy_from_slice(&id.0.to_ne_bytes());
                }
                ref other => return Err(native_mismatch(other, "BLOB")),
            },
            other => {
                return Err(FbError::Marshaling(format!(
                    "type code {other} has no native layout"
                )));
            }
        }
    }
    Ok(())
}

/// Copies the native slots back into the descriptor's value slots and
/// returns them as a row.
pub fn read_row_values(
    descriptor: &mut RowDescriptor,
    area: &NativeDescriptorArea,
) -> FbResult<Row> {
    if descriptor.len() != area.len() {
        return Err(FbError::Usage("the area does not mirror the descriptor"));
    }
    let mut values = Vec::with_capacity(descriptor.len());
    for index in 0..descriptor.len() {
        let value = if area.indicator(index)? == IND_NULL {
            DbValue::NULL
        } else {
            decode_slot(descriptor, area, index)?
        };
        descriptor.field_mut(index).set_value(value.clone());
        values.push(value);
    }
    Ok(Row::new(values))
}

#[allow(clippy::cast_possible_truncation)]
fn decode_slot(
    descriptor: &RowDescriptor,
    area: &NativeDescriptorArea,
    index: usize,
) -> FbResult<DbValue> {
    let field = descriptor.field(index);
    let slot = area.data(index)?;
    Ok(match field.base_type() {
        SQL_TEXT => {
            let payload = &slot[..usize::from(field.length())];
            if field.is_octets() {
                if payload.len() == 16 {
                    let mut guid = [0_u8; 16];
                    guid.copy_from_slice(payload);
                    DbValue::GUID(guid)
                } else {
                    DbValue::BINARY(payload.to_vec())
                }
            } else {
                DbValue::STRING(
                    String::from_utf8_lossy(payload)
                        .trim_end_matches(' ')
                        .to_string(),
                )
            }
        }
        SQL_VARYING => {
            let stored = usize::from(u16::from_ne_bytes([slot[0], slot[1]]));
            let len = stored.min(slot.len() - 2);
            let payload = &slot[2..2 + len];
            if field.is_octets() {
                DbValue::BINARY(payload.to_vec())
            } else {
                DbValue::STRING(String::from_utf8_lossy(payload).to_string())
            }
        }
        SQL_SHORT => db_value::scaled_value(
            i128::from(i16::from_ne_bytes(slot.try_into().expect("2-byte slot"))),
            field,
            |raw| DbValue::SMALLINT(raw as i16),
        ),
        SQL_LONG => db_value::scaled_value(
            i128::from(i32::from_ne_bytes(slot.try_into().expect("4-byte slot"))),
            field,
            |raw| DbValue::INT(raw as i32),
        ),
        SQL_INT64 => db_value::scaled_value(
            i128::from(i64::from_ne_bytes(slot.try_into().expect("8-byte slot"))),
            field,
            |raw| DbValue::BIGINT(raw as i64),
        ),
        SQL_INT128 => db_value::scaled_value(
            i128::from_ne_bytes(slot.try_into().expect("16-byte slot")),
            field,
            DbValue::INT128,
        ),
        SQL_FLOAT => DbValue::FLOAT(f32::from_ne_bytes(slot.try_into().expect("4-byte slot"))),
        SQL_DOUBLE => DbValue::DOUBLE(f64::from_ne_bytes(slot.try_into().expect("8-byte slot"))),
        SQL_BOOLEAN => DbValue::BOOLEAN(slot[0] != 0),
        SQL_TYPE_DATE => DbValue::DATE(db_value::date_from_wire(i32::from_ne_bytes(
            slot.try_into().expect("4-byte slot"),
        ))?),
        SQL_TYPE_TIME => DbValue::TIME(db_value::time_from_wire(u32::from_ne_bytes(
            slot.try_into().expect("4-byte slot"),
        ))?),
        SQL_TIMESTAMP => {
            let date = db_value::date_from_wire(i32::from_ne_bytes(
                slot[..4].try_into().expect("4 bytes"),
            ))?;
            let time = db_value::time_from_wire(u32::from_ne_bytes(
                slot[4..].try_into().expect("4 bytes"),
            ))?;
            DbValue::TIMESTAMP(time::PrimitiveDateTime::new(date, time))
        }
        SQL_BLOB => DbValue::BLOB(BlobId(u64::from_ne_bytes(
            slot.try_into().expect("8-byte slot"),
        ))),
        SQL_ARRAY | SQL_QUAD => DbValue::ARRAY(BlobId(u64::from_ne_bytes(
            slot.try_into().expect("8-byte slot"),
        ))),
        other => {
            return Err(FbError::Marshaling(format!(
                "type code {other} has no native layout"
            )));
        }
    })
}

fn native_mismatch(value: &DbValue, expected: &str) -> FbError {
    FbError::Marshaling(format!(
        "DbValue::{value:?} cannot be marshaled as {expected}"
    ))
}

// The number of payload bytes usable when copying text into a
// fixed-capacity slot: a whole number of characters of the source
// character set, never a partial one. Lengths are re-derived in units of
// the character width.
fn usable_text_len(payload_len: usize, capacity: usize, char_width: usize) -> usize {
    let chars = std::cmp::min(payload_len / char_width, capacity / char_width);
    chars * char_width
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::parts::{FieldDescriptor, CHARSET_OCTETS, CHARSET_UTF8};

    fn marshal_roundtrip(mut descriptor: RowDescriptor) -> Row {
        let mut area = NativeDescriptorArea::from_descriptor(&descriptor).unwrap();
        write_values(&descriptor, &mut area).unwrap();
        let row = read_row_values(&mut descriptor, &area).unwrap();
        area.release();
        row
    }

    #[test]
    fn test_value_roundtrip() {
        let mut descriptor = RowDescriptor::from_fields(vec![
            FieldDescriptor::new(SQL_VARYING + 1, 0, 0, 20),
            FieldDescriptor::new(SQL_SHORT + 1, 0, 0, 2),
            FieldDescriptor::new(SQL_INT128 + 1, 0, 0, 16),
            FieldDescriptor::new(SQL_TEXT + 1, CHARSET_OCTETS, 0, 16),
            FieldDescriptor::new(SQL_DOUBLE + 1, 0, 0, 8),
        ]);
        descriptor
            .field_mut(0)
            .set_value(DbValue::STRING("native".to_string()));
        descriptor.field_mut(1).set_value(DbValue::SMALLINT(-5));
        descriptor
            .field_mut(2)
            .set_value(DbValue::INT128(i128::from(u64::MAX) + 7));
        descriptor
            .field_mut(3)
            .set_value(DbValue::GUID(*b"0123456789abcdef"));
        descriptor.field_mut(4).set_value(DbValue::DOUBLE(2.5));

        let row = marshal_roundtrip(descriptor);
        assert_eq!(row[0], DbValue::STRING("native".to_string()));
        assert_eq!(row[1], DbValue::SMALLINT(-5));
        assert_eq!(row[2], DbValue::INT128(i128::from(u64::MAX) + 7));
        assert_eq!(row[3], DbValue::GUID(*b"0123456789abcdef"));
        assert_eq!(row[4], DbValue::DOUBLE(2.5));
    }

    #[test]
    fn test_null_indicator() {
        let mut descriptor =
            RowDescriptor::from_fields(vec![FieldDescriptor::new(SQL_LONG + 1, 0, 0, 4)]);
        descriptor.field_mut(0).set_value(DbValue::NULL);

        let mut area = NativeDescriptorArea::from_descriptor(&descriptor).unwrap();
        write_values(&descriptor, &mut area).unwrap();
        assert_eq!(area.indicator(0).unwrap(), IND_NULL);

        let row = read_row_values(&mut descriptor, &area).unwrap();
        assert_eq!(row[0], DbValue::NULL);
    }

    #[test]
    fn test_varying_length_prefix() {
        let mut descriptor =
            RowDescriptor::from_fields(vec![FieldDescriptor::new(SQL_VARYING + 1, 0, 0, 10)]);
        descriptor
            .field_mut(0)
            .set_value(DbValue::STRING("ab".to_string()));

        let mut area = NativeDescriptorArea::from_descriptor(&descriptor).unwrap();
        write_values(&descriptor, &mut area).unwrap();
        let slot = area.data(0).unwrap();
        assert_eq!(u16::from_ne_bytes([slot[0], slot[1]]), 2);
        assert_eq!(&slot[2..4], b"ab");
    }

    #[test]
    fn test_multibyte_truncation_keeps_whole_characters() {
        // a 4-bytes-per-character field with room for exactly 2 characters
        let mut descriptor = RowDescriptor::from_fields(vec![FieldDescriptor::new(
            SQL_VARYING + 1,
            CHARSET_UTF8,
            0,
            8,
        )]);
        descriptor
            .field_mut(0)
            .set_value(DbValue::STRING("😀😁😂".to_string()));

        let mut area = NativeDescriptorArea::from_descriptor(&descriptor).unwrap();
        write_values(&descriptor, &mut area).unwrap();
        let row = read_row_values(&mut descriptor, &area).unwrap();
        // the third character does not fit and is dropped as a whole
        assert_eq!(row[0], DbValue::STRING("😀😁".to_string()));
    }

    #[test]
    fn test_truncation_never_splits_a_character() {
        assert_eq!(usable_text_len(4, 4, 2), 4); // 2 chars into 2-char room
        assert_eq!(usable_text_len(4, 3, 2), 2); // 2 chars into 1.5-char room
        assert_eq!(usable_text_len(6, 8, 4), 4); // 1.5 chars offered
        assert_eq!(usable_text_len(5, 5, 1), 5); // single-byte set untouched
    }

    #[test]
    fn test_scaled_short_roundtrip() {
        use bigdecimal::BigDecimal;
        use std::str::FromStr;
        let mut descriptor =
            RowDescriptor::from_fields(vec![FieldDescriptor::new(SQL_SHORT + 1, 1, -2, 2)]);
        let value = DbValue::DECIMAL(BigDecimal::from_str("3.14").unwrap());
        descriptor.field_mut(0).set_value(value.clone());
        let row = marshal_roundtrip(descriptor);
        assert_eq!(row[0], value);
    }
}
