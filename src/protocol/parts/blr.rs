use crate::{
    protocol::parts::row_descriptor::{
        FieldDescriptor, SQL_ARRAY, SQL_BLOB, SQL_BOOLEAN, SQL_DOUBLE, SQL_FLOAT, SQL_INT128,
        SQL_INT64, SQL_LONG, SQL_QUAD, SQL_SHORT, SQL_TEXT, SQL_TIMESTAMP, SQL_TYPE_DATE,
        SQL_TYPE_TIME, SQL_VARYING,
    },
    FbError, FbResult,
};

// Verb codes of the binary language, as far as message descriptions need them.
const BLR_TEXT: u8 = 14;
const BLR_VARYING: u8 = 37;
const BLR_SHORT: u8 = 7;
const BLR_LONG: u8 = 8;
const BLR_QUAD: u8 = 9;
const BLR_FLOAT: u8 = 10;
const BLR_SQL_DATE: u8 = 12;
const BLR_SQL_TIME: u8 = 13;
const BLR_INT64: u8 = 16;
const BLR_BOOL: u8 = 23;
const BLR_INT128: u8 = 26;
const BLR_DOUBLE: u8 = 27;
const BLR_TIMESTAMP: u8 = 35;

const BLR_VERSION5: u8 = 5;
const BLR_BEGIN: u8 = 2;
const BLR_MESSAGE: u8 = 4;
const BLR_END: u8 = 255;
const BLR_EOC: u8 = 76;

/// The compiled binary type-descriptor of a [`RowDescriptor`]'s shape.
///
/// Treated as an opaque blob by everything except [`build`]; byte-identical
/// for identical shape-determining field values.
///
/// [`RowDescriptor`]: crate::RowDescriptor
#[derive(Debug, Eq, PartialEq)]
pub struct BlrBuffer {
    data: Vec<u8>,
}

impl BlrBuffer {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Deterministic compilation of the shape-determining tuple of every field.
// Each field occupies two message slots: its value and its 16-bit null
// indicator.
pub(crate) fn build(fields: &[FieldDescriptor]) -> FbResult<BlrBuffer> {
    let mut data = Vec::with_capacity(8 + fields.len() * 4);
    let slots = u16::try_from(fields.len() * 2)
        .map_err(|_| FbError::Marshaling(format!("{} fields exceed the message", fields.len())))?;

    data.extend_from_slice(&[BLR_VERSION5, BLR_BEGIN, BLR_MESSAGE, 0]);
    data.extend_from_slice(&slots.to_le_bytes());

    for field in fields {
        emit_field_type(field, &mut data)?;
        // the null indicator slot
        data.extend_from_slice(&[BLR_SHORT, 0]);
    }

    data.extend_from_slice(&[BLR_END, BLR_EOC]);
    Ok(BlrBuffer { data })
}

#[allow(clippy::cast_sign_loss)]
fn emit_field_type(field: &FieldDescriptor, data: &mut Vec<u8>) -> FbResult<()> {
    let scale = field.numeric_scale() as u8;
    match field.base_type() {
        SQL_VARYING => {
            data.push(BLR_VARYING);
            data.extend_from_slice(&field.length().to_le_bytes());
        }
        SQL_TEXT => {
            data.push(BLR_TEXT);
            data.extend_from_slice(&field.length().to_le_bytes());
        }
        SQL_SHORT => data.extend_from_slice(&[BLR_SHORT, scale]),
        SQL_LONG => data.extend_from_slice(&[BLR_LONG, scale]),
        SQL_INT64 => data.extend_from_slice(&[BLR_INT64, scale]),
        SQL_INT128 => data.extend_from_slice(&[BLR_INT128, scale]),
        SQL_QUAD => data.extend_from_slice(&[BLR_QUAD, scale]),
        SQL_FLOAT => data.push(BLR_FLOAT),
        SQL_DOUBLE => data.push(BLR_DOUBLE),
        SQL_TYPE_DATE => data.push(BLR_SQL_DATE),
        SQL_TYPE_TIME => data.push(BLR_SQL_TIME),
        SQL_TIMESTAMP => data.push(BLR_TIMESTAMP),
        SQL_BOOLEAN => data.push(BLR_BOOL),
        SQL_BLOB | SQL_ARRAY => data.extend_from_slice(&[BLR_QUAD, 0]),
        other => {
            return Err(FbError::Marshaling(format!(
                "type code {other} cannot be described in a message"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::parts::row_descriptor::RowDescriptor;

    #[test]
    fn test_build_layout() {
        let mut descriptor = RowDescriptor::from_fields(vec![
            FieldDescriptor::new(SQL_VARYING + 1, 0, 0, 300),
            FieldDescriptor::new(SQL_LONG + 1, 1, -2, 4),
        ]);
        let blr = descriptor.compile().unwrap();
        assert_eq!(
            blr.bytes(),
            &[
                BLR_VERSION5, BLR_BEGIN, BLR_MESSAGE, 0, 4, 0, // header, 4 slots
                BLR_VARYING, 44, 1, // 300 = 0x012c, little-endian
                BLR_SHORT, 0, // its null indicator
                BLR_LONG, 0xfe, // scale -2 as byte
                BLR_SHORT, 0, // its null indicator
                BLR_END, BLR_EOC,
            ]
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let fields = vec![
            FieldDescriptor::new(SQL_TIMESTAMP, 0, 0, 8),
            FieldDescriptor::new(SQL_BLOB + 1, 1, 0, 8),
            FieldDescriptor::new(SQL_BOOLEAN + 1, 0, 0, 1),
        ];
        let first = build(&fields).unwrap();
        let second = build(&fields).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_out_of_range_type_code() {
        let mut descriptor = RowDescriptor::from_fields(vec![FieldDescriptor::new(2, 0, 0, 4)]);
        assert!(matches!(
            descriptor.compile(),
            Err(crate::FbError::Marshaling(_))
        ));
    }

    #[test]
    fn test_empty_message() {
        let blr = build(&[]).unwrap();
        assert_eq!(
            blr.bytes(),
            &[BLR_VERSION5, BLR_BEGIN, BLR_MESSAGE, 0, 0, 0, BLR_END, BLR_EOC]
        );
    }
}
