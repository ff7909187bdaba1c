use crate::{
    protocol::{
        parts::{row_descriptor::RowDescriptor, DbValue},
        util_sync,
    },
    row::Row,
    FbError, FbResult,
};

// Null bitmaps up to this size live on the stack; wider rows rent the
// codec's pooled buffer.
const BITMAP_STACK_LIMIT: usize = 1024;

/// Serializes parameter rows and deserializes result rows over an ordered
/// byte channel.
///
/// The wire form of a row is its null bitmap — one bit per field in
/// declaration order, set ⇔ null, packed 8 fields per byte, transmitted as
/// one length-prefixed block — followed by the raw encodings of the non-null
/// values. Null fields contribute no payload bytes.
///
/// Each statement owns its codec instance; the pooled bitmap buffer is
/// reused across calls and never shared between threads.
#[derive(Debug, Default)]
pub struct RowCodec {
    pool: Vec<u8>,
}

impl RowCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the values currently bound in the descriptor's fields.
    ///
    /// A zero-field descriptor produces no bytes at all. Partial writes are
    /// not retried; on an error the caller must fail the whole request.
    pub fn write_row_sync(
        &mut self,
        descriptor: &RowDescriptor,
        w: &mut dyn std::io::Write,
    ) -> FbResult<()> {
        let field_count = descriptor.len();
        if field_count == 0 {
            return Ok(());
        }
        let bitmap_len = bitmap_len(field_count);
        if bitmap_len <= BITMAP_STACK_LIMIT {
            let mut bitmap = [0_u8; BITMAP_STACK_LIMIT];
            fill_bitmap(descriptor, &mut bitmap[..bitmap_len]);
            util_sync::emit_block(&bitmap[..bitmap_len], w)?;
        } else {
            let mut rented = std::mem::take(&mut self.pool);
            rented.clear();
            rented.resize(bitmap_len, 0);
            fill_bitmap(descriptor, &mut rented);
            let result = util_sync::emit_block(&rented, w);
            rented.clear();
            self.pool = rented;
            result?;
        }
        for field in descriptor.iter() {
            if !field.is_null() {
                field.value().emit(field, w)?;
            }
        }
        Ok(())
    }

    /// Reads one row shaped by the descriptor.
    ///
    /// A zero-field descriptor short-circuits to an empty row without
    /// touching the channel. Fields marked null in the bitmap consume no
    /// payload bytes.
    pub fn read_row_sync(
        &mut self,
        descriptor: &RowDescriptor,
        rdr: &mut dyn std::io::Read,
    ) -> FbResult<Row> {
        let field_count = descriptor.len();
        if field_count == 0 {
            return Ok(Row::default());
        }
        let bitmap = util_sync::parse_block(rdr)?;
        read_values_sync(descriptor, &bitmap, rdr)
    }

    /// Suspendable form of [`RowCodec::write_row_sync`]; the wire bytes are
    /// identical, suspension happens only at the channel boundary.
    #[cfg(feature = "async")]
    pub async fn write_row_async<W: tokio::io::AsyncWriteExt + std::marker::Unpin>(
        &mut self,
        descriptor: &RowDescriptor,
        w: &mut W,
    ) -> FbResult<()> {
        if descriptor.is_empty() {
            return Ok(());
        }
        let mut staged = std::mem::take(&mut self.pool);
        staged.clear();
        let result = self.write_row_sync(descriptor, &mut staged);
        match result {
            Ok(()) => {
                let result = w.write_all(&staged).await;
                staged.clear();
                self.pool = staged;
                result?;
                Ok(())
            }
            Err(e) => {
                staged.clear();
                self.pool = staged;
                Err(e)
            }
        }
    }

    /// Suspendable form of [`RowCodec::read_row_sync`] with identical byte
    /// semantics.
    #[cfg(feature = "async")]
    pub async fn read_row_async<R: tokio::io::AsyncReadExt + std::marker::Unpin>(
        &mut self,
        descriptor: &RowDescriptor,
        rdr: &mut R,
    ) -> FbResult<Row> {
        use crate::protocol::util_async;
        let field_count = descriptor.len();
        if field_count == 0 {
            return Ok(Row::default());
        }
        let bitmap = util_async::parse_block(rdr).await?;
        check_bitmap(field_count, &bitmap)?;
        let mut values = Vec::with_capacity(field_count);
        for (index, field) in descriptor.iter().enumerate() {
            if is_null_bit_set(&bitmap, index) {
                values.push(DbValue::NULL);
            } else {
                values.push(DbValue::parse_async(field, rdr).await?);
            }
        }
        Ok(Row::new(values))
    }
}

pub(crate) fn bitmap_len(field_count: usize) -> usize {
    field_count.div_ceil(8)
}

fn fill_bitmap(descriptor: &RowDescriptor, bitmap: &mut [u8]) {
    bitmap.fill(0);
    for (index, field) in descriptor.iter().enumerate() {
        if field.is_null() {
            bitmap[index / 8] |= 1 << (index % 8);
        }
    }
}

fn is_null_bit_set(bitmap: &[u8], index: usize) -> bool {
    bitmap[index / 8] & (1 << (index % 8)) != 0
}

fn check_bitmap(field_count: usize, bitmap: &[u8]) -> FbResult<()> {
    if bitmap.len() < bitmap_len(field_count) {
        return Err(FbError::Protocol(format!(
            "null bitmap of {} bytes is too short for {field_count} fields",
            bitmap.len()
        )));
    }
    Ok(())
}

fn read_values_sync(
    descriptor: &RowDescriptor,
    bitmap: &[u8],
    rdr: &mut dyn std::io::Read,
) -> FbResult<Row> {
    check_bitmap(descriptor.len(), bitmap)?;
    let mut values = Vec::with_capacity(descriptor.len());
    for (index, field) in descriptor.iter().enumerate() {
        if is_null_bit_set(bitmap, index) {
            values.push(DbValue::NULL);
        } else {
            values.push(DbValue::parse(field, rdr)?);
        }
    }
    Ok(Row::new(values))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::parts::row_descriptor::{
        FieldDescriptor, SQL_BOOLEAN, SQL_INT64, SQL_LONG, SQL_VARYING,
    };

    fn sample_descriptor() -> RowDescriptor {
        let mut descriptor = RowDescriptor::from_fields(vec![
            FieldDescriptor::new(SQL_VARYING + 1, 0, 0, 20),
            FieldDescriptor::new(SQL_LONG + 1, 0, 0, 4),
            FieldDescriptor::new(SQL_INT64 + 1, 0, 0, 8),
            FieldDescriptor::new(SQL_BOOLEAN + 1, 0, 0, 1),
        ]);
        descriptor
            .field_mut(0)
            .set_value(DbValue::STRING("loopback".to_string()));
        descriptor.field_mut(1).set_value(DbValue::NULL);
        descriptor.field_mut(2).set_value(DbValue::BIGINT(-77));
        descriptor.field_mut(3).set_value(DbValue::BOOLEAN(true));
        descriptor
    }

    #[test]
    fn test_roundtrip_with_nulls() {
        let descriptor = sample_descriptor();
        let mut codec = RowCodec::new();
        let mut wire = Vec::new();
        codec.write_row_sync(&descriptor, &mut wire).unwrap();

        // bitmap block: 4-byte length, 1 bitmap byte with bit 1 set, 3 pad bytes
        assert_eq!(&wire[..8], &[0, 0, 0, 1, 0b_0000_0010, 0, 0, 0]);

        let row = codec
            .read_row_sync(&descriptor, &mut std::io::Cursor::new(wire))
            .unwrap();
        assert_eq!(row[0], DbValue::STRING("loopback".to_string()));
        assert_eq!(row[1], DbValue::NULL);
        assert_eq!(row[2], DbValue::BIGINT(-77));
        assert_eq!(row[3], DbValue::BOOLEAN(true));
    }

    #[test]
    fn test_all_null_row_has_only_bitmap() {
        let mut descriptor = sample_descriptor();
        for field in descriptor.iter_mut() {
            field.set_value(DbValue::NULL);
        }
        let mut codec = RowCodec::new();
        let mut wire = Vec::new();
        codec.write_row_sync(&descriptor, &mut wire).unwrap();
        assert_eq!(wire, &[0, 0, 0, 1, 0b_0000_1111, 0, 0, 0]);

        let row = codec
            .read_row_sync(&descriptor, &mut std::io::Cursor::new(wire))
            .unwrap();
        assert!(row.iter().all(DbValue::is_null));
    }

    #[test]
    fn test_zero_field_row_does_no_io() {
        let descriptor = RowDescriptor::new(0);
        let mut codec = RowCodec::new();
        let mut wire = Vec::new();
        codec.write_row_sync(&descriptor, &mut wire).unwrap();
        assert!(wire.is_empty());

        // a reader that fails on any access proves the short-circuit
        struct NoRead;
        impl std::io::Read for NoRead {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                panic!("zero-field row must not read");
            }
        }
        let row = codec.read_row_sync(&descriptor, &mut NoRead).unwrap();
        assert!(row.is_empty());
    }

    #[test]
    fn test_wide_row_bitmap() {
        let mut descriptor = RowDescriptor::from_fields(
            (0..17)
                .map(|_| FieldDescriptor::new(SQL_LONG + 1, 0, 0, 4))
                .collect(),
        );
        for (index, field) in descriptor.iter_mut().enumerate() {
            if index % 2 == 0 {
                field.set_value(DbValue::INT(index as i32));
            }
        }
        let mut codec = RowCodec::new();
        let mut wire = Vec::new();
        codec.write_row_sync(&descriptor, &mut wire).unwrap();
        // 17 fields -> 3 bitmap bytes, odd indexes are null
        assert_eq!(&wire[..8], &[0, 0, 0, 3, 0b_1010_1010, 0b_1010_1010, 0, 0]);

        let row = codec
            .read_row_sync(&descriptor, &mut std::io::Cursor::new(wire))
            .unwrap();
        for (index, value) in row.iter().enumerate() {
            if index % 2 == 0 {
                assert_eq!(*value, DbValue::INT(index as i32));
            } else {
                assert_eq!(*value, DbValue::NULL);
            }
        }
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_matches_sync_bytes() {
        let descriptor = sample_descriptor();
        let mut codec = RowCodec::new();
        let mut sync_wire = Vec::new();
        codec.write_row_sync(&descriptor, &mut sync_wire).unwrap();

        let mut async_wire = Vec::new();
        codec
            .write_row_async(&descriptor, &mut async_wire)
            .await
            .unwrap();
        assert_eq!(sync_wire, async_wire);

        let row = codec
            .read_row_async(&descriptor, &mut std::io::Cursor::new(async_wire))
            .await
            .unwrap();
        assert_eq!(row[2], DbValue::BIGINT(-77));
    }
}
