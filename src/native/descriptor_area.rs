use crate::{
    protocol::parts::{
        RowDescriptor, SQL_ARRAY, SQL_BLOB, SQL_BOOLEAN, SQL_DOUBLE, SQL_FLOAT, SQL_INT128,
        SQL_INT64, SQL_LONG, SQL_QUAD, SQL_SHORT, SQL_TEXT, SQL_TIMESTAMP, SQL_TYPE_DATE,
        SQL_TYPE_TIME, SQL_VARYING,
    },
    FbError, FbResult,
};

/// Indicator value marking a slot as not null.
pub const IND_NOT_NULL: i16 = 0;
/// Indicator value marking a slot as null.
pub const IND_NULL: i16 = -1;

// Shape of one slot of the area.
#[derive(Debug)]
struct NativeSlot {
    data_type: u16,
    sub_type: i16,
    numeric_scale: i16,
    length: u16,
    offset: usize,
    capacity: usize,
}

/// The fixed-layout descriptor array used for in-process value exchange
/// with a native client library.
///
/// One contiguous data block per field, carved out of a single arena and
/// tracked by offset and capacity; the 2-byte indicators live in their own
/// typed array. Consumers address slots by index, or by raw pointer at the
/// native call boundary. The area is exclusively owned by the call that
/// allocated it and must be released exactly once on every exit path;
/// [`release`](Self::release) is idempotent and also runs on drop.
#[derive(Debug)]
pub struct NativeDescriptorArea {
    slots: Vec<NativeSlot>,
    arena: Vec<u8>,
    indicators: Vec<i16>,
    released: bool,
}

impl NativeDescriptorArea {
    /// Allocates an area mirroring the descriptor: one slot per field,
    /// sized by the field's native layout.
    pub fn from_descriptor(descriptor: &RowDescriptor) -> FbResult<Self> {
        let mut slots = Vec::with_capacity(descriptor.len());
        let mut total = 0_usize;
        for field in descriptor.iter() {
            let capacity = native_capacity(field.base_type(), field.length())?;
            slots.push(NativeSlot {
                data_type: field.data_type(),
                sub_type: field.sub_type(),
                numeric_scale: field.numeric_scale(),
                length: field.length(),
                offset: total,
                capacity,
            });
            // keep every block 8-aligned within the arena
            total += capacity.next_multiple_of(8);
        }
        Ok(Self {
            slots,
            arena: vec![0_u8; total],
            indicators: vec![IND_NOT_NULL; descriptor.len()],
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The shape of a slot: type code, sub_type, numeric scale, and
    /// declared length. Answered even after release.
    pub fn slot_shape(&self, index: usize) -> (u16, i16, i16, u16) {
        let slot = &self.slots[index];
        (slot.data_type, slot.sub_type, slot.numeric_scale, slot.length)
    }

    /// The data block of a slot.
    pub fn data(&self, index: usize) -> FbResult<&[u8]> {
        self.check_released()?;
        let slot = &self.slots[index];
        Ok(&self.arena[slot.offset..slot.offset + slot.capacity])
    }

    pub fn data_mut(&mut self, index: usize) -> FbResult<&mut [u8]> {
        self.check_released()?;
        let slot = &self.slots[index];
        Ok(&mut self.arena[slot.offset..slot.offset + slot.capacity])
    }

    pub fn indicator(&self, index: usize) -> FbResult<i16> {
        self.check_released()?;
        Ok(self.indicators[index])
    }

    pub fn set_indicator(&mut self, index: usize, indicator: i16) -> FbResult<()> {
        self.check_released()?;
        self.indicators[index] = indicator;
        Ok(())
    }

    /// The per-field data and indicator addresses, for handing to a native
    /// library call. The pointers stay valid until the area is released.
    pub fn value_pointers(&mut self) -> FbResult<Vec<(*mut u8, *mut i16)>> {
        self.check_released()?;
        let arena = self.arena.as_mut_ptr();
        let indicators = self.indicators.as_mut_ptr();
        Ok(self
            .slots
            .iter()
            .enumerate()
            // the offsets were carved from the arena, the indices from the
            // indicator array; both stay in bounds by construction
            .map(|(index, slot)| unsafe { (arena.add(slot.offset), indicators.add(index)) })
            .collect())
    }

    /// Releases all slot storage. Safe to call more than once; a released
    /// area refuses data access but keeps answering shape queries.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        trace!("releasing native descriptor area with {} slots", self.slots.len());
        self.arena = Vec::new();
        self.indicators = Vec::new();
        self.released = true;
    }

    fn check_released(&self) -> FbResult<()> {
        if self.released {
            Err(FbError::Usage("the native descriptor area was released"))
        } else {
            Ok(())
        }
    }
}

impl Drop for NativeDescriptorArea {
    fn drop(&mut self) {
        self.release();
    }
}

fn native_capacity(base_type: u16, length: u16) -> FbResult<usize> {
    Ok(match base_type {
        SQL_TEXT => usize::from(length),
        // a 2-byte actual-length prefix ahead of the payload
        SQL_VARYING => usize::from(length) + 2,
        SQL_SHORT => 2,
        SQL_LONG | SQL_FLOAT | SQL_TYPE_DATE | SQL_TYPE_TIME => 4,
        SQL_INT64 | SQL_DOUBLE | SQL_TIMESTAMP | SQL_BLOB | SQL_ARRAY | SQL_QUAD => 8,
        SQL_INT128 => 16,
        SQL_BOOLEAN => 1,
        other => {
            return Err(FbError::Marshaling(format!(
                "type code {other} has no native layout"
            )));
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::parts::FieldDescriptor;

    fn sample_area() -> NativeDescriptorArea {
        let descriptor = RowDescriptor::from_fields(vec![
            FieldDescriptor::new(SQL_VARYING + 1, 0, 0, 20),
            FieldDescriptor::new(SQL_SHORT + 1, 0, 0, 2),
        ]);
        NativeDescriptorArea::from_descriptor(&descriptor).unwrap()
    }

    #[test]
    fn test_slot_capacities() {
        let mut area = sample_area();
        assert_eq!(area.len(), 2);
        assert_eq!(area.data(0).unwrap().len(), 22); // 20 + length prefix
        assert_eq!(area.data(1).unwrap().len(), 2);
        assert_eq!(area.value_pointers().unwrap().len(), 2);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut area = sample_area();
        area.data_mut(0).unwrap()[0] = 1;
        area.release();
        assert!(area.is_released());
        area.release(); // a second call is a no-op
        assert!(area.data(0).is_err());
        assert!(area.set_indicator(0, IND_NULL).is_err());
        assert!(area.value_pointers().is_err());
    }

    #[test]
    fn test_unknown_type_code() {
        let descriptor = RowDescriptor::from_fields(vec![FieldDescriptor::new(2, 0, 0, 4)]);
        assert!(matches!(
            NativeDescriptorArea::from_descriptor(&descriptor),
            Err(FbError::Marshaling(_))
        ));
    }
}
