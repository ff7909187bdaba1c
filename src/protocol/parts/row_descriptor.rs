use crate::{
    protocol::parts::{blr, blr::BlrBuffer, DbValue},
    FbError, FbResult,
};
use std::sync::Arc;

// Base type codes of the descriptor model. The codes are even; the low bit
// of `data_type` is the nullable flag and is masked off for all shape
// decisions.
pub(crate) const SQL_VARYING: u16 = 448;
pub(crate) const SQL_TEXT: u16 = 452;
pub(crate) const SQL_DOUBLE: u16 = 480;
pub(crate) const SQL_FLOAT: u16 = 482;
pub(crate) const SQL_LONG: u16 = 496;
pub(crate) const SQL_SHORT: u16 = 500;
pub(crate) const SQL_TIMESTAMP: u16 = 510;
pub(crate) const SQL_BLOB: u16 = 520;
pub(crate) const SQL_ARRAY: u16 = 540;
pub(crate) const SQL_QUAD: u16 = 550;
pub(crate) const SQL_TYPE_TIME: u16 = 560;
pub(crate) const SQL_TYPE_DATE: u16 = 570;
pub(crate) const SQL_INT64: u16 = 580;
pub(crate) const SQL_INT128: u16 = 32752;
pub(crate) const SQL_BOOLEAN: u16 = 32764;

// Character set ids carried in the sub_type of text types.
pub(crate) const CHARSET_OCTETS: i16 = 1;
pub(crate) const CHARSET_UNICODE_FSS: i16 = 3;
pub(crate) const CHARSET_UTF8: i16 = 4;

/// Logical SQL type of a column or parameter, derived from the triple
/// (base type code, sub_type, numeric_scale).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SqlTypeCategory {
    SmallInt,
    Integer,
    BigInt,
    Int128,
    /// Scaled type with sub_type NUMERIC.
    Numeric,
    /// Scaled type with sub_type DECIMAL.
    Decimal,
    Float,
    Double,
    Char,
    VarChar,
    Binary,
    VarBinary,
    Guid,
    Date,
    Time,
    TimeStamp,
    Boolean,
    BinaryBlob,
    TextBlob,
    Array,
}

/// Shape and current value of one column or parameter.
///
/// The shape-determining part is the tuple (base type, sub_type,
/// numeric_scale, length); mutating any of it invalidates derived state of
/// the owning [`RowDescriptor`]. The nullable flag (low bit of the type code)
/// may toggle freely.
#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    data_type: u16,
    sub_type: i16,
    numeric_scale: i16,
    length: u16,
    value: DbValue,
    shape_dirty: bool,
}

impl Default for FieldDescriptor {
    fn default() -> Self {
        Self {
            data_type: SQL_TEXT,
            sub_type: 0,
            numeric_scale: 0,
            length: 0,
            value: DbValue::NULL,
            shape_dirty: true,
        }
    }
}

impl FieldDescriptor {
    pub fn new(data_type: u16, sub_type: i16, numeric_scale: i16, length: u16) -> Self {
        Self {
            data_type,
            sub_type,
            numeric_scale,
            length,
            value: DbValue::NULL,
            shape_dirty: true,
        }
    }

    /// The raw type code, including the nullable flag in the low bit.
    pub fn data_type(&self) -> u16 {
        self.data_type
    }

    /// The type code with the nullable flag masked off.
    pub fn base_type(&self) -> u16 {
        self.data_type & !1
    }

    pub fn is_nullable(&self) -> bool {
        self.data_type & 1 == 1
    }

    pub fn sub_type(&self) -> i16 {
        self.sub_type
    }

    pub fn numeric_scale(&self) -> i16 {
        self.numeric_scale
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    /// Sets the full type code. Raises the shape flag only if the base code
    /// (nullable flag masked off) actually changes.
    pub fn set_data_type(&mut self, data_type: u16) {
        if data_type & !1 != self.base_type() {
            self.shape_dirty = true;
        }
        self.data_type = data_type;
    }

    /// Toggles only the nullable flag; never invalidates derived state.
    pub fn set_nullable(&mut self, nullable: bool) {
        self.data_type = self.base_type() | u16::from(nullable);
    }

    pub fn set_sub_type(&mut self, sub_type: i16) {
        if sub_type != self.sub_type {
            self.shape_dirty = true;
        }
        self.sub_type = sub_type;
    }

    pub fn set_numeric_scale(&mut self, numeric_scale: i16) {
        if numeric_scale != self.numeric_scale {
            self.shape_dirty = true;
        }
        self.numeric_scale = numeric_scale;
    }

    pub fn set_length(&mut self, length: u16) {
        if length != self.length {
            self.shape_dirty = true;
        }
        self.length = length;
    }

    /// The currently bound or fetched value.
    pub fn value(&self) -> &DbValue {
        &self.value
    }

    /// Binds a value; does not affect the cached binary shape.
    pub fn set_value(&mut self, value: DbValue) {
        self.value = value;
    }

    pub fn take_value(&mut self) -> DbValue {
        std::mem::replace(&mut self.value, DbValue::NULL)
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Bytes per character of the field's character set; 1 for everything
    /// that is not a known multi-byte set.
    pub fn bytes_per_char(&self) -> u16 {
        match self.base_type() {
            SQL_TEXT | SQL_VARYING => match self.sub_type {
                CHARSET_UTF8 => 4,
                CHARSET_UNICODE_FSS => 3,
                _ => 1,
            },
            _ => 1,
        }
    }

    pub(crate) fn is_octets(&self) -> bool {
        matches!(self.base_type(), SQL_TEXT | SQL_VARYING) && self.sub_type == CHARSET_OCTETS
    }

    /// Derives the logical SQL type from (base type, sub_type, numeric_scale).
    /// Always computed from the current field state, never cached.
    pub fn sql_category(&self) -> FbResult<SqlTypeCategory> {
        let scaled = |unscaled: SqlTypeCategory| -> SqlTypeCategory {
            if self.numeric_scale < 0 {
                if self.sub_type == 2 {
                    SqlTypeCategory::Decimal
                } else {
                    SqlTypeCategory::Numeric
                }
            } else {
                unscaled
            }
        };
        Ok(match self.base_type() {
            SQL_SHORT => scaled(SqlTypeCategory::SmallInt),
            SQL_LONG => scaled(SqlTypeCategory::Integer),
            SQL_INT64 | SQL_QUAD => scaled(SqlTypeCategory::BigInt),
            SQL_INT128 => scaled(SqlTypeCategory::Int128),
            SQL_FLOAT => SqlTypeCategory::Float,
            SQL_DOUBLE => SqlTypeCategory::Double,
            SQL_TEXT => match self.sub_type {
                CHARSET_OCTETS if self.length == 16 => SqlTypeCategory::Guid,
                CHARSET_OCTETS => SqlTypeCategory::Binary,
                _ => SqlTypeCategory::Char,
            },
            SQL_VARYING => {
                if self.sub_type == CHARSET_OCTETS {
                    SqlTypeCategory::VarBinary
                } else {
                    SqlTypeCategory::VarChar
                }
            }
            SQL_TYPE_DATE => SqlTypeCategory::Date,
            SQL_TYPE_TIME => SqlTypeCategory::Time,
            SQL_TIMESTAMP => SqlTypeCategory::TimeStamp,
            SQL_BOOLEAN => SqlTypeCategory::Boolean,
            SQL_BLOB => {
                if self.sub_type == 1 {
                    SqlTypeCategory::TextBlob
                } else {
                    SqlTypeCategory::BinaryBlob
                }
            }
            SQL_ARRAY => SqlTypeCategory::Array,
            other => {
                return Err(FbError::Marshaling(format!(
                    "unknown type code {other} in descriptor"
                )));
            }
        })
    }

    pub(crate) fn take_shape_dirty(&mut self) -> bool {
        std::mem::take(&mut self.shape_dirty)
    }

    pub(crate) fn is_shape_dirty(&self) -> bool {
        self.shape_dirty
    }
}

/// Ordered, fixed-length sequence of [`FieldDescriptor`]s describing one
/// parameter set or result row; owns the compiled binary type-descriptor.
///
/// The field count is set at construction and cannot change afterwards.
#[derive(Clone, Debug, Default)]
pub struct RowDescriptor {
    fields: Vec<FieldDescriptor>,
    compiled: Option<Arc<BlrBuffer>>,
}

impl RowDescriptor {
    /// Creates a descriptor with `count` unconfigured fields.
    pub fn new(count: usize) -> Self {
        Self {
            fields: vec![FieldDescriptor::default(); count],
            compiled: None,
        }
    }

    pub fn from_fields(fields: Vec<FieldDescriptor>) -> Self {
        Self {
            fields,
            compiled: None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> &FieldDescriptor {
        &self.fields[index]
    }

    pub fn field_mut(&mut self, index: usize) -> &mut FieldDescriptor {
        &mut self.fields[index]
    }

    pub fn iter(&self) -> impl std::iter::Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn iter_mut(&mut self) -> impl std::iter::Iterator<Item = &mut FieldDescriptor> {
        self.fields.iter_mut()
    }

    /// Compiles the descriptor's shape into its binary type-descriptor.
    ///
    /// The result is memoized: as long as no shape-determining field was
    /// mutated since the last call, the identical buffer instance is
    /// returned. Toggling nullable flags does not invalidate it. Callers may
    /// rely on pointer identity (`Arc::ptr_eq`) for caching derived protocol
    /// messages.
    pub fn compile(&mut self) -> FbResult<Arc<BlrBuffer>> {
        let any_dirty = self.fields.iter().any(FieldDescriptor::is_shape_dirty);
        if let Some(ref compiled) = self.compiled {
            if !any_dirty {
                return Ok(Arc::clone(compiled));
            }
        }
        let compiled = Arc::new(blr::build(&self.fields)?);
        for field in &mut self.fields {
            field.take_shape_dirty();
        }
        self.compiled = Some(Arc::clone(&compiled));
        Ok(compiled)
    }
}

impl std::ops::Index<usize> for RowDescriptor {
    type Output = FieldDescriptor;
    fn index(&self, index: usize) -> &Self::Output {
        self.fields.index(index)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn varchar(len: u16) -> FieldDescriptor {
        FieldDescriptor::new(SQL_VARYING + 1, 0, 0, len)
    }

    #[test]
    fn test_compile_is_identity_stable() {
        let mut descriptor =
            RowDescriptor::from_fields(vec![varchar(20), FieldDescriptor::new(SQL_LONG, 0, 0, 4)]);
        let first = descriptor.compile().unwrap();
        let second = descriptor.compile().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_nullable_toggle_keeps_cache() {
        let mut descriptor = RowDescriptor::from_fields(vec![varchar(20)]);
        let first = descriptor.compile().unwrap();
        descriptor.field_mut(0).set_nullable(false);
        descriptor.field_mut(0).set_nullable(true);
        let second = descriptor.compile().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_shape_change_invalidates_cache() {
        let mut descriptor = RowDescriptor::from_fields(vec![varchar(20)]);
        let first = descriptor.compile().unwrap();

        descriptor.field_mut(0).set_length(30);
        let second = descriptor.compile().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        descriptor.field_mut(0).set_numeric_scale(-2);
        let third = descriptor.compile().unwrap();
        assert!(!Arc::ptr_eq(&second, &third));

        // setting the same scale again is not a shape change
        descriptor.field_mut(0).set_numeric_scale(-2);
        let fourth = descriptor.compile().unwrap();
        assert!(Arc::ptr_eq(&third, &fourth));
    }

    #[test]
    fn test_category_follows_mutation() {
        let mut field = FieldDescriptor::new(SQL_LONG + 1, 0, 0, 4);
        assert_eq!(field.sql_category().unwrap(), SqlTypeCategory::Integer);
        field.set_numeric_scale(-2);
        assert_eq!(field.sql_category().unwrap(), SqlTypeCategory::Numeric);
        field.set_sub_type(2);
        assert_eq!(field.sql_category().unwrap(), SqlTypeCategory::Decimal);
    }

    #[test]
    fn test_guid_classification() {
        let field = FieldDescriptor::new(SQL_TEXT + 1, CHARSET_OCTETS, 0, 16);
        assert_eq!(field.sql_category().unwrap(), SqlTypeCategory::Guid);
        let field = FieldDescriptor::new(SQL_TEXT + 1, CHARSET_OCTETS, 0, 8);
        assert_eq!(field.sql_category().unwrap(), SqlTypeCategory::Binary);
    }

    #[test]
    fn test_unknown_type_code() {
        let field = FieldDescriptor::new(444, 0, 0, 4);
        assert!(matches!(
            field.sql_category(),
            Err(crate::FbError::Marshaling(_))
        ));
    }
}
