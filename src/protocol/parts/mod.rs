mod blr;
pub(crate) mod db_value;
mod named_params;
mod row_codec;
mod row_descriptor;

pub use self::{
    blr::BlrBuffer,
    db_value::{BlobId, DbValue},
    named_params::{NamedParameterMap, ParamCollection, Revisioned},
    row_codec::RowCodec,
    row_descriptor::{FieldDescriptor, RowDescriptor, SqlTypeCategory},
};

pub(crate) use self::row_descriptor::{
    CHARSET_OCTETS, CHARSET_UTF8, SQL_ARRAY, SQL_BLOB, SQL_BOOLEAN, SQL_DOUBLE, SQL_FLOAT,
    SQL_INT128, SQL_INT64, SQL_LONG, SQL_QUAD, SQL_SHORT, SQL_TEXT, SQL_TIMESTAMP, SQL_TYPE_DATE,
    SQL_TYPE_TIME, SQL_VARYING,
};
