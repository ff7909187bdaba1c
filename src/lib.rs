//! A pure-rust driver core for the Firebird-family wire protocol.
//!
//! This crate covers the failure-sensitive layers of the driver: the
//! authentication handshake with pluggable mechanisms and optional wire
//! encryption, the null-bitmap row codec of the statement protocol, the
//! descriptor model with its compiled binary type-descriptor, the native
//! fixed-layout marshaling path, and blob streaming.
//!
//! Every operation that touches the byte channel exists in a blocking form
//! (feature `sync`) and a suspendable form (feature `async`) with identical
//! wire semantics; both features are on by default.

#![deny(missing_debug_implementations)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![cfg_attr(not(any(feature = "sync", feature = "async")), allow(unused_imports))]
#![cfg_attr(not(any(feature = "sync", feature = "async")), allow(dead_code))]

#[macro_use]
extern crate log;

mod conn;
mod fb_error;
mod native;
mod protocol;
mod row;
mod types_impl;

#[cfg(feature = "async")]
pub use crate::conn::authentication::authenticate_async;
#[cfg(feature = "sync")]
pub use crate::conn::authentication::authenticate_sync;

pub use crate::conn::authentication::{
    normalize_login, plugin_preference, AuthNegotiator, AuthState, AuthStep, Identity,
    SESSION_KEY_LENGTH,
};

#[cfg(feature = "async")]
pub use crate::conn::AsyncWireChannel;
#[cfg(feature = "sync")]
pub use crate::conn::WireChannel;

pub use crate::conn::{Arc4, CIPHER_NAME, SESSION_KEY_NAME};

pub use crate::fb_error::{FbError, FbResult};

pub use crate::native::{
    read_row_values, write_values, NativeDescriptorArea, IND_NOT_NULL, IND_NULL,
};

pub use crate::protocol::{
    parts::{
        BlobId, BlrBuffer, DbValue, FieldDescriptor, NamedParameterMap, ParamCollection,
        Revisioned, RowCodec, RowDescriptor, SqlTypeCategory,
    },
    AcceptSecurity, GenericResponse, OpCode, Response, ServerError, WireCryptLevel,
    PROTOCOL_VERSION_13,
};

pub use crate::row::Row;

#[cfg(feature = "async")]
pub use crate::types_impl::blob::AsyncSegmentedBlob;
#[cfg(feature = "sync")]
pub use crate::types_impl::blob::SegmentedBlob;

/// Blob-related types.
pub mod types {
    #[cfg(feature = "async")]
    pub use crate::types_impl::blob::AsyncBlobStream;
    #[cfg(feature = "sync")]
    pub use crate::types_impl::blob::BlobStream;
    pub use crate::types_impl::blob::SeekMode;
}

/// Default number of bytes requested per blob segment roundtrip.
pub const DEFAULT_BLOB_SEGMENT_SIZE: u16 = 16_384;
