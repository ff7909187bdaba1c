use crate::protocol::ServerError;
use thiserror::Error;

/// A list specifying categories of [`FbError`](crate::FbError).
///
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FbError {
    /// The server sent a response or operation code that is not valid at the
    /// current point of the conversation. The connection must be discarded.
    #[error("Protocol violation: {}", _0)]
    Protocol(String),

    /// Wire encryption is required by the configured policy, the negotiated
    /// protocol version supports it, but no encryption could be activated.
    #[error("Incompatible wire encryption levels requested on client and server")]
    WireCryptIncompatible,

    /// Error occured in communication with the database.
    #[error(transparent)]
    Io {
        /// The causing Error.
        #[from]
        source: std::io::Error,
    },

    /// Database server responded with an error; the contained
    /// [`ServerError`] describes the concrete reason.
    #[error("Database server responded with an error")]
    Db {
        /// The causing Error.
        #[from]
        source: ServerError,
    },

    /// The authentication plugin requested by the server matches none of the
    /// plugins this client supports.
    #[error("Unsupported authentication plugin: {}", _0)]
    UnsupportedPlugin(String),

    /// A named parameter referenced by the statement has no corresponding
    /// bound value.
    #[error("No value is bound for parameter {}", _0)]
    ParameterBinding(String),

    /// A type code or length outside the supported range was used;
    /// this is a programming error, not retried.
    #[error("Marshaling error: {}", _0)]
    Marshaling(String),

    /// Implementation error.
    #[error("Implementation error: {}", _0)]
    Impl(&'static str),

    /// Implementation error.
    #[error("Implementation error: {}", _0)]
    ImplDetailed(String),

    /// Error caused by wrong usage.
    #[error("Wrong usage: {}", _0)]
    Usage(&'static str),
}

/// Abbreviation of `Result<T, FbError>`.
pub type FbResult<T> = std::result::Result<T, FbError>;

impl FbError {
    /// Reveal the inner error, if any.
    pub fn inner(&self) -> Option<&dyn std::error::Error> {
        match self {
            Self::Io { source } => Some(source),
            Self::Db { source } => Some(source),
            _ => None,
        }
    }

    /// Returns the contained [`ServerError`], if any.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Db { source } => Some(source),
            _ => None,
        }
    }

    /// Returns the parameter name for a [`FbError::ParameterBinding`].
    pub fn parameter_name(&self) -> Option<&str> {
        match self {
            Self::ParameterBinding(name) => Some(name),
            _ => None,
        }
    }
}
