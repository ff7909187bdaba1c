pub mod parts;
mod reply;

#[cfg(feature = "async")]
pub(crate) mod util_async;

pub(crate) mod util_sync;

pub use self::reply::{AcceptSecurity, GenericResponse, Response, ServerError};

// Operation codes of the wire protocol, sent as 4-byte big-endian words.
// Operations that are irrelevant for this driver core (events, services,
// administrative calls) are omitted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpCode {
    Connect = 1,        // Initial connection request with identification block
    Accept = 3,         // Server accepts, without attached security data
    Reject = 4,         // Server rejects the connection
    Disconnect = 6,     // Ends the session
    Response = 9,       // Generic response to most requests
    Attach = 19,        // Attach to a database
    Detach = 21,        // Detach from a database
    Transaction = 29,   // Start a transaction
    Commit = 30,        // Commit a transaction
    Rollback = 31,      // Roll back a transaction
    CancelBlob = 34,    // Abandon a blob
    OpenBlob = 35,      // Open an existing blob
    GetSegment = 36,    // Fetch one blob segment
    PutSegment = 37,    // Store one blob segment
    CloseBlob = 39,     // Close a blob
    CreateBlob = 57,    // Create a new blob
    SeekBlob = 61,      // Reposition within a blob
    AllocateStatement = 62, // Allocate a statement handle
    Execute = 63,       // Execute a prepared statement
    Fetch = 65,         // Fetch rows from an open cursor
    FetchResponse = 66, // Carries fetched rows
    FreeStatement = 67, // Release a statement handle
    PrepareStatement = 68, // Prepare an SQL statement
    SqlResponse = 78,   // Singleton row response
    Dummy = 71,         // Keep-alive packet, skipped wherever it appears
    ContAuth = 92,      // Continue the authentication conversation
    AcceptData = 94,    // Accept carrying security handshake data
    Crypt = 96,         // Activate wire encryption
    CryptKeyCallback = 97, // Server asks for a database crypt key
    CondAccept = 98,    // Accept, but the authentication is not yet complete
}

impl OpCode {
    pub(crate) fn try_from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Connect,
            3 => Self::Accept,
            4 => Self::Reject,
            6 => Self::Disconnect,
            9 => Self::Response,
            19 => Self::Attach,
            21 => Self::Detach,
            29 => Self::Transaction,
            30 => Self::Commit,
            31 => Self::Rollback,
            34 => Self::CancelBlob,
            35 => Self::OpenBlob,
            36 => Self::GetSegment,
            37 => Self::PutSegment,
            39 => Self::CloseBlob,
            57 => Self::CreateBlob,
            61 => Self::SeekBlob,
            62 => Self::AllocateStatement,
            63 => Self::Execute,
            65 => Self::Fetch,
            66 => Self::FetchResponse,
            67 => Self::FreeStatement,
            68 => Self::PrepareStatement,
            71 => Self::Dummy,
            78 => Self::SqlResponse,
            92 => Self::ContAuth,
            94 => Self::AcceptData,
            96 => Self::Crypt,
            97 => Self::CryptKeyCallback,
            98 => Self::CondAccept,
            _ => return None,
        })
    }
}

// Tags of the client identification block (1-byte tag, 1-byte length, payload).
pub(crate) mod cnct {
    pub const USER: u8 = 1;
    pub const HOST: u8 = 4;
    pub const USER_VERIFICATION: u8 = 6;
    pub const SPECIFIC_DATA: u8 = 7;
    pub const PLUGIN_NAME: u8 = 8;
    pub const LOGIN: u8 = 9;
    pub const PLUGIN_LIST: u8 = 10;
    pub const CLIENT_CRYPT: u8 = 11;
}

/// Wire encryption policy, as negotiated in the identification block.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum WireCryptLevel {
    /// Never encrypt, and refuse a server that insists on encryption.
    Disabled = 0,
    /// Encrypt if the server supports it.
    #[default]
    Enabled = 1,
    /// Fail the connection if encryption cannot be activated.
    Required = 2,
}

/// Lowest protocol version with support for the authentication plugin
/// conversation and wire encryption.
pub const PROTOCOL_VERSION_13: u16 = 13;

pub(crate) fn supports_wire_crypt(protocol_version: u16) -> bool {
    protocol_version >= PROTOCOL_VERSION_13
}
