use crate::{
    protocol::{util_sync, OpCode},
    FbError, FbResult,
};
use byteorder::{BigEndian, ReadBytesExt};

// Argument tags of the status vector trailing a generic response.
const ARG_END: u32 = 0;
const ARG_GDS: u32 = 1;
const ARG_STRING: u32 = 2;
const ARG_NUMBER: u32 = 4;
const ARG_INTERPRETED: u32 = 5;
const ARG_SQL_STATE: u32 = 19;

/// One entry of the status vector of a [`GenericResponse`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerError {
    code: u32,
    message: String,
}

impl ServerError {
    /// The server's error code.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// The interpreted or parameter text accompanying the code, if any.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "server error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServerError {}

/// The response to most requests: an object handle, a blob id, an opaque
/// data buffer, and the status vector.
#[derive(Clone, Debug, Default)]
pub struct GenericResponse {
    pub object_handle: u32,
    pub blob_id: u64,
    pub data: Vec<u8>,
    pub errors: Vec<ServerError>,
}

impl GenericResponse {
    pub fn is_error(&self) -> bool {
        self.errors.iter().any(|e| e.code != 0)
    }
}

/// Security handshake data carried by an accept-data or conditional-accept
/// response.
#[derive(Clone, Debug)]
pub struct AcceptSecurity {
    pub protocol_version: u16,
    pub architecture: u32,
    pub accept_type: u32,
    pub data: Vec<u8>,
    pub plugin_name: String,
    pub authenticated: bool,
    pub keys: Vec<u8>,
}

/// All response kinds a server may send, matched exhaustively by consumers.
/// Operation codes outside this set surface as [`FbError::Protocol`] at
/// parse time.
#[derive(Clone, Debug)]
pub enum Response {
    /// Plain accept of the protocol version, no attached security data.
    Accept {
        protocol_version: u16,
        architecture: u32,
        accept_type: u32,
    },
    /// Accept carrying handshake data; authentication may already be
    /// complete.
    AcceptData(AcceptSecurity),
    /// Accept, but the client must continue the authentication
    /// conversation.
    CondAccept(AcceptSecurity),
    /// The server wants another authentication round.
    ContAuth {
        data: Vec<u8>,
        plugin_name: String,
        plugin_list: String,
        keys: Vec<u8>,
    },
    /// The server asks for a database crypt key; resolved by the caller,
    /// never by the negotiator itself.
    CryptKeyCallback { data: Vec<u8> },
    /// Generic response.
    Generic(GenericResponse),
}

impl Response {
    /// Reads the next response from the channel. Keep-alive packets are
    /// skipped transparently.
    pub fn parse_sync(rdr: &mut dyn std::io::Read) -> FbResult<Response> {
        let op_code = loop {
            let raw = rdr.read_u32::<BigEndian>()?;
            let op_code = OpCode::try_from_u32(raw)
                .ok_or_else(|| FbError::Protocol(format!("unknown operation code {raw}")))?;
            if op_code != OpCode::Dummy {
                break op_code;
            }
            trace!("skipping keep-alive packet");
        };
        match op_code {
            OpCode::Accept => {
                let (protocol_version, architecture, accept_type) = parse_accept_words(rdr)?;
                Ok(Response::Accept {
                    protocol_version,
                    architecture,
                    accept_type,
                })
            }
            OpCode::AcceptData | OpCode::CondAccept => {
                let (protocol_version, architecture, accept_type) = parse_accept_words(rdr)?;
                let data = util_sync::parse_block(rdr)?;
                let plugin_name = util_sync::parse_string(rdr)?;
                let authenticated = rdr.read_u32::<BigEndian>()? != 0;
                let keys = util_sync::parse_block(rdr)?;
                let security = AcceptSecurity {
                    protocol_version,
                    architecture,
                    accept_type,
                    data,
                    plugin_name,
                    authenticated,
                    keys,
                };
                if op_code == OpCode::AcceptData {
                    Ok(Response::AcceptData(security))
                } else {
                    Ok(Response::CondAccept(security))
                }
            }
            OpCode::ContAuth => Ok(Response::ContAuth {
                data: util_sync::parse_block(rdr)?,
                plugin_name: util_sync::parse_string(rdr)?,
                plugin_list: util_sync::parse_string(rdr)?,
                keys: util_sync::parse_block(rdr)?,
            }),
            OpCode::CryptKeyCallback => Ok(Response::CryptKeyCallback {
                data: util_sync::parse_block(rdr)?,
            }),
            OpCode::Response => {
                let object_handle = rdr.read_u32::<BigEndian>()?;
                let blob_id = rdr.read_u64::<BigEndian>()?;
                let data = util_sync::parse_block(rdr)?;
                let errors = parse_status_vector(rdr)?;
                Ok(Response::Generic(GenericResponse {
                    object_handle,
                    blob_id,
                    data,
                    errors,
                }))
            }
            OpCode::Reject => Err(FbError::Protocol(
                "the server rejected the connection".to_string(),
            )),
            other => Err(FbError::Protocol(format!(
                "unexpected operation code {other:?}"
            ))),
        }
    }

    /// Suspendable form of [`Response::parse_sync`] with identical wire
    /// semantics.
    #[cfg(feature = "async")]
    pub async fn parse_async<R: tokio::io::AsyncReadExt + std::marker::Unpin>(
        rdr: &mut R,
    ) -> FbResult<Response> {
        use crate::protocol::util_async;
        let op_code = loop {
            let raw = rdr.read_u32().await?;
            let op_code = OpCode::try_from_u32(raw)
                .ok_or_else(|| FbError::Protocol(format!("unknown operation code {raw}")))?;
            if op_code != OpCode::Dummy {
                break op_code;
            }
            trace!("skipping keep-alive packet");
        };
        match op_code {
            OpCode::Accept => {
                let version_word = rdr.read_u32().await?;
                let architecture = rdr.read_u32().await?;
                let accept_type = rdr.read_u32().await?;
                Ok(Response::Accept {
                    protocol_version: mask_protocol_version(version_word),
                    architecture,
                    accept_type,
                })
            }
            OpCode::AcceptData | OpCode::CondAccept => {
                let version_word = rdr.read_u32().await?;
                let architecture = rdr.read_u32().await?;
                let accept_type = rdr.read_u32().await?;
                let data = util_async::parse_block(rdr).await?;
                let plugin_name = util_async::parse_string(rdr).await?;
                let authenticated = rdr.read_u32().await? != 0;
                let keys = util_async::parse_block(rdr).await?;
                let security = AcceptSecurity {
                    protocol_version: mask_protocol_version(version_word),
                    architecture,
                    accept_type,
                    data,
                    plugin_name,
                    authenticated,
                    keys,
                };
                if op_code == OpCode::AcceptData {
                    Ok(Response::AcceptData(security))
                } else {
                    Ok(Response::CondAccept(security))
                }
            }
            OpCode::ContAuth => Ok(Response::ContAuth {
                data: util_async::parse_block(rdr).await?,
                plugin_name: util_async::parse_string(rdr).await?,
                plugin_list: util_async::parse_string(rdr).await?,
                keys: util_async::parse_block(rdr).await?,
            }),
            OpCode::CryptKeyCallback => Ok(Response::CryptKeyCallback {
                data: util_async::parse_block(rdr).await?,
            }),
            OpCode::Response => {
                let object_handle = rdr.read_u32().await?;
                let blob_id = rdr.read_u64().await?;
                let data = util_async::parse_block(rdr).await?;
                let errors = parse_status_vector_async(rdr).await?;
                Ok(Response::Generic(GenericResponse {
                    object_handle,
                    blob_id,
                    data,
                    errors,
                }))
            }
            OpCode::Reject => Err(FbError::Protocol(
                "the server rejected the connection".to_string(),
            )),
            other => Err(FbError::Protocol(format!(
                "unexpected operation code {other:?}"
            ))),
        }
    }
}

fn parse_accept_words(rdr: &mut dyn std::io::Read) -> FbResult<(u16, u32, u32)> {
    let version_word = rdr.read_u32::<BigEndian>()?;
    let architecture = rdr.read_u32::<BigEndian>()?;
    let accept_type = rdr.read_u32::<BigEndian>()?;
    Ok((mask_protocol_version(version_word), architecture, accept_type))
}

// Servers flag modern protocol versions in the version word's high bit;
// only the low 15 bits carry the version number.
#[allow(clippy::cast_possible_truncation)]
fn mask_protocol_version(version_word: u32) -> u16 {
    (version_word & 0x7FFF) as u16
}

fn parse_status_vector(rdr: &mut dyn std::io::Read) -> FbResult<Vec<ServerError>> {
    let mut errors = Vec::new();
    let mut current: Option<ServerError> = None;
    loop {
        match rdr.read_u32::<BigEndian>()? {
            ARG_END => break,
            ARG_GDS => {
                let code = rdr.read_u32::<BigEndian>()?;
                if let Some(error) = current.take() {
                    errors.push(error);
                }
                if code != 0 {
                    current = Some(ServerError {
                        code,
                        message: String::new(),
                    });
                }
            }
            ARG_STRING | ARG_INTERPRETED | ARG_SQL_STATE => {
                let text = util_sync::parse_string(rdr)?;
                if let Some(ref mut error) = current {
                    if !error.message.is_empty() {
                        error.message.push_str(", ");
                    }
                    error.message.push_str(&text);
                }
            }
            ARG_NUMBER => {
                let number = rdr.read_u32::<BigEndian>()?;
                if let Some(ref mut error) = current {
                    if !error.message.is_empty() {
                        error.message.push_str(", ");
                    }
                    error.message.push_str(&number.to_string());
                }
            }
            other => {
                return Err(FbError::Protocol(format!(
                    "unknown status vector tag {other}"
                )));
            }
        }
    }
    if let Some(error) = current.take() {
        errors.push(error);
    }
    Ok(errors)
}

#[cfg(feature = "async")]
async fn parse_status_vector_async<R: tokio::io::AsyncReadExt + std::marker::Unpin>(
    rdr: &mut R,
) -> FbResult<Vec<ServerError>> {
    use crate::protocol::util_async;
    let mut errors = Vec::new();
    let mut current: Option<ServerError> = None;
    loop {
        match rdr.read_u32().await? {
            ARG_END => break,
            ARG_GDS => {
                let code = rdr.read_u32().await?;
                if let Some(error) = current.take() {
                    errors.push(error);
                }
                if code != 0 {
                    current = Some(ServerError {
                        code,
                        message: String::new(),
                    });
                }
            }
            ARG_STRING | ARG_INTERPRETED | ARG_SQL_STATE => {
                let text = util_async::parse_string(rdr).await?;
                if let Some(ref mut error) = current {
                    if !error.message.is_empty() {
                        error.message.push_str(", ");
                    }
                    error.message.push_str(&text);
                }
            }
            ARG_NUMBER => {
                let number = rdr.read_u32().await?;
                if let Some(ref mut error) = current {
                    if !error.message.is_empty() {
                        error.message.push_str(", ");
                    }
                    error.message.push_str(&number.to_string());
                }
            }
            other => {
                return Err(FbError::Protocol(format!(
                    "unknown status vector tag {other}"
                )));
            }
        }
    }
    if let Some(error) = current.take() {
        errors.push(error);
    }
    Ok(errors)
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::{BigEndian, WriteBytesExt};

    fn emit_block(bytes: &[u8], w: &mut Vec<u8>) {
        util_sync::emit_block(bytes, w).unwrap();
    }

    #[test]
    fn test_parse_generic_response() {
        let mut wire = Vec::new();
        wire.write_u32::<BigEndian>(9).unwrap(); // op_response
        wire.write_u32::<BigEndian>(17).unwrap(); // object handle
        wire.write_u64::<BigEndian>(0).unwrap(); // blob id
        emit_block(b"payload", &mut wire);
        wire.write_u32::<BigEndian>(ARG_GDS).unwrap();
        wire.write_u32::<BigEndian>(0).unwrap();
        wire.write_u32::<BigEndian>(ARG_END).unwrap();

        match Response::parse_sync(&mut std::io::Cursor::new(wire)).unwrap() {
            Response::Generic(response) => {
                assert_eq!(response.object_handle, 17);
                assert_eq!(response.data, b"payload");
                assert!(!response.is_error());
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_parse_skips_keep_alive() {
        let mut wire = Vec::new();
        wire.write_u32::<BigEndian>(71).unwrap(); // op_dummy
        wire.write_u32::<BigEndian>(71).unwrap();
        wire.write_u32::<BigEndian>(97).unwrap(); // op_crypt_key_callback
        emit_block(b"key-data", &mut wire);

        match Response::parse_sync(&mut std::io::Cursor::new(wire)).unwrap() {
            Response::CryptKeyCallback { data } => assert_eq!(data, b"key-data"),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_accept_version_word_is_masked() {
        let mut wire = Vec::new();
        wire.write_u32::<BigEndian>(3).unwrap(); // op_accept
        wire.write_u32::<BigEndian>(0x0000_800D).unwrap();
        wire.write_u32::<BigEndian>(1).unwrap();
        wire.write_u32::<BigEndian>(0).unwrap();

        match Response::parse_sync(&mut std::io::Cursor::new(wire)).unwrap() {
            Response::Accept {
                protocol_version, ..
            } => assert_eq!(protocol_version, 13),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_op_code_is_protocol_violation() {
        let mut wire = Vec::new();
        wire.write_u32::<BigEndian>(30).unwrap(); // op_commit, never a response
        assert!(matches!(
            Response::parse_sync(&mut std::io::Cursor::new(wire)),
            Err(FbError::Protocol(_))
        ));
    }

    #[test]
    fn test_status_vector_with_error() {
        let mut wire = Vec::new();
        wire.write_u32::<BigEndian>(9).unwrap();
        wire.write_u32::<BigEndian>(0).unwrap();
        wire.write_u64::<BigEndian>(0).unwrap();
        emit_block(b"", &mut wire);
        wire.write_u32::<BigEndian>(ARG_GDS).unwrap();
        wire.write_u32::<BigEndian>(335_544_344).unwrap();
        wire.write_u32::<BigEndian>(ARG_INTERPRETED).unwrap();
        emit_block(b"I/O error", &mut wire);
        wire.write_u32::<BigEndian>(ARG_END).unwrap();

        match Response::parse_sync(&mut std::io::Cursor::new(wire)).unwrap() {
            Response::Generic(response) => {
                assert!(response.is_error());
                assert_eq!(response.errors[0].code(), 335_544_344);
                assert_eq!(response.errors[0].message(), "I/O error");
            }
            other => panic!("unexpected response {other:?}"),
        }
    }
}
