use crate::{
    conn::{
        authentication::{
            authenticator::{create_plugin, plugin_preference, AuthPlugin, Identity},
            user_identification::ClientIdentification,
        },
        wire_crypt,
    },
    protocol::{
        supports_wire_crypt, util_sync, AcceptSecurity, OpCode, Response, WireCryptLevel,
    },
    FbError, FbResult,
};
use byteorder::{BigEndian, WriteBytesExt};

// Fixed words of the connection request.
const CONNECT_VERSION: u32 = 3;
const ARCH_GENERIC: u32 = 1;
const PROTOCOL_FLAG: u32 = 0x8000;
const PTYPE_MIN: u32 = 2;
const PTYPE_MAX: u32 = 5;

/// States of the authentication negotiation.
///
/// Every received response kind has exactly one transition function;
/// the crypt-key-callback response is a valid non-terminal transition that
/// leaves the state unchanged.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AuthState {
    Start,
    PluginSelected,
    AwaitingServerData,
    HasClientProof,
    ContAuthSent,
    Authenticated,
    WireCryptPending,
    WireCryptActive,
    Released,
}

/// Outcome of one response transition.
#[derive(Debug)]
pub enum AuthStep {
    /// Another round is needed: re-send the continuation message.
    Continue,
    /// The server asks for a database crypt key. Returned to the caller
    /// unresolved; the negotiation state does not advance.
    CryptKeyCallback(Vec<u8>),
    /// Authentication completed.
    Complete,
}

/// Drives the multi-round handshake that authenticates a connection and
/// optionally activates wire encryption.
///
/// Created per connection attempt; all cryptographic material is released
/// on completion or abandonment.
pub struct AuthNegotiator {
    identity: Identity,
    wire_crypt_policy: WireCryptLevel,
    state: AuthState,
    plugin: Option<Box<dyn AuthPlugin>>,
    client_data: Vec<u8>,
    server_keys: Vec<u8>,
    session_key: Option<Vec<u8>>,
    session_key_name: &'static str,
    protocol_version: u16,
}

impl std::fmt::Debug for AuthNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        f.debug_struct("AuthNegotiator")
            .field("state", &self.state)
            .field("wire_crypt_policy", &self.wire_crypt_policy)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

impl AuthNegotiator {
    pub fn new(identity: Identity, wire_crypt_policy: WireCryptLevel) -> Self {
        Self {
            identity,
            wire_crypt_policy,
            state: AuthState::Start,
            plugin: None,
            client_data: Vec::new(),
            server_keys: Vec::new(),
            session_key: None,
            session_key_name: wire_crypt::SESSION_KEY_NAME,
            protocol_version: 0,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            AuthState::Authenticated | AuthState::WireCryptPending | AuthState::WireCryptActive
        )
    }

    /// The session key derived during the handshake, while not yet released.
    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Builds the connection request: operation words, the target database,
    /// the client identification block, and the offered protocol
    /// descriptor.
    pub fn connect_message(&mut self, database: &str) -> FbResult<Vec<u8>> {
        let plugin_names = plugin_preference(&self.identity);
        let plugin = create_plugin(plugin_names[0])?;
        debug!("proposing {}", plugin.name());
        let specific_data = plugin.public_data();
        let login = self.identity.normalized_login();

        let identification = ClientIdentification {
            login: login.as_deref(),
            plugin_names,
            specific_data: &specific_data,
            wire_crypt: self.wire_crypt_policy,
        }
        .to_bytes();

        let mut message = Vec::with_capacity(64 + identification.len());
        message.write_u32::<BigEndian>(OpCode::Connect as u32)?;
        message.write_u32::<BigEndian>(OpCode::Attach as u32)?;
        message.write_u32::<BigEndian>(CONNECT_VERSION)?;
        message.write_u32::<BigEndian>(ARCH_GENERIC)?;
        util_sync::emit_block(database.as_bytes(), &mut message)?;
        message.write_u32::<BigEndian>(1)?; // one offered protocol
        util_sync::emit_block(&identification, &mut message)?;
        // the offered protocol descriptor: version, architecture, the
        // supported packet-type window, and its preference weight
        message.write_u32::<BigEndian>(PROTOCOL_FLAG | u32::from(crate::protocol::PROTOCOL_VERSION_13))?;
        message.write_u32::<BigEndian>(ARCH_GENERIC)?;
        message.write_u32::<BigEndian>(PTYPE_MIN)?;
        message.write_u32::<BigEndian>(PTYPE_MAX)?;
        message.write_u32::<BigEndian>(2)?;

        self.client_data = specific_data;
        self.plugin = Some(plugin);
        self.state = AuthState::PluginSelected;
        Ok(message)
    }

    /// Transition for the accept responses carrying security data.
    pub fn handle_accept(&mut self, security: &AcceptSecurity) -> FbResult<()> {
        if self.state != AuthState::PluginSelected {
            return Err(FbError::Protocol(format!(
                "accept received in state {:?}",
                self.state
            )));
        }
        self.protocol_version = security.protocol_version;
        if !security.keys.is_empty() {
            self.server_keys = security.keys.clone();
        }
        self.switch_plugin_if_needed(&security.plugin_name)?;

        if security.authenticated {
            self.complete();
        } else if security.data.is_empty() {
            self.state = AuthState::AwaitingServerData;
        } else {
            self.compute_client_data(&security.data)?;
        }
        Ok(())
    }

    /// Transition for a plain accept without security data: the server
    /// negotiated a protocol version below the plugin conversation.
    pub fn handle_plain_accept(&mut self, protocol_version: u16) {
        self.protocol_version = protocol_version;
        self.complete();
    }

    /// Transition per received response kind after the continuation message
    /// was sent.
    pub fn handle_response(&mut self, response: Response) -> FbResult<AuthStep> {
        if self.state != AuthState::ContAuthSent {
            return Err(FbError::Protocol(format!(
                "response received in state {:?}",
                self.state
            )));
        }
        match response {
            Response::ContAuth {
                data,
                plugin_name,
                keys,
                ..
            } => {
                trace!("continuation round with {} bytes of server data", data.len());
                if !keys.is_empty() {
                    self.server_keys = keys;
                }
                self.switch_plugin_if_needed(&plugin_name)?;
                self.compute_client_data(&data)?;
                Ok(AuthStep::Continue)
            }
            Response::CryptKeyCallback { data } => Ok(AuthStep::CryptKeyCallback(data)),
            Response::Generic(generic) => {
                if generic.is_error() {
                    let error = generic
                        .errors
                        .into_iter()
                        .find(|e| e.code() != 0)
                        .expect("is_error() implies an error entry");
                    return Err(FbError::from(error));
                }
                if !generic.data.is_empty() {
                    self.server_keys = generic.data;
                }
                self.complete();
                Ok(AuthStep::Complete)
            }
            other => Err(FbError::Protocol(format!(
                "unexpected response during authentication: {other:?}"
            ))),
        }
    }

    /// The continuation message: client data (proof if computed, else the
    /// public key material), the plugin name as both accepted name and
    /// plugin list, and any server key material echoed back.
    pub fn cont_auth_message(&mut self) -> FbResult<Vec<u8>> {
        let plugin_name = self
            .plugin
            .as_ref()
            .ok_or(FbError::Impl("no plugin selected"))?
            .name();
        let mut message = Vec::with_capacity(16 + self.client_data.len());
        message.write_u32::<BigEndian>(OpCode::ContAuth as u32)?;
        util_sync::emit_block(&self.client_data, &mut message)?;
        util_sync::emit_block(plugin_name.as_bytes(), &mut message)?;
        util_sync::emit_block(plugin_name.as_bytes(), &mut message)?;
        util_sync::emit_block(&self.server_keys, &mut message)?;
        self.state = AuthState::ContAuthSent;
        Ok(message)
    }

    /// The reply to a crypt-key callback; an empty key when the caller has
    /// none to offer.
    pub fn crypt_key_callback_message(key_data: &[u8]) -> FbResult<Vec<u8>> {
        let mut message = Vec::with_capacity(8 + key_data.len());
        message.write_u32::<BigEndian>(OpCode::CryptKeyCallback as u32)?;
        util_sync::emit_block(key_data, &mut message)?;
        Ok(message)
    }

    /// The encryption-activation message: cipher name and session key name.
    pub fn crypt_message(&self) -> FbResult<Vec<u8>> {
        let mut message = Vec::with_capacity(24);
        message.write_u32::<BigEndian>(OpCode::Crypt as u32)?;
        util_sync::emit_block(wire_crypt::CIPHER_NAME.as_bytes(), &mut message)?;
        util_sync::emit_block(self.session_key_name.as_bytes(), &mut message)?;
        Ok(message)
    }

    pub(crate) fn wants_wire_crypt(&self) -> bool {
        self.wire_crypt_policy != WireCryptLevel::Disabled
            && supports_wire_crypt(self.protocol_version)
            && self.session_key.is_some()
    }

    pub(crate) fn mark_wire_crypt_pending(&mut self) {
        self.state = AuthState::WireCryptPending;
    }

    pub(crate) fn mark_wire_crypt_active(&mut self) {
        self.state = AuthState::WireCryptActive;
    }

    /// Raised at the end of the connection sequence, not earlier: a
    /// required policy with a crypt-capable protocol version and no
    /// completed activation is fatal.
    pub fn validate_policy(&self) -> FbResult<()> {
        if self.wire_crypt_policy == WireCryptLevel::Required
            && supports_wire_crypt(self.protocol_version)
            && self.state != AuthState::WireCryptActive
        {
            return Err(FbError::WireCryptIncompatible);
        }
        Ok(())
    }

    /// Zeroes and drops all cryptographic material.
    pub fn release(&mut self) {
        if let Some(mut plugin) = self.plugin.take() {
            plugin.release();
        }
        if let Some(mut key) = self.session_key.take() {
            key.fill(0);
        }
        self.client_data.clear();
        self.server_keys.clear();
        self.state = AuthState::Released;
    }

    fn switch_plugin_if_needed(&mut self, server_chosen: &str) -> FbResult<()> {
        if server_chosen.is_empty() {
            return Ok(());
        }
        let current = self.plugin.as_ref().map(|p| p.name());
        if current == Some(server_chosen) {
            return Ok(());
        }
        if !plugin_preference(&self.identity).contains(&server_chosen) {
            return Err(FbError::UnsupportedPlugin(server_chosen.to_string()));
        }
        debug!("server chose {server_chosen}");
        let plugin = create_plugin(server_chosen)?;
        self.client_data = plugin.public_data();
        self.plugin = Some(plugin);
        Ok(())
    }

    fn compute_client_data(&mut self, server_data: &[u8]) -> FbResult<()> {
        let (login, password) = match self.identity {
            Identity::Interactive {
                ref login,
                ref password,
            } => (
                super::user_identification::normalize_login(login),
                password.clone(),
            ),
            Identity::Integrated => {
                return Err(FbError::Impl(
                    "an integrated identity cannot compute a password proof",
                ));
            }
        };
        let plugin = self
            .plugin
            .as_mut()
            .ok_or(FbError::Impl("no plugin selected"))?;
        self.client_data = plugin.compute_proof(&login, &password, server_data)?;
        self.state = AuthState::HasClientProof;
        Ok(())
    }

    // Completing the handshake releases every per-negotiation secret; only
    // the session key survives, for the encryption layer.
    fn complete(&mut self) {
        if let Some(mut plugin) = self.plugin.take() {
            self.session_key = plugin.session_key().map(<[u8]>::to_vec);
            plugin.release();
        }
        self.client_data.clear();
        self.state = AuthState::Authenticated;
        debug!("authenticated");
    }
}

impl Drop for AuthNegotiator {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs the complete negotiation over a blocking channel: connection
/// request, plugin rounds, optional wire-encryption activation, policy
/// validation.
#[cfg(feature = "sync")]
pub fn authenticate_sync<S: std::io::Read + std::io::Write>(
    channel: &mut crate::conn::WireChannel<S>,
    database: &str,
    identity: Identity,
    wire_crypt_policy: WireCryptLevel,
) -> FbResult<AuthNegotiator> {
    use std::io::Write;

    trace!("authenticate()");
    let mut negotiator = AuthNegotiator::new(identity, wire_crypt_policy);
    let connect = negotiator.connect_message(database)?;
    channel.write_all(&connect)?;
    channel.flush()?;

    match Response::parse_sync(channel)? {
        Response::Accept {
            protocol_version, ..
        } => negotiator.handle_plain_accept(protocol_version),
        Response::AcceptData(security) | Response::CondAccept(security) => {
            negotiator.handle_accept(&security)?;
            while negotiator.state() != AuthState::Authenticated {
                let message = negotiator.cont_auth_message()?;
                channel.write_all(&message)?;
                channel.flush()?;
                loop {
                    match negotiator.handle_response(Response::parse_sync(channel)?)? {
                        AuthStep::Continue | AuthStep::Complete => break,
                        AuthStep::CryptKeyCallback(_ignored) => {
                            // no database key on this side: answer with an
                            // empty key and keep waiting in the same state
                            let reply = AuthNegotiator::crypt_key_callback_message(&[])?;
                            channel.write_all(&reply)?;
                            channel.flush()?;
                        }
                    }
                }
            }
        }
        other => {
            return Err(FbError::Protocol(format!(
                "unexpected response to the connection request: {other:?}"
            )));
        }
    }

    if negotiator.wants_wire_crypt() {
        let message = negotiator.crypt_message()?;
        channel.write_all(&message)?;
        channel.flush()?;
        negotiator.mark_wire_crypt_pending();
        // outbound encryption starts now; the confirmation is read under it
        let key = negotiator
            .session_key()
            .expect("wants_wire_crypt() implies a session key")
            .to_vec();
        channel.start_encryption(&key);
        match Response::parse_sync(channel)? {
            Response::Generic(generic) if !generic.is_error() => {
                negotiator.mark_wire_crypt_active();
            }
            Response::Generic(generic) => {
                let error = generic
                    .errors
                    .into_iter()
                    .find(|e| e.code() != 0)
                    .expect("is_error() implies an error entry");
                return Err(FbError::from(error));
            }
            other => {
                return Err(FbError::Protocol(format!(
                    "unexpected response to the encryption activation: {other:?}"
                )));
            }
        }
    }

    negotiator.validate_policy()?;
    Ok(negotiator)
}

/// Suspendable form of [`authenticate_sync`] with identical wire semantics.
#[cfg(feature = "async")]
pub async fn authenticate_async<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
    channel: &mut crate::conn::AsyncWireChannel<S>,
    database: &str,
    identity: Identity,
    wire_crypt_policy: WireCryptLevel,
) -> FbResult<AuthNegotiator> {
    use tokio::io::AsyncWriteExt;

    trace!("authenticate()");
    let mut negotiator = AuthNegotiator::new(identity, wire_crypt_policy);
    let connect = negotiator.connect_message(database)?;
    channel.write_all(&connect).await?;
    channel.flush().await?;

    match Response::parse_async(channel).await? {
        Response::Accept {
            protocol_version, ..
        } => negotiator.handle_plain_accept(protocol_version),
        Response::AcceptData(security) | Response::CondAccept(security) => {
            negotiator.handle_accept(&security)?;
            while negotiator.state() != AuthState::Authenticated {
                let message = negotiator.cont_auth_message()?;
                channel.write_all(&message).await?;
                channel.flush().await?;
                loop {
                    match negotiator.handle_response(Response::parse_async(channel).await?)? {
                        AuthStep::Continue | AuthStep::Complete => break,
                        AuthStep::CryptKeyCallback(_ignored) => {
                            let reply = AuthNegotiator::crypt_key_callback_message(&[])?;
                            channel.write_all(&reply).await?;
                            channel.flush().await?;
                        }
                    }
                }
            }
        }
        other => {
            return Err(FbError::Protocol(format!(
                "unexpected response to the connection request: {other:?}"
            )));
        }
    }

    if negotiator.wants_wire_crypt() {
        let message = negotiator.crypt_message()?;
        channel.write_all(&message).await?;
        channel.flush().await?;
        negotiator.mark_wire_crypt_pending();
        let key = negotiator
            .session_key()
            .expect("wants_wire_crypt() implies a session key")
            .to_vec();
        channel.start_encryption(&key);
        match Response::parse_async(channel).await? {
            Response::Generic(generic) if !generic.is_error() => {
                negotiator.mark_wire_crypt_active();
            }
            Response::Generic(generic) => {
                let error = generic
                    .errors
                    .into_iter()
                    .find(|e| e.code() != 0)
                    .expect("is_error() implies an error entry");
                return Err(FbError::from(error));
            }
            other => {
                return Err(FbError::Protocol(format!(
                    "unexpected response to the encryption activation: {other:?}"
                )));
            }
        }
    }

    negotiator.validate_policy()?;
    Ok(negotiator)
}
