use crate::{
    conn::authentication::srp::{ProofHash, SrpClient},
    conn::authentication::user_identification::normalize_login,
    FbError, FbResult,
};
use secstr::SecUtf8;

pub(crate) const PLUGIN_SRP256: &str = "Srp256";
pub(crate) const PLUGIN_SRP: &str = "Srp";
pub(crate) const PLUGIN_SSPI: &str = "Win_Sspi";

/// The identity a connection authenticates with.
#[derive(Clone, Debug)]
pub enum Identity {
    /// Login and password supplied by the caller.
    Interactive {
        login: String,
        password: SecUtf8,
    },
    /// The operating-system identity of the process.
    Integrated,
}

impl Identity {
    pub fn interactive<L: AsRef<str>, P: AsRef<str>>(login: L, password: P) -> Self {
        Self::Interactive {
            login: login.as_ref().to_string(),
            password: SecUtf8::from(password.as_ref()),
        }
    }

    /// The login in its normalized form, or none for integrated identities.
    pub fn normalized_login(&self) -> Option<String> {
        match self {
            Self::Interactive { login, .. } => Some(normalize_login(login)),
            Self::Integrated => None,
        }
    }
}

/// The plugin names offered for an identity, in preference order.
///
/// A pure function of the identity: interactive logins offer the two
/// password-proof plugins, an integrated identity exactly the
/// OS-integrated one.
pub fn plugin_preference(identity: &Identity) -> &'static [&'static str] {
    match identity {
        Identity::Interactive { .. } => &[PLUGIN_SRP256, PLUGIN_SRP],
        Identity::Integrated => &[PLUGIN_SSPI],
    }
}

/// One authentication mechanism, driven through the negotiation rounds.
pub(crate) trait AuthPlugin: Send {
    fn name(&self) -> &'static str;

    /// Key material offered to the server before any challenge arrived.
    fn public_data(&self) -> Vec<u8>;

    /// Computes the client proof against the server's challenge data.
    /// May be called again when a later round supplies new server data.
    fn compute_proof(
        &mut self,
        login: &str,
        password: &SecUtf8,
        server_data: &[u8],
    ) -> FbResult<Vec<u8>>;

    /// The session key derived during proof computation, if any.
    fn session_key(&self) -> Option<&[u8]>;

    /// Drops all cryptographic material held for the negotiation.
    fn release(&mut self);
}

impl std::fmt::Debug for dyn AuthPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPlugin")
            .field("name", &self.name())
            .finish()
    }
}

pub(crate) fn create_plugin(name: &str) -> FbResult<Box<dyn AuthPlugin>> {
    match name {
        PLUGIN_SRP256 => Ok(Box::new(SrpPlugin::new(PLUGIN_SRP256, ProofHash::Sha256))),
        PLUGIN_SRP => Ok(Box::new(SrpPlugin::new(PLUGIN_SRP, ProofHash::Sha1))),
        // this client carries no SSPI binding; the selection logic still
        // names the plugin so servers can refuse cleanly
        PLUGIN_SSPI => Err(FbError::UnsupportedPlugin(PLUGIN_SSPI.to_string())),
        other => Err(FbError::UnsupportedPlugin(other.to_string())),
    }
}

struct SrpPlugin {
    name: &'static str,
    client: Option<SrpClient>,
    session_key: Option<Vec<u8>>,
}

impl SrpPlugin {
    fn new(name: &'static str, proof_hash: ProofHash) -> Self {
        Self {
            name,
            client: Some(SrpClient::new(proof_hash)),
            session_key: None,
        }
    }
}

impl AuthPlugin for SrpPlugin {
    fn name(&self) -> &'static str {
        self.name
    }

    fn public_data(&self) -> Vec<u8> {
        self.client
            .as_ref()
            .map(|client| client.public_key_hex().into_bytes())
            .unwrap_or_default()
    }

    fn compute_proof(
        &mut self,
        login: &str,
        password: &SecUtf8,
        server_data: &[u8],
    ) -> FbResult<Vec<u8>> {
        let client = self
            .client
            .as_ref()
            .ok_or(FbError::Impl("proof requested after release"))?;
        let (salt, server_public) = super::srp::parse_server_challenge(server_data)?;
        let (session_key, proof) =
            client.client_session(login, password.unsecure(), &salt, &server_public)?;
        self.session_key = Some(session_key);
        Ok(hex::encode(proof).into_bytes())
    }

    fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }

    fn release(&mut self) {
        self.client = None;
    }
}

impl Drop for SrpPlugin {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_selection_is_pure() {
        let identity = Identity::interactive("sysdba", "masterkey");
        assert_eq!(plugin_preference(&identity), &[PLUGIN_SRP256, PLUGIN_SRP]);
        assert_eq!(plugin_preference(&identity), &[PLUGIN_SRP256, PLUGIN_SRP]);
        assert_eq!(plugin_preference(&Identity::Integrated), &[PLUGIN_SSPI]);
    }

    #[test]
    fn test_unsupported_plugin() {
        match create_plugin("Legacy_Auth") {
            Err(FbError::UnsupportedPlugin(name)) => assert_eq!(name, "Legacy_Auth"),
            other => panic!("expected UnsupportedPlugin, got {other:?}"),
        }
    }

    #[test]
    fn test_srp_plugin_offers_hex_public_data() {
        let plugin = create_plugin(PLUGIN_SRP256).unwrap();
        let data = plugin.public_data();
        assert!(!data.is_empty());
        assert!(data.iter().all(u8::is_ascii_hexdigit));
    }
}
