use crate::{FbError, FbResult};
use byteorder::{LittleEndian, ReadBytesExt};
use num_bigint::BigUint;
use rand::{thread_rng, RngCore};
use sha1::{Digest, Sha1};
use sha2::Sha256;

// The fixed 1024-bit group of the password-proof key exchange.
const PRIME_HEX: &str = "E67D2E994B2F900C3F41F08F5BB2627ED0D49EE1FE767A52EFCD565CD6E76881\
                         2C3E1E9CE8F0A8BEA6CB13CD29DDEBF7A96D4A93B10D8F0AAEB4D8B95557CBC3\
                         B2C9113C36FC6AA94DF1712EE48C8940E229F42A8295B055FDF676249B051C21\
                         1ABEA912319332EC7B32395815FF88C882F92475BC5A3062E113C82979FC9F25";
const GENERATOR: u8 = 2;

/// Length of the derived session key: one SHA-1 digest.
pub const SESSION_KEY_LENGTH: usize = 20;

// Hash used for the client proof; the session key derivation is SHA-1 in
// both plugin variants.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ProofHash {
    Sha1,
    Sha256,
}

pub(crate) struct SrpClient {
    prime: BigUint,
    generator: BigUint,
    secret: BigUint,
    public: BigUint,
    proof_hash: ProofHash,
}

impl std::fmt::Debug for SrpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "SrpClient {{ proof_hash: {:?}, .. }}", self.proof_hash)
    }
}

impl SrpClient {
    pub(crate) fn new(proof_hash: ProofHash) -> Self {
        let mut ephemeral = [0_u8; 64];
        thread_rng().fill_bytes(&mut ephemeral);
        Self::with_secret(proof_hash, &ephemeral)
    }

    pub(crate) fn with_secret(proof_hash: ProofHash, secret: &[u8]) -> Self {
        let prime = BigUint::parse_bytes(PRIME_HEX.as_bytes(), 16)
            .expect("the group prime is a valid hex literal");
        let generator = BigUint::from(GENERATOR);
        let secret = BigUint::from_bytes_be(secret) % &prime;
        let public = generator.modpow(&secret, &prime);
        Self {
            prime,
            generator,
            secret,
            public,
            proof_hash,
        }
    }

    /// The client public key, hex-encoded for transport.
    pub(crate) fn public_key_hex(&self) -> String {
        hex::encode(self.public.to_bytes_be())
    }

    /// Derives the shared session key and the client proof from the server's
    /// challenge (salt and server public key).
    pub(crate) fn client_session(
        &self,
        account: &str,
        password: &str,
        salt: &[u8],
        server_public: &BigUint,
    ) -> FbResult<(Vec<u8>, Vec<u8>)> {
        if server_public % &self.prime == BigUint::from(0_u8) {
            return Err(FbError::Protocol(
                "the server's public key is a multiple of the group prime".to_string(),
            ));
        }

        let scramble = BigUint::from_bytes_be(&sha1_of(&[
            &self.public.to_bytes_be(),
            &server_public.to_bytes_be(),
        ]));
        let multiplier = BigUint::from_bytes_be(&sha1_of(&[
            &self.prime.to_bytes_be(),
            &self.generator.to_bytes_be(),
        ]));

        let user_hash = sha1_of(&[account.as_bytes(), b":", password.as_bytes()]);
        let x = BigUint::from_bytes_be(&sha1_of(&[salt, &user_hash]));

        // S = (B - k * g^x) ^ (a + u * x)  mod N
        let gx = self.generator.modpow(&x, &self.prime);
        let kgx = (&multiplier * &gx) % &self.prime;
        let base = (server_public + &self.prime - &kgx) % &self.prime;
        let exponent = &self.secret + &scramble * &x;
        let shared = base.modpow(&exponent, &self.prime);

        let session_key = sha1_of(&[&shared.to_bytes_be()]);
        let proof = self.client_proof(account, salt, server_public, &session_key);
        Ok((session_key, proof))
    }

    // M = H(N', H1(account), salt, A, B, K), with N' carrying the group
    // parameters folded together the way the servers expect them.
    fn client_proof(
        &self,
        account: &str,
        salt: &[u8],
        server_public: &BigUint,
        session_key: &[u8],
    ) -> Vec<u8> {
        let n1 = BigUint::from_bytes_be(&sha1_of(&[&self.prime.to_bytes_be()]));
        let n2 = BigUint::from_bytes_be(&sha1_of(&[&self.generator.to_bytes_be()]));
        let folded = n1.modpow(&n2, &self.prime);

        let parts: [&[u8]; 6] = [
            &folded.to_bytes_be(),
            &sha1_of(&[account.as_bytes()]),
            salt,
            &self.public.to_bytes_be(),
            &server_public.to_bytes_be(),
            session_key,
        ];
        match self.proof_hash {
            ProofHash::Sha1 => sha1_of(&parts),
            ProofHash::Sha256 => {
                let mut hasher = Sha256::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
        }
    }
}

fn sha1_of(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Splits the server challenge into salt and server public key. Both are
/// 16-bit length-prefixed (little-endian); the key travels hex-encoded.
pub(crate) fn parse_server_challenge(server_data: &[u8]) -> FbResult<(Vec<u8>, BigUint)> {
    let mut rdr = std::io::Cursor::new(server_data);
    let salt = read_prefixed(&mut rdr)?;
    let key_hex = read_prefixed(&mut rdr)?;
    let server_public = BigUint::parse_bytes(&key_hex, 16).ok_or_else(|| {
        FbError::Protocol("the server public key is not valid hex".to_string())
    })?;
    Ok((salt, server_public))
}

fn read_prefixed(rdr: &mut std::io::Cursor<&[u8]>) -> FbResult<Vec<u8>> {
    use std::io::Read;
    let len = rdr
        .read_u16::<LittleEndian>()
        .map_err(|_| FbError::Protocol("truncated server challenge".to_string()))?;
    let mut bytes = vec![0_u8; usize::from(len)];
    rdr.read_exact(&mut bytes)
        .map_err(|_| FbError::Protocol("truncated server challenge".to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    // The verifier side, as a server would run it; only needed to prove the
    // client math against.
    struct TestServer {
        prime: BigUint,
        generator: BigUint,
        secret: BigUint,
        public: BigUint,
        verifier: BigUint,
    }

    impl TestServer {
        fn new(account: &str, password: &str, salt: &[u8]) -> Self {
            let prime = BigUint::parse_bytes(PRIME_HEX.as_bytes(), 16).unwrap();
            let generator = BigUint::from(GENERATOR);
            let user_hash = sha1_of(&[account.as_bytes(), b":", password.as_bytes()]);
            let x = BigUint::from_bytes_be(&sha1_of(&[salt, &user_hash]));
            let verifier = generator.modpow(&x, &prime);

            let secret = BigUint::from_bytes_be(b"deterministic server secret") % &prime;
            let multiplier = BigUint::from_bytes_be(&sha1_of(&[
                &prime.to_bytes_be(),
                &generator.to_bytes_be(),
            ]));
            let public =
                ((&multiplier * &verifier) % &prime + generator.modpow(&secret, &prime)) % &prime;
            Self {
                prime,
                generator,
                secret,
                public,
                verifier,
            }
        }

        fn session_key(&self, client_public: &BigUint) -> Vec<u8> {
            let scramble = BigUint::from_bytes_be(&sha1_of(&[
                &client_public.to_bytes_be(),
                &self.public.to_bytes_be(),
            ]));
            let shared = (client_public * self.verifier.modpow(&scramble, &self.prime))
                .modpow(&self.secret, &self.prime);
            sha1_of(&[&shared.to_bytes_be()])
        }
    }

    #[test]
    fn test_client_and_server_agree_on_the_session_key() {
        let salt = b"0123456789abcdefghij";
        let server = TestServer::new("SYSDBA", "masterkey", salt);
        let client = SrpClient::with_secret(ProofHash::Sha256, b"deterministic client secret");

        let (client_key, proof) = client
            .client_session("SYSDBA", "masterkey", salt, &server.public)
            .unwrap();
        let server_key = server.session_key(&client.public);

        assert_eq!(client_key, server_key);
        assert_eq!(client_key.len(), SESSION_KEY_LENGTH);
        assert_eq!(proof.len(), 32); // SHA-256 proof
    }

    #[test]
    fn test_wrong_password_diverges() {
        let salt = b"0123456789abcdefghij";
        let server = TestServer::new("SYSDBA", "masterkey", salt);
        let client = SrpClient::with_secret(ProofHash::Sha1, b"deterministic client secret");

        let (client_key, proof) = client
            .client_session("SYSDBA", "wrong", salt, &server.public)
            .unwrap();
        assert_ne!(client_key, server.session_key(&client.public));
        assert_eq!(proof.len(), 20); // SHA-1 proof
    }

    #[test]
    fn test_challenge_parsing() {
        let mut data = Vec::new();
        data.extend_from_slice(&4_u16.to_le_bytes());
        data.extend_from_slice(b"salt");
        data.extend_from_slice(&2_u16.to_le_bytes());
        data.extend_from_slice(b"1f");
        let (salt, public) = parse_server_challenge(&data).unwrap();
        assert_eq!(salt, b"salt");
        assert_eq!(public, BigUint::from(0x1f_u8));

        assert!(parse_server_challenge(&data[..3]).is_err());
    }

    #[test]
    fn test_public_key_is_hex() {
        let client = SrpClient::with_secret(ProofHash::Sha1, &[7]);
        assert_eq!(
            BigUint::parse_bytes(client.public_key_hex().as_bytes(), 16).unwrap(),
            BigUint::from(128_u8) // 2^7
        );
    }
}
