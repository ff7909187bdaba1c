use crate::protocol::{cnct, WireCryptLevel};

// Entries longer than this are split into tagged parts.
const MAX_ENTRY_PAYLOAD: usize = 254;

/// Normalizes a login name the way the servers do.
///
/// Unquoted logins fold to uppercase. A double-quoted login is taken
/// verbatim: embedded doubled quotes are unescaped and the value ends at
/// the first unmatched quote.
pub fn normalize_login(login: &str) -> String {
    if login.len() > 2 && login.starts_with('"') {
        let mut normalized = String::with_capacity(login.len() - 2);
        let mut chars = login[1..].chars();
        while let Some(c) = chars.next() {
            if c == '"' {
                match chars.next() {
                    Some('"') => normalized.push('"'),
                    _ => break,
                }
            } else {
                normalized.push(c);
            }
        }
        normalized
    } else {
        login.to_uppercase()
    }
}

/// Builds the client identification block sent with the connection request:
/// a sequence of (1-byte tag, 1-byte length, payload) entries identifying
/// the OS user, the host, and the offered authentication plugins.
#[derive(Debug)]
pub(crate) struct ClientIdentification<'a> {
    pub login: Option<&'a str>,
    pub plugin_names: &'a [&'static str],
    pub specific_data: &'a [u8],
    pub wire_crypt: WireCryptLevel,
}

impl ClientIdentification<'_> {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut block = Vec::with_capacity(128 + self.specific_data.len());

        let os_user = username::get_user_name().unwrap_or_else(|_| "unknown".to_string());
        emit_entry(cnct::USER, os_user.as_bytes(), &mut block);
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());
        emit_entry(cnct::HOST, host.as_bytes(), &mut block);
        emit_entry(cnct::USER_VERIFICATION, &[], &mut block);

        if let Some(login) = self.login {
            emit_entry(cnct::LOGIN, login.as_bytes(), &mut block);
        }
        let preferred = self.plugin_names.first().copied().unwrap_or_default();
        emit_entry(cnct::PLUGIN_NAME, preferred.as_bytes(), &mut block);
        emit_entry(cnct::SPECIFIC_DATA, self.specific_data, &mut block);
        emit_entry(
            cnct::PLUGIN_LIST,
            self.plugin_names.join(",").as_bytes(),
            &mut block,
        );
        // integrated identities (no login entry) always disable encryption
        let crypt_level = if self.login.is_some() {
            self.wire_crypt
        } else {
            WireCryptLevel::Disabled
        };
        emit_entry(
            cnct::CLIENT_CRYPT,
            &(crypt_level as u32).to_le_bytes(),
            &mut block,
        );
        block
    }
}

// Entries up to 254 bytes are written as (tag, length, payload). Longer
// payloads become successive parts of at most 254 bytes, each written as
// (tag, part-length + 1, zero-based part index, part).
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn emit_entry(tag: u8, payload: &[u8], block: &mut Vec<u8>) {
    if payload.len() <= MAX_ENTRY_PAYLOAD {
        block.push(tag);
        block.push(payload.len() as u8);
        block.extend_from_slice(payload);
    } else {
        for (index, part) in payload.chunks(MAX_ENTRY_PAYLOAD).enumerate() {
            block.push(tag);
            block.push(part.len() as u8 + 1);
            block.push(index as u8);
            block.extend_from_slice(part);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_unquoted_login_is_uppercased() {
        assert_eq!(normalize_login("sysdba"), "SYSDBA");
        assert_eq!(normalize_login("MiXeD"), "MIXED");
    }

    #[test]
    fn test_quoted_login_unescapes_and_truncates() {
        assert_eq!(normalize_login(r#""Foo""Bar""#), "Foo\"Bar");
        assert_eq!(normalize_login("\"\"\"Foo\"\"Bar\"\"\""), "\"Foo\"Bar\"");
        // everything after the first unmatched quote is dropped
        assert_eq!(normalize_login(r#""case"sensitive"#), "case");
        // a bare pair of quotes is not a quoted identifier
        assert_eq!(normalize_login("\"\""), "\"\"");
    }

    #[test]
    fn test_short_entry_encoding() {
        let mut block = Vec::new();
        emit_entry(9, b"SYSDBA", &mut block);
        assert_eq!(block, [9, 6, b'S', b'Y', b'S', b'D', b'B', b'A']);
    }

    #[test]
    fn test_long_entry_is_chunked() {
        let payload = vec![0xAB_u8; 300];
        let mut block = Vec::new();
        emit_entry(7, &payload, &mut block);

        // first part: 254 payload bytes, second part: the remaining 46
        assert_eq!(block[0], 7);
        assert_eq!(block[1], 255); // 254 bytes + the part index
        assert_eq!(block[2], 0);
        assert_eq!(&block[3..257], &payload[..254]);

        assert_eq!(block[257], 7);
        assert_eq!(block[258], 47); // 46 bytes + the part index
        assert_eq!(block[259], 1);
        assert_eq!(&block[260..], &payload[254..]);
        assert_eq!(block.len(), 3 + 254 + 3 + 46);
    }

    #[test]
    fn test_identification_block_shape() {
        let identification = ClientIdentification {
            login: Some("SYSDBA"),
            plugin_names: &["Srp256", "Srp"],
            specific_data: b"0a0b0c",
            wire_crypt: WireCryptLevel::Enabled,
        };
        let block = identification.to_bytes();

        // the tag sequence is fixed: user, host, verification marker,
        // login, plugin name, specific data, plugin list, crypt level
        let mut tags = Vec::new();
        let mut pos = 0;
        while pos < block.len() {
            tags.push(block[pos]);
            pos += 2 + usize::from(block[pos + 1]);
        }
        assert_eq!(tags, [1, 4, 6, 9, 8, 7, 10, 11]);

        // the plugin list names both plugins in preference order
        assert!(block
            .windows(10)
            .any(|window| window == b"Srp256,Srp"));
        // the crypt level is a 4-byte little-endian word
        assert_eq!(&block[block.len() - 6..], &[11, 4, 1, 0, 0, 0]);
    }
}
