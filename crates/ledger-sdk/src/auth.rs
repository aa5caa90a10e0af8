//! Session state and the challenge-response auth token.
//!
//! The token handed to `/challenge/solve` is the standard ABI encoding of
//! `(viewAddress, nonceSignature, mainAddress, delegationSignature)` —
//! two static address slots and two dynamic byte strings — hex encoded.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, SdkError};

const WORD: usize = 32;

/// Ephemeral auth state for one TES scope. Never persisted.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub csrf: String,
    pub expires_at_millis: u64,
}

impl Session {
    pub fn new(csrf: String, expires_at_millis: u64) -> Self {
        Self {
            csrf,
            expires_at_millis,
        }
    }

    pub fn is_valid_at(&self, now_millis: u64) -> bool {
        !self.csrf.is_empty() && now_millis < self.expires_at_millis
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_millis())
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn parse_address(address: &str) -> Result<[u8; 20]> {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(stripped)
        .map_err(|e| SdkError::InvalidInput(format!("Bad address '{}': {}", address, e)))?;
    bytes
        .try_into()
        .map_err(|_| SdkError::InvalidInput(format!("Bad address length: {}", address)))
}

fn push_address_word(out: &mut Vec<u8>, address: &[u8; 20]) {
    out.extend_from_slice(&[0u8; WORD - 20]);
    out.extend_from_slice(address);
}

fn push_uint_word(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&[0u8; WORD - 8]);
    out.extend_from_slice(&value.to_be_bytes());
}

fn push_padded_bytes(out: &mut Vec<u8>, data: &[u8]) {
    push_uint_word(out, data.len() as u64);
    out.extend_from_slice(data);
    let remainder = data.len() % WORD;
    if remainder != 0 {
        out.extend(std::iter::repeat(0u8).take(WORD - remainder));
    }
}

/// ABI-encodes `(address, bytes, address, bytes)` and returns it hex-encoded
/// with a `0x` prefix, ready for the `Authorization: Bearer` header.
pub fn encode_auth_token(
    view_address: &str,
    nonce_signature: &[u8],
    main_address: &str,
    delegation_signature: &[u8],
) -> Result<String> {
    let view = parse_address(view_address)?;
    let main = parse_address(main_address)?;

    let head_len = 4 * WORD;
    let first_tail_len = WORD + nonce_signature.len().div_ceil(WORD) * WORD;

    let mut out = Vec::new();
    push_address_word(&mut out, &view);
    push_uint_word(&mut out, head_len as u64);
    push_address_word(&mut out, &main);
    push_uint_word(&mut out, (head_len + first_tail_len) as u64);
    push_padded_bytes(&mut out, nonce_signature);
    push_padded_bytes(&mut out, delegation_signature);

    Ok(format!("0x{}", hex::encode(out)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEW: &str = "0x1111111111111111111111111111111111111111";
    const MAIN: &str = "0x2222222222222222222222222222222222222222";

    #[test]
    fn test_session_validity() {
        let session = Session::new("csrf".into(), 1_000);
        assert!(session.is_valid_at(999));
        assert!(!session.is_valid_at(1_000));
        assert!(!session.is_valid_at(2_000));

        let blank = Session::new("".into(), u64::MAX);
        assert!(!blank.is_valid_at(0));
    }

    #[test]
    fn test_auth_token_layout() {
        let nonce_sig = vec![0xaa; 65];
        let delegation_sig = vec![0xbb; 65];
        let token = encode_auth_token(VIEW, &nonce_sig, MAIN, &delegation_sig).unwrap();

        let raw = hex::decode(token.strip_prefix("0x").unwrap()).unwrap();
        // 4 head words + 2 * (length word + 65 bytes padded to 96).
        assert_eq!(raw.len(), 4 * 32 + 2 * (32 + 96));

        // Addresses are right-aligned in their words.
        assert_eq!(&raw[12..32], &[0x11; 20]);
        assert_eq!(&raw[76..96], &[0x22; 20]);

        // First dynamic offset points past the head.
        assert_eq!(raw[63], 128);
        // Its length word says 65.
        assert_eq!(raw[128 + 31], 65);
        assert_eq!(&raw[160..225], nonce_sig.as_slice());
    }

    #[test]
    fn test_bad_address_rejected() {
        assert!(matches!(
            encode_auth_token("0x1234", &[], MAIN, &[]),
            Err(SdkError::InvalidInput(_))
        ));
    }
}
