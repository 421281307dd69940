//! Plain-text and keyed-MD5 authentication of RIPv2 PDUs.
//!
//! Validation runs against the raw datagram because the MD5 digest covers
//! exact bytes, not the parsed structure.

use md5::{Digest, Md5};
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::entry::{AUTH_MD5, AUTH_NONE, AUTH_PLAIN, ENTRY_SIZE, KEY_SIZE};
use crate::error::{AuthError, FormatError, Result};
use crate::packet::{Auth, Pdu, RIP_VERSION};

/// Key id stamped into outgoing MD5 metadata.
pub const MD5_KEY_ID: u8 = 1;
/// Length of the MD5 trailer entry (type + digest) as announced in the metadata.
pub const MD5_AUTH_LEN: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Plain,
    Md5,
}

impl AuthType {
    /// Wire code of the authentication type.
    pub fn code(self) -> u16 {
        match self {
            AuthType::None => AUTH_NONE,
            AuthType::Plain => AUTH_PLAIN,
            AuthType::Md5 => AUTH_MD5,
        }
    }

    /// Entry slots consumed by authentication in each message.
    pub fn overhead(self) -> usize {
        match self {
            AuthType::None => 0,
            AuthType::Plain => 1,
            AuthType::Md5 => 2,
        }
    }
}

/// Authentication settings of one interface or neighbor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KeyChain {
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub auth_key: String,
}

impl KeyChain {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn plain(key: &str) -> Self {
        KeyChain {
            auth_type: AuthType::Plain,
            auth_key: key.to_string(),
        }
    }

    pub fn md5(key: &str) -> Self {
        KeyChain {
            auth_type: AuthType::Md5,
            auth_key: key.to_string(),
        }
    }

    pub fn padded_key(&self) -> [u8; KEY_SIZE] {
        pad_key(&self.auth_key)
    }
}

/// Zero-pad (or cut) a key to the 16-byte wire field.
pub fn pad_key(key: &str) -> [u8; KEY_SIZE] {
    let mut out = [0u8; KEY_SIZE];
    let bytes = key.as_bytes();
    let n = bytes.len().min(KEY_SIZE);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Check version and authentication of a parsed PDU against the key chain
/// configured for its source.
pub fn validate(pdu: &Pdu, raw: &[u8], chain: &KeyChain) -> Result<()> {
    if pdu.version != RIP_VERSION {
        return Err(FormatError::BadVersion(pdu.version).into());
    }

    let expected = chain.auth_type.code();
    let got = pdu.auth_type();
    if expected != got {
        return Err(AuthError::TypeMismatch { expected, got }.into());
    }

    match pdu.auth {
        None => Ok(()),
        Some(Auth::Plain { key }) => {
            if key != chain.padded_key() {
                return Err(AuthError::PlainKey.into());
            }
            Ok(())
        }
        Some(Auth::Md5 {
            packet_len, digest, ..
        }) => {
            let digest = digest.ok_or(AuthError::MissingTrailer)?;
            let covered = packet_len as usize;
            if covered + ENTRY_SIZE != raw.len() {
                return Err(AuthError::MissingTrailer.into());
            }

            let mut hasher = Md5::new();
            hasher.update(&raw[..covered + 4]);
            hasher.update(chain.padded_key());
            if hasher.finalize().as_slice() != digest {
                return Err(AuthError::Digest.into());
            }
            Ok(())
        }
    }
}

/// Attach the authentication entry configured by `chain`.
pub fn stamp(mut pdu: Pdu, chain: &KeyChain, seqno: u32) -> Pdu {
    pdu.auth = match chain.auth_type {
        AuthType::None => None,
        AuthType::Plain => Some(Auth::Plain {
            key: chain.padded_key(),
        }),
        AuthType::Md5 => Some(Auth::Md5 {
            packet_len: 0,
            key_id: MD5_KEY_ID,
            auth_len: MD5_AUTH_LEN,
            seqno,
            digest: None,
        }),
    };
    let covered = pdu.authenticated_len() as u16;
    if let Some(Auth::Md5 { packet_len, .. }) = pdu.auth.as_mut() {
        *packet_len = covered;
    }
    pdu
}

/// Stamp and serialize a PDU for a destination using `chain`.
pub fn sign(pdu: Pdu, chain: &KeyChain) -> Vec<u8> {
    stamp(pdu, chain, wall_clock_seqno()).seal(&chain.padded_key())
}

/// MD5 sequence numbers are wall-clock seconds.
pub fn wall_clock_seqno() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
