// Server authentication for REST responses.
//
// The manager is told a shared key when it is launched. Each request then
// carries a fresh `nonce`; the manager answers with
// `hmac = HMAC-SHA256(key, nonce)` so the client can tell it is talking to
// the manager it launched and not something squatting on port 4035.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Size of both the shared key and each nonce.
pub const HMAC_KEY_BYTES: usize = 16;
pub const NONCE_BYTES: usize = 16;

/// Shared secret used to authenticate manager responses.
#[derive(Clone, PartialEq, Eq)]
pub struct HmacKey(Vec<u8>);

impl HmacKey {
    /// A fresh random key.
    pub fn generate() -> Self {
        Self(random_bytes(HMAC_KEY_BYTES))
    }

    /// Parse a key previously rendered with [`to_hex`](Self::to_hex).
    pub fn from_hex(hex_key: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_key.trim())?;
        if bytes.is_empty() {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(Self(bytes))
    }

    /// Lowercase hex, the form handed to the manager at launch.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Expected `hmac` field for a response to a request carrying `nonce`.
    pub fn sign(&self, nonce: &Nonce) -> String {
        self.mac_for(nonce)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Constant-time check of a response `hmac` field.
    pub fn verify(&self, nonce: &Nonce, hmac_hex: Option<&str>) -> bool {
        let Some(received) = hmac_hex.and_then(|h| hex::decode(h).ok()) else {
            return false;
        };
        self.mac_for(nonce)
            .is_some_and(|mac| mac.verify_slice(&received).is_ok())
    }

    fn mac_for(&self, nonce: &Nonce) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.0).ok()?;
        mac.update(&nonce.0);
        Some(mac)
    }
}

impl fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacKey([REDACTED])")
    }
}

/// Single-use random value sent as the `nonce` request parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    pub fn generate() -> Self {
        Self(random_bytes(NONCE_BYTES))
    }

    /// Parse the `nonce` parameter as the manager sees it.
    pub fn from_hex(hex_nonce: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(hex_nonce).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}
