//! Webhook Callback Signing
//!
//! Identity and billing collaborators complete some steps asynchronously via
//! callbacks. Each run carries its own secret, generated before the first
//! callback-dependent step and stored on the run row, so a later callback
//! can be correlated and validated before it is treated as step completion.
//! Scoping the secret to the run keeps no state alive across runs.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies run-scoped callback payloads
pub struct CallbackSigner {
    secret: Vec<u8>,
}

impl CallbackSigner {
    /// Generate a fresh 32-byte secret, hex encoded for storage on the run
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Build a signer from the hex secret stored on the run
    pub fn from_hex_secret(secret: &str) -> Option<Self> {
        let secret = hex::decode(secret).ok()?;
        Some(Self { secret })
    }

    /// HMAC-SHA256 tag over the callback payload, hex encoded
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of a callback's tag
    pub fn verify(&self, payload: &[u8], tag: &str) -> bool {
        let Ok(tag) = hex::decode(tag) else { return false };
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload);
        mac.verify_slice(&tag).is_ok()
    }
}
