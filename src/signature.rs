//! Webhook signature verification.
//!
//! GitHub signs the raw request body with HMAC-SHA256 and sends the result
//! as `X-Hub-Signature-256: sha256=<hex>`. Verification happens in constant
//! time via `Mac::verify_slice`.

use hmac::{Mac, SimpleHmac};
use sha2::Sha256;

/// The value of an `X-Hub-Signature-256` header.
pub struct Signature<'a>(pub &'a str);

impl Signature<'_> {
    /// Check the signature against `body` using the shared secret.
    ///
    /// Returns false for a missing `sha256=` prefix, malformed hex, or a
    /// digest mismatch.
    pub fn is_valid(&self, body: &[u8], secret: &str) -> bool {
        let Some(hex_digest) = self.0.strip_prefix("sha256=") else {
            return false;
        };
        let Ok(expected) = hex::decode(hex_digest) else {
            return false;
        };
        let Ok(mut mac) = SimpleHmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}

/// Sign a payload the way GitHub does. Used by tests and documentation.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = SimpleHmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
