//! HMAC-SHA256 request signing.
//!
//! The exchange authenticates both REST submissions and the streaming auth
//! frame with a hex-encoded HMAC-SHA256 over a canonical, url-encoded
//! parameter string keyed by the API secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SignerError;

type HmacSha256 = Hmac<Sha256>;

/// Stateless signer bound to one API secret.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    /// Create a signer, rejecting an empty secret.
    pub fn new(secret: &str) -> Result<Self, SignerError> {
        if secret.is_empty() {
            return Err(SignerError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignerError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Hex HMAC-SHA256 of an arbitrary canonical payload.
    pub fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Signature for the streaming auth frame: `apiKey=<key>&timestamp=<ms>`.
    pub fn sign_auth(&self, api_key: &str, timestamp_ms: i64) -> String {
        self.sign(&auth_payload(api_key, timestamp_ms))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

/// Canonical string signed for stream authentication.
pub fn auth_payload(api_key: &str, timestamp_ms: i64) -> String {
    format!("apiKey={}&timestamp={}", api_key, timestamp_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4231_vector() {
        let signer = Signer::new("Jefe").unwrap();
        assert_eq!(
            signer.sign("what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_exchange_documented_query_signature() {
        let signer =
            Signer::new("NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j").unwrap();
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            signer.sign(query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_auth_signature_is_deterministic() {
        let signer = Signer::new("secret").unwrap();
        let a = signer.sign_auth("key", 1_700_000_000_000);
        let b = signer.sign_auth("key", 1_700_000_000_000);
        let c = signer.sign_auth("key", 1_700_000_000_001);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert_eq!(a, signer.sign("apiKey=key&timestamp=1700000000000"));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert_eq!(Signer::new("").unwrap_err(), SignerError::EmptySecret);
    }
}
