//! JWT signing with previously issued private keys.

use crate::error::Result;
use crate::store::GeneratedCertificateStore;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::sync::Arc;
use tracing::debug;

/// Caller-supplied claims: an ordered string → JSON value map. Insertion
/// order survives signing, so a round-tripped payload compares equal.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Signs compact RS256 tokens with keys held by the generated certificate
/// store.
///
/// Claims are used verbatim: no issuer, subject, or expiry is injected from
/// the certificate. Callers wanting identity claims in the token must put
/// them in themselves.
pub struct JwtSigner {
    store: Arc<GeneratedCertificateStore>,
}

impl JwtSigner {
    pub fn new(store: Arc<GeneratedCertificateStore>) -> Self {
        Self { store }
    }

    /// Sign `claims` with the private key stored under `common_name`.
    ///
    /// Fails `CertificateNotFound` when no certificate was generated for
    /// that name, `StoreUnavailable` when the backing store never loaded.
    pub async fn sign(&self, common_name: &str, claims: &Claims) -> Result<String> {
        let key_pem = self.store.signing_key(common_name).await?;
        let encoding_key = EncodingKey::from_rsa_pem(key_pem.as_bytes())?;

        let header = Header::new(Algorithm::RS256);
        let token = encode(&header, claims, &encoding_key)?;

        debug!(
            "signed JWT for '{}' ({} claims, {} bytes)",
            common_name,
            claims.len(),
            token.len()
        );
        Ok(token)
    }
}
