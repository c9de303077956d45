//! Immutable CA key material, decoded from one store entry.

use crate::error::{CertmintError, Result};
use crate::keystore::StoreEntry;
use rcgen::{Certificate, CertificateParams, KeyPair};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_parser::prelude::*;

/// The CA identity as of one successful load: certificate metadata, the
/// original encoded certificate, and the signing handle.
///
/// A snapshot is constructed whole or not at all. Readers hold it behind an
/// `Arc` and keep whatever version they grabbed for the duration of an
/// operation; a reload never mutates an existing snapshot.
pub struct KeyMaterialSnapshot {
    /// Subject DN of the CA certificate, e.g. `CN=Internal CA, O=Example`
    pub subject: String,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    /// CA certificate exactly as it appears in the store, never re-serialized
    pub certificate_pem: String,
    pub certificate_der: Vec<u8>,
    /// SHA-256 over the certificate DER, hex encoded
    pub fingerprint: String,
    /// rcgen handle carrying the CA private key, used to sign leaves
    pub(crate) signer: Certificate,
}

impl KeyMaterialSnapshot {
    /// Decode a store entry into a snapshot.
    ///
    /// Verifies that both halves are present and that the certificate's
    /// public key corresponds to the private key before building the
    /// signing handle. Any failure is `MalformedKeyMaterial`; the caller
    /// decides whether that leaves a previous snapshot in place.
    pub(crate) fn from_store_entry(alias: &str, entry: &StoreEntry) -> Result<Self> {
        if entry.private_key_pem.is_empty() {
            return Err(CertmintError::MalformedKeyMaterial {
                reason: format!("store entry '{}' has no private key", alias),
            });
        }
        if entry.certificate_pem.is_empty() {
            return Err(CertmintError::MalformedKeyMaterial {
                reason: format!("store entry '{}' has no certificate", alias),
            });
        }

        let key_pair = KeyPair::from_pem(&entry.private_key_pem).map_err(|e| {
            CertmintError::MalformedKeyMaterial {
                reason: format!("failed to parse CA private key: {}", e),
            }
        })?;

        let cert_der = rustls_pemfile::certs(&mut entry.certificate_pem.as_bytes())
            .filter_map(|r| r.ok())
            .next()
            .ok_or_else(|| CertmintError::MalformedKeyMaterial {
                reason: format!("store entry '{}' has no certificate in PEM data", alias),
            })?;

        let (_, parsed_cert) =
            X509Certificate::from_der(&cert_der).map_err(|e| CertmintError::MalformedKeyMaterial {
                reason: format!("failed to parse CA certificate DER: {}", e),
            })?;

        // Correspondence check: the certificate must carry the public half
        // of exactly this private key.
        if parsed_cert.public_key().subject_public_key.as_ref() != key_pair.public_key_raw() {
            return Err(CertmintError::MalformedKeyMaterial {
                reason: format!(
                    "certificate and private key in store entry '{}' do not correspond",
                    alias
                ),
            });
        }

        let subject = parsed_cert.subject().to_string();
        let not_before = validity_timestamp(parsed_cert.validity().not_before.timestamp())?;
        let not_after = validity_timestamp(parsed_cert.validity().not_after.timestamp())?;
        let fingerprint = sha256_fingerprint(&cert_der);

        let params = CertificateParams::from_ca_cert_pem(&entry.certificate_pem, key_pair)
            .map_err(|e| CertmintError::MalformedKeyMaterial {
                reason: format!("failed to rebuild CA signing parameters: {}", e),
            })?;
        let signer =
            Certificate::from_params(params).map_err(|e| CertmintError::MalformedKeyMaterial {
                reason: format!("failed to build CA signing handle: {}", e),
            })?;

        Ok(Self {
            subject,
            not_before,
            not_after,
            certificate_pem: entry.certificate_pem.clone(),
            certificate_der: cert_der.to_vec(),
            fingerprint,
            signer,
        })
    }
}

impl fmt::Debug for KeyMaterialSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterialSnapshot")
            .field("subject", &self.subject)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Convert a certificate validity timestamp (seconds since the unix epoch)
/// to a `SystemTime`. Pre-epoch dates would wrap through the unsigned
/// conversion, so they are rejected instead.
pub(crate) fn validity_timestamp(seconds: i64) -> Result<SystemTime> {
    u64::try_from(seconds)
        .map(|s| UNIX_EPOCH + Duration::from_secs(s))
        .map_err(|_| CertmintError::InvalidCertificate {
            reason: format!("certificate validity date predates the unix epoch ({})", seconds),
        })
}

/// SHA-256 fingerprint of DER-encoded certificate data, hex encoded.
pub(crate) fn sha256_fingerprint(der_data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(der_data);
    hex::encode(hasher.finalize())
}
