//! Leaf certificate issuance against the current CA snapshot.

use crate::error::{CertmintError, Result};
use base64::{engine::general_purpose, Engine as _};
use rcgen::{Certificate, CertificateParams, DnType, IsCa, KeyPair, SerialNumber};
use std::sync::Arc;
use std::time::SystemTime;
use ::time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::manager::CaMaterialManager;
use super::material::sha256_fingerprint;

/// A freshly signed leaf certificate plus the CA certificate that signed it.
///
/// Both fields come from the same snapshot read, so a reload racing the
/// issuance can never pair the leaf with a different CA's certificate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub common_name: String,
    pub certificate_pem: String,
    pub certificate_der: Vec<u8>,
    /// 128-bit serial, hex encoded
    pub serial_hex: String,
    /// SHA-256 over the leaf DER, hex encoded
    pub fingerprint: String,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    /// The issuing CA certificate exactly as held by the snapshot
    pub ca_certificate_pem: String,
}

/// Builds and signs leaf certificates. Stateless apart from the manager
/// back-reference; persistence is the caller's concern.
pub struct IssuanceEngine {
    ca: Arc<CaMaterialManager>,
}

impl IssuanceEngine {
    pub fn new(ca: Arc<CaMaterialManager>) -> Self {
        Self { ca }
    }

    /// Issue a leaf certificate for `common_name` bound to `subject_key`.
    ///
    /// Only the public half of `subject_key` ends up in the certificate;
    /// the signature comes from the CA snapshot current at this call.
    /// Serial numbers are random 128-bit values with the high bit cleared,
    /// so concurrent or bursty issuance cannot collide the way a wall-clock
    /// serial would.
    pub fn issue(
        &self,
        common_name: &str,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
        subject_key: KeyPair,
    ) -> Result<IssuedCertificate> {
        if common_name.is_empty() {
            return Err(CertmintError::EmptyCommonName);
        }
        if not_before > not_after {
            return Err(CertmintError::InvalidValidityWindow {
                not_before,
                not_after,
            });
        }
        let snapshot = self.ca.current().ok_or(CertmintError::CaUnavailable)?;

        let mut serial = *Uuid::new_v4().as_bytes();
        // DER encodes serials as signed INTEGERs; keep the value positive.
        serial[0] &= 0x7f;

        let mut cert_params = CertificateParams::new(vec![]);
        cert_params.alg = &rcgen::PKCS_RSA_SHA256;
        cert_params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        cert_params.is_ca = IsCa::NoCa;
        cert_params.serial_number = Some(SerialNumber::from_slice(&serial));
        cert_params.not_before = not_before;
        cert_params.not_after = not_after;
        cert_params.key_pair = Some(subject_key);

        let certificate = Certificate::from_params(cert_params).map_err(|e| {
            CertmintError::CertificateGeneration {
                reason: format!("failed to create certificate params: {}", e),
            }
        })?;

        let der = certificate
            .serialize_der_with_signer(&snapshot.signer)
            .map_err(|e| CertmintError::CertificateGeneration {
                reason: format!("failed to sign certificate: {}", e),
            })?;
        let pem = pem_encode_certificate(&der);

        debug!(
            "issued leaf certificate for '{}' with serial {}",
            common_name,
            hex::encode(serial)
        );

        Ok(IssuedCertificate {
            common_name: common_name.to_string(),
            fingerprint: sha256_fingerprint(&der),
            serial_hex: hex::encode(serial),
            certificate_pem: pem,
            certificate_der: der,
            not_before: SystemTime::from(not_before),
            not_after: SystemTime::from(not_after),
            ca_certificate_pem: snapshot.certificate_pem.clone(),
        })
    }
}

/// Wrap DER certificate bytes in a PEM envelope (64-column base64 body).
fn pem_encode_certificate(der: &[u8]) -> String {
    let encoded = general_purpose::STANDARD.encode(der);
    let mut pem = String::with_capacity(encoded.len() + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    let mut start = 0;
    while start < encoded.len() {
        let end = (start + 64).min(encoded.len());
        pem.push_str(&encoded[start..end]);
        pem.push('\n');
        start = end;
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}
