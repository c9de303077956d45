//! Generated certificate store: issues, persists, and serves leaf
//! certificates keyed by common name.
//!
//! The in-memory map is authoritative; every mutation rewrites the whole
//! backing file before the call returns. Writers hold the lock across the
//! flush, so two mutations can never interleave their read-modify-write
//! cycles and readers never observe a half-written store.

use crate::ca::issuance::IssuanceEngine;
use crate::config::{GeneratedStoreConfig, IssuanceConfig};
use crate::error::{CertmintError, Result};
use crate::keystore::{self, StoreDocument, StoreEntry};
use rcgen::KeyPair;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;
use ::time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::ca::material::{sha256_fingerprint, validity_timestamp};

/// One row of `list()`: the alias and when its certificate expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSummary {
    pub common_name: String,
    pub not_after: SystemTime,
    pub fingerprint: String,
}

/// Full view of a stored certificate as returned by `generate` and `get`.
///
/// `certificate_pem` is byte-for-byte the PEM that was stored at issuance;
/// `chain_pem` is `[leaf, CA certificate at issuance]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub common_name: String,
    pub certificate_pem: String,
    pub chain_pem: Vec<String>,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    pub fingerprint: String,
}

/// Persistent store of issued (private key, leaf certificate, chain)
/// records.
///
/// `None` state means the backing file failed to load or create at open
/// time; mutations and key lookups then fail `StoreUnavailable` while
/// `list()` keeps serving an empty view for diagnostics.
pub struct GeneratedCertificateStore {
    config: GeneratedStoreConfig,
    key_bits: usize,
    issuance: IssuanceEngine,
    state: RwLock<Option<HashMap<String, StoreEntry>>>,
}

impl GeneratedCertificateStore {
    /// Load the backing store, creating it empty on first run. Failures are
    /// logged and leave the store in the unavailable state rather than
    /// failing construction.
    pub async fn open(
        config: GeneratedStoreConfig,
        issuance_config: &IssuanceConfig,
        issuance: IssuanceEngine,
    ) -> Self {
        let state = match load_or_create(&config).await {
            Ok(entries) => {
                info!(
                    "generated certificate store ready at {} ({} entries)",
                    config.path.display(),
                    entries.len()
                );
                Some(entries)
            }
            Err(e) => {
                error!(
                    "generated certificate store at {} unavailable: {}",
                    config.path.display(),
                    e
                );
                None
            }
        };
        Self {
            config,
            key_bits: issuance_config.key_bits,
            issuance,
            state: RwLock::new(state),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Generate a key pair, have the CA issue a leaf for `common_name`, and
    /// persist the record under that alias.
    ///
    /// An existing record with the same common name is overwritten: newest
    /// wins, and nothing retains or revokes the superseded leaf. The store
    /// is flushed before this returns; a flush failure is surfaced as
    /// `PersistenceFailure` while the in-memory record stays in place.
    pub async fn generate(&self, common_name: &str, validity_days: u32) -> Result<CertificateRecord> {
        if common_name.is_empty() {
            return Err(CertmintError::EmptyCommonName);
        }
        if self.state.read().await.is_none() {
            return Err(CertmintError::StoreUnavailable);
        }

        // RSA keygen burns hundreds of milliseconds of CPU; keep it off the
        // async workers so concurrent requests stay responsive.
        let key_bits = self.key_bits;
        let key_pem = tokio::task::spawn_blocking(move || generate_rsa_key_pem(key_bits))
            .await
            .map_err(|e| CertmintError::KeyGeneration {
                reason: format!("key generation task failed: {}", e),
            })??;
        let subject_key =
            KeyPair::from_pem(&key_pem).map_err(|e| CertmintError::KeyGeneration {
                reason: format!("failed to parse generated private key: {}", e),
            })?;

        let not_before = OffsetDateTime::now_utc();
        let not_after = not_before + ::time::Duration::days(validity_days as i64);
        let issued = self
            .issuance
            .issue(common_name, not_before, not_after, subject_key)?;

        let entry = StoreEntry {
            private_key_pem: key_pem,
            certificate_pem: issued.certificate_pem.clone(),
            chain_pem: vec![
                issued.certificate_pem.clone(),
                issued.ca_certificate_pem.clone(),
            ],
        };
        let record = CertificateRecord {
            common_name: issued.common_name.clone(),
            certificate_pem: issued.certificate_pem,
            chain_pem: entry.chain_pem.clone(),
            not_before: issued.not_before,
            not_after: issued.not_after,
            fingerprint: issued.fingerprint,
        };

        let mut state = self.state.write().await;
        let entries = state.as_mut().ok_or(CertmintError::StoreUnavailable)?;
        if entries.insert(common_name.to_string(), entry).is_some() {
            info!(
                "re-issued certificate for '{}', previous record overwritten",
                common_name
            );
        }
        self.flush(entries).await?;

        info!(
            "generated certificate for '{}' (serial {}, valid {} days)",
            common_name, issued.serial_hex, validity_days
        );
        Ok(record)
    }

    /// Enumerate stored certificates. Order is map order, unspecified.
    pub async fn list(&self) -> Vec<CertificateSummary> {
        let state = self.state.read().await;
        let Some(entries) = state.as_ref() else {
            warn!("generated certificate store unavailable, listing no certificates");
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|(common_name, entry)| {
                match leaf_metadata(&entry.certificate_pem) {
                    Ok(metadata) => Some(CertificateSummary {
                        common_name: common_name.clone(),
                        not_after: metadata.not_after,
                        fingerprint: metadata.fingerprint,
                    }),
                    Err(e) => {
                        warn!("skipping unreadable store record '{}': {}", common_name, e);
                        None
                    }
                }
            })
            .collect()
    }

    pub async fn get(&self, common_name: &str) -> Result<CertificateRecord> {
        let state = self.state.read().await;
        let entries = state.as_ref().ok_or(CertmintError::StoreUnavailable)?;
        let entry = entries
            .get(common_name)
            .ok_or_else(|| CertmintError::CertificateNotFound {
                common_name: common_name.to_string(),
            })?;

        let metadata = leaf_metadata(&entry.certificate_pem)?;
        Ok(CertificateRecord {
            common_name: common_name.to_string(),
            certificate_pem: entry.certificate_pem.clone(),
            chain_pem: entry.chain_pem.clone(),
            not_before: metadata.not_before,
            not_after: metadata.not_after,
            fingerprint: metadata.fingerprint,
        })
    }

    /// Remove a record and flush. Absent aliases fail `CertificateNotFound`.
    pub async fn delete(&self, common_name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let entries = state.as_mut().ok_or(CertmintError::StoreUnavailable)?;
        if entries.remove(common_name).is_none() {
            return Err(CertmintError::CertificateNotFound {
                common_name: common_name.to_string(),
            });
        }
        self.flush(entries).await?;
        info!("deleted certificate record for '{}'", common_name);
        Ok(())
    }

    /// Private key PEM for a stored common name, for the JWT signer.
    pub(crate) async fn signing_key(&self, common_name: &str) -> Result<String> {
        let state = self.state.read().await;
        let entries = state.as_ref().ok_or(CertmintError::StoreUnavailable)?;
        let entry = entries
            .get(common_name)
            .ok_or_else(|| CertmintError::CertificateNotFound {
                common_name: common_name.to_string(),
            })?;
        Ok(entry.private_key_pem.clone())
    }

    /// Rewrite the whole backing file from the given entries. Called with
    /// the write lock held.
    async fn flush(&self, entries: &HashMap<String, StoreEntry>) -> Result<()> {
        let document = StoreDocument {
            entries: entries.clone(),
        };
        let encoded = keystore::encode_store(&document, &self.config.password).map_err(|e| {
            CertmintError::PersistenceFailure {
                reason: format!("failed to encode generated store: {}", e),
            }
        })?;
        write_store_file(&self.config.path, &encoded)
            .await
            .map_err(|e| CertmintError::PersistenceFailure {
                reason: format!(
                    "failed to write generated store {}: {}",
                    self.config.path.display(),
                    e
                ),
            })?;
        debug!(
            "generated certificate store flushed ({} entries, {} bytes)",
            entries.len(),
            encoded.len()
        );
        Ok(())
    }
}

async fn load_or_create(config: &GeneratedStoreConfig) -> Result<HashMap<String, StoreEntry>> {
    match fs::read(&config.path).await {
        Ok(data) => {
            let document = keystore::decode_store(&data, &config.password)?;
            Ok(document.entries)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
            let encoded = keystore::encode_store(&StoreDocument::default(), &config.password)?;
            write_store_file(&config.path, &encoded).await?;
            info!(
                "created empty generated certificate store at {}",
                config.path.display()
            );
            Ok(HashMap::new())
        }
        Err(e) => Err(e.into()),
    }
}

async fn write_store_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

fn generate_rsa_key_pem(bits: usize) -> Result<String> {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits).map_err(|e| {
        CertmintError::KeyGeneration {
            reason: format!("RSA key generation failed: {}", e),
        }
    })?;
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CertmintError::KeyGeneration {
            reason: format!("failed to encode private key: {}", e),
        })?;
    Ok(pem.to_string())
}

struct LeafMetadata {
    not_before: SystemTime,
    not_after: SystemTime,
    fingerprint: String,
}

fn leaf_metadata(cert_pem: &str) -> Result<LeafMetadata> {
    use x509_parser::prelude::*;

    let der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .filter_map(|r| r.ok())
        .next()
        .ok_or_else(|| CertmintError::InvalidCertificate {
            reason: "no certificate found in PEM data".to_string(),
        })?;
    let (_, parsed) =
        X509Certificate::from_der(&der).map_err(|e| CertmintError::InvalidCertificate {
            reason: format!("failed to parse certificate DER: {}", e),
        })?;
    Ok(LeafMetadata {
        not_before: validity_timestamp(parsed.validity().not_before.timestamp())?,
        not_after: validity_timestamp(parsed.validity().not_after.timestamp())?,
        fingerprint: sha256_fingerprint(&der),
    })
}
