//! The certificate authority facade: one composition point wiring the CA
//! key material manager, the issuance engine, the generated certificate
//! store, the JWT signer, and the sign history together.

use crate::ca::{CaMaterialManager, IssuanceEngine};
use crate::config::Config;
use crate::error::{CertmintError, Result};
use crate::history::{SignAttempt, SignHistory};
use crate::jwt::{Claims, JwtSigner};
use crate::store::{CertificateRecord, CertificateSummary, GeneratedCertificateStore};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Owns every certmint component for one process.
///
/// Construction never fails for a missing or corrupted store: the CA
/// manager and the generated store each degrade to their "unavailable"
/// state and keep the diagnostic surface alive, so an operator can fix the
/// backing file and let the watcher recover without a restart.
pub struct CertificateAuthority {
    ca: Arc<CaMaterialManager>,
    store: Arc<GeneratedCertificateStore>,
    signer: JwtSigner,
    history: SignHistory,
}

impl CertificateAuthority {
    /// Validate the configuration, wire the components, attempt the initial
    /// CA load, and start the store-file watcher.
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;

        let ca = Arc::new(CaMaterialManager::new(
            config.ca_store.clone(),
            config.reload.clone(),
        ));
        match ca.load().await {
            Ok(_) => {}
            Err(e) => warn!("initial CA load failed, starting without a CA snapshot: {}", e),
        }
        if let Err(e) = ca.clone().watch() {
            error!("CA key store watcher failed to start: {}", e);
        }

        let store = Arc::new(
            GeneratedCertificateStore::open(
                config.generated_store.clone(),
                &config.issuance,
                IssuanceEngine::new(ca.clone()),
            )
            .await,
        );
        let signer = JwtSigner::new(store.clone());
        let history = SignHistory::new(config.history.max_entries);

        info!("certificate authority started");
        Ok(Self {
            ca,
            store,
            signer,
            history,
        })
    }

    /// Generate a key pair and an issued certificate for `common_name`,
    /// persisted under that alias. Re-generation overwrites.
    pub async fn generate(
        &self,
        common_name: &str,
        validity_days: u32,
    ) -> Result<CertificateRecord> {
        self.store.generate(common_name, validity_days).await
    }

    pub async fn list(&self) -> Vec<CertificateSummary> {
        self.store.list().await
    }

    pub async fn get(&self, common_name: &str) -> Result<CertificateRecord> {
        self.store.get(common_name).await
    }

    pub async fn delete(&self, common_name: &str) -> Result<()> {
        self.store.delete(common_name).await
    }

    /// Sign `claims` with the key stored under `common_name`, recording the
    /// attempt (success or failure) in the history.
    pub async fn sign(&self, common_name: &str, claims: Claims) -> Result<String> {
        let result = self.signer.sign(common_name, &claims).await;
        match &result {
            Ok(token) => {
                self.history
                    .record(Some(common_name), true, None, claims, Some(token.clone()))
                    .await;
            }
            Err(e) => {
                self.history
                    .record(Some(common_name), false, Some(e.to_string()), claims, None)
                    .await;
            }
        }
        result
    }

    /// The CA certificate in PEM, byte-for-byte as held by the current
    /// snapshot, for client trust bootstrapping.
    pub fn ca_certificate_pem(&self) -> Result<String> {
        self.ca
            .current()
            .map(|snapshot| snapshot.certificate_pem.clone())
            .ok_or(CertmintError::CaUnavailable)
    }

    pub fn ca_loaded(&self) -> bool {
        self.ca.is_loaded()
    }

    pub async fn store_available(&self) -> bool {
        self.store.is_available().await
    }

    pub async fn history(&self) -> Vec<SignAttempt> {
        self.history.all().await
    }

    pub async fn recent_history(&self, limit: usize) -> Vec<SignAttempt> {
        self.history.recent(limit).await
    }
}
