//! End-to-end tests for the certificate authority facade: full
//! generate/list/sign/delete lifecycle, CA hot-reload behavior, and the
//! degraded modes when a backing store is missing or corrupted.

use certmint::ca::{CaMaterialManager, IssuanceEngine};
use certmint::config::{
    CaStoreConfig, Config, GeneratedStoreConfig, HistoryConfig, IssuanceConfig, ReloadConfig,
};
use certmint::keystore::{encode_store, StoreDocument, StoreEntry};
use certmint::{CertificateAuthority, CertmintError, Claims};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use pretty_assertions::assert_eq;
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use x509_parser::prelude::*;

const TEST_PASSWORD: &str = "integration-test-passphrase-0123456789";

fn ca_store_entry(common_name: &str) -> StoreEntry {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let key_pem = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
    let key_pair = KeyPair::from_pem(&key_pem).unwrap();
    let mut params = CertificateParams::new(vec![]);
    params.alg = &rcgen::PKCS_RSA_SHA256;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, "Certmint Integration");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = ::time::OffsetDateTime::now_utc() - ::time::Duration::days(1);
    params.not_after = ::time::OffsetDateTime::now_utc() + ::time::Duration::days(3650);
    params.key_pair = Some(key_pair);
    let cert_pem = Certificate::from_params(params)
        .unwrap()
        .serialize_pem()
        .unwrap();
    StoreEntry {
        private_key_pem: key_pem,
        certificate_pem: cert_pem.clone(),
        chain_pem: vec![cert_pem],
    }
}

async fn write_ca_store(path: &Path, common_name: &str) -> StoreEntry {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let entry = ca_store_entry(common_name);
    let mut document = StoreDocument::default();
    document.entries.insert("ca".to_string(), entry.clone());
    tokio::fs::write(path, encode_store(&document, TEST_PASSWORD).unwrap())
        .await
        .unwrap();
    entry
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        ca_store: CaStoreConfig {
            path: dir.path().join("ca.keystore"),
            password: TEST_PASSWORD.to_string(),
            alias: "ca".to_string(),
        },
        generated_store: GeneratedStoreConfig {
            path: dir.path().join("generated.keystore"),
            password: TEST_PASSWORD.to_string(),
        },
        issuance: IssuanceConfig::default(),
        reload: ReloadConfig {
            max_attempts: 3,
            retry_delay_ms: 100,
        },
        history: HistoryConfig { max_entries: 100 },
    }
}

fn decoding_key_for(cert_pem: &str) -> DecodingKey {
    let der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .filter_map(|r| r.ok())
        .next()
        .unwrap();
    let (_, parsed) = X509Certificate::from_der(&der).unwrap();
    DecodingKey::from_rsa_der(parsed.public_key().subject_public_key.as_ref())
}

fn verify_token(token: &str, cert_pem: &str) -> serde_json::Value {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    decode::<serde_json::Value>(token, &decoding_key_for(cert_pem), &validation)
        .unwrap()
        .claims
}

#[tokio::test]
async fn test_end_to_end_lifecycle() {
    let dir = TempDir::new().unwrap();
    write_ca_store(&test_config(&dir).ca_store.path, "Lifecycle CA").await;

    let authority = CertificateAuthority::start(test_config(&dir)).await.unwrap();
    assert!(authority.ca_loaded());
    assert!(authority.store_available().await);

    // Generate a certificate for alice, valid 365 days.
    let record = authority.generate("alice", 365).await.unwrap();
    assert_eq!(record.common_name, "alice");
    let window = record.not_after.duration_since(record.not_before).unwrap();
    assert_eq!(window, Duration::from_secs(365 * 86400));

    let listed = authority.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].common_name, "alice");
    assert_eq!(listed[0].not_after, record.not_after);
    let expected_not_after = SystemTime::now() + Duration::from_secs(365 * 86400);
    let skew = expected_not_after
        .duration_since(record.not_after)
        .unwrap_or_else(|e| e.duration());
    assert!(skew < Duration::from_secs(60));

    // Sign a token and verify it against alice's certificate.
    let mut claims = Claims::new();
    claims.insert("sub".to_string(), json!("alice"));
    let token = authority.sign("alice", claims.clone()).await.unwrap();
    let payload = verify_token(&token, &record.certificate_pem);
    assert_eq!(payload, json!({"sub": "alice"}));

    // Delete, then signing fails NotFound.
    authority.delete("alice").await.unwrap();
    assert!(authority.list().await.is_empty());
    let result = authority.sign("alice", claims).await;
    assert!(matches!(
        result,
        Err(CertmintError::CertificateNotFound { .. })
    ));

    // Both attempts are in the history, oldest first.
    let history = authority.history().await;
    assert_eq!(history.len(), 2);
    assert!(history[0].success);
    assert_eq!(history[0].token.as_deref(), Some(token.as_str()));
    assert!(!history[1].success);
    assert!(history[1].failure_reason.as_deref().unwrap().contains("alice"));
}

#[tokio::test]
async fn test_generate_rejects_empty_common_name() {
    let dir = TempDir::new().unwrap();
    write_ca_store(&test_config(&dir).ca_store.path, "Boundary CA").await;
    let authority = CertificateAuthority::start(test_config(&dir)).await.unwrap();

    let result = authority.generate("", 365).await;
    assert!(matches!(result, Err(CertmintError::EmptyCommonName)));
}

#[tokio::test]
async fn test_starts_degraded_without_ca_store() {
    let dir = TempDir::new().unwrap();

    // No CA store file: startup succeeds in the degraded state.
    let authority = CertificateAuthority::start(test_config(&dir)).await.unwrap();
    assert!(!authority.ca_loaded());
    assert!(authority.store_available().await);
    assert!(authority.list().await.is_empty());

    assert!(matches!(
        authority.generate("alice", 30).await,
        Err(CertmintError::CaUnavailable)
    ));
    assert!(matches!(
        authority.ca_certificate_pem(),
        Err(CertmintError::CaUnavailable)
    ));
}

#[tokio::test]
async fn test_ca_certificate_pem_is_verbatim() {
    let dir = TempDir::new().unwrap();
    let entry = write_ca_store(&test_config(&dir).ca_store.path, "Verbatim CA").await;
    let authority = CertificateAuthority::start(test_config(&dir)).await.unwrap();

    assert_eq!(authority.ca_certificate_pem().unwrap(), entry.certificate_pem);
}

#[tokio::test]
async fn test_chains_pin_the_ca_at_issuance_time() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let old_ca = write_ca_store(&config.ca_store.path, "Rotation CA v1").await;
    let authority = CertificateAuthority::start(test_config(&dir)).await.unwrap();

    let alice = authority.generate("alice", 30).await.unwrap();
    assert_eq!(alice.chain_pem[1], old_ca.certificate_pem);

    // Rotate the CA on disk and wait for the watcher to pick it up.
    let new_ca = write_ca_store(&config.ca_store.path, "Rotation CA v2").await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while authority.ca_certificate_pem().unwrap() != new_ca.certificate_pem {
        if tokio::time::Instant::now() > deadline {
            panic!("watcher did not pick up the rotated CA");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let bob = authority.generate("bob", 30).await.unwrap();
    assert_eq!(bob.chain_pem[1], new_ca.certificate_pem);

    // Alice's chain still names the CA that signed her leaf.
    let alice_again = authority.get("alice").await.unwrap();
    assert_eq!(alice_again.chain_pem[1], old_ca.certificate_pem);
}

#[tokio::test]
async fn test_corrupted_ca_store_keeps_last_good_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let entry = write_ca_store(&config.ca_store.path, "Resilient CA").await;
    let authority = CertificateAuthority::start(test_config(&dir)).await.unwrap();

    // Corrupt the CA store mid-run; the watcher's retries all fail.
    tokio::fs::write(&config.ca_store.path, b"garbage bytes")
        .await
        .unwrap();
    // 3 attempts at 100ms each, plus watcher latency.
    tokio::time::sleep(Duration::from_secs(3)).await;

    // The last known-good snapshot is still serving.
    assert_eq!(authority.ca_certificate_pem().unwrap(), entry.certificate_pem);
    let record = authority.generate("alice", 30).await.unwrap();
    assert_eq!(record.chain_pem[1], entry.certificate_pem);
}

#[tokio::test]
async fn test_concurrent_issuance_during_reload_never_tears() {
    let dir = TempDir::new().unwrap();
    let ca_path = dir.path().join("ca.keystore");
    write_ca_store(&ca_path, "Concurrent CA v1").await;

    let manager = Arc::new(CaMaterialManager::new(
        CaStoreConfig {
            path: ca_path.clone(),
            password: TEST_PASSWORD.to_string(),
            alias: "ca".to_string(),
        },
        ReloadConfig::default(),
    ));
    manager.load().await.unwrap();
    let engine = Arc::new(IssuanceEngine::new(manager.clone()));

    // Issue from many tasks while reloads swap the snapshot underneath.
    let mut issuers = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        issuers.push(tokio::spawn(async move {
            let mut issued = Vec::new();
            for j in 0..8 {
                let not_before = ::time::OffsetDateTime::now_utc();
                let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
                let key_pem = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
                let subject_key = KeyPair::from_pem(&key_pem).unwrap();
                let cert = engine
                    .issue(
                        &format!("svc-{}-{}", i, j),
                        not_before,
                        not_before + ::time::Duration::days(1),
                        subject_key,
                    )
                    .unwrap();
                issued.push(cert);
                tokio::task::yield_now().await;
            }
            issued
        }));
    }

    let reloader = {
        let manager = manager.clone();
        tokio::spawn(async move {
            for generation in 0..4 {
                write_ca_store(&ca_path, &format!("Concurrent CA v{}", generation + 2)).await;
                manager.load().await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
    };

    let mut all_issued = Vec::new();
    for issuer in issuers {
        all_issued.extend(issuer.await.unwrap());
    }
    reloader.await.unwrap();

    // Every leaf must verify against the CA certificate reported by the
    // snapshot that issued it. A torn snapshot would pair a leaf signed by
    // one key with another snapshot's certificate and fail here.
    for issued in &all_issued {
        let ca_der = rustls_pemfile::certs(&mut issued.ca_certificate_pem.as_bytes())
            .filter_map(|r| r.ok())
            .next()
            .unwrap();
        let (_, ca_cert) = X509Certificate::from_der(&ca_der).unwrap();
        let (_, leaf) = X509Certificate::from_der(&issued.certificate_der).unwrap();
        leaf.verify_signature(Some(ca_cert.public_key()))
            .expect("leaf must verify against the CA that its snapshot reported");
    }
}

#[tokio::test]
async fn test_regeneration_overwrites_across_restart() {
    let dir = TempDir::new().unwrap();
    write_ca_store(&test_config(&dir).ca_store.path, "Restart CA").await;

    let first = {
        let authority = CertificateAuthority::start(test_config(&dir)).await.unwrap();
        authority.generate("alice", 10).await.unwrap()
    };

    // A new process sees the persisted record, then overwrites it.
    let authority = CertificateAuthority::start(test_config(&dir)).await.unwrap();
    let fetched = authority.get("alice").await.unwrap();
    assert_eq!(fetched.certificate_pem, first.certificate_pem);

    let second = authority.generate("alice", 20).await.unwrap();
    let listed = authority.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].not_after, second.not_after);
    assert!(second.not_after > first.not_after);
}
