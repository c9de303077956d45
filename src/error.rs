use thiserror::Error;

pub type Result<T> = std::result::Result<T, CertmintError>;

#[derive(Error, Debug)]
pub enum CertmintError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CA key material unavailable: no snapshot has been loaded")]
    CaUnavailable,

    #[error("Certificate store unavailable: backing file failed to load")]
    StoreUnavailable,

    #[error("Certificate not found: {common_name}")]
    CertificateNotFound { common_name: String },

    #[error("Common name must not be empty")]
    EmptyCommonName,

    #[error("Invalid validity window: not_before {not_before} is after not_after {not_after}")]
    InvalidValidityWindow {
        not_before: ::time::OffsetDateTime,
        not_after: ::time::OffsetDateTime,
    },

    #[error("Malformed key material: {reason}")]
    MalformedKeyMaterial { reason: String },

    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },

    #[error("Key store error: {reason}")]
    KeyStore { reason: String },

    #[error("Key generation failed: {reason}")]
    KeyGeneration { reason: String },

    #[error("Certificate generation failed: {reason}")]
    CertificateGeneration { reason: String },

    #[error("Certificate error: {0}")]
    Certificate(#[from] rcgen::RcgenError),

    #[error("Persistence failure: {reason}")]
    PersistenceFailure { reason: String },

    #[error("File watch error: {reason}")]
    FileWatch { reason: String },

    #[error("JWT signing failed: {0}")]
    JwtSigning(#[from] jsonwebtoken::errors::Error),
}
