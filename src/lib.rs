//! certmint: an embedded private certificate authority.
//!
//! Loads its CA signing identity from an encrypted key store and
//! hot-reloads it when the file changes, issues RSA leaf certificates on
//! demand, persists them in a second encrypted store keyed by common name,
//! and signs JWTs with the stored keys. [`CertificateAuthority`] is the
//! composition root; the surrounding system drives it from its own
//! controller layer.

pub mod authority;
pub mod ca;
pub mod config;
pub mod error;
pub mod history;
pub mod jwt;
pub mod keystore;
pub mod store;
pub mod validate;

pub use authority::CertificateAuthority;
pub use config::Config;
pub use error::{CertmintError, Result};
pub use jwt::Claims;
