//! Claims validation seam for the surrounding system.
//!
//! The core signing path never consults a validator; the trait exists so the
//! controller layer can plug in a real JSON Schema engine and run it
//! before signing. `AcceptAll` is the default no-op implementation.

use crate::jwt::Claims;

/// The result of validating a claim set against a named schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

pub trait ClaimsValidator: Send + Sync {
    fn validate(&self, schema_name: &str, claims: &Claims) -> ValidationOutcome;
}

/// Accepts every claim set against every schema.
pub struct AcceptAll;

impl ClaimsValidator for AcceptAll {
    fn validate(&self, _schema_name: &str, _claims: &Claims) -> ValidationOutcome {
        ValidationOutcome::ok()
    }
}
