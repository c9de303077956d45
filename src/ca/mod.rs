//! CA Identity and Issuance
//!
//! This module owns the CA side of the system: the key-material snapshot
//! loaded from the CA store, the manager that hot-swaps it behind an atomic
//! reference (with a file watcher driving reloads), and the engine that
//! signs leaf certificates against the current snapshot.

pub mod issuance;
pub mod manager;
pub mod material;

pub use issuance::{IssuanceEngine, IssuedCertificate};
pub use manager::CaMaterialManager;
pub use material::KeyMaterialSnapshot;
