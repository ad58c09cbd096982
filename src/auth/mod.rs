//! Credential persistence and repair.
//!
//! The session directory holds one master record plus any number of rotating
//! key records, each an independently parseable JSON file. [`store`] owns the
//! files; [`guard`] scans them for structural damage before every connection
//! attempt and tracks per-chat decryption-failure loops.

pub mod guard;
pub mod store;

pub use guard::{CorruptKind, CorruptionGuard, RepairReport};
pub use store::{Credential, CredentialStore, MASTER_RECORD};
