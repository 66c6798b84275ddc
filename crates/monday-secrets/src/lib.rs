//! Seed persistence for the Monday Lightning node.
//!
//! This crate stores the wallet's mnemonic in an opaque secret store and
//! guarantees it is durable before anything builds a node from it.

mod credential;
mod fs;
mod store;

pub use credential::{BACKUP_INFO_KEY, CredentialStore};
pub use fs::FileSecretStore;
pub use store::{MemorySecretStore, SecretStore, SecretStoreError};
