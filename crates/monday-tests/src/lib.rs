//! Fixtures shared by the cross-crate scenarios.

use std::path::Path;
use std::sync::Arc;

use monday_core::{NetworkSelection, NodeSettings, resolve};
use monday_node::LifecycleManager;
use monday_node::testing::{ScriptHandle, ScriptedFactory};
use monday_secrets::{CredentialStore, FileSecretStore, SecretStore};

/// A lifecycle manager over the scripted engine, rooted at a directory.
///
/// Opening a second harness on the same root behaves like restarting the
/// application: the wallet seed is read back from disk.
pub struct Harness {
    pub manager: LifecycleManager,
    pub factory: Arc<ScriptedFactory>,
    pub script: ScriptHandle,
}

impl Harness {
    /// Secrets in `root/secrets`, node storage in `root/nodes`.
    pub fn open(root: &Path) -> Self {
        Self::with_secrets(root, Arc::new(FileSecretStore::new(root.join("secrets"))))
    }

    /// Use `secrets` instead of the file store.
    pub fn with_secrets(root: &Path, secrets: Arc<dyn SecretStore>) -> Self {
        let factory = Arc::new(ScriptedFactory::new());
        let script = factory.script();
        let manager = LifecycleManager::new(
            factory.clone(),
            CredentialStore::new(secrets),
            NodeSettings::new(root.join("nodes")),
        );
        Self {
            manager,
            factory,
            script,
        }
    }

    /// Open, build for regtest and start.
    pub async fn running(root: &Path) -> anyhow::Result<Self> {
        let harness = Self::open(root);
        harness
            .manager
            .build(&resolve(NetworkSelection::Regtest), None)
            .await?;
        harness.manager.start().await?;
        Ok(harness)
    }
}
