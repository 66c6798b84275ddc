//! Node lifecycle management.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use monday_core::{
    Credential, Error, NetworkProfile, NetworkSelection, NodeConfig, NodeSettings, Result,
};
use monday_secrets::CredentialStore;
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, watch};

use crate::commands::CommandFacade;
use crate::engine::{EngineFactory, NodeEngine};
use crate::events::EventClassifier;

/// Where the node is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing built yet.
    Unbuilt,
    /// A build is in progress.
    Building,
    /// Built, never started.
    Built,
    /// Started.
    Running,
    /// A stop is in progress.
    Stopping,
    /// Stopped; can be started again or rebuilt.
    Stopped,
    /// The last build failed.
    Failed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unbuilt => "unbuilt",
            Self::Building => "building",
            Self::Built => "built",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A built engine together with the configuration it was built from.
pub struct NodeHandle {
    engine: Box<dyn NodeEngine>,
    config: NodeConfig,
    profile: NetworkProfile,
    generation: u64,
}

impl NodeHandle {
    /// The engine.
    pub fn engine(&self) -> &dyn NodeEngine {
        self.engine.as_ref()
    }

    /// Configuration snapshot of this build.
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Backend profile of this build.
    pub const fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    /// Which build of this process produced the engine, starting at 1.
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owns the single node of this process and serializes its transitions.
///
/// Construct one and share it by reference (or `Arc`) with every consumer.
/// Commands and event polling borrow the node through a read guard; stop
/// takes the write half, so it waits for in-flight operations to finish.
pub struct LifecycleManager {
    factory: Arc<dyn EngineFactory>,
    credentials: CredentialStore,
    settings: NodeSettings,
    /// Held for the duration of build, start, stop and wallet deletion.
    transition: Mutex<()>,
    /// Held by the single attached event consumer.
    consumer: Mutex<()>,
    slot: RwLock<Option<NodeHandle>>,
    state: watch::Sender<LifecycleState>,
    builds: AtomicU64,
}

impl LifecycleManager {
    /// Create a manager with nothing built.
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        credentials: CredentialStore,
        settings: NodeSettings,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Unbuilt);
        Self {
            factory,
            credentials,
            settings,
            transition: Mutex::new(()),
            consumer: Mutex::new(()),
            slot: RwLock::new(None),
            state,
            builds: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// The credential store backing this node.
    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Configuration of the current build, if any.
    pub async fn node_config(&self) -> Option<NodeConfig> {
        self.slot.read().await.as_ref().map(|h| h.config.clone())
    }

    /// Profile of the current build, if any.
    pub async fn profile(&self) -> Option<NetworkProfile> {
        self.slot.read().await.as_ref().map(|h| h.profile.clone())
    }

    /// Generation of the current build, if any.
    pub(crate) async fn generation(&self) -> Option<u64> {
        self.slot.read().await.as_ref().map(NodeHandle::generation)
    }

    /// Typed node operations.
    pub const fn commands(&self) -> CommandFacade<'_> {
        CommandFacade::new(self)
    }

    /// Attach the event consumer.
    ///
    /// # Errors
    ///
    /// [`Error::ConsumerAttached`] while another classifier is alive.
    pub fn event_classifier(&self) -> Result<EventClassifier<'_>> {
        let guard = self
            .consumer
            .try_lock()
            .map_err(|_| Error::ConsumerAttached)?;
        Ok(EventClassifier::new(self, guard))
    }

    /// Build a node for `profile`.
    ///
    /// Without a supplied credential the persisted one is used, or a new one
    /// is generated and persisted first. A supplied credential must match
    /// the persisted one, and is persisted if none exists yet.
    ///
    /// # Errors
    ///
    /// [`Error::LifecycleBusy`] if another transition is in flight,
    /// [`Error::AlreadyRunning`] if the node is running,
    /// [`Error::PersistenceFailed`] / [`Error::StorageUnavailable`] if the
    /// credential cannot be resolved, [`Error::BuildFailed`] if the engine
    /// cannot be constructed.
    pub async fn build(
        &self,
        profile: &NetworkProfile,
        credential: Option<Credential>,
    ) -> Result<()> {
        let _transition = self.begin_transition()?;

        match self.state() {
            LifecycleState::Unbuilt
            | LifecycleState::Built
            | LifecycleState::Stopped
            | LifecycleState::Failed => {}
            LifecycleState::Running => return Err(Error::AlreadyRunning),
            LifecycleState::Building | LifecycleState::Stopping => {
                return Err(Error::LifecycleBusy);
            }
        }

        self.set_state(LifecycleState::Building);
        // The previous engine is not running; release it before a new one opens the same storage.
        self.slot.write().await.take();

        match self.build_handle(profile, credential).await {
            Ok(handle) => {
                tracing::info!(
                    network = %profile.network,
                    storage = %handle.config.storage_dir().display(),
                    node_id = %handle.engine.node_id(),
                    "Node built"
                );
                *self.slot.write().await = Some(handle);
                self.set_state(LifecycleState::Built);
                Ok(())
            }
            Err(e) => {
                tracing::error!(network = %profile.network, "Node build failed: {e}");
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    /// Start the built node.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] if running, [`Error::StartFailed`] if
    /// nothing is built or the engine refuses.
    pub async fn start(&self) -> Result<()> {
        let _transition = self.begin_transition()?;

        match self.state() {
            LifecycleState::Built | LifecycleState::Stopped => {}
            LifecycleState::Running => return Err(Error::AlreadyRunning),
            state => return Err(Error::StartFailed(format!("node is {state}"))),
        }

        let slot = self.slot.read().await;
        let handle = slot
            .as_ref()
            .ok_or_else(|| Error::StartFailed("node has not been built".into()))?;

        handle.engine.start().await.map_err(|e| {
            tracing::error!("Node start failed: {e}");
            Error::StartFailed(e.message)
        })?;

        self.set_state(LifecycleState::Running);
        tracing::info!(network = %handle.profile.network, "Node started");
        Ok(())
    }

    /// Stop the running node.
    ///
    /// Stopping a node that is not running fails with
    /// [`Error::StopFailed`]. If the engine refuses, the node stays running
    /// and the call may be retried.
    pub async fn stop(&self) -> Result<()> {
        let _transition = self.begin_transition()?;

        if self.state() != LifecycleState::Running {
            return Err(Error::StopFailed("node is not running".into()));
        }

        let slot = self.slot.write().await;
        let handle = slot
            .as_ref()
            .ok_or_else(|| Error::StopFailed("node is not running".into()))?;

        self.set_state(LifecycleState::Stopping);
        match handle.engine.stop().await {
            Ok(()) => {
                self.set_state(LifecycleState::Stopped);
                tracing::info!(network = %handle.profile.network, "Node stopped");
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Running);
                tracing::error!("Node stop failed: {e}");
                Err(Error::StopFailed(e.message))
            }
        }
    }

    /// Delete the wallet credential and discard the built node.
    ///
    /// The engine storage of every network is removed first: it holds wallet
    /// state derived from the old seed, which a fresh credential could not
    /// open. The next [`Self::build`] generates a fresh credential.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] while the node runs; stop it first.
    /// [`Error::PersistenceFailed`] if storage cannot be removed, in which
    /// case the credential is kept.
    pub async fn delete_wallet(&self) -> Result<()> {
        let _transition = self.begin_transition()?;

        if self.state() == LifecycleState::Running {
            return Err(Error::AlreadyRunning);
        }

        let mut slot = self.slot.write().await;
        slot.take();
        self.set_state(LifecycleState::Unbuilt);

        wipe_wallet(&self.credentials, &self.settings)?;

        tracing::info!("Wallet deleted");
        Ok(())
    }

    /// Borrow the node if it is running.
    pub(crate) async fn running_handle(&self) -> Result<RwLockReadGuard<'_, NodeHandle>> {
        let slot = self.slot.read().await;
        if self.state() != LifecycleState::Running {
            return Err(Error::NodeNotRunning);
        }
        RwLockReadGuard::try_map(slot, Option::as_ref).map_err(|_| Error::NodeNotRunning)
    }

    fn begin_transition(&self) -> Result<MutexGuard<'_, ()>> {
        self.transition.try_lock().map_err(|_| Error::LifecycleBusy)
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Lifecycle transition");
        }
    }

    async fn build_handle(
        &self,
        profile: &NetworkProfile,
        supplied: Option<Credential>,
    ) -> Result<NodeHandle> {
        let credential = self.resolve_credential(supplied)?;
        let config = NodeConfig::new(profile, &self.settings);
        remove_stale_log(&config);

        let factory = Arc::clone(&self.factory);
        let engine_config = config.clone();
        let engine_profile = profile.clone();
        let engine = tokio::task::spawn_blocking(move || {
            factory.build(&engine_config, &engine_profile, &credential)
        })
        .await
        .map_err(|e| Error::BuildFailed(format!("build task failed: {e}")))?
        .map_err(|e| Error::BuildFailed(e.message))?;

        Ok(NodeHandle {
            engine,
            config,
            profile: profile.clone(),
            generation: self.builds.fetch_add(1, Ordering::Relaxed) + 1,
        })
    }

    fn resolve_credential(&self, supplied: Option<Credential>) -> Result<Credential> {
        let Some(supplied) = supplied else {
            return self.credentials.get_or_create_credential();
        };

        match self.credentials.get_credential()? {
            Some(stored) if stored == supplied => Ok(supplied),
            Some(_) => Err(Error::BuildFailed(
                "supplied credential does not match the persisted wallet".into(),
            )),
            None => {
                self.credentials.save_credential(&supplied)?;
                Ok(supplied)
            }
        }
    }
}

/// The engine appends to its latest log file; start each build with a fresh one.
fn remove_stale_log(config: &NodeConfig) {
    let path = config.log_file_path();
    match std::fs::remove_file(&path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed previous engine log"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "Could not remove engine log: {e}"),
    }
}

/// Remove the engine storage of every network under `settings`, then the
/// seed. Storage goes first so a failure leaves a wallet that still opens.
///
/// Nothing may hold an engine over this storage.
///
/// # Errors
///
/// [`Error::PersistenceFailed`] if storage cannot be removed, or the
/// credential store's error if the seed cannot be deleted.
pub fn wipe_wallet(credentials: &CredentialStore, settings: &NodeSettings) -> Result<()> {
    for network in NetworkSelection::all() {
        remove_storage(&settings.storage_dir(*network))?;
    }
    credentials.delete_credential()
}

fn remove_storage(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            tracing::info!(path = %dir.display(), "Removed node storage");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::PersistenceFailed(format!("{}: {e}", dir.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;
    use monday_core::{NetworkSelection, resolve};
    use monday_secrets::MemorySecretStore;

    struct Fixture {
        secrets: Arc<MemorySecretStore>,
        factory: Arc<ScriptedFactory>,
        manager: LifecycleManager,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let secrets = Arc::new(MemorySecretStore::new());
        let factory = Arc::new(ScriptedFactory::new());
        let manager = LifecycleManager::new(
            factory.clone(),
            CredentialStore::new(secrets.clone()),
            NodeSettings::new(dir.path()),
        );
        Fixture {
            secrets,
            factory,
            manager,
            _dir: dir,
        }
    }

    fn regtest() -> NetworkProfile {
        resolve(NetworkSelection::Regtest)
    }

    #[tokio::test]
    async fn test_build_start_stop() {
        let f = fixture();
        assert_eq!(f.manager.state(), LifecycleState::Unbuilt);

        f.manager.build(&regtest(), None).await.unwrap();
        assert_eq!(f.manager.state(), LifecycleState::Built);

        f.manager.start().await.unwrap();
        assert_eq!(f.manager.state(), LifecycleState::Running);

        f.manager.stop().await.unwrap();
        assert_eq!(f.manager.state(), LifecycleState::Stopped);

        // A stopped node can be started again without a rebuild.
        f.manager.start().await.unwrap();
        assert_eq!(f.manager.state(), LifecycleState::Running);
    }

    #[tokio::test]
    async fn test_build_while_running_fails() {
        let f = fixture();
        f.manager.build(&regtest(), None).await.unwrap();
        f.manager.start().await.unwrap();

        let err = f.manager.build(&regtest(), None).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));
        assert_eq!(f.manager.state(), LifecycleState::Running);
        assert_eq!(f.factory.builds().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_fails() {
        let f = fixture();
        assert!(matches!(f.manager.stop().await, Err(Error::StopFailed(_))));

        f.manager.build(&regtest(), None).await.unwrap();
        f.manager.start().await.unwrap();
        f.manager.stop().await.unwrap();

        assert!(matches!(f.manager.stop().await, Err(Error::StopFailed(_))));
        assert_eq!(f.manager.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_start_requires_build() {
        let f = fixture();
        assert!(matches!(f.manager.start().await, Err(Error::StartFailed(_))));

        f.manager.build(&regtest(), None).await.unwrap();
        f.manager.start().await.unwrap();
        assert!(matches!(f.manager.start().await, Err(Error::AlreadyRunning)));
    }

    #[tokio::test]
    async fn test_build_failure_sets_failed() {
        let f = fixture();
        f.factory.fail_next_build("esplora url rejected");

        let err = f.manager.build(&regtest(), None).await.unwrap_err();
        assert!(matches!(err, Error::BuildFailed(ref reason) if reason.contains("esplora")));
        assert_eq!(f.manager.state(), LifecycleState::Failed);
        assert!(f.manager.node_config().await.is_none());

        // Recoverable: the next build goes through.
        f.manager.build(&regtest(), None).await.unwrap();
        assert_eq!(f.manager.state(), LifecycleState::Built);
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_build() {
        let f = fixture();
        f.secrets.fail_writes(true);

        let err = f.manager.build(&regtest(), None).await.unwrap_err();
        assert!(matches!(err, Error::PersistenceFailed(_)));
        assert_eq!(f.manager.state(), LifecycleState::Failed);
        assert!(f.factory.builds().is_empty(), "engine built with an unpersisted secret");
    }

    #[tokio::test]
    async fn test_unreadable_store_aborts_build() {
        let f = fixture();
        f.secrets.fail_reads(true);

        let err = f.manager.build(&regtest(), None).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        assert!(f.factory.builds().is_empty());
        assert!(f.secrets.is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_keeps_built() {
        let f = fixture();
        f.manager.build(&regtest(), None).await.unwrap();
        f.factory.script().fail("start", crate::testing::engine_error("no esplora"));

        assert!(matches!(f.manager.start().await, Err(Error::StartFailed(_))));
        assert_eq!(f.manager.state(), LifecycleState::Built);
    }

    #[tokio::test]
    async fn test_stop_failure_stays_running() {
        let f = fixture();
        f.manager.build(&regtest(), None).await.unwrap();
        f.manager.start().await.unwrap();
        f.factory.script().fail("stop", crate::testing::engine_error("busy"));

        assert!(matches!(f.manager.stop().await, Err(Error::StopFailed(_))));
        assert_eq!(f.manager.state(), LifecycleState::Running);

        f.factory.script().clear_failure("stop");
        f.manager.stop().await.unwrap();
        assert_eq!(f.manager.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_supplied_credential_must_match() {
        let f = fixture();
        let first = f.manager.credentials().get_or_create_credential().unwrap();
        let other = f.manager.credentials().generate_credential().unwrap();

        let err = f.manager.build(&regtest(), Some(other)).await.unwrap_err();
        assert!(matches!(err, Error::BuildFailed(_)));

        f.manager.build(&regtest(), Some(first.clone())).await.unwrap();
        assert_eq!(f.factory.builds()[0].credential, first);
    }

    #[tokio::test]
    async fn test_supplied_credential_is_persisted() {
        let f = fixture();
        let supplied = f.manager.credentials().generate_credential().unwrap();

        f.manager.build(&regtest(), Some(supplied.clone())).await.unwrap();
        assert_eq!(
            f.manager.credentials().get_credential().unwrap(),
            Some(supplied)
        );
    }

    #[tokio::test]
    async fn test_delete_wallet_requires_stop() {
        let f = fixture();
        f.manager.build(&regtest(), None).await.unwrap();
        f.manager.start().await.unwrap();

        assert!(matches!(
            f.manager.delete_wallet().await,
            Err(Error::AlreadyRunning)
        ));

        f.manager.stop().await.unwrap();
        f.manager.delete_wallet().await.unwrap();
        assert_eq!(f.manager.state(), LifecycleState::Unbuilt);
        assert!(f.secrets.is_empty());
    }

    #[tokio::test]
    async fn test_delete_wallet_removes_storage() {
        let f = fixture();
        let signet = resolve(NetworkSelection::Signet);
        f.manager.build(&regtest(), None).await.unwrap();
        f.manager.build(&signet, None).await.unwrap();
        let regtest_dir = f.factory.builds()[0].config.storage_dir().to_path_buf();
        let signet_dir = f.factory.builds()[1].config.storage_dir().to_path_buf();
        assert!(regtest_dir.exists() && signet_dir.exists());

        f.manager.delete_wallet().await.unwrap();
        assert!(!regtest_dir.exists());
        assert!(!signet_dir.exists());

        // Storage bound to the old seed would refuse the new one.
        f.manager.build(&regtest(), None).await.unwrap();
        assert_ne!(f.factory.builds()[2].credential, f.factory.builds()[0].credential);
    }

    #[tokio::test]
    async fn test_failed_storage_removal_keeps_seed() {
        let f = fixture();
        f.manager.build(&regtest(), None).await.unwrap();
        let blocker = f.manager.settings.storage_dir(NetworkSelection::Mainnet);
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = f.manager.delete_wallet().await.unwrap_err();
        assert!(matches!(err, Error::PersistenceFailed(_)));
        assert!(f.manager.credentials().get_credential().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_storage_rejects_another_seed() {
        let f = fixture();
        f.manager.build(&regtest(), None).await.unwrap();

        // Dropping only the seed leaves storage from the old wallet behind.
        f.manager.credentials().delete_credential().unwrap();
        let err = f.manager.build(&regtest(), None).await.unwrap_err();
        assert!(matches!(err, Error::BuildFailed(ref reason) if reason.contains("different seed")));
    }

    #[tokio::test]
    async fn test_each_build_has_new_generation() {
        let f = fixture();
        assert_eq!(f.manager.generation().await, None);

        f.manager.build(&regtest(), None).await.unwrap();
        assert_eq!(f.manager.generation().await, Some(1));
        f.manager.build(&regtest(), None).await.unwrap();
        assert_eq!(f.manager.generation().await, Some(2));

        // Restarting keeps the engine, and with it the generation.
        f.manager.start().await.unwrap();
        f.manager.stop().await.unwrap();
        f.manager.start().await.unwrap();
        assert_eq!(f.manager.generation().await, Some(2));
    }

    #[tokio::test]
    async fn test_concurrent_transition_is_busy() {
        let f = fixture();
        let _held = f.manager.begin_transition().unwrap();

        assert!(matches!(
            f.manager.build(&regtest(), None).await,
            Err(Error::LifecycleBusy)
        ));
        assert!(matches!(f.manager.start().await, Err(Error::LifecycleBusy)));
        assert!(matches!(f.manager.stop().await, Err(Error::LifecycleBusy)));
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let f = fixture();
        let mut rx = f.manager.subscribe();

        f.manager.build(&regtest(), None).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), LifecycleState::Built);
    }

    #[tokio::test]
    async fn test_build_uses_profile_and_settings() {
        let f = fixture();
        let profile = resolve(NetworkSelection::Testnet);
        f.manager.build(&profile, None).await.unwrap();

        let builds = f.factory.builds();
        assert_eq!(builds[0].profile, profile);
        assert!(builds[0].config.storage_dir().ends_with("testnet"));
        assert_eq!(f.manager.profile().await, Some(profile));
    }
}
