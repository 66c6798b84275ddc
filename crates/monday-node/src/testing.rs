//! A scripted in-process engine.
//!
//! [`ScriptedFactory`] builds [`NodeEngine`]s that keep their state in
//! memory and share one [`ScriptHandle`], so tests can inject events and
//! failures into whatever engine the lifecycle manager currently holds.
//!
//! Like a real engine, a build binds its storage directory to the seed it
//! was built from and refuses to open that storage with another seed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use monday_core::{
    BalanceSnapshot, ChannelDescriptor, Credential, NetworkProfile, NodeConfig,
    PaymentDescriptor, PaymentDirection, PaymentStatus, PeerDescriptor,
};

use crate::engine::{
    EngineError, EngineErrorKind, EngineEvent, EngineFactory, EngineResult, NodeEngine,
};

/// An [`EngineErrorKind::Other`] error.
pub fn engine_error(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::Other, message)
}

#[derive(Default)]
struct ScriptState {
    calls: Vec<String>,
    failures: HashMap<String, EngineError>,
    events: VecDeque<EngineEvent>,
    handled: usize,
    running: bool,
    counter: u64,
    balances: BalanceSnapshot,
    peers: Vec<PeerDescriptor>,
    channels: Vec<ChannelDescriptor>,
    closing: HashSet<String>,
    payments: Vec<PaymentDescriptor>,
}

impl ScriptState {
    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn upsert_peer(&mut self, node_id: &str, address: &str, persist: bool) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.node_id == node_id) {
            peer.address = address.to_string();
            peer.is_persisted |= persist;
            peer.is_connected = true;
        } else {
            self.peers.push(PeerDescriptor {
                node_id: node_id.to_string(),
                address: address.to_string(),
                is_persisted: persist,
                is_connected: true,
            });
        }
    }
}

/// Shared control over scripted engines.
#[derive(Clone, Default)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a raw engine event.
    pub fn push_event(&self, event: EngineEvent) {
        self.lock().events.push_back(event);
    }

    /// Make every call to `operation` fail with `error` until cleared.
    pub fn fail(&self, operation: &str, error: EngineError) {
        self.lock().failures.insert(operation.to_string(), error);
    }

    /// Let `operation` succeed again.
    pub fn clear_failure(&self, operation: &str) {
        self.lock().failures.remove(operation);
    }

    /// Engine operations invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of events acknowledged.
    pub fn handled_count(&self) -> usize {
        self.lock().handled
    }

    /// Number of events still queued.
    pub fn queued_events(&self) -> usize {
        self.lock().events.len()
    }

    /// Set the balances reported.
    pub fn set_balances(&self, balances: BalanceSnapshot) {
        self.lock().balances = balances;
    }

    /// Whether the engine is started.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }
}

impl std::fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ScriptHandle")
            .field("calls", &state.calls.len())
            .field("queued", &state.events.len())
            .field("handled", &state.handled)
            .finish_non_exhaustive()
    }
}

/// A build request the factory accepted.
#[derive(Debug, Clone)]
pub struct BuildRecord {
    /// Configuration passed in.
    pub config: NodeConfig,
    /// Backends passed in.
    pub profile: NetworkProfile,
    /// Credential the keys were derived from.
    pub credential: Credential,
    /// Control over the engine this build produced.
    pub script: ScriptHandle,
}

#[derive(Default)]
struct FactoryState {
    builds: Vec<BuildRecord>,
    fail_next: Option<String>,
    delay: Option<Duration>,
    separate_scripts: bool,
}

/// Builds [`ScriptedEngine`]s.
#[derive(Default)]
pub struct ScriptedFactory {
    script: ScriptHandle,
    state: Mutex<FactoryState>,
}

impl ScriptedFactory {
    /// A factory whose builds succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle shared by every engine this factory builds, unless
    /// [`Self::separate_scripts`] is set.
    pub fn script(&self) -> ScriptHandle {
        self.script.clone()
    }

    /// Successful builds so far.
    pub fn builds(&self) -> Vec<BuildRecord> {
        self.lock().builds.clone()
    }

    /// Fail the next build with `message`.
    pub fn fail_next_build(&self, message: &str) {
        self.lock().fail_next = Some(message.to_string());
    }

    /// Make every build block for `delay` first.
    pub fn build_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Give every later build its own [`ScriptHandle`], reachable through
    /// [`BuildRecord::script`].
    pub fn separate_scripts(&self) {
        self.lock().separate_scripts = true;
    }

    fn lock(&self) -> MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EngineFactory for ScriptedFactory {
    fn build(
        &self,
        config: &NodeConfig,
        profile: &NetworkProfile,
        credential: &Credential,
    ) -> EngineResult<Box<dyn NodeEngine>> {
        let delay = self.lock().delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(engine_error(message));
        }
        bind_storage(config.storage_dir(), credential)?;

        let script = if state.separate_scripts {
            ScriptHandle::default()
        } else {
            self.script.clone()
        };
        state.builds.push(BuildRecord {
            config: config.clone(),
            profile: profile.clone(),
            credential: credential.clone(),
            script: script.clone(),
        });

        Ok(Box::new(ScriptedEngine {
            node_id: format!("02{:064x}", state.builds.len()),
            listening_addresses: config.listening_addresses().to_vec(),
            script,
        }))
    }
}

const WALLET_MARKER: &str = "wallet_fingerprint";

/// Record which seed owns `storage_dir`, failing if another one does.
fn bind_storage(storage_dir: &Path, credential: &Credential) -> EngineResult<()> {
    let mut hasher = DefaultHasher::new();
    credential.phrase().hash(&mut hasher);
    credential.passphrase().hash(&mut hasher);
    let fingerprint = format!("{:016x}", hasher.finish());

    let marker = storage_dir.join(WALLET_MARKER);
    match std::fs::read_to_string(&marker) {
        Ok(existing) if existing == fingerprint => Ok(()),
        Ok(_) => Err(engine_error(
            "wallet in storage was created from a different seed",
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(storage_dir)
                .and_then(|()| std::fs::write(&marker, fingerprint))
                .map_err(|e| engine_error(format!("storage {}: {e}", storage_dir.display())))
        }
        Err(e) => Err(engine_error(format!("storage {}: {e}", marker.display()))),
    }
}

/// An in-memory engine driven by a [`ScriptHandle`].
pub struct ScriptedEngine {
    node_id: String,
    listening_addresses: Vec<String>,
    script: ScriptHandle,
}

impl ScriptedEngine {
    /// Record the call and return the scripted failure, if any.
    fn enter(&self, operation: &str) -> EngineResult<MutexGuard<'_, ScriptState>> {
        let mut state = self.script.lock();
        state.calls.push(operation.to_string());
        if let Some(error) = state.failures.get(operation).cloned() {
            return Err(error);
        }
        Ok(state)
    }
}

#[async_trait]
impl NodeEngine for ScriptedEngine {
    async fn start(&self) -> EngineResult<()> {
        let mut state = self.enter("start")?;
        if state.running {
            return Err(EngineError::new(EngineErrorKind::AlreadyRunning, "already running"));
        }
        state.running = true;
        Ok(())
    }

    async fn stop(&self) -> EngineResult<()> {
        let mut state = self.enter("stop")?;
        if !state.running {
            return Err(EngineError::new(EngineErrorKind::NotRunning, "not running"));
        }
        state.running = false;
        Ok(())
    }

    fn node_id(&self) -> String {
        self.node_id.clone()
    }

    fn listening_addresses(&self) -> Vec<String> {
        self.listening_addresses.clone()
    }

    async fn new_onchain_address(&self) -> EngineResult<String> {
        let mut state = self.enter("new_onchain_address")?;
        let n = state.next_id();
        Ok(format!("bcrt1q{n:038x}"))
    }

    fn balances(&self) -> BalanceSnapshot {
        self.script.lock().balances
    }

    async fn connect(&self, node_id: &str, address: &str, persist: bool) -> EngineResult<()> {
        let mut state = self.enter("connect")?;
        state.upsert_peer(node_id, address, persist);
        Ok(())
    }

    async fn disconnect(&self, node_id: &str) -> EngineResult<()> {
        let mut state = self.enter("disconnect")?;
        let peer = state
            .peers
            .iter_mut()
            .find(|p| p.node_id == node_id)
            .ok_or_else(|| EngineError::new(EngineErrorKind::InvalidInput, "unknown peer"))?;
        peer.is_connected = false;
        Ok(())
    }

    async fn open_channel(
        &self,
        node_id: &str,
        address: &str,
        amount_sats: u64,
        push_msat: Option<u64>,
        _announce: bool,
    ) -> EngineResult<String> {
        let mut state = self.enter("open_channel")?;
        state.upsert_peer(node_id, address, true);

        let n = state.next_id();
        let push_msat = push_msat.unwrap_or(0);
        state.channels.push(ChannelDescriptor {
            channel_id: format!("{n:064x}"),
            user_channel_id: n.to_string(),
            counterparty_node_id: node_id.to_string(),
            channel_value_sats: amount_sats,
            outbound_capacity_msat: amount_sats.saturating_mul(1000).saturating_sub(push_msat),
            inbound_capacity_msat: push_msat,
            confirmations: Some(0),
            is_channel_ready: false,
            is_usable: false,
        });
        Ok(n.to_string())
    }

    async fn close_channel(
        &self,
        channel_id: &str,
        counterparty_node_id: &str,
    ) -> EngineResult<()> {
        let mut state = self.enter("close_channel")?;
        if state.closing.contains(channel_id) {
            return Err(EngineError::new(
                EngineErrorKind::ChannelAlreadyClosing,
                "channel is already closing",
            ));
        }
        let channel = state
            .channels
            .iter_mut()
            .find(|c| c.channel_id == channel_id && c.counterparty_node_id == counterparty_node_id)
            .ok_or_else(|| EngineError::new(EngineErrorKind::InvalidInput, "unknown channel"))?;
        channel.is_usable = false;
        state.closing.insert(channel_id.to_string());
        Ok(())
    }

    async fn send_payment(&self, _invoice: &str, amount_msat: Option<u64>) -> EngineResult<String> {
        let mut state = self.enter("send_payment")?;
        let n = state.next_id();
        let payment_hash = format!("{n:064x}");
        state.payments.push(PaymentDescriptor {
            payment_hash: payment_hash.clone(),
            amount_msat,
            direction: PaymentDirection::Outbound,
            status: PaymentStatus::Pending,
        });
        Ok(payment_hash)
    }

    async fn send_spontaneous_payment(
        &self,
        amount_msat: u64,
        _node_id: &str,
    ) -> EngineResult<String> {
        let mut state = self.enter("send_spontaneous_payment")?;
        let n = state.next_id();
        let payment_hash = format!("{n:064x}");
        state.payments.push(PaymentDescriptor {
            payment_hash: payment_hash.clone(),
            amount_msat: Some(amount_msat),
            direction: PaymentDirection::Outbound,
            status: PaymentStatus::Pending,
        });
        Ok(payment_hash)
    }

    async fn receive_payment(
        &self,
        amount_msat: Option<u64>,
        _description: &str,
        _expiry_secs: u32,
    ) -> EngineResult<String> {
        let mut state = self.enter("receive_payment")?;
        let n = state.next_id();
        state.payments.push(PaymentDescriptor {
            payment_hash: format!("{n:064x}"),
            amount_msat,
            direction: PaymentDirection::Inbound,
            status: PaymentStatus::Pending,
        });
        let amount = amount_msat.map(|a| a.to_string()).unwrap_or_default();
        Ok(format!("lnbcrt{amount}1p{n:x}"))
    }

    async fn send_to_onchain_address(
        &self,
        _address: &str,
        _amount_sats: u64,
    ) -> EngineResult<String> {
        let mut state = self.enter("send_to_onchain_address")?;
        let n = state.next_id();
        Ok(format!("{n:064x}"))
    }

    async fn send_all_to_onchain_address(&self, _address: &str) -> EngineResult<String> {
        let mut state = self.enter("send_all_to_onchain_address")?;
        let n = state.next_id();
        Ok(format!("{n:064x}"))
    }

    async fn sync_wallets(&self) -> EngineResult<()> {
        self.enter("sync_wallets").map(drop)
    }

    fn list_peers(&self) -> Vec<PeerDescriptor> {
        self.script.lock().peers.clone()
    }

    fn list_channels(&self) -> Vec<ChannelDescriptor> {
        self.script.lock().channels.clone()
    }

    fn list_payments(&self) -> Vec<PaymentDescriptor> {
        self.script.lock().payments.clone()
    }

    fn payment(&self, payment_hash: &str) -> EngineResult<Option<PaymentDescriptor>> {
        let state = self.enter("payment")?;
        Ok(state
            .payments
            .iter()
            .find(|p| p.payment_hash == payment_hash)
            .cloned())
    }

    async fn remove_payment(&self, payment_hash: &str) -> EngineResult<()> {
        let mut state = self.enter("remove_payment")?;
        state.payments.retain(|p| p.payment_hash != payment_hash);
        Ok(())
    }

    fn next_event(&self) -> Option<EngineEvent> {
        self.script.lock().events.front().cloned()
    }

    fn event_handled(&self) -> EngineResult<()> {
        let mut state = self.enter("event_handled")?;
        if state.events.pop_front().is_some() {
            state.handled += 1;
        }
        Ok(())
    }
}
