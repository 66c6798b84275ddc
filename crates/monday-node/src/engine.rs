//! The seam between the coordination core and the node engine.
//!
//! Everything the core needs from a Lightning node engine goes through
//! [`NodeEngine`]. Identifiers cross this boundary as opaque strings; only
//! the engine implementation parses them.

use async_trait::async_trait;
use monday_core::{
    BalanceSnapshot, ChannelDescriptor, Credential, NetworkProfile, NodeConfig,
    PaymentDescriptor, PeerDescriptor,
};

/// Result type for engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure kinds an engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Engine already started.
    AlreadyRunning,
    /// Engine not started.
    NotRunning,
    /// Peer could not be reached.
    ConnectionFailed,
    /// Channel open was rejected.
    ChannelCreationFailed,
    /// Channel close was rejected.
    ChannelClosingFailed,
    /// Channel is already shutting down.
    ChannelAlreadyClosing,
    /// Invoice could not be created.
    InvoiceCreationFailed,
    /// Invoice could not be parsed or used.
    InvalidInvoice,
    /// Amount rejected.
    InvalidAmount,
    /// Not enough funds.
    InsufficientFunds,
    /// Payment could not be dispatched.
    PaymentSendingFailed,
    /// Payment was already sent.
    DuplicatePayment,
    /// Malformed identifier or address.
    InvalidInput,
    /// Engine storage write failed.
    PersistenceFailed,
    /// Anything else.
    Other,
}

/// An error raised by the node engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// What went wrong.
    pub kind: EngineErrorKind,
    /// The engine's own message.
    pub message: String,
}

impl EngineError {
    /// Create an error of `kind`.
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {}

/// A raw event from the engine's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Outbound payment settled.
    PaymentSuccessful {
        /// Payment hash.
        payment_hash: String,
    },
    /// Outbound payment abandoned.
    PaymentFailed {
        /// Payment hash.
        payment_hash: String,
    },
    /// Inbound payment claimed.
    PaymentReceived {
        /// Payment hash.
        payment_hash: String,
        /// Amount (millisatoshis).
        amount_msat: u64,
    },
    /// Channel is ready.
    ChannelReady {
        /// Channel id.
        channel_id: String,
        /// Local channel id.
        user_channel_id: String,
    },
    /// Channel closed.
    ChannelClosed {
        /// Channel id.
        channel_id: String,
        /// Local channel id.
        user_channel_id: String,
    },
    /// An event kind the application does not consume.
    Other {
        /// Engine-side description.
        kind: String,
    },
}

/// A built Lightning node engine.
///
/// Methods that talk to the network or disk are async; snapshot reads are not.
#[async_trait]
pub trait NodeEngine: Send + Sync {
    /// Start background processing.
    async fn start(&self) -> EngineResult<()>;

    /// Stop background processing.
    async fn stop(&self) -> EngineResult<()>;

    /// This node's public key.
    fn node_id(&self) -> String;

    /// Addresses the node listens on.
    fn listening_addresses(&self) -> Vec<String>;

    /// A fresh on-chain address owned by the wallet.
    async fn new_onchain_address(&self) -> EngineResult<String>;

    /// Current balances.
    fn balances(&self) -> BalanceSnapshot;

    /// Connect to a peer.
    async fn connect(&self, node_id: &str, address: &str, persist: bool) -> EngineResult<()>;

    /// Disconnect from a peer.
    async fn disconnect(&self, node_id: &str) -> EngineResult<()>;

    /// Connect to a peer and open a channel; returns the user channel id.
    async fn open_channel(
        &self,
        node_id: &str,
        address: &str,
        amount_sats: u64,
        push_msat: Option<u64>,
        announce: bool,
    ) -> EngineResult<String>;

    /// Cooperatively close a channel.
    async fn close_channel(&self, channel_id: &str, counterparty_node_id: &str)
    -> EngineResult<()>;

    /// Pay a BOLT11 invoice; returns the payment hash.
    async fn send_payment(&self, invoice: &str, amount_msat: Option<u64>) -> EngineResult<String>;

    /// Send a keysend payment; returns the payment hash.
    async fn send_spontaneous_payment(&self, amount_msat: u64, node_id: &str)
    -> EngineResult<String>;

    /// Create an invoice; `None` amount makes it variable-amount.
    async fn receive_payment(
        &self,
        amount_msat: Option<u64>,
        description: &str,
        expiry_secs: u32,
    ) -> EngineResult<String>;

    /// Send on-chain; returns the txid.
    async fn send_to_onchain_address(&self, address: &str, amount_sats: u64)
    -> EngineResult<String>;

    /// Sweep the on-chain wallet; returns the txid.
    async fn send_all_to_onchain_address(&self, address: &str) -> EngineResult<String>;

    /// Sync on-chain and Lightning wallets now.
    async fn sync_wallets(&self) -> EngineResult<()>;

    /// Known peers.
    fn list_peers(&self) -> Vec<PeerDescriptor>;

    /// Open and pending channels.
    fn list_channels(&self) -> Vec<ChannelDescriptor>;

    /// Payment history.
    fn list_payments(&self) -> Vec<PaymentDescriptor>;

    /// Look up one payment.
    fn payment(&self, payment_hash: &str) -> EngineResult<Option<PaymentDescriptor>>;

    /// Forget a payment.
    async fn remove_payment(&self, payment_hash: &str) -> EngineResult<()>;

    /// Peek at the head of the event queue. Repeats until [`Self::event_handled`].
    fn next_event(&self) -> Option<EngineEvent>;

    /// Pop the head of the event queue.
    fn event_handled(&self) -> EngineResult<()>;
}

/// Constructs engines.
pub trait EngineFactory: Send + Sync {
    /// Build an engine for `config`, applying the backends in `profile` and
    /// keys derived from `credential`.
    fn build(
        &self,
        config: &NodeConfig,
        profile: &NetworkProfile,
        credential: &Credential,
    ) -> EngineResult<Box<dyn NodeEngine>>;
}
