//! Read-model snapshots and application events.
//!
//! Every identifier here is an opaque string as handed out by the node
//! engine (hex for hashes and ids). Snapshots go stale; re-query for
//! current state.

use serde::{Deserialize, Serialize};

/// A channel as seen at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Channel id.
    pub channel_id: String,
    /// Local id assigned when the channel was opened.
    pub user_channel_id: String,
    /// Counterparty node id.
    pub counterparty_node_id: String,
    /// Total channel value (satoshis).
    pub channel_value_sats: u64,
    /// Sendable capacity (millisatoshis).
    pub outbound_capacity_msat: u64,
    /// Receivable capacity (millisatoshis).
    pub inbound_capacity_msat: u64,
    /// Funding confirmations, if known.
    pub confirmations: Option<u32>,
    /// Funding is locked in on both sides.
    pub is_channel_ready: bool,
    /// Ready and the peer is connected.
    pub is_usable: bool,
}

/// Direction of a payment relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentDirection {
    /// Received by this node.
    Inbound,
    /// Sent by this node.
    Outbound,
}

/// Status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// In flight.
    Pending,
    /// Settled.
    Succeeded,
    /// Gave up.
    Failed,
}

/// A payment as seen at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDescriptor {
    /// Payment hash.
    pub payment_hash: String,
    /// Amount (millisatoshis), absent for variable-amount invoices not yet paid.
    pub amount_msat: Option<u64>,
    /// Direction.
    pub direction: PaymentDirection,
    /// Status.
    pub status: PaymentStatus,
}

/// A known peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    /// Peer node id.
    pub node_id: String,
    /// Peer socket address.
    pub address: String,
    /// Reconnected on restart.
    pub is_persisted: bool,
    /// Currently connected.
    pub is_connected: bool,
}

/// Wallet balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// All on-chain funds, including unconfirmed (satoshis).
    pub total_onchain_sats: u64,
    /// On-chain funds available to spend (satoshis).
    pub spendable_onchain_sats: u64,
    /// Funds held in channels (satoshis).
    pub total_lightning_sats: u64,
}

/// An event emitted by the node, consumed once and then acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    /// An outbound payment settled.
    PaymentSuccessful {
        /// Payment hash.
        payment_hash: String,
    },
    /// An outbound payment failed.
    PaymentFailed {
        /// Payment hash.
        payment_hash: String,
    },
    /// An inbound payment was claimed.
    PaymentReceived {
        /// Payment hash.
        payment_hash: String,
        /// Amount received (millisatoshis).
        amount_msat: u64,
    },
    /// A channel became usable.
    ChannelReady {
        /// Channel id.
        channel_id: String,
        /// Local channel id.
        user_channel_id: String,
    },
    /// A channel was closed.
    ChannelClosed {
        /// Channel id.
        channel_id: String,
        /// Local channel id.
        user_channel_id: String,
    },
}

impl std::fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PaymentSuccessful { payment_hash } => {
                write!(f, "payment successful: {payment_hash}")
            }
            Self::PaymentFailed { payment_hash } => write!(f, "payment failed: {payment_hash}"),
            Self::PaymentReceived {
                payment_hash,
                amount_msat,
            } => write!(f, "payment received: {payment_hash} ({amount_msat} msat)"),
            Self::ChannelReady {
                channel_id,
                user_channel_id,
            } => write!(f, "channel ready: {channel_id} (user id {user_channel_id})"),
            Self::ChannelClosed {
                channel_id,
                user_channel_id,
            } => write!(f, "channel closed: {channel_id} (user id {user_channel_id})"),
        }
    }
}
