//! [`NodeEngine`] backed by LDK Node.
//!
//! LDK Node runs its own runtime and blocks the calling thread, so every
//! call that may touch the network or disk is moved to the blocking pool.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use ldk_node::bitcoin::secp256k1::PublicKey;
use ldk_node::bitcoin::{Address, Network};
use ldk_node::config::EsploraSyncConfig;
use ldk_node::lightning::ln::channelmanager::PaymentId;
use ldk_node::lightning::ln::msgs::SocketAddress;
use ldk_node::lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescription, Description};
use ldk_node::payment::{
    PaymentDetails, PaymentDirection as LdkPaymentDirection, PaymentStatus as LdkPaymentStatus,
};
use ldk_node::{Builder, Event, Node};
use monday_core::{
    BalanceSnapshot, ChannelDescriptor, Credential, LogLevel, NetworkProfile, NetworkSelection,
    NodeConfig, PaymentDescriptor, PaymentDirection, PaymentStatus, PeerDescriptor,
};

use crate::engine::{
    EngineError, EngineErrorKind, EngineEvent, EngineFactory, EngineResult, NodeEngine,
};

/// Builds [`LdkEngine`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LdkEngineFactory;

impl LdkEngineFactory {
    /// Create the factory.
    pub const fn new() -> Self {
        Self
    }
}

impl EngineFactory for LdkEngineFactory {
    fn build(
        &self,
        config: &NodeConfig,
        profile: &NetworkProfile,
        credential: &Credential,
    ) -> EngineResult<Box<dyn NodeEngine>> {
        let network = bitcoin_network(config.network());
        let mut builder = Builder::new();

        builder.set_network(network);
        builder.set_storage_dir_path(config.storage_dir().display().to_string());
        builder.set_filesystem_logger(
            Some(config.log_file_path().display().to_string()),
            Some(ldk_log_level(config.log_level())),
        );

        let sync_config = EsploraSyncConfig {
            onchain_wallet_sync_interval_secs: config.onchain_wallet_sync_interval_secs(),
            lightning_wallet_sync_interval_secs: config.lightning_wallet_sync_interval_secs(),
            fee_rate_cache_update_interval_secs: config.fee_rate_cache_update_interval_secs(),
        };
        builder.set_chain_source_esplora(profile.chain_data_url.to_string(), Some(sync_config));

        if let Some(gossip_url) = profile.gossip_url {
            builder.set_gossip_source_rgs(gossip_url.to_string());
        }

        let listening_addresses = config
            .listening_addresses()
            .iter()
            .map(|a| parse_socket_address(a))
            .collect::<EngineResult<Vec<_>>>()?;
        builder
            .set_listening_addresses(listening_addresses)
            .map_err(|e| EngineError::new(EngineErrorKind::InvalidInput, e.to_string()))?;

        let mnemonic = ldk_node::bip39::Mnemonic::parse(credential.phrase())
            .map_err(|e| EngineError::new(EngineErrorKind::InvalidInput, e.to_string()))?;
        builder.set_entropy_bip39_mnemonic(mnemonic, credential.passphrase().map(str::to_string));

        // LDK Node applies its own CLTV expiry delta.
        tracing::debug!(
            cltv_expiry_delta = config.default_cltv_expiry_delta(),
            "CLTV expiry delta not configurable on this engine"
        );

        let node = builder
            .build()
            .map_err(|e| EngineError::new(EngineErrorKind::Other, e.to_string()))?;

        Ok(Box::new(LdkEngine {
            node: Arc::new(node),
            network,
            closing: ClosingChannels::default(),
        }))
    }
}

/// A built LDK node.
pub struct LdkEngine {
    node: Arc<Node>,
    network: Network,
    closing: ClosingChannels,
}

/// Channels a close was requested for, until the engine reports them closed.
///
/// Kept in memory only: after a rebuild, closing a channel that is still
/// shutting down again is reported as a plain close failure.
#[derive(Debug, Default)]
struct ClosingChannels(Mutex<HashSet<String>>);

impl ClosingChannels {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn contains(&self, channel_id: &str) -> bool {
        self.lock().contains(channel_id)
    }

    fn requested(&self, channel_id: &str) {
        self.lock().insert(channel_id.to_string());
    }

    fn closed(&self, channel_id: &str) {
        self.lock().remove(channel_id);
    }
}

impl LdkEngine {
    async fn blocking<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Node) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let node = Arc::clone(&self.node);
        tokio::task::spawn_blocking(move || f(&node))
            .await
            .map_err(|e| EngineError::new(EngineErrorKind::Other, format!("engine task failed: {e}")))?
    }

    fn parse_address(&self, address: &str) -> EngineResult<Address> {
        Address::from_str(address)
            .and_then(|a| a.require_network(self.network))
            .map_err(|e| EngineError::new(EngineErrorKind::InvalidInput, e.to_string()))
    }
}

#[async_trait]
impl NodeEngine for LdkEngine {
    async fn start(&self) -> EngineResult<()> {
        self.blocking(|node| node.start().map_err(engine_error)).await
    }

    async fn stop(&self) -> EngineResult<()> {
        self.blocking(|node| node.stop().map_err(engine_error)).await
    }

    fn node_id(&self) -> String {
        self.node.node_id().to_string()
    }

    fn listening_addresses(&self) -> Vec<String> {
        self.node
            .listening_addresses()
            .unwrap_or_default()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    async fn new_onchain_address(&self) -> EngineResult<String> {
        self.blocking(|node| {
            node.onchain_payment()
                .new_address()
                .map(|a| a.to_string())
                .map_err(engine_error)
        })
        .await
    }

    fn balances(&self) -> BalanceSnapshot {
        let balances = self.node.list_balances();
        BalanceSnapshot {
            total_onchain_sats: balances.total_onchain_balance_sats,
            spendable_onchain_sats: balances.spendable_onchain_balance_sats,
            total_lightning_sats: balances.total_lightning_balance_sats,
        }
    }

    async fn connect(&self, node_id: &str, address: &str, persist: bool) -> EngineResult<()> {
        let node_id = parse_public_key(node_id)?;
        let address = parse_socket_address(address)?;
        self.blocking(move |node| node.connect(node_id, address, persist).map_err(engine_error))
            .await
    }

    async fn disconnect(&self, node_id: &str) -> EngineResult<()> {
        let node_id = parse_public_key(node_id)?;
        self.blocking(move |node| node.disconnect(node_id).map_err(engine_error))
            .await
    }

    async fn open_channel(
        &self,
        node_id: &str,
        address: &str,
        amount_sats: u64,
        push_msat: Option<u64>,
        announce: bool,
    ) -> EngineResult<String> {
        let node_id = parse_public_key(node_id)?;
        let address = parse_socket_address(address)?;
        self.blocking(move |node| {
            let user_channel_id = if announce {
                node.open_announced_channel(node_id, address, amount_sats, push_msat, None)
            } else {
                node.open_channel(node_id, address, amount_sats, push_msat, None)
            }
            .map_err(engine_error)?;
            Ok(user_channel_id.0.to_string())
        })
        .await
    }

    async fn close_channel(
        &self,
        channel_id: &str,
        counterparty_node_id: &str,
    ) -> EngineResult<()> {
        let counterparty = parse_public_key(counterparty_node_id)?;
        let channel = self
            .node
            .list_channels()
            .into_iter()
            .find(|c| hex::encode(c.channel_id.0) == channel_id && c.counterparty_node_id == counterparty)
            .ok_or_else(|| EngineError::new(EngineErrorKind::InvalidInput, "unknown channel"))?;

        let requested = self.closing.contains(channel_id);

        let user_channel_id = channel.user_channel_id;
        let result = self
            .blocking(move |node| {
                node.close_channel(&user_channel_id, counterparty)
                    .map_err(engine_error)
            })
            .await;

        match result {
            Ok(()) => {
                self.closing.requested(channel_id);
                Ok(())
            }
            Err(e) if requested && e.kind == EngineErrorKind::ChannelClosingFailed => Err(
                EngineError::new(EngineErrorKind::ChannelAlreadyClosing, e.message),
            ),
            Err(e) => Err(e),
        }
    }

    async fn send_payment(&self, invoice: &str, amount_msat: Option<u64>) -> EngineResult<String> {
        let invoice = Bolt11Invoice::from_str(invoice)
            .map_err(|e| EngineError::new(EngineErrorKind::InvalidInvoice, e.to_string()))?;
        self.blocking(move |node| {
            let bolt11 = node.bolt11_payment();
            let payment_id = match amount_msat {
                Some(amount_msat) => bolt11.send_using_amount(&invoice, amount_msat, None),
                None => bolt11.send(&invoice, None),
            }
            .map_err(engine_error)?;
            Ok(hex::encode(payment_id.0))
        })
        .await
    }

    async fn send_spontaneous_payment(
        &self,
        amount_msat: u64,
        node_id: &str,
    ) -> EngineResult<String> {
        let node_id = parse_public_key(node_id)?;
        self.blocking(move |node| {
            let payment_id = node
                .spontaneous_payment()
                .send(amount_msat, node_id, None)
                .map_err(engine_error)?;
            Ok(hex::encode(payment_id.0))
        })
        .await
    }

    async fn receive_payment(
        &self,
        amount_msat: Option<u64>,
        description: &str,
        expiry_secs: u32,
    ) -> EngineResult<String> {
        let description = Description::new(description.to_string())
            .map(Bolt11InvoiceDescription::Direct)
            .map_err(|e| EngineError::new(EngineErrorKind::InvoiceCreationFailed, e.to_string()))?;
        self.blocking(move |node| {
            let bolt11 = node.bolt11_payment();
            let invoice = match amount_msat {
                Some(amount_msat) => bolt11.receive(amount_msat, &description, expiry_secs),
                None => bolt11.receive_variable_amount(&description, expiry_secs),
            }
            .map_err(engine_error)?;
            Ok(invoice.to_string())
        })
        .await
    }

    async fn send_to_onchain_address(
        &self,
        address: &str,
        amount_sats: u64,
    ) -> EngineResult<String> {
        let address = self.parse_address(address)?;
        self.blocking(move |node| {
            node.onchain_payment()
                .send_to_address(&address, amount_sats, None)
                .map(|txid| txid.to_string())
                .map_err(engine_error)
        })
        .await
    }

    async fn send_all_to_onchain_address(&self, address: &str) -> EngineResult<String> {
        let address = self.parse_address(address)?;
        self.blocking(move |node| {
            node.onchain_payment()
                .send_all_to_address(&address, false, None)
                .map(|txid| txid.to_string())
                .map_err(engine_error)
        })
        .await
    }

    async fn sync_wallets(&self) -> EngineResult<()> {
        self.blocking(|node| node.sync_wallets().map_err(engine_error))
            .await
    }

    fn list_peers(&self) -> Vec<PeerDescriptor> {
        self.node
            .list_peers()
            .into_iter()
            .map(|p| PeerDescriptor {
                node_id: p.node_id.to_string(),
                address: p.address.to_string(),
                is_persisted: p.is_persisted,
                is_connected: p.is_connected,
            })
            .collect()
    }

    fn list_channels(&self) -> Vec<ChannelDescriptor> {
        self.node
            .list_channels()
            .into_iter()
            .map(|c| ChannelDescriptor {
                channel_id: hex::encode(c.channel_id.0),
                user_channel_id: c.user_channel_id.0.to_string(),
                counterparty_node_id: c.counterparty_node_id.to_string(),
                channel_value_sats: c.channel_value_sats,
                outbound_capacity_msat: c.outbound_capacity_msat,
                inbound_capacity_msat: c.inbound_capacity_msat,
                confirmations: c.confirmations,
                is_channel_ready: c.is_channel_ready,
                is_usable: c.is_usable,
            })
            .collect()
    }

    fn list_payments(&self) -> Vec<PaymentDescriptor> {
        self.node
            .list_payments()
            .iter()
            .map(payment_descriptor)
            .collect()
    }

    fn payment(&self, payment_hash: &str) -> EngineResult<Option<PaymentDescriptor>> {
        let id = parse_payment_id(payment_hash)?;
        Ok(self.node.payment(&id).as_ref().map(payment_descriptor))
    }

    async fn remove_payment(&self, payment_hash: &str) -> EngineResult<()> {
        let id = parse_payment_id(payment_hash)?;
        self.blocking(move |node| node.remove_payment(&id).map_err(engine_error))
            .await
    }

    fn next_event(&self) -> Option<EngineEvent> {
        let event = engine_event(self.node.next_event()?);
        if let EngineEvent::ChannelClosed { channel_id, .. } = &event {
            self.closing.closed(channel_id);
        }
        Some(event)
    }

    fn event_handled(&self) -> EngineResult<()> {
        self.node.event_handled().map_err(engine_error)
    }
}

const fn bitcoin_network(network: NetworkSelection) -> Network {
    match network {
        NetworkSelection::Mainnet => Network::Bitcoin,
        NetworkSelection::Testnet => Network::Testnet,
        NetworkSelection::Signet => Network::Signet,
        NetworkSelection::Regtest => Network::Regtest,
    }
}

const fn ldk_log_level(level: LogLevel) -> ldk_node::logger::LogLevel {
    use ldk_node::logger::LogLevel as Ldk;
    match level {
        LogLevel::Gossip => Ldk::Gossip,
        LogLevel::Trace => Ldk::Trace,
        LogLevel::Debug => Ldk::Debug,
        LogLevel::Info => Ldk::Info,
        LogLevel::Warn => Ldk::Warn,
        LogLevel::Error => Ldk::Error,
    }
}

fn parse_public_key(node_id: &str) -> EngineResult<PublicKey> {
    PublicKey::from_str(node_id)
        .map_err(|e| EngineError::new(EngineErrorKind::InvalidInput, format!("node id: {e}")))
}

fn parse_socket_address(address: &str) -> EngineResult<SocketAddress> {
    SocketAddress::from_str(address)
        .map_err(|e| EngineError::new(EngineErrorKind::InvalidInput, format!("address {address}: {e:?}")))
}

fn parse_payment_id(payment_hash: &str) -> EngineResult<PaymentId> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(payment_hash, &mut bytes)
        .map_err(|e| EngineError::new(EngineErrorKind::InvalidInput, format!("payment hash: {e}")))?;
    Ok(PaymentId(bytes))
}

fn payment_descriptor(details: &PaymentDetails) -> PaymentDescriptor {
    PaymentDescriptor {
        payment_hash: hex::encode(details.id.0),
        amount_msat: details.amount_msat,
        direction: match details.direction {
            LdkPaymentDirection::Inbound => PaymentDirection::Inbound,
            LdkPaymentDirection::Outbound => PaymentDirection::Outbound,
        },
        status: match details.status {
            LdkPaymentStatus::Pending => PaymentStatus::Pending,
            LdkPaymentStatus::Succeeded => PaymentStatus::Succeeded,
            LdkPaymentStatus::Failed => PaymentStatus::Failed,
        },
    }
}

fn engine_event(event: Event) -> EngineEvent {
    match event {
        Event::PaymentSuccessful { payment_hash, .. } => EngineEvent::PaymentSuccessful {
            payment_hash: hex::encode(payment_hash.0),
        },
        Event::PaymentFailed {
            payment_hash,
            payment_id,
            ..
        } => EngineEvent::PaymentFailed {
            payment_hash: payment_hash
                .map(|h| hex::encode(h.0))
                .or_else(|| payment_id.map(|id| hex::encode(id.0)))
                .unwrap_or_default(),
        },
        Event::PaymentReceived {
            payment_hash,
            amount_msat,
            ..
        } => EngineEvent::PaymentReceived {
            payment_hash: hex::encode(payment_hash.0),
            amount_msat,
        },
        Event::ChannelReady {
            channel_id,
            user_channel_id,
            ..
        } => EngineEvent::ChannelReady {
            channel_id: hex::encode(channel_id.0),
            user_channel_id: user_channel_id.0.to_string(),
        },
        Event::ChannelClosed {
            channel_id,
            user_channel_id,
            ..
        } => EngineEvent::ChannelClosed {
            channel_id: hex::encode(channel_id.0),
            user_channel_id: user_channel_id.0.to_string(),
        },
        other => EngineEvent::Other {
            kind: format!("{other:?}"),
        },
    }
}

fn engine_error(error: ldk_node::NodeError) -> EngineError {
    use ldk_node::NodeError;

    let kind = match error {
        NodeError::AlreadyRunning => EngineErrorKind::AlreadyRunning,
        NodeError::NotRunning => EngineErrorKind::NotRunning,
        NodeError::ConnectionFailed => EngineErrorKind::ConnectionFailed,
        NodeError::ChannelCreationFailed => EngineErrorKind::ChannelCreationFailed,
        NodeError::ChannelClosingFailed => EngineErrorKind::ChannelClosingFailed,
        NodeError::InvoiceCreationFailed => EngineErrorKind::InvoiceCreationFailed,
        NodeError::InvalidInvoice => EngineErrorKind::InvalidInvoice,
        NodeError::InvalidAmount => EngineErrorKind::InvalidAmount,
        NodeError::InsufficientFunds => EngineErrorKind::InsufficientFunds,
        NodeError::PaymentSendingFailed => EngineErrorKind::PaymentSendingFailed,
        NodeError::DuplicatePayment => EngineErrorKind::DuplicatePayment,
        NodeError::PersistenceFailed => EngineErrorKind::PersistenceFailed,
        NodeError::InvalidAddress
        | NodeError::InvalidSocketAddress
        | NodeError::InvalidPublicKey
        | NodeError::InvalidNodeId
        | NodeError::InvalidChannelId
        | NodeError::InvalidPaymentId
        | NodeError::InvalidPaymentHash => EngineErrorKind::InvalidInput,
        _ => EngineErrorKind::Other,
    };
    EngineError::new(kind, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closing_channels_forget_closed() {
        let closing = ClosingChannels::default();
        assert!(!closing.contains("ab"));

        closing.requested("ab");
        closing.requested("cd");
        assert!(closing.contains("ab"));

        closing.closed("ab");
        closing.closed("ef");
        assert!(!closing.contains("ab"));
        assert!(closing.contains("cd"));
    }

    #[test]
    fn test_network_mapping() {
        assert_eq!(bitcoin_network(NetworkSelection::Mainnet), Network::Bitcoin);
        assert_eq!(bitcoin_network(NetworkSelection::Signet), Network::Signet);
        assert_eq!(bitcoin_network(NetworkSelection::Regtest), Network::Regtest);
    }

    #[test]
    fn test_payment_id_parsing() {
        let id = parse_payment_id(&"ab".repeat(32)).unwrap();
        assert_eq!(id.0, [0xab; 32]);
        assert!(parse_payment_id("not hex").is_err());
    }
}
