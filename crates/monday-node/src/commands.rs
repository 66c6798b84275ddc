//! Typed node operations.

use monday_core::{
    BalanceSnapshot, ChannelDescriptor, Error, PaymentDescriptor, PeerDescriptor, Result,
};

use crate::engine::{EngineError, EngineErrorKind};
use crate::lifecycle::LifecycleManager;

/// Map an engine failure onto the error taxonomy.
pub fn classify(error: EngineError) -> Error {
    let EngineError { kind, message } = error;
    match kind {
        EngineErrorKind::AlreadyRunning => Error::AlreadyRunning,
        EngineErrorKind::NotRunning => Error::NodeNotRunning,
        EngineErrorKind::ConnectionFailed => Error::ConnectionFailed(message),
        EngineErrorKind::ChannelCreationFailed => Error::ChannelOpenFailed(message),
        EngineErrorKind::ChannelClosingFailed => Error::ChannelCloseFailed(message),
        EngineErrorKind::ChannelAlreadyClosing => Error::ChannelAlreadyClosing(message),
        EngineErrorKind::InvoiceCreationFailed => Error::InvoiceGenerationFailed(message),
        EngineErrorKind::InvalidInvoice => Error::InvalidInvoice(message),
        EngineErrorKind::InvalidAmount => Error::InvalidAmount(message),
        EngineErrorKind::InsufficientFunds => Error::InsufficientBalance(message),
        EngineErrorKind::PaymentSendingFailed | EngineErrorKind::DuplicatePayment => {
            Error::PaymentFailed(message)
        }
        EngineErrorKind::InvalidInput => Error::InvalidArgument(message),
        EngineErrorKind::PersistenceFailed => Error::PersistenceFailed(message),
        EngineErrorKind::Other => Error::Unclassified(message),
    }
}

fn require_positive(value: u64, what: &str) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidAmount(format!("{what} must be greater than zero")));
    }
    Ok(())
}

/// Operations against the running node.
///
/// Every call fails with [`Error::NodeNotRunning`] unless the node is
/// running. Inputs are validated before the engine is contacted. Nothing is
/// retried.
#[derive(Clone, Copy)]
pub struct CommandFacade<'a> {
    lifecycle: &'a LifecycleManager,
}

impl<'a> CommandFacade<'a> {
    pub(crate) const fn new(lifecycle: &'a LifecycleManager) -> Self {
        Self { lifecycle }
    }

    /// This node's public key.
    pub async fn node_id(&self) -> Result<String> {
        let node = self.lifecycle.running_handle().await?;
        Ok(node.engine().node_id())
    }

    /// Addresses the node listens on.
    pub async fn listening_addresses(&self) -> Result<Vec<String>> {
        let node = self.lifecycle.running_handle().await?;
        Ok(node.engine().listening_addresses())
    }

    /// An on-chain address to fund the wallet. May repeat across calls.
    pub async fn new_funding_address(&self) -> Result<String> {
        let node = self.lifecycle.running_handle().await?;
        let address = node.engine().new_onchain_address().await.map_err(classify)?;
        tracing::debug!(%address, "New funding address");
        Ok(address)
    }

    /// Current balances.
    pub async fn balances(&self) -> Result<BalanceSnapshot> {
        let node = self.lifecycle.running_handle().await?;
        Ok(node.engine().balances())
    }

    /// Spendable on-chain balance (satoshis).
    pub async fn spendable_onchain_balance_sats(&self) -> Result<u64> {
        Ok(self.balances().await?.spendable_onchain_sats)
    }

    /// Total on-chain balance (satoshis).
    pub async fn total_onchain_balance_sats(&self) -> Result<u64> {
        Ok(self.balances().await?.total_onchain_sats)
    }

    /// Connect to a peer at `address` (`host:port`).
    pub async fn connect(&self, node_id: &str, address: &str, persist: bool) -> Result<()> {
        let node = self.lifecycle.running_handle().await?;
        tracing::debug!(%node_id, %address, persist, "Connecting to peer");
        node.engine()
            .connect(node_id, address, persist)
            .await
            .map_err(classify)
    }

    /// Disconnect from a peer.
    pub async fn disconnect(&self, node_id: &str) -> Result<()> {
        let node = self.lifecycle.running_handle().await?;
        tracing::debug!(%node_id, "Disconnecting from peer");
        node.engine().disconnect(node_id).await.map_err(classify)
    }

    /// Connect to a peer and open a channel to it.
    ///
    /// Returns the user channel id. [`Error::ConnectionFailed`] means the
    /// peer was never reached; [`Error::ChannelOpenFailed`] means it was.
    pub async fn connect_open_channel(
        &self,
        node_id: &str,
        address: &str,
        amount_sats: u64,
        push_msat: Option<u64>,
        announce: bool,
    ) -> Result<String> {
        require_positive(amount_sats, "channel amount")?;

        let node = self.lifecycle.running_handle().await?;
        tracing::info!(%node_id, %address, amount_sats, announce, "Opening channel");
        let user_channel_id = node
            .engine()
            .open_channel(node_id, address, amount_sats, push_msat, announce)
            .await
            .map_err(classify)?;
        tracing::info!(%user_channel_id, "Channel open initiated");
        Ok(user_channel_id)
    }

    /// Cooperatively close a channel.
    ///
    /// A channel that is already shutting down yields
    /// [`Error::ChannelAlreadyClosing`].
    pub async fn close_channel(&self, channel_id: &str, counterparty_node_id: &str) -> Result<()> {
        let node = self.lifecycle.running_handle().await?;
        tracing::info!(%channel_id, %counterparty_node_id, "Closing channel");
        node.engine()
            .close_channel(channel_id, counterparty_node_id)
            .await
            .map_err(classify)
    }

    /// Pay an invoice. Returns the payment hash once the engine accepted the
    /// payment; the outcome arrives later as an event.
    pub async fn send_payment(&self, invoice: &str) -> Result<String> {
        self.dispatch_payment(invoice, None).await
    }

    /// Pay a variable-amount invoice with `amount_msat`.
    pub async fn send_payment_with_amount(&self, invoice: &str, amount_msat: u64) -> Result<String> {
        require_positive(amount_msat, "payment amount")?;
        self.dispatch_payment(invoice, Some(amount_msat)).await
    }

    async fn dispatch_payment(&self, invoice: &str, amount_msat: Option<u64>) -> Result<String> {
        let invoice = invoice.trim();
        if invoice.is_empty() {
            return Err(Error::InvalidInvoice("invoice is empty".into()));
        }

        let node = self.lifecycle.running_handle().await?;
        let payment_hash = node
            .engine()
            .send_payment(invoice, amount_msat)
            .await
            .map_err(classify)?;
        tracing::info!(%payment_hash, ?amount_msat, "Payment dispatched");
        Ok(payment_hash)
    }

    /// Send a keysend payment to `node_id`.
    pub async fn send_spontaneous_payment(&self, amount_msat: u64, node_id: &str) -> Result<String> {
        require_positive(amount_msat, "payment amount")?;

        let node = self.lifecycle.running_handle().await?;
        let payment_hash = node
            .engine()
            .send_spontaneous_payment(amount_msat, node_id)
            .await
            .map_err(classify)?;
        tracing::info!(%payment_hash, amount_msat, %node_id, "Spontaneous payment dispatched");
        Ok(payment_hash)
    }

    /// Create an invoice for `amount_msat`.
    pub async fn receive_payment(
        &self,
        amount_msat: u64,
        description: &str,
        expiry_secs: u32,
    ) -> Result<String> {
        require_positive(amount_msat, "invoice amount")?;
        self.create_invoice(Some(amount_msat), description, expiry_secs)
            .await
    }

    /// Create an invoice the payer picks the amount for.
    pub async fn receive_variable_amount_payment(
        &self,
        description: &str,
        expiry_secs: u32,
    ) -> Result<String> {
        self.create_invoice(None, description, expiry_secs).await
    }

    async fn create_invoice(
        &self,
        amount_msat: Option<u64>,
        description: &str,
        expiry_secs: u32,
    ) -> Result<String> {
        if expiry_secs == 0 {
            return Err(Error::InvoiceGenerationFailed(
                "expiry must be greater than zero".into(),
            ));
        }

        let node = self.lifecycle.running_handle().await?;
        let invoice = node
            .engine()
            .receive_payment(amount_msat, description, expiry_secs)
            .await
            .map_err(classify)?;
        tracing::debug!(?amount_msat, expiry_secs, "Invoice created");
        Ok(invoice)
    }

    /// Send `amount_sats` on-chain. Returns the txid.
    pub async fn send_to_onchain_address(&self, address: &str, amount_sats: u64) -> Result<String> {
        require_positive(amount_sats, "on-chain amount")?;

        let node = self.lifecycle.running_handle().await?;
        let txid = node
            .engine()
            .send_to_onchain_address(address, amount_sats)
            .await
            .map_err(classify)?;
        tracing::info!(%txid, amount_sats, "On-chain payment broadcast");
        Ok(txid)
    }

    /// Sweep the on-chain wallet to `address`. Returns the txid.
    pub async fn send_all_to_onchain_address(&self, address: &str) -> Result<String> {
        let node = self.lifecycle.running_handle().await?;
        let txid = node
            .engine()
            .send_all_to_onchain_address(address)
            .await
            .map_err(classify)?;
        tracing::info!(%txid, "On-chain sweep broadcast");
        Ok(txid)
    }

    /// Sync wallets with the chain now.
    pub async fn sync_wallets(&self) -> Result<()> {
        let node = self.lifecycle.running_handle().await?;
        node.engine().sync_wallets().await.map_err(classify)?;
        tracing::debug!("Wallets synced");
        Ok(())
    }

    /// Known peers.
    pub async fn list_peers(&self) -> Result<Vec<PeerDescriptor>> {
        let node = self.lifecycle.running_handle().await?;
        Ok(node.engine().list_peers())
    }

    /// Channels.
    pub async fn list_channels(&self) -> Result<Vec<ChannelDescriptor>> {
        let node = self.lifecycle.running_handle().await?;
        Ok(node.engine().list_channels())
    }

    /// Payments.
    pub async fn list_payments(&self) -> Result<Vec<PaymentDescriptor>> {
        let node = self.lifecycle.running_handle().await?;
        Ok(node.engine().list_payments())
    }

    /// Look up one payment by hash.
    pub async fn payment(&self, payment_hash: &str) -> Result<Option<PaymentDescriptor>> {
        let node = self.lifecycle.running_handle().await?;
        node.engine().payment(payment_hash).map_err(classify)
    }

    /// Remove a payment from the history.
    pub async fn remove_payment(&self, payment_hash: &str) -> Result<()> {
        let node = self.lifecycle.running_handle().await?;
        node.engine()
            .remove_payment(payment_hash)
            .await
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptHandle, ScriptedFactory};
    use monday_core::{NetworkSelection, NodeSettings, PaymentDirection, resolve};
    use monday_secrets::{CredentialStore, MemorySecretStore};
    use std::sync::Arc;

    async fn running() -> (LifecycleManager, ScriptHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(ScriptedFactory::new());
        let script = factory.script();
        let manager = LifecycleManager::new(
            factory,
            CredentialStore::new(Arc::new(MemorySecretStore::new())),
            NodeSettings::new(dir.path()),
        );
        manager
            .build(&resolve(NetworkSelection::Regtest), None)
            .await
            .unwrap();
        manager.start().await.unwrap();
        (manager, script, dir)
    }

    #[test]
    fn test_classify_covers_taxonomy() {
        let cases = [
            (EngineErrorKind::ConnectionFailed, "ConnectionFailed"),
            (EngineErrorKind::ChannelCreationFailed, "ChannelOpenFailed"),
            (EngineErrorKind::ChannelAlreadyClosing, "ChannelAlreadyClosing"),
            (EngineErrorKind::InvalidInvoice, "InvalidInvoice"),
            (EngineErrorKind::InsufficientFunds, "InsufficientBalance"),
            (EngineErrorKind::InvoiceCreationFailed, "InvoiceGenerationFailed"),
            (EngineErrorKind::NotRunning, "NodeNotRunning"),
            (EngineErrorKind::Other, "Unclassified"),
        ];
        for (kind, expected) in cases {
            let classified = classify(EngineError::new(kind, "boom"));
            assert!(
                format!("{classified:?}").starts_with(expected),
                "{kind:?} classified as {classified:?}"
            );
        }
    }

    #[test]
    fn test_unclassified_keeps_message() {
        let err = classify(EngineError::new(EngineErrorKind::Other, "TxSyncTimeout"));
        assert!(matches!(err, Error::Unclassified(ref m) if m == "TxSyncTimeout"));
    }

    #[tokio::test]
    async fn test_not_running_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LifecycleManager::new(
            Arc::new(ScriptedFactory::new()),
            CredentialStore::new(Arc::new(MemorySecretStore::new())),
            NodeSettings::new(dir.path()),
        );
        let commands = manager.commands();

        assert!(matches!(commands.node_id().await, Err(Error::NodeNotRunning)));
        assert!(matches!(commands.list_channels().await, Err(Error::NodeNotRunning)));

        manager
            .build(&resolve(NetworkSelection::Regtest), None)
            .await
            .unwrap();
        assert!(matches!(commands.list_payments().await, Err(Error::NodeNotRunning)));
    }

    #[tokio::test]
    async fn test_zero_channel_amount_never_reaches_engine() {
        let (manager, script, _dir) = running().await;

        let err = manager
            .commands()
            .connect_open_channel("02aa", "127.0.0.1:9735", 0, None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
        assert!(!script.calls().iter().any(|c| c == "open_channel"));
    }

    #[tokio::test]
    async fn test_open_channel_failures_are_distinct() {
        let (manager, script, _dir) = running().await;
        let commands = manager.commands();

        script.fail(
            "open_channel",
            EngineError::new(EngineErrorKind::ConnectionFailed, "peer unreachable"),
        );
        assert!(matches!(
            commands
                .connect_open_channel("02aa", "127.0.0.1:9735", 100_000, None, true)
                .await,
            Err(Error::ConnectionFailed(_))
        ));

        script.fail(
            "open_channel",
            EngineError::new(EngineErrorKind::ChannelCreationFailed, "peer rejected"),
        );
        assert!(matches!(
            commands
                .connect_open_channel("02aa", "127.0.0.1:9735", 100_000, None, true)
                .await,
            Err(Error::ChannelOpenFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_send_payment_returns_hash_and_records_payment() {
        let (manager, _script, _dir) = running().await;
        let commands = manager.commands();

        let hash = commands.send_payment("lnbcrt1invoice").await.unwrap();
        let payments = commands.list_payments().await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].payment_hash, hash);
        assert_eq!(payments[0].direction, PaymentDirection::Outbound);
        assert_eq!(commands.payment(&hash).await.unwrap(), Some(payments[0].clone()));
    }

    #[tokio::test]
    async fn test_send_payment_failures_are_surfaced() {
        let (manager, script, _dir) = running().await;
        let commands = manager.commands();

        assert!(matches!(
            commands.send_payment("  ").await,
            Err(Error::InvalidInvoice(_))
        ));

        script.fail(
            "send_payment",
            EngineError::new(EngineErrorKind::InvalidInvoice, "bad bech32"),
        );
        assert!(matches!(
            commands.send_payment("lnbc10u1garbage").await,
            Err(Error::InvalidInvoice(_))
        ));

        script.fail(
            "send_payment",
            EngineError::new(EngineErrorKind::InsufficientFunds, "no outbound capacity"),
        );
        assert!(matches!(
            commands.send_payment_with_amount("lnbcrt1invoice", 5_000).await,
            Err(Error::InsufficientBalance(_))
        ));

        assert!(matches!(
            commands.send_payment_with_amount("lnbcrt1invoice", 0).await,
            Err(Error::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_payment_validation() {
        let (manager, script, _dir) = running().await;
        let commands = manager.commands();

        assert!(matches!(
            commands.receive_payment(1_000, "coffee", 0).await,
            Err(Error::InvoiceGenerationFailed(_))
        ));
        assert!(matches!(
            commands.receive_payment(0, "coffee", 3600).await,
            Err(Error::InvalidAmount(_))
        ));
        assert!(!script.calls().iter().any(|c| c == "receive_payment"));

        let invoice = commands.receive_payment(1_000, "coffee", 3600).await.unwrap();
        assert!(invoice.starts_with("lnbcrt"));
        let open = commands
            .receive_variable_amount_payment("tip jar", 3600)
            .await
            .unwrap();
        assert_ne!(invoice, open);
    }

    #[tokio::test]
    async fn test_close_already_closing() {
        let (manager, _script, _dir) = running().await;
        let commands = manager.commands();

        commands
            .connect_open_channel("02aa", "127.0.0.1:9735", 100_000, None, false)
            .await
            .unwrap();
        let channel = commands.list_channels().await.unwrap().remove(0);

        commands
            .close_channel(&channel.channel_id, &channel.counterparty_node_id)
            .await
            .unwrap();
        assert!(matches!(
            commands
                .close_channel(&channel.channel_id, &channel.counterparty_node_id)
                .await,
            Err(Error::ChannelAlreadyClosing(_))
        ));
    }

    #[tokio::test]
    async fn test_onchain_operations() {
        let (manager, script, _dir) = running().await;
        let commands = manager.commands();

        let address = commands.new_funding_address().await.unwrap();
        assert!(matches!(
            commands.send_to_onchain_address(&address, 0).await,
            Err(Error::InvalidAmount(_))
        ));
        let txid = commands.send_to_onchain_address(&address, 10_000).await.unwrap();
        assert_eq!(txid.len(), 64);

        script.fail(
            "send_all_to_onchain_address",
            EngineError::new(EngineErrorKind::InvalidInput, "address is for another network"),
        );
        assert!(matches!(
            commands.send_all_to_onchain_address("tb1qxyz").await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_balances_and_peers() {
        let (manager, script, _dir) = running().await;
        let commands = manager.commands();

        script.set_balances(BalanceSnapshot {
            total_onchain_sats: 150_000,
            spendable_onchain_sats: 100_000,
            total_lightning_sats: 20_000,
        });
        assert_eq!(commands.total_onchain_balance_sats().await.unwrap(), 150_000);
        assert_eq!(commands.spendable_onchain_balance_sats().await.unwrap(), 100_000);

        commands.connect("02bb", "10.0.0.2:9735", true).await.unwrap();
        let peers = commands.list_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].is_persisted);

        commands.disconnect("02bb").await.unwrap();
        assert!(!commands.list_peers().await.unwrap()[0].is_connected);
    }

    #[tokio::test]
    async fn test_sync_and_remove_payment() {
        let (manager, script, _dir) = running().await;
        let commands = manager.commands();

        commands.sync_wallets().await.unwrap();
        let hash = commands.send_spontaneous_payment(2_000, "02cc").await.unwrap();
        commands.remove_payment(&hash).await.unwrap();
        assert_eq!(commands.payment(&hash).await.unwrap(), None);

        script.fail(
            "sync_wallets",
            EngineError::new(EngineErrorKind::Other, "TxSyncTimeout"),
        );
        assert!(matches!(
            commands.sync_wallets().await,
            Err(Error::Unclassified(_))
        ));
    }
}
