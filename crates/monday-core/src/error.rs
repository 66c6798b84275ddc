//! Error types for Monday.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the node coordination core.
///
/// Engine failures never cross this boundary as engine types; they are
/// classified into one of these variants first.
#[derive(Debug, Error)]
pub enum Error {
    /// Secret storage could not be read.
    #[error("secret storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Secret storage could not be written durably.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// The node engine could not be constructed.
    #[error("node build failed: {0}")]
    BuildFailed(String),

    /// The node engine refused to start.
    #[error("node start failed: {0}")]
    StartFailed(String),

    /// The node engine refused to stop.
    #[error("node stop failed: {0}")]
    StopFailed(String),

    /// Another lifecycle transition is in flight.
    #[error("another lifecycle transition is in progress")]
    LifecycleBusy,

    /// The node is already running.
    #[error("node is already running")]
    AlreadyRunning,

    /// No running node to operate on.
    #[error("node is not running")]
    NodeNotRunning,

    /// Amount was zero or otherwise rejected.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invoice could not be parsed or is unusable.
    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),

    /// Not enough funds for the requested operation.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// The peer could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer was reached but the channel could not be opened.
    #[error("channel open failed: {0}")]
    ChannelOpenFailed(String),

    /// The channel is already shutting down.
    #[error("channel is already closing: {0}")]
    ChannelAlreadyClosing(String),

    /// The channel close request was rejected.
    #[error("channel close failed: {0}")]
    ChannelCloseFailed(String),

    /// The engine refused to accept a payment into its send pipeline.
    #[error("payment failed: {0}")]
    PaymentFailed(String),

    /// Invoice could not be generated.
    #[error("invoice generation failed: {0}")]
    InvoiceGenerationFailed(String),

    /// An identifier or address was rejected by the engine.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `next_event` was called while an event is still unacknowledged.
    #[error("previous event has not been acknowledged")]
    EventUnacknowledged,

    /// `acknowledge` was called for an event that is not in flight.
    #[error("no matching event in flight")]
    NoEventInFlight,

    /// An event consumer is already attached to the node.
    #[error("an event consumer is already attached")]
    ConsumerAttached,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine failure that matched no other variant.
    #[error("unexpected error: {0}")]
    Unclassified(String),
}

/// A `(title, detail)` pair suitable for showing to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayError {
    /// Short headline.
    pub title: String,
    /// Longer explanation, usually the underlying message.
    pub detail: String,
}

impl Error {
    /// Short, stable headline for this error kind.
    pub const fn title(&self) -> &'static str {
        match self {
            Self::StorageUnavailable(_) => "Storage Unavailable",
            Self::PersistenceFailed(_) => "Persistence Failed",
            Self::BuildFailed(_) => "Build Failed",
            Self::StartFailed(_) => "Start Failed",
            Self::StopFailed(_) => "Stop Failed",
            Self::LifecycleBusy => "Node Busy",
            Self::AlreadyRunning => "Already Running",
            Self::NodeNotRunning => "Node Not Running",
            Self::InvalidAmount(_) => "Invalid Amount",
            Self::InvalidInvoice(_) => "Invalid Invoice",
            Self::InsufficientBalance(_) => "Insufficient Balance",
            Self::ConnectionFailed(_) => "Connection Failed",
            Self::ChannelOpenFailed(_) => "Channel Open Failed",
            Self::ChannelAlreadyClosing(_) => "Channel Already Closing",
            Self::ChannelCloseFailed(_) => "Channel Close Failed",
            Self::PaymentFailed(_) => "Payment Failed",
            Self::InvoiceGenerationFailed(_) => "Invoice Generation Failed",
            Self::InvalidArgument(_) => "Invalid Argument",
            Self::EventUnacknowledged => "Event Unacknowledged",
            Self::NoEventInFlight => "No Event In Flight",
            Self::ConsumerAttached => "Consumer Attached",
            Self::Config(_) => "Configuration Error",
            Self::Io(_) => "IO Error",
            Self::Serialization(_) => "Serialization Error",
            Self::Unclassified(_) => "Unexpected Error",
        }
    }

    /// Convert into a displayable `(title, detail)` pair.
    pub fn display(&self) -> DisplayError {
        DisplayError {
            title: self.title().to_string(),
            detail: self.to_string(),
        }
    }
}

impl From<&Error> for DisplayError {
    fn from(error: &Error) -> Self {
        error.display()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_pair() {
        let err = Error::InvalidAmount("channel amount must be positive".into());
        let shown = err.display();
        assert_eq!(shown.title, "Invalid Amount");
        assert_eq!(shown.detail, "invalid amount: channel amount must be positive");
    }

    #[test]
    fn test_unclassified_keeps_message() {
        let err = Error::Unclassified("TxSyncTimeout".into());
        assert!(err.display().detail.contains("TxSyncTimeout"));
    }
}
