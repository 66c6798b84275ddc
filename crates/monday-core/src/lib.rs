//! Core types and configuration for the Monday Lightning node.
//!
//! This crate provides shared data structures, configuration management,
//! and the error taxonomy used across the monday workspace.

mod config;
mod credential;
mod error;
mod network;
mod node_info;

pub use config::Config;
pub use credential::Credential;
pub use error::{DisplayError, Error, Result};
pub use network::{
    DEFAULT_LISTENING_ADDRESS, LogLevel, NetworkProfile, NetworkSelection, NodeConfig,
    NodeSettings, resolve,
};
pub use node_info::{
    BalanceSnapshot, ChannelDescriptor, NodeEvent, PaymentDescriptor, PaymentDirection,
    PaymentStatus, PeerDescriptor,
};
