//! Node lifecycle, commands and event consumption for the Monday Lightning node.
//!
//! [`LifecycleManager`] owns the single node of the process. Operations go
//! through [`LifecycleManager::commands`], events through
//! [`LifecycleManager::event_classifier`]. The node engine itself sits behind
//! [`NodeEngine`]; enable the `ldk` feature for the LDK Node backed one.

mod commands;
mod engine;
mod events;
mod lifecycle;

#[cfg(feature = "ldk")]
mod ldk;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use commands::{CommandFacade, classify};
pub use engine::{
    EngineError, EngineErrorKind, EngineEvent, EngineFactory, EngineResult, NodeEngine,
};
pub use events::EventClassifier;
pub use lifecycle::{LifecycleManager, LifecycleState, NodeHandle, wipe_wallet};

#[cfg(feature = "ldk")]
pub use ldk::{LdkEngine, LdkEngineFactory};
