//! Event consumption.
//!
//! The engine keeps one queue of events and hands out its head until the
//! consumer acknowledges it. [`EventClassifier`] turns the raw events into
//! [`NodeEvent`]s and enforces that protocol: one attached consumer, one
//! event in flight, no acknowledgement without a delivered event.
//!
//! The queue belongs to the engine, so a delivered event is only ever
//! acknowledged against the build that delivered it. After a rebuild the
//! stale event is dropped; its own engine hands it out again once that
//! storage is built again.

use monday_core::{Error, NodeEvent, Result};
use tokio::sync::MutexGuard;

use crate::commands::classify;
use crate::engine::EngineEvent;
use crate::lifecycle::LifecycleManager;

/// The single consumer of node events.
///
/// Obtained from [`LifecycleManager::event_classifier`]; dropping it
/// detaches the consumer.
pub struct EventClassifier<'a> {
    lifecycle: &'a LifecycleManager,
    _attached: MutexGuard<'a, ()>,
    in_flight: Option<InFlight>,
}

/// A delivered event and the build generation of the engine that delivered it.
#[derive(Debug)]
struct InFlight {
    event: NodeEvent,
    generation: u64,
}

impl<'a> EventClassifier<'a> {
    pub(crate) const fn new(lifecycle: &'a LifecycleManager, attached: MutexGuard<'a, ()>) -> Self {
        Self {
            lifecycle,
            _attached: attached,
            in_flight: None,
        }
    }

    /// The delivered event awaiting acknowledgement, if any.
    pub fn pending(&self) -> Option<&NodeEvent> {
        self.in_flight.as_ref().map(|f| &f.event)
    }

    /// Take the next event without blocking.
    ///
    /// Events the application does not consume are acknowledged and skipped.
    ///
    /// # Errors
    ///
    /// [`Error::EventUnacknowledged`] while a delivered event has not been
    /// acknowledged, [`Error::NodeNotRunning`] if the node is not running.
    pub async fn next_event(&mut self) -> Result<Option<NodeEvent>> {
        if let Some(generation) = self.in_flight.as_ref().map(|f| f.generation) {
            if self.lifecycle.generation().await == Some(generation) {
                return Err(Error::EventUnacknowledged);
            }
            self.drop_stale();
        }

        let node = self.lifecycle.running_handle().await?;
        loop {
            let Some(raw) = node.engine().next_event() else {
                return Ok(None);
            };

            match classify_event(raw) {
                Ok(event) => {
                    tracing::debug!(%event, "Delivering node event");
                    self.in_flight = Some(InFlight {
                        event: event.clone(),
                        generation: node.generation(),
                    });
                    return Ok(Some(event));
                }
                Err(kind) => {
                    tracing::debug!(%kind, "Skipping unconsumed node event");
                    node.engine().event_handled().map_err(classify)?;
                }
            }
        }
    }

    /// Acknowledge `event`, releasing the next one.
    ///
    /// # Errors
    ///
    /// [`Error::NoEventInFlight`] unless `event` is the one last delivered
    /// by the current build.
    pub async fn acknowledge(&mut self, event: &NodeEvent) -> Result<()> {
        let generation = match &self.in_flight {
            Some(pending) if pending.event == *event => pending.generation,
            _ => return Err(Error::NoEventInFlight),
        };

        let node = self.lifecycle.running_handle().await?;
        if node.generation() != generation {
            drop(node);
            self.drop_stale();
            return Err(Error::NoEventInFlight);
        }

        node.engine().event_handled().map_err(classify)?;
        self.in_flight = None;
        Ok(())
    }

    fn drop_stale(&mut self) {
        if let Some(stale) = self.in_flight.take() {
            tracing::warn!(
                event = %stale.event,
                generation = stale.generation,
                "Dropping event delivered by a previous build"
            );
        }
    }
}

impl std::fmt::Debug for EventClassifier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventClassifier")
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

/// Map a raw engine event; unconsumed kinds come back as their description.
fn classify_event(event: EngineEvent) -> std::result::Result<NodeEvent, String> {
    Ok(match event {
        EngineEvent::PaymentSuccessful { payment_hash } => {
            NodeEvent::PaymentSuccessful { payment_hash }
        }
        EngineEvent::PaymentFailed { payment_hash } => NodeEvent::PaymentFailed { payment_hash },
        EngineEvent::PaymentReceived {
            payment_hash,
            amount_msat,
        } => NodeEvent::PaymentReceived {
            payment_hash,
            amount_msat,
        },
        EngineEvent::ChannelReady {
            channel_id,
            user_channel_id,
        } => NodeEvent::ChannelReady {
            channel_id,
            user_channel_id,
        },
        EngineEvent::ChannelClosed {
            channel_id,
            user_channel_id,
        } => NodeEvent::ChannelClosed {
            channel_id,
            user_channel_id,
        },
        EngineEvent::Other { kind } => return Err(kind),
    })
}
