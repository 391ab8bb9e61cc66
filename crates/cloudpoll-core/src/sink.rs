// ── Host sink ──
//
// The host automation system is a collaborator, never owned by the core.
// Handlers push channel states, thing status changes, discoveries, and
// dynamic channel definitions through the `Sink` trait.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{ChannelSpec, ChannelUpdate, DiscoveredDevice, ThingStatus};

const EVENT_CHANNEL_SIZE: usize = 256;

/// Outbound interface to the host.
pub trait Sink: Send + Sync + 'static {
    fn update_state(&self, thing: &str, update: ChannelUpdate);

    fn update_status(&self, thing: &str, status: ThingStatus);

    fn thing_discovered(&self, bridge: &str, device: DiscoveredDevice);

    /// Define a channel the host has not seen yet.
    fn create_channel(&self, thing: &str, spec: ChannelSpec);
}

/// Host-owned registry of things it already knows, consulted before a
/// discovery is reported.
pub trait DiscoveryCallback: Send + Sync + 'static {
    fn exists(&self, external_id: &str) -> bool;
}

/// A callback that knows no things.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKnownThings;

impl DiscoveryCallback for NoKnownThings {
    fn exists(&self, _external_id: &str) -> bool {
        false
    }
}

impl<F> DiscoveryCallback for F
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn exists(&self, external_id: &str) -> bool {
        self(external_id)
    }
}

// ── Broadcast sink ──────────────────────────────────────────────────

/// Everything a handler reports, as one event type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    State {
        thing: String,
        update: ChannelUpdate,
    },
    Status {
        thing: String,
        status: ThingStatus,
    },
    Discovered {
        bridge: String,
        device: DiscoveredDevice,
    },
    ChannelCreated {
        thing: String,
        spec: ChannelSpec,
    },
}

/// `Sink` that fans events out over a `broadcast` channel.
///
/// Also remembers which channels were created so hosts without their own
/// channel registry can answer "is this channel known?".
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Arc<SinkEvent>>,
    channels: Arc<RwLock<HashSet<(String, String)>>>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            tx,
            channels: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SinkEvent>> {
        self.tx.subscribe()
    }

    pub fn has_channel(&self, thing: &str, channel: &str) -> bool {
        let channels = self
            .channels
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        channels.contains(&(thing.to_owned(), channel.to_owned()))
    }

    fn send(&self, event: SinkEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(Arc::new(event));
    }
}

impl Sink for BroadcastSink {
    fn update_state(&self, thing: &str, update: ChannelUpdate) {
        self.send(SinkEvent::State {
            thing: thing.to_owned(),
            update,
        });
    }

    fn update_status(&self, thing: &str, status: ThingStatus) {
        self.send(SinkEvent::Status {
            thing: thing.to_owned(),
            status,
        });
    }

    fn thing_discovered(&self, bridge: &str, device: DiscoveredDevice) {
        self.send(SinkEvent::Discovered {
            bridge: bridge.to_owned(),
            device,
        });
    }

    fn create_channel(&self, thing: &str, spec: ChannelSpec) {
        self.channels
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert((thing.to_owned(), spec.id.clone()));
        self.send(SinkEvent::ChannelCreated {
            thing: thing.to_owned(),
            spec,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::TypedValue;

    #[tokio::test]
    async fn events_reach_subscribers_in_order() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();

        let update = ChannelUpdate::new("power", TypedValue::Number(1.0), Utc::now());
        sink.create_channel("t1", update.spec());
        sink.update_state("t1", update);
        sink.update_status("t1", ThingStatus::Online);

        assert!(matches!(*rx.recv().await.unwrap(), SinkEvent::ChannelCreated { .. }));
        assert!(matches!(*rx.recv().await.unwrap(), SinkEvent::State { .. }));
        assert!(matches!(
            &*rx.recv().await.unwrap(),
            SinkEvent::Status { status: ThingStatus::Online, .. }
        ));
        assert!(sink.has_channel("t1", "power"));
        assert!(!sink.has_channel("t2", "power"));
    }

    #[test]
    fn closures_act_as_discovery_callbacks() {
        let known = |id: &str| id == "ps-1";
        assert!(known.exists("ps-1"));
        assert!(!NoKnownThings.exists("ps-1"));
    }
}
