// ── Discovery scanner ──
//
// Lists a bridge's child devices through the bridge's own session and
// reports each new one to the host exactly once per scanner lifetime.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use cloudpoll_api::Session;
use tracing::{debug, info};

use crate::binding::Binding;
use crate::error::DiscoveryError;
use crate::model::DiscoveredDevice;
use crate::sink::{DiscoveryCallback, Sink};

pub struct DiscoveryScanner {
    bridge: String,
    sink: Arc<dyn Sink>,
    callback: Arc<dyn DiscoveryCallback>,
    reported: Mutex<HashSet<String>>,
}

impl DiscoveryScanner {
    pub fn new(
        bridge: impl Into<String>,
        sink: Arc<dyn Sink>,
        callback: Arc<dyn DiscoveryCallback>,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            sink,
            callback,
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// Run one scan and return the devices reported by it.
    ///
    /// Holds the session lock for the whole network exchange. An offline
    /// bridge is not scanned at all.
    pub async fn scan<B: Binding>(
        &self,
        binding: &B,
        session: &tokio::sync::Mutex<Session>,
        bridge_online: bool,
    ) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
        if !bridge_online {
            debug!(bridge = %self.bridge, "bridge offline, discovery skipped");
            return Err(DiscoveryError::BridgeOffline);
        }

        let devices = {
            let mut session = session.lock().await;
            binding.ensure_valid(&mut session).await?;
            binding.list_devices(&mut session).await?
        };
        debug!(bridge = %self.bridge, listed = devices.len(), "discovery scan finished");
        Ok(self.report(devices))
    }

    /// Emit every device neither reported before nor already known to the
    /// host.
    pub fn report(&self, devices: Vec<DiscoveredDevice>) -> Vec<DiscoveredDevice> {
        let mut fresh = Vec::new();
        for device in devices {
            if self.callback.exists(&device.external_id) {
                continue;
            }
            let first_time = self
                .reported
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(device.external_id.clone());
            if !first_time {
                continue;
            }
            info!(
                bridge = %self.bridge,
                id = %device.external_id,
                name = %device.display_name,
                device_type = %device.device_type,
                "device discovered"
            );
            self.sink.thing_discovered(&self.bridge, device.clone());
            fresh.push(device);
        }
        fresh
    }

    /// Number of devices reported so far.
    pub fn reported(&self) -> usize {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
