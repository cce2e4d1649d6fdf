// ── Device snapshot store ──
//
// Read-side view of the registry. The registry is the only writer; every
// parse result lands here as an immutable `Arc<GoveeDevice>` and the
// id-ordered snapshot is re-sent to subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::GoveeDevice;
use crate::stream::DeviceStream;

/// Reactive store of the latest state of every known device.
pub struct DeviceStore {
    devices: DashMap<String, Arc<GoveeDevice>>,
    snapshot: watch::Sender<Arc<Vec<Arc<GoveeDevice>>>>,
    version: AtomicU64,
    last_update: watch::Sender<Option<DateTime<Utc>>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
            snapshot: watch::Sender::new(Arc::new(Vec::new())),
            version: AtomicU64::new(0),
            last_update: watch::Sender::new(None),
        }
    }

    /// Store the latest copy of a device. Returns `true` the first time an
    /// id is seen.
    pub(crate) fn upsert(&self, device: Arc<GoveeDevice>) -> bool {
        let is_new = self
            .devices
            .insert(device.device_id.clone(), device)
            .is_none();

        let mut devices: Vec<Arc<GoveeDevice>> =
            self.devices.iter().map(|entry| Arc::clone(entry.value())).collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        // send_replace: the value must update even with no receivers.
        self.snapshot.send_replace(Arc::new(devices));

        self.version.fetch_add(1, Ordering::Relaxed);
        self.last_update.send_replace(Some(Utc::now()));
        is_new
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Every device, ordered by id.
    pub fn snapshot(&self) -> Arc<Vec<Arc<GoveeDevice>>> {
        self.snapshot.borrow().clone()
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<GoveeDevice>> {
        self.devices.get(device_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn count(&self) -> usize {
        self.devices.len()
    }

    /// Mutation counter; increases on every stored update.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> DeviceStream {
        DeviceStream::new(self.snapshot.subscribe())
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.borrow()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DeviceConfig, DeviceKind};

    fn device(id: &str) -> Arc<GoveeDevice> {
        let config = DeviceConfig {
            device_id: id.into(),
            model: "H6003".into(),
            ..DeviceConfig::default()
        };
        Arc::new(GoveeDevice::new(&config, DeviceKind::RgbLight))
    }

    #[test]
    fn upsert_replaces_by_device_id() {
        let store = DeviceStore::new();
        assert!(store.last_update().is_none());

        assert!(store.upsert(device("a")));
        assert!(!store.upsert(device("a")));
        assert!(store.upsert(device("b")));

        assert_eq!(store.count(), 2);
        assert_eq!(store.version(), 3);
        assert_eq!(store.device("a").unwrap().model, "H6003");
        assert!(store.device("missing").is_none());
        assert!(store.last_update().is_some());
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let store = DeviceStore::new();
        for id in ["c", "a", "b"] {
            store.upsert(device(id));
        }
        let ids: Vec<String> = store
            .snapshot()
            .iter()
            .map(|d| d.device_id.clone())
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }
}
