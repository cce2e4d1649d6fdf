// ── Connection state ──
//
// One state per transport endpoint (the cloud session, the BLE adapter,
// each BLE peripheral). Trackers only report actual edges so listeners
// never see the same state twice in a row.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Offline,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Edge detector keyed by endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionTracker<K> {
    states: HashMap<K, ConnectionState>,
}

impl<K> Default for ConnectionTracker<K> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> ConnectionTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `state` for `key`. Returns `true` only if it differs from the
    /// previous state; an endpoint never seen before counts as `Closed`.
    pub fn transition(&mut self, key: K, state: ConnectionState) -> bool {
        let previous = self.states.insert(key, state);
        previous.unwrap_or(ConnectionState::Closed) != state
    }

    pub fn state(&self, key: &K) -> Option<ConnectionState> {
        self.states.get(key).copied()
    }

    pub fn is_connected(&self, key: &K) -> bool {
        self.state(key).is_some_and(ConnectionState::is_connected)
    }

    /// Endpoints currently in any state other than `Closed`/`Offline`.
    pub fn active(&self) -> impl Iterator<Item = &K> {
        self.states
            .iter()
            .filter(|(_, s)| matches!(s, ConnectionState::Connecting | ConnectionState::Connected))
            .map(|(k, _)| k)
    }
}
