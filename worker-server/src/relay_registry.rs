// worker-server/src/relay_registry.rs
use actix::Addr;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use common::Config;

use crate::actors::relay_session_actor::RelaySessionActor;

/// A connected relay session and the page origin it fronts.
#[derive(Clone)]
pub struct RelayEntry {
    pub addr: Addr<RelaySessionActor>,
    pub origin: String,
    pub connected_at: DateTime<Utc>,
}

/// Registry of connected relay sessions.
pub struct RelayRegistry {
    sessions: DashMap<Uuid, RelayEntry>,
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn register(&self, session_id: Uuid, addr: Addr<RelaySessionActor>, origin: String) {
        self.sessions.insert(
            session_id,
            RelayEntry {
                addr,
                origin,
                connected_at: Utc::now(),
            },
        );
        tracing::info!("Relay session registered: {}", session_id);
    }

    pub fn unregister(&self, session_id: &Uuid) {
        self.sessions.remove(session_id);
        tracing::info!("Relay session unregistered: {}", session_id);
    }

    /// First connected session whose origin is on the allow-list, the
    /// analog of locating an open application tab.
    pub fn pick_allowed(&self, config: &Config) -> Option<(Uuid, RelayEntry)> {
        self.sessions
            .iter()
            .filter(|entry| config.origin_allowed(&entry.value().origin))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .next()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
