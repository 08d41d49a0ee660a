//! Authoritative map of modules known on the bus
//!
//! The registry is owned and mutated exclusively by the executor; every
//! read-side consumer gets an owned snapshot, never a live handle.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::module::{ConnectionState, ModuleDescriptor, ModuleId, ModuleKind, PropertyId};

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleId, ModuleDescriptor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an announce. Idempotent: re-announcing a known id refreshes
    /// its timestamp and state without duplicating it. Returns `true`
    /// when the id was not previously announced.
    pub fn upsert_announce(
        &mut self,
        id: ModuleId,
        kind: ModuleKind,
        uuid: u32,
        at: DateTime<Utc>,
    ) -> bool {
        match self.modules.get_mut(&id) {
            Some(existing) => {
                let first_announce = existing.kind.is_none();
                if let Some(prev) = existing.kind {
                    if prev != kind {
                        warn!(module = %id, ?prev, ?kind, "module kind changed on re-announce");
                    }
                }
                existing.kind = Some(kind);
                existing.uuid = uuid;
                existing.state = ConnectionState::Connected;
                existing.touch(at);
                first_announce
            }
            None => {
                debug!(module = %id, ?kind, uuid, "module announced");
                self.modules
                    .insert(id, ModuleDescriptor::announced(id, kind, uuid, at));
                true
            }
        }
    }

    /// Cache a property value, creating a reserved placeholder when the
    /// id has not announced yet.
    pub fn update_property(
        &mut self,
        id: ModuleId,
        property: PropertyId,
        value: f32,
        at: DateTime<Utc>,
    ) {
        let module = self
            .modules
            .entry(id)
            .or_insert_with(|| ModuleDescriptor::reserved(id, at));
        module.set_property(property, value, at);
        module.touch(at);
    }

    /// Store a module's own neighbor claims on its descriptor
    pub fn update_neighbors(&mut self, id: ModuleId, neighbors: [Option<ModuleId>; 4], at: DateTime<Utc>) {
        let module = self
            .modules
            .entry(id)
            .or_insert_with(|| ModuleDescriptor::reserved(id, at));
        module.neighbors = neighbors;
        module.touch(at);
    }

    /// Refresh liveness for an id already in the registry
    pub fn touch(&mut self, id: ModuleId, at: DateTime<Utc>) {
        if let Some(module) = self.modules.get_mut(&id) {
            module.touch(at);
            if module.state == ConnectionState::Disconnected {
                debug!(module = %id, "module traffic resumed");
                module.state = ConnectionState::Connected;
            }
        }
    }

    pub fn get(&self, id: ModuleId) -> Option<&ModuleDescriptor> {
        self.modules.get(&id)
    }

    /// Owned snapshot of every descriptor
    pub fn snapshot(&self) -> Vec<ModuleDescriptor> {
        let mut modules: Vec<_> = self.modules.values().cloned().collect();
        modules.sort_by_key(|m| m.id);
        modules
    }

    /// Owned snapshot filtered by kind tag
    pub fn list_by_kind(&self, kind: ModuleKind) -> Vec<ModuleDescriptor> {
        let mut modules: Vec<_> = self
            .modules
            .values()
            .filter(|m| m.kind == Some(kind))
            .cloned()
            .collect();
        modules.sort_by_key(|m| m.id);
        modules
    }

    pub fn ids(&self) -> Vec<ModuleId> {
        self.modules.keys().copied().collect()
    }

    /// The network-bridge module, root of the topology
    pub fn network_root(&self) -> Option<ModuleId> {
        self.modules
            .values()
            .filter(|m| m.kind == Some(ModuleKind::Network))
            .map(|m| m.id)
            .min()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Transition silent modules Connected -> Disconnected. Descriptors
    /// are retained with their last-known state; nothing is deleted.
    pub fn sweep_stale(&mut self, timeout_ms: i64, now: DateTime<Utc>) -> Vec<ModuleId> {
        let mut went_stale = Vec::new();
        for module in self.modules.values_mut() {
            if module.state == ConnectionState::Connected && module.is_stale(timeout_ms, now) {
                module.state = ConnectionState::Disconnected;
                went_stale.push(module.id);
            }
        }
        went_stale
    }

    /// Full reset, used only by the facade when re-opening a session
    pub fn clear(&mut self) {
        self.modules.clear();
    }
}
