//! Entity descriptor registry
//!
//! One registry per orchestrator. Sources are registered by the host; derived
//! entities are registered as their pipelines finish.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;
use tumbler_sql::{entity_id, DescriptorResolver, EntityDescriptor, EntityRole, Timeframe};

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entries: RwLock<BTreeMap<String, EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the descriptor under its name.
    pub fn register(&self, descriptor: EntityDescriptor) {
        debug!(entity = %descriptor.name, role = ?descriptor.role, "Registered descriptor");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<EntityDescriptor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every descriptor.
    pub fn snapshot(&self) -> BTreeMap<String, EntityDescriptor> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Descriptor of the `role` entity of rollup `base` at `timeframe`.
    pub fn by_timeframe(
        &self,
        base: &str,
        timeframe: &Timeframe,
        role: EntityRole,
    ) -> Option<EntityDescriptor> {
        self.get(&entity_id(base, timeframe, role))
    }

    /// Timeframes with a registered live table for `base`, ascending.
    pub fn timeframes(&self, base: &str) -> Vec<Timeframe> {
        let mut timeframes: Vec<Timeframe> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|d| d.role == EntityRole::Live)
            .filter_map(|d| {
                let tf = d.timeframe?;
                (d.name == entity_id(base, &tf, EntityRole::Live)).then_some(tf)
            })
            .collect();
        timeframes.sort();
        timeframes
    }
}

impl DescriptorResolver for EntityRegistry {
    fn resolve(&self, name: &str) -> Option<EntityDescriptor> {
        self.get(name)
    }
}
