//! Keyed entity table with atomic updates and in-flight claims.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};

struct Slot<T> {
    value: T,
    in_flight: bool,
}

/// In-memory table of one instruction kind.
///
/// Every mutation runs under the write lock against a copy of the entity and
/// is committed only if it succeeds, so a failed update leaves no trace.
/// A claimed entity is excluded from `idle` snapshots until its claim is
/// completed.
pub struct Table<T> {
    slots: RwLock<HashMap<String, Slot<T>>>,
}

impl<T: Clone> Table<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, id: String, value: T) {
        let mut slots = self.slots.write().await;
        slots.insert(
            id,
            Slot {
                value,
                in_flight: false,
            },
        );
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        let slots = self.slots.read().await;
        slots.get(id).map(|s| s.value.clone())
    }

    pub async fn list(&self) -> Vec<T> {
        let slots = self.slots.read().await;
        slots.values().map(|s| s.value.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_in_flight(&self, id: &str) -> bool {
        let slots = self.slots.read().await;
        slots.get(id).map_or(false, |s| s.in_flight)
    }

    /// Unclaimed entities matching `filter`.
    pub async fn idle(&self, filter: impl Fn(&T) -> bool) -> Vec<T> {
        let slots = self.slots.read().await;
        slots
            .values()
            .filter(|s| !s.in_flight && filter(&s.value))
            .map(|s| s.value.clone())
            .collect()
    }

    /// Apply `f` atomically, regardless of any outstanding claim.
    pub async fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut T) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Self::commit(slot, f)
    }

    /// Apply `f` atomically, refusing if the entity is claimed.
    pub async fn update_idle<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut T) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if slot.in_flight {
            return Err(EngineError::invalid_transition(id, "execution in flight"));
        }
        Self::commit(slot, f)
    }

    /// Mark the entity in flight if it is unclaimed and `check` accepts it.
    pub async fn claim<R>(&self, id: &str, check: impl FnOnce(&T) -> EngineResult<R>) -> EngineResult<R> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if slot.in_flight {
            return Err(EngineError::invalid_transition(id, "execution in flight"));
        }
        let out = check(&slot.value)?;
        slot.in_flight = true;
        Ok(out)
    }

    /// Clear the claim and apply `f` in the same critical section.
    ///
    /// The claim is cleared even when `f` fails.
    pub async fn complete<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut T) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        slot.in_flight = false;
        Self::commit(slot, f)
    }

    fn commit<R>(slot: &mut Slot<T>, f: impl FnOnce(&mut T) -> EngineResult<R>) -> EngineResult<R> {
        let mut draft = slot.value.clone();
        let out = f(&mut draft)?;
        slot.value = draft;
        Ok(out)
    }
}

impl<T: Clone> Default for Table<T> {
    fn default() -> Self {
        Self::new()
    }
}
