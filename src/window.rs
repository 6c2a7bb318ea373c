//! Rolling per-entity telemetry windows.
//!
//! Each entity owns a fixed-capacity FIFO of its most recent snapshots, most
//! recent last. The map is sharded so unrelated entities never contend.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::Serialize;

use crate::db::EntityId;
use crate::telemetry::MetricSnapshot;

/// Concurrent map of entity id to a bounded ring buffer of snapshots.
pub struct RollingWindowCache {
    capacity: usize,
    windows: DashMap<EntityId, VecDeque<MetricSnapshot>>,
}

/// Fill level of one entity's window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStatus {
    pub current_size: usize,
    pub required_size: usize,
    pub is_ready: bool,
}

impl RollingWindowCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a snapshot, evicting the oldest once the window is full.
    pub fn add(&self, entity_id: EntityId, snapshot: MetricSnapshot) {
        let mut window = self
            .windows
            .entry(entity_id)
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        window.push_back(snapshot);
        while window.len() > self.capacity {
            window.pop_front();
        }
    }

    /// Ordered copy of the window; empty for unknown entities.
    pub fn get(&self, entity_id: EntityId) -> Vec<MetricSnapshot> {
        self.windows
            .get(&entity_id)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The window as it would look after `add`, without changing it.
    pub fn preview(&self, entity_id: EntityId, snapshot: &MetricSnapshot) -> Vec<MetricSnapshot> {
        let mut window = self.get(entity_id);
        window.push(snapshot.clone());
        let excess = window.len().saturating_sub(self.capacity);
        window.drain(..excess);
        window
    }

    pub fn size(&self, entity_id: EntityId) -> usize {
        self.windows.get(&entity_id).map(|w| w.len()).unwrap_or(0)
    }

    pub fn status(&self, entity_id: EntityId) -> WindowStatus {
        let current_size = self.size(entity_id);
        WindowStatus {
            current_size,
            required_size: self.capacity,
            is_ready: current_size >= self.capacity,
        }
    }

    pub fn clear(&self, entity_id: EntityId) {
        self.windows.remove(&entity_id);
    }

    /// Total snapshots held across all entities.
    pub fn total_len(&self) -> usize {
        self.windows.iter().map(|w| w.len()).sum()
    }
}
