use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{StoreError, TripStore};
use crate::models::TripRecord;

#[derive(Default)]
struct Tables {
    trips: HashMap<Uuid, TripRecord>,
    /// Trip ids per rider, in insertion order.
    by_rider: HashMap<Uuid, Vec<Uuid>>,
}

/// Thread-safe in-memory trip store.
///
/// Trips sharing a `created_at` come back newest-inserted first, so the
/// recency order is total even when the clock doesn't move between trips.
#[derive(Default)]
pub struct InMemoryTripStore {
    tables: RwLock<Tables>,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.read().trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: Uuid) -> Option<TripRecord> {
        self.tables.read().trips.get(&id).cloned()
    }
}

#[async_trait]
impl TripStore for InMemoryTripStore {
    async fn insert(&self, trip: &TripRecord) -> Result<Uuid, StoreError> {
        let mut tables = self.tables.write();
        if tables.trips.contains_key(&trip.id) {
            return Err(StoreError::Duplicate(trip.id));
        }
        tables.trips.insert(trip.id, trip.clone());
        tables.by_rider.entry(trip.rider_id).or_default().push(trip.id);
        Ok(trip.id)
    }

    async fn update(&self, trip: &TripRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables.trips.get_mut(&trip.id) {
            Some(existing) => {
                *existing = trip.clone();
                Ok(())
            }
            None => Err(StoreError::Missing(trip.id)),
        }
    }

    async fn find_by_rider(&self, rider_id: Uuid) -> Result<Vec<TripRecord>, StoreError> {
        let tables = self.tables.read();
        let mut trips: Vec<TripRecord> = tables
            .by_rider
            .get(&rider_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| tables.trips.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        // Stable: ties keep newest-inserted first.
        trips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trips)
    }

    async fn count_by_rider(&self, rider_id: Uuid) -> Result<u64, StoreError> {
        let tables = self.tables.read();
        Ok(tables.by_rider.get(&rider_id).map(|ids| ids.len() as u64).unwrap_or(0))
    }
}
