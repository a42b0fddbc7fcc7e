// =============================================================================
// store/mod.rs — WHERE TRIPS GET WRITTEN DOWN
// =============================================================================
//
// A deliberately dumb persistence boundary. The store never decides
// anything about a trip; it inserts what it is given, overwrites what it
// is given, and answers two questions per rider: "which trips, newest
// first?" and "how many?".
//
// Two backends:
//   memory: a pair of maps behind a lock. Default, and what tests use.
//   redis : one JSON blob per trip plus a per-rider sorted set scored by
//            creation time.
// =============================================================================

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::error::SettlementError;
use crate::models::TripRecord;

pub use memory::InMemoryTripStore;
pub use redis_store::RedisTripStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("trip {0} already exists")]
    Duplicate(Uuid),

    #[error("trip {0} does not exist")]
    Missing(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        SettlementError::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait TripStore: Send + Sync {
    /// Persist a new trip. Fails if the id is already taken.
    async fn insert(&self, trip: &TripRecord) -> Result<Uuid, StoreError>;

    /// Overwrite an existing trip. Fails if the id is unknown.
    async fn update(&self, trip: &TripRecord) -> Result<(), StoreError>;

    /// A rider's trips, most recent `created_at` first.
    async fn find_by_rider(&self, rider_id: Uuid) -> Result<Vec<TripRecord>, StoreError>;

    async fn count_by_rider(&self, rider_id: Uuid) -> Result<u64, StoreError>;
}
