// =============================================================================
// store/redis_store.rs — TRIPS THAT SURVIVE A RESTART
// =============================================================================
//
// Key layout (prefix defaults to "trips"):
//
//   {prefix}:trip:{trip_id}     STRING   the trip as JSON
//   {prefix}:rider:{rider_id}   ZSET     trip ids, score = created_at (µs)
//
// insert = SET NX + ZADD in one Lua script, update = SET XX,
// find = ZREVRANGE + MGET, count = ZCARD. The sorted set gives recency
// order for free.
//
// The script runs atomically on the server, so a trip blob never exists
// without its index entry, whether the client errors or goes away
// mid-call.
// =============================================================================

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};
use uuid::Uuid;

use super::{StoreError, TripStore};
use crate::models::TripRecord;

/// KEYS[1] trip key, KEYS[2] rider index. ARGV: json, score, trip id.
/// Returns 1 when inserted, 0 when the trip key already existed.
const INSERT_SCRIPT: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
  redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
  return 1
end
return 0
";

#[derive(Clone)]
pub struct RedisTripStore {
    conn: ConnectionManager,
    prefix: String,
    insert_script: redis::Script,
}

impl RedisTripStore {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        let prefix = prefix.into();
        info!(prefix = %prefix, "Redis trip store connected");
        Ok(Self {
            conn,
            prefix,
            insert_script: redis::Script::new(INSERT_SCRIPT),
        })
    }

    fn trip_key(&self, id: Uuid) -> String {
        trip_key(&self.prefix, id)
    }

    fn rider_key(&self, rider_id: Uuid) -> String {
        rider_key(&self.prefix, rider_id)
    }
}

fn trip_key(prefix: &str, id: Uuid) -> String {
    format!("{prefix}:trip:{id}")
}

fn rider_key(prefix: &str, rider_id: Uuid) -> String {
    format!("{prefix}:rider:{rider_id}")
}

fn recency_score(trip: &TripRecord) -> f64 {
    trip.created_at.timestamp_micros() as f64
}

#[async_trait]
impl TripStore for RedisTripStore {
    async fn insert(&self, trip: &TripRecord) -> Result<Uuid, StoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(trip)?;

        let inserted: i64 = self
            .insert_script
            .key(self.trip_key(trip.id))
            .key(self.rider_key(trip.rider_id))
            .arg(&json)
            .arg(recency_score(trip))
            .arg(trip.id.to_string())
            .invoke_async(&mut conn)
            .await?;
        if inserted == 0 {
            return Err(StoreError::Duplicate(trip.id));
        }

        debug!(trip_id = %trip.id, rider_id = %trip.rider_id, "Trip inserted into Redis");
        Ok(trip.id)
    }

    async fn update(&self, trip: &TripRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(trip)?;

        let replaced: Option<String> = redis::cmd("SET")
            .arg(self.trip_key(trip.id))
            .arg(&json)
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        match replaced {
            Some(_) => Ok(()),
            None => Err(StoreError::Missing(trip.id)),
        }
    }

    async fn find_by_rider(&self, rider_id: Uuid) -> Result<Vec<TripRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrevrange(self.rider_key(rider_id), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}:trip:{}", self.prefix, id))
            .collect();
        let blobs: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        blobs
            .into_iter()
            .flatten()
            .map(|json| serde_json::from_str::<TripRecord>(&json).map_err(StoreError::from))
            .collect()
    }

    async fn count_by_rider(&self, rider_id: Uuid) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(self.rider_key(rider_id)).await?;
        Ok(count)
    }
}
