// src/services/ride_store.rs
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing;

use crate::models::ride::{Ride, RideStatus};

/// Every status write goes through `transition`, which only commits when the
/// stored status still equals the expected prior state. Two drivers racing to
/// accept the same ride therefore resolve to exactly one winner at the
/// storage layer, not in application code.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ride not found")]
    NotFound,

    #[error("ride status is {actual:?}, not the expected state")]
    StatusConflict { actual: RideStatus },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for crate::errors::RideError {
    fn from(err: StoreError) -> Self {
        use crate::errors::RideError;
        match err {
            StoreError::NotFound => RideError::not_found("ride"),
            StoreError::StatusConflict { actual } => RideError::RideNotActive { status: actual },
            StoreError::Backend(msg) => RideError::StoreUnavailable(msg),
            StoreError::Serialization(msg) => RideError::Serialization(msg),
        }
    }
}

/// Record mutation applied inside a guarded write. Must be re-runnable, the
/// optimistic Redis path replays it when a concurrent writer got there first.
pub type Mutator = Box<dyn Fn(&mut Ride) + Send + Sync>;

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn put(&self, ride: &Ride) -> Result<(), StoreError>;
    async fn get(&self, ride_id: &str) -> Result<Option<Ride>, StoreError>;
    async fn list_pending(&self) -> Result<Vec<Ride>, StoreError>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Ride>, StoreError>;

    /// Compare-and-set status transition: applies `apply` and commits only if
    /// the stored status equals `expected_from` at write time. Returns the
    /// ride as written.
    async fn transition(
        &self,
        ride_id: &str,
        expected_from: RideStatus,
        apply: Mutator,
    ) -> Result<Ride, StoreError>;

    /// Guarded non-status mutation (location appends, code verification):
    /// commits only while the stored status is one of `allowed`, without
    /// losing concurrent writes to the same record.
    async fn update(
        &self,
        ride_id: &str,
        allowed: Vec<RideStatus>,
        apply: Mutator,
    ) -> Result<Ride, StoreError>;
}

// ------------------------------
// In-memory store
// ------------------------------

/// Backing store for tests and single-node development. The write lock is
/// held across check-and-apply, which makes `transition` atomic.
pub struct MemoryRideStore {
    rides: RwLock<HashMap<String, Ride>>,
}

impl MemoryRideStore {
    pub fn new() -> Self {
        Self { rides: RwLock::new(HashMap::new()) }
    }
}

impl Default for MemoryRideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RideStore for MemoryRideStore {
    async fn put(&self, ride: &Ride) -> Result<(), StoreError> {
        let mut rides = self.rides.write().await;
        rides.insert(ride.id.clone(), ride.clone());
        Ok(())
    }

    async fn get(&self, ride_id: &str) -> Result<Option<Ride>, StoreError> {
        let rides = self.rides.read().await;
        Ok(rides.get(ride_id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<Ride>, StoreError> {
        let rides = self.rides.read().await;
        Ok(rides
            .values()
            .filter(|r| r.status == RideStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Ride>, StoreError> {
        let rides = self.rides.read().await;
        Ok(rides.values().filter(|r| r.is_party(user_id)).cloned().collect())
    }

    async fn transition(
        &self,
        ride_id: &str,
        expected_from: RideStatus,
        apply: Mutator,
    ) -> Result<Ride, StoreError> {
        let mut rides = self.rides.write().await;
        let ride = rides.get_mut(ride_id).ok_or(StoreError::NotFound)?;

        if ride.status != expected_from {
            return Err(StoreError::StatusConflict { actual: ride.status });
        }

        apply(ride);
        ride.revision += 1;
        Ok(ride.clone())
    }

    async fn update(
        &self,
        ride_id: &str,
        allowed: Vec<RideStatus>,
        apply: Mutator,
    ) -> Result<Ride, StoreError> {
        let mut rides = self.rides.write().await;
        let ride = rides.get_mut(ride_id).ok_or(StoreError::NotFound)?;

        if !allowed.contains(&ride.status) {
            return Err(StoreError::StatusConflict { actual: ride.status });
        }

        apply(ride);
        ride.revision += 1;
        Ok(ride.clone())
    }
}

// ------------------------------
// Redis store
// ------------------------------

/// Rides as JSON under `ride:{id}`, with membership sets indexing the
/// pending pool and each user's rides. Guarded writes run a Lua script that
/// re-checks the stored revision before replacing the value, so a concurrent
/// writer forces a reload-and-replay instead of a lost update.
pub struct RedisRideStore {
    client: redis::Client,
    cas_script: redis::Script,
}

const PENDING_SET: &str = "rides:pending";

/// Retries for the optimistic write loop. Contention on a single ride is two
/// actors at most, so a handful of attempts is plenty.
const CAS_MAX_RETRIES: usize = 5;

const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if not cur then
  return 'missing'
end
local rev = cjson.decode(cur)['revision']
if tostring(rev) ~= ARGV[1] then
  return 'stale'
end
redis.call('SET', KEYS[1], ARGV[2])
return 'ok'
"#;

fn ride_key(ride_id: &str) -> String {
    format!("ride:{}", ride_id)
}

fn user_rides_key(user_id: &str) -> String {
    format!("rides:user:{}", user_id)
}

impl RedisRideStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            cas_script: redis::Script::new(CAS_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::Connection, StoreError> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn fetch(
        &self,
        conn: &mut redis::aio::Connection,
        ride_id: &str,
    ) -> Result<Option<Ride>, StoreError> {
        let data: Option<String> = redis::cmd("GET")
            .arg(ride_key(ride_id))
            .query_async(conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match data {
            Some(json) => {
                let ride: Ride = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(ride))
            }
            None => Ok(None),
        }
    }

    /// Keeps the membership sets in line with the record after a write. The
    /// record itself is the source of truth; reads re-check status.
    async fn sync_indexes(
        &self,
        conn: &mut redis::aio::Connection,
        ride: &Ride,
    ) -> Result<(), StoreError> {
        if ride.status == RideStatus::Pending {
            let _: () = redis::cmd("SADD")
                .arg(PENDING_SET)
                .arg(&ride.id)
                .query_async(conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        } else {
            let _: () = redis::cmd("SREM")
                .arg(PENDING_SET)
                .arg(&ride.id)
                .query_async(conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        let _: () = redis::cmd("SADD")
            .arg(user_rides_key(&ride.rider_id))
            .arg(&ride.id)
            .query_async(conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if let Some(driver_id) = &ride.driver_id {
            let _: () = redis::cmd("SADD")
                .arg(user_rides_key(driver_id))
                .arg(&ride.id)
                .query_async(conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        Ok(())
    }

    async fn fetch_members(
        &self,
        conn: &mut redis::aio::Connection,
        set_key: &str,
    ) -> Result<Vec<Ride>, StoreError> {
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(set_key)
            .query_async(conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut rides = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ride) = self.fetch(conn, &id).await? {
                rides.push(ride);
            }
        }
        Ok(rides)
    }

    /// Load, check, apply, then commit through the revision-checked script.
    /// A stale revision means another writer won; reload and replay.
    async fn guarded_write<C>(
        &self,
        ride_id: &str,
        check: C,
        apply: &Mutator,
    ) -> Result<Ride, StoreError>
    where
        C: Fn(&Ride) -> Result<(), StoreError>,
    {
        let mut conn = self.connection().await?;

        for _ in 0..CAS_MAX_RETRIES {
            let current = self.fetch(&mut conn, ride_id).await?.ok_or(StoreError::NotFound)?;
            check(&current)?;

            let mut updated = current.clone();
            apply(&mut updated);
            updated.revision = current.revision + 1;

            let json = serde_json::to_string(&updated)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            let outcome: String = self
                .cas_script
                .key(ride_key(ride_id))
                .arg(current.revision)
                .arg(json)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            match outcome.as_str() {
                "ok" => {
                    self.sync_indexes(&mut conn, &updated).await?;
                    return Ok(updated);
                }
                "missing" => return Err(StoreError::NotFound),
                _ => {
                    tracing::debug!(ride_id, "Stale revision on guarded write, retrying");
                    continue;
                }
            }
        }

        Err(StoreError::Backend(format!(
            "gave up on ride {} after {} contended writes",
            ride_id, CAS_MAX_RETRIES
        )))
    }
}

#[async_trait]
impl RideStore for RedisRideStore {
    async fn put(&self, ride: &Ride) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(ride)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let _: () = redis::cmd("SET")
            .arg(ride_key(&ride.id))
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        self.sync_indexes(&mut conn, ride).await
    }

    async fn get(&self, ride_id: &str) -> Result<Option<Ride>, StoreError> {
        let mut conn = self.connection().await?;
        self.fetch(&mut conn, ride_id).await
    }

    async fn list_pending(&self) -> Result<Vec<Ride>, StoreError> {
        let mut conn = self.connection().await?;
        let rides = self.fetch_members(&mut conn, PENDING_SET).await?;
        // The set can briefly trail the records; the status field decides.
        Ok(rides
            .into_iter()
            .filter(|r| r.status == RideStatus::Pending)
            .collect())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Ride>, StoreError> {
        let mut conn = self.connection().await?;
        self.fetch_members(&mut conn, &user_rides_key(user_id)).await
    }

    async fn transition(
        &self,
        ride_id: &str,
        expected_from: RideStatus,
        apply: Mutator,
    ) -> Result<Ride, StoreError> {
        self.guarded_write(
            ride_id,
            move |ride| {
                if ride.status != expected_from {
                    return Err(StoreError::StatusConflict { actual: ride.status });
                }
                Ok(())
            },
            &apply,
        )
        .await
    }

    async fn update(
        &self,
        ride_id: &str,
        allowed: Vec<RideStatus>,
        apply: Mutator,
    ) -> Result<Ride, StoreError> {
        self.guarded_write(
            ride_id,
            move |ride| {
                if !allowed.contains(&ride.status) {
                    return Err(StoreError::StatusConflict { actual: ride.status });
                }
                Ok(())
            },
            &apply,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ride::{
        CreateRideRequest, GeoPoint, RidePaymentMethod, RoutePoint, VehicleType,
    };
    use std::sync::Arc;

    fn ride(id: &str) -> Ride {
        Ride::new(
            id.to_string(),
            "usr-rider".to_string(),
            CreateRideRequest {
                pickup: RoutePoint {
                    address: "A".to_string(),
                    location: GeoPoint { latitude: 0.0, longitude: 0.0 },
                },
                dropoff: RoutePoint {
                    address: "B".to_string(),
                    location: GeoPoint { latitude: 1.0, longitude: 1.0 },
                },
                fare: 100.0,
                distance_km: 2.0,
                estimated_minutes: 10,
                vehicle_type: VehicleType::Car,
                payment_method: RidePaymentMethod::Cash,
            },
        )
    }

    #[tokio::test]
    async fn test_transition_applies_when_status_matches() {
        let store = MemoryRideStore::new();
        store.put(&ride("rid-1")).await.unwrap();

        let updated = store
            .transition(
                "rid-1",
                RideStatus::Pending,
                Box::new(|r| {
                    r.status = RideStatus::Accepted;
                    r.driver_id = Some("drv-1".to_string());
                }),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, RideStatus::Accepted);
        assert_eq!(updated.driver_id.as_deref(), Some("drv-1"));
        assert_eq!(updated.revision, 1);
    }

    #[tokio::test]
    async fn test_transition_rejects_stale_expectation() {
        let store = MemoryRideStore::new();
        store.put(&ride("rid-1")).await.unwrap();

        store
            .transition(
                "rid-1",
                RideStatus::Pending,
                Box::new(|r| r.status = RideStatus::Accepted),
            )
            .await
            .unwrap();

        let err = store
            .transition(
                "rid-1",
                RideStatus::Pending,
                Box::new(|r| r.status = RideStatus::Accepted),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::StatusConflict { actual: RideStatus::Accepted }
        ));
    }

    #[tokio::test]
    async fn test_transition_missing_ride() {
        let store = MemoryRideStore::new();
        let err = store
            .transition("rid-nope", RideStatus::Pending, Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_concurrent_transitions_have_one_winner() {
        let store = Arc::new(MemoryRideStore::new());
        store.put(&ride("rid-1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let driver = format!("drv-{}", i);
                store
                    .transition(
                        "rid-1",
                        RideStatus::Pending,
                        Box::new(move |r| {
                            r.status = RideStatus::Accepted;
                            r.driver_id = Some(driver.clone());
                        }),
                    )
                    .await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(StoreError::StatusConflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 9);

        let stored = store.get("rid-1").await.unwrap().unwrap();
        assert_eq!(stored.status, RideStatus::Accepted);
        assert!(stored.driver_id.is_some());
    }

    #[tokio::test]
    async fn test_update_respects_allowed_states() {
        let store = MemoryRideStore::new();
        store.put(&ride("rid-1")).await.unwrap();

        let err = store
            .update(
                "rid-1",
                vec![RideStatus::Accepted, RideStatus::Started, RideStatus::PickedUp],
                Box::new(|r| r.code_verified = true),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::StatusConflict { actual: RideStatus::Pending }
        ));
    }

    #[tokio::test]
    async fn test_list_pending_excludes_other_states() {
        let store = MemoryRideStore::new();
        store.put(&ride("rid-1")).await.unwrap();
        store.put(&ride("rid-2")).await.unwrap();

        store
            .transition(
                "rid-2",
                RideStatus::Pending,
                Box::new(|r| r.status = RideStatus::Rejected),
            )
            .await
            .unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "rid-1");
    }

    #[tokio::test]
    async fn test_list_by_user_covers_rider_and_driver() {
        let store = MemoryRideStore::new();
        store.put(&ride("rid-1")).await.unwrap();

        store
            .transition(
                "rid-1",
                RideStatus::Pending,
                Box::new(|r| {
                    r.status = RideStatus::Accepted;
                    r.driver_id = Some("drv-9".to_string());
                }),
            )
            .await
            .unwrap();

        assert_eq!(store.list_by_user("usr-rider").await.unwrap().len(), 1);
        assert_eq!(store.list_by_user("drv-9").await.unwrap().len(), 1);
        assert!(store.list_by_user("usr-else").await.unwrap().is_empty());
    }
}
