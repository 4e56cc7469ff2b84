// src/services/profile_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing;

use crate::errors::{RideError, RideResult};
use crate::models::ride::LocationPing;
use crate::models::user::{Availability, Profile, UserRole};

/// The profile fields this service touches. Profiles are owned by the
/// identity collaborator; only availability, trip count and last location
/// are written from here.
#[async_trait]
pub trait ProfileOperations: Send + Sync {
    async fn get(&self, user_id: &str) -> RideResult<Option<Profile>>;
    async fn put(&self, profile: &Profile) -> RideResult<()>;
    async fn set_availability(&self, user_id: &str, availability: Availability)
    -> RideResult<Profile>;
    async fn record_completed_trip(&self, driver_id: &str) -> RideResult<Profile>;
    async fn update_last_location(&self, driver_id: &str, ping: LocationPing)
    -> RideResult<Profile>;
    async fn list_online_drivers(&self) -> RideResult<Vec<Profile>>;
}

// ------------------------------
// In-memory profiles
// ------------------------------

pub struct MemoryProfileService {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl MemoryProfileService {
    pub fn new() -> Self {
        Self { profiles: RwLock::new(HashMap::new()) }
    }
}

impl Default for MemoryProfileService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileOperations for MemoryProfileService {
    async fn get(&self, user_id: &str) -> RideResult<Option<Profile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(user_id).cloned())
    }

    async fn put(&self, profile: &Profile) -> RideResult<()> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn set_availability(
        &self,
        user_id: &str,
        availability: Availability,
    ) -> RideResult<Profile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(user_id)
            .ok_or_else(|| RideError::user_not_found(user_id))?;

        profile.availability = availability;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn record_completed_trip(&self, driver_id: &str) -> RideResult<Profile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(driver_id)
            .ok_or_else(|| RideError::user_not_found(driver_id))?;

        profile.trips_completed += 1;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn update_last_location(
        &self,
        driver_id: &str,
        ping: LocationPing,
    ) -> RideResult<Profile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(driver_id)
            .ok_or_else(|| RideError::user_not_found(driver_id))?;

        profile.last_location = Some(ping);
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn list_online_drivers(&self) -> RideResult<Vec<Profile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles
            .values()
            .filter(|p| p.role == UserRole::Driver && p.availability == Availability::Online)
            .cloned()
            .collect())
    }
}

// ------------------------------
// Redis profiles
// ------------------------------

/// Profiles as JSON under `profile:{id}` plus an online-driver index set.
pub struct RedisProfileService {
    client: redis::Client,
}

const ONLINE_DRIVERS_SET: &str = "drivers:online";

fn profile_key(user_id: &str) -> String {
    format!("profile:{}", user_id)
}

impl RedisProfileService {
    pub fn new(redis_url: &str) -> RideResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> RideResult<redis::aio::Connection> {
        Ok(self.client.get_async_connection().await?)
    }

    async fn fetch(
        &self,
        conn: &mut redis::aio::Connection,
        user_id: &str,
    ) -> RideResult<Option<Profile>> {
        let data: Option<String> = redis::cmd("GET")
            .arg(profile_key(user_id))
            .query_async(conn)
            .await?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write(
        &self,
        conn: &mut redis::aio::Connection,
        profile: &Profile,
    ) -> RideResult<()> {
        let json = serde_json::to_string(profile)?;
        let _: () = redis::cmd("SET")
            .arg(profile_key(&profile.id))
            .arg(json)
            .query_async(conn)
            .await?;

        // Online-driver index follows the record
        let online = profile.role == UserRole::Driver
            && profile.availability == Availability::Online;
        let command = if online { "SADD" } else { "SREM" };
        let _: () = redis::cmd(command)
            .arg(ONLINE_DRIVERS_SET)
            .arg(&profile.id)
            .query_async(conn)
            .await?;

        Ok(())
    }

    async fn mutate<F>(&self, user_id: &str, apply: F) -> RideResult<Profile>
    where
        F: FnOnce(&mut Profile) + Send,
    {
        let mut conn = self.connection().await?;
        let mut profile = self
            .fetch(&mut conn, user_id)
            .await?
            .ok_or_else(|| RideError::user_not_found(user_id))?;

        apply(&mut profile);
        profile.updated_at = Utc::now();
        self.write(&mut conn, &profile).await?;
        Ok(profile)
    }
}

#[async_trait]
impl ProfileOperations for RedisProfileService {
    async fn get(&self, user_id: &str) -> RideResult<Option<Profile>> {
        let mut conn = self.connection().await?;
        self.fetch(&mut conn, user_id).await
    }

    async fn put(&self, profile: &Profile) -> RideResult<()> {
        let mut conn = self.connection().await?;
        self.write(&mut conn, profile).await
    }

    async fn set_availability(
        &self,
        user_id: &str,
        availability: Availability,
    ) -> RideResult<Profile> {
        tracing::debug!(user_id, ?availability, "Updating availability");
        self.mutate(user_id, |p| p.availability = availability).await
    }

    async fn record_completed_trip(&self, driver_id: &str) -> RideResult<Profile> {
        self.mutate(driver_id, |p| p.trips_completed += 1).await
    }

    async fn update_last_location(
        &self,
        driver_id: &str,
        ping: LocationPing,
    ) -> RideResult<Profile> {
        self.mutate(driver_id, move |p| p.last_location = Some(ping)).await
    }

    async fn list_online_drivers(&self) -> RideResult<Vec<Profile>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(ONLINE_DRIVERS_SET)
            .query_async(&mut conn)
            .await?;

        let mut drivers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(profile) = self.fetch(&mut conn, &id).await? {
                // The set can trail the record; the record decides.
                if profile.availability == Availability::Online {
                    drivers.push(profile);
                }
            }
        }
        Ok(drivers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ride::VehicleType;

    #[tokio::test]
    async fn test_set_availability() {
        let service = MemoryProfileService::new();
        service.put(&Profile::driver("drv-1", VehicleType::Car)).await.unwrap();

        let updated = service
            .set_availability("drv-1", Availability::Online)
            .await
            .unwrap();
        assert_eq!(updated.availability, Availability::Online);

        let err = service
            .set_availability("drv-missing", Availability::Online)
            .await
            .unwrap_err();
        assert!(matches!(err, RideError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_record_completed_trip_increments() {
        let service = MemoryProfileService::new();
        service.put(&Profile::driver("drv-1", VehicleType::Car)).await.unwrap();

        service.record_completed_trip("drv-1").await.unwrap();
        let profile = service.record_completed_trip("drv-1").await.unwrap();
        assert_eq!(profile.trips_completed, 2);
    }

    #[tokio::test]
    async fn test_list_online_drivers_filters_role_and_state() {
        let service = MemoryProfileService::new();
        service.put(&Profile::driver("drv-1", VehicleType::Car)).await.unwrap();
        service.put(&Profile::driver("drv-2", VehicleType::Bike)).await.unwrap();
        service.put(&Profile::rider("usr-1")).await.unwrap();

        service.set_availability("drv-1", Availability::Online).await.unwrap();
        // Riders never show up in the driver pool, online or not
        service.set_availability("usr-1", Availability::Online).await.unwrap();

        let online = service.list_online_drivers().await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, "drv-1");
    }
}
