// src/models/user.rs
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RideError;
use crate::models::ride::{LocationPing, VehicleType};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Rider,
    Driver,
    Admin,
}

impl UserRole {
    pub fn parse(value: &str) -> Option<UserRole> {
        match value {
            "rider" => Some(UserRole::Rider),
            "driver" => Some(UserRole::Driver),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Offline, // Not taking work
    Online,  // Visible to matching
    Busy,    // On a ride
}

/// The slice of a user profile this service reads and writes. The full
/// profile lives with the identity collaborator; everything else about a
/// user is opaque here.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Profile {
    pub id: String,
    pub role: UserRole,
    pub availability: Availability,
    pub vehicle_type: Option<VehicleType>,
    pub rating: f32,
    pub trips_completed: u32,
    pub last_location: Option<LocationPing>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn rider(id: &str) -> Self {
        Self {
            id: id.to_string(),
            role: UserRole::Rider,
            availability: Availability::Offline,
            vehicle_type: None,
            rating: 0.0,
            trips_completed: 0,
            last_location: None,
            updated_at: Utc::now(),
        }
    }

    pub fn driver(id: &str, vehicle_type: VehicleType) -> Self {
        Self {
            id: id.to_string(),
            role: UserRole::Driver,
            availability: Availability::Offline,
            vehicle_type: Some(vehicle_type),
            rating: 0.0,
            trips_completed: 0,
            last_location: None,
            updated_at: Utc::now(),
        }
    }
}

/// What a rider sees when browsing available drivers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverSummary {
    pub id: String,
    pub rating: f32,
    pub trips_completed: u32,
    pub vehicle_type: Option<VehicleType>,
    pub last_location: Option<LocationPing>,
}

impl From<&Profile> for DriverSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            id: profile.id.clone(),
            rating: profile.rating,
            trips_completed: profile.trips_completed,
            vehicle_type: profile.vehicle_type,
            last_location: profile.last_location.clone(),
        }
    }
}

/// Caller identity as asserted by the upstream identity provider. The
/// gateway authenticates and stamps these headers; this service trusts
/// them as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: UserRole,
}

impl Caller {
    pub fn new(id: &str, role: UserRole) -> Self {
        Self { id: id.to_string(), role }
    }
}

const CALLER_ID_HEADER: &str = "x-caller-id";
const CALLER_ROLE_HEADER: &str = "x-caller-role";

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = RideError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(CALLER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RideError::unauthorized("missing caller identity"))?;

        let role = parts
            .headers
            .get(CALLER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(UserRole::parse)
            .ok_or_else(|| RideError::unauthorized("missing or unknown caller role"))?;

        Ok(Caller { id: id.to_string(), role })
    }
}
