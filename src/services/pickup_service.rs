// src/services/pickup_service.rs
use rand::Rng;

/// Issues and checks the short numeric code that gates the started
/// transition. The code is generated when a driver accepts a ride and
/// shared with the rider out-of-band; the driver's app presents it back
/// before the trip may begin.
pub struct PickupCodeIssuer;

pub const PICKUP_CODE_LEN: usize = 4;

impl PickupCodeIssuer {
    /// Uniformly random zero-padded 4-digit code, "0000" through "9999".
    pub fn issue() -> String {
        let mut rng = rand::rng();
        format!("{:04}", rng.random_range(0..10_000u16))
    }

    pub fn matches(stored: &str, presented: &str) -> bool {
        stored == presented.trim()
    }
}
