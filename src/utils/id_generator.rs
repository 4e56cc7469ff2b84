// src/utils/id_generator.rs
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    User,
    Driver,
    Ride,
}

impl IdType {
    pub fn to_prefix(&self) -> &'static str {
        match self {
            IdType::User => "usr",
            IdType::Driver => "drv",
            IdType::Ride => "rid",
        }
    }

    fn from_prefix(prefix: &str) -> Option<IdType> {
        match prefix {
            "usr" => Some(IdType::User),
            "drv" => Some(IdType::Driver),
            "rid" => Some(IdType::Ride),
            _ => None,
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_prefix())
    }
}

const SUFFIX_LEN: usize = 6;
const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub struct IdGenerator;

impl IdGenerator {
    /// Generate a unique ID with format: {prefix}-{date}-{random_suffix}
    pub fn generate(id_type: IdType) -> String {
        Self::generate_with_timestamp(id_type, Utc::now())
    }

    /// Generate an ID with a specific timestamp (useful for testing)
    pub fn generate_with_timestamp(id_type: IdType, timestamp: DateTime<Utc>) -> String {
        let date_part = timestamp.format("%y%m%d").to_string(); // YYMMDD
        let mut rng = rand::rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| {
                let idx = rng.random_range(0..SUFFIX_CHARS.len());
                SUFFIX_CHARS[idx] as char
            })
            .collect();

        format!("{}-{}-{}", id_type.to_prefix(), date_part, suffix)
    }

    /// Parse an ID to extract its components
    pub fn parse_id(id: &str) -> Option<ParsedId> {
        let parts: Vec<&str> = id.split('-').collect();
        if parts.len() != 3 {
            return None;
        }

        let id_type = IdType::from_prefix(parts[0])?;
        let date_part = parts[1];
        let suffix = parts[2];

        if date_part.len() != 6 || suffix.len() != SUFFIX_LEN {
            return None;
        }
        if !suffix.bytes().all(|b| SUFFIX_CHARS.contains(&b)) {
            return None;
        }

        let year = 2000 + date_part[0..2].parse::<i32>().ok()?;
        let month = date_part[2..4].parse::<u32>().ok()?;
        let day = date_part[4..6].parse::<u32>().ok()?;

        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }

        Some(ParsedId {
            id_type,
            year,
            month,
            day,
            suffix: suffix.to_string(),
        })
    }

    /// Validate that an ID matches the expected format and type
    pub fn validate_id(id: &str, expected_type: Option<IdType>) -> bool {
        match Self::parse_id(id) {
            Some(parsed) => expected_type.is_none_or(|expected| parsed.id_type == expected),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedId {
    pub id_type: IdType,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub suffix: String,
}

impl ParsedId {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(self.year, self.month, self.day, 0, 0, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let user_id = IdGenerator::generate(IdType::User);
        assert!(user_id.starts_with("usr-"));
        assert_eq!(user_id.split('-').count(), 3);

        let ride_id = IdGenerator::generate(IdType::Ride);
        assert!(ride_id.starts_with("rid-"));
        assert!(IdGenerator::validate_id(&ride_id, Some(IdType::Ride)));
    }

    #[test]
    fn test_id_parsing() {
        let test_date = Utc.with_ymd_and_hms(2025, 12, 7, 0, 0, 0).unwrap();
        let id = IdGenerator::generate_with_timestamp(IdType::Driver, test_date);

        let parsed = IdGenerator::parse_id(&id).unwrap();
        assert_eq!(parsed.id_type, IdType::Driver);
        assert_eq!(parsed.year, 2025);
        assert_eq!(parsed.month, 12);
        assert_eq!(parsed.day, 7);
        assert_eq!(parsed.suffix.len(), SUFFIX_LEN);
        assert_eq!(parsed.to_datetime(), Some(test_date));
    }

    #[test]
    fn test_validation() {
        assert!(IdGenerator::validate_id("rid-251207-a1b2c3", Some(IdType::Ride)));
        assert!(!IdGenerator::validate_id("rid-251207-a1b2c3", Some(IdType::User)));
        assert!(IdGenerator::validate_id("rid-251207-a1b2c3", None));

        assert!(!IdGenerator::validate_id("invalid-format", None));
        assert!(!IdGenerator::validate_id("rid-251207-A1B2C3", None)); // uppercase suffix
        assert!(!IdGenerator::validate_id("rid-259907-a1b2c3", None)); // bad month
        assert!(!IdGenerator::validate_id("xyz-251207-a1b2c3", None)); // unknown prefix
    }
}
