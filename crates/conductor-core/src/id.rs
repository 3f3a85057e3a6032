//! Typed ID wrapper for jobs.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use uuid::Uuid;

/// A strongly-typed wrapper for job IDs.
///
/// Assigned once at creation and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a new random job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a job ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn into_inner(self) -> Uuid {
        self.0
    }

    /// Maps the ID onto one of `partitions` buckets.
    ///
    /// Stable across processes and restarts, so every message for the same
    /// job lands in the same partition.
    #[must_use]
    pub fn partition(&self, partitions: u32) -> u32 {
        let partitions = u128::from(partitions.max(1));
        // Lossless: the remainder is strictly below a u32 value.
        (self.0.as_u128() % partitions) as u32
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<JobId> for Uuid {
    fn from(id: JobId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_parse_round_trip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(JobId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_partition_is_stable_and_in_range() {
        let id = JobId::new();
        let first = id.partition(6);
        assert!(first < 6);
        assert_eq!(first, id.partition(6));
        assert_eq!(id.partition(1), 0);
        assert_eq!(id.partition(0), 0);
    }

    #[test]
    fn test_partition_uses_low_bits() {
        let id = JobId::from_uuid(Uuid::from_u128(17));
        assert_eq!(id.partition(5), 2);
    }
}
