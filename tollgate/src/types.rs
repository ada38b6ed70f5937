//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases for better type safety:
//!
//! - [`JobId`]: billable job identifier
//! - [`TeamId`]: owning team identifier (team data itself lives outside this engine)
//! - [`UserId`]: optional acting-user identifier on a job
//! - [`LlmCallId`]: one recorded upstream call
//! - [`ModelGroupId`]: named routing group
//! - [`TransactionId`]: credit ledger audit entry

use uuid::Uuid;

pub type JobId = Uuid;
pub type TeamId = Uuid;
pub type UserId = Uuid;
pub type LlmCallId = Uuid;
pub type ModelGroupId = Uuid;
pub type TransactionId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::abbrev_uuid;

    #[test]
    fn abbreviates_to_first_segment() {
        let id: uuid::Uuid = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
