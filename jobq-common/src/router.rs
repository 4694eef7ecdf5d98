//! Priority routing.
//!
//! Lane names are wire contract: external tooling drains the DLQ and reads
//! post-mortem summaries straight from the broker, so renaming a lane is a
//! breaking change.

use uuid::Uuid;

pub const LANE_PRIORITY_1: &str = "queue:priority:1";
pub const LANE_PRIORITY_2: &str = "queue:priority:2";
pub const LANE_PRIORITY_3: &str = "queue:priority:3";
pub const LANE_DLQ: &str = "queue:dlq";

/// Map a job type to the lane it is served from. Total: unrecognized types
/// land in the mid-priority lane.
pub fn route(job_type: &str) -> &'static str {
    match job_type {
        "email" => LANE_PRIORITY_1,
        "pdf" => LANE_PRIORITY_2,
        "ai_summary" => LANE_PRIORITY_3,
        _ => LANE_PRIORITY_2,
    }
}

/// Broker key holding the post-mortem summary for a quarantined job.
pub fn summary_key(id: Uuid) -> String {
    format!("dlq_summary:{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types_route_to_their_lanes() {
        assert_eq!(route("email"), LANE_PRIORITY_1);
        assert_eq!(route("pdf"), LANE_PRIORITY_2);
        assert_eq!(route("ai_summary"), LANE_PRIORITY_3);
    }

    #[test]
    fn test_unknown_types_route_to_the_default_lane() {
        assert_eq!(route("unheard_of"), LANE_PRIORITY_2);
        assert_eq!(route(""), LANE_PRIORITY_2);
    }

    #[test]
    fn test_routing_is_stable() {
        // Retries and reaping re-route by type; same type, same lane.
        assert_eq!(route("email"), route("email"));
    }

    #[test]
    fn test_summary_key_format() {
        let id = Uuid::now_v7();
        assert_eq!(summary_key(id), format!("dlq_summary:{}", id));
    }
}
