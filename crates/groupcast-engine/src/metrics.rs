//! Metric name constants.
//!
//! Names are centralized to avoid typos across call sites; the recorder
//! itself is installed by the embedding process.

/// Active attached sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "gc_sessions_active";
/// Active non-empty groups (gauge).
pub const GROUPS_ACTIVE: &str = "gc_groups_active";
/// Attach attempts rejected before touching engine state (counter, labels: reason).
pub const ATTACH_FAILURES_TOTAL: &str = "gc_attach_failures_total";
/// Packets rejected because a runner queue was full (counter).
pub const SEND_DROPS_TOTAL: &str = "gc_send_drops_total";
/// Group broadcasts issued on this node (counter).
pub const BROADCASTS_TOTAL: &str = "gc_broadcasts_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        for name in [
            SESSIONS_ACTIVE,
            GROUPS_ACTIVE,
            ATTACH_FAILURES_TOTAL,
            SEND_DROPS_TOTAL,
            BROADCASTS_TOTAL,
        ] {
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
