//! Metric name constants for the delivery engine.

/// Messages enqueued (counter).
pub const MESSAGES_ENQUEUED_TOTAL: &str = "delivery_messages_enqueued_total";
/// Messages delivered as primary flushes (counter, labels: kind).
pub const MESSAGES_DELIVERED_TOTAL: &str = "delivery_messages_delivered_total";
/// Messages retransmitted during attach replay (counter, labels: kind).
pub const MESSAGES_REPLAYED_TOTAL: &str = "delivery_messages_replayed_total";
/// Strong-queue entries dropped by expiry (counter).
pub const MESSAGES_EXPIRED_TOTAL: &str = "delivery_messages_expired_total";
/// Session lock acquisitions that hit the bound (counter, labels: lock).
pub const LOCK_TIMEOUTS_TOTAL: &str = "delivery_lock_timeouts_total";
/// Idle pings written to frame transports (counter).
pub const PINGS_SENT_TOTAL: &str = "delivery_pings_sent_total";
/// Transport writes that failed or hit a closed channel (counter).
pub const WRITE_FAILURES_TOTAL: &str = "delivery_write_failures_total";
/// Live sessions in the registry (gauge).
pub const SESSIONS_ACTIVE: &str = "delivery_sessions_active";
/// Sessions removed by the reaper (counter).
pub const SESSIONS_REAPED_TOTAL: &str = "delivery_sessions_reaped_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            MESSAGES_ENQUEUED_TOTAL,
            MESSAGES_DELIVERED_TOTAL,
            MESSAGES_REPLAYED_TOTAL,
            MESSAGES_EXPIRED_TOTAL,
            LOCK_TIMEOUTS_TOTAL,
            PINGS_SENT_TOTAL,
            WRITE_FAILURES_TOTAL,
            SESSIONS_ACTIVE,
            SESSIONS_REAPED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
