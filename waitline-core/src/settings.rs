use chrono::Duration;

/// Longest grace period accepted for reconfirmation.
pub const MAX_GRACE_PERIOD_SECS: i64 = 7 * 24 * 60 * 60;

/// Longest waitlist cooldown accepted.
pub const MAX_COOLDOWN_DAYS: i64 = 10 * 365;

/// Tunables for the queue engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Maximum number of entries in one region's queue. Default 20.
    pub max_queue_size: usize,
    /// How long previously queued requesters have to reconfirm after a closed
    /// queue regains a reviewer. Default 5 minutes.
    pub grace_period: Duration,
    /// Waitlist cooldown applied when a session is submitted. Default 30 days.
    pub cooldown_days: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 20,
            grace_period: Duration::minutes(5),
            cooldown_days: 30,
        }
    }
}
