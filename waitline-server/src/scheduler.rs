use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::app::AppState;
use crate::config::Config;

/// How often each scheduler step runs.
#[derive(Debug, Clone)]
pub struct SchedulerTimings {
    pub confirmation_check: Duration,
    pub promotion: Duration,
    pub flush_check: Duration,
    pub backup: Duration,
}

impl SchedulerTimings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            confirmation_check: Duration::from_secs(1),
            promotion: config.promotion_interval,
            // Check often enough that a debounced write lands close to its window.
            flush_check: (config.flush_debounce / 4).max(Duration::from_millis(100)),
            backup: config.backup_interval,
        }
    }
}

/// Drive every periodic step until shutdown starts. Steps run one at a time on
/// this task, so they never overlap each other.
pub async fn scheduler_loop(state: Arc<AppState>, timings: SchedulerTimings) {
    let mut confirmation = interval(timings.confirmation_check);
    let mut promotion = interval(timings.promotion);
    let mut flush = interval(timings.flush_check);
    let mut backup = interval(timings.backup);
    for timer in [&mut confirmation, &mut promotion, &mut flush, &mut backup] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }
    // The first tick of an interval fires immediately; a backup right at startup
    // would only rewrite what was just loaded.
    backup.tick().await;

    info!("Scheduler started");
    loop {
        if state.is_shutting_down() {
            break;
        }
        tokio::select! {
            _ = confirmation.tick() => {
                for (region, survivors) in state.expire_confirmations().await {
                    info!("{} confirmation period expired, {} requester(s) kept", region, survivors);
                }
            }
            _ = promotion.tick() => {
                let created = state.run_promotions().await;
                if created > 0 {
                    debug!("Promotion pass created {} ticket(s)", created);
                }
            }
            _ = flush.tick() => {
                state.flush_pending().await;
            }
            _ = backup.tick() => {
                let written = state.backup_all().await;
                debug!("Backup wrote {} store(s)", written);
            }
        }
    }
    info!("Scheduler stopped");
}
