use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ids::{Region, UserId};
use crate::queue::{PresentationRefs, QueueEntry, QueueState, QueueStore};

/// Read-only picture of one region, for whoever renders the queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub region: Region,
    pub state: QueueState,
    pub ordered_entries: Vec<QueueEntry>,
    pub active_reviewers: Vec<UserId>,
    pub max_queue_size: usize,
    /// Whole seconds until the confirmation deadline, rounded up; only during a
    /// confirmation period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationView>,
    pub presentation: PresentationRefs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationView {
    pub awaiting: Vec<QueueEntry>,
    pub confirmed: Vec<UserId>,
    pub deadline: DateTime<Utc>,
}

impl QueueView {
    pub fn build(store: &QueueStore, region: Region, now: DateTime<Utc>) -> Self {
        let queue = store.queue(region);
        let window = queue.phase().window();

        let seconds_remaining = window.map(|w| {
            let millis = (w.deadline - now).num_milliseconds().max(0);
            (millis + 999) / 1000
        });
        let confirmation = window.map(|w| ConfirmationView {
            awaiting: w.snapshot.clone(),
            confirmed: w.confirmed.clone(),
            deadline: w.deadline,
        });

        Self {
            region,
            state: queue.state(),
            ordered_entries: queue.entries().to_vec(),
            active_reviewers: queue.active_reviewers().to_vec(),
            max_queue_size: store.max_queue_size(),
            seconds_remaining,
            confirmation,
            presentation: queue.presentation().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::QueueSettings;
    use chrono::Duration;

    #[test]
    fn test_view_of_confirmation_period() {
        let now = Utc::now();
        let mut store = QueueStore::new(&QueueSettings::default());
        store.activate_reviewer(Region::Eu, &UserId::from("r1"), now);
        store.join(Region::Eu, &UserId::from("u1")).unwrap();
        store.deactivate_reviewer(Region::Eu, &UserId::from("r1"));
        store.activate_reviewer(Region::Eu, &UserId::from("r2"), now);

        let view = QueueView::build(&store, Region::Eu, now + Duration::milliseconds(60_500));
        assert_eq!(view.state, QueueState::ConfirmationPeriod);
        assert_eq!(view.seconds_remaining, Some(240));
        assert_eq!(view.confirmation.unwrap().awaiting.len(), 1);

        let late = QueueView::build(&store, Region::Eu, now + Duration::minutes(10));
        assert_eq!(late.seconds_remaining, Some(0));
    }

    #[test]
    fn test_view_of_untouched_region() {
        let store = QueueStore::new(&QueueSettings::default());
        let view = QueueView::build(&store, Region::As, Utc::now());

        assert_eq!(view.state, QueueState::Closed);
        assert!(view.ordered_entries.is_empty());
        assert_eq!(view.seconds_remaining, None);
        assert_eq!(view.max_queue_size, 20);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "closed");
        assert!(json.get("secondsRemaining").is_none());
    }
}
