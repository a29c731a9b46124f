//! Reopen-after-empty protocol.
//!
//! When a closed queue that still had people waiting regains a reviewer, it does
//! not simply reopen: the people who were waiting get a grace period to say they
//! are still around. At the deadline, those who confirmed keep their relative
//! order and everyone else is dropped.

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use super::{ConfirmationWindow, QueueEntry, QueuePhase, QueueState, QueueStore};
use crate::durability::Durability;
use crate::error::QueueError;
use crate::ids::{Region, UserId};
use crate::notification::Notification;

/// Entries from `snapshot` whose requester confirmed, in original position
/// order, renumbered from 1.
pub fn survivors(snapshot: &[QueueEntry], confirmed: &[UserId]) -> Vec<QueueEntry> {
    let mut kept: Vec<&QueueEntry> = snapshot
        .iter()
        .filter(|entry| confirmed.contains(&entry.requester_id))
        .collect();
    kept.sort_by_key(|entry| entry.position);
    kept.into_iter()
        .enumerate()
        .map(|(index, entry)| QueueEntry::new(entry.requester_id.clone(), index + 1))
        .collect()
}

impl QueueStore {
    /// Move a closed queue with a non-empty snapshot into a confirmation period.
    /// Returns false (and changes nothing) from any other state.
    /// A grace period that overflows the calendar also changes nothing, so the
    /// snapshot survives for a later attempt.
    pub fn start_confirmation(&mut self, region: Region, grace: Duration, now: DateTime<Utc>) -> bool {
        let Some(deadline) = now.checked_add_signed(grace) else {
            error!(
                "Cannot start {} confirmation period: grace period {} overflows",
                region, grace
            );
            return false;
        };
        let queue = self.queue_mut(region);
        let snapshot = match &mut queue.phase {
            QueuePhase::Closed { snapshot } if !snapshot.is_empty() => std::mem::take(snapshot),
            _ => return false,
        };

        let count = snapshot.len();
        queue.phase = QueuePhase::ConfirmationPeriod(ConfirmationWindow {
            snapshot,
            confirmed: Vec::new(),
            deadline,
        });

        self.dirty.mark(Durability::Immediate);
        info!(
            "Started {} confirmation period for {} requester(s), deadline {}",
            region, count, deadline
        );
        self.outbox.push(Notification::QueueStateChanged {
            region,
            state: QueueState::ConfirmationPeriod,
        });
        self.outbox
            .push(Notification::ConfirmationStarted { region, deadline });
        true
    }

    /// Record that a previously queued requester is still around.
    pub fn confirm(&mut self, region: Region, user: &UserId) -> Result<(), QueueError> {
        let elsewhere = self
            .queues
            .iter()
            .find(|(r, queue)| **r != region && queue.contains(user))
            .map(|(r, _)| *r);

        let queue = self.queue_mut(region);
        let QueuePhase::ConfirmationPeriod(window) = &mut queue.phase else {
            return Err(QueueError::NotConfirming { region });
        };
        if !window.was_queued(user) {
            return Err(QueueError::NotPreviouslyQueued { region });
        }
        if window.is_confirmed(user) {
            return Err(QueueError::AlreadyConfirmed);
        }
        if let Some(other) = elsewhere {
            return Err(QueueError::AlreadyQueued { region: other });
        }

        window.confirmed.push(user.clone());
        self.dirty.mark(Durability::Debounced);
        info!("{} confirmed for the {} queue", user, region);
        Ok(())
    }

    pub fn has_expired(&self, region: Region, now: DateTime<Utc>) -> bool {
        match self.queue(region).phase() {
            QueuePhase::ConfirmationPeriod(window) => now >= window.deadline,
            _ => false,
        }
    }

    pub fn expired_regions(&self, now: DateTime<Utc>) -> Vec<Region> {
        self.regions()
            .map(|(region, _)| region)
            .filter(|region| self.has_expired(*region, now))
            .collect()
    }

    /// End a confirmation period: confirmed requesters become the new line.
    ///
    /// Returns the number of survivors, or `None` if the region was not in a
    /// confirmation period. Survivors who have since queued in another region are
    /// dropped so nobody ends up in two lines.
    pub fn reconcile(&mut self, region: Region) -> Option<usize> {
        let (snapshot, confirmed) = {
            let queue = self.queues.get_mut(&region)?;
            if !matches!(queue.phase, QueuePhase::ConfirmationPeriod(_)) {
                return None;
            }
            match std::mem::take(&mut queue.phase) {
                QueuePhase::ConfirmationPeriod(window) => (window.snapshot, window.confirmed),
                _ => return None,
            }
        };

        let mut kept = survivors(&snapshot, &confirmed);
        kept.retain(|entry| self.region_of(&entry.requester_id).is_none());
        for (index, entry) in kept.iter_mut().enumerate() {
            entry.position = index + 1;
        }
        let survivor_count = kept.len();

        let queue = self.queue_mut(region);
        queue.presentation.confirmation_message = None;
        let next_state = if queue.active_reviewers.is_empty() {
            warn!(
                "{} confirmation period ended with no active reviewer; keeping {} survivor(s) closed",
                region, survivor_count
            );
            queue.entries.clear();
            queue.phase = QueuePhase::Closed { snapshot: kept };
            QueueState::Closed
        } else {
            queue.entries = kept;
            queue.phase = QueuePhase::Open;
            QueueState::Open
        };

        self.dirty.mark(Durability::Immediate);
        info!(
            "Reconciled the {} queue: {} of {} requester(s) kept",
            region,
            survivor_count,
            snapshot.len()
        );
        self.outbox.push(Notification::ConfirmationEnded {
            region,
            survivor_count,
        });
        self.outbox.push(Notification::QueueStateChanged {
            region,
            state: next_state,
        });
        Some(survivor_count)
    }
}
