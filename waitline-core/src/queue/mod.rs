//! Per-region queue store.
//!
//! `QueueStore` owns one [`RegionQueue`] per region and is the only place that
//! mutates them, so it can keep positions dense (entry `i` is always at
//! position `i + 1`) and keep a requester in at most one region's line.
//!
//! The reopen-after-empty protocol lives in [`confirmation`].

pub mod confirmation;
mod state;

pub use state::*;
use state::EMPTY_QUEUE;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::durability::{DirtyFlag, Durability};
use crate::error::QueueError;
use crate::ids::{Region, UserId};
use crate::notification::Notification;
use crate::settings::QueueSettings;

pub struct QueueStore {
    queues: BTreeMap<Region, RegionQueue>,
    max_queue_size: usize,
    grace_period: chrono::Duration,
    dirty: DirtyFlag,
    outbox: Vec<Notification>,
}

impl QueueStore {
    pub fn new(settings: &QueueSettings) -> Self {
        Self {
            queues: BTreeMap::new(),
            max_queue_size: settings.max_queue_size,
            grace_period: settings.grace_period,
            dirty: DirtyFlag::default(),
            outbox: Vec::new(),
        }
    }

    /// Read a region's queue. Regions never referenced read as empty and closed.
    pub fn queue(&self, region: Region) -> &RegionQueue {
        self.queues.get(&region).unwrap_or(&EMPTY_QUEUE)
    }

    /// Regions that have been referenced at least once.
    pub fn regions(&self) -> impl Iterator<Item = (Region, &RegionQueue)> {
        self.queues.iter().map(|(region, queue)| (*region, queue))
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    pub(crate) fn queue_mut(&mut self, region: Region) -> &mut RegionQueue {
        self.queues.entry(region).or_default()
    }

    /// Region whose line currently holds `user`, if any.
    pub fn region_of(&self, user: &UserId) -> Option<Region> {
        self.queues
            .iter()
            .find(|(_, queue)| queue.contains(user))
            .map(|(region, _)| *region)
    }

    /// Append a requester to an open queue. Returns the new position.
    pub fn join(&mut self, region: Region, user: &UserId) -> Result<usize, QueueError> {
        let max = self.max_queue_size;
        let elsewhere = self
            .queues
            .iter()
            .find(|(r, queue)| **r != region && queue.contains(user))
            .map(|(r, _)| *r);

        let queue = self.queue_mut(region);
        if queue.state() != QueueState::Open {
            return Err(QueueError::QueueNotOpen { region });
        }
        if queue.contains(user) {
            return Err(QueueError::AlreadyQueued { region });
        }
        if let Some(other) = elsewhere {
            return Err(QueueError::AlreadyQueued { region: other });
        }
        if queue.is_reviewer(user) {
            return Err(QueueError::ReviewerConflict { region });
        }
        if queue.entries.len() >= max {
            return Err(QueueError::QueueFull { region, max });
        }

        let position = queue.entries.len() + 1;
        queue.entries.push(QueueEntry::new(user.clone(), position));
        self.dirty.mark(Durability::Debounced);
        debug!("{} joined the {} queue at position {}", user, region, position);
        Ok(position)
    }

    /// Remove a requester from any position. Returns whether they were queued.
    pub fn leave(&mut self, region: Region, user: &UserId) -> bool {
        let removed = match self.queues.get_mut(&region) {
            Some(queue) => queue.remove_entry(user),
            None => false,
        };
        if removed {
            self.dirty.mark(Durability::Debounced);
            debug!("{} left the {} queue", user, region);
        }
        removed
    }

    /// Remove a requester from every region's line.
    pub fn leave_everywhere(&mut self, user: &UserId) -> Vec<Region> {
        let mut left = Vec::new();
        for (region, queue) in self.queues.iter_mut() {
            if queue.remove_entry(user) {
                left.push(*region);
            }
        }
        if !left.is_empty() {
            self.dirty.mark(Durability::Debounced);
        }
        left
    }

    pub fn peek_head(&self, region: Region) -> Option<&QueueEntry> {
        self.queue(region).entries.first()
    }

    /// Remove the entry at position 1 and move everyone up.
    ///
    /// A pop is a promotion, which must never be replayed after a restart, so it
    /// is flushed immediately.
    pub fn pop_head(&mut self, region: Region) -> Option<QueueEntry> {
        let queue = self.queues.get_mut(&region)?;
        if queue.entries.is_empty() {
            return None;
        }
        let head = queue.entries.remove(0);
        queue.renumber();
        self.dirty.mark(Durability::Immediate);
        Some(head)
    }

    /// Close a region: the current line becomes the snapshot and the line empties.
    ///
    /// Closing during a confirmation period cancels the window and keeps its
    /// snapshot, so the next reopen gives the same members another chance.
    pub fn close(&mut self, region: Region) {
        let queue = self.queue_mut(region);
        let previous = queue.state();

        let snapshot = match std::mem::take(&mut queue.phase) {
            QueuePhase::ConfirmationPeriod(window) => {
                queue.presentation.confirmation_message = None;
                window.snapshot
            }
            QueuePhase::Closed { snapshot } if queue.entries.is_empty() => snapshot,
            _ => std::mem::take(&mut queue.entries),
        };
        queue.entries.clear();
        let snapshot_len = snapshot.len();
        queue.phase = QueuePhase::Closed { snapshot };

        self.dirty.mark(Durability::Immediate);
        info!(
            "Closed the {} queue ({} requester(s) held for reconfirmation)",
            region, snapshot_len
        );
        if previous != QueueState::Closed {
            self.outbox.push(Notification::QueueStateChanged {
                region,
                state: QueueState::Closed,
            });
        }
    }

    /// Mark a reviewer active in `region`.
    ///
    /// The reviewer is removed from every region's line (and closed snapshot) so
    /// nobody is waiting for a session while running them. A closed queue opens,
    /// or enters a confirmation period if people were waiting when it closed.
    pub fn activate_reviewer(&mut self, region: Region, reviewer: &UserId, now: DateTime<Utc>) {
        for queue in self.queues.values_mut() {
            queue.remove_entry(reviewer);
            queue.forget_from_snapshot(reviewer);
        }

        let grace_period = self.grace_period;
        let queue = self.queue_mut(region);
        if !queue.is_reviewer(reviewer) {
            queue.active_reviewers.push(reviewer.clone());
            info!("{} is now reviewing in {}", reviewer, region);
        }

        let reopen_with_snapshot = match &queue.phase {
            QueuePhase::Closed { snapshot } => Some(!snapshot.is_empty()),
            _ => None,
        };
        self.dirty.mark(Durability::Debounced);

        match reopen_with_snapshot {
            Some(true) => {
                self.start_confirmation(region, grace_period, now);
            }
            Some(false) => {
                self.queue_mut(region).phase = QueuePhase::Open;
                info!("Opened the {} queue", region);
                self.outbox.push(Notification::QueueStateChanged {
                    region,
                    state: QueueState::Open,
                });
            }
            None => {}
        }
    }

    /// Mark a reviewer inactive. Closes the region when the last reviewer leaves.
    /// Returns whether the reviewer was active.
    pub fn deactivate_reviewer(&mut self, region: Region, reviewer: &UserId) -> bool {
        let Some(queue) = self.queues.get_mut(&region) else {
            return false;
        };
        let before = queue.active_reviewers.len();
        queue.active_reviewers.retain(|r| r != reviewer);
        if queue.active_reviewers.len() == before {
            return false;
        }

        info!("{} stopped reviewing in {}", reviewer, region);
        let now_empty = queue.active_reviewers.is_empty();
        self.dirty.mark(Durability::Debounced);
        if now_empty {
            self.close(region);
        }
        true
    }

    pub fn set_presentation(&mut self, region: Region, kind: PresentationKind, value: Option<String>) {
        self.queue_mut(region).presentation.set(kind, value);
        self.dirty.mark(Durability::Debounced);
    }

    /// Administrative reset: every region back to an empty, closed queue with no
    /// reviewers. Supersedes any running confirmation period.
    pub fn clear_all(&mut self) {
        for (region, queue) in self.queues.iter() {
            if queue.state() != QueueState::Closed {
                self.outbox.push(Notification::QueueStateChanged {
                    region: *region,
                    state: QueueState::Closed,
                });
            }
        }
        self.queues.clear();
        self.dirty.mark(Durability::Immediate);
        info!("Cleared all queues");
    }

    pub fn dirty(&self) -> Option<Durability> {
        self.dirty.pending()
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    /// Rebuild a store from persisted queues. Used by the snapshot loader.
    pub(crate) fn from_queues(settings: &QueueSettings, queues: BTreeMap<Region, RegionQueue>) -> Self {
        Self {
            queues,
            ..Self::new(settings)
        }
    }
}
