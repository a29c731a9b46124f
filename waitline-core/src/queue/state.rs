//! State types for a single region's queue.
//!
//! The lifecycle is an explicit enum: the confirmation bookkeeping only exists
//! while a confirmation period is running, and the closed snapshot only exists
//! while the queue is closed, so neither can go stale behind the other's back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// A requester's place in line. Positions are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub requester_id: UserId,
    pub position: usize,
}

impl QueueEntry {
    pub fn new(requester_id: UserId, position: usize) -> Self {
        Self {
            requester_id,
            position,
        }
    }
}

/// Flat state label, as persisted and reported to collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    #[default]
    Closed,
    Open,
    ConfirmationPeriod,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::ConfirmationPeriod => "confirmation_period",
        }
    }
}

/// Bookkeeping for a running confirmation period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationWindow {
    /// The queue as it was when it closed, in position order.
    pub snapshot: Vec<QueueEntry>,
    /// Requesters who reconfirmed, in confirmation order.
    pub confirmed: Vec<UserId>,
    pub deadline: DateTime<Utc>,
}

impl ConfirmationWindow {
    pub fn was_queued(&self, user: &UserId) -> bool {
        self.snapshot.iter().any(|e| &e.requester_id == user)
    }

    pub fn is_confirmed(&self, user: &UserId) -> bool {
        self.confirmed.contains(user)
    }
}

/// Lifecycle phase of a region's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePhase {
    /// No reviewer available. `snapshot` holds whoever was queued when the
    /// last reviewer left, waiting for the next reopen.
    Closed { snapshot: Vec<QueueEntry> },

    /// Accepting joins.
    Open,

    /// Reopened after being closed with a non-empty snapshot; previous members
    /// have until the deadline to reconfirm.
    ConfirmationPeriod(ConfirmationWindow),
}

impl Default for QueuePhase {
    fn default() -> Self {
        Self::Closed {
            snapshot: Vec::new(),
        }
    }
}

impl QueuePhase {
    pub fn state(&self) -> QueueState {
        match self {
            Self::Closed { .. } => QueueState::Closed,
            Self::Open => QueueState::Open,
            Self::ConfirmationPeriod(_) => QueueState::ConfirmationPeriod,
        }
    }

    /// The closed-queue snapshot, whether waiting (Closed) or being confirmed.
    pub fn snapshot(&self) -> &[QueueEntry] {
        match self {
            Self::Closed { snapshot } => snapshot,
            Self::Open => &[],
            Self::ConfirmationPeriod(window) => &window.snapshot,
        }
    }

    pub fn window(&self) -> Option<&ConfirmationWindow> {
        match self {
            Self::ConfirmationPeriod(window) => Some(window),
            _ => None,
        }
    }
}

/// Which opaque presentation reference to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationKind {
    QueueMessage,
    ConfirmationMessage,
    PingMessage,
}

/// Opaque references owned by the rendering layer (message ids and the like).
/// Stored and persisted, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationRefs {
    #[serde(default)]
    pub queue_message: Option<String>,
    #[serde(default)]
    pub confirmation_message: Option<String>,
    #[serde(default)]
    pub ping_message: Option<String>,
}

impl PresentationRefs {
    pub fn set(&mut self, kind: PresentationKind, value: Option<String>) {
        match kind {
            PresentationKind::QueueMessage => self.queue_message = value,
            PresentationKind::ConfirmationMessage => self.confirmation_message = value,
            PresentationKind::PingMessage => self.ping_message = value,
        }
    }
}

/// One region's queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionQueue {
    pub(crate) phase: QueuePhase,
    pub(crate) entries: Vec<QueueEntry>,
    pub(crate) active_reviewers: Vec<UserId>,
    pub(crate) presentation: PresentationRefs,
}

/// Stand-in for regions that have never been referenced.
pub(crate) static EMPTY_QUEUE: RegionQueue = RegionQueue {
    phase: QueuePhase::Closed {
        snapshot: Vec::new(),
    },
    entries: Vec::new(),
    active_reviewers: Vec::new(),
    presentation: PresentationRefs {
        queue_message: None,
        confirmation_message: None,
        ping_message: None,
    },
};

impl RegionQueue {
    pub fn phase(&self) -> &QueuePhase {
        &self.phase
    }

    pub fn state(&self) -> QueueState {
        self.phase.state()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// Active reviewers in activation order.
    pub fn active_reviewers(&self) -> &[UserId] {
        &self.active_reviewers
    }

    pub fn presentation(&self) -> &PresentationRefs {
        &self.presentation
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.entries.iter().any(|e| &e.requester_id == user)
    }

    pub fn position_of(&self, user: &UserId) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| &e.requester_id == user)
            .map(|e| e.position)
    }

    pub fn is_reviewer(&self, user: &UserId) -> bool {
        self.active_reviewers.contains(user)
    }

    /// Remove a requester and close the gap. Returns whether anything changed.
    pub(crate) fn remove_entry(&mut self, user: &UserId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.requester_id != user);
        if self.entries.len() == before {
            return false;
        }
        self.renumber();
        true
    }

    /// Drop a user from the closed/confirmation snapshot, if present.
    pub(crate) fn forget_from_snapshot(&mut self, user: &UserId) -> bool {
        match &mut self.phase {
            QueuePhase::Closed { snapshot } => {
                let before = snapshot.len();
                snapshot.retain(|e| &e.requester_id != user);
                snapshot.len() != before
            }
            QueuePhase::ConfirmationPeriod(window) => {
                let before = window.snapshot.len();
                window.snapshot.retain(|e| &e.requester_id != user);
                window.confirmed.retain(|c| c != user);
                window.snapshot.len() != before
            }
            QueuePhase::Open => false,
        }
    }

    pub(crate) fn renumber(&mut self) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.position = index + 1;
        }
    }
}
