//! Errors returned by queue, waitlist and ticket operations.
//!
//! Every rejected operation leaves the stores untouched. Callers that need to
//! react to the category (e.g. map it to a status code) use [`QueueError::kind`].

use thiserror::Error;

use crate::ids::{Region, TicketId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("unknown region '{0}'")]
    UnknownRegion(String),

    #[error("user id must not be empty")]
    InvalidUserId,

    #[error("the {region} queue is not open")]
    QueueNotOpen { region: Region },

    #[error("already queued in {region}")]
    AlreadyQueued { region: Region },

    #[error("the {region} queue is full ({max} entries)")]
    QueueFull { region: Region, max: usize },

    #[error("active reviewers cannot join the {region} queue")]
    ReviewerConflict { region: Region },

    #[error("not on the waitlist for {region}")]
    NotAMember { region: Region },

    #[error("a session is already in progress")]
    SessionInProgress,

    #[error("no confirmation period is running in {region}")]
    NotConfirming { region: Region },

    #[error("was not in the {region} queue when it closed")]
    NotPreviouslyQueued { region: Region },

    #[error("already confirmed")]
    AlreadyConfirmed,

    #[error("already on the waitlist")]
    AlreadyMember,

    #[error("on cooldown for {days_remaining} more day(s)")]
    CooldownActive { days_remaining: i64 },

    #[error("a cooldown of {days} day(s) cannot be represented")]
    CooldownOutOfRange { days: i64 },

    #[error("ticket {0} not found")]
    TicketNotFound(TicketId),

    #[error("{actor} may not {action} ticket {ticket_id}")]
    NotPermitted {
        actor: UserId,
        action: &'static str,
        ticket_id: TicketId,
    },
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; nothing was looked at.
    Validation,
    /// The operation conflicts with current state and was a no-op.
    Conflict,
    /// A waitlist cooldown is still running.
    CooldownActive,
    /// The referenced entity does not exist.
    NotFound,
    /// The actor is not allowed to perform the operation.
    Unauthorized,
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownRegion(_) | Self::InvalidUserId | Self::CooldownOutOfRange { .. } => {
                ErrorKind::Validation
            }
            Self::QueueNotOpen { .. }
            | Self::AlreadyQueued { .. }
            | Self::QueueFull { .. }
            | Self::ReviewerConflict { .. }
            | Self::NotAMember { .. }
            | Self::SessionInProgress
            | Self::NotConfirming { .. }
            | Self::NotPreviouslyQueued { .. }
            | Self::AlreadyConfirmed
            | Self::AlreadyMember => ErrorKind::Conflict,
            Self::CooldownActive { .. } => ErrorKind::CooldownActive,
            Self::TicketNotFound(_) => ErrorKind::NotFound,
            Self::NotPermitted { .. } => ErrorKind::Unauthorized,
        }
    }
}
