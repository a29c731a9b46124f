//! Notifications emitted by state changes (side effects as data).
//!
//! Stores push these while mutating; the owner drains them after each operation
//! and forwards them to whoever renders queue messages.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ids::{Region, TicketId};
use crate::queue::QueueState;
use crate::ticket::Ticket;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    QueueStateChanged {
        region: Region,
        state: QueueState,
    },
    ConfirmationStarted {
        region: Region,
        deadline: DateTime<Utc>,
    },
    ConfirmationEnded {
        region: Region,
        survivor_count: usize,
    },
    TicketCreated {
        ticket: Ticket,
    },
    TicketClosed {
        ticket_id: TicketId,
    },
}

impl Notification {
    /// Short description for log lines.
    pub fn log_summary(&self) -> String {
        match self {
            Self::QueueStateChanged { region, state } => {
                format!("{} queue is now {}", region, state.as_str())
            }
            Self::ConfirmationStarted { region, deadline } => {
                format!("{} confirmation period until {}", region, deadline)
            }
            Self::ConfirmationEnded {
                region,
                survivor_count,
            } => format!(
                "{} confirmation period ended with {} survivor(s)",
                region, survivor_count
            ),
            Self::TicketCreated { ticket } => format!("ticket {} created", ticket.ticket_id),
            Self::TicketClosed { ticket_id } => format!("ticket {} closed", ticket_id),
        }
    }
}
