//! Live pairing sessions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::durability::{DirtyFlag, Durability};
use crate::error::QueueError;
use crate::ids::{ChannelRef, Region, TicketId, UserId};
use crate::notification::Notification;

/// A requester paired with a reviewer. At most one per requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub requester_id: UserId,
    pub reviewer_id: UserId,
    pub region: Region,
    pub preferred_target: String,
    pub channel_ref: ChannelRef,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Everything needed to open a ticket once the session channel exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub requester_id: UserId,
    pub reviewer_id: UserId,
    pub region: Region,
    pub preferred_target: String,
    pub channel_ref: ChannelRef,
}

#[derive(Debug, Default)]
pub struct TicketRegistry {
    tickets: BTreeMap<TicketId, Ticket>,
    /// Millisecond suffix of the most recently issued id.
    last_issued: i64,
    dirty: DirtyFlag,
    outbox: Vec<Notification>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tickets(tickets: BTreeMap<TicketId, Ticket>) -> Self {
        let last_issued = tickets
            .values()
            .map(|t| t.created_at.timestamp_millis())
            .max()
            .unwrap_or(0);
        Self {
            tickets,
            last_issued,
            ..Self::default()
        }
    }

    /// Open a ticket. Ids are `ticket-<requester>-<millis>`, with the suffix bumped
    /// past the previous one if the clock has not moved.
    pub fn create(&mut self, new: NewTicket, now: DateTime<Utc>) -> Result<TicketId, QueueError> {
        if self.by_requester(&new.requester_id).is_some() {
            return Err(QueueError::SessionInProgress);
        }

        let millis = now.timestamp_millis().max(self.last_issued + 1);
        self.last_issued = millis;
        let ticket_id = TicketId(format!("ticket-{}-{}", new.requester_id, millis));

        let ticket = Ticket {
            ticket_id: ticket_id.clone(),
            requester_id: new.requester_id,
            reviewer_id: new.reviewer_id,
            region: new.region,
            preferred_target: new.preferred_target,
            channel_ref: new.channel_ref,
            created_at: now,
        };
        info!(
            "Created ticket {} for {} with reviewer {} in {}",
            ticket_id, ticket.requester_id, ticket.reviewer_id, ticket.region
        );
        self.outbox.push(Notification::TicketCreated {
            ticket: ticket.clone(),
        });
        self.tickets.insert(ticket_id.clone(), ticket);
        self.dirty.mark(Durability::Immediate);
        Ok(ticket_id)
    }

    pub fn close(&mut self, ticket_id: &TicketId) -> Option<Ticket> {
        let ticket = self.tickets.remove(ticket_id)?;
        info!("Closed ticket {}", ticket_id);
        self.outbox.push(Notification::TicketClosed {
            ticket_id: ticket_id.clone(),
        });
        self.dirty.mark(Durability::Immediate);
        Some(ticket)
    }

    pub fn get(&self, ticket_id: &TicketId) -> Option<&Ticket> {
        self.tickets.get(ticket_id)
    }

    pub fn by_requester(&self, requester: &UserId) -> Option<&Ticket> {
        self.tickets.values().find(|t| &t.requester_id == requester)
    }

    pub fn by_channel(&self, channel: &ChannelRef) -> Option<&Ticket> {
        self.tickets.values().find(|t| &t.channel_ref == channel)
    }

    pub fn all(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn clear_all(&mut self) {
        for ticket_id in self.tickets.keys() {
            self.outbox.push(Notification::TicketClosed {
                ticket_id: ticket_id.clone(),
            });
        }
        self.tickets.clear();
        self.dirty.mark(Durability::Immediate);
        info!("Cleared all tickets");
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

    pub(crate) fn tickets(&self) -> &BTreeMap<TicketId, Ticket> {
        &self.tickets
    }
}
