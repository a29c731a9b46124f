//! The engine: every store plus the rules that span more than one of them.
//!
//! Each store enforces its own invariants. The engine adds the cross-store
//! gates (a requester needs a waitlist membership for the region and no live
//! session before joining) and drives promotion, which reads the queue, the
//! waitlist and the tester pool and ends in the ticket registry.
//!
//! The engine is synchronous and knows nothing about disk or time sources; the
//! caller passes `now` in and persists whatever `dirty_stores` reports.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::durability::{Durability, StoreKind};
use crate::error::QueueError;
use crate::ids::{ChannelRef, Region, ResourceRef, TicketId, UserId};
use crate::notification::Notification;
use crate::queue::{PresentationKind, QueueState, QueueStore};
use crate::settings::QueueSettings;
use crate::snapshot::{QueueSnapshot, TicketSnapshot, WaitlistSnapshot};
use crate::tester_pool::TesterPool;
use crate::ticket::{NewTicket, Ticket, TicketRegistry};
use crate::view::QueueView;
use crate::waitlist::{cooldown_expiry, WaitlistMembership, WaitlistRegistry};

/// A popped queue head on its way to becoming a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionHandoff {
    pub requester_id: UserId,
    pub reviewer_id: UserId,
    pub region: Region,
    pub preferred_target: String,
}

/// What an administrative clear wipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Queues,
    Waitlist,
    Tickets,
}

/// Result of submitting a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTicket {
    pub ticket: Ticket,
    /// Resources the requester had unlocked, now to be revoked.
    pub revoked: Vec<ResourceRef>,
    pub cooldown_until: DateTime<Utc>,
}

pub struct Engine {
    settings: QueueSettings,
    queues: QueueStore,
    tickets: TicketRegistry,
    waitlist: WaitlistRegistry,
    pool: TesterPool,
    /// Requesters popped from a queue whose ticket is still being provisioned.
    in_flight: HashSet<UserId>,
}

impl Engine {
    pub fn new(settings: QueueSettings) -> Self {
        Self::from_snapshots(
            settings,
            QueueSnapshot::default(),
            TicketSnapshot::default(),
            WaitlistSnapshot::default(),
        )
    }

    pub fn from_snapshots(
        settings: QueueSettings,
        queues: QueueSnapshot,
        tickets: TicketSnapshot,
        waitlist: WaitlistSnapshot,
    ) -> Self {
        let mut queues = QueueStore::from_snapshot(&settings, queues);
        let tickets = TicketRegistry::from_snapshot(tickets);

        // A requester with a live session is never also waiting in line.
        for ticket in tickets.all() {
            let left = queues.leave_everywhere(&ticket.requester_id);
            if !left.is_empty() {
                warn!(
                    "{} has ticket {} but was queued in {:?}; removed from the queue",
                    ticket.requester_id, ticket.ticket_id, left
                );
            }
        }
        queues.mark_clean();

        Self {
            settings,
            queues,
            tickets,
            waitlist: WaitlistRegistry::from_snapshot(waitlist),
            pool: TesterPool::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn queues(&self) -> &QueueStore {
        &self.queues
    }

    pub fn tickets(&self) -> &TicketRegistry {
        &self.tickets
    }

    pub fn waitlist(&self) -> &WaitlistRegistry {
        &self.waitlist
    }

    /// Start reviewing in `region`. A reviewer stops being a requester: their
    /// waitlist membership goes (keeping unlocked resources) and they leave every
    /// queue.
    pub fn activate_reviewer(&mut self, region: Region, reviewer: &UserId, now: DateTime<Utc>) {
        if self.waitlist.remove_membership(reviewer, true).is_some() {
            debug!("Removed reviewer {} from the waitlist", reviewer);
        }
        self.queues.activate_reviewer(region, reviewer, now);
    }

    pub fn deactivate_reviewer(&mut self, region: Region, reviewer: &UserId) -> bool {
        self.queues.deactivate_reviewer(region, reviewer)
    }

    /// Join a region's queue. Returns the position.
    pub fn request_join(&mut self, region: Region, requester: &UserId) -> Result<usize, QueueError> {
        if self.tickets.by_requester(requester).is_some() || self.in_flight.contains(requester) {
            return Err(QueueError::SessionInProgress);
        }
        if !self.waitlist.has_unlocked_region(requester, region) {
            return Err(QueueError::NotAMember { region });
        }
        self.queues.join(region, requester)
    }

    pub fn leave_queue(&mut self, region: Region, requester: &UserId) -> bool {
        self.queues.leave(region, requester)
    }

    pub fn confirm_still_active(&mut self, region: Region, requester: &UserId) -> Result<(), QueueError> {
        self.queues.confirm(region, requester)
    }

    pub fn join_waitlist(
        &mut self,
        requester: &UserId,
        region: Region,
        preferred_target: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.waitlist
            .add_membership(requester, region, preferred_target, now)
    }

    /// Leave the waitlist, and with it every queue. Returns the removed record so
    /// the caller can revoke its unlocked resources.
    pub fn leave_waitlist(&mut self, requester: &UserId) -> Option<WaitlistMembership> {
        let removed = self.waitlist.remove_membership(requester, false)?;
        self.queues.leave_everywhere(requester);
        Some(removed)
    }

    pub fn unlock_resource(&mut self, requester: &UserId, resource: ResourceRef) -> bool {
        self.waitlist.unlock(requester, resource)
    }

    pub fn set_presentation(&mut self, region: Region, kind: PresentationKind, value: Option<String>) {
        self.queues.set_presentation(region, kind, value);
    }

    pub fn clear(&mut self, scope: ClearScope) {
        info!("Administrative clear: {:?}", scope);
        if matches!(scope, ClearScope::All | ClearScope::Queues) {
            self.queues.clear_all();
            self.pool = TesterPool::new();
        }
        if matches!(scope, ClearScope::All | ClearScope::Waitlist) {
            self.waitlist.clear_all();
        }
        if matches!(scope, ClearScope::All | ClearScope::Tickets) {
            self.tickets.clear_all();
        }
    }

    pub fn view(&self, region: Region, now: DateTime<Utc>) -> QueueView {
        QueueView::build(&self.queues, region, now)
    }

    /// Reconcile every region whose confirmation deadline has passed.
    /// Returns (region, survivor count) per reconciled region.
    pub fn expire_confirmations(&mut self, now: DateTime<Utc>) -> Vec<(Region, usize)> {
        let mut reconciled = Vec::new();
        for region in self.queues.expired_regions(now) {
            if let Some(survivors) = self.queues.reconcile(region) {
                reconciled.push((region, survivors));
            }
        }
        reconciled
    }

    /// One pass of the promotion loop: pop at most one head per open region and
    /// hand it off for provisioning.
    ///
    /// The pop is final. Whatever happens to the handoff, the requester does not
    /// go back in line.
    pub fn begin_promotions(&mut self) -> Vec<PromotionHandoff> {
        let candidates: Vec<(Region, UserId)> = self
            .queues
            .regions()
            .filter(|(_, queue)| queue.state() == QueueState::Open)
            .filter_map(|(region, queue)| {
                queue
                    .entries()
                    .first()
                    .map(|head| (region, head.requester_id.clone()))
            })
            .collect();

        let mut handoffs = Vec::new();
        for (region, requester) in candidates {
            if self.tickets.by_requester(&requester).is_some() || self.in_flight.contains(&requester) {
                debug!(
                    "Head of {} queue ({}) already has a session; skipping",
                    region, requester
                );
                continue;
            }
            let Some(member) = self.waitlist.get(&requester) else {
                warn!(
                    "Head of {} queue ({}) has no waitlist membership; skipping",
                    region, requester
                );
                continue;
            };
            let preferred_target = member.preferred_target.clone();

            let reviewers = self.queues.queue(region).active_reviewers();
            let Some(reviewer) = self.pool.next_reviewer(region, reviewers) else {
                continue;
            };

            if self.queues.pop_head(region).is_none() {
                continue;
            }
            self.in_flight.insert(requester.clone());
            info!(
                "Promoting {} in {} to a session with {}",
                requester, region, reviewer
            );
            handoffs.push(PromotionHandoff {
                requester_id: requester,
                reviewer_id: reviewer,
                region,
                preferred_target,
            });
        }
        handoffs
    }

    /// Provisioning succeeded: open the ticket.
    pub fn complete_promotion(
        &mut self,
        handoff: PromotionHandoff,
        channel_ref: ChannelRef,
        now: DateTime<Utc>,
    ) -> Result<TicketId, QueueError> {
        self.in_flight.remove(&handoff.requester_id);
        self.tickets.create(
            NewTicket {
                requester_id: handoff.requester_id,
                reviewer_id: handoff.reviewer_id,
                region: handoff.region,
                preferred_target: handoff.preferred_target,
                channel_ref,
            },
            now,
        )
    }

    /// Provisioning failed: the requester is out of the queue with no ticket.
    pub fn abandon_promotion(&mut self, handoff: &PromotionHandoff, reason: &str) {
        self.in_flight.remove(&handoff.requester_id);
        error!(
            "Lost promotion of {} in {} (reviewer {}): {}",
            handoff.requester_id, handoff.region, handoff.reviewer_id, reason
        );
    }

    fn ticket_for_actor(
        &self,
        ticket_id: &TicketId,
        actor: &UserId,
        action: &'static str,
        allow_requester: bool,
    ) -> Result<&Ticket, QueueError> {
        let ticket = self
            .tickets
            .get(ticket_id)
            .ok_or_else(|| QueueError::TicketNotFound(ticket_id.clone()))?;
        let permitted =
            &ticket.reviewer_id == actor || (allow_requester && &ticket.requester_id == actor);
        if !permitted {
            return Err(QueueError::NotPermitted {
                actor: actor.clone(),
                action,
                ticket_id: ticket_id.clone(),
            });
        }
        Ok(ticket)
    }

    /// Close a session without consequences. The requester or the reviewer may
    /// cancel.
    pub fn cancel_ticket(&mut self, ticket_id: &TicketId, actor: &UserId) -> Result<Ticket, QueueError> {
        self.ticket_for_actor(ticket_id, actor, "cancel", true)?;
        self.tickets
            .close(ticket_id)
            .ok_or_else(|| QueueError::TicketNotFound(ticket_id.clone()))
    }

    /// Finish a session. Only the reviewer may submit. The requester loses their
    /// waitlist membership and goes on cooldown.
    pub fn submit_ticket(
        &mut self,
        ticket_id: &TicketId,
        actor: &UserId,
        now: DateTime<Utc>,
    ) -> Result<SubmittedTicket, QueueError> {
        let requester = self
            .ticket_for_actor(ticket_id, actor, "submit", false)?
            .requester_id
            .clone();
        cooldown_expiry(self.settings.cooldown_days, now)?;

        let revoked = self
            .waitlist
            .remove_membership(&requester, false)
            .map(|member| member.unlocked_resources)
            .unwrap_or_default();
        self.queues.leave_everywhere(&requester);
        let cooldown_until = self
            .waitlist
            .set_cooldown(&requester, self.settings.cooldown_days, now)?;

        let ticket = self
            .tickets
            .close(ticket_id)
            .ok_or_else(|| QueueError::TicketNotFound(ticket_id.clone()))?;
        Ok(SubmittedTicket {
            ticket,
            revoked,
            cooldown_until,
        })
    }

    /// Stores with unwritten changes and how urgently they need writing.
    pub fn dirty_stores(&self) -> Vec<(StoreKind, Durability)> {
        StoreKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let pending = match kind {
                    StoreKind::Queues => self.queues.dirty(),
                    StoreKind::Tickets => self.tickets.dirty(),
                    StoreKind::Waitlist => self.waitlist.dirty(),
                };
                pending.map(|durability| (kind, durability))
            })
            .collect()
    }

    pub fn mark_clean(&mut self, kind: StoreKind) {
        match kind {
            StoreKind::Queues => self.queues.mark_clean(),
            StoreKind::Tickets => self.tickets.mark_clean(),
            StoreKind::Waitlist => self.waitlist.mark_clean(),
        }
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut notes = self.queues.drain_notifications();
        notes.extend(self.tickets.drain_notifications());
        notes
    }
}
