//! On-disk document shapes for the three stores, and conversion to and from the
//! in-memory stores.
//!
//! Loading is forgiving: positions are re-sorted and renumbered, duplicate
//! requesters are dropped, and records that describe an impossible state are
//! repaired into the nearest legal one (with a warning) rather than rejected.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ids::{Region, TicketId, UserId};
use crate::queue::{
    ConfirmationWindow, PresentationRefs, QueueEntry, QueuePhase, QueueState, QueueStore,
    RegionQueue,
};
use crate::settings::QueueSettings;
use crate::ticket::{Ticket, TicketRegistry};
use crate::waitlist::{WaitlistMembership, WaitlistRegistry};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queues: BTreeMap<Region, QueueRecord>,
}

/// One region as persisted. The flat layout keeps the file readable by hand;
/// `state` says which of the other fields mean anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueRecord {
    pub entries: Vec<QueueEntry>,
    pub active_reviewers: Vec<UserId>,
    pub state: QueueState,
    pub snapshot: Vec<QueueEntry>,
    pub confirmed: Vec<UserId>,
    /// Epoch milliseconds.
    pub confirmation_deadline: Option<i64>,
    #[serde(flatten)]
    pub presentation: PresentationRefs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSnapshot {
    #[serde(default)]
    pub tickets: BTreeMap<TicketId, Ticket>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistSnapshot {
    #[serde(default)]
    pub members: BTreeMap<UserId, WaitlistMembership>,
    /// Cooldown expiry per requester, epoch milliseconds.
    #[serde(default)]
    pub cooldowns: BTreeMap<UserId, i64>,
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Sort by stored position, drop anyone already `seen`, renumber from 1.
fn repair_entries(mut entries: Vec<QueueEntry>, seen: &mut HashSet<UserId>) -> Vec<QueueEntry> {
    entries.sort_by_key(|e| e.position);
    entries.retain(|e| seen.insert(e.requester_id.clone()));
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.position = index + 1;
    }
    entries
}

impl QueueStore {
    pub fn to_snapshot(&self) -> QueueSnapshot {
        let queues = self
            .regions()
            .map(|(region, queue)| {
                let window = queue.phase().window();
                let record = QueueRecord {
                    entries: queue.entries().to_vec(),
                    active_reviewers: queue.active_reviewers().to_vec(),
                    state: queue.state(),
                    snapshot: queue.phase().snapshot().to_vec(),
                    confirmed: window.map(|w| w.confirmed.clone()).unwrap_or_default(),
                    confirmation_deadline: window.map(|w| w.deadline.timestamp_millis()),
                    presentation: queue.presentation().clone(),
                };
                (region, record)
            })
            .collect();
        QueueSnapshot { queues }
    }

    pub fn from_snapshot(settings: &QueueSettings, snapshot: QueueSnapshot) -> Self {
        let mut seen = HashSet::new();
        let mut queues = BTreeMap::new();

        for (region, record) in snapshot.queues {
            let mut reviewers: Vec<UserId> = Vec::new();
            for reviewer in record.active_reviewers {
                if !reviewers.contains(&reviewer) {
                    reviewers.push(reviewer);
                }
            }

            let mut entries = record.entries;
            entries.retain(|e| !reviewers.contains(&e.requester_id));
            // Only entries that stay in a live line count against other regions.
            let live = record.state == QueueState::Open && !reviewers.is_empty();
            let mut scratch = HashSet::new();
            let entries = repair_entries(entries, if live { &mut seen } else { &mut scratch });
            let mut held = record.snapshot;
            held.sort_by_key(|e| e.position);

            let (phase, entries) = match record.state {
                QueueState::Open if reviewers.is_empty() => {
                    warn!("{} queue was open with no reviewer; loading it closed", region);
                    (QueuePhase::Closed { snapshot: entries }, Vec::new())
                }
                QueueState::Open => (QueuePhase::Open, entries),
                QueueState::Closed => {
                    let snapshot = if held.is_empty() { entries } else { held };
                    (QueuePhase::Closed { snapshot }, Vec::new())
                }
                QueueState::ConfirmationPeriod => {
                    let deadline = match record.confirmation_deadline {
                        Some(millis) => from_millis(millis),
                        None => {
                            warn!(
                                "{} confirmation period has no deadline; treating it as expired",
                                region
                            );
                            DateTime::<Utc>::UNIX_EPOCH
                        }
                    };
                    let mut confirmed: Vec<UserId> = Vec::new();
                    for user in record.confirmed {
                        if held.iter().any(|e| e.requester_id == user) && !confirmed.contains(&user) {
                            confirmed.push(user);
                        }
                    }
                    let window = ConfirmationWindow {
                        snapshot: held,
                        confirmed,
                        deadline,
                    };
                    (QueuePhase::ConfirmationPeriod(window), Vec::new())
                }
            };

            queues.insert(
                region,
                RegionQueue {
                    phase,
                    entries,
                    active_reviewers: reviewers,
                    presentation: record.presentation,
                },
            );
        }

        QueueStore::from_queues(settings, queues)
    }
}

impl TicketRegistry {
    pub fn to_snapshot(&self) -> TicketSnapshot {
        TicketSnapshot {
            tickets: self.tickets().clone(),
        }
    }

    /// Tickets are keyed by their own id; a second ticket for the same requester
    /// is dropped.
    pub fn from_snapshot(snapshot: TicketSnapshot) -> Self {
        let mut requesters = HashSet::new();
        let mut tickets = BTreeMap::new();
        for (_, ticket) in snapshot.tickets {
            if !requesters.insert(ticket.requester_id.clone()) {
                warn!(
                    "Dropping ticket {}: {} already has a ticket",
                    ticket.ticket_id, ticket.requester_id
                );
                continue;
            }
            tickets.insert(ticket.ticket_id.clone(), ticket);
        }
        TicketRegistry::from_tickets(tickets)
    }
}

impl WaitlistRegistry {
    pub fn to_snapshot(&self) -> WaitlistSnapshot {
        WaitlistSnapshot {
            members: self.member_map().clone(),
            cooldowns: self
                .cooldown_map()
                .iter()
                .map(|(user, expires_at)| (user.clone(), expires_at.timestamp_millis()))
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: WaitlistSnapshot) -> Self {
        let members = snapshot
            .members
            .into_iter()
            .map(|(user, mut member)| {
                member.requester_id = user.clone();
                (user, member)
            })
            .collect();
        let cooldowns = snapshot
            .cooldowns
            .into_iter()
            .map(|(user, millis)| (user, from_millis(millis)))
            .collect();
        WaitlistRegistry::from_parts(members, cooldowns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::ids::ChannelRef;
    use crate::queue::PresentationKind;
    use crate::ticket::NewTicket;

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    fn entry(id: &str, position: usize) -> QueueEntry {
        QueueEntry::new(user(id), position)
    }

    fn at(millis: i64) -> DateTime<Utc> {
        from_millis(millis)
    }

    fn reload(store: &QueueStore) -> QueueStore {
        let json = serde_json::to_string(&store.to_snapshot()).unwrap();
        let snapshot: QueueSnapshot = serde_json::from_str(&json).unwrap();
        QueueStore::from_snapshot(&QueueSettings::default(), snapshot)
    }

    #[test]
    fn test_queue_store_survives_reload() {
        let now = at(1_700_000_000_000);
        let mut store = QueueStore::new(&QueueSettings::default());
        store.activate_reviewer(Region::Eu, &user("r1"), now);
        store.join(Region::Eu, &user("u1")).unwrap();
        store.join(Region::Eu, &user("u2")).unwrap();
        store.set_presentation(Region::Eu, PresentationKind::QueueMessage, Some("m1".into()));
        store.deactivate_reviewer(Region::Eu, &user("r1"));
        store.activate_reviewer(Region::Eu, &user("r2"), now);
        store.confirm(Region::Eu, &user("u2")).unwrap();
        store.activate_reviewer(Region::Na, &user("r3"), now);
        store.join(Region::Na, &user("u3")).unwrap();

        let reloaded = reload(&store);

        for region in Region::ALL {
            assert_eq!(reloaded.queue(region), store.queue(region), "{}", region);
        }
    }

    #[test]
    fn test_queue_json_layout() {
        let mut store = QueueStore::new(&QueueSettings::default());
        store.activate_reviewer(Region::Eu, &user("r1"), Utc::now());
        store.join(Region::Eu, &user("u1")).unwrap();

        let json = serde_json::to_value(store.to_snapshot()).unwrap();
        let eu = &json["queues"]["EU"];
        assert_eq!(eu["state"], "open");
        assert_eq!(eu["entries"][0]["requesterId"], "u1");
        assert_eq!(eu["entries"][0]["position"], 1);
        assert_eq!(eu["activeReviewers"][0], "r1");
        assert!(eu["confirmationDeadline"].is_null());
        assert!(eu["queueMessage"].is_null());
    }

    #[test]
    fn test_load_repairs_positions_and_duplicates() {
        let json = r#"{"queues": {
            "EU": {"state": "open", "activeReviewers": ["r1"],
                   "entries": [{"requesterId": "b", "position": 7},
                               {"requesterId": "a", "position": 2},
                               {"requesterId": "r1", "position": 3}]},
            "NA": {"state": "open", "activeReviewers": ["r2"],
                   "entries": [{"requesterId": "a", "position": 1},
                               {"requesterId": "c", "position": 2}]}
        }}"#;
        let snapshot: QueueSnapshot = serde_json::from_str(json).unwrap();
        let store = QueueStore::from_snapshot(&QueueSettings::default(), snapshot);

        assert_eq!(
            store.queue(Region::Eu).entries(),
            &[entry("a", 1), entry("b", 2)]
        );
        assert_eq!(store.queue(Region::Na).entries(), &[entry("c", 1)]);
    }

    #[test]
    fn test_stale_entries_do_not_evict_live_ones() {
        let json = r#"{"queues": {
            "EU": {"state": "confirmation_period", "activeReviewers": ["r1"],
                   "confirmationDeadline": 1700000300000,
                   "entries": [{"requesterId": "a", "position": 1}],
                   "snapshot": [{"requesterId": "b", "position": 1}]},
            "NA": {"state": "open", "activeReviewers": ["r2"],
                   "entries": [{"requesterId": "a", "position": 1}]}
        }}"#;
        let snapshot: QueueSnapshot = serde_json::from_str(json).unwrap();
        let store = QueueStore::from_snapshot(&QueueSettings::default(), snapshot);

        assert!(store.queue(Region::Eu).entries().is_empty());
        assert_eq!(store.queue(Region::Na).entries(), &[entry("a", 1)]);
        assert_eq!(store.region_of(&user("a")), Some(Region::Na));
    }

    #[test]
    fn test_open_without_reviewer_loads_closed() {
        let json = r#"{"queues": {"AS": {"state": "open",
            "entries": [{"requesterId": "a", "position": 1}]}}}"#;
        let snapshot: QueueSnapshot = serde_json::from_str(json).unwrap();
        let store = QueueStore::from_snapshot(&QueueSettings::default(), snapshot);

        let queue = store.queue(Region::As);
        assert_eq!(queue.state(), QueueState::Closed);
        assert!(queue.entries().is_empty());
        assert_eq!(queue.phase().snapshot(), &[entry("a", 1)]);
    }

    #[test]
    fn test_confirmation_without_deadline_is_expired() {
        let json = r#"{"queues": {"EU": {"state": "confirmation_period",
            "activeReviewers": ["r1"],
            "snapshot": [{"requesterId": "a", "position": 1}],
            "confirmed": ["a", "stranger"]}}}"#;
        let snapshot: QueueSnapshot = serde_json::from_str(json).unwrap();
        let store = QueueStore::from_snapshot(&QueueSettings::default(), snapshot);

        assert!(store.has_expired(Region::Eu, Utc::now()));
        let window = store.queue(Region::Eu).phase().window().unwrap();
        assert_eq!(window.confirmed, vec![user("a")]);
    }

    #[test]
    fn test_tickets_survive_reload() {
        let mut registry = TicketRegistry::new();
        let id = registry
            .create(
                NewTicket {
                    requester_id: user("u1"),
                    reviewer_id: user("t1"),
                    region: Region::Na,
                    preferred_target: "any".into(),
                    channel_ref: ChannelRef::from("c1"),
                },
                at(1_700_000_000_123),
            )
            .unwrap();

        let json = serde_json::to_string(&registry.to_snapshot()).unwrap();
        let mut reloaded =
            TicketRegistry::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(reloaded.get(&id), registry.get(&id));
        // Ids keep increasing after a reload.
        reloaded.close(&id);
        let next = reloaded
            .create(
                NewTicket {
                    requester_id: user("u1"),
                    reviewer_id: user("t1"),
                    region: Region::Na,
                    preferred_target: "any".into(),
                    channel_ref: ChannelRef::from("c2"),
                },
                at(1_700_000_000_000),
            )
            .unwrap();
        assert_eq!(next, TicketId::from("ticket-u1-1700000000124"));
    }

    #[test]
    fn test_waitlist_survives_reload() {
        let now = at(1_700_000_000_000);
        let mut waitlist = WaitlistRegistry::new();
        waitlist.add_membership(&user("u1"), Region::Eu, "srv", now).unwrap();
        waitlist.set_cooldown(&user("u2"), 30, now).unwrap();

        let json = serde_json::to_value(waitlist.to_snapshot()).unwrap();
        assert_eq!(
            json["cooldowns"]["u2"],
            (now + Duration::days(30)).timestamp_millis()
        );
        let reloaded = WaitlistRegistry::from_snapshot(serde_json::from_value(json).unwrap());

        assert_eq!(reloaded.get(&user("u1")), waitlist.get(&user("u1")));
        assert_eq!(
            reloaded.cooldown_of(&user("u2")),
            Some(now + Duration::days(30))
        );
    }

    #[test]
    fn test_garbage_fields_default() {
        let snapshot: WaitlistSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snapshot.members.is_empty());
        let snapshot: QueueSnapshot = serde_json::from_str(r#"{"queues": {}}"#).unwrap();
        assert!(snapshot.queues.is_empty());
    }
}
