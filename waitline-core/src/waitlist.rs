//! Long-lived waitlist membership and post-session cooldowns.
//!
//! Membership is what lets a requester into a region's queue at all. Cooldowns
//! are kept in a separate map because they outlive the membership they replace.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::durability::{DirtyFlag, Durability};
use crate::error::QueueError;
use crate::ids::{Region, ResourceRef, UserId};

const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistMembership {
    pub requester_id: UserId,
    pub region: Region,
    pub preferred_target: String,
    /// Resources unlocked for this member, without duplicates.
    #[serde(default)]
    pub unlocked_resources: Vec<ResourceRef>,
}

#[derive(Debug, Default)]
pub struct WaitlistRegistry {
    members: BTreeMap<UserId, WaitlistMembership>,
    cooldowns: BTreeMap<UserId, DateTime<Utc>>,
    dirty: DirtyFlag,
}

/// When a cooldown of `days` starting at `now` ends.
pub fn cooldown_expiry(days: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
    Duration::try_days(days)
        .and_then(|length| now.checked_add_signed(length))
        .ok_or(QueueError::CooldownOutOfRange { days })
}

/// Whole days left until `expires_at`, rounded up.
fn days_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (expires_at - now).num_milliseconds();
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

impl WaitlistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        members: BTreeMap<UserId, WaitlistMembership>,
        cooldowns: BTreeMap<UserId, DateTime<Utc>>,
    ) -> Self {
        Self {
            members,
            cooldowns,
            dirty: DirtyFlag::default(),
        }
    }

    /// Add a member. Refused while a cooldown is running; an expired cooldown is
    /// dropped on the way.
    pub fn add_membership(
        &mut self,
        requester: &UserId,
        region: Region,
        preferred_target: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        if let Some(expires_at) = self.cooldowns.get(requester).copied() {
            if now < expires_at {
                return Err(QueueError::CooldownActive {
                    days_remaining: days_remaining(expires_at, now),
                });
            }
            debug!("Cooldown for {} expired at {}, removing", requester, expires_at);
            self.cooldowns.remove(requester);
            self.dirty.mark(Durability::Immediate);
        }

        if self.members.contains_key(requester) {
            return Err(QueueError::AlreadyMember);
        }

        self.members.insert(
            requester.clone(),
            WaitlistMembership {
                requester_id: requester.clone(),
                region,
                preferred_target: preferred_target.to_string(),
                unlocked_resources: Vec::new(),
            },
        );
        self.dirty.mark(Durability::Immediate);
        info!("{} joined the waitlist for {}", requester, region);
        Ok(())
    }

    /// Remove a member, returning the removed record. With `preserve_unlocks` the
    /// returned record lists no unlocked resources, so the caller revokes nothing.
    pub fn remove_membership(
        &mut self,
        requester: &UserId,
        preserve_unlocks: bool,
    ) -> Option<WaitlistMembership> {
        let mut removed = self.members.remove(requester)?;
        if preserve_unlocks {
            removed.unlocked_resources.clear();
        }
        self.dirty.mark(Durability::Immediate);
        info!("{} left the waitlist", requester);
        Some(removed)
    }

    /// Put a requester on cooldown for `days` from `now`. Returns the expiry.
    pub fn set_cooldown(
        &mut self,
        requester: &UserId,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, QueueError> {
        let expires_at = cooldown_expiry(days, now)?;
        self.cooldowns.insert(requester.clone(), expires_at);
        self.dirty.mark(Durability::Immediate);
        info!("{} is on waitlist cooldown until {}", requester, expires_at);
        Ok(expires_at)
    }

    pub fn cooldown_of(&self, requester: &UserId) -> Option<DateTime<Utc>> {
        self.cooldowns.get(requester).copied()
    }

    pub fn get(&self, requester: &UserId) -> Option<&WaitlistMembership> {
        self.members.get(requester)
    }

    pub fn members(&self) -> impl Iterator<Item = &WaitlistMembership> {
        self.members.values()
    }

    /// Record an unlocked resource. No-op for non-members or repeats.
    pub fn unlock(&mut self, requester: &UserId, resource: ResourceRef) -> bool {
        let Some(member) = self.members.get_mut(requester) else {
            return false;
        };
        if member.unlocked_resources.contains(&resource) {
            return false;
        }
        member.unlocked_resources.push(resource);
        self.dirty.mark(Durability::Debounced);
        true
    }

    pub fn has_unlocked_region(&self, requester: &UserId, region: Region) -> bool {
        self.members
            .get(requester)
            .is_some_and(|member| member.region == region)
    }

    pub fn clear_all(&mut self) {
        self.members.clear();
        self.cooldowns.clear();
        self.dirty.mark(Durability::Immediate);
        info!("Cleared all waitlist members and cooldowns");
    }

    pub fn dirty(&self) -> Option<Durability> {
        self.dirty.pending()
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    pub(crate) fn member_map(&self) -> &BTreeMap<UserId, WaitlistMembership> {
        &self.members
    }

    pub(crate) fn cooldown_map(&self) -> &BTreeMap<UserId, DateTime<Utc>> {
        &self.cooldowns
    }
}
