//! Round-robin reviewer assignment.
//!
//! The pool does not own the reviewer set; the queue store does. It only keeps a
//! rotation cursor per region, applied to whatever the active reviewers are at
//! the moment of the call. Cursors are not persisted.

use std::collections::BTreeMap;

use crate::ids::{Region, UserId};

#[derive(Debug, Default)]
pub struct TesterPool {
    cursors: BTreeMap<Region, usize>,
}

impl TesterPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next reviewer for `region` from `reviewers` (in activation order).
    pub fn next_reviewer(&mut self, region: Region, reviewers: &[UserId]) -> Option<UserId> {
        if reviewers.is_empty() {
            return None;
        }
        let cursor = self.cursors.entry(region).or_insert(0);
        let index = *cursor % reviewers.len();
        *cursor = (index + 1) % reviewers.len();
        Some(reviewers[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<UserId> {
        names.iter().map(|n| UserId::from(*n)).collect()
    }

    #[test]
    fn test_round_robin_repeats() {
        let mut pool = TesterPool::new();
        let reviewers = ids(&["t1", "t2", "t3"]);

        let picked: Vec<String> = (0..6)
            .filter_map(|_| pool.next_reviewer(Region::Eu, &reviewers))
            .map(|u| u.0)
            .collect();

        assert_eq!(picked, vec!["t1", "t2", "t3", "t1", "t2", "t3"]);
    }

    #[test]
    fn test_no_reviewers() {
        let mut pool = TesterPool::new();
        assert_eq!(pool.next_reviewer(Region::Eu, &[]), None);
    }

    #[test]
    fn test_cursor_wraps_when_set_shrinks() {
        let mut pool = TesterPool::new();
        let three = ids(&["t1", "t2", "t3"]);
        pool.next_reviewer(Region::Eu, &three);
        pool.next_reviewer(Region::Eu, &three);

        // Cursor is 2; with only one reviewer left it wraps to index 0.
        let one = ids(&["t1"]);
        assert_eq!(pool.next_reviewer(Region::Eu, &one), Some(UserId::from("t1")));
    }

    #[test]
    fn test_regions_rotate_independently() {
        let mut pool = TesterPool::new();
        let reviewers = ids(&["t1", "t2"]);
        pool.next_reviewer(Region::Eu, &reviewers);

        assert_eq!(
            pool.next_reviewer(Region::Na, &reviewers),
            Some(UserId::from("t1"))
        );
        assert_eq!(
            pool.next_reviewer(Region::Eu, &reviewers),
            Some(UserId::from("t2"))
        );
    }
}
