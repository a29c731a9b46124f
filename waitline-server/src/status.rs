//! Status types for the status endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;

use waitline_core::{Engine, QueueState, QueueView, Region};

/// Summary statistics across all regions.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub open: usize,
    pub closed: usize,
    pub confirmation_period: usize,
    pub queued: usize,
    pub active_reviewers: usize,
    pub live_tickets: usize,
    pub waitlist_members: usize,
}

/// Full status data for rendering.
#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: StatusSummary,
    pub regions: Vec<QueueView>,
}

impl StatusData {
    pub fn from_engine(engine: &Engine, now: DateTime<Utc>, version: String) -> Self {
        let regions: Vec<QueueView> = Region::ALL
            .into_iter()
            .map(|region| engine.view(region, now))
            .collect();

        let mut summary = StatusSummary {
            live_tickets: engine.tickets().len(),
            waitlist_members: engine.waitlist().members().count(),
            ..Default::default()
        };
        for view in &regions {
            match view.state {
                QueueState::Open => summary.open += 1,
                QueueState::Closed => summary.closed += 1,
                QueueState::ConfirmationPeriod => summary.confirmation_period += 1,
            }
            summary.queued += view.ordered_entries.len();
            summary.active_reviewers += view.active_reviewers.len();
        }

        Self {
            version,
            summary,
            regions,
        }
    }
}
