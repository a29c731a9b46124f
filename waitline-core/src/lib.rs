//! Regional reviewer waiting lines.
//!
//! Requesters on the waitlist queue up per region while reviewers are active,
//! get a grace period to reconfirm when a queue that emptied of reviewers
//! reopens, and are promoted into sessions with reviewers chosen round robin.
//!
//! Everything in this crate is synchronous and deterministic: time is always
//! passed in, and stores report what needs persisting instead of writing it.

pub mod durability;
pub mod engine;
pub mod error;
pub mod ids;
pub mod notification;
pub mod queue;
pub mod settings;
pub mod snapshot;
pub mod tester_pool;
pub mod ticket;
pub mod view;
pub mod waitlist;

pub use durability::{Durability, StoreKind};
pub use engine::{ClearScope, Engine, PromotionHandoff, SubmittedTicket};
pub use error::{ErrorKind, QueueError};
pub use ids::{ChannelRef, Region, ResourceRef, TicketId, UserId};
pub use notification::Notification;
pub use queue::{PresentationKind, QueueEntry, QueueState, QueueStore};
pub use settings::QueueSettings;
pub use snapshot::{QueueSnapshot, TicketSnapshot, WaitlistSnapshot};
pub use ticket::Ticket;
pub use view::QueueView;
pub use waitlist::WaitlistMembership;
