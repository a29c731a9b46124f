//! Dirty tracking for the persistence layer.
//!
//! Stores never write to disk themselves. Each mutation records how urgently it
//! needs to reach disk; the persistence layer reads that and decides whether to
//! write now or wait for the debounce window.

/// How soon a mutation must be made durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Durability {
    /// Routine change; may wait for the next debounced flush.
    Debounced,
    /// High-value transition; flush before the next event is handled.
    Immediate,
}

/// The three independently persisted stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Queues,
    Tickets,
    Waitlist,
}

impl StoreKind {
    pub const ALL: [StoreKind; 3] = [StoreKind::Queues, StoreKind::Tickets, StoreKind::Waitlist];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Queues => "queues",
            Self::Tickets => "tickets",
            Self::Waitlist => "waitlist",
        }
    }
}

/// Strongest pending durability requirement since the last successful write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlag(Option<Durability>);

impl DirtyFlag {
    pub fn mark(&mut self, durability: Durability) {
        self.0 = self.0.max(Some(durability));
    }

    pub fn pending(&self) -> Option<Durability> {
        self.0
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}
