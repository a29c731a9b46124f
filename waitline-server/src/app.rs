//! Shared application state and the collaborator-facing operations.
//!
//! All engine access goes through one async mutex, which makes the mutex the
//! single logical executor: an operation locks, mutates, publishes its
//! notifications, applies the persistence policy and unlocks. Provisioning is
//! the only await that happens during an operation, and it runs with the lock
//! released and the queue head already popped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};

use waitline_core::{
    ClearScope, Engine, Notification, PresentationKind, QueueError, QueueView, Region,
    ResourceRef, StoreKind, SubmittedTicket, Ticket, TicketId, UserId, WaitlistMembership,
};

use crate::clock::Clock;
use crate::config::Config;
use crate::persistence::{FlushMode, Persistence};
use crate::provisioner::SessionProvisioner;
use crate::status::StatusData;

const NOTIFICATION_CAPACITY: usize = 256;

struct Inner {
    engine: Engine,
    persistence: Persistence,
}

pub struct AppState {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    provisioner: Arc<dyn SessionProvisioner>,
    notifications: broadcast::Sender<Notification>,
    shutting_down: AtomicBool,
}

impl AppState {
    pub fn new(
        engine: Engine,
        persistence: Persistence,
        clock: Arc<dyn Clock>,
        provisioner: Arc<dyn SessionProvisioner>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                engine,
                persistence,
            }),
            clock,
            provisioner,
            notifications,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Load state from the configured directory.
    pub fn from_config(
        config: &Config,
        clock: Arc<dyn Clock>,
        provisioner: Arc<dyn SessionProvisioner>,
    ) -> Result<Self> {
        let persistence = Persistence::new(&config.state_dir, config.debounce()?);
        let engine = persistence.load(config.queue_settings()?);
        Ok(Self::new(engine, persistence, clock, provisioner))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Publish notifications and write whatever is due. Runs at the end of every
    /// operation, before the lock is released.
    async fn settle(&self, inner: &mut Inner, mode: FlushMode) {
        for note in inner.engine.drain_notifications() {
            debug!("Notification: {}", note.log_summary());
            // No subscribers is fine.
            let _ = self.notifications.send(note);
        }
        let now = self.clock.now();
        let Inner {
            engine,
            persistence,
        } = inner;
        persistence.flush(engine, mode, now).await;
    }

    async fn with_engine<T>(&self, op: impl FnOnce(&mut Engine) -> T) -> T {
        let mut inner = self.inner.lock().await;
        let result = op(&mut inner.engine);
        self.settle(&mut inner, FlushMode::Routine).await;
        result
    }

    pub async fn activate_reviewer(&self, region: Region, reviewer: &UserId) {
        let now = self.clock.now();
        self.with_engine(|engine| engine.activate_reviewer(region, reviewer, now))
            .await
    }

    pub async fn deactivate_reviewer(&self, region: Region, reviewer: &UserId) -> bool {
        self.with_engine(|engine| engine.deactivate_reviewer(region, reviewer))
            .await
    }

    pub async fn request_join(&self, region: Region, requester: &UserId) -> Result<usize, QueueError> {
        self.with_engine(|engine| engine.request_join(region, requester))
            .await
    }

    pub async fn leave_queue(&self, region: Region, requester: &UserId) -> bool {
        self.with_engine(|engine| engine.leave_queue(region, requester))
            .await
    }

    pub async fn confirm_still_active(&self, region: Region, requester: &UserId) -> Result<(), QueueError> {
        self.with_engine(|engine| engine.confirm_still_active(region, requester))
            .await
    }

    pub async fn join_waitlist(
        &self,
        requester: &UserId,
        region: Region,
        preferred_target: &str,
    ) -> Result<(), QueueError> {
        let now = self.clock.now();
        self.with_engine(|engine| engine.join_waitlist(requester, region, preferred_target, now))
            .await
    }

    pub async fn leave_waitlist(&self, requester: &UserId) -> Option<WaitlistMembership> {
        self.with_engine(|engine| engine.leave_waitlist(requester))
            .await
    }

    pub async fn unlock_resource(&self, requester: &UserId, resource: ResourceRef) -> bool {
        self.with_engine(|engine| engine.unlock_resource(requester, resource))
            .await
    }

    pub async fn cancel_ticket(&self, ticket_id: &TicketId, actor: &UserId) -> Result<Ticket, QueueError> {
        self.with_engine(|engine| engine.cancel_ticket(ticket_id, actor))
            .await
    }

    pub async fn submit_ticket(
        &self,
        ticket_id: &TicketId,
        actor: &UserId,
    ) -> Result<SubmittedTicket, QueueError> {
        let now = self.clock.now();
        self.with_engine(|engine| engine.submit_ticket(ticket_id, actor, now))
            .await
    }

    pub async fn set_presentation(&self, region: Region, kind: PresentationKind, value: Option<String>) {
        self.with_engine(|engine| engine.set_presentation(region, kind, value))
            .await
    }

    pub async fn clear(&self, scope: ClearScope) {
        self.with_engine(|engine| engine.clear(scope)).await
    }

    pub async fn view(&self, region: Region) -> QueueView {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        inner.engine.view(region, now)
    }

    pub async fn ticket_for(&self, requester: &UserId) -> Option<Ticket> {
        let inner = self.inner.lock().await;
        inner.engine.tickets().by_requester(requester).cloned()
    }

    pub async fn status(&self, version: String) -> StatusData {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        StatusData::from_engine(&inner.engine, now, version)
    }

    /// Reconcile regions whose confirmation deadline has passed.
    pub async fn expire_confirmations(&self) -> Vec<(Region, usize)> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let reconciled = inner.engine.expire_confirmations(now);
        self.settle(&mut inner, FlushMode::Routine).await;
        reconciled
    }

    /// One pass of the promotion loop. Returns the number of tickets created.
    pub async fn run_promotions(&self) -> usize {
        let handoffs = {
            let mut inner = self.inner.lock().await;
            let handoffs = inner.engine.begin_promotions();
            self.settle(&mut inner, FlushMode::Routine).await;
            handoffs
        };

        let mut created = 0;
        for handoff in handoffs {
            let outcome = self.provisioner.provision(&handoff).await;

            let mut inner = self.inner.lock().await;
            match outcome {
                Ok(channel) => {
                    let now = self.clock.now();
                    match inner.engine.complete_promotion(handoff.clone(), channel, now) {
                        Ok(_) => created += 1,
                        Err(e) => inner.engine.abandon_promotion(&handoff, &e.to_string()),
                    }
                }
                Err(e) => inner.engine.abandon_promotion(&handoff, &e.to_string()),
            }
            self.settle(&mut inner, FlushMode::Routine).await;
        }
        created
    }

    /// Write debounced changes that have waited long enough.
    pub async fn flush_pending(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let Inner {
            engine,
            persistence,
        } = &mut *inner;
        persistence.flush(engine, FlushMode::Routine, now).await
    }

    /// Write every store unconditionally.
    pub async fn backup_all(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let Inner {
            engine,
            persistence,
        } = &mut *inner;
        persistence.write_all(engine).await
    }

    /// Run every scheduler step once, in order.
    pub async fn tick(&self) {
        self.expire_confirmations().await;
        self.run_promotions().await;
        self.flush_pending().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Final forced flush. Only the first call does anything; returns whether
    /// this call was the one that flushed.
    pub async fn shutdown(&self) -> bool {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("Shutting down, saving all state");
        let mut inner = self.inner.lock().await;
        self.settle(&mut inner, FlushMode::Forced).await;
        true
    }

    /// Forced flush after an unexpected fault.
    pub async fn emergency_flush(&self) {
        error!("Emergency save after an unexpected fault");
        let mut inner = self.inner.lock().await;
        self.settle(&mut inner, FlushMode::Forced).await;
    }

    /// Start an emergency flush from synchronous code such as a panic handler.
    /// Must be called from inside the runtime.
    pub fn spawn_emergency_flush(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move { state.emergency_flush().await })
    }

    pub async fn write_count(&self, kind: StoreKind) -> u64 {
        self.inner.lock().await.persistence.write_count(kind)
    }
}
