use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use waitline_core::{
    Engine, QueueEntry, QueueError, QueueSettings, QueueState, Region, StoreKind, UserId,
};
use waitline_server::clock::{Clock, ManualClock};
use waitline_server::persistence::Persistence;
use waitline_server::provisioner::LocalProvisioner;
use waitline_server::AppState;

fn start_time() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
}

fn user(id: &str) -> UserId {
    UserId::from(id)
}

fn build_app(dir: &TempDir, clock: Arc<ManualClock>) -> AppState {
    let persistence = Persistence::new(dir.path(), chrono::Duration::seconds(2));
    let engine = persistence.load(QueueSettings::default());
    AppState::new(engine, persistence, clock, Arc::new(LocalProvisioner))
}

async fn join_as_member(app: &AppState, region: Region, id: &str) -> Result<usize, QueueError> {
    app.join_waitlist(&user(id), region, "any").await?;
    app.request_join(region, &user(id)).await
}

#[tokio::test]
async fn test_reopen_with_confirmation_period() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start_time()));
    let app = build_app(&dir, clock.clone());

    app.activate_reviewer(Region::Eu, &user("r1")).await;
    assert_eq!(app.view(Region::Eu).await.state, QueueState::Open);

    assert_eq!(join_as_member(&app, Region::Eu, "u1").await, Ok(1));
    assert_eq!(join_as_member(&app, Region::Eu, "u2").await, Ok(2));

    assert!(app.deactivate_reviewer(Region::Eu, &user("r1")).await);
    let closed = app.view(Region::Eu).await;
    assert_eq!(closed.state, QueueState::Closed);
    assert!(closed.ordered_entries.is_empty());
    // Closing is written straight away.
    assert_eq!(app.write_count(StoreKind::Queues).await, 1);

    app.activate_reviewer(Region::Eu, &user("r2")).await;
    let confirming = app.view(Region::Eu).await;
    assert_eq!(confirming.state, QueueState::ConfirmationPeriod);
    assert_eq!(confirming.seconds_remaining, Some(300));
    assert_eq!(
        confirming.confirmation.unwrap().awaiting,
        vec![
            QueueEntry::new(user("u1"), 1),
            QueueEntry::new(user("u2"), 2)
        ]
    );

    assert_eq!(app.confirm_still_active(Region::Eu, &user("u1")).await, Ok(()));
    assert_eq!(
        app.confirm_still_active(Region::Eu, &user("u1")).await,
        Err(QueueError::AlreadyConfirmed)
    );
    assert_eq!(
        app.confirm_still_active(Region::Eu, &user("u3")).await,
        Err(QueueError::NotPreviouslyQueued { region: Region::Eu })
    );

    clock.advance(Duration::minutes(4));
    assert!(app.expire_confirmations().await.is_empty());

    clock.advance(Duration::minutes(1));
    assert_eq!(app.expire_confirmations().await, vec![(Region::Eu, 1)]);

    let reopened = app.view(Region::Eu).await;
    assert_eq!(reopened.state, QueueState::Open);
    assert_eq!(reopened.ordered_entries, vec![QueueEntry::new(user("u1"), 1)]);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start_time()));

    {
        let app = build_app(&dir, clock.clone());
        app.activate_reviewer(Region::Na, &user("r1")).await;
        join_as_member(&app, Region::Na, "u1").await.unwrap();
        join_as_member(&app, Region::Na, "u2").await.unwrap();
        app.leave_queue(Region::Na, &user("u1")).await;
        assert!(app.shutdown().await);
    }

    let app = build_app(&dir, clock.clone());
    let view = app.view(Region::Na).await;
    assert_eq!(view.state, QueueState::Open);
    assert_eq!(view.active_reviewers, vec![user("r1")]);
    assert_eq!(view.ordered_entries, vec![QueueEntry::new(user("u2"), 1)]);

    // Waitlist membership came back too, so u1 can rejoin.
    assert_eq!(app.request_join(Region::Na, &user("u1")).await, Ok(2));
}

#[tokio::test]
async fn test_promotion_and_submission() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start_time()));
    let app = build_app(&dir, clock.clone());

    app.activate_reviewer(Region::As, &user("t1")).await;
    app.activate_reviewer(Region::As, &user("t2")).await;
    join_as_member(&app, Region::As, "u1").await.unwrap();
    join_as_member(&app, Region::As, "u2").await.unwrap();

    app.tick().await;
    app.tick().await;

    let first = app.ticket_for(&user("u1")).await.unwrap();
    let second = app.ticket_for(&user("u2")).await.unwrap();
    assert_eq!(first.reviewer_id, user("t1"));
    assert_eq!(second.reviewer_id, user("t2"));
    assert_eq!(first.ticket_id.0, format!("ticket-u1-{}", clock.now().timestamp_millis()));
    assert!(app.view(Region::As).await.ordered_entries.is_empty());

    let submitted = app.submit_ticket(&first.ticket_id, &user("t1")).await.unwrap();
    assert_eq!(submitted.cooldown_until, clock.now() + Duration::days(30));
    assert!(app.ticket_for(&user("u1")).await.is_none());

    clock.advance(Duration::days(29));
    assert_eq!(
        app.join_waitlist(&user("u1"), Region::As, "any").await,
        Err(QueueError::CooldownActive { days_remaining: 1 })
    );
    clock.advance(Duration::days(1));
    assert_eq!(app.join_waitlist(&user("u1"), Region::As, "any").await, Ok(()));
}

#[tokio::test]
async fn test_ticket_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start_time()));
    let app = build_app(&dir, clock.clone());
    app.activate_reviewer(Region::Eu, &user("t1")).await;
    join_as_member(&app, Region::Eu, "u1").await.unwrap();
    app.run_promotions().await;
    app.shutdown().await;

    let persistence = Persistence::new(dir.path(), chrono::Duration::seconds(2));
    let engine: Engine = persistence.load(QueueSettings::default());
    assert!(engine.tickets().by_requester(&user("u1")).is_some());
    assert!(engine.queues().region_of(&user("u1")).is_none());
}

#[tokio::test]
async fn test_routine_writes_are_coalesced() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(start_time()));
    let app = build_app(&dir, clock.clone());
    app.activate_reviewer(Region::Eu, &user("r1")).await;
    app.join_waitlist(&user("u1"), Region::Eu, "any").await.unwrap();

    app.request_join(Region::Eu, &user("u1")).await.unwrap();
    clock.advance(Duration::seconds(1));
    app.leave_queue(Region::Eu, &user("u1")).await;
    assert_eq!(app.write_count(StoreKind::Queues).await, 0);

    clock.advance(Duration::seconds(1));
    app.flush_pending().await;
    assert_eq!(app.write_count(StoreKind::Queues).await, 1);

    assert!(app.shutdown().await);
    assert!(!app.shutdown().await);
    // Nothing was dirty at shutdown.
    assert_eq!(app.write_count(StoreKind::Queues).await, 1);
}
