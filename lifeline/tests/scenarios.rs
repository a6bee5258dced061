//! End-to-end scenarios across requester, service, and responders.

use std::sync::Arc;
use std::time::Duration;

use lifeline::channel::{ChannelConfig, ConnectionStatus, LocalHub, Room, Transport};
use lifeline::geo::{LocationSource, SimulatedLocationSource};
use lifeline::lifecycle::{LifecycleConfig, LifecycleView, SosController, SosHandle, SosPhase};
use lifeline::model::{Coordinates, ResponderPresence};
use lifeline::responder::{AcceptOutcome, FeedHandle, ResponderConfig, ResponderFeed};
use lifeline::service::{AlertService, InMemoryAlertService, ResponderRef};
use lifeline::session::{Role, Session};
use lifeline::toast::{ToastConfig, ToastManager};
use lifeline::{AlertKind, AlertStatus};

const BENGALURU: Coordinates = Coordinates {
    latitude: 12.9716,
    longitude: 77.5946,
};

struct World {
    hub: LocalHub,
    service: Arc<InMemoryAlertService>,
    source: Arc<SimulatedLocationSource>,
    requester: Session,
    sos: SosHandle,
}

async fn world() -> World {
    let hub = LocalHub::new();
    let service = Arc::new(InMemoryAlertService::new(Some(hub.clone())));
    let source = Arc::new(SimulatedLocationSource::with_position(BENGALURU));

    let requester = Session::open(
        "u-asha",
        Role::Requester,
        Arc::new(hub.clone()) as Arc<dyn Transport>,
        ChannelConfig::default(),
    )
    .await
    .unwrap();

    let (sos, _task) = SosController::spawn(
        "u-asha",
        "Asha",
        AlertKind::Sos,
        "need help",
        service.clone() as Arc<dyn AlertService>,
        source.clone() as Arc<dyn LocationSource>,
        requester.channel(),
        LifecycleConfig {
            countdown_ticks: 2,
            countdown_tick_ms: 10,
            poll_interval_ms: 40,
            push_interval_ms: 25,
            location_timeout_ms: 100,
            live_location: true,
        },
    );

    World {
        hub,
        service,
        source,
        requester,
        sos,
    }
}

async fn spawn_responder(world: &World, id: &str) -> (FeedHandle, Session) {
    world
        .service
        .upsert_presence(ResponderPresence::new(id, id))
        .await;
    world.service.set_duty(id, true).await.unwrap();

    let session = Session::open(
        id,
        Role::Responder,
        Arc::new(world.hub.clone()) as Arc<dyn Transport>,
        ChannelConfig::default(),
    )
    .await
    .unwrap();

    let (toasts, _toast_task) = ToastManager::spawn(ToastConfig { ttl_ms: 10_000 });
    let (feed, _feed_task) = ResponderFeed::spawn(
        id,
        id,
        BENGALURU,
        world.service.clone() as Arc<dyn AlertService>,
        session.channel(),
        Some(toasts),
        ResponderConfig {
            poll_interval_ms: 40,
            radius_km: 10.0,
        },
    );
    feed.go_on_duty().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    (feed, session)
}

async fn wait_for_phase(sos: &SosHandle, want: SosPhase) -> LifecycleView {
    let mut view = sos.view();
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if view.borrow().phase == want {
                return view.borrow().clone();
            }
            view.changed().await.expect("view channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {want:?}"))
}

#[tokio::test]
async fn full_sos_arc_with_accept_race() {
    let w = world().await;
    let (feed_a, _sa) = spawn_responder(&w, "v-ravi").await;
    let (feed_b, _sb) = spawn_responder(&w, "v-meera").await;

    w.sos.trigger().await.unwrap();
    let view = wait_for_phase(&w.sos, SosPhase::Active).await;
    let alert_id = view.alert_id.unwrap();

    // Both feeds see the alert, then race.
    for feed in [&feed_a, &feed_b] {
        let mut alerts = feed.alerts();
        tokio::time::timeout(Duration::from_secs(2), async {
            while alerts.borrow().is_empty() {
                alerts.changed().await.unwrap();
            }
        })
        .await
        .expect("feed never saw the alert");
    }

    let (ra, rb) = tokio::join!(feed_a.accept(&alert_id, Some(5)), feed_b.accept(&alert_id, Some(3)));
    let outcomes = [ra.unwrap(), rb.unwrap()];
    let wins = outcomes
        .iter()
        .filter(|o| **o == AcceptOutcome::Accepted)
        .count();
    assert_eq!(wins, 1, "exactly one responder must win");

    // The requester learns about the acceptance.
    let view = wait_for_phase(&w.sos, SosPhase::Responding).await;
    assert!(view.responder.is_some());

    // The loser's feed converges to empty within a poll cycle.
    let loser = if outcomes[0] == AcceptOutcome::Lost {
        &feed_a
    } else {
        &feed_b
    };
    let mut alerts = loser.alerts();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !alerts.borrow().is_empty() {
            alerts.changed().await.unwrap();
        }
    })
    .await
    .expect("loser feed never emptied");

    w.sos.resolve(Some("all safe".to_string())).await.unwrap();
    wait_for_phase(&w.sos, SosPhase::Resolved).await;
    let snapshot = w.service.get(&alert_id).await.unwrap();
    assert_eq!(snapshot.status, AlertStatus::Resolved);
    assert!(snapshot.response_time_secs.is_some());
}

#[tokio::test]
async fn cancel_propagates_and_stops_location_pushes() {
    let w = world().await;
    let (feed, _session) = spawn_responder(&w, "v-ravi").await;

    w.sos.trigger().await.unwrap();
    let view = wait_for_phase(&w.sos, SosPhase::Active).await;
    let alert_id = view.alert_id.unwrap();

    let mut alerts = feed.alerts();
    tokio::time::timeout(Duration::from_secs(2), async {
        while alerts.borrow().is_empty() {
            alerts.changed().await.unwrap();
        }
    })
    .await
    .expect("feed never saw the alert");

    // Let a few location samples land first.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let samples_before = w.service.get(&alert_id).await.unwrap().history.len();

    w.sos.cancel().await.unwrap();
    wait_for_phase(&w.sos, SosPhase::Cancelled).await;

    // The feed drops the entry on the cancelled event.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !alerts.borrow().is_empty() {
            alerts.changed().await.unwrap();
        }
    })
    .await
    .expect("feed never dropped the cancelled alert");

    // No further samples after teardown settles.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = w.service.get(&alert_id).await.unwrap().history.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(w.service.get(&alert_id).await.unwrap().history.len(), settled);
    assert!(settled >= samples_before);
}

#[tokio::test]
async fn poll_backstop_converges_without_push_events() {
    // No hub wiring on the service: status changes travel only via polling.
    let hub = LocalHub::new();
    let service = Arc::new(InMemoryAlertService::new(None));
    let source = Arc::new(SimulatedLocationSource::with_position(BENGALURU));

    let requester = Session::open(
        "u-asha",
        Role::Requester,
        Arc::new(hub) as Arc<dyn Transport>,
        ChannelConfig::default(),
    )
    .await
    .unwrap();

    let (sos, _task) = SosController::spawn(
        "u-asha",
        "Asha",
        AlertKind::Sos,
        "help",
        service.clone() as Arc<dyn AlertService>,
        source as Arc<dyn LocationSource>,
        requester.channel(),
        LifecycleConfig {
            countdown_ticks: 1,
            countdown_tick_ms: 10,
            poll_interval_ms: 30,
            push_interval_ms: 10_000,
            location_timeout_ms: 100,
            live_location: false,
        },
    );

    sos.trigger().await.unwrap();
    let view = wait_for_phase(&sos, SosPhase::Active).await;
    let alert_id = view.alert_id.unwrap();

    service
        .accept(
            &alert_id,
            ResponderRef {
                volunteer_id: "v-1".to_string(),
                name: "Ravi".to_string(),
                eta_minutes: Some(4),
            },
        )
        .await
        .unwrap();
    let view = wait_for_phase(&sos, SosPhase::Responding).await;
    assert_eq!(view.responder.unwrap().volunteer_name, "Ravi");

    service.resolve(&alert_id, None).await.unwrap();
    wait_for_phase(&sos, SosPhase::Resolved).await;
}

#[tokio::test]
async fn reconnect_replays_rooms_and_keeps_delivery() {
    let w = world().await;
    let (feed, _session) = spawn_responder(&w, "v-ravi").await;

    // Drop every connection; clients reconnect and rejoin their rooms.
    w.hub.disconnect_all().await;

    let mut status = w.requester.channel().status();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *status.borrow() == ConnectionStatus::Connected {
                return;
            }
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("requester never reconnected");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(w.hub.members(&Room::Personal("u-asha".to_string())).await >= 1);

    // Push delivery still works end to end after the partition.
    w.sos.trigger().await.unwrap();
    let view = wait_for_phase(&w.sos, SosPhase::Active).await;
    let alert_id = view.alert_id.unwrap();

    let mut alerts = feed.alerts();
    tokio::time::timeout(Duration::from_secs(2), async {
        while alerts.borrow().is_empty() {
            alerts.changed().await.unwrap();
        }
    })
    .await
    .expect("feed missed the post-reconnect alert");

    feed.accept(&alert_id, None).await.unwrap();
    wait_for_phase(&w.sos, SosPhase::Responding).await;
}

#[tokio::test]
async fn decline_is_local_only() {
    let w = world().await;
    let (feed_a, _sa) = spawn_responder(&w, "v-ravi").await;
    let (feed_b, _sb) = spawn_responder(&w, "v-meera").await;

    w.sos.trigger().await.unwrap();
    let view = wait_for_phase(&w.sos, SosPhase::Active).await;
    let alert_id = view.alert_id.unwrap();

    for feed in [&feed_a, &feed_b] {
        let mut alerts = feed.alerts();
        tokio::time::timeout(Duration::from_secs(2), async {
            while alerts.borrow().is_empty() {
                alerts.changed().await.unwrap();
            }
        })
        .await
        .expect("feed never saw the alert");
    }

    feed_a.decline(&alert_id).await.unwrap();
    assert!(feed_a.alerts().borrow().is_empty());

    // The other responder still sees it and can accept.
    assert_eq!(feed_b.alerts().borrow().len(), 1);
    let outcome = feed_b.accept(&alert_id, Some(6)).await.unwrap();
    assert_eq!(outcome, AcceptOutcome::Accepted);

    // The declined entry stays gone across later poll cycles.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(feed_a.alerts().borrow().is_empty());
    let _ = &w.source;
}

#[tokio::test]
async fn resolve_failure_leaves_alert_open_and_retryable() {
    // Background traffic quieted so the injected failure hits the resolve.
    let hub = LocalHub::new();
    let service = Arc::new(InMemoryAlertService::new(Some(hub.clone())));
    let source = Arc::new(SimulatedLocationSource::with_position(BENGALURU));
    let requester = Session::open(
        "u-asha",
        Role::Requester,
        Arc::new(hub) as Arc<dyn Transport>,
        ChannelConfig::default(),
    )
    .await
    .unwrap();

    let (sos, _task) = SosController::spawn(
        "u-asha",
        "Asha",
        AlertKind::Sos,
        "help",
        service.clone() as Arc<dyn AlertService>,
        source as Arc<dyn LocationSource>,
        requester.channel(),
        LifecycleConfig {
            countdown_ticks: 1,
            countdown_tick_ms: 10,
            poll_interval_ms: 10_000,
            push_interval_ms: 10_000,
            location_timeout_ms: 100,
            live_location: false,
        },
    );

    sos.trigger().await.unwrap();
    let view = wait_for_phase(&sos, SosPhase::Active).await;
    let alert_id = view.alert_id.unwrap();

    service
        .fail_next(lifeline::AlertError::network("down"))
        .await;
    let result = sos.resolve(None).await;
    assert!(result.is_err());
    assert_eq!(sos.view().borrow().phase, SosPhase::Active);
    assert_eq!(
        service.get(&alert_id).await.unwrap().status,
        AlertStatus::Active
    );

    // The retry goes through unchanged.
    sos.resolve(None).await.unwrap();
    wait_for_phase(&sos, SosPhase::Resolved).await;
}

#[tokio::test]
async fn countdown_toggle_never_reaches_the_service() {
    let w = world().await;
    let (feed, _session) = spawn_responder(&w, "v-ravi").await;

    // Slow the countdown enough to cancel mid-flight.
    let (sos, _task) = SosController::spawn(
        "u-asha",
        "Asha",
        AlertKind::Sos,
        "help",
        w.service.clone() as Arc<dyn AlertService>,
        w.source.clone() as Arc<dyn LocationSource>,
        w.requester.channel(),
        LifecycleConfig {
            countdown_ticks: 3,
            countdown_tick_ms: 100,
            ..Default::default()
        },
    );

    sos.trigger().await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    sos.trigger().await.unwrap();
    wait_for_phase(&sos, SosPhase::Idle).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(w.service.alert_count().await, 0);
    assert!(feed.alerts().borrow().is_empty());
}
