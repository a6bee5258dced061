//! Lifeline simulator.
//!
//! Runs a complete SOS arc in-process: a requester triggers the countdown,
//! nearby on-duty responders get the alert, all of them race to accept,
//! exactly one wins, live location streams until the alert is resolved.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, Result};
use tracing::info;

use lifeline::channel::{ChannelConfig, LocalHub, Transport};
use lifeline::geo::{LocationSource, SimulatedLocationSource};
use lifeline::lifecycle::{LifecycleConfig, SosController, SosPhase};
use lifeline::model::{Coordinates, ResponderPresence};
use lifeline::responder::{AcceptOutcome, ResponderConfig, ResponderFeed};
use lifeline::service::{AlertService, InMemoryAlertService};
use lifeline::session::{Role, Session};
use lifeline::toast::{ToastConfig, ToastManager};
use lifeline::AlertKind;

#[derive(Parser, Debug)]
#[command(name = "lifeline", about = "Emergency alert coordination simulator")]
struct Cli {
    /// Countdown ticks before the alert fires.
    #[arg(long, default_value_t = 3)]
    countdown: u32,

    /// Number of responders racing to accept.
    #[arg(long, default_value_t = 2)]
    responders: u32,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    run_simulation(cli).await
}

async fn run_simulation(cli: Cli) -> Result<()> {
    let hub = LocalHub::new();
    let service = Arc::new(InMemoryAlertService::new(Some(hub.clone())));
    let transport: Arc<dyn Transport> = Arc::new(hub.clone());

    // Requester in central Bengaluru.
    let requester_pos = Coordinates::new(12.9716, 77.5946);
    let source = Arc::new(SimulatedLocationSource::with_position(requester_pos));
    let requester =
        Session::open("u-asha", Role::Requester, transport.clone(), ChannelConfig::default())
            .await?;

    let lifecycle_config = LifecycleConfig {
        countdown_ticks: cli.countdown,
        countdown_tick_ms: 300,
        poll_interval_ms: 500,
        push_interval_ms: 400,
        ..Default::default()
    };
    let (sos, _sos_task) = SosController::spawn(
        "u-asha",
        "Asha",
        AlertKind::Sos,
        "Need help near MG Road",
        service.clone() as Arc<dyn AlertService>,
        source.clone() as Arc<dyn LocationSource>,
        requester.channel(),
        lifecycle_config,
    );

    // Responders scattered nearby, all on duty.
    let mut feeds = Vec::new();
    let mut sessions = Vec::new();
    for i in 0..cli.responders {
        let id = format!("v-{i}");
        let name = format!("Responder {i}");
        service
            .upsert_presence(ResponderPresence::new(id.clone(), name.clone()))
            .await;
        service.set_duty(&id, true).await?;
        let position = Coordinates::new(12.9716 + 0.002 * (i as f64 + 1.0), 77.5946);
        service
            .set_responder_position(&id, lifeline::model::LocationSample::now(position))
            .await?;

        let session =
            Session::open(id.clone(), Role::Responder, transport.clone(), ChannelConfig::default())
                .await?;
        let (toasts, _toast_task) = ToastManager::spawn(ToastConfig::default());
        let (feed, _feed_task) = ResponderFeed::spawn(
            id,
            name,
            position,
            service.clone() as Arc<dyn AlertService>,
            session.channel(),
            Some(toasts),
            ResponderConfig {
                poll_interval_ms: 500,
                ..Default::default()
            },
        );
        feed.go_on_duty().await?;
        feeds.push(feed);
        sessions.push(session);
    }

    info!("pressing the SOS button");
    sos.trigger().await?;

    let mut view = sos.view();
    let alert_id = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = view.borrow().clone();
            if snapshot.phase == SosPhase::Active {
                return Ok::<_, eyre::Report>(snapshot.alert_id);
            }
            view.changed().await?;
        }
    })
    .await
    .map_err(|_| eyre!("alert never became active"))??
    .ok_or_else(|| eyre!("active alert has no id"))?;
    info!(%alert_id, "alert is live, responders racing to accept");

    // Every responder tries; exactly one wins.
    let mut winners = 0;
    for (i, feed) in feeds.iter().enumerate() {
        // Wait until this feed has seen the alert.
        let mut alerts = feed.alerts();
        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if !alerts.borrow().is_empty() {
                    return;
                }
                if alerts.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        if seen.is_err() {
            continue;
        }

        match feed.accept(&alert_id, Some(5 + i as u32)).await? {
            AcceptOutcome::Accepted => {
                info!(responder = i, "accept won");
                winners += 1;
            }
            AcceptOutcome::Lost => info!(responder = i, "accept lost"),
        }
    }
    if winners != 1 {
        return Err(eyre!("expected exactly one winner, got {winners}"));
    }

    // Let location stream for a bit while the requester moves.
    for _ in 0..5 {
        source.drift(0.0005);
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    info!("requester marks the alert resolved");
    sos.resolve(Some("Responder arrived, all safe".to_string()))
        .await?;

    let snapshot = service.get(&alert_id).await?;
    info!(
        status = %snapshot.status,
        samples = snapshot.history.len(),
        response_time_secs = ?snapshot.response_time_secs,
        "simulation complete"
    );

    for feed in &feeds {
        let _ = feed.shutdown().await;
    }
    for session in &sessions {
        session.close().await;
    }
    requester.close().await;
    Ok(())
}
