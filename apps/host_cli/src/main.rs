use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use host_core::{
    config::{load_settings, HostSettings, DEFAULT_SETTINGS_FILE},
    ItemHandle, ItemHost, ReadinessSignals, RefreshReport, RegistrationEvent, SessionHandle,
};
use serde::Serialize;
use shared::{
    domain::{ItemId, Outcome, Session, StatusEntry},
    protocol::HostEvent,
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod fixture;

use fixture::{Fixture, FixtureContent, FixtureController, FixtureItem};

/// Runs a JSON fixture through an item host and prints what it derived.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    fixture: PathBuf,
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
}

#[derive(Debug, Serialize)]
struct RunReport {
    refresh: RefreshReport,
    sessions: Vec<Session>,
    status: Vec<StatusEntry>,
    outcomes: Vec<Outcome>,
    decorations: Vec<ItemId>,
    events: Vec<HostEvent>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let fixture = fixture::load(&args.fixture)?;
    let report = run(fixture, settings).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn run(fixture: Fixture, settings: HostSettings) -> Result<RunReport> {
    let content = Arc::new(FixtureContent::new(
        fixture.items.iter().map(FixtureItem::new).collect(),
    ));
    let readiness = Arc::new(ReadinessSignals::new());
    let host = ItemHost::with_settings(readiness.clone(), content.clone(), settings);

    let mut stream = BroadcastStream::new(host.subscribe_events());
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    info!(?event, "host event");
                    events.push(event);
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "host event stream lagged");
                }
            }
        }
        events
    });

    host.mount();
    for spec in fixture.items.iter().filter(|spec| spec.announce) {
        if let Some(item) = content.item(&spec.id) {
            let handle: Arc<dyn ItemHandle> = item.clone();
            host.handle_registration(RegistrationEvent::new(spec.id.as_str(), handle))?;
        }
    }
    let item_types: BTreeSet<_> = fixture.items.iter().map(|spec| &spec.item_type).collect();
    for item_type in item_types {
        readiness.mark_ready(item_type.clone());
    }

    host.set_controller(Arc::new(FixtureController::new(
        fixture.models,
        fixture.outcomes,
    )))
    .await?;
    host.set_environment(fixture.environment).await?;
    if !fixture.decorations.is_empty() {
        let located = host.declare_item_models(fixture.decorations).await;
        info!(located, "decorative elements bound");
    }
    let settled = host.set_sessions(fixture.sessions).await?;

    for scripted in fixture.events {
        match content.item(&scripted.id) {
            Some(item) => {
                item.emit(scripted.event);
            }
            None => warn!(id = %scripted.id, "scripted event for an item not in content"),
        }
    }

    let report = RunReport {
        refresh: settled.refresh,
        sessions: host
            .sessions()
            .unwrap_or_default()
            .iter()
            .map(SessionHandle::snapshot)
            .collect(),
        status: host.status().await?,
        outcomes: host.outcomes().await?,
        decorations: host.declared_elements(),
        events: Vec::new(),
    };

    // Every event sender lives in the host and the listeners its items hold.
    drop(host);
    drop(content);
    let events = collector.await?;

    Ok(RunReport { events, ..report })
}
