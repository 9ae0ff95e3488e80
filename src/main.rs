//! event-transit - Main Entry Point
//!
//! Starts an event system from a config file, optionally drives it with a
//! demo load, and logs periodic snapshots until the run ends.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use event_transit::{
    config::SystemConfig,
    engine::{AttachmentId, EventSystem, Priority, StationId, WaitMode},
    monitor::{Monitor, MonitorMessage},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Budget of a single blocking get in the demo threads
const DEMO_WAIT: Duration = Duration::from_millis(100);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    tracing::info!("Starting event-transit");

    let config = match &cli.config {
        Some(path) => SystemConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SystemConfig::load_or_default(None),
    };

    let system = Arc::new(EventSystem::start(config).context("Failed to start event system")?);
    let (monitor_handle, bridge) = Monitor::spawn(system.clone(), cli.monitor_interval())?;

    let running = Arc::new(AtomicBool::new(true));
    let workers = if cli.demo {
        spawn_demo(&system, &running)?
    } else {
        Vec::new()
    };

    let started = Instant::now();
    loop {
        if cli.run_for().is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        match bridge.recv_timeout(Duration::from_millis(200)) {
            Some(MonitorMessage::Snapshot(snapshot)) => {
                let census = snapshot.census;
                tracing::info!(
                    "{} stations, {} attachments; events free {} queued {} owned {} in transit {}",
                    snapshot.stations.len(),
                    snapshot.attachments.len(),
                    census.free,
                    census.queued,
                    census.owned,
                    census.in_transit
                );
                for station in &snapshot.stations {
                    tracing::debug!(
                        "  [{}.{}] {} ({}): in {} / out {}, {} attachment(s)",
                        station.position,
                        station.parallel_position,
                        station.name,
                        station.status,
                        station.input_depth,
                        station.output_depth,
                        station.attachments
                    );
                }
            }
            Some(MonitorMessage::Stopped) => break,
            None => {}
        }
    }

    tracing::info!("Shutting down...");
    running.store(false, Ordering::Release);
    for worker in workers {
        if worker.join().is_err() {
            tracing::warn!("Demo thread panicked");
        }
    }
    bridge.shutdown();
    if monitor_handle.join().is_err() {
        tracing::warn!("Monitor thread panicked");
    }
    system.shutdown();

    Ok(())
}

/// Console logging plus an optional daily rotated file
fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,event_transit=debug"));

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "event-transit.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// One producer on GRAND_CENTRAL and one consumer per station
fn spawn_demo(
    system: &Arc<EventSystem>,
    running: &Arc<AtomicBool>,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut workers = Vec::new();

    let producer = system.attach(StationId::GRAND_CENTRAL, "demo-producer")?;
    workers.push(spawn_worker("demo-producer", system, running, move |system| {
        produce(system, producer)
    })?);

    for station in system.stations().iter().filter(|s| !s.is_grand_central()) {
        let label = format!("demo-{}", station.name());
        let consumer = system.attach(station.id(), label.clone())?;
        workers.push(spawn_worker(&label, system, running, move |system| {
            consume(system, consumer)
        })?);
    }

    tracing::info!("Demo load running with {} thread(s)", workers.len());
    Ok(workers)
}

fn spawn_worker<F>(
    name: &str,
    system: &Arc<EventSystem>,
    running: &Arc<AtomicBool>,
    mut step: F,
) -> anyhow::Result<JoinHandle<()>>
where
    F: FnMut(&EventSystem) -> event_transit::Result<()> + Send + 'static,
{
    let system = system.clone();
    let running = running.clone();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            while running.load(Ordering::Acquire) {
                match step(&system) {
                    Ok(()) => {}
                    Err(e) if e.is_wait_outcome() => {}
                    Err(e) => {
                        tracing::warn!("{}", e);
                        break;
                    }
                }
            }
        })
        .with_context(|| format!("Failed to spawn {}", name))?;
    Ok(handle)
}

fn produce(system: &EventSystem, attachment: AttachmentId) -> event_transit::Result<()> {
    let events = system.new_events(attachment, WaitMode::Timed(DEMO_WAIT), 4, 64, None)?;
    for (i, &id) in events.iter().enumerate() {
        system.with_event_mut(attachment, id, |event| {
            let stamp = chrono::Utc::now().timestamp_millis().to_le_bytes();
            let _ = event.write(&stamp);
            event.set_control([i as i32 % 4, 1 << (i % 3), -1, -1, -1, -1]);
            if i == 0 {
                event.set_priority(Priority::High);
            }
        })?;
    }
    system.put_events(attachment, &events)
}

fn consume(system: &EventSystem, attachment: AttachmentId) -> event_transit::Result<()> {
    let events = system.get_events(attachment, WaitMode::Timed(DEMO_WAIT), 8)?;
    system.put_events(attachment, &events)
}
