//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use event_transit::engine::{AttachmentId, EventId, EventSystem, StationId, WaitMode};
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll `condition` until it holds, panicking after [`test_timeout`]
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + test_timeout();
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Wait until no conductor has work left and every event is accounted
/// for exactly once
pub fn wait_settled(system: &EventSystem) {
    wait_until("routing to settle", || {
        system.stations().iter().all(|s| s.output().is_empty()) && system.census().is_settled()
    });
}

/// Wait until a station's input holds `depth` events
pub fn wait_input(system: &EventSystem, station: StationId, depth: usize) {
    let station = system.station(station).expect("station exists");
    wait_until(&format!("{} events in '{}'", depth, station.name()), || {
        station.input().len() == depth
    });
}

/// Collect `count` events for an attachment, waiting as needed
pub fn get_exactly(system: &EventSystem, attachment: AttachmentId, count: usize) -> Vec<EventId> {
    let mut events = Vec::new();
    let deadline = Instant::now() + test_timeout();
    while events.len() < count {
        assert!(Instant::now() < deadline, "timed out collecting {} events", count);
        if let Ok(mut got) = system.get_events(
            attachment,
            WaitMode::Timed(Duration::from_millis(50)),
            count - events.len(),
        ) {
            events.append(&mut got);
        }
    }
    events
}
