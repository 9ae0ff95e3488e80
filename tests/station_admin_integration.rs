//! Integration tests for station and attachment administration
//!
//! These tests validate:
//! - Station creation, lookup, limits and removal
//! - Positions in the main list and in parallel groups
//! - Attachment limits and station status transitions
//! - Wake-ups of blocked attachments
//! - Event groups and rate-limited snapshots

mod common;

use common::builders::{StationBuilder, SystemBuilder};
use common::{wait_input, wait_until};
use event_transit::config::{BlockMode, StationConfig};
use event_transit::engine::{ParallelPosition, Position, StationId, StationStatus, WaitMode};
use event_transit::EngineError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ==================== Creation and Removal ====================

#[test]
fn test_create_is_idempotent_for_equal_config() {
    let system = SystemBuilder::new(10).start();
    let first = StationBuilder::new("S1").create(&system);
    let again = system
        .create_station("S1", StationConfig::default(), Position::End, ParallelPosition::End)
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(system.stations().len(), 2);

    let different = system.create_station(
        "S1",
        StationConfig::default().with_prescale(2),
        Position::End,
        ParallelPosition::End,
    );
    assert!(matches!(different, Err(EngineError::Exists(_))));
}

#[test]
fn test_reserved_and_empty_names_rejected() {
    let system = SystemBuilder::new(10).start();
    for name in ["", "GRAND_CENTRAL"] {
        let result = system.create_station(
            name,
            StationConfig::default(),
            Position::End,
            ParallelPosition::End,
        );
        assert!(matches!(result, Err(EngineError::Configuration(_))), "{:?}", name);
    }
}

#[test]
fn test_station_limit() {
    let system = SystemBuilder::new(10).stations_max(3).start();
    StationBuilder::new("a").create(&system);
    StationBuilder::new("b").create(&system);
    let result = system.create_station(
        "c",
        StationConfig::default(),
        Position::End,
        ParallelPosition::End,
    );
    assert!(matches!(result, Err(EngineError::TooMany(_))));
}

#[test]
fn test_remove_requires_no_attachments() {
    let system = SystemBuilder::new(10).start();
    let s1 = StationBuilder::new("S1").create(&system);
    let att = system.attach(s1, "client").unwrap();

    match system.remove_station(s1) {
        Err(EngineError::HasAttachments { station, count }) => {
            assert_eq!(station, s1);
            assert_eq!(count, 1);
        }
        other => panic!("expected HasAttachments, got {:?}", other),
    }

    system.detach(att).unwrap();
    system.remove_station(s1).unwrap();
    assert!(matches!(system.station(s1), Err(EngineError::NotFound(_))));
    assert!(matches!(system.remove_station(s1), Err(EngineError::NotFound(_))));
}

#[test]
fn test_grand_central_is_fixed() {
    let system = SystemBuilder::new(10).start();
    let gc = StationId::GRAND_CENTRAL;
    assert!(matches!(system.remove_station(gc), Err(EngineError::Configuration(_))));
    assert!(matches!(
        system.set_station_position(gc, Position::At(1), ParallelPosition::End),
        Err(EngineError::Configuration(_))
    ));
    assert!(matches!(system.set_station_cue(gc, 5), Err(EngineError::Configuration(_))));
}

#[test]
fn test_removed_station_returns_its_events() {
    let system = SystemBuilder::new(10).start();
    let s1 = StationBuilder::new("S1").create(&system);
    let consumer = system.attach(s1, "consumer").unwrap();
    let producer = system.attach(StationId::GRAND_CENTRAL, "producer").unwrap();

    let events = system.new_events(producer, WaitMode::Async, 4, 8, None).unwrap();
    system.put_events(producer, &events).unwrap();
    wait_input(&system, s1, 4);

    // Idle flush sends them on; removal leaves nothing behind either way
    system.detach(consumer).unwrap();
    system.remove_station(s1).unwrap();
    wait_input(&system, StationId::GRAND_CENTRAL, 10);
}

#[test]
fn test_station_ids_are_reused() {
    let system = SystemBuilder::new(10).start();
    let a = StationBuilder::new("a").create(&system);
    let b = StationBuilder::new("b").create(&system);
    assert_eq!(a, StationId(1));
    assert_eq!(b, StationId(2));

    system.remove_station(a).unwrap();
    let c = StationBuilder::new("c").create(&system);
    assert_eq!(c, StationId(1));
    assert_eq!(system.station_id("c").unwrap(), c);
    assert!(matches!(system.station_id("a"), Err(EngineError::NotFound(_))));
}

// ==================== Positions ====================

#[test]
fn test_positions_and_moves() {
    let system = SystemBuilder::new(10).start();
    let a = StationBuilder::new("a").create(&system);
    let b = StationBuilder::new("b").create(&system);
    let c = StationBuilder::new("c").at(1).create(&system);

    assert_eq!(system.station_position(c).unwrap(), 1);
    assert_eq!(system.station_position(a).unwrap(), 2);
    assert_eq!(system.station_position(b).unwrap(), 3);

    system
        .set_station_position(b, Position::At(1), ParallelPosition::End)
        .unwrap();
    assert_eq!(system.station_position(b).unwrap(), 1);
    assert_eq!(system.station_position(c).unwrap(), 2);
    assert_eq!(system.station_position(a).unwrap(), 3);

    // Head slot belongs to GRAND_CENTRAL; the failed move changes nothing
    assert!(matches!(
        system.set_station_position(a, Position::At(0), ParallelPosition::End),
        Err(EngineError::Configuration(_))
    ));
    assert_eq!(system.station_position(a).unwrap(), 3);
}

#[test]
fn test_parallel_positions() {
    let system = SystemBuilder::new(10).start();
    let head = StationBuilder::new("head").parallel().create(&system);
    let second = StationBuilder::new("second").parallel().at(1).create(&system);
    let first = StationBuilder::new("first")
        .parallel()
        .at(1)
        .sibling_at(1)
        .create(&system);

    for id in [head, second, first] {
        assert_eq!(system.station_position(id).unwrap(), 1);
    }
    assert_eq!(system.station_parallel_position(head).unwrap(), 0);
    assert_eq!(system.station_parallel_position(first).unwrap(), 1);
    assert_eq!(system.station_parallel_position(second).unwrap(), 2);

    // Removing the head promotes the next member
    system.remove_station(head).unwrap();
    assert_eq!(system.station_parallel_position(first).unwrap(), 0);
    assert_eq!(system.station_position(first).unwrap(), 1);
}

#[test]
fn test_incompatible_sibling_rejected() {
    let system = SystemBuilder::new(10).start();
    StationBuilder::new("rr").round_robin().create(&system);

    let plain = system.create_station(
        "plain",
        StationBuilder::new("plain").parallel().config(),
        Position::At(1),
        ParallelPosition::End,
    );
    assert!(matches!(plain, Err(EngineError::Configuration(_))));

    let head_slot = system.create_station(
        "late-head",
        StationBuilder::new("late-head").round_robin().config(),
        Position::At(1),
        ParallelPosition::At(0),
    );
    assert!(matches!(head_slot, Err(EngineError::Configuration(_))));
    assert_eq!(system.stations().len(), 2);
}

#[test]
fn test_reconfigure_checks_siblings() {
    let system = SystemBuilder::new(10).start();
    let a = StationBuilder::new("a").round_robin().create(&system);
    StationBuilder::new("b").round_robin().at(1).create(&system);

    // Round robin stations must stay blocking
    assert!(matches!(
        system.set_station_block_mode(a, BlockMode::NonBlocking),
        Err(EngineError::Configuration(_))
    ));

    let serial = StationBuilder::new("serial").create(&system);
    system.set_station_prescale(serial, 4).unwrap();
    system.set_station_cue(serial, 1000).unwrap();
    let config = system.station(serial).unwrap().config();
    assert_eq!(config.prescale, 4);
    assert_eq!(config.cue, 10, "cue is clamped to the pool size");
}

// ==================== Attachments ====================

#[test]
fn test_status_follows_attachments() {
    let system = SystemBuilder::new(10).start();
    let s1 = StationBuilder::new("S1").create(&system);
    let station = system.station(s1).unwrap();
    assert_eq!(station.status(), StationStatus::Idle);

    let a = system.attach(s1, "a").unwrap();
    let b = system.attach(s1, "b").unwrap();
    assert_eq!(station.status(), StationStatus::Active);

    system.detach(a).unwrap();
    assert_eq!(station.status(), StationStatus::Active);
    system.detach(b).unwrap();
    assert_eq!(station.status(), StationStatus::Idle);
}

#[test]
fn test_attachment_limits() {
    let system = SystemBuilder::new(10).attachments_max(2).start();
    let single = StationBuilder::new("single").user_mode(1).create(&system);

    let first = system.attach(single, "first").unwrap();
    assert!(matches!(system.attach(single, "second"), Err(EngineError::TooMany(_))));

    system.attach(StationId::GRAND_CENTRAL, "producer").unwrap();
    assert!(matches!(
        system.attach(StationId::GRAND_CENTRAL, "third"),
        Err(EngineError::TooMany(_))
    ));

    // Ids are reused after a detach
    system.detach(first).unwrap();
    assert_eq!(system.attach(single, "again").unwrap(), first);
    assert_eq!(system.attachment_count(), 2);
}

#[test]
fn test_unknown_attachment() {
    let system = SystemBuilder::new(10).start();
    let att = system.attach(StationId::GRAND_CENTRAL, "producer").unwrap();
    let events = system.new_events(att, WaitMode::Async, 2, 8, None).unwrap();
    system.detach(att).unwrap();

    assert!(matches!(system.detach(att), Err(EngineError::NotFound(_))));
    assert!(matches!(system.put_events(att, &events), Err(EngineError::NotFound(_))));
    assert_eq!(system.grand_central().input().len(), 10);
}

#[test]
fn test_put_of_foreign_event_rejected() {
    let system = SystemBuilder::new(10).start();
    let a = system.attach(StationId::GRAND_CENTRAL, "a").unwrap();
    let b = system.attach(StationId::GRAND_CENTRAL, "b").unwrap();
    let mine = system.new_events(a, WaitMode::Async, 2, 8, None).unwrap();
    let theirs = system.new_events(b, WaitMode::Async, 1, 8, None).unwrap();

    let mixed = [mine[0], theirs[0]];
    assert!(matches!(
        system.put_events(a, &mixed),
        Err(EngineError::NotOwner { .. })
    ));
    // All or nothing: the owned event is still held
    system.with_event(a, mine[0], |_| ()).unwrap();

    assert!(matches!(
        system.dump_events(a, &[mine[1], mine[1]]),
        Err(EngineError::Configuration(_))
    ));
    system.dump_events(a, &mine).unwrap();
    assert_eq!(system.attachment(a).unwrap().counters().dumped, 2);
}

// ==================== Wake-ups ====================

#[test]
fn test_wake_attachment_interrupts_sleep() {
    let system = Arc::new(SystemBuilder::new(4).start());
    let s1 = StationBuilder::new("S1").create(&system);
    let att = system.attach(s1, "sleeper").unwrap();

    let sleeper = {
        let system = system.clone();
        thread::spawn(move || system.get_events(att, WaitMode::Sleep, 1))
    };

    let token_waiting = || system.attachment(att).unwrap().token().is_waiting();
    wait_until("sleeper to block", token_waiting);
    system.wake_attachment(att).unwrap();

    let result = sleeper.join().unwrap();
    assert!(matches!(result, Err(EngineError::WakeUp)));
}

#[test]
fn test_wake_all_attachments() {
    let system = Arc::new(SystemBuilder::new(4).start());
    let s1 = StationBuilder::new("S1").create(&system);

    let sleepers: Vec<_> = (0..3)
        .map(|i| {
            let att = system.attach(s1, format!("sleeper-{}", i)).unwrap();
            let system = system.clone();
            (att, thread::spawn(move || system.get_events(att, WaitMode::Sleep, 1)))
        })
        .collect();

    wait_until("all sleepers to block", || {
        sleepers
            .iter()
            .all(|(att, _)| system.attachment(*att).unwrap().token().is_waiting())
    });
    system.wake_all_attachments(s1).unwrap();

    for (_, handle) in sleepers {
        assert!(matches!(handle.join().unwrap(), Err(EngineError::WakeUp)));
    }
}

#[test]
fn test_detach_interrupts_blocked_get() {
    let system = Arc::new(SystemBuilder::new(4).start());
    let s1 = StationBuilder::new("S1").create(&system);
    let att = system.attach(s1, "leaving").unwrap();
    let _stay = system.attach(s1, "staying").unwrap();

    let sleeper = {
        let system = system.clone();
        thread::spawn(move || system.get_events(att, WaitMode::Sleep, 1))
    };
    wait_until("sleeper to block", || {
        system.attachment(att).unwrap().token().is_waiting()
    });

    system.detach(att).unwrap();
    assert!(sleeper.join().unwrap().is_err());
    assert_eq!(system.census().owned, 0);
}

#[test]
fn test_get_started_after_wake_all_is_not_woken() {
    let system = Arc::new(SystemBuilder::new(4).start());
    let s1 = StationBuilder::new("S1").create(&system);
    let first = system.attach(s1, "first").unwrap();
    let later = system.attach(s1, "later").unwrap();

    let sleeper = {
        let system = system.clone();
        thread::spawn(move || system.get_events(first, WaitMode::Sleep, 1))
    };
    wait_until("sleeper to block", || {
        system.attachment(first).unwrap().token().is_waiting()
    });
    system.wake_all_attachments(s1).unwrap();

    let result = system.get_events(later, WaitMode::Timed(Duration::from_millis(30)), 1);
    assert!(matches!(result, Err(EngineError::Timeout)));
    assert!(matches!(sleeper.join().unwrap(), Err(EngineError::WakeUp)));
}

#[test]
fn test_sleep_session_keeps_wake_between_timed_gets() {
    let system = SystemBuilder::new(4).start();
    let s1 = StationBuilder::new("S1").create(&system);
    let att = system.attach(s1, "remote").unwrap();
    let short = WaitMode::Timed(Duration::from_millis(10));

    let session = system.sleep_session(att).unwrap();
    assert!(matches!(system.get_events(att, short, 1), Err(EngineError::Timeout)));
    system.wake_attachment(att).unwrap();
    assert!(matches!(system.get_events(att, short, 1), Err(EngineError::WakeUp)));
    drop(session);

    // Without a session a wake between calls is not kept
    system.wake_attachment(att).unwrap();
    assert!(matches!(system.get_events(att, short, 1), Err(EngineError::Timeout)));
}

#[test]
fn test_zero_count_returns_no_events() {
    let system = SystemBuilder::new(4).start();
    let s1 = StationBuilder::new("S1").create(&system);
    let producer = system.attach(StationId::GRAND_CENTRAL, "producer").unwrap();
    let consumer = system.attach(s1, "consumer").unwrap();

    assert!(system
        .new_events(producer, WaitMode::Sleep, 0, 8, None)
        .unwrap()
        .is_empty());
    assert!(system
        .new_events(producer, WaitMode::Timed(Duration::from_secs(5)), 0, 8, Some(1))
        .unwrap()
        .is_empty());
    assert!(system
        .get_events(consumer, WaitMode::Sleep, 0)
        .unwrap()
        .is_empty());
    assert!(system
        .get_group_events(consumer, WaitMode::Async, 0, 1)
        .unwrap()
        .is_empty());
    assert_eq!(system.grand_central().input().len(), 4);
    assert_eq!(system.attachment(producer).unwrap().counters().made, 0);
}

// ==================== Groups and Snapshots ====================

#[test]
fn test_new_events_by_group() {
    let system = SystemBuilder::new(10).groups(&[6, 4]).start();
    let att = system.attach(StationId::GRAND_CENTRAL, "producer").unwrap();

    let second = system
        .new_events(att, WaitMode::Async, 10, 8, Some(2))
        .unwrap();
    assert_eq!(second.len(), 4);
    for &id in &second {
        assert_eq!(system.with_event(att, id, |ev| ev.group()).unwrap(), 2);
    }
    assert!(matches!(
        system.new_events(att, WaitMode::Async, 1, 8, Some(2)),
        Err(EngineError::Empty)
    ));

    for group in [0, 3] {
        assert!(matches!(
            system.new_events(att, WaitMode::Async, 1, 8, Some(group)),
            Err(EngineError::Configuration(_))
        ));
    }

    let first = system.new_events(att, WaitMode::Async, 10, 8, Some(1)).unwrap();
    assert_eq!(first.len(), 6);
}

#[test]
fn test_get_events_by_group() {
    let system = SystemBuilder::new(10).groups(&[6, 4]).start();
    let s1 = StationBuilder::new("S1").create(&system);
    let producer = system.attach(StationId::GRAND_CENTRAL, "producer").unwrap();
    let consumer = system.attach(s1, "consumer").unwrap();

    let events = system.new_events(producer, WaitMode::Async, 10, 8, None).unwrap();
    system.put_events(producer, &events).unwrap();
    wait_input(&system, s1, 10);

    let second = system
        .get_group_events(consumer, WaitMode::Async, 10, 2)
        .unwrap();
    assert_eq!(second.len(), 4);
    assert_eq!(system.station(s1).unwrap().input().len(), 6);
    assert!(matches!(
        system.get_group_events(consumer, WaitMode::Async, 1, 2),
        Err(EngineError::Empty)
    ));
    assert!(matches!(
        system.get_group_events(consumer, WaitMode::Async, 1, 9),
        Err(EngineError::Configuration(_))
    ));
}

#[test]
fn test_snapshot_is_rate_limited() {
    let system = SystemBuilder::new(10).start();
    let s1 = StationBuilder::new("S1").create(&system);
    system.attach(s1, "client").unwrap();

    let first = system.snapshot();
    let second = system.snapshot();
    assert!(Arc::ptr_eq(&first, &second));

    let station = first.station("S1").unwrap();
    assert_eq!(station.status, StationStatus::Active);
    assert_eq!(station.attachments, 1);
    assert_eq!(first.attachments.len(), 1);
    assert_eq!(first.census.free, 10);
    assert!(first.to_json().unwrap().contains("GRAND_CENTRAL"));
}
