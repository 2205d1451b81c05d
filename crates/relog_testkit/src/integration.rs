//! Full-stack integration tests, driven through the public API only.

use crate::fixtures::{event, fragment, payload_for, store_range, TempLog};
use proptest::prelude::*;
use relog_codec::ReplEvent;
use relog_core::{CoreError, FindOutcome};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn multiple_readers_tail_independently() {
    let fixture = TempLog::new().with_read_timeout(Duration::from_secs(5));
    let log = Arc::new(fixture.open().unwrap());

    const LAST: i64 = 20;

    let mut handles = Vec::new();
    for _ in 0..3 {
        let log = Arc::clone(&log);
        let reader = log.connect();
        handles.push(std::thread::spawn(move || {
            let mut seen = Vec::new();
            for seqno in 1..=LAST {
                match log.find(reader, seqno, 0).unwrap() {
                    FindOutcome::Found(event) => {
                        assert_eq!(event.payload, payload_for(seqno, 0));
                        seen.push(event.seqno);
                    }
                    other => panic!("reader expected event {seqno}, got {other:?}"),
                }
            }
            seen
        }));
    }

    // The writer trickles events in behind the readers.
    for seqno in 1..=LAST {
        log.store(&event(seqno), seqno == LAST).unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }

    for handle in handles {
        let seen = handle.join().unwrap();
        assert_eq!(seen, (1..=LAST).collect::<Vec<_>>());
    }
}

#[test]
fn observer_instance_tails_live_writer() {
    let fixture = TempLog::new().with_read_timeout(Duration::from_secs(5));
    let writer_log = Arc::new(fixture.open().unwrap());
    writer_log.store(&event(1), true).unwrap();

    // A second instance on the same directory fails to take the lock and
    // degrades to read-only, exactly like a replica process would.
    let observer = fixture.open().unwrap();
    assert!(!observer.writable());

    let reader = observer.connect();
    assert!(observer.find(reader, 1, 0).unwrap().found().is_some());

    // An event stored by the writer *after* the observer opened is visible
    // through the observer's tailing read.
    let tail = std::thread::spawn({
        let observer = fixture.open().unwrap();
        move || {
            let reader = observer.connect();
            observer.find(reader, 2, 0).unwrap().found()
        }
    });

    std::thread::sleep(Duration::from_millis(150));
    writer_log.store(&event(2), true).unwrap();

    let found = tail.join().unwrap().expect("observer must see the append");
    assert_eq!(found.seqno, 2);
}

#[test]
fn observer_follows_rotations_made_after_open() {
    let fixture = TempLog::new()
        .with_rotation_threshold(150)
        .with_read_timeout(Duration::from_secs(5));
    let writer_log = fixture.open().unwrap();
    writer_log.store(&event(1), true).unwrap();

    let observer = fixture.open_observer().unwrap();
    let reader = observer.connect();

    // These stores rotate into segments the observer's catalog has never
    // heard of; the rotation markers carry it across.
    store_range(&writer_log, 2..=8).unwrap();
    assert!(writer_log.segments().len() >= 2);

    for seqno in 1..=8 {
        let found = observer.find(reader, seqno, 0).unwrap().found();
        assert_eq!(found.map(|e| e.seqno), Some(seqno));
    }
}

#[test]
fn idle_cursor_reclamation_is_invisible_to_readers() {
    let fixture = TempLog::new().with_idle_lease_timeout(Duration::from_millis(50));
    let log = fixture.open().unwrap();
    store_range(&log, 1..=3).unwrap();

    let reader = log.connect();
    assert!(log.find(reader, 1, 0).unwrap().found().is_some());

    // Let the cursor expire, then nudge the table so it sweeps.
    std::thread::sleep(Duration::from_millis(100));
    let other = log.connect();
    assert!(log.find(other, 1, 0).unwrap().found().is_some());

    // The original reader transparently gets a fresh cursor.
    assert!(log.find(reader, 2, 0).unwrap().found().is_some());
}

#[test]
fn loaned_cursor_rejects_concurrent_use() {
    let fixture = TempLog::new().with_read_timeout(Duration::from_secs(2));
    let log = Arc::new(fixture.open().unwrap());
    store_range(&log, 1..=2).unwrap();

    let reader = log.connect();

    // Park a cursor, then send one thread into a long blocking find.
    assert!(log.find(reader, 1, 0).unwrap().found().is_some());
    let blocked = std::thread::spawn({
        let log = Arc::clone(&log);
        move || log.find(reader, 50, 0)
    });

    std::thread::sleep(Duration::from_millis(200));

    // The same client identity cannot borrow its cursor twice.
    assert!(matches!(
        log.find(reader, 2, 0),
        Err(CoreError::Misuse { .. })
    ));

    assert!(matches!(
        blocked.join().unwrap().unwrap(),
        FindOutcome::TimedOut
    ));
}

#[test]
fn retention_trims_old_segments_as_writer_rotates() {
    let fixture = TempLog::new()
        .with_rotation_threshold(120)
        .with_retention(Duration::from_millis(50));
    let log = fixture.open().unwrap();

    store_range(&log, 1..=4).unwrap();
    let segments_before = log.segments().len();
    assert!(segments_before >= 2);

    std::thread::sleep(Duration::from_millis(100));
    store_range(&log, 5..=12).unwrap();

    let min = log.min_seqno().unwrap();
    assert!(min > 1, "retention should have trimmed the oldest segments");
    log.validate().unwrap();

    let reader = log.connect();
    assert!(matches!(
        log.find(reader, 1, 0).unwrap(),
        FindOutcome::BelowHorizon
    ));
    assert!(log.find(reader, 12, 0).unwrap().found().is_some());
}

#[test]
fn fragmented_transactions_survive_restart_and_rotation() {
    let fixture = TempLog::new().with_rotation_threshold(200);
    {
        let log = fixture.open().unwrap();
        for seqno in 1..=4 {
            for fragno in 0..3u16 {
                log.store(&fragment(seqno, fragno, fragno == 2), false).unwrap();
            }
        }
        log.release();
    }

    let log = fixture.open().unwrap();
    assert_eq!(log.max_seqno(), Some(4));
    assert!(log.segments().len() >= 2);
    log.validate().unwrap();

    let reader = log.connect();
    for seqno in 1..=4 {
        for fragno in 0..3u16 {
            let found = log.find(reader, seqno, fragno).unwrap().found().unwrap();
            assert_eq!(found.payload, payload_for(seqno, fragno));
            assert_eq!(found.last_frag, fragno == 2);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn random_payloads_survive_restart(
        payloads in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..200),
            1..12,
        )
    ) {
        let fixture = TempLog::new().with_rotation_threshold(300);
        {
            let log = fixture.open().unwrap();
            for (i, payload) in payloads.iter().enumerate() {
                let seqno = i as i64 + 1;
                log.store(&ReplEvent::new(seqno, "prop", payload.clone()), false).unwrap();
            }
            log.release();
        }

        let log = fixture.open().unwrap();
        prop_assert_eq!(log.max_seqno(), Some(payloads.len() as i64));

        let reader = log.connect();
        for (i, payload) in payloads.iter().enumerate() {
            let seqno = i as i64 + 1;
            let found = log.find(reader, seqno, 0).unwrap().found().unwrap();
            prop_assert_eq!(&found.payload, payload);
        }
    }
}
