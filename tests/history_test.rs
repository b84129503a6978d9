use proptest::prelude::*;
use tracker::history::{HistoryPhase, SnapshotHistory};

proptest! {
    #[test]
    fn undo_then_redo_walks_back_to_the_tip(states in proptest::collection::vec(any::<Vec<u8>>(), 1..20)) {
        let mut history: SnapshotHistory<Vec<u8>> = SnapshotHistory::new();
        for state in &states {
            history.record(state).unwrap();
        }

        for expected in states.iter().rev().skip(1) {
            let got = history.undo().unwrap();
            prop_assert_eq!(got.as_ref(), Some(expected));
        }
        prop_assert!(!history.can_undo());
        prop_assert_eq!(history.undo().unwrap(), None);

        for expected in states.iter().skip(1) {
            let got = history.redo().unwrap();
            prop_assert_eq!(got.as_ref(), Some(expected));
        }
        prop_assert_eq!(history.phase(), HistoryPhase::AtTip);
        prop_assert_eq!(history.redo().unwrap(), None);
    }

    #[test]
    fn never_holds_more_than_capacity(count in 0usize..120, capacity in 1usize..60) {
        let mut history: SnapshotHistory<usize> = SnapshotHistory::with_capacity(capacity);
        for n in 0..count {
            history.record(&n).unwrap();
        }
        prop_assert_eq!(history.len(), count.min(capacity));
        if count > 0 {
            prop_assert_eq!(history.cursor(), Some(history.len() - 1));
        }
    }
}

#[test]
fn recording_after_undo_drops_the_redo_future() {
    println!("\n====== Testing redo truncation ======");
    let mut history: SnapshotHistory<String> = SnapshotHistory::new();
    for state in ["a", "b", "c"] {
        history.record(&state.to_string()).unwrap();
    }
    assert_eq!(history.undo().unwrap().as_deref(), Some("b"));
    assert_eq!(history.phase(), HistoryPhase::Mid);

    history.record(&"d".to_string()).unwrap();
    assert!(!history.can_redo());
    assert_eq!(history.len(), 3);
    assert_eq!(history.undo().unwrap().as_deref(), Some("b"));
    assert_eq!(history.undo().unwrap().as_deref(), Some("a"));
    println!("✓ Snapshot 'c' is gone once a new state is recorded mid-history");
}

#[test]
fn the_fifty_first_snapshot_evicts_the_oldest() {
    let mut history: SnapshotHistory<u32> = SnapshotHistory::new();
    for n in 0..51 {
        history.record(&n).unwrap();
    }
    assert_eq!(history.capacity(), 50);
    assert_eq!(history.len(), 50);
    assert_eq!(history.snapshots().next(), Some("1"));

    let mut oldest = None;
    while let Some(state) = history.undo().unwrap() {
        oldest = Some(state);
    }
    assert_eq!(oldest, Some(1));
    println!("✓ Capacity 50 keeps snapshots 1..=50");
}

#[test]
fn empty_history_has_nothing_to_do() {
    let mut history: SnapshotHistory<Vec<String>> = SnapshotHistory::new();
    assert_eq!(history.phase(), HistoryPhase::Empty);
    assert_eq!(history.cursor(), None);
    assert_eq!(history.undo().unwrap(), None);
    assert_eq!(history.redo().unwrap(), None);

    history.record(&vec!["only".to_string()]).unwrap();
    assert_eq!(history.phase(), HistoryPhase::AtTip);
    assert!(!history.can_undo());
    history.clear();
    assert!(history.is_empty());
}
