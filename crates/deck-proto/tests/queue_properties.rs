mod common;

use common::fixtures::{ids, tracks};
use deck_proto::queue::{Advance, Queue, QueueError, Removal, RepeatMode};

#[test]
fn set_places_cursor_on_start_index_for_every_valid_index() {
    for len in 1..=6 {
        let list = tracks(len);
        for start in 0..len {
            let mut q = Queue::new();
            q.set(list.clone(), start).expect("non-empty set should succeed");
            assert_eq!(q.cursor(), Some(start));
            assert_eq!(q.current().map(|t| t.id.as_str()), Some(list[start].id.as_str()));
        }
    }
}

#[test]
fn set_empty_is_rejected_and_state_preserved() {
    let mut q = Queue::new();
    q.set(tracks(3), 2).unwrap();
    let before = ids(q.tracks());

    assert_eq!(q.set(Vec::new(), 0), Err(QueueError::EmptyInput));
    assert_eq!(ids(q.tracks()), before);
    assert_eq!(q.cursor(), Some(2));
}

#[test]
fn repeat_one_advance_is_stable_across_many_calls() {
    let mut q = Queue::new();
    q.set(tracks(4), 1).unwrap();
    for _ in 0..10 {
        assert_eq!(q.advance(RepeatMode::One), Advance::Restart);
    }
    assert_eq!(q.cursor(), Some(1));
}

#[test]
fn removing_sole_current_entry_matches_exhausted_advance() {
    let mut removed = Queue::new();
    removed.set(tracks(1), 0).unwrap();
    let (_, outcome) = removed.remove_at(0).unwrap();

    let mut advanced = Queue::new();
    advanced.set(tracks(1), 0).unwrap();
    let step = advanced.advance(RepeatMode::Off);

    assert_eq!(outcome, Removal::Exhausted);
    assert_eq!(step, Advance::Exhausted);
}

#[test]
fn retreat_walks_backwards_and_wraps() {
    let mut q = Queue::new();
    q.set(tracks(3), 0).unwrap();
    let visited: Vec<usize> = (0..4).filter_map(|_| q.retreat()).collect();
    assert_eq!(visited, vec![2, 1, 0, 2]);
}

#[test]
fn removal_before_cursor_preserves_current_identity() {
    let mut q = Queue::new();
    q.set(tracks(5), 3).unwrap();
    let current = q.current().unwrap().id.clone();
    for _ in 0..3 {
        q.remove_at(0).unwrap();
        assert_eq!(q.current().unwrap().id, current);
    }
    assert_eq!(q.cursor(), Some(0));
}
