use super::*;
use crate::store::StoreError;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// RECORDING STORE
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Write {
    Weeks(Vec<Week>),
    Put(Participant),
    Remove(Uuid),
    Clear,
}

#[derive(Default)]
struct RecordingStore {
    writes: Mutex<Vec<Write>>,
    failing: AtomicBool,
}

impl RecordingStore {
    fn recorded(&self) -> Vec<Write> {
        self.writes.lock().expect("mock mutex should lock").clone()
    }

    fn reset(&self) {
        self.writes.lock().expect("mock mutex should lock").clear();
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, write: Write) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.writes.lock().expect("mock mutex should lock").push(write);
        Ok(())
    }
}

impl StoreWrite for RecordingStore {
    fn set_weeks(&self, weeks: &[Week]) -> Result<(), StoreError> {
        self.record(Write::Weeks(weeks.to_vec()))
    }

    fn put_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        self.record(Write::Put(participant.clone()))
    }

    fn remove_participant(&self, id: Uuid) -> Result<(), StoreError> {
        self.record(Write::Remove(id))
    }

    fn clear_participants(&self) -> Result<(), StoreError> {
        self.record(Write::Clear)
    }
}

fn board_with_store() -> (Board, Arc<RecordingStore>) {
    let store = Arc::new(RecordingStore::default());
    (Board::new(store.clone()), store)
}

/// Board with one added participant and a clean write log.
fn board_with_participant(name: &str) -> (Board, Arc<RecordingStore>, Uuid) {
    let (mut board, store) = board_with_store();
    board.new_participant_name = name.into();
    board.add_participant();
    store.reset();
    let id = board.participants[0].id;
    (board, store, id)
}

// =============================================================================
// INITIAL STATE
// =============================================================================

#[test]
fn new_board_starts_from_defaults() {
    let (board, store) = board_with_store();
    assert_eq!(board.weeks, default_weeks());
    assert!(board.participants.is_empty());
    assert!(board.new_participant_name.is_empty());
    assert!(board.editing_week_id.is_none());
    assert!(board.error.is_none());
    assert!(store.recorded().is_empty());
}

// =============================================================================
// TOGGLE
// =============================================================================

#[test]
fn toggle_flips_flag_and_persists_record() {
    let (mut board, store, id) = board_with_participant("You");

    board.toggle_availability(id, 2).unwrap();

    assert_eq!(
        board.participants[0].availability,
        vec![false, false, true, false]
    );
    let writes = store.recorded();
    assert_eq!(writes.len(), 1);
    let Write::Put(persisted) = &writes[0] else {
        panic!("expected a participant put");
    };
    assert_eq!(persisted.availability, vec![false, false, true, false]);
}

#[test]
fn double_toggle_restores_original_value() {
    let (mut board, _, id) = board_with_participant("You");

    board.toggle_availability(id, 1).unwrap();
    board.toggle_availability(id, 1).unwrap();

    assert_eq!(board.participants[0].availability, vec![false; 4]);
}

#[test]
fn toggle_out_of_range_index_rejected_without_write() {
    let (mut board, store, id) = board_with_participant("You");

    let result = board.toggle_availability(id, 4);
    assert!(matches!(
        result.unwrap_err(),
        BoardError::WeekIndexOutOfRange { index: 4, count: 4 }
    ));
    assert_eq!(board.participants[0].availability, vec![false; 4]);
    assert!(store.recorded().is_empty());
}

#[test]
fn toggle_unknown_participant_rejected() {
    let (mut board, store) = board_with_store();
    let result = board.toggle_availability(Uuid::new_v4(), 0);
    assert!(matches!(result.unwrap_err(), BoardError::UnknownParticipant(_)));
    assert!(store.recorded().is_empty());
}

#[test]
fn toggle_write_failure_keeps_flip_and_sets_banner() {
    let (mut board, store, id) = board_with_participant("You");
    store.set_failing(true);

    board.toggle_availability(id, 0).unwrap();

    // No rollback: the local flip stands even though persistence failed.
    assert!(board.participants[0].availability[0]);
    assert_eq!(board.error.as_deref(), Some(TOGGLE_ERROR));
}

// =============================================================================
// ADD
// =============================================================================

#[test]
fn add_participant_creates_all_false_record() {
    let (mut board, store) = board_with_store();
    board.new_participant_name = "  Alex  ".into();

    board.add_participant();

    assert_eq!(board.participants.len(), 1);
    assert_eq!(board.participants[0].name, "Alex");
    assert_eq!(board.participants[0].availability, vec![false; 4]);
    assert!(board.new_participant_name.is_empty());

    let writes = store.recorded();
    assert_eq!(writes.len(), 1);
    assert!(matches!(&writes[0], Write::Put(p) if p.name == "Alex"));
}

#[test]
fn add_participant_blank_name_is_noop() {
    let (mut board, store) = board_with_store();

    board.new_participant_name = String::new();
    board.add_participant();
    board.new_participant_name = "   ".into();
    board.add_participant();

    assert!(board.participants.is_empty());
    assert!(store.recorded().is_empty());
    assert_eq!(board.new_participant_name, "   ");
    assert!(board.error.is_none());
}

#[test]
fn add_participant_write_failure_keeps_input_and_sets_banner() {
    let (mut board, store) = board_with_store();
    store.set_failing(true);
    board.new_participant_name = "Alex".into();

    board.add_participant();

    assert_eq!(board.participants.len(), 1);
    assert_eq!(board.new_participant_name, "Alex");
    assert_eq!(board.error.as_deref(), Some(ADD_ERROR));
}

// =============================================================================
// REMOVE
// =============================================================================

#[test]
fn remove_participant_removes_exactly_one() {
    let (mut board, store, first) = board_with_participant("first");
    board.new_participant_name = "second".into();
    board.add_participant();
    store.reset();

    board.remove_participant(first);

    assert_eq!(board.participants.len(), 1);
    assert_eq!(board.participants[0].name, "second");
    assert_eq!(store.recorded(), vec![Write::Remove(first)]);
}

#[test]
fn remove_write_failure_sets_banner() {
    let (mut board, store, id) = board_with_participant("gone");
    store.set_failing(true);

    board.remove_participant(id);

    assert!(board.participants.is_empty());
    assert_eq!(board.error.as_deref(), Some(REMOVE_ERROR));
}

// =============================================================================
// WEEK LABEL EDITING
// =============================================================================

#[test]
fn edit_week_label_rewrites_full_sequence() {
    let (mut board, store) = board_with_store();

    board.start_editing_week(1);
    assert_eq!(board.editing_week_id, Some(1));
    assert_eq!(board.editing_label, "Jan 15-21");

    board.set_editing_label("Jan 16-22");
    board.save_week_label();

    assert_eq!(board.weeks[0].label, "Jan 16-22");
    assert_eq!(board.weeks[1].label, "Jan 22-28"); // others unchanged
    assert!(board.editing_week_id.is_none());
    assert!(board.editing_label.is_empty());

    let writes = store.recorded();
    assert_eq!(writes.len(), 1);
    let Write::Weeks(persisted) = &writes[0] else {
        panic!("expected a wholesale weeks write");
    };
    assert_eq!(persisted.len(), 4);
    assert_eq!(persisted[0].label, "Jan 16-22");
}

#[test]
fn save_blank_label_discards_edit_silently() {
    let (mut board, store) = board_with_store();

    board.start_editing_week(2);
    board.set_editing_label("   ");
    board.save_week_label();

    assert_eq!(board.weeks[1].label, "Jan 22-28");
    assert!(board.editing_week_id.is_none());
    assert!(store.recorded().is_empty());
    assert!(board.error.is_none());
}

#[test]
fn editing_is_mutually_exclusive_across_weeks() {
    let (mut board, _) = board_with_store();

    board.start_editing_week(1);
    board.set_editing_label("half-typed");
    board.start_editing_week(3);

    assert_eq!(board.editing_week_id, Some(3));
    assert_eq!(board.editing_label, "Jan 29-Feb 4");
}

#[test]
fn start_editing_unknown_week_is_noop() {
    let (mut board, _) = board_with_store();
    board.start_editing_week(99);
    assert!(board.editing_week_id.is_none());
}

#[test]
fn save_without_editing_is_noop() {
    let (mut board, store) = board_with_store();
    board.save_week_label();
    assert!(store.recorded().is_empty());
}

// =============================================================================
// CLEAR ALL
// =============================================================================

#[test]
fn clear_all_declined_changes_nothing() {
    let (mut board, store, _) = board_with_participant("keeper");
    board.start_editing_week(1);
    board.set_editing_label("Jan 16-22");
    board.save_week_label();
    store.reset();

    board.clear_all_data(false);

    assert_eq!(board.weeks[0].label, "Jan 16-22");
    assert_eq!(board.participants.len(), 1);
    assert!(store.recorded().is_empty());
}

#[test]
fn clear_all_accepted_resets_and_persists_both() {
    let (mut board, store, _) = board_with_participant("gone");
    board.start_editing_week(1);
    board.set_editing_label("Jan 16-22");
    board.save_week_label();
    store.reset();

    board.clear_all_data(true);

    assert_eq!(board.weeks, default_weeks());
    assert!(board.participants.is_empty());
    assert_eq!(
        store.recorded(),
        vec![Write::Weeks(default_weeks()), Write::Clear]
    );
}

// =============================================================================
// VALUE PUSHES
// =============================================================================

#[test]
fn apply_weeks_push_overwrites_local_value() {
    let (mut board, _) = board_with_store();
    let mut pushed = default_weeks();
    pushed[3].label = "Feb 5-12".into();

    board.apply(StoreEvent::Weeks(pushed.clone()));

    assert_eq!(board.weeks, pushed);
}

#[test]
fn apply_participants_push_overwrites_optimistic_state() {
    let (mut board, _, _) = board_with_participant("optimistic");

    // The authoritative echo happens not to contain the optimistic add.
    board.apply(StoreEvent::Participants(vec![]));

    assert!(board.participants.is_empty());
}

#[test]
fn apply_participants_push_sorts_for_display() {
    let (mut board, _) = board_with_store();
    let mut older = Participant::new("older", 4);
    let mut newer = Participant::new("newer", 4);
    older.created_ms = 100;
    newer.created_ms = 200;

    board.apply(StoreEvent::Participants(vec![newer, older]));

    assert_eq!(board.participants[0].name, "older");
    assert_eq!(board.participants[1].name, "newer");
}

#[test]
fn apply_closed_sets_load_banner() {
    let (mut board, _) = board_with_store();
    board.apply(StoreEvent::Closed);
    assert_eq!(board.error.as_deref(), Some(LOAD_ERROR));
}

// =============================================================================
// BANNER STICKINESS
// =============================================================================

#[test]
fn banner_survives_later_successful_operations() {
    let (mut board, store, id) = board_with_participant("You");
    store.set_failing(true);
    board.toggle_availability(id, 0).unwrap();
    assert_eq!(board.error.as_deref(), Some(TOGGLE_ERROR));

    store.set_failing(false);
    board.toggle_availability(id, 1).unwrap();

    // Success does not clear the banner; only another failure rewrites it.
    assert_eq!(board.error.as_deref(), Some(TOGGLE_ERROR));
}

#[test]
fn banner_overwritten_by_next_failure() {
    let (mut board, store, id) = board_with_participant("You");
    store.set_failing(true);
    board.toggle_availability(id, 0).unwrap();
    board.remove_participant(id);
    assert_eq!(board.error.as_deref(), Some(REMOVE_ERROR));
}

// =============================================================================
// RENDERING
// =============================================================================

#[test]
fn render_shows_rows_marks_and_short_ids() {
    let (mut board, _, id) = board_with_participant("You");
    board.toggle_availability(id, 2).unwrap();

    let grid = board.render();
    let lines: Vec<&str> = grid.lines().collect();

    assert!(lines[0].contains("Participant"));
    assert!(lines[0].contains("Jan 29-Feb 4"));
    assert!(lines[0].contains("Actions"));
    // Header, divider, one participant row.
    assert_eq!(lines.len(), 3);
    assert!(lines[2].contains("You"));
    assert!(lines[2].contains("●"));
    assert!(lines[2].contains("○"));
    assert!(lines[2].contains(&short_id(id)));
}

#[test]
fn render_shows_edit_buffer_in_header() {
    let (mut board, _) = board_with_store();
    board.start_editing_week(2);
    board.set_editing_label("Jan 23-29");

    let grid = board.render();
    assert!(grid.lines().next().unwrap().contains("[Jan 23-29]"));
    assert!(!grid.contains("Jan 22-28"));
}

#[test]
fn short_id_is_eight_hex_chars() {
    let id = Uuid::new_v4();
    let short = short_id(id);
    assert_eq!(short.len(), 8);
    assert!(id.simple().to_string().starts_with(&short));
}
