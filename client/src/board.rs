//! Availability board — the one stateful component.
//!
//! DESIGN
//! ======
//! The board owns the poll value (weeks + participants) and the transient
//! UI state (name input, label edit buffer, error banner). Every user
//! action mutates local state optimistically, then fires a write at the
//! store; the store's value push — which the originator receives like
//! everyone else — confirms or overwrites the optimistic state. A failed
//! write surfaces a banner and leaves local state as attempted: no
//! rollback, no retry.
//!
//! The banner is sticky by construction: failures overwrite it, successes
//! never clear it. It stands until the next failure or a fresh instance.

use std::sync::Arc;

use uuid::Uuid;

use wire::model::{Participant, Week, default_weeks, sort_for_display};

use crate::store::{StoreEvent, StoreWrite};

// =============================================================================
// BANNERS
// =============================================================================

pub const LOAD_ERROR: &str = "Error loading data. Please reconnect.";
pub const TOGGLE_ERROR: &str = "Failed to update availability. Please try again.";
pub const ADD_ERROR: &str = "Failed to add participant. Please try again.";
pub const REMOVE_ERROR: &str = "Failed to remove participant. Please try again.";
pub const WEEK_ERROR: &str = "Failed to update week label. Please try again.";
pub const CLEAR_ERROR: &str = "Failed to clear data. Please try again.";

const AVAILABLE_MARK: &str = "●";
const UNAVAILABLE_MARK: &str = "○";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("unknown participant: {0}")]
    UnknownParticipant(Uuid),
    #[error("week index {index} out of range for {count} weeks")]
    WeekIndexOutOfRange { index: usize, count: usize },
}

/// The availability board. Holds the poll value plus transient UI state;
/// writes go through the injected store handle.
pub struct Board {
    store: Arc<dyn StoreWrite>,
    pub weeks: Vec<Week>,
    pub participants: Vec<Participant>,
    pub new_participant_name: String,
    pub editing_week_id: Option<u32>,
    pub editing_label: String,
    pub error: Option<String>,
}

impl Board {
    /// Create a board around an injected store handle. State starts from
    /// the fixed default weeks and no participants; the subscription's
    /// first value pushes overwrite both.
    #[must_use]
    pub fn new(store: Arc<dyn StoreWrite>) -> Self {
        Self {
            store,
            weeks: default_weeks(),
            participants: Vec::new(),
            new_participant_name: String::new(),
            editing_week_id: None,
            editing_label: String::new(),
            error: None,
        }
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

impl Board {
    /// Flip one availability flag and persist the updated record.
    ///
    /// # Errors
    ///
    /// Returns `WeekIndexOutOfRange` or `UnknownParticipant` without
    /// touching any state. A persistence failure is not an error here —
    /// it surfaces on the banner and the local flip stands.
    pub fn toggle_availability(
        &mut self,
        participant_id: Uuid,
        week_index: usize,
    ) -> Result<(), BoardError> {
        let count = self.weeks.len();
        if week_index >= count {
            return Err(BoardError::WeekIndexOutOfRange { index: week_index, count });
        }
        let Some(participant) = self
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
        else {
            return Err(BoardError::UnknownParticipant(participant_id));
        };
        let Some(flag) = participant.availability.get_mut(week_index) else {
            return Err(BoardError::WeekIndexOutOfRange { index: week_index, count });
        };

        *flag = !*flag;
        let snapshot = participant.clone();
        if self.store.put_participant(&snapshot).is_err() {
            self.error = Some(TOGGLE_ERROR.into());
        }
        Ok(())
    }

    /// Add a participant named by the current input. A blank or
    /// whitespace-only input is a complete no-op. The input clears only
    /// when the write was accepted.
    pub fn add_participant(&mut self) {
        let name = self.new_participant_name.trim();
        if name.is_empty() {
            return;
        }

        let participant = Participant::new(name, self.weeks.len());
        match self.store.put_participant(&participant) {
            Ok(()) => self.new_participant_name.clear(),
            Err(_) => self.error = Some(ADD_ERROR.into()),
        }
        self.participants.push(participant);
    }

    /// Remove one participant record, local and persisted. Removing an id
    /// that is already gone is a no-op locally and converges remotely.
    pub fn remove_participant(&mut self, participant_id: Uuid) {
        self.participants.retain(|p| p.id != participant_id);
        if self.store.remove_participant(participant_id).is_err() {
            self.error = Some(REMOVE_ERROR.into());
        }
    }

    /// Enter label-edit mode for one week. Editing is mutually exclusive:
    /// starting on another week abandons the previous buffer.
    pub fn start_editing_week(&mut self, week_id: u32) {
        if let Some(week) = self.weeks.iter().find(|w| w.id == week_id) {
            self.editing_week_id = Some(week_id);
            self.editing_label = week.label.clone();
        }
    }

    /// Replace the label edit buffer.
    pub fn set_editing_label(&mut self, label: impl Into<String>) {
        self.editing_label = label.into();
    }

    /// Commit the label edit. A blank trimmed buffer discards the edit
    /// silently; otherwise the label updates and the entire weeks sequence
    /// is rewritten to the store. Edit state clears either way.
    pub fn save_week_label(&mut self) {
        let Some(week_id) = self.editing_week_id else {
            return;
        };

        let trimmed = self.editing_label.trim().to_owned();
        if !trimmed.is_empty() {
            if let Some(week) = self.weeks.iter_mut().find(|w| w.id == week_id) {
                week.label = trimmed;
            }
            if self.store.set_weeks(&self.weeks).is_err() {
                self.error = Some(WEEK_ERROR.into());
            }
        }

        self.editing_week_id = None;
        self.editing_label.clear();
    }

    /// Reset weeks to the defaults and participants to empty, persisting
    /// both resets. `confirmed` is the caller's explicit answer to the
    /// irreversible-action prompt; `false` is a complete no-op.
    pub fn clear_all_data(&mut self, confirmed: bool) {
        if !confirmed {
            return;
        }

        self.weeks = default_weeks();
        self.participants.clear();

        let weeks_write = self.store.set_weeks(&self.weeks);
        let participants_write = self.store.clear_participants();
        if weeks_write.is_err() || participants_write.is_err() {
            self.error = Some(CLEAR_ERROR.into());
        }
    }

    /// Fold a value push into local state. The store is authoritative:
    /// pushes overwrite optimistic state, the originator's included.
    pub fn apply(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Weeks(weeks) => self.weeks = weeks,
            StoreEvent::Participants(mut participants) => {
                sort_for_display(&mut participants);
                self.participants = participants;
            }
            StoreEvent::Closed => self.error = Some(LOAD_ERROR.into()),
        }
    }
}

// =============================================================================
// RENDERING
// =============================================================================

impl Board {
    /// Render the grid: one row per participant, a name column, one column
    /// per week, and an actions column carrying the short id removal
    /// commands take. Week headers show the edit buffer in brackets for
    /// the week being edited.
    #[must_use]
    pub fn render(&self) -> String {
        let mut header = Vec::with_capacity(self.weeks.len() + 2);
        header.push("Participant".to_owned());
        for week in &self.weeks {
            if self.editing_week_id == Some(week.id) {
                header.push(format!("[{}]", self.editing_label));
            } else {
                header.push(week.label.clone());
            }
        }
        header.push("Actions".to_owned());

        let mut rows = Vec::with_capacity(self.participants.len());
        for participant in &self.participants {
            let mut row = Vec::with_capacity(self.weeks.len() + 2);
            row.push(participant.name.clone());
            for index in 0..self.weeks.len() {
                let available = participant.availability.get(index).copied().unwrap_or(false);
                let mark = if available { AVAILABLE_MARK } else { UNAVAILABLE_MARK };
                row.push(mark.to_owned());
            }
            row.push(short_id(participant.id));
            rows.push(row);
        }

        let mut widths: Vec<usize> = header.iter().map(|cell| cell.chars().count()).collect();
        for row in &rows {
            for (column, cell) in row.iter().enumerate() {
                widths[column] = widths[column].max(cell.chars().count());
            }
        }

        let mut out = String::new();
        out.push_str(&format_row(&header, &widths));
        out.push('\n');
        out.push_str(&divider(&widths));
        for row in &rows {
            out.push('\n');
            out.push_str(&format_row(row, &widths));
        }
        out
    }
}

/// First eight hex digits of the id — enough to address a participant in
/// a small group.
#[must_use]
pub fn short_id(id: Uuid) -> String {
    let mut simple = id.simple().to_string();
    simple.truncate(8);
    simple
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths.iter())
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    padded.join(" | ").trim_end().to_owned()
}

fn divider(widths: &[usize]) -> String {
    let bars: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    bars.join("-+-")
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
