//! Shared poll model — the value shapes stored at the two store paths.
//!
//! DESIGN
//! ======
//! The store holds exactly two documents: the `weeks` sequence (replaced
//! wholesale on every write) and the `participants` map (one addressable
//! record per participant). Both sides of the wire share these types so a
//! value push deserializes into exactly what the server holds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A labeled time slot participants mark availability against.
///
/// Week ids are stable small integers; only labels ever change. The weeks
/// sequence keeps a fixed shape for the lifetime of the store — the only
/// legal writes are label-level rewrites and the clear-all reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Week {
    pub id: u32,
    pub label: String,
}

/// A named respondent with one availability flag per week.
///
/// `availability` is positional: index N refers to the week at position N
/// of the weeks sequence. `created_ms` is the explicit ordering field —
/// rendered lists sort by `(created_ms, id)`, never by map enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub availability: Vec<bool>,
    pub created_ms: i64,
}

impl Participant {
    /// Create a participant with a fresh id and all-false availability.
    #[must_use]
    pub fn new(name: impl Into<String>, week_count: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            availability: vec![false; week_count],
            created_ms: crate::now_ms(),
        }
    }
}

/// The fixed default weeks, seeded on first run and restored by clear-all.
#[must_use]
pub fn default_weeks() -> Vec<Week> {
    vec![
        Week { id: 1, label: "Jan 15-21".into() },
        Week { id: 2, label: "Jan 22-28".into() },
        Week { id: 3, label: "Jan 29-Feb 4".into() },
        Week { id: 4, label: "Feb 5-11".into() },
    ]
}

/// Sort participants into display order: `(created_ms, id)` ascending.
pub fn sort_for_display(participants: &mut [Participant]) {
    participants.sort_by(|a, b| {
        a.created_ms
            .cmp(&b.created_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// True when `replacement` preserves the id sequence of `current`.
///
/// Structural week changes are forbidden: a weeks write may only rewrite
/// labels, so the replacement must carry the same ids in the same order.
#[must_use]
pub fn same_week_shape(current: &[Week], replacement: &[Week]) -> bool {
    current.len() == replacement.len()
        && current
            .iter()
            .zip(replacement.iter())
            .all(|(a, b)| a.id == b.id)
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
