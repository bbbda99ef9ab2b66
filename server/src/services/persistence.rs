//! Persistence service — hydration and background flush for the store value.
//!
//! DESIGN
//! ======
//! All Postgres I/O lives here. The store is hydrated once at startup
//! (seeding the default weeks on first run) and flushed by a background
//! task on an interval: snapshot the dirty state under the lock, write
//! outside it, then acknowledge. Store mutations never wait on the
//! database.
//!
//! ERROR HANDLING
//! ==============
//! Dirty flags are cleared only after successful writes, and only when the
//! record still equals the flushed snapshot. This prioritizes durability
//! over duplicate flush attempts: repeated upserts are acceptable, silent
//! data loss is not.

use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use wire::model::{Participant, Week, default_weeks};

use crate::state::AppState;

const DEFAULT_STORE_FLUSH_INTERVAL_MS: u64 = 100;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// HYDRATION
// =============================================================================

/// Load both store paths from Postgres into memory. An empty weeks table
/// means first run: the fixed defaults are seeded and marked dirty so the
/// next flush persists them.
///
/// # Errors
///
/// Returns a database error if either load query fails.
pub async fn hydrate_store(state: &AppState) -> Result<(), sqlx::Error> {
    let weeks = load_weeks(&state.pool).await?;
    let participants = load_participants(&state.pool).await?;

    let mut store = state.store.write().await;
    if weeks.is_empty() {
        store.weeks = default_weeks();
        store.weeks_dirty = true;
        info!("weeks table empty; seeded default weeks");
    } else {
        store.weeks = weeks;
    }

    store.participants = participants.into_iter().map(|p| (p.id, p)).collect();
    info!(
        weeks = store.weeks.len(),
        participants = store.participants.len(),
        "store hydrated from database"
    );
    Ok(())
}

async fn load_weeks(pool: &PgPool) -> Result<Vec<Week>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, label FROM weeks ORDER BY position")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(id, label)| Week { id: u32::try_from(id).unwrap_or_default(), label })
        .collect())
}

async fn load_participants(pool: &PgPool) -> Result<Vec<Participant>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, String, serde_json::Value, i64)>(
        "SELECT id, name, availability, created_ms FROM participants",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, availability, created_ms)| Participant {
            id,
            name,
            availability: serde_json::from_value(availability).unwrap_or_default(),
            created_ms,
        })
        .collect())
}

// =============================================================================
// BACKGROUND FLUSH
// =============================================================================

/// Spawn the background persistence task. Returns a handle for shutdown.
pub fn spawn_persistence_task(state: AppState) -> JoinHandle<()> {
    let flush_interval_ms = env_parse("STORE_FLUSH_INTERVAL_MS", DEFAULT_STORE_FLUSH_INTERVAL_MS);
    info!(flush_interval_ms, "store persistence flush configured");
    tokio::spawn(async move {
        loop {
            flush_dirty(&state).await;
            tokio::time::sleep(Duration::from_millis(flush_interval_ms)).await;
        }
    })
}

#[derive(Debug)]
struct FlushBatch {
    weeks: Option<Vec<Week>>,
    participants: Vec<Participant>,
    removed: Vec<Uuid>,
}

impl FlushBatch {
    fn is_empty(&self) -> bool {
        self.weeks.is_none() && self.participants.is_empty() && self.removed.is_empty()
    }
}

async fn flush_dirty(state: &AppState) {
    // PHASE: SNAPSHOT DIRTY STATE
    // WHY: collect immutable clones under lock, then perform I/O lock-free.
    let batch = {
        let store = state.store.read().await;
        FlushBatch {
            weeks: store.weeks_dirty.then(|| store.weeks.clone()),
            participants: store
                .dirty
                .iter()
                .filter_map(|id| store.participants.get(id).cloned())
                .collect(),
            removed: store.removed.iter().copied().collect(),
        }
    };

    if batch.is_empty() {
        return;
    }

    // PHASE: WRITE + ACK
    // WHY: if the write fails we intentionally keep dirty flags for retry.
    match write_batch(&state.pool, &batch).await {
        Ok(()) => acknowledge_flushed(state, &batch).await,
        Err(e) => {
            error!(
                error = %e,
                weeks = batch.weeks.is_some(),
                participants = batch.participants.len(),
                removed = batch.removed.len(),
                "persistence flush failed"
            );
        }
    }
}

/// Clear dirty markers for flushed entries, unless the value moved on
/// since the snapshot — then the flag stays set for the next cycle.
async fn acknowledge_flushed(state: &AppState, batch: &FlushBatch) {
    let mut store = state.store.write().await;

    if let Some(flushed_weeks) = &batch.weeks {
        if store.weeks == *flushed_weeks {
            store.weeks_dirty = false;
        }
    }

    for flushed in &batch.participants {
        // EDGE: keep the flag if the record was overwritten after snapshot.
        let can_clear = match store.participants.get(&flushed.id) {
            Some(current) => current == flushed,
            None => true,
        };
        if can_clear {
            store.dirty.remove(&flushed.id);
        }
    }

    for id in &batch.removed {
        store.removed.remove(id);
    }
}

async fn write_batch(pool: &PgPool, batch: &FlushBatch) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    if let Some(weeks) = &batch.weeks {
        sqlx::query("DELETE FROM weeks").execute(tx.as_mut()).await?;
        for (position, week) in weeks.iter().enumerate() {
            sqlx::query("INSERT INTO weeks (position, id, label) VALUES ($1, $2, $3)")
                .bind(i64::try_from(position).unwrap_or_default())
                .bind(i64::from(week.id))
                .bind(&week.label)
                .execute(tx.as_mut())
                .await?;
        }
    }

    for participant in &batch.participants {
        sqlx::query(
            "INSERT INTO participants (id, name, availability, created_ms) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, availability = EXCLUDED.availability, \
                 created_ms = EXCLUDED.created_ms",
        )
        .bind(participant.id)
        .bind(&participant.name)
        .bind(serde_json::to_value(&participant.availability).unwrap_or_default())
        .bind(participant.created_ms)
        .execute(tx.as_mut())
        .await?;
    }

    for id in &batch.removed {
        sqlx::query("DELETE FROM participants WHERE id = $1")
            .bind(id)
            .execute(tx.as_mut())
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
