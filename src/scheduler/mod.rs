//! Scheduler (C7)
//!
//! Two background reaper jobs: the challenge reaper (auth challenges past
//! `expires_at`, invariant AC-1's garbage collector) and the queue reaper
//! (queued messages past `expires_at` or older than the 30-day hard cap).
//! Neither job is on any request's critical path — `verifyChallenge` and
//! `fetchOffline` already enforce their invariants transactionally; this is
//! just cleanup.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::PgPool;
use tokio::task::JoinHandle;

use crate::db::queries;

const CHALLENGE_REAP_INTERVAL: Duration = Duration::from_secs(600);
const QUEUE_REAP_HOUR_UTC: u32 = 3;
const QUEUE_REAP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Owns the scheduler's background task handles. `start`/`stop` are
/// idempotent: calling either twice in a row is a no-op the second time.
#[derive(Default)]
pub struct Scheduler {
    handles: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self { handles: Mutex::new(None) }
    }

    /// Spawn both reaper tasks against `pool`. A second call while already
    /// running is a no-op — it does not spawn duplicate tasks.
    pub fn start(&self, pool: PgPool) {
        let mut handles = self.handles.lock().expect("scheduler mutex poisoned");
        if handles.is_some() {
            return;
        }

        let challenge_handle = tokio::spawn(spawn_challenge_reaper(pool.clone()));
        let queue_handle = tokio::spawn(spawn_queue_reaper(pool));

        *handles = Some(vec![challenge_handle, queue_handle]);
    }

    /// Abort both reaper tasks. A second call, or calling before `start`, is
    /// a no-op.
    pub fn stop(&self) {
        let mut handles = self.handles.lock().expect("scheduler mutex poisoned");
        if let Some(handles) = handles.take() {
            for handle in handles {
                handle.abort();
            }
        }
    }
}

async fn spawn_challenge_reaper(pool: PgPool) {
    let mut interval = tokio::time::interval(CHALLENGE_REAP_INTERVAL);
    interval.tick().await; // consume immediate first tick
    loop {
        interval.tick().await;
        run_challenge_reap(&pool).await;
    }
}

#[tracing::instrument(skip(pool))]
async fn run_challenge_reap(pool: &PgPool) {
    let start = Instant::now();
    match queries::reap_expired_challenges(pool).await {
        Ok(deleted) => {
            tracing::info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                deleted,
                "challenge reap cycle completed"
            );
        }
        Err(error) => {
            tracing::warn!(%error, "challenge reap cycle failed");
        }
    }
}

async fn spawn_queue_reaper(pool: PgPool) {
    tokio::time::sleep(duration_until_next_3am_utc()).await;
    let mut interval = tokio::time::interval(QUEUE_REAP_INTERVAL);
    loop {
        interval.tick().await;
        run_queue_reap(&pool).await;
    }
}

#[tracing::instrument(skip(pool))]
async fn run_queue_reap(pool: &PgPool) {
    let start = Instant::now();
    match queries::reap_queue(pool).await {
        Ok((expired, stale)) => {
            tracing::info!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                expired,
                stale,
                "queue reap cycle completed"
            );
        }
        Err(error) => {
            tracing::warn!(%error, "queue reap cycle failed");
        }
    }
}

/// How long to sleep before the next `03:00 UTC`, used to phase-align the
/// daily queue reaper's first run.
fn duration_until_next_3am_utc() -> Duration {
    let now = Utc::now();
    let mut next = now
        .date_naive()
        .and_hms_opt(QUEUE_REAP_HOUR_UTC, 0, 0)
        .expect("valid time")
        .and_utc();
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_3am_is_in_the_future_and_within_a_day() {
        let wait = duration_until_next_3am_utc();
        assert!(wait.as_secs() > 0);
        assert!(wait.as_secs() <= 24 * 3600);
    }

    #[test]
    fn start_stop_is_idempotent() {
        // Constructed without a real pool connection: this exercises the
        // handle-bookkeeping logic only, never awaited.
        let scheduler = Scheduler::new();
        assert!(scheduler.handles.lock().unwrap().is_none());
        scheduler.stop();
        assert!(scheduler.handles.lock().unwrap().is_none());
    }
}
