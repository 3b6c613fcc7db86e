//! Per-client upload admission backed by the SQLite upload ledger.
//!
//! Each admitted upload is one `uploads(ip, timestamp)` row. A client is
//! limited while it has `max_uploads` rows newer than `now - window`.
//!
//! Admission is a single conditional `INSERT ... SELECT` statement. SQLite
//! takes the write lock before evaluating it, so the count and the insert
//! cannot interleave with another request, even one from another process
//! sharing the database file.

use crate::clock::SharedClock;
use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Proof of an admitted upload; hand it back with [`RateLimiter::release`]
/// when the upload fails afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Ticket {
    row_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(Ticket),
    Limited,
}

#[derive(Clone)]
pub struct RateLimiter {
    db: Arc<SqlitePool>,
    clock: SharedClock,
    max_uploads: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        db: Arc<SqlitePool>,
        clock: SharedClock,
        max_uploads: u32,
        window: Duration,
    ) -> Self {
        Self {
            db,
            clock,
            max_uploads,
            window,
        }
    }

    pub fn max_uploads(&self) -> u32 {
        self.max_uploads
    }

    pub fn window_secs(&self) -> i64 {
        self.window.num_seconds()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    fn now_secs(&self) -> i64 {
        self.clock.now().timestamp()
    }

    fn cutoff_secs(&self) -> i64 {
        self.now_secs() - self.window_secs()
    }

    /// Rows for `client_id` inside the trailing window.
    ///
    /// Read-only view of the ledger; uploads are admitted through
    /// [`RateLimiter::try_admit`].
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn count(&self, client_id: &str) -> LedgerResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM uploads WHERE ip = ? AND timestamp > ?",
        )
        .bind(client_id)
        .bind(self.cutoff_secs())
        .fetch_one(&*self.db)
        .await?;
        Ok(count)
    }

    /// Whether `client_id` has used up its quota for the current window.
    ///
    /// A separate check followed by [`RateLimiter::record`] races with
    /// concurrent uploads; request handling uses [`RateLimiter::try_admit`].
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn is_limited(&self, client_id: &str) -> LedgerResult<bool> {
        Ok(self.count(client_id).await? >= i64::from(self.max_uploads))
    }

    /// Append an upload event unconditionally, bypassing the quota.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn record(&self, client_id: &str) -> LedgerResult<Ticket> {
        let result = sqlx::query("INSERT INTO uploads (ip, timestamp) VALUES (?, ?)")
            .bind(client_id)
            .bind(self.now_secs())
            .execute(&*self.db)
            .await?;
        Ok(Ticket {
            row_id: result.last_insert_rowid(),
        })
    }

    /// Check and record in one step.
    ///
    /// Of N concurrent calls for one client with k slots left, exactly k are
    /// admitted.
    pub async fn try_admit(&self, client_id: &str) -> LedgerResult<Admission> {
        let result = sqlx::query(
            "INSERT INTO uploads (ip, timestamp)
             SELECT ?, ?
             WHERE (SELECT COUNT(*) FROM uploads WHERE ip = ? AND timestamp > ?) < ?",
        )
        .bind(client_id)
        .bind(self.now_secs())
        .bind(client_id)
        .bind(self.cutoff_secs())
        .bind(i64::from(self.max_uploads))
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 1 {
            debug!(client = %client_id, "upload admitted");
            Ok(Admission::Admitted(Ticket {
                row_id: result.last_insert_rowid(),
            }))
        } else {
            warn!(
                client = %client_id,
                max = self.max_uploads,
                window_secs = self.window_secs(),
                "upload rejected by rate limit"
            );
            Ok(Admission::Limited)
        }
    }

    /// Hold `ticket` until the upload it admitted is published.
    pub fn reserve(&self, ticket: Ticket) -> Reservation {
        Reservation {
            limiter: self.clone(),
            ticket: Some(ticket),
        }
    }

    /// Give back a slot taken by [`RateLimiter::try_admit`].
    pub async fn release(&self, ticket: Ticket) -> LedgerResult<()> {
        sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(ticket.row_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Delete rows older than the window. Rows still inside it are never
    /// touched.
    pub async fn purge_expired(&self) -> LedgerResult<u64> {
        let result = sqlx::query("DELETE FROM uploads WHERE timestamp < ?")
            .bind(self.cutoff_secs())
            .execute(&*self.db)
            .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, "purged stale rate-limit entries");
        }
        Ok(purged)
    }
}

/// An admitted slot that is handed back unless the upload is kept.
///
/// Dropping it without [`Reservation::keep`] (a failed or cancelled upload)
/// releases the slot on a spawned task.
#[must_use]
pub struct Reservation {
    limiter: RateLimiter,
    ticket: Option<Ticket>,
}

impl Reservation {
    /// The upload was published; the slot stays counted.
    pub fn keep(mut self) {
        self.ticket = None;
    }

    /// Release the slot now instead of on drop.
    pub async fn release(mut self) -> LedgerResult<()> {
        match self.ticket.take() {
            Some(ticket) => self.limiter.release(ticket).await,
            None => Ok(()),
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        let limiter = self.limiter.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = limiter.release(ticket).await {
                        warn!(error = %err, "failed to release abandoned rate-limit slot");
                    }
                });
            }
            Err(_) => warn!("no runtime left to release abandoned rate-limit slot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, db};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    async fn limiter(tmp: &TempDir) -> (RateLimiter, Arc<ManualClock>) {
        let url = format!("sqlite://{}", tmp.path().join("ledger.db").display());
        let pool = db::connect(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));
        let limiter = RateLimiter::new(Arc::new(pool), clock.clone(), 2, Duration::seconds(60));
        (limiter, clock)
    }

    #[tokio::test]
    async fn third_upload_in_window_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let (limiter, _clock) = limiter(&tmp).await;

        for _ in 0..2 {
            let outcome = limiter.try_admit("10.0.0.1").await.unwrap();
            assert!(matches!(outcome, Admission::Admitted(_)));
        }
        assert_eq!(limiter.try_admit("10.0.0.1").await.unwrap(), Admission::Limited);
        assert!(limiter.is_limited("10.0.0.1").await.unwrap());

        // Other clients are unaffected.
        assert!(!limiter.is_limited("10.0.0.2").await.unwrap());
    }

    #[tokio::test]
    async fn window_slides() {
        let tmp = TempDir::new().unwrap();
        let (limiter, clock) = limiter(&tmp).await;

        let _ = limiter.record("c").await.unwrap();
        clock.advance(Duration::seconds(30));
        let _ = limiter.record("c").await.unwrap();
        assert!(limiter.is_limited("c").await.unwrap());

        clock.advance(Duration::seconds(31));
        assert!(!limiter.is_limited("c").await.unwrap());
        assert_eq!(limiter.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn release_returns_the_slot() {
        let tmp = TempDir::new().unwrap();
        let (limiter, _clock) = limiter(&tmp).await;

        let _ = limiter.record("c").await.unwrap();
        let Admission::Admitted(ticket) = limiter.try_admit("c").await.unwrap() else {
            panic!("second upload should be admitted");
        };
        assert!(limiter.is_limited("c").await.unwrap());

        limiter.release(ticket).await.unwrap();
        assert!(!limiter.is_limited("c").await.unwrap());
    }

    #[tokio::test]
    async fn dropped_reservation_returns_the_slot() {
        let tmp = TempDir::new().unwrap();
        let (limiter, _clock) = limiter(&tmp).await;

        let Admission::Admitted(kept) = limiter.try_admit("c").await.unwrap() else {
            panic!("first upload should be admitted");
        };
        limiter.reserve(kept).keep();

        let Admission::Admitted(ticket) = limiter.try_admit("c").await.unwrap() else {
            panic!("second upload should be admitted");
        };
        drop(limiter.reserve(ticket));

        for _ in 0..50 {
            if limiter.count("c").await.unwrap() == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("abandoned slot was never released");
    }

    #[tokio::test]
    async fn concurrent_attempts_admit_exactly_max() {
        let tmp = TempDir::new().unwrap();
        let (limiter, _clock) = limiter(&tmp).await;

        let attempts = (0..16).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.try_admit("203.0.113.9").await.unwrap() })
        });
        let outcomes = futures::future::join_all(attempts).await;

        let admitted = outcomes
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|outcome| matches!(outcome, Admission::Admitted(_)))
            .count();
        assert_eq!(admitted, 2);
        assert_eq!(limiter.count("203.0.113.9").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn purge_only_removes_rows_outside_the_window() {
        let tmp = TempDir::new().unwrap();
        let (limiter, clock) = limiter(&tmp).await;

        let _ = limiter.record("old").await.unwrap();
        let _ = limiter.record("old").await.unwrap();
        clock.advance(Duration::seconds(90));
        let _ = limiter.record("fresh").await.unwrap();

        assert_eq!(limiter.purge_expired().await.unwrap(), 2);
        assert_eq!(limiter.purge_expired().await.unwrap(), 0);
        assert_eq!(limiter.count("fresh").await.unwrap(), 1);
    }
}
