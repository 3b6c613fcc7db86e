//! Expiry reaper: the only code path that destroys uploaded content.
//!
//! A sweep walks every namespace under the storage root and hard-deletes it
//! when it is soft-deleted or older than the retention window. Age comes from
//! the sidecar's creation time; a namespace without a readable sidecar falls
//! back to the directory's modification time, which also catches uploads that
//! never published. Running a sweep twice in a row deletes nothing the second
//! time.

use crate::{
    models::sweep::SweepReport,
    services::{
        object_store::{Namespace, NamespaceState, ObjectStore},
        rate_limiter::RateLimiter,
    },
};
use chrono::{DateTime, Utc};
use std::{io::ErrorKind, time::Duration as StdDuration};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Reaper {
    store: ObjectStore,
    limiter: RateLimiter,
}

/// Why a namespace is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Expired,
    SoftDeleted,
}

impl Reaper {
    pub fn new(store: ObjectStore, limiter: RateLimiter) -> Self {
        Self { store, limiter }
    }

    /// Run one full maintenance pass.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.store.now();
        let mut report = SweepReport::started_at(now);

        match self.store.list_namespaces().await {
            Ok(namespaces) => {
                for namespace in namespaces {
                    self.reap_one(&namespace, now, &mut report).await;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                report.errors.push("Upload directory does not exist".to_string());
            }
            Err(err) => {
                warn!("failed to list {}: {}", self.store.root().display(), err);
                report.errors.push("Failed to list upload directory".to_string());
            }
        }

        match self.limiter.purge_expired().await {
            Ok(purged) => report.rate_limit_cleaned = purged,
            Err(err) => {
                warn!(error = %err, "rate-limit purge failed");
                report.errors.push("Failed to purge rate-limit entries".to_string());
            }
        }

        info!(
            deleted = report.deleted_count,
            errors = report.errors.len(),
            rate_limit_cleaned = report.rate_limit_cleaned,
            "maintenance sweep finished"
        );
        report
    }

    async fn reap_one(
        &self,
        namespace: &Namespace,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let verdict = match self.verdict(namespace, now).await {
            Ok(verdict) => verdict,
            Err(message) => {
                report.errors.push(message);
                return;
            }
        };
        if verdict == Verdict::Keep {
            return;
        }

        match self.store.hard_delete(&namespace.name).await {
            Ok(()) => {
                info!(namespace = %namespace.name, reason = ?verdict, "namespace reaped");
                report.record_deleted(namespace.name.clone());
            }
            Err(err) => {
                warn!(namespace = %namespace.name, error = %err, "failed to reap namespace");
                report.errors.push(format!("Failed to delete: {}", namespace.name));
            }
        }
    }

    async fn verdict(
        &self,
        namespace: &Namespace,
        now: DateTime<Utc>,
    ) -> Result<Verdict, String> {
        let retention = self.store.retention();
        let state = self.store.inspect(namespace).await.map_err(|err| {
            warn!(namespace = %namespace.name, error = %err, "failed to read sidecar");
            format!("Failed to inspect: {}", namespace.name)
        })?;

        let verdict = match state {
            NamespaceState::Published {
                deleted_at: Some(_),
                ..
            } => Verdict::SoftDeleted,
            NamespaceState::Published { created_at, .. } if now - created_at > retention => {
                Verdict::Expired
            }
            NamespaceState::Published { .. } => Verdict::Keep,
            // Directory mtime stands in for creation time. It can move when
            // entries change, so this only approximates the real age.
            NamespaceState::Unpublished => match namespace.modified {
                Some(modified) if now - modified > retention => Verdict::Expired,
                Some(_) => Verdict::Keep,
                None => {
                    debug!(namespace = %namespace.name, "no modification time available");
                    Verdict::Keep
                }
            },
        };
        Ok(verdict)
    }

    /// Sweep on a fixed period until the returned task is aborted.
    pub fn spawn_periodic(self, every: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = self.sweep().await;
                for error in &report.errors {
                    warn!(%error, "sweep error");
                }
            }
        })
    }
}
