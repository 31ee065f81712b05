//! Age-based retention.
//!
//! One expirer task runs per open log. Every tick it deletes leading
//! segments (never the last) whose base timestamp is older than
//! `now - LogMaxAge`. The task holds only a weak reference, so it also ends
//! when the log is dropped without being closed.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::LogConfig;
use crate::error::Result;
use crate::fs::sync_dir;
use crate::log::LogInner;

pub(crate) async fn run(log: Weak<LogInner>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(inner) = log.upgrade() else {
            return;
        };
        if let Err(e) = expire_once(&inner).await {
            error!(path = ?inner.path, error = %e, "Segment expiry failed");
        }
    }
}

/// Run one expiry pass. Returns the number of segments removed.
pub(crate) async fn expire_once(inner: &LogInner) -> Result<usize> {
    let max_age = inner.config.log_max_age;
    if !LogConfig::limited(max_age) {
        return Ok(0);
    }

    let cutoff = inner.options.clock.now_unix() - max_age;
    let removed = inner
        .remove_leading("age", |segment, _| segment.base_timestamp < cutoff)
        .await?;

    if removed > 0 {
        let _guard = inner.options.sync_lock.lock().await;
        sync_dir(&inner.path).await?;
    }
    Ok(removed)
}
