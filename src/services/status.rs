//! Heartbeat-stamped status records persisted after every change

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::error;

use crate::models::{ParserStatus, UrlUpdaterStatus};
use crate::storage::write_json_atomic;

/// A status record that carries a liveness heartbeat
pub trait Heartbeat {
    fn stamp(&mut self, now: DateTime<Utc>);
}

impl Heartbeat for ParserStatus {
    fn stamp(&mut self, now: DateTime<Utc>) {
        self.heartbeat = Some(now);
    }
}

impl Heartbeat for UrlUpdaterStatus {
    fn stamp(&mut self, now: DateTime<Utc>) {
        self.heartbeat = Some(now);
    }
}

/// Owns one status record behind a single lock.
///
/// Every change stamps the heartbeat and writes a snapshot to disk while the
/// lock is held, so the file never lags behind a value a reader has seen.
pub struct StatusTracker<S> {
    path: PathBuf,
    state: Mutex<S>,
}

impl<S> StatusTracker<S>
where
    S: Heartbeat + Serialize + Clone + Send,
{
    /// Starts tracking `initial` and writes its first snapshot.
    pub async fn new(path: impl Into<PathBuf>, initial: S) -> Self {
        let tracker = Self {
            path: path.into(),
            state: Mutex::new(initial),
        };
        tracker.update(|_| ()).await;
        tracker
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> S {
        self.state.lock().await.clone()
    }

    /// Applies `change`, stamps the heartbeat and persists the result.
    ///
    /// Persistence failures are logged and otherwise ignored.
    pub async fn update<R>(&self, change: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.state.lock().await;
        let output = change(&mut state);
        state.stamp(Utc::now());
        if let Err(e) = write_json_atomic(&self.path, &*state).await {
            error!("Failed to save status to {}: {:#}", self.path.display(), e);
        }
        output
    }
}
