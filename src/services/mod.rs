//! Long-running services started on demand or on a schedule
//!
//! Each service allows one run at a time. A start request while a run is
//! active is refused unless forced; a forced start stops the active run,
//! waits for it to wind down and then starts afresh.

pub mod crawler;
pub mod status;
pub mod url_refresh;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use crawler::Crawler;
pub use status::StatusTracker;
pub use url_refresh::UrlRefresher;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} is already running")]
pub struct AlreadyRunning(pub &'static str);

struct ActiveRun {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Single-run guard shared by a service and its clones
#[derive(Default)]
pub struct RunControl {
    active: Mutex<Option<ActiveRun>>,
}

impl RunControl {
    pub async fn is_running(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Spawns `body` as the new active run.
    ///
    /// `body` receives the run's own flag, which is cleared when the run is
    /// asked to stop. A forced start clears the previous run's flag and the
    /// new run waits for it to wind down before `body` starts; if the new
    /// run is stopped during that wait, `body` never runs.
    pub async fn start<B, Fut>(
        &self,
        name: &'static str,
        force: bool,
        body: B,
    ) -> Result<(), AlreadyRunning>
    where
        B: FnOnce(Arc<AtomicBool>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.active.lock().await;
        let previous = match active.take() {
            Some(run) if !run.handle.is_finished() => {
                if !force {
                    *active = Some(run);
                    return Err(AlreadyRunning(name));
                }
                info!("Forced start of {}: stopping the current run first", name);
                run.running.store(false, Ordering::SeqCst);
                Some(run.handle)
            }
            _ => None,
        };

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    error!("Previous {} run ended abnormally: {}", name, e);
                }
            }
            if flag.load(Ordering::SeqCst) {
                body(flag).await;
            } else {
                info!("{} stopped before it started", name);
            }
        });
        *active = Some(ActiveRun { running, handle });
        Ok(())
    }

    /// Asks the active run to stop. Returns `false` when nothing was running.
    pub async fn signal_stop(&self) -> bool {
        match self.active.lock().await.as_ref() {
            Some(run) if !run.handle.is_finished() => {
                run.running.store(false, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Waits for the active run, if any, to finish.
    pub async fn join(&self) {
        let run = self.active.lock().await.take();
        if let Some(run) = run {
            if let Err(e) = run.handle.await {
                error!("Run ended abnormally: {}", e);
            }
        }
    }
}

/// Runs `work` as its own task so that a panic surfaces as an error.
///
/// Returns `true` when the work failed or panicked.
async fn supervise<Fut>(name: &str, work: Fut) -> bool
where
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            error!("{} run failed: {:#}", name, e);
            true
        }
        Err(e) => {
            error!("{} run panicked: {}", name, e);
            true
        }
    }
}
