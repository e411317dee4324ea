//! Poll scheduler
//!
//! Every cycle fans out one task per configured line, waits for all of them,
//! then sleeps for the poll interval. Shutdown is observed before each cycle,
//! during the sleep and between files inside a line.

use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::MonitorConfig;
use crate::db::ProductionStore;

use super::fs::SourceFs;
use super::poller::{LinePoller, LineReport};

/// Drives [`LinePoller`] over all configured lines until cancelled
pub struct Scheduler {
    poller: Arc<LinePoller>,
}

impl Scheduler {
    pub fn new(
        monitor: MonitorConfig,
        store: Arc<dyn ProductionStore>,
        fs: Arc<dyn SourceFs>,
    ) -> Self {
        Self {
            poller: Arc::new(LinePoller::new(store, fs, Arc::new(monitor))),
        }
    }

    /// Start the poll loop on its own task
    pub fn start(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    /// Poll until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) {
        let monitor = self.poller.monitor();
        info!(
            lines = monitor.lines.len(),
            poll_interval_secs = monitor.poll_interval_secs,
            "Scheduler started"
        );

        while !token.is_cancelled() {
            self.run_cycle(&token).await;

            tokio::select! {
                _ = tokio::time::sleep(monitor.poll_interval()) => {}
                _ = token.cancelled() => {}
            }
        }

        info!("Scheduler stopped");
    }

    /// Poll every configured line once, concurrently
    ///
    /// Returns the reports of the lines that completed. A line task that
    /// panics is logged and left out.
    pub async fn run_cycle(&self, token: &CancellationToken) -> Vec<LineReport> {
        let lines = &self.poller.monitor().lines;
        let mut tasks = JoinSet::new();

        for line in lines.iter().cloned() {
            let poller = Arc::clone(&self.poller);
            let token = token.clone();
            tasks.spawn(async move { poller.poll_line(&line, &token).await });
        }

        let mut reports = Vec::with_capacity(lines.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Line task failed"),
            }
        }

        debug!(lines = reports.len(), "Poll cycle complete");
        reports
    }
}
