//! Embedded worker: consumes jobs from the broker and runs them through the
//! shared orchestrator.
//!
//! Lives in the API process by default so jobs reuse the warmed browser and
//! cache. Parallelism is derived from the browser pool's tab limit; a wider
//! worker would only starve itself on the tab semaphore.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scrape::{Orchestrator, ScrapeOptions};
use crate::utils::constants::JOB_TIMEOUT;
use crate::utils::Deadline;

use super::{CrawlJobPayload, JobBroker};

/// How long one claim call blocks on the queue before re-checking shutdown.
const CLAIM_WAIT: Duration = Duration::from_secs(2);

/// Pause after a broker error before retrying the claim loop, so a dead
/// Redis does not spin the worker hot.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Handle to the running worker slots.
pub struct Worker {
    slots: Vec<JoinHandle<()>>,
    stop: watch::Sender<bool>,
}

impl Worker {
    /// Spawn `concurrency` consumer slots.
    pub fn spawn(broker: JobBroker, orchestrator: Arc<Orchestrator>, concurrency: usize) -> Self {
        let (stop, _) = watch::channel(false);
        let slots = (0..concurrency)
            .map(|slot| {
                let broker = broker.clone();
                let orchestrator = Arc::clone(&orchestrator);
                let mut stop_rx = stop.subscribe();
                tokio::spawn(async move {
                    debug!(slot, "Worker slot started");
                    loop {
                        if *stop_rx.borrow() {
                            break;
                        }
                        tokio::select! {
                            claimed = broker.claim(CLAIM_WAIT) => match claimed {
                                Ok(Some((id, payload))) => {
                                    run_job(&broker, &orchestrator, &id, payload).await;
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!(slot, "Worker claim failed: {e}");
                                    tokio::time::sleep(ERROR_BACKOFF).await;
                                }
                            },
                            _ = stop_rx.changed() => break,
                        }
                    }
                    debug!(slot, "Worker slot stopped");
                })
            })
            .collect();

        info!(concurrency, "Embedded worker started");
        Self { slots, stop }
    }

    /// Stop claiming and wait for in-flight jobs, bounded by `drain_deadline`.
    pub async fn shutdown(self, drain_deadline: Duration) {
        let _ = self.stop.send(true);
        let drain = async {
            for slot in self.slots {
                let _ = slot.await;
            }
        };
        if tokio::time::timeout(drain_deadline, drain).await.is_err() {
            warn!("Worker drain deadline reached; jobs will be re-run after restart");
        }
        info!("Embedded worker stopped");
    }
}

/// Execute one claimed job and report the outcome to the broker.
///
/// The job's deadline is independent of any submitter connection; a client
/// that disconnected long ago still gets its result stored.
async fn run_job(
    broker: &JobBroker,
    orchestrator: &Orchestrator,
    id: &str,
    payload: CrawlJobPayload,
) {
    debug!(id, url = %payload.url, mode = %payload.mode, "Job started");

    let outcome = orchestrator
        .scrape(
            &payload.url,
            payload.mode,
            &ScrapeOptions::default(),
            Deadline::within(JOB_TIMEOUT),
        )
        .await;

    let report = match outcome {
        Ok(result) => match serde_json::to_string(&result) {
            Ok(json) => broker.complete(id, &json).await,
            Err(e) => broker.fail(id, &format!("encode result: {e}")).await,
        },
        Err(e) if e.is_retryable() => broker.retry_or_fail(id, &e.to_string()).await.map(|_| ()),
        Err(e) => broker.fail(id, &e.to_string()).await,
    };

    if let Err(e) = report {
        // The broker will re-deliver nothing on its own here; the job stays
        // active until retention expires it. Operator visibility is all we
        // can offer.
        warn!(id, "Failed to report job outcome: {e}");
    }
}

// Retryability decisions are covered in crate::error tests; the claim loop
// itself is exercised end to end in the integration suite with a live
// broker, see tests/jobs_roundtrip.rs.
