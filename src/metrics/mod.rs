//! Extraction quality metrics
//!
//! Every worker outcome produces a [`QualityMetric`]. Metrics feed back into
//! strategy selection through [`moving_accuracy`], so recording must never
//! slow down or fail a crawl: workers push into an unbounded channel and a
//! background task drains it into storage. A failed send or insert is logged
//! and dropped.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::{QualityMetric, Storage, StorageResult};
use crate::strategy::ExtractionStrategy;

pub use crate::storage::PageType;

/// Number of recent metrics considered by the moving accuracy
pub const DEFAULT_ACCURACY_WINDOW: usize = 20;

/// Handle for recording quality metrics
///
/// Cheap to clone; one recorder is shared by all workers of a cycle.
#[derive(Clone)]
pub struct MetricsRecorder {
    tx: mpsc::UnboundedSender<QualityMetric>,
}

/// Background drain task; close it after the last recorder is dropped
pub struct MetricsDrain {
    handle: JoinHandle<u64>,
}

impl MetricsRecorder {
    /// Spawns the drain task and returns a recorder feeding it
    ///
    /// # Arguments
    ///
    /// * `storage` - Shared storage the drain task appends metrics to
    pub fn spawn<S>(storage: Arc<Mutex<S>>) -> (Self, MetricsDrain)
    where
        S: Storage + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<QualityMetric>();

        let handle = tokio::spawn(async move {
            let mut written: u64 = 0;
            while let Some(metric) = rx.recv().await {
                let mut guard = storage.lock().unwrap_or_else(|p| p.into_inner());
                match guard.insert_metric(&metric) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        warn!(
                            institution = %metric.institution,
                            error = %e,
                            "dropping quality metric, storage insert failed"
                        );
                    }
                }
            }
            debug!(written, "metrics drain finished");
            written
        });

        (Self { tx }, MetricsDrain { handle })
    }

    /// Records a metric
    ///
    /// Never fails: if the drain task is gone the metric is logged and
    /// dropped, and the crawl continues.
    pub fn record(&self, metric: QualityMetric) {
        if self.tx.send(metric).is_err() {
            warn!("metrics drain task gone, dropping quality metric");
        }
    }
}

impl MetricsDrain {
    /// Waits for all queued metrics to be written
    ///
    /// Returns the number of metrics persisted. All recorder clones must be
    /// dropped first or this waits forever.
    pub async fn close(self) -> u64 {
        self.handle.await.unwrap_or_else(|e| {
            warn!(error = %e, "metrics drain task panicked");
            0
        })
    }
}

/// Computes the moving accuracy for an institution
///
/// The mean accuracy over the most recent `window` metrics, restricted to one
/// extraction method when `method` is given. Returns `None` when no history
/// exists, which the strategy selector treats as "no history".
pub fn moving_accuracy<S: Storage + ?Sized>(
    storage: &S,
    institution: &str,
    method: Option<ExtractionStrategy>,
    window: usize,
) -> StorageResult<Option<f64>> {
    let accuracies = match method {
        Some(method) => storage.recent_accuracies(institution, method, window)?,
        None => storage.recent_accuracies_any_method(institution, window)?,
    };

    if accuracies.is_empty() {
        return Ok(None);
    }
    let mean = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
    Ok(Some(mean))
}
