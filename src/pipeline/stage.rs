use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::tracker::{RunTracker, StageKind};
use crate::buffer::StageBuffer;

/// One pipeline step. The shared worker loop takes from the input buffer,
/// calls `process` with the worker's own state, and puts the result on the
/// next buffer.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;
    /// State owned by exactly one worker for its lifetime.
    type Worker: Send + 'static;
    type Error: Display + Send;

    const KIND: StageKind;

    fn new_worker(&self) -> Self::Worker;

    /// Short description of an item for log lines.
    fn label(item: &Self::In) -> String;

    async fn process(&self, worker: &mut Self::Worker, item: Self::In) -> Result<Self::Out, Self::Error>;

    /// Runs on every worker exit, including cancellation.
    async fn retire_worker(&self, worker: Self::Worker);
}

pub(crate) async fn run_worker<S: Stage>(
    stage: Arc<S>,
    id: usize,
    input: Arc<StageBuffer<S::In>>,
    output: Option<Arc<StageBuffer<S::Out>>>,
    tracker: Arc<RunTracker>,
    cancel: CancellationToken,
) {
    let mut worker = stage.new_worker();
    debug!(stage = ?S::KIND, worker = id, "Worker started");

    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = input.take() => item,
        };
        let Some(item) = item else { break };
        let label = S::label(&item);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(stage = ?S::KIND, item = %label, "Abandoned in-flight item on shutdown");
                tracker.item_finished();
                break;
            }
            outcome = stage.process(&mut worker, item) => outcome,
        };

        match outcome {
            Ok(out) => {
                tracker.record(S::KIND, true);
                match &output {
                    Some(next) => {
                        if next.put(out).await.is_err() {
                            warn!(stage = ?S::KIND, item = %label, buffer = next.name(), "Downstream closed, dropping result");
                            tracker.item_finished();
                        }
                    }
                    None => tracker.item_finished(),
                }
            }
            Err(e) => {
                warn!(stage = ?S::KIND, item = %label, "{}", e);
                tracker.record(S::KIND, false);
                tracker.item_finished();
            }
        }
    }

    stage.retire_worker(worker).await;
    debug!(stage = ?S::KIND, worker = id, "Worker stopped");
}
