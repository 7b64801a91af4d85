//! Bounded, order-preserving fan-out of per-item model work.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ItemError, ModelCallError};
use crate::llm::ModelClient;
use crate::schema::Stage;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_concurrency: usize,
    pub call_timeout: Duration,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            call_timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }
}

impl RunOptions {
    /// One model call bounded by the call timeout and the cancellation token.
    pub async fn invoke(
        &self,
        client: &dyn ModelClient,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, ModelCallError> {
        if self.cancel.is_cancelled() {
            return Err(ModelCallError::Cancelled);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ModelCallError::Cancelled),
            outcome = tokio::time::timeout(self.call_timeout, client.invoke(prompt, system)) => {
                outcome.unwrap_or(Err(ModelCallError::Timeout { after: self.call_timeout }))
            }
        }
    }
}

/// An item that was excluded from a stage's output, and why.
#[derive(Debug)]
pub struct ItemFailure {
    pub item_id: String,
    pub error: ItemError,
}

/// Stage output together with the items that failed along the way.
#[derive(Debug)]
pub struct Staged<T> {
    pub output: T,
    pub failures: Vec<ItemFailure>,
}

impl<T> Staged<T> {
    pub fn new(output: T, failures: Vec<ItemFailure>) -> Self {
        Self { output, failures }
    }
}

/// Run `work` over `items` with at most `max_concurrency` in flight.
///
/// Successes come back in input order regardless of completion order.
/// Failures are logged with the stage and item id and returned alongside.
pub async fn run_items<I, T, F, Fut>(
    stage: Stage,
    items: Vec<(String, I)>,
    options: &RunOptions,
    work: F,
) -> Staged<Vec<(String, T)>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, ItemError>>,
{
    let outcomes: Vec<(String, Result<T, ItemError>)> = stream::iter(items)
        .map(|(item_id, item)| {
            let cancel = options.cancel.clone();
            let task = work(item);
            async move {
                // Not started yet: skip rather than issue a new call
                if cancel.is_cancelled() {
                    return (item_id, Err(ItemError::from(ModelCallError::Cancelled)));
                }
                (item_id, task.await)
            }
        })
        .buffered(options.max_concurrency.max(1))
        .collect()
        .await;

    let mut successes = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (item_id, outcome) in outcomes {
        match outcome {
            Ok(value) => successes.push((item_id, value)),
            Err(error) => {
                warn!(
                    stage = %stage,
                    item_id = %item_id,
                    error = %error,
                    "Item failed, excluding from stage output"
                );
                failures.push(ItemFailure { item_id, error });
            }
        }
    }

    Staged::new(successes, failures)
}
