//! Bounded concurrent fan-out
//!
//! Every fan-out step waits for all of its sub-operations. A panicking
//! sub-operation yields `None` in its slot instead of tearing down the step.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Run `f` over `items` with at most `limit` in flight; results keep input order.
pub async fn fan_out<I, R, F, Fut>(items: Vec<I>, limit: usize, f: F) -> Vec<Option<R>>
where
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let sem = Arc::new(Semaphore::new(limit.max(1)));
    let mut slots: Vec<Option<R>> = Vec::with_capacity(items.len());
    let mut join_set: JoinSet<(usize, Option<R>)> = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        slots.push(None);
        let sem = sem.clone();
        let fut = f(item);
        join_set.spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            let outcome = AssertUnwindSafe(fut).catch_unwind().await;
            if outcome.is_err() {
                warn!(index, "fan-out task panicked");
            }
            (index, outcome.ok())
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = outcome,
            Err(e) => warn!(error = %e, "fan-out task failed to join"),
        }
    }
    slots
}
