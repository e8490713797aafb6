// =============================================================================
// Bounded worker-pool fan-out
// =============================================================================
//
// Every batch stage in this crate (bar discovery, trade backfill, tier
// computation, news refresh/backfill) fans a list of items out to a fixed
// number of concurrent workers and collects their results. This is the one
// place that pattern is implemented, parameterized by worker count, so each
// call site just supplies the per-item future.
// =============================================================================

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run `f(item)` for every item in `items`, at most `workers` concurrently,
/// and return results in the same order as `items`. Panicking tasks are
/// treated as an internal invariant violation and propagate (`JoinError`
/// unwrap).
pub async fn for_each_bounded<T, F, Fut, R>(items: Vec<T>, workers: usize, f: F) -> Vec<R>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let workers = workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let f = Arc::new(f);
    let mut set = JoinSet::new();

    for (idx, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let f = f.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let result = f(item).await;
            (idx, result)
        });
    }

    let mut results: Vec<Option<R>> = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (idx, result) = joined.expect("worker task panicked");
        if idx >= results.len() {
            results.resize_with(idx + 1, || None);
        }
        results[idx] = Some(result);
    }

    results.into_iter().map(|r| r.expect("every index populated")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn preserves_order_under_concurrency() {
        let items: Vec<i32> = (0..20).collect();
        let results = for_each_bounded(items.clone(), 4, |i| async move { i * 2 }).await;
        let expected: Vec<i32> = items.iter().map(|i| i * 2).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn respects_worker_cap() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let items: Vec<i32> = (0..50).collect();

        let active2 = active.clone();
        let max_seen2 = max_seen.clone();
        for_each_bounded(items, 5, move |_| {
            let active = active2.clone();
            let max_seen = max_seen2.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(max_seen.load(Ordering::SeqCst) <= 5);
    }
}
