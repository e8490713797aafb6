// =============================================================================
// Token bucket — shared interval-based rate limiter
// =============================================================================
//
// The backfill daemon and news engine both share a single process-wide
// bucket across many concurrent workers (one token per 300ms for trade
// batches, one per 500ms for social-media pagination). A semaphore refilled
// by a background ticker is the simplest correct design: workers `acquire`
// a permit before making the gated call, and permits regenerate on a fixed
// schedule rather than being returned by the caller.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

pub struct TokenBucket {
    semaphore: Arc<Semaphore>,
}

impl TokenBucket {
    /// Spawns the background refill task and returns a shareable handle.
    pub fn new(interval: Duration) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(0));
        let refill = semaphore.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                refill.add_permits(1);
            }
        });
        Arc::new(Self { semaphore })
    }

    /// Block until a token is available, consuming it.
    pub async fn acquire(&self) {
        self.semaphore.acquire().await.expect("semaphore never closed").forget();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_paced_by_interval() {
        let bucket = TokenBucket::new(Duration::from_millis(20));
        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        // Three acquires should take at least ~2 refill intervals.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
