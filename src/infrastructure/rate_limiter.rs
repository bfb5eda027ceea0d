//! 全进程共享的调用节流器
//!
//! 保证任意两次预言机调用的开始时间至少间隔 `min_interval`，与并发数无关：
//! 所有工作任务共用同一个实例（`Arc<RateLimiter>`），这是共享的速率预算而不是每个任务各自的。

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// 领取下一个调用时间片并等待到该时刻
    ///
    /// 时间片在锁内预订、锁外等待，多个任务排队时彼此不会互相阻塞在锁上。
    pub async fn acquire(&self) {
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next_slot {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next_slot = Some(slot + self.min_interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sequential_calls_are_spaced() {
        tokio_test::block_on(async {
            let limiter = RateLimiter::new(Duration::from_millis(30));
            let start = Instant::now();
            for _ in 0..4 {
                limiter.acquire().await;
            }
            // 第一次立即放行，之后每次至少间隔 30ms
            assert!(start.elapsed() >= Duration::from_millis(90));
        });
    }

    #[tokio::test]
    async fn test_budget_is_shared_across_tasks() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(25)));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut last = start;
        for handle in handles {
            last = last.max(handle.await.unwrap());
        }

        // 4 个时间片：0, 25, 50, 75ms
        assert!(last - start >= Duration::from_millis(75));
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
