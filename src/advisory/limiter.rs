use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// 每处理这么多次请求清理一次闲置用户。
const SWEEP_EVERY: usize = 64;

/// 按用户的滑动窗口限流器。
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: DashMap<String, VecDeque<Instant>>,
    requests: AtomicUsize,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: DashMap::new(),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn limit(&self) -> usize {
        self.max_requests
    }

    /// 额度内则记一次并返回 true，超额返回 false 且不记录。
    pub fn try_acquire(&self, user: &str) -> bool {
        let now = Instant::now();
        if self.requests.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.prune_idle(now);
        }
        let mut entry = self.hits.entry(user.to_string()).or_default();
        while let Some(oldest) = entry.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= self.max_requests {
            let idle = entry.is_empty();
            drop(entry);
            if idle {
                self.hits.remove(user);
            }
            return false;
        }
        entry.push_back(now);
        true
    }

    /// 移除窗口内已没有请求的用户，返回移除数量。
    pub fn sweep(&self) -> usize {
        self.prune_idle(Instant::now())
    }

    pub fn tracked_users(&self) -> usize {
        self.hits.len()
    }

    fn prune_idle(&self, now: Instant) -> usize {
        let before = self.hits.len();
        self.hits.retain(|_, hits| {
            hits.back()
                .is_some_and(|last| now.saturating_duration_since(*last) < self.window)
        });
        before.saturating_sub(self.hits.len())
    }
}
