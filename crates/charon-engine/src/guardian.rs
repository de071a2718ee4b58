//! Guardian: process-wide per-key lock registry
//!
//! Every mutation of an account serializes on a lock keyed by
//! `tenant:account`. Acquisition carries a timeout, and the lock is
//! reentrant for the same operation token so action triggers fired
//! mid-debit can legally re-enter.

use charon_core::error::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct LockState {
    owner: u64,
    depth: u32,
    waiters: VecDeque<Arc<Notify>>,
}

pub struct Guardian {
    timeout: Duration,
    next_token: AtomicU64,
    locks: Mutex<HashMap<String, LockState>>,
}

impl Guardian {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_token: AtomicU64::new(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh operation token; everything one logical operation does under
    /// the guardian shares it
    pub fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Exclusive access to the key, waiting at most the configured
    /// timeout. Re-entry with the owning token succeeds immediately.
    pub async fn acquire(self: &Arc<Self>, key: &str, token: u64) -> AppResult<GuardianGuard> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let notify = {
                let mut locks = self.locks.lock();
                match locks.get_mut(key) {
                    None => {
                        locks.insert(
                            key.to_string(),
                            LockState {
                                owner: token,
                                depth: 1,
                                waiters: VecDeque::new(),
                            },
                        );
                        return Ok(GuardianGuard {
                            guardian: self.clone(),
                            key: key.to_string(),
                            token,
                        });
                    }
                    Some(state) if state.owner == 0 => {
                        state.owner = token;
                        state.depth = 1;
                        return Ok(GuardianGuard {
                            guardian: self.clone(),
                            key: key.to_string(),
                            token,
                        });
                    }
                    Some(state) if state.owner == token => {
                        state.depth += 1;
                        return Ok(GuardianGuard {
                            guardian: self.clone(),
                            key: key.to_string(),
                            token,
                        });
                    }
                    Some(state) => {
                        let notify = Arc::new(Notify::new());
                        state.waiters.push_back(notify.clone());
                        notify
                    }
                }
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AppError::GuardianTimeout(key.to_string()));
            }
            if tokio::time::timeout(remaining, notify.notified()).await.is_err() {
                return Err(AppError::GuardianTimeout(key.to_string()));
            }
        }
    }

    fn release(&self, key: &str, token: u64) {
        let mut locks = self.locks.lock();
        let Some(state) = locks.get_mut(key) else {
            return;
        };
        if state.owner != token {
            return;
        }
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        if let Some(waiter) = state.waiters.pop_front() {
            // hand the slot over; the waiter re-runs the acquire loop
            state.owner = 0;
            waiter.notify_one();
        } else {
            locks.remove(key);
        }
    }
}

/// Held lock; released on drop
pub struct GuardianGuard {
    guardian: Arc<Guardian>,
    key: String,
    token: u64,
}

impl std::fmt::Debug for GuardianGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardianGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for GuardianGuard {
    fn drop(&mut self) {
        self.guardian.release(&self.key, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive_then_release() {
        let guardian = Arc::new(Guardian::new(Duration::from_millis(50)));
        let t1 = guardian.next_token();
        let guard = guardian.acquire("cgrates.org:1001", t1).await.unwrap();

        // a different operation times out while the lock is held
        let t2 = guardian.next_token();
        let err = guardian.acquire("cgrates.org:1001", t2).await.unwrap_err();
        assert!(matches!(err, AppError::GuardianTimeout(_)));

        drop(guard);
        let _guard = guardian.acquire("cgrates.org:1001", t2).await.unwrap();
    }

    #[tokio::test]
    async fn test_reentrant_same_token() {
        let guardian = Arc::new(Guardian::new(Duration::from_millis(50)));
        let token = guardian.next_token();
        let outer = guardian.acquire("cgrates.org:1001", token).await.unwrap();
        let inner = guardian.acquire("cgrates.org:1001", token).await.unwrap();
        drop(inner);
        // still held after the inner release
        let other = guardian.next_token();
        assert!(guardian.acquire("cgrates.org:1001", other).await.is_err());
        drop(outer);
        assert!(guardian.acquire("cgrates.org:1001", other).await.is_ok());
    }

    #[tokio::test]
    async fn test_independent_keys_do_not_block() {
        let guardian = Arc::new(Guardian::new(Duration::from_millis(50)));
        let t1 = guardian.next_token();
        let t2 = guardian.next_token();
        let _a = guardian.acquire("cgrates.org:1001", t1).await.unwrap();
        let _b = guardian.acquire("cgrates.org:1002", t2).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_wakes_up() {
        let guardian = Arc::new(Guardian::new(Duration::from_secs(1)));
        let t1 = guardian.next_token();
        let guard = guardian.acquire("k", t1).await.unwrap();

        let g2 = guardian.clone();
        let waiter = tokio::spawn(async move {
            let t2 = g2.next_token();
            g2.acquire("k", t2).await.map(|_| ())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        waiter.await.unwrap().unwrap();
    }
}
