use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use courier_core::RateLimit;

/// Rate-limit state of one conversation.
///
/// Pure bookkeeping: nothing here sleeps, spawns or reads the clock, so the
/// caller supplies `now` and holds the lock around every call.
#[derive(Debug)]
pub struct SlidingWindow<T> {
    starts: VecDeque<Instant>,
    pending: VecDeque<T>,
    drain_scheduled: bool,
}

impl<T> Default for SlidingWindow<T> {
    fn default() -> Self {
        Self {
            starts: VecDeque::new(),
            pending: VecDeque::new(),
            drain_scheduled: false,
        }
    }
}

impl<T> SlidingWindow<T> {
    /// Forgets starts that are a full window old or older.
    pub fn prune(&mut self, limit: &RateLimit, now: Instant) {
        while let Some(&oldest) = self.starts.front() {
            if now.saturating_duration_since(oldest) >= limit.window {
                self.starts.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_capacity(&self, limit: &RateLimit) -> bool {
        self.starts.len() < limit.max_calls as usize
    }

    /// Records a start at `now` if a new invocation may run immediately.
    ///
    /// Nothing jumps the queue: while invocations are pending, new ones must
    /// queue behind them even if the window has room.
    pub fn try_admit(&mut self, limit: &RateLimit, now: Instant) -> bool {
        self.prune(limit, now);
        if self.pending.is_empty() && self.has_capacity(limit) {
            self.starts.push_back(now);
            true
        } else {
            false
        }
    }

    /// Queues `task` and returns its 1-based position.
    pub fn enqueue(&mut self, task: T) -> usize {
        self.pending.push_back(task);
        self.pending.len()
    }

    /// Releases the head of the queue if the window has room, recording its
    /// start at `now`.
    pub fn admit_next(&mut self, limit: &RateLimit, now: Instant) -> Option<T> {
        self.prune(limit, now);
        if !self.has_capacity(limit) {
            return None;
        }
        let task = self.pending.pop_front()?;
        self.starts.push_back(now);
        Some(task)
    }

    /// Time until the window has room again, zero if it has room now.
    pub fn wait_time(&self, limit: &RateLimit, now: Instant) -> Duration {
        if self.has_capacity(limit) {
            return Duration::ZERO;
        }
        self.starts
            .front()
            .map(|&oldest| (oldest + limit.window).saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Marks a drain as owed. Returns `false` if one already is.
    pub fn claim_drain(&mut self) -> bool {
        !std::mem::replace(&mut self.drain_scheduled, true)
    }

    pub fn release_drain(&mut self) {
        self.drain_scheduled = false;
    }

    pub fn drain_scheduled(&self) -> bool {
        self.drain_scheduled
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn recent_starts(&self) -> usize {
        self.starts.len()
    }

    /// Nothing queued, nothing owed and no start still inside the window.
    pub fn is_idle(&self, limit: &RateLimit, now: Instant) -> bool {
        self.pending.is_empty()
            && !self.drain_scheduled
            && self
                .starts
                .back()
                .is_none_or(|&newest| now.saturating_duration_since(newest) >= limit.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit() -> RateLimit {
        RateLimit::new(2, Duration::from_secs(1))
    }

    #[test]
    fn admits_up_to_max_within_window() {
        let t0 = Instant::now();
        let mut window = SlidingWindow::<u8>::default();

        assert!(window.try_admit(&limit(), t0));
        assert!(window.try_admit(&limit(), t0 + Duration::from_millis(100)));
        assert!(!window.try_admit(&limit(), t0 + Duration::from_millis(200)));
        assert_eq!(
            window.wait_time(&limit(), t0 + Duration::from_millis(200)),
            Duration::from_millis(800)
        );

        // The oldest start leaves the window exactly one window later.
        assert!(window.try_admit(&limit(), t0 + Duration::from_secs(1)));
        assert_eq!(window.recent_starts(), 2);
    }

    #[test]
    fn queued_tasks_block_fast_path() {
        let t0 = Instant::now();
        let mut window = SlidingWindow::default();
        window.try_admit(&limit(), t0);
        window.try_admit(&limit(), t0);

        assert_eq!(window.enqueue("a"), 1);
        assert_eq!(window.enqueue("b"), 2);

        let later = t0 + Duration::from_secs(5);
        assert!(!window.try_admit(&limit(), later));
        assert_eq!(window.admit_next(&limit(), later), Some("a"));
        assert_eq!(window.admit_next(&limit(), later), Some("b"));
        assert_eq!(window.admit_next(&limit(), later), None);
        assert!(!window.is_idle(&limit(), later));
        assert!(window.is_idle(&limit(), later + Duration::from_secs(1)));
    }

    #[test]
    fn drain_claim_is_exclusive() {
        let mut window = SlidingWindow::<()>::default();

        assert!(window.claim_drain());
        assert!(!window.claim_drain());
        window.release_drain();
        assert!(window.claim_drain());
    }
}
