//! Single-shot wakeup primitive driven by the earliest known future timestamp.
//!
//! A [`TimerGate`] lets the timer queue processor sleep until the moment it actually has
//! work to do, instead of polling on a fixed interval: every time a poll's look-ahead read
//! (see the timer queue processor design notes) learns of an earlier deadline, the gate is
//! reprogrammed; the processor's `select!` loop awaits [`TimerGate::wait`] alongside its
//! other branches.
use std::time::Duration;

use tokio::time::Instant;

/// Tracks the next timestamp (milliseconds since epoch) the owner should wake up at.
pub struct TimerGate {
    next_fire_ms: Option<i64>,
}

impl TimerGate {
    /// A gate with nothing scheduled: [`wait`](Self::wait) never resolves until armed.
    pub fn new() -> Self {
        TimerGate { next_fire_ms: None }
    }

    /// Arm the gate to fire at `timestamp_ms`, unless an earlier deadline is already set.
    pub fn update(&mut self, timestamp_ms: i64) {
        match self.next_fire_ms {
            Some(current) if current <= timestamp_ms => {}
            _ => self.next_fire_ms = Some(timestamp_ms),
        }
    }

    /// Unconditionally (re)arm the gate, replacing any previously scheduled deadline.
    pub fn set(&mut self, timestamp_ms: i64) {
        self.next_fire_ms = Some(timestamp_ms);
    }

    /// Clear any scheduled deadline.
    pub fn clear(&mut self) {
        self.next_fire_ms = None;
    }

    /// Sleep until the armed deadline, given the current time. Never resolves if unarmed.
    pub async fn wait(&self, now_ms: i64) {
        match self.next_fire_ms {
            None => std::future::pending().await,
            Some(deadline) => {
                let delay_ms = (deadline - now_ms).max(0) as u64;
                tokio::time::sleep_until(Instant::now() + Duration::from_millis(delay_ms)).await;
            }
        }
    }

    /// The currently armed deadline, if any.
    pub fn next_fire_ms(&self) -> Option<i64> {
        self.next_fire_ms
    }
}

impl Default for TimerGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::TimerGate;

    #[test]
    fn update_keeps_the_earlier_deadline() {
        let mut gate = TimerGate::new();
        gate.update(100);
        gate.update(200);
        assert_eq!(gate.next_fire_ms(), Some(100));
    }

    #[test]
    fn set_overrides_regardless_of_order() {
        let mut gate = TimerGate::new();
        gate.update(100);
        gate.set(500);
        assert_eq!(gate.next_fire_ms(), Some(500));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resolves_at_armed_deadline() {
        let mut gate = TimerGate::new();
        gate.set(150);
        let started = tokio::time::Instant::now();
        gate.wait(100).await;
        assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    }

    #[test]
    fn unarmed_gate_has_no_deadline() {
        let gate = TimerGate::new();
        assert_eq!(gate.next_fire_ms(), None);
    }
}
