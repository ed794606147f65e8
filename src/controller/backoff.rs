//! # Fibonacci Backoff
//!
//! Progressive requeue delays for Klusterlets whose reconciliation keeps failing.
//!
//! The sequence grows as min, min, 2*min, 3*min, 5*min ... capped at max.
//! Each resource keeps its own state so one failing Klusterlet does not slow
//! down the others.

/// Fibonacci sequence of delays in seconds
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    max_secs: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        Self {
            max_secs: max_secs.max(min_secs),
            previous: 0,
            current: min_secs,
        }
    }

    /// Next delay, advancing the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let delay = self.current.min(self.max_secs);
        let next = self.previous.saturating_add(self.current);
        self.previous = self.current;
        self.current = next.min(self.max_secs);
        delay
    }
}

/// Per-resource error backoff
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence() {
        let mut backoff = FibonacciBackoff::new(5, 1000);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(delays, vec![5, 5, 10, 15, 25, 40]);
    }

    #[test]
    fn test_capped_at_max() {
        let mut backoff = FibonacciBackoff::new(5, 12);
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(delays, vec![5, 5, 10, 12, 12]);
    }
}
