//! Rate-limited outbound command queues (§4.A, component A).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One pending outbound lobby line.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub line: String,
}

impl QueuedCommand {
    /// Size in bytes as counted against the sliding-window budget.
    pub fn size(&self) -> usize {
        self.line.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct SentRecord {
    at: Instant,
    size: usize,
}

/// Two FIFO queues (`normal`, `low`) paced against a sliding-window byte
/// budget over the last `send_record_period` seconds (§4.A).
///
/// Insertion order is preserved within each queue; there is no starvation
/// protection between queues, so callers must never put a critical command
/// on `low` (the spec's own caveat).
pub struct CommandQueue {
    normal: VecDeque<QueuedCommand>,
    low: VecDeque<QueuedCommand>,
    sent: VecDeque<SentRecord>,
    send_record_period: Duration,
    max_bytes_sent: usize,
    max_low_prio_bytes_sent: usize,
}

impl CommandQueue {
    pub fn new(send_record_period: Duration, max_bytes_sent: usize, max_low_prio_bytes_sent: usize) -> Self {
        Self {
            normal: VecDeque::new(),
            low: VecDeque::new(),
            sent: VecDeque::new(),
            send_record_period,
            max_bytes_sent,
            max_low_prio_bytes_sent,
        }
    }

    pub fn push_normal(&mut self, line: impl Into<String>) {
        self.normal.push_back(QueuedCommand { line: line.into() });
    }

    pub fn push_low(&mut self, line: impl Into<String>) {
        self.low.push_back(QueuedCommand { line: line.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.normal.is_empty() && self.low.is_empty()
    }

    fn purge_window(&mut self, now: Instant) {
        while let Some(front) = self.sent.front() {
            if now.duration_since(front.at) > self.send_record_period {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }

    fn already_sent(&self) -> usize {
        self.sent.iter().map(|r| r.size).sum()
    }

    fn record_send(&mut self, now: Instant, size: usize) {
        self.sent.push_back(SentRecord { at: now, size });
    }

    /// Drains as many head-of-queue commands as the byte budget allows for
    /// this tick: `normal` first (iff `already_sent + size + 5 <
    /// max_bytes_sent`), then `low` (iff `already_sent + size + 5 <
    /// max_low_prio_bytes_sent`). Each accepted send updates the sliding
    /// window immediately so a burst of small commands in one tick is
    /// still budget-accurate.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<String> {
        self.purge_window(now);
        let mut sent_lines = Vec::new();

        while let Some(head) = self.normal.front() {
            let size = head.size();
            if self.already_sent() + size + 5 < self.max_bytes_sent {
                let cmd = self.normal.pop_front().unwrap();
                self.record_send(now, cmd.size());
                sent_lines.push(cmd.line);
            } else {
                break;
            }
        }

        while let Some(head) = self.low.front() {
            let size = head.size();
            if self.already_sent() + size + 5 < self.max_low_prio_bytes_sent {
                let cmd = self.low.pop_front().unwrap();
                self.record_send(now, cmd.size());
                sent_lines.push(cmd.line);
            } else {
                break;
            }
        }

        sent_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order_within_budget() {
        let mut q = CommandQueue::new(Duration::from_secs(5), 1000, 200);
        for i in 0..5 {
            q.push_normal(format!("MSG {i}"));
        }
        let now = Instant::now();
        let sent = q.drain_ready(now);
        assert_eq!(sent, vec!["MSG 0", "MSG 1", "MSG 2", "MSG 3", "MSG 4"]);
    }

    #[test]
    fn never_exceeds_budget_in_a_window() {
        let mut q = CommandQueue::new(Duration::from_millis(500), 40, 40);
        for i in 0..200 {
            q.push_normal(format!("SAYBATTLE message number {i}"));
        }
        let start = Instant::now();
        let mut total_sent = 0usize;
        for tick in 0..500u32 {
            let now = start + Duration::from_millis(tick as u64 * 10);
            let lines = q.drain_ready(now);
            let bytes: usize = lines.iter().map(|l| l.len()).sum();
            total_sent += bytes;
            // Property from §8: for every completed send in the trailing
            // window, sum(size)+5 <= max_bytes_sent at the moment of send.
            assert!(q.already_sent() + 5 <= q.max_bytes_sent || q.sent.is_empty());
            if lines.is_empty() && q.is_empty() {
                break;
            }
        }
        assert!(total_sent > 0);
    }

    #[test]
    fn low_priority_never_starves_correctness_but_can_lag() {
        let mut q = CommandQueue::new(Duration::from_secs(1), 10, 1000);
        q.push_normal("a very very long normal message that will not fit");
        q.push_low("short");
        let now = Instant::now();
        let sent = q.drain_ready(now);
        // Normal doesn't fit the tiny budget, but low prio has its own
        // separate budget and is independent.
        assert_eq!(sent, vec!["short"]);
    }
}
