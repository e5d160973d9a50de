//! Reconciliation schedule.
//!
//! Decides when the cheap volume/mute refresh and the expensive session
//! re-match run. Ticks never overlap: a tick that is still in flight when
//! the next one falls due causes that one to be skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shortest period the schedule accepts.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// What a tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// Re-read volume and mute from the current handles
    Refresh,

    /// Re-run session matching to pick up new or stopped applications
    Rescan,
}

/// Fixed-period tick schedule with a coarser rescan period.
#[derive(Debug)]
pub struct ReconcileSchedule {
    period: Duration,
    rescan_every: u32,
    next_due: Option<Instant>,
    in_flight: Option<Instant>,
    ticks: u64,
    skipped: u64,
    cancelled: bool,
}

impl ReconcileSchedule {
    /// `rescan_every` of zero is treated as one (every tick rescans). A
    /// `period` shorter than [`MIN_PERIOD`] is raised to it.
    pub fn new(period: Duration, rescan_every: u32) -> Self {
        Self {
            period: period.max(MIN_PERIOD),
            rescan_every: rescan_every.max(1),
            next_due: None,
            in_flight: None,
            ticks: 0,
            skipped: 0,
            cancelled: false,
        }
    }

    /// Arm the schedule; the first tick falls due one period after `now`.
    pub fn start(&mut self, now: Instant) {
        if !self.cancelled {
            self.next_due = Some(now + self.period);
        }
    }

    /// Begin a tick if one is due. The caller must call [`finish`](Self::finish)
    /// once the tick's work is done.
    pub fn poll(&mut self, now: Instant) -> Option<TickKind> {
        if self.cancelled || self.in_flight.is_some() {
            return None;
        }
        let due = self.next_due?;
        if now < due {
            return None;
        }

        self.ticks += 1;
        self.in_flight = Some(due);

        if self.ticks % u64::from(self.rescan_every) == 0 {
            Some(TickKind::Rescan)
        } else {
            Some(TickKind::Refresh)
        }
    }

    /// Complete the in-flight tick. Periods that elapsed while it ran are skipped.
    pub fn finish(&mut self, now: Instant) {
        let Some(due) = self.in_flight.take() else {
            return;
        };
        if self.cancelled {
            return;
        }

        let mut next = due + self.period;
        while next <= now {
            next += self.period;
            self.skipped += 1;
        }
        self.next_due = Some(next);
    }

    /// Stop the schedule; no further ticks are produced.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.next_due = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks started so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks dropped because the previous one overran.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// Shutdown flag that can be raised from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_secs(2);

    #[test]
    fn test_every_nth_tick_rescans() {
        let start = Instant::now();
        let mut schedule = ReconcileSchedule::new(PERIOD, 5);
        schedule.start(start);

        let mut kinds = Vec::new();
        for i in 1..=10u32 {
            let now = start + PERIOD * i;
            let kind = schedule.poll(now).unwrap();
            schedule.finish(now);
            kinds.push(kind);
        }

        assert_eq!(kinds[3], TickKind::Refresh);
        assert_eq!(kinds[4], TickKind::Rescan);
        assert_eq!(kinds[9], TickKind::Rescan);
        assert_eq!(
            kinds.iter().filter(|k| **k == TickKind::Rescan).count(),
            2
        );
    }

    #[test]
    fn test_not_due_before_period() {
        let start = Instant::now();
        let mut schedule = ReconcileSchedule::new(PERIOD, 5);
        assert_eq!(schedule.poll(start + PERIOD), None);

        schedule.start(start);
        assert_eq!(schedule.poll(start + Duration::from_millis(1999)), None);
        assert!(schedule.poll(start + PERIOD).is_some());
    }

    #[test]
    fn test_overrunning_tick_skips_instead_of_queueing() {
        let start = Instant::now();
        let mut schedule = ReconcileSchedule::new(PERIOD, 5);
        schedule.start(start);

        assert!(schedule.poll(start + PERIOD).is_some());
        // Still running when the next tick falls due.
        assert_eq!(schedule.poll(start + PERIOD * 2), None);
        assert_eq!(schedule.poll(start + PERIOD * 3), None);

        let finished = start + PERIOD * 3 + Duration::from_millis(500);
        schedule.finish(finished);

        assert_eq!(schedule.skipped(), 2);
        assert_eq!(schedule.next_due(), Some(start + PERIOD * 4));
        assert_eq!(schedule.poll(finished), None);
        assert!(schedule.poll(start + PERIOD * 4).is_some());
        assert_eq!(schedule.ticks(), 2);
    }

    #[test]
    fn test_zero_period_is_floored() {
        let start = Instant::now();
        let mut schedule = ReconcileSchedule::new(Duration::ZERO, 0);
        assert_eq!(schedule.period(), MIN_PERIOD);
        schedule.start(start);

        let now = start + Duration::from_millis(5);
        assert_eq!(schedule.poll(now), Some(TickKind::Rescan));
        schedule.finish(now);
        assert_eq!(schedule.next_due(), Some(start + Duration::from_millis(6)));
        assert_eq!(schedule.skipped(), 4);
    }

    #[test]
    fn test_cancel_stops_ticks() {
        let start = Instant::now();
        let mut schedule = ReconcileSchedule::new(PERIOD, 5);
        schedule.start(start);
        schedule.cancel();

        assert_eq!(schedule.poll(start + PERIOD * 10), None);
        schedule.start(start);
        assert_eq!(schedule.next_due(), None);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let handler = token.clone();
        assert!(!token.is_cancelled());
        std::thread::spawn(move || handler.cancel()).join().unwrap();
        assert!(token.is_cancelled());
    }
}
