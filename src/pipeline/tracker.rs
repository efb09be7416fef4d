use std::sync::Mutex;

use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run in flight; workers are blocked on empty buffers.
    Idle,
    /// The producer is still pushing seed URLs.
    Seeding,
    /// Seeding finished, items still in flight.
    Draining,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub seeded: usize,
    pub parsed: usize,
    pub parse_failures: usize,
    pub exported: usize,
    pub export_failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Parse,
    Export,
}

struct Inner {
    run: u64,
    seeding: bool,
    pending: usize,
    stats: RunStats,
    last: Option<RunStats>,
}

/// Counts seeds in flight and derives the run state from them. A seed stays
/// pending until it fails somewhere or its restaurant has been exported.
pub struct RunTracker {
    inner: Mutex<Inner>,
    state: watch::Sender<RunState>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            inner: Mutex::new(Inner {
                run: 0,
                seeding: false,
                pending: 0,
                stats: RunStats::default(),
                last: None,
            }),
            state,
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Start a new run unless one is still in flight. Returns the run number.
    pub fn begin_run(&self) -> Option<u64> {
        let mut inner = self.lock();
        if inner.seeding || inner.pending > 0 {
            return None;
        }
        inner.run += 1;
        inner.seeding = true;
        inner.stats = RunStats::default();
        self.publish(&mut inner);
        Some(inner.run)
    }

    pub fn item_seeded(&self) {
        let mut inner = self.lock();
        inner.pending += 1;
        inner.stats.seeded += 1;
    }

    pub fn seeding_done(&self) {
        let mut inner = self.lock();
        inner.seeding = false;
        self.publish(&mut inner);
    }

    pub fn record(&self, stage: StageKind, ok: bool) {
        let mut inner = self.lock();
        let s = &mut inner.stats;
        match (stage, ok) {
            (StageKind::Parse, true) => s.parsed += 1,
            (StageKind::Parse, false) => s.parse_failures += 1,
            (StageKind::Export, true) => s.exported += 1,
            (StageKind::Export, false) => s.export_failures += 1,
        }
    }

    /// The seed's journey through the pipeline ended, successfully or not.
    pub fn item_finished(&self) {
        let mut inner = self.lock();
        inner.pending = inner.pending.saturating_sub(1);
        self.publish(&mut inner);
    }

    /// Forget items that will never finish because their workers were
    /// cancelled or aborted. Returns how many were dropped.
    pub fn abandon_pending(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.pending;
        inner.pending = 0;
        inner.seeding = false;
        self.publish(&mut inner);
        dropped
    }

    pub fn current_stats(&self) -> RunStats {
        self.lock().stats
    }

    /// Stats of the most recently completed run.
    pub fn last_stats(&self) -> Option<RunStats> {
        self.lock().last
    }

    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == RunState::Idle).await;
    }

    fn publish(&self, inner: &mut Inner) {
        let next = if inner.seeding {
            RunState::Seeding
        } else if inner.pending > 0 {
            RunState::Draining
        } else {
            RunState::Idle
        };
        let prev = self.state.send_replace(next);
        if prev != RunState::Idle && next == RunState::Idle {
            let s = inner.stats;
            inner.last = Some(s);
            info!(
                run = inner.run,
                seeded = s.seeded,
                parsed = s.parsed,
                parse_failures = s.parse_failures,
                exported = s.exported,
                export_failures = s.export_failures,
                "Run finished"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Counters stay meaningful even if a holder panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_pending_items() {
        let t = RunTracker::new();
        assert_eq!(t.state(), RunState::Idle);

        assert_eq!(t.begin_run(), Some(1));
        assert_eq!(t.state(), RunState::Seeding);
        t.item_seeded();
        t.item_seeded();
        t.seeding_done();
        assert_eq!(t.state(), RunState::Draining);

        t.record(StageKind::Parse, false);
        t.item_finished();
        assert_eq!(t.state(), RunState::Draining);

        t.record(StageKind::Parse, true);
        t.record(StageKind::Export, true);
        t.item_finished();
        assert_eq!(t.state(), RunState::Idle);

        let s = t.last_stats().unwrap();
        assert_eq!(s.seeded, 2);
        assert_eq!(s.parse_failures, 1);
        assert_eq!(s.exported, 1);
    }

    #[test]
    fn overlapping_run_is_refused() {
        let t = RunTracker::new();
        assert!(t.begin_run().is_some());
        t.item_seeded();
        t.seeding_done();
        assert!(t.begin_run().is_none());
        t.item_finished();
        assert_eq!(t.begin_run(), Some(2));
    }

    #[test]
    fn abandoned_items_end_the_run() {
        let t = RunTracker::new();
        t.begin_run();
        t.item_seeded();
        t.item_seeded();
        t.item_seeded();
        assert_eq!(t.abandon_pending(), 3);
        assert_eq!(t.state(), RunState::Idle);
        assert_eq!(t.last_stats().unwrap().seeded, 3);

        // late reports from dying workers are harmless
        t.item_finished();
        assert_eq!(t.state(), RunState::Idle);
    }

    #[test]
    fn empty_run_goes_straight_to_idle() {
        let t = RunTracker::new();
        t.begin_run();
        t.seeding_done();
        assert_eq!(t.state(), RunState::Idle);
        assert_eq!(t.last_stats(), Some(RunStats::default()));
    }
}
