//! Per-worker logical clock accounting for one model instance.

use std::collections::HashMap;

use crate::server::{ClockVal, WorkerId};
use crate::utils::ParasolError;

/// Tracks the logical clock of every worker registered to a model instance
/// and derives the minimum clock across them. The min clock only ever moves
/// forward, including across worker removals.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    progresses: HashMap<WorkerId, ClockVal>,
    min_clock: ClockVal,
}

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker {
            progresses: HashMap::new(),
            min_clock: 0,
        }
    }

    /// Installs the initial worker set, all at clock 0.
    pub fn init(&mut self, workers: &[WorkerId]) {
        self.progresses = workers.iter().map(|w| (*w, 0)).collect();
        self.min_clock = 0;
    }

    /// Increments `worker`'s clock. Returns `Some(new_min)` iff the min
    /// clock strictly increased.
    pub fn advance(
        &mut self,
        worker: WorkerId,
    ) -> Result<Option<ClockVal>, ParasolError> {
        let clock = match self.progresses.get_mut(&worker) {
            Some(clock) => clock,
            None => {
                return logged_err!(
                    "advance called for unregistered worker {}",
                    worker
                );
            }
        };
        *clock += 1;
        Ok(self.refresh_min())
    }

    /// Current clock of `worker`, or `None` if it is not registered.
    pub fn progress_of(&self, worker: WorkerId) -> Option<ClockVal> {
        self.progresses.get(&worker).copied()
    }

    /// Minimum clock across all registered workers; retains its last value
    /// when the set is empty (0 at startup).
    #[inline]
    pub fn min_clock(&self) -> ClockVal {
        self.min_clock
    }

    #[inline]
    pub fn contains(&self, worker: WorkerId) -> bool {
        self.progresses.contains_key(&worker)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.progresses.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.progresses.is_empty()
    }

    /// Removes `worker` from accounting. Returns `Some(new_min)` iff the
    /// removal raised the min clock (the departed worker was the laggard).
    pub fn remove(&mut self, worker: WorkerId) -> Option<ClockVal> {
        if self.progresses.remove(&worker).is_none() {
            return None;
        }
        self.refresh_min()
    }

    /// Re-evaluates the min clock; returns `Some(new_min)` iff it rose.
    fn refresh_min(&mut self) -> Option<ClockVal> {
        let new_min = self.progresses.values().copied().min()?;
        if new_min > self.min_clock {
            self.min_clock = new_min;
            Some(new_min)
        } else {
            None
        }
    }
}
