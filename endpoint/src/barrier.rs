//! Reusable barrier that any worker can abort
//!
//! Used to hold the exporting worker until every importer has joined its
//! snapshot, and to unblock everyone if one of them fails first.

use ksync_core::{SyncError, SyncResult};
use parking_lot::{Condvar, Mutex};

struct BarrierState {
    waiting_for: usize,
    generation: u64,
    aborted: bool,
}

pub struct AbortableBarrier {
    workers: usize,
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl AbortableBarrier {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            state: Mutex::new(BarrierState {
                waiting_for: workers,
                generation: 0,
                aborted: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Block until all workers arrive. Exactly one worker per round gets
    /// `true`. Fails with [`SyncError::Aborted`] once the barrier is aborted.
    pub fn wait_at_barrier(&self) -> SyncResult<bool> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(SyncError::Aborted);
        }

        state.waiting_for -= 1;
        if state.waiting_for == 0 {
            state.generation = state.generation.wrapping_add(1);
            state.waiting_for = self.workers;
            self.cond.notify_all();
            return Ok(true);
        }

        let generation = state.generation;
        loop {
            self.cond.wait(&mut state);
            if state.aborted {
                return Err(SyncError::Aborted);
            }
            if state.generation != generation {
                return Ok(false);
            }
        }
    }

    pub fn check_aborted(&self) -> SyncResult<()> {
        if self.state.lock().aborted {
            return Err(SyncError::Aborted);
        }
        Ok(())
    }

    /// Wake every waiter with an error. Returns false if already aborted.
    pub fn abort(&self) -> bool {
        let mut state = self.state.lock();
        if state.aborted {
            return false;
        }
        state.aborted = true;
        self.cond.notify_all();
        true
    }
}
