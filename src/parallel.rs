//! Parallel pass support: wave partitioning and the per-variant execution
//! tracker that implements the suspension contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::bottom_up::PassRunner;
use crate::variant::VariantId;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ExecState {
    Pending,
    Running,
    Done,
}

/// Tracks which variants have been through the current mutator. Variants
/// created during the pass are absent from the map and count as done, since
/// the mutator that created them configured them itself.
pub(crate) struct ExecTracker {
    state: Mutex<HashMap<VariantId, ExecState>>,
    cond: Condvar,
}

impl ExecTracker {
    pub(crate) fn new(order: &[VariantId]) -> Self {
        Self {
            state: Mutex::new(order.iter().map(|v| (*v, ExecState::Pending)).collect()),
            cond: Condvar::new(),
        }
    }

    /// Non-blocking claim used by the wave loop.
    pub(crate) fn try_claim(&self, v: VariantId) -> bool {
        let mut state = self.state.lock();
        match state.get(&v) {
            Some(ExecState::Pending) => {
                state.insert(v, ExecState::Running);
                true
            }
            _ => false,
        }
    }

    /// Blocking claim used by suspension points: returns `true` when the
    /// caller must process the variant itself, `false` once it is done.
    pub(crate) fn claim_or_wait(&self, v: VariantId) -> bool {
        let mut state = self.state.lock();
        loop {
            match state.get(&v) {
                None | Some(ExecState::Done) => return false,
                Some(ExecState::Running) => self.cond.wait(&mut state),
                Some(ExecState::Pending) => {
                    state.insert(v, ExecState::Running);
                    return true;
                }
            }
        }
    }

    pub(crate) fn mark_done(&self, v: VariantId) {
        let mut state = self.state.lock();
        state.insert(v, ExecState::Done);
        self.cond.notify_all();
    }
}

/// Partitions a dependency-first order into waves of mutually independent
/// variants: a variant lands one wave past its deepest dependency.
pub(crate) fn partition_waves(
    order: &[VariantId],
    deps: &HashMap<VariantId, Vec<VariantId>>,
) -> Vec<Vec<VariantId>> {
    let mut level: HashMap<VariantId, usize> = HashMap::new();
    let mut waves: Vec<Vec<VariantId>> = Vec::new();
    for v in order {
        let depth = deps
            .get(v)
            .into_iter()
            .flatten()
            .filter_map(|d| level.get(d))
            .max()
            .map(|deepest| deepest + 1)
            .unwrap_or(0);
        level.insert(*v, depth);
        if waves.len() <= depth {
            waves.resize_with(depth + 1, Vec::new);
        }
        waves[depth].push(*v);
    }
    waves
}

pub(crate) fn worker_count(work: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(work)
        .max(1)
}

/// Executes a bottom-up pass wave by wave on scoped worker threads. Within
/// a wave, workers pull variants from a shared cursor; a variant already
/// claimed through a suspension point is skipped.
pub(crate) fn run_waves(runner: &PassRunner<'_>, order: &[VariantId]) {
    let deps: HashMap<VariantId, Vec<VariantId>> = {
        let g = runner.graph.lock();
        order.iter().map(|v| (*v, g.concrete_deps_of(*v))).collect()
    };
    for wave in partition_waves(order, &deps) {
        if wave.is_empty() {
            continue;
        }
        let cursor = AtomicUsize::new(0);
        let workers = worker_count(wave.len());
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(v) = wave.get(i) else { break };
                    if runner.tracker.try_claim(*v) {
                        runner.process(*v);
                    }
                });
            }
        });
    }
}
