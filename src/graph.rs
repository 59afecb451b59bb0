//! The generic action graph (spec C3): dependencies, dependents
//! ("triggers"), an atomic pending-count, a sticky failure bit, and an
//! error list. Shared by both the package-action graph and the
//! per-package analyzer-action graph.
//!
//! `ActionCore<A>` is held by composition rather than by a `dyn Action`
//! trait object: the scheduler (`crate::scheduler`) is generic over `A:
//! Action`, so neither graph needs a `Weak<dyn Action>` and its attendant
//! unsized-coercion ceremony.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub struct ActionCore<A> {
    pub deps: Vec<Arc<A>>,
    pending: AtomicUsize,
    failed: AtomicBool,
    errors: Mutex<Vec<String>>,
    triggers: Mutex<Vec<Weak<A>>>,
}

impl<A> ActionCore<A> {
    pub fn new(deps: Vec<Arc<A>>) -> Self {
        let pending = deps.len();
        ActionCore {
            deps,
            pending: AtomicUsize::new(pending),
            failed: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
            triggers: Mutex::new(Vec::new()),
        }
    }

    /// Registers `self` (via `trigger`) as a dependent of this action; the
    /// scheduler notifies it when this action's pending-count reaches zero.
    pub fn register_trigger(&self, trigger: &Arc<A>) {
        self.triggers.lock().unwrap().push(Arc::downgrade(trigger));
    }

    pub(crate) fn triggers(&self) -> Vec<Weak<A>> {
        self.triggers.lock().unwrap().clone()
    }

    /// Sticky: once failed, stays failed. `err` is `None` for
    /// dependency-inherited failure (spec.md's `DependencyFailed` — no new
    /// error is recorded, the originating dependency already did).
    pub fn mark_failed(&self, err: Option<String>) {
        self.failed.store(true, Ordering::SeqCst);
        if let Some(e) = err {
            self.errors.lock().unwrap().push(e);
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    /// Atomic decrement; returns `true` exactly once per action, on the
    /// thread whose decrement made `pending` transition from 1 to 0. The
    /// caller that observes `true` is the sole enqueuer of this action.
    pub(crate) fn decrement_pending(&self) -> bool {
        self.pending.fetch_sub(1, Ordering::SeqCst) == 1
    }

    /// `true` iff this action had zero dependencies at construction.
    pub fn is_ready_at_start(&self) -> bool {
        self.deps.is_empty()
    }
}

/// An action graph node. `exec` performs the action's own work; `core`
/// exposes the scheduling bookkeeping shared by every node kind.
pub trait Action: Sized {
    fn core(&self) -> &ActionCore<Self>;
    fn exec(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(ActionCore<Noop>);
    impl Action for Noop {
        fn core(&self) -> &ActionCore<Noop> {
            &self.0
        }
        fn exec(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn pending_transitions_to_zero_exactly_once() {
        let core = ActionCore::<Noop>::new(vec![Arc::new(Noop(ActionCore::new(vec![]))), Arc::new(Noop(ActionCore::new(vec![])))]);
        assert!(!core.decrement_pending());
        assert!(core.decrement_pending());
    }

    #[test]
    fn failure_is_sticky() {
        let core = ActionCore::<Noop>::new(vec![]);
        assert!(!core.is_failed());
        core.mark_failed(Some("boom".into()));
        assert!(core.is_failed());
        assert_eq!(core.errors(), vec!["boom".to_string()]);
        core.mark_failed(None);
        assert!(core.is_failed());
        assert_eq!(core.errors(), vec!["boom".to_string()]);
    }

    #[test]
    fn zero_deps_are_ready_at_start() {
        let core = ActionCore::<Noop>::new(vec![]);
        assert!(core.is_ready_at_start());
    }
}
