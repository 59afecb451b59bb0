//! The generic scheduler (spec C4): drives any [`Action`] graph from its
//! leaves outward to completion, via a shared work channel and the
//! concurrency [`Gate`].
//!
//! This implementation does not build a synthetic root action. A plain
//! "actions remaining" counter plus `rayon::scope`'s wait-for-all-spawned
//! semantics gives the same two guarantees the synthetic root exists for —
//! exactly-once completion detection and a definite point at which every
//! `exec` has returned — without a sentinel node threaded through every
//! graph built on top of this module.

use crate::gate::{Gate, Permit};
use crate::graph::Action;
use crossbeam_channel::{unbounded, Sender};
use std::collections::HashSet;
use std::sync::Arc;

/// Permit-acquisition discipline (spec §5). The outer, package-level graph
/// always blocks; the inner, analyzer-level graph never does, falling back
/// to running inline under whichever permit its caller already holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PermitMode {
    Blocking,
    NonBlockingInline,
}

/// Runs every action reachable from `roots` to completion and returns the
/// reachable set in DFS order (dependencies before dependents), matching
/// the ordering the runner façade uses to assemble `Result`s.
pub fn run<A>(gate: &Gate, roots: &[Arc<A>], mode: PermitMode) -> Vec<Arc<A>>
where
    A: Action + Send + Sync + 'static,
{
    let order = discover(roots);
    let (tx, rx) = unbounded::<Arc<A>>();

    for node in &order {
        if node.core().is_ready_at_start() {
            log::trace!("scheduler: seeding ready action");
            tx.send(Arc::clone(node)).expect("receiver outlives this loop");
        }
    }

    let mut remaining = order.len();
    rayon::scope(|scope| {
        while remaining > 0 {
            let node = rx.recv().expect("a pending action failed to re-enqueue");
            remaining -= 1;
            let tx = tx.clone();
            scope.spawn(move |_| handle(gate, mode, node, &tx));
        }
    });

    order
}

fn handle<A>(gate: &Gate, mode: PermitMode, node: Arc<A>, tx: &Sender<Arc<A>>)
where
    A: Action + Send + Sync + 'static,
{
    log::trace!("scheduler: dispatch action");
    let permit: Option<Permit<'_>> = match mode {
        PermitMode::Blocking => Some(gate.acquire()),
        PermitMode::NonBlockingInline => gate.try_acquire(),
    };

    // A package with load-time errors arrives here already marked failed
    // at construction (spec.md §4.3) — its own `exec` must never run.
    let dep_failed = node.core().deps.iter().any(|d| d.core().is_failed());
    if node.core().is_failed() {
        // already failed before scheduling; nothing to do
    } else if dep_failed {
        // DependencyFailed: inherit the flag, record no new error — the
        // originating dependency already did.
        node.core().mark_failed(None);
    } else if let Err(e) = node.exec() {
        node.core().mark_failed(Some(e.to_string()));
    }
    drop(permit);

    for trigger in node.core().triggers() {
        if let Some(t) = trigger.upgrade() {
            if t.core().decrement_pending() {
                log::trace!("scheduler: enqueue action (last dep completed)");
                tx.send(t).expect("receiver outlives this scope");
            }
        }
    }
}

/// DFS over the action graph reachable from `roots`, memoized by pointer
/// identity. Registers each visited node as a trigger of its dependencies
/// along the way, so the graph's reverse edges never need separate
/// construction.
fn discover<A>(roots: &[Arc<A>]) -> Vec<Arc<A>>
where
    A: Action,
{
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for root in roots {
        visit(root, &mut seen, &mut order);
    }
    order
}

fn visit<A>(node: &Arc<A>, seen: &mut HashSet<usize>, order: &mut Vec<Arc<A>>)
where
    A: Action,
{
    let ptr = Arc::as_ptr(node) as usize;
    if !seen.insert(ptr) {
        return;
    }
    for dep in &node.core().deps {
        dep.core().register_trigger(node);
        visit(dep, seen, order);
    }
    order.push(Arc::clone(node));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ActionCore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recording {
        core: ActionCore<Recording>,
        ran: AtomicUsize,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    }

    impl Action for Recording {
        fn core(&self) -> &ActionCore<Recording> {
            &self.core
        }
        fn exec(&self) -> anyhow::Result<()> {
            self.ran.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                anyhow::bail!("boom in {}", self.name);
            }
            Ok(())
        }
    }

    fn node(name: &'static str, deps: Vec<Arc<Recording>>, fail: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Recording> {
        Arc::new(Recording {
            core: ActionCore::new(deps),
            ran: AtomicUsize::new(0),
            fail,
            log: Arc::clone(log),
            name,
        })
    }

    #[test]
    fn diamond_runs_shared_dependency_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = node("d", vec![], false, &log);
        let b = node("b", vec![Arc::clone(&d)], false, &log);
        let c = node("c", vec![Arc::clone(&d)], false, &log);
        let a = node("a", vec![Arc::clone(&b), Arc::clone(&c)], false, &log);

        let gate = Gate::new(4);
        let order = run(&gate, &[Arc::clone(&a)], PermitMode::Blocking);

        assert_eq!(d.ran.load(Ordering::SeqCst), 1);
        assert_eq!(order.len(), 4);
        assert!(!a.core().is_failed());
    }

    #[test]
    fn failure_propagates_without_new_errors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let p = node("p", vec![], true, &log);
        let child = node("child", vec![Arc::clone(&p)], false, &log);

        let gate = Gate::new(2);
        run(&gate, &[Arc::clone(&child)], PermitMode::Blocking);

        assert!(p.core().is_failed());
        assert!(child.core().is_failed());
        assert!(child.core().errors().is_empty());
        assert_eq!(child.ran.load(Ordering::SeqCst), 0, "child must not run after a failed dep");
    }

    #[test]
    fn pre_failed_construction_never_executes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = node("a", vec![], false, &log);
        a.core().mark_failed(Some("load error".into()));

        let gate = Gate::new(2);
        run(&gate, &[Arc::clone(&a)], PermitMode::Blocking);

        assert_eq!(a.ran.load(Ordering::SeqCst), 0);
        assert_eq!(a.core().errors(), vec!["load error".to_string()]);
    }

    #[test]
    fn permit_bound_is_respected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let leaves: Vec<_> = (0..8).map(|i| node(Box::leak(i.to_string().into_boxed_str()), vec![], false, &log)).collect();
        let gate = Gate::new(2);
        run(&gate, &leaves, PermitMode::Blocking);
        for leaf in &leaves {
            assert_eq!(leaf.ran.load(Ordering::SeqCst), 1);
        }
    }
}
