#![cfg(not(loom))]

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
};

use crate::{
    Callable, Caller, CounterInit, FlatInit, FlatToken, Lineup, ParkSemaphore, Partitioned,
    PoolPortal, Portal, PortalError, RepeatBuffer, SerialPortal, Single, SpinSemaphore,
    SyncSemaphore, ThreadPortal, Token, TokenBuffer, TreeInit, Work, async_invoke, procedure,
    scoped, sync_invoke, sync_invoke_with,
    tests::utils::node_audit,
};

/// Flat counter instrumented to count decrements and terminals.
#[derive(Clone)]
struct ProbeToken {
    inner: FlatToken,
    decrements: Arc<AtomicUsize>,
    terminals: Arc<AtomicUsize>,
}

struct ProbeBuffer {
    inner: RepeatBuffer<FlatToken>,
    decrements: Arc<AtomicUsize>,
    terminals: Arc<AtomicUsize>,
}

#[derive(Default)]
struct ProbeInit {
    decrements: Arc<AtomicUsize>,
    terminals: Arc<AtomicUsize>,
}

impl TokenBuffer for ProbeBuffer {
    type Token = ProbeToken;

    fn fetch(&mut self) -> ProbeToken {
        ProbeToken {
            inner: self.inner.fetch(),
            decrements: self.decrements.clone(),
            terminals: self.terminals.clone(),
        }
    }
}

impl Token for ProbeToken {
    type Buffer = ProbeBuffer;

    fn decrement(self) -> bool {
        self.decrements.fetch_add(1, Ordering::Relaxed);
        let more = self.inner.decrement();
        if !more {
            self.terminals.fetch_add(1, Ordering::Relaxed);
        }
        more
    }

    fn increase(&mut self, amount: usize) -> ProbeBuffer {
        ProbeBuffer {
            inner: self.inner.increase(amount),
            decrements: self.decrements.clone(),
            terminals: self.terminals.clone(),
        }
    }
}

impl CounterInit for ProbeInit {
    type Token = ProbeToken;

    fn init(&self, count: usize) -> ProbeBuffer {
        ProbeBuffer {
            inner: FlatInit.init(count),
            decrements: self.decrements.clone(),
            terminals: self.terminals.clone(),
        }
    }
}

/// Portal wrapper counting how many work items pass through it.
#[derive(Clone)]
struct CountingPortal {
    dispatched: Arc<AtomicUsize>,
    inner: Arc<dyn Portal>,
}

impl CountingPortal {
    fn new(inner: impl Portal + 'static) -> Self {
        Self {
            dispatched: Arc::new(AtomicUsize::new(0)),
            inner: Arc::new(inner),
        }
    }
}

impl Portal for CountingPortal {
    fn dispatch(&self, work: Work) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.inner.dispatch(work);
    }
}

fn counting_lineup<T: Token>(
    count: usize,
    portal: impl Portal + Clone + 'static,
    hits: &Arc<AtomicUsize>,
) -> Lineup<T> {
    Lineup::repeat_with(count, || {
        let hits = hits.clone();
        Callable::new(
            portal.clone(),
            procedure(move || {
                hits.fetch_add(1, Ordering::Relaxed);
            }),
        )
    })
}

#[test]
fn test_callback_fires_once_per_invocation() {
    let portals: Vec<Arc<dyn Portal>> = vec![
        Arc::new(SerialPortal),
        Arc::new(ThreadPortal::daemon()),
        Arc::new(ThreadPortal::joined()),
        Arc::new(PoolPortal::new(4).unwrap()),
    ];
    for portal in portals {
        let hits = Arc::new(AtomicUsize::new(0));
        let (done, completed) = mpsc::channel();
        async_invoke(
            move || done.send(()).unwrap(),
            counting_lineup(32, portal, &hits),
        );
        completed.recv().unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 32);
    }
}

#[test]
fn test_completion_across_portal_counter_matrix() {
    fn portals() -> Vec<Arc<dyn Portal>> {
        vec![
            Arc::new(SerialPortal),
            Arc::new(ThreadPortal::daemon()),
            Arc::new(PoolPortal::new(3).unwrap()),
        ]
    }

    for portal in portals() {
        for total in [1usize, 2, 7, 33] {
            let hits = Arc::new(AtomicUsize::new(0));
            sync_invoke_with(
                FlatInit,
                ParkSemaphore::new(),
                || (),
                counting_lineup(total, portal.clone(), &hits),
            );
            assert_eq!(hits.load(Ordering::Relaxed), total);
        }
    }

    let _audit = node_audit();
    for portal in portals() {
        for total in [1usize, 2, 7, 33] {
            let hits = Arc::new(AtomicUsize::new(0));
            sync_invoke_with(
                TreeInit::<3>,
                ParkSemaphore::new(),
                || (),
                counting_lineup(total, portal.clone(), &hits),
            );
            assert_eq!(hits.load(Ordering::Relaxed), total);
        }
    }
}

#[test]
fn test_three_phase_chain() {
    let funnel = PoolPortal::new(1).unwrap();
    let trace = Arc::new(Mutex::new(Vec::new()));
    let (a, b, c) = (trace.clone(), trace.clone(), trace.clone());
    let callable = Callable::new(
        ThreadPortal::daemon(),
        procedure(move || a.lock().unwrap().push("spread")),
    )
    .then(
        SerialPortal,
        procedure(move || b.lock().unwrap().push("carry")),
    )
    .then(
        funnel.clone(),
        procedure(move || c.lock().unwrap().push("funnel")),
    );
    sync_invoke(|| (), Single::new(callable));
    drop(funnel);
    assert_eq!(*trace.lock().unwrap(), ["spread", "carry", "funnel"]);
}

#[test]
fn test_decrement_accounting() {
    let init = ProbeInit::default();
    let decrements = init.decrements.clone();
    let terminals = init.terminals.clone();
    let hits = Arc::new(AtomicUsize::new(0));
    sync_invoke_with(
        init,
        SpinSemaphore::new(),
        || (),
        counting_lineup(16, ThreadPortal::daemon(), &hits),
    );
    assert_eq!(hits.load(Ordering::Relaxed), 16);
    assert_eq!(decrements.load(Ordering::Relaxed), 16);
    assert_eq!(terminals.load(Ordering::Relaxed), 1);
}

#[test]
fn test_fork_keeps_decrement_accounting() {
    let init = ProbeInit::default();
    let decrements = init.decrements.clone();
    let terminals = init.terminals.clone();
    sync_invoke_with(
        init,
        SyncSemaphore::new(),
        || (),
        Single::new(Callable::new(
            SerialPortal,
            scoped(|scope: &mut crate::ForkScope<'_, ProbeToken>| {
                scope.fork(Single::new(Callable::new(SerialPortal, procedure(|| ()))));
            }),
        )),
    );
    // Two work items, two decrements, one terminal.
    assert_eq!(decrements.load(Ordering::Relaxed), 2);
    assert_eq!(terminals.load(Ordering::Relaxed), 1);
}

#[test]
fn test_single_item_boundary() {
    let ran = Arc::new(AtomicUsize::new(0));
    let probe = ran.clone();
    sync_invoke(
        || (),
        Single::new(Callable::new(
            ThreadPortal::daemon(),
            procedure(move || {
                probe.fetch_add(1, Ordering::Relaxed);
            }),
        )),
    );
    assert_eq!(ran.load(Ordering::Relaxed), 1);
}

#[test]
fn test_empty_composition_completes_immediately() {
    let fired = Arc::new(AtomicUsize::new(0));
    let observer = fired.clone();
    async_invoke(
        move || {
            observer.fetch_add(1, Ordering::Relaxed);
        },
        Lineup::new(),
    );
    assert_eq!(fired.load(Ordering::Relaxed), 1);

    assert_eq!(sync_invoke(|| 7, Lineup::new()), 7);
}

#[test]
fn test_async_matches_sync_roundtrip() {
    let sync_hits = Arc::new(AtomicUsize::new(0));
    sync_invoke(|| (), counting_lineup(8, ThreadPortal::daemon(), &sync_hits));

    let async_hits = Arc::new(AtomicUsize::new(0));
    let (done, completed) = mpsc::channel();
    async_invoke(
        move || done.send(()).unwrap(),
        counting_lineup(8, ThreadPortal::daemon(), &async_hits),
    );
    completed.recv().unwrap();

    assert_eq!(
        sync_hits.load(Ordering::Relaxed),
        async_hits.load(Ordering::Relaxed),
    );
}

#[test]
fn test_caller_composition() {
    let hits = Arc::new(AtomicUsize::new(0));
    let single: Single = Single::new(Callable::new(SerialPortal, {
        let hits = hits.clone();
        procedure(move || {
            hits.fetch_add(1, Ordering::Relaxed);
        })
    }));
    let lineup: Lineup = counting_lineup(3, ThreadPortal::daemon(), &hits);
    let mut partitioned: Partitioned = Partitioned::with_concurrency(ThreadPortal::daemon(), 2);
    for _ in 0..4 {
        let hits = hits.clone();
        partitioned.push(Callable::new(
            SerialPortal,
            procedure(move || {
                hits.fetch_add(1, Ordering::Relaxed);
            }),
        ));
    }

    let group = (single, lineup, partitioned);
    assert_eq!(group.size(), 8);
    sync_invoke(|| (), group);
    assert_eq!(hits.load(Ordering::Relaxed), 8);
}

#[test]
fn test_vec_of_callers() {
    let hits = Arc::new(AtomicUsize::new(0));
    let callers: Vec<Single> = (0..3)
        .map(|_| {
            let hits = hits.clone();
            Single::new(Callable::new(
                SerialPortal,
                procedure(move || {
                    hits.fetch_add(1, Ordering::Relaxed);
                }),
            ))
        })
        .collect();
    assert_eq!(callers.size(), 3);
    sync_invoke(|| (), callers);
    assert_eq!(hits.load(Ordering::Relaxed), 3);
}

#[test]
fn test_partitioned_batches_by_concurrency() {
    let executed = Arc::new(AtomicUsize::new(0));
    let portal = CountingPortal::new(ThreadPortal::daemon());
    let dispatched = portal.dispatched.clone();

    let mut caller = Partitioned::with_concurrency(portal, 4);
    for _ in 0..10 {
        let executed = executed.clone();
        caller.push(Callable::new(
            SerialPortal,
            procedure(move || {
                executed.fetch_add(1, Ordering::Relaxed);
            }),
        ));
    }
    sync_invoke(|| (), caller);

    assert_eq!(executed.load(Ordering::Relaxed), 10);
    assert_eq!(dispatched.load(Ordering::Relaxed), 4);
}

#[test]
fn test_partitioned_clamps_excess_concurrency() {
    let executed = Arc::new(AtomicUsize::new(0));
    let portal = CountingPortal::new(ThreadPortal::daemon());
    let dispatched = portal.dispatched.clone();

    let mut caller = Partitioned::with_concurrency(portal, 16);
    for _ in 0..3 {
        let executed = executed.clone();
        caller.push(Callable::new(
            SerialPortal,
            procedure(move || {
                executed.fetch_add(1, Ordering::Relaxed);
            }),
        ));
    }
    sync_invoke(|| (), caller);

    assert_eq!(executed.load(Ordering::Relaxed), 3);
    assert_eq!(dispatched.load(Ordering::Relaxed), 3);
}

#[test]
fn test_multi_phase_order_per_item() {
    let funnel = PoolPortal::new(1).unwrap();
    let traces: Arc<Vec<Mutex<Vec<u8>>>> =
        Arc::new((0..10).map(|_| Mutex::new(Vec::new())).collect());

    let lineup = (0..10)
        .map(|item| {
            let first = traces.clone();
            let second = traces.clone();
            Callable::new(
                ThreadPortal::daemon(),
                procedure(move || first[item].lock().unwrap().push(1)),
            )
            .then(
                funnel.clone(),
                procedure(move || second[item].lock().unwrap().push(2)),
            )
        })
        .collect::<Lineup>();
    sync_invoke(|| (), lineup);
    drop(funnel);

    for trace in traces.iter() {
        assert_eq!(*trace.lock().unwrap(), [1, 2]);
    }
}

#[test]
fn test_tree_counter_invocation() {
    let _audit = node_audit();
    let hits = Arc::new(AtomicUsize::new(0));
    sync_invoke_with(
        TreeInit::<10>,
        ParkSemaphore::new(),
        || (),
        counting_lineup(25, ThreadPortal::daemon(), &hits),
    );
    assert_eq!(hits.load(Ordering::Relaxed), 25);
}

#[test]
fn test_runnable_panic_still_waits_for_work() {
    let finished = Arc::new(AtomicUsize::new(0));
    let lineup = counting_lineup(6, ThreadPortal::daemon(), &finished);
    let result = catch_unwind(AssertUnwindSafe(|| {
        sync_invoke(|| panic!("runnable failed"), lineup)
    }));
    assert!(result.is_err());
    assert_eq!(finished.load(Ordering::Relaxed), 6);
}

#[test]
fn test_pool_rejects_zero_workers() {
    assert!(matches!(PoolPortal::new(0), Err(PortalError::NoWorkers)));
}

#[test]
fn test_pool_with_launcher() {
    let pool = PoolPortal::with_launcher(2, &ThreadPortal::daemon()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    sync_invoke(|| (), counting_lineup(8, pool.clone(), &hits));
    drop(pool);
    assert_eq!(hits.load(Ordering::Relaxed), 8);
}
