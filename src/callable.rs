//! The unit of dispatch: one or more (portal, procedure) phases.

use std::collections::VecDeque;

use crate::{
    counter::{FlatToken, Token},
    invoke::{self, Completion},
    portal::{Portal, PortalHandle},
    procedure::{ForkScope, Procedure},
};

/// One work item: an ordered chain of phases, each a procedure bound to
/// the portal it runs on.
///
/// Invoking a callable consumes exactly one token and performs exactly
/// one decrement, after its last phase completes. Later phases are
/// re-dispatched through their own portals, so a chain can, for example,
/// fan out on fresh threads and then funnel through a single-worker pool:
///
/// ```
/// use convoke::{Callable, PoolPortal, ThreadPortal, procedure};
///
/// let funnel = PoolPortal::new(1).unwrap();
/// let two_phase: Callable = Callable::new(
///     ThreadPortal::daemon(),
///     procedure(|| println!("parallel part")),
/// )
/// .then(funnel.clone(), procedure(|| println!("serial part")));
/// # drop(two_phase);
/// # drop(funnel);
/// # convoke::ThreadRegistry::global().drain();
/// ```
#[derive(derive_more::Debug)]
pub struct Callable<T: Token = FlatToken> {
    #[debug("{} phase(s)", phases.len())]
    phases: VecDeque<(PortalHandle, Procedure<T>)>,
}

impl<T: Token> Callable<T> {
    pub fn new(portal: impl Portal + 'static, procedure: Procedure<T>) -> Self {
        let mut phases = VecDeque::with_capacity(1);
        phases.push_back((portal_handle(portal), procedure));
        Self { phases }
    }

    /// Appends a phase to run after the previous ones, on its own portal.
    pub fn then(mut self, portal: impl Portal + 'static, procedure: Procedure<T>) -> Self {
        self.phases.push_back((portal_handle(portal), procedure));
        self
    }

    /// Runs the phase chain, consuming `token`.
    ///
    /// Intended for [`Caller`](crate::caller::Caller) implementations;
    /// the final phase is followed by the join that retires the token.
    pub fn invoke(self, token: T, completion: Completion) {
        execute(self.phases, token, completion);
    }
}

fn portal_handle(portal: impl Portal + 'static) -> PortalHandle {
    std::sync::Arc::new(portal)
}

fn execute<T: Token>(
    mut phases: VecDeque<(PortalHandle, Procedure<T>)>,
    token: T,
    completion: Completion,
) {
    match phases.pop_front() {
        None => invoke::join(token, &completion),
        Some((portal, procedure)) => {
            portal.dispatch(Box::new(move || {
                let mut token = token;
                {
                    let mut scope = ForkScope::new(&mut token, &completion);
                    procedure(&mut scope);
                }
                execute(phases, token, completion);
            }));
        }
    }
}
