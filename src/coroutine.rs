//! Wraps an entity's construction or a method invocation as a suspendable
//! task: the coroutine adapter between the replay/continue core and
//! ordinary `async fn` bodies written by entity authors.

use crate::entity::{pending_request_of, Bridge, LocalBoxFuture, Subject};
use crate::error::Raised;
use crate::value::Value;
use std::future::Future;
use std::rc::Rc;

/// The two shapes a task can take, carrying differently-typed outputs: a
/// construction task produces the subject itself, a method task produces a
/// response value.
pub(crate) enum TaskFuture<S: Subject> {
    Construct(LocalBoxFuture<Result<S, Raised>>),
    Method(LocalBoxFuture<Result<Value, Raised>>),
}

/// A task suspended at an interception point, indexed by the offset of the
/// outbound request it is waiting on a reply for.
pub(crate) struct PendingTask<S: Subject> {
    pub(crate) initiator_offset: u64,
    pub(crate) bridge: Rc<Bridge>,
    pub(crate) future: TaskFuture<S>,
}

/// What running a task one step produced.
pub(crate) enum StepOutcome<S: Subject> {
    /// The task suspended at an interception point; the caller records the
    /// pending request and must emit the returned message.
    Suspended {
        request: crate::entity::PendingRequest,
    },
    /// A construction task completed, yielding the new subject.
    ConstructedOk(S),
    /// A construction task raised before completing.
    ConstructedErr(Raised),
    /// A method task completed, yielding its response.
    MethodOk(Value),
    /// A method task raised.
    MethodErr(Raised),
}

/// Poll a task exactly once using the engine's no-op waker.
///
/// This is the only place a task's future is ever polled: the engine is the
/// sole scheduler, and a task never runs except in direct response to the
/// engine driving it here.
pub(crate) fn poll_once<S: Subject>(future: &mut TaskFuture<S>, bridge: &Rc<Bridge>) -> StepOutcome<S> {
    let waker = crate::waker::noop_waker();
    let mut cx = std::task::Context::from_waker(&waker);

    match future {
        TaskFuture::Construct(fut) => match fut.as_mut().poll(&mut cx) {
            std::task::Poll::Pending => StepOutcome::Suspended {
                request: pending_request_of(bridge)
                    .expect("construction task suspended without recording an interception request"),
            },
            std::task::Poll::Ready(Ok(subject)) => StepOutcome::ConstructedOk(subject),
            std::task::Poll::Ready(Err(err)) => StepOutcome::ConstructedErr(err),
        },
        TaskFuture::Method(fut) => match fut.as_mut().poll(&mut cx) {
            std::task::Poll::Pending => StepOutcome::Suspended {
                request: pending_request_of(bridge)
                    .expect("method task suspended without recording an interception request"),
            },
            std::task::Poll::Ready(Ok(value)) => StepOutcome::MethodOk(value),
            std::task::Poll::Ready(Err(err)) => StepOutcome::MethodErr(err),
        },
    }
}
