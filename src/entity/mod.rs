//! The entity contract: what a type must provide to be executed by the
//! engine.

mod context;

pub use context::{Context, EntityRef, ServiceRef};
pub(crate) use context::{pending_request_of, Bridge, PendingRequest, Resume};

use crate::error::Raised;
use crate::message::{Args, ErrorType, MethodId};
use crate::value::Value;
use std::future::Future;
use std::pin::Pin;

/// A task's suspended computation, boxed because each suspension point
/// produces a differently-shaped concrete future and the engine only ever
/// needs to poll it, never to name its type.
///
/// `'static` because the future owns everything it touches (subject access
/// goes through `Rc<RefCell<_>>`, not borrows tied to the engine's stack
/// frame) rather than borrowing across the suspension points the engine
/// drives one poll at a time.
pub type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;

/// The capability set a type must provide to serve as the engine's subject.
///
/// Construction, state snapshot/restore and method dispatch are all the
/// engine ever asks of a subject type; everything else (reading its own
/// fields, deciding what to do) is ordinary Rust the method body is free to
/// write however it likes.
pub trait Subject: Sized + 'static {
    /// Name used in diagnostics and in outbound `CreateEntityRequestSent`
    /// messages naming this type as a construction target.
    const TYPE_NAME: &'static str;

    /// The stable set of methods this subject exposes to initiators. Used to
    /// validate `EntityMethodRequestReceived` before spawning a task for it.
    const METHODS: &'static [MethodId];

    /// The domain error types this subject's methods may raise. An error
    /// whose type is not listed here surfaces as
    /// [`crate::error::EngineError::OrphanedError`] instead of being routed
    /// outbound, the same way the source system treats an error instance
    /// with no recorded `(type, args, kwargs)`.
    const DOMAIN_ERRORS: &'static [ErrorType];

    /// Run the subject's constructor. Invoked exactly once, by the task
    /// spawned for the first `CreateEntityRequestReceived`.
    fn construct(ctx: Context<Self>, args: Args) -> LocalBoxFuture<Result<Self, Raised>>;

    /// Produce an opaque snapshot of current state.
    fn snapshot(&self) -> Value;

    /// Overwrite current state from a previously produced snapshot.
    fn restore(&mut self, state: Value);

    /// Run one of this subject's declared methods to completion (or
    /// suspension). Invoked by the task spawned for an
    /// `EntityMethodRequestReceived`, and by every subsequent resume of that
    /// task.
    fn dispatch(
        subject: std::rc::Rc<std::cell::RefCell<Self>>,
        ctx: Context<Self>,
        method: MethodId,
        args: Args,
    ) -> LocalBoxFuture<Result<Value, Raised>>;
}
