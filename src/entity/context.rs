//! The capability an entity method is handed while it runs inside the
//! engine: the only way to reach another entity, call a service, or raise a
//! domain error.
//!
//! In the source system these capabilities were installed by monkey-patching
//! the running interpreter's attribute lookup for the duration of a task.
//! Here they are just an explicit value threaded through the method call —
//! a pluggable capability interface rather than ambient global state. A
//! method that never asks its `Context` for anything can touch nothing
//! outside its own fields, which is the private-state guarantee enforced
//! structurally instead of by a runtime check.

use crate::error::{ErrorRecord, ForeignError, Raised};
use crate::message::{Args, MethodId};
use crate::value::{EntityHandle, Value};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};

/// The interception message a task is asking the engine to emit, captured
/// at the moment the task suspends.
#[derive(Clone, Debug)]
pub(crate) enum PendingRequest {
    CreateEntity {
        entity_type: &'static str,
        args: Args,
    },
    EntityMethod {
        receiver: EntityHandle,
        method_id: MethodId,
        args: Args,
    },
    ServiceMethod {
        service_type: &'static str,
        method_id: MethodId,
        args: Args,
    },
}

/// What the engine is resuming a suspended task with.
pub(crate) enum Resume {
    Response(Value),
    Domain(ErrorRecord),
    Foreign(ForeignError),
}

/// The shared cell a [`Context`] and its in-flight [`Intercept`] future use
/// to hand a request to the engine and later receive its resolution.
///
/// One bridge is allocated per suspension point, not per task: once a
/// resumption value has been delivered the bridge is consumed and dropped
/// along with the `Intercept` future that owned it.
#[derive(Default)]
pub(crate) struct Bridge {
    pub(crate) pending_request: RefCell<Option<PendingRequest>>,
    pub(crate) resume: RefCell<Option<Resume>>,
}

/// The future returned by every interception point.
///
/// First poll always records the request and returns `Pending`; the engine
/// reads it back out, emits the corresponding outbound message, and later
/// resumes the task by filling in `resume` before polling again.
pub(crate) struct Intercept {
    bridge: Rc<Bridge>,
    request: Option<PendingRequest>,
}

impl Future for Intercept {
    type Output = Result<Value, Raised>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        if let Some(request) = self.request.take() {
            *self.bridge.pending_request.borrow_mut() = Some(request);
            return Poll::Pending;
        }
        match self.bridge.resume.borrow_mut().take() {
            Some(Resume::Response(value)) => Poll::Ready(Ok(value)),
            Some(Resume::Domain(record)) => Poll::Ready(Err(Raised::Domain(record))),
            Some(Resume::Foreign(err)) => Poll::Ready(Err(Raised::Foreign(err))),
            None => Poll::Pending,
        }
    }
}

/// A read-only reference to a peer entity, reachable only through its
/// public method table.
///
/// `EntityRef` exposes no field access and no mutating operation other than
/// `call`, so there is no way to express the private-state violations
/// described for the dynamic original (attribute access on a non-method,
/// name-private member, or a missing member) — the type simply has no such
/// surface to reach for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityRef {
    handle: EntityHandle,
}

impl EntityRef {
    pub fn new(handle: EntityHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> EntityHandle {
        self.handle
    }
}

/// A proxy for a stateless service capability, materialised for the
/// duration of the task that holds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceRef {
    service_type: &'static str,
}

impl ServiceRef {
    pub fn new(service_type: &'static str) -> Self {
        Self { service_type }
    }
}

/// The capability handed to an entity method while it runs under the
/// engine: construct peers, call peers, call services, raise domain errors.
pub struct Context<S> {
    bridge: Rc<Bridge>,
    trace_offset: u64,
    _subject: std::marker::PhantomData<fn() -> S>,
}

impl<S> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            bridge: self.bridge.clone(),
            trace_offset: self.trace_offset,
            _subject: std::marker::PhantomData,
        }
    }
}

impl<S> Context<S> {
    pub(crate) fn new(trace_offset: u64) -> (Self, Rc<Bridge>) {
        let bridge = Rc::new(Bridge::default());
        (
            Self {
                bridge: bridge.clone(),
                trace_offset,
                _subject: std::marker::PhantomData,
            },
            bridge,
        )
    }

    /// The offset of the initiator message this task is running on behalf
    /// of — the value every interception message this task emits carries as
    /// `trace_offset`.
    pub fn trace_offset(&self) -> u64 {
        self.trace_offset
    }

    fn intercept(&self, request: PendingRequest) -> Intercept {
        Intercept {
            bridge: self.bridge.clone(),
            request: Some(request),
        }
    }

    /// Suspend the task to construct a peer entity of `entity_type`.
    ///
    /// Resolves to the handle of the constructed peer. The peer's own
    /// initializer is never run here — construction is mediated entirely by
    /// whatever engine owns that entity; this call only records the intent
    /// and awaits the handle.
    pub async fn create_entity(
        &self,
        entity_type: &'static str,
        args: Args,
    ) -> Result<EntityRef, Raised> {
        let value = self
            .intercept(PendingRequest::CreateEntity { entity_type, args })
            .await?;
        Ok(EntityRef::new(value.as_entity().expect(
            "engine resumed a create-entity suspension with a non-entity value",
        )))
    }

    /// Suspend the task to invoke `method_id` on a peer entity.
    pub async fn call_entity(
        &self,
        peer: EntityRef,
        method_id: MethodId,
        args: Args,
    ) -> Result<Value, Raised> {
        self.intercept(PendingRequest::EntityMethod {
            receiver: peer.handle(),
            method_id,
            args,
        })
        .await
    }

    /// Suspend the task to invoke `method_id` on a service proxy.
    pub async fn call_service(
        &self,
        service: ServiceRef,
        method_id: MethodId,
        args: Args,
    ) -> Result<Value, Raised> {
        self.intercept(PendingRequest::ServiceMethod {
            service_type: service.service_type,
            method_id,
            args,
        })
        .await
    }

    /// Materialise a proxy for a declared service field. Valid only for the
    /// lifetime of the current task; the proxy carries no state of its own.
    pub fn service(&self, service_type: &'static str) -> ServiceRef {
        ServiceRef::new(service_type)
    }
}

pub(crate) use self::private::pending_request_of;

mod private {
    use super::*;

    pub(crate) fn pending_request_of(bridge: &Bridge) -> Option<PendingRequest> {
        bridge.pending_request.borrow_mut().take()
    }
}
