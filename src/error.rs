//! Error taxonomy: the engine's own failures, the contract authors raise
//! from inside entity methods, and the opaque errors that arrive from
//! services.

use crate::message::{ErrorType, MethodId, Offset};
use std::sync::Arc;

/// Every way [`crate::engine::Engine::complete`] and registration can fail.
///
/// All variants are signalled to the caller as typed failures; the engine
/// never swallows one. On any of these the in-progress `complete` call is
/// abandoned and the cached context is left exactly as it was before the
/// call started.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(
        "entity type `{type_name}` does not satisfy the entity contract: {reason}"
    )]
    ContractViolation {
        type_name: &'static str,
        reason: String,
    },

    #[error(
        "input at offset {offset} does not match the cached message at the same position \
         (expected {expected:?}, found {found:?})"
    )]
    CacheMiss {
        offset: Offset,
        expected: String,
        found: String,
    },

    #[error(
        "inbound message offset {offset} is not ordered after the current offset counter {current}"
    )]
    UnorderedOffsets { offset: Offset, current: Offset },

    #[error(
        "message produced by the task does not match the message supplied to resume it \
         (expected {expected:?}, found {found:?})"
    )]
    InconsistentContext { expected: String, found: String },

    #[error("method `{method_id}` is not present in the subject's method table")]
    UnknownMethod { method_id: MethodId },

    #[error("attempted to access or mutate private state of an entity outside its own methods")]
    PrivateState,

    #[error(
        "task raised domain error `{error_type}` that was never captured by the interception layer"
    )]
    OrphanedError { error_type: ErrorType },

    #[error("a foreign (service-origin) error escaped the task uncaught")]
    UncaughtForeignError { source: ForeignError },
}

/// The captured `(type, args, kwargs)` of a domain error at the moment it
/// was raised inside a task.
///
/// In the source system this association lived in a weak map keyed by the
/// error instance's identity, because the runtime language could not attach
/// fields to arbitrary exception types. Here the error type owns the record
/// directly via [`DomainError::record`] — there is no weak table to keep in
/// sync with garbage collection because the error's lifetime is bounded by
/// the task frame that raised it.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    pub error_type: ErrorType,
    pub args: crate::message::Args,
}

/// A domain error an entity or service method may raise.
///
/// Implementors must be able to describe themselves as a stable type name
/// plus the positional/keyword arguments that constructed them, so the
/// engine can faithfully reproduce an `*_ErrorSent` message on replay
/// without needing to serialize the error value itself.
pub trait DomainError: std::error::Error + Send + Sync + 'static {
    fn record(&self) -> ErrorRecord;
}

/// An opaque error returned by a service call.
///
/// The engine never inspects a foreign error's contents — only a service's
/// caller (outside the engine) produces and interprets them. Equality is by
/// instance identity, matching the "opaque exception object" the source
/// re-throws verbatim into the task.
#[derive(Clone)]
pub struct ForeignError(pub Arc<dyn std::error::Error + Send + Sync>);

impl ForeignError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(err))
    }
}

impl PartialEq for ForeignError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ForeignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ForeignError({})", self.0)
    }
}

impl std::fmt::Display for ForeignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ForeignError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// What a task raised, distinguishing a domain error the engine can route
/// outbound from a foreign error that must propagate to the engine's own
/// caller.
pub enum Raised {
    Domain(ErrorRecord),
    Foreign(ForeignError),
}

/// Lets an entity method write `Err(my_error)?` / `.map_err(Into::into)`
/// against any type implementing [`DomainError`] instead of hand-assembling
/// an [`ErrorRecord`] at every raise site.
impl<E: DomainError> From<E> for Raised {
    fn from(err: E) -> Self {
        Raised::Domain(err.record())
    }
}
