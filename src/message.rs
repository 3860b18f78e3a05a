//! The context message sum type and the identifiers it is built from.

use crate::value::{EntityHandle, Value};
use std::collections::BTreeMap;

/// A monotonically assigned position within a single context.
///
/// Offsets are never reused and never decrease within a context; see the
/// ordering invariant enforced by [`crate::engine::Engine::complete`].
pub type Offset = u64;

/// Stable identity of a method within a subject's method table.
///
/// Derived from the method's declared name rather than from any transient
/// function pointer, so it survives recompilation of the subject type as
/// long as the name is unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub &'static str);

impl MethodId {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Positional and keyword arguments carried by request-shaped messages.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keyword: BTreeMap<String, Value>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keyword: BTreeMap<String, Value>) -> Self {
        Self { positional, keyword }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// The stable name of a domain error type, used to correlate a raised error
/// with its entry in a subject's declared error registry.
pub type ErrorType = &'static str;

/// Every variant of the context message sum type, as described in the data
/// model: a tagged union over offset-carrying payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum ContextMessage {
    CreateEntityRequestReceived { offset: Offset, args: Args },
    CreateEntityResponseSent { offset: Offset, request_offset: Offset },
    CreateEntityErrorSent {
        offset: Offset,
        request_offset: Offset,
        error_type: ErrorType,
        args: Args,
    },

    EntityMethodRequestReceived {
        offset: Offset,
        method_id: MethodId,
        args: Args,
    },
    EntityMethodResponseSent {
        offset: Offset,
        request_offset: Offset,
        response: Value,
    },
    EntityMethodErrorSent {
        offset: Offset,
        request_offset: Offset,
        error_type: ErrorType,
        args: Args,
    },

    CreateEntityRequestSent {
        offset: Offset,
        trace_offset: Offset,
        entity_type: &'static str,
        args: Args,
    },
    CreateEntityResponseReceived {
        offset: Offset,
        request_offset: Offset,
        entity: EntityHandle,
    },
    CreateEntityErrorReceived {
        offset: Offset,
        request_offset: Offset,
        error_type: ErrorType,
        args: Args,
    },

    EntityMethodRequestSent {
        offset: Offset,
        trace_offset: Offset,
        receiver: EntityHandle,
        method_id: MethodId,
        args: Args,
    },
    EntityMethodResponseReceived {
        offset: Offset,
        request_offset: Offset,
        response: Value,
    },
    EntityMethodErrorReceived {
        offset: Offset,
        request_offset: Offset,
        error_type: ErrorType,
        args: Args,
    },

    ServiceMethodRequestSent {
        offset: Offset,
        trace_offset: Offset,
        service_type: &'static str,
        method_id: MethodId,
        args: Args,
    },
    ServiceMethodResponseReceived {
        offset: Offset,
        request_offset: Offset,
        response: Value,
    },
    /// `exception` is opaque: the engine never inspects a foreign error's
    /// contents, only its identity (see [`crate::error::ForeignError`]).
    ServiceMethodErrorReceived {
        offset: Offset,
        request_offset: Offset,
        exception: crate::error::ForeignError,
    },

    EntityStateChanged { offset: Offset, state: Value },
}

impl ContextMessage {
    pub fn offset(&self) -> Offset {
        use ContextMessage::*;
        match self {
            CreateEntityRequestReceived { offset, .. }
            | CreateEntityResponseSent { offset, .. }
            | CreateEntityErrorSent { offset, .. }
            | EntityMethodRequestReceived { offset, .. }
            | EntityMethodResponseSent { offset, .. }
            | EntityMethodErrorSent { offset, .. }
            | CreateEntityRequestSent { offset, .. }
            | CreateEntityResponseReceived { offset, .. }
            | CreateEntityErrorReceived { offset, .. }
            | EntityMethodRequestSent { offset, .. }
            | EntityMethodResponseReceived { offset, .. }
            | EntityMethodErrorReceived { offset, .. }
            | ServiceMethodRequestSent { offset, .. }
            | ServiceMethodResponseReceived { offset, .. }
            | ServiceMethodErrorReceived { offset, .. }
            | EntityStateChanged { offset, .. } => *offset,
        }
    }

    /// Whether this message starts a new initiator task (create or method
    /// request arriving from outside the engine).
    pub fn is_initiator(&self) -> bool {
        matches!(
            self,
            ContextMessage::CreateEntityRequestReceived { .. }
                | ContextMessage::EntityMethodRequestReceived { .. }
        )
    }

    /// Whether this message resumes a pending task with a response value.
    pub fn is_response_received(&self) -> bool {
        matches!(
            self,
            ContextMessage::CreateEntityResponseReceived { .. }
                | ContextMessage::EntityMethodResponseReceived { .. }
                | ContextMessage::ServiceMethodResponseReceived { .. }
        )
    }

    /// Whether this message resumes a pending task by throwing an error.
    pub fn is_error_received(&self) -> bool {
        matches!(
            self,
            ContextMessage::CreateEntityErrorReceived { .. }
                | ContextMessage::EntityMethodErrorReceived { .. }
                | ContextMessage::ServiceMethodErrorReceived { .. }
        )
    }

    /// `request_offset` this message resumes, for response/error arrivals.
    pub fn request_offset(&self) -> Option<Offset> {
        use ContextMessage::*;
        match self {
            CreateEntityResponseReceived { request_offset, .. }
            | CreateEntityErrorReceived { request_offset, .. }
            | EntityMethodResponseReceived { request_offset, .. }
            | EntityMethodErrorReceived { request_offset, .. }
            | ServiceMethodResponseReceived { request_offset, .. }
            | ServiceMethodErrorReceived { request_offset, .. }
            | CreateEntityResponseSent { request_offset, .. }
            | CreateEntityErrorSent { request_offset, .. }
            | EntityMethodResponseSent { request_offset, .. }
            | EntityMethodErrorSent { request_offset, .. } => Some(*request_offset),
            _ => None,
        }
    }

    /// Whether this is an outbound `*_Sent` message the engine itself produces
    /// as a terminal response/error for an initiator.
    pub fn is_terminal_sent(&self) -> bool {
        matches!(
            self,
            ContextMessage::CreateEntityResponseSent { .. }
                | ContextMessage::CreateEntityErrorSent { .. }
                | ContextMessage::EntityMethodResponseSent { .. }
                | ContextMessage::EntityMethodErrorSent { .. }
        )
    }

    /// Whether this message is produced by an interception yield rather than
    /// by the engine resolving an initiator (i.e. something the expected
    /// outputs queue should be matched against).
    pub fn is_expected_output(&self) -> bool {
        matches!(
            self,
            ContextMessage::CreateEntityResponseSent { .. }
                | ContextMessage::CreateEntityErrorSent { .. }
                | ContextMessage::EntityMethodResponseSent { .. }
                | ContextMessage::EntityMethodErrorSent { .. }
                | ContextMessage::CreateEntityRequestSent { .. }
                | ContextMessage::EntityMethodRequestSent { .. }
                | ContextMessage::ServiceMethodRequestSent { .. }
        )
    }

    pub fn trace_offset(&self) -> Option<Offset> {
        match self {
            ContextMessage::CreateEntityRequestSent { trace_offset, .. }
            | ContextMessage::EntityMethodRequestSent { trace_offset, .. }
            | ContextMessage::ServiceMethodRequestSent { trace_offset, .. } => Some(*trace_offset),
            _ => None,
        }
    }
}
