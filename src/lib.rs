//! A deterministic, event-sourced execution engine for long-running
//! stateful entities.
//!
//! An entity's every externally observable interaction — construction,
//! method invocation, requests to other entities, calls to external
//! services, errors raised and caught — is recorded as an append-only
//! sequence of [`message::ContextMessage`]s. [`engine::Engine`] re-derives an
//! entity's in-memory state from that log and, given new input messages,
//! deterministically continues execution to produce further output
//! messages.
//!
//! Transport and persistence of the message log, and serialization of
//! message payloads, are left to the caller: the engine only ever consumes
//! and produces in-memory [`message::ContextMessage`] values.

mod coroutine;
pub mod engine;
pub mod entity;
pub mod error;
pub mod message;
pub mod value;
mod waker;

pub use engine::Engine;
pub use entity::{Context, EntityRef, ServiceRef, Subject};
pub use error::{DomainError, EngineError, ErrorRecord, ForeignError, Raised};
pub use message::{Args, ContextMessage, MethodId, Offset};
pub use value::{EntityHandle, Value};
