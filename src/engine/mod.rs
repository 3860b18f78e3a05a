//! The replay/continue core: the engine that owns a subject's cached
//! context and advances it in response to new input.

mod cleanup;

use crate::coroutine::{poll_once, PendingTask, StepOutcome, TaskFuture};
use crate::entity::{Context, PendingRequest, Resume, Subject};
use crate::error::{EngineError, ErrorRecord, Raised};
use crate::message::{Args, ContextMessage, MethodId, Offset};
use crate::value::Value;
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

/// A deterministic, event-sourced execution engine for a single subject
/// instance.
///
/// Construction does not run the subject's initializer: the subject slot
/// stays empty until the first `CreateEntityRequestReceived` is processed by
/// [`Engine::complete`].
pub struct Engine<S: Subject> {
    subject: Option<Rc<RefCell<S>>>,
    context: Vec<ContextMessage>,
    next_offset: Offset,
    pending: HashMap<Offset, PendingTask<S>>,
}

impl<S: Subject> Engine<S> {
    /// Create a fresh engine bound to `S`. Validates the method table for
    /// duplicate entries; this is the one entity-contract check left that
    /// Rust's type system cannot already enforce at compile time (a missing
    /// constructor, snapshot or restore operation is a compile error since
    /// `Subject` requires them; mismatched snapshot/restore types cannot
    /// even be expressed).
    pub fn new() -> Result<Self, EngineError> {
        let mut seen = HashSet::new();
        for method_id in S::METHODS {
            if !seen.insert(*method_id) {
                return Err(EngineError::ContractViolation {
                    type_name: S::TYPE_NAME,
                    reason: format!("method `{method_id}` is declared more than once"),
                });
            }
        }
        Ok(Self {
            subject: None,
            context: Vec::new(),
            next_offset: 0,
            pending: HashMap::new(),
        })
    }

    fn alloc_offset(&mut self) -> Offset {
        let offset = self.next_offset;
        self.next_offset += 1;
        offset
    }

    fn check_order(&mut self, offset: Offset) -> Result<(), EngineError> {
        if offset < self.next_offset {
            return Err(EngineError::UnorderedOffsets {
                offset,
                current: self.next_offset,
            });
        }
        self.next_offset = offset + 1;
        Ok(())
    }

    /// A copy of the cached context, in emission order.
    pub fn context(&self) -> Vec<ContextMessage> {
        self.context.clone()
    }

    /// A read-only handle to the current subject, or `None` before the
    /// first `CreateEntityRequestReceived` has run. Writes through the
    /// returned handle are not exposed; there is no API surface for them.
    pub fn subject(&self) -> Option<std::cell::Ref<'_, S>> {
        self.subject.as_ref().map(|s| s.borrow())
    }

    /// Consume new input, advancing the subject's execution and returning
    /// the messages newly produced by this call.
    ///
    /// `input` must have `self.context()` as a structural prefix; anything
    /// else fails with [`EngineError::CacheMiss`]. On any error the engine's
    /// observable state (cached context, offset counter, subject) is left
    /// exactly as it was before the call.
    pub fn complete(&mut self, input: &[ContextMessage]) -> Result<Vec<ContextMessage>, EngineError> {
        trace!(
            "complete: {} cached messages, {} inbound",
            self.context.len(),
            input.len()
        );
        if input.len() < self.context.len() {
            warn!(
                "complete: input shorter than cached context ({} < {})",
                input.len(),
                self.context.len()
            );
            return Err(EngineError::CacheMiss {
                offset: input.len() as Offset,
                expected: format!("{:?}", self.context.get(input.len())),
                found: "<end of input>".to_string(),
            });
        }
        for (i, (cached, incoming)) in self.context.iter().zip(input.iter()).enumerate() {
            if cached != incoming {
                warn!("complete: cached prefix diverges from input at offset {i}");
                return Err(EngineError::CacheMiss {
                    offset: i as Offset,
                    expected: format!("{cached:?}"),
                    found: format!("{incoming:?}"),
                });
            }
        }
        let suffix = &input[self.context.len()..];
        let rollback_len = self.context.len();

        match self.process_suffix(suffix) {
            Ok(produced) => {
                trace!("complete: produced {} messages", produced.len());
                Ok(produced)
            }
            Err(err) => {
                warn!("complete: aborting call and rolling back, cause: {err}");
                self.restore_to(rollback_len);
                Err(err)
            }
        }
    }

    /// Discard everything this call touched and rebuild the engine's entire
    /// observable state — cached context, offset counter, subject, and every
    /// pending task — by replaying the messages that existed before the
    /// call from scratch.
    ///
    /// A pending task that this call resumed (even one that suspended again
    /// under a brand-new offset, or one a later message in the same suffix
    /// never got to) cannot be un-polled: `Future::poll` has already
    /// advanced its internal state irreversibly by the time a later message
    /// in the suffix fails. Diffing `self.pending`'s keys before and after
    /// the call cannot recover such a task, because the entry removed from
    /// the map is gone, not merely renamed. Full replay sidesteps the
    /// problem entirely: it never touches the advanced task object at all,
    /// it deterministically reconstructs an equivalent one from the
    /// unchanged message log, exactly as a fresh [`Engine::new`] fed this
    /// same prefix would (see the `a_fresh_engine_replays_a_full_historical_log_without_re_emitting`
    /// test) — which is what the engine's own determinism guarantee
    /// (`spec.md` §8) promises produces identical behaviour.
    fn restore_to(&mut self, context_len: usize) {
        let prior_context = self.context[..context_len].to_vec();
        let mut reconstructed =
            Self::new().expect("subject's method table was already validated by this engine's own construction");
        reconstructed
            .complete(&prior_context)
            .expect("replaying a context this engine already accepted must not fail");
        *self = reconstructed;
    }

    fn process_suffix(&mut self, suffix: &[ContextMessage]) -> Result<Vec<ContextMessage>, EngineError> {
        let mut expected: VecDeque<ContextMessage> = VecDeque::new();

        for msg in suffix {
            let matches_expected =
                msg.is_expected_output() || (is_state_changed(msg) && !expected.is_empty());

            if matches_expected {
                let exp = expected.pop_front().ok_or_else(|| EngineError::InconsistentContext {
                    expected: "<no pending expectation>".to_string(),
                    found: format!("{msg:?}"),
                })?;
                if &exp != msg {
                    return Err(EngineError::InconsistentContext {
                        expected: format!("{exp:?}"),
                        found: format!("{msg:?}"),
                    });
                }
                self.context.push(msg.clone());
                if let ContextMessage::EntityStateChanged { state, .. } = msg {
                    if let Some(subject) = &self.subject {
                        subject.borrow_mut().restore(state.clone());
                    }
                }
                continue;
            }

            if msg.is_initiator() {
                self.check_order(msg.offset())?;
                self.context.push(msg.clone());
                let produced = match msg {
                    ContextMessage::CreateEntityRequestReceived { offset, args } => {
                        self.spawn_construct(*offset, args.clone())?
                    }
                    ContextMessage::EntityMethodRequestReceived {
                        offset,
                        method_id,
                        args,
                    } => {
                        if !S::METHODS.contains(method_id) {
                            return Err(EngineError::UnknownMethod {
                                method_id: *method_id,
                            });
                        }
                        self.spawn_method(*offset, *method_id, args.clone())?
                    }
                    _ => unreachable!("is_initiator matched one of the two initiator variants"),
                };
                expected.extend(produced);
            } else if msg.is_response_received() {
                self.check_order(msg.offset())?;
                self.context.push(msg.clone());
                let request_offset = msg
                    .request_offset()
                    .expect("is_response_received implies a request_offset payload");
                let value = match msg {
                    ContextMessage::CreateEntityResponseReceived { entity, .. } => Value::Entity(*entity),
                    ContextMessage::EntityMethodResponseReceived { response, .. }
                    | ContextMessage::ServiceMethodResponseReceived { response, .. } => response.clone(),
                    _ => unreachable!("is_response_received matched one of the three response variants"),
                };
                let produced = self.resume_task(request_offset, Resume::Response(value))?;
                expected.extend(produced);
            } else if msg.is_error_received() {
                self.check_order(msg.offset())?;
                self.context.push(msg.clone());
                let request_offset = msg
                    .request_offset()
                    .expect("is_error_received implies a request_offset payload");
                let produced = match msg {
                    ContextMessage::CreateEntityErrorReceived { error_type, args, .. }
                    | ContextMessage::EntityMethodErrorReceived { error_type, args, .. } => {
                        let record = ErrorRecord {
                            error_type: *error_type,
                            args: args.clone(),
                        };
                        self.resume_task(request_offset, Resume::Domain(record))?
                    }
                    ContextMessage::ServiceMethodErrorReceived { exception, .. } => {
                        self.resume_task(request_offset, Resume::Foreign(exception.clone()))?
                    }
                    _ => unreachable!("is_error_received matched one of the three error variants"),
                };
                expected.extend(produced);
            } else {
                match msg {
                    ContextMessage::EntityStateChanged { offset, state } => {
                        self.check_order(*offset)?;
                        if let Some(subject) = &self.subject {
                            subject.borrow_mut().restore(state.clone());
                        }
                        self.context.push(msg.clone());
                    }
                    _ => unreachable!("every other variant is expected-output shaped"),
                }
            }
        }

        for msg in &expected {
            self.context.push(msg.clone());
        }
        Ok(expected.into_iter().collect())
    }

    fn spawn_construct(&mut self, initiator_offset: Offset, args: Args) -> Result<Vec<ContextMessage>, EngineError> {
        debug!("spawning construct task for initiator at offset {initiator_offset}");
        let (ctx, bridge) = Context::new(initiator_offset);
        let future = TaskFuture::Construct(S::construct(ctx, args));
        let task = PendingTask {
            initiator_offset,
            bridge,
            future,
        };
        self.run_step(task)
    }

    fn spawn_method(
        &mut self,
        initiator_offset: Offset,
        method_id: MethodId,
        args: Args,
    ) -> Result<Vec<ContextMessage>, EngineError> {
        debug!("spawning `{method_id}` task for initiator at offset {initiator_offset}");
        let subject = self
            .subject
            .clone()
            .expect("method request validated against the method table requires a constructed subject");
        let (ctx, bridge) = Context::new(initiator_offset);
        let future = TaskFuture::Method(S::dispatch(subject, ctx, method_id, args));
        let task = PendingTask {
            initiator_offset,
            bridge,
            future,
        };
        self.run_step(task)
    }

    fn resume_task(&mut self, request_offset: Offset, resume: Resume) -> Result<Vec<ContextMessage>, EngineError> {
        let mut task = self.pending.remove(&request_offset).ok_or_else(|| {
            EngineError::InconsistentContext {
                expected: format!("a pending task awaiting offset {request_offset}"),
                found: "<no such task>".to_string(),
            }
        })?;
        *task.bridge.resume.borrow_mut() = Some(resume);
        self.run_step(task)
    }

    /// Drive a task (freshly spawned or just resumed) one step and turn the
    /// outcome into the messages the engine must now account for.
    fn run_step(&mut self, mut task: PendingTask<S>) -> Result<Vec<ContextMessage>, EngineError> {
        let initiator_offset = task.initiator_offset;
        match poll_once(&mut task.future, &task.bridge) {
            StepOutcome::Suspended { request } => {
                let offset = self.alloc_offset();
                let message = build_request_message(offset, initiator_offset, &request);
                self.pending.insert(offset, task);
                Ok(vec![message])
            }
            StepOutcome::ConstructedOk(subject) => {
                let subject = Rc::new(RefCell::new(subject));
                let snapshot = subject.borrow().snapshot();
                self.subject = Some(subject);
                let response_offset = self.alloc_offset();
                let state_offset = self.alloc_offset();
                Ok(vec![
                    ContextMessage::CreateEntityResponseSent {
                        offset: response_offset,
                        request_offset: initiator_offset,
                    },
                    ContextMessage::EntityStateChanged {
                        offset: state_offset,
                        state: snapshot,
                    },
                ])
            }
            StepOutcome::ConstructedErr(Raised::Domain(record)) => {
                if !S::DOMAIN_ERRORS.contains(&record.error_type) {
                    return Err(EngineError::OrphanedError {
                        error_type: record.error_type,
                    });
                }
                let offset = self.alloc_offset();
                Ok(vec![ContextMessage::CreateEntityErrorSent {
                    offset,
                    request_offset: initiator_offset,
                    error_type: record.error_type,
                    args: record.args,
                }])
            }
            StepOutcome::ConstructedErr(Raised::Foreign(source)) => {
                Err(EngineError::UncaughtForeignError { source })
            }
            StepOutcome::MethodOk(response) => {
                let subject = self
                    .subject
                    .as_ref()
                    .expect("a method task cannot complete without a constructed subject");
                let snapshot = subject.borrow().snapshot();
                let response_offset = self.alloc_offset();
                let state_offset = self.alloc_offset();
                Ok(vec![
                    ContextMessage::EntityMethodResponseSent {
                        offset: response_offset,
                        request_offset: initiator_offset,
                        response,
                    },
                    ContextMessage::EntityStateChanged {
                        offset: state_offset,
                        state: snapshot,
                    },
                ])
            }
            StepOutcome::MethodErr(Raised::Domain(record)) => {
                if !S::DOMAIN_ERRORS.contains(&record.error_type) {
                    return Err(EngineError::OrphanedError {
                        error_type: record.error_type,
                    });
                }
                let subject = self
                    .subject
                    .as_ref()
                    .expect("a method task cannot raise without a constructed subject");
                let snapshot = subject.borrow().snapshot();
                let error_offset = self.alloc_offset();
                let state_offset = self.alloc_offset();
                Ok(vec![
                    ContextMessage::EntityMethodErrorSent {
                        offset: error_offset,
                        request_offset: initiator_offset,
                        error_type: record.error_type,
                        args: record.args,
                    },
                    ContextMessage::EntityStateChanged {
                        offset: state_offset,
                        state: snapshot,
                    },
                ])
            }
            StepOutcome::MethodErr(Raised::Foreign(source)) => {
                Err(EngineError::UncaughtForeignError { source })
            }
        }
    }

    /// Run the three-pass cleanup compactor over the cached context,
    /// returning the pruned messages in their original order. The surviving
    /// messages remain as the cached context, a valid replay input on their
    /// own.
    pub fn cleanup(&mut self) -> Vec<ContextMessage> {
        let context = std::mem::take(&mut self.context);
        let before = context.len();
        let (surviving, pruned) = cleanup::compact(context);
        debug!(
            "cleanup: pruned {} of {before} cached messages, {} survive",
            pruned.len(),
            surviving.len()
        );
        self.context = surviving;
        pruned
    }
}

fn is_state_changed(msg: &ContextMessage) -> bool {
    matches!(msg, ContextMessage::EntityStateChanged { .. })
}

fn build_request_message(offset: Offset, trace_offset: Offset, request: &PendingRequest) -> ContextMessage {
    match request {
        PendingRequest::CreateEntity { entity_type, args } => ContextMessage::CreateEntityRequestSent {
            offset,
            trace_offset,
            entity_type: *entity_type,
            args: args.clone(),
        },
        PendingRequest::EntityMethod {
            receiver,
            method_id,
            args,
        } => ContextMessage::EntityMethodRequestSent {
            offset,
            trace_offset,
            receiver: *receiver,
            method_id: *method_id,
            args: args.clone(),
        },
        PendingRequest::ServiceMethod {
            service_type,
            method_id,
            args,
        } => ContextMessage::ServiceMethodRequestSent {
            offset,
            trace_offset,
            service_type: *service_type,
            method_id: *method_id,
            args: args.clone(),
        },
    }
}
