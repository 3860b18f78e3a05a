//! A subject whose constructor and one of its methods each delegate to
//! constructing a peer entity, exercising the entity-construction
//! interception point and the cleanup compactor across multiple completed
//! initiator trees.

use runa_core::entity::LocalBoxFuture;
use runa_core::{Args, Context, ContextMessage, EntityHandle, MethodId, Raised, Subject, Value};
use std::cell::RefCell;
use std::rc::Rc;

const ADD_PET: MethodId = MethodId::new("add_pet");
const PRODUCT_TYPE: &str = "Product";

struct Factory {
    pets: Vec<EntityHandle>,
}

fn args_positional(values: Vec<Value>) -> Args {
    Args::new(values, Default::default())
}

impl Subject for Factory {
    const TYPE_NAME: &'static str = "Factory";
    const METHODS: &'static [MethodId] = &[ADD_PET];
    const DOMAIN_ERRORS: &'static [&'static str] = &[];

    fn construct(ctx: Context<Self>, args: Args) -> LocalBoxFuture<Result<Self, Raised>> {
        Box::pin(async move {
            let name = args
                .positional
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let product = ctx
                .create_entity(PRODUCT_TYPE, args_positional(vec![Value::Str(name)]))
                .await?;
            Ok(Factory {
                pets: vec![product.handle()],
            })
        })
    }

    fn snapshot(&self) -> Value {
        Value::List(self.pets.iter().copied().map(Value::Entity).collect())
    }

    fn restore(&mut self, state: Value) {
        let Value::List(items) = state else {
            panic!("factory state is always a list of entity handles");
        };
        self.pets = items.into_iter().filter_map(|v| v.as_entity()).collect();
    }

    fn dispatch(
        subject: Rc<RefCell<Self>>,
        ctx: Context<Self>,
        method: MethodId,
        args: Args,
    ) -> LocalBoxFuture<Result<Value, Raised>> {
        Box::pin(async move {
            assert_eq!(method, ADD_PET);
            let name = args
                .positional
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let product = ctx
                .create_entity(PRODUCT_TYPE, args_positional(vec![Value::Str(name)]))
                .await?;
            subject.borrow_mut().pets.push(product.handle());
            Ok(Value::Int(subject.borrow().pets.len() as i64))
        })
    }
}

#[test]
fn constructor_delegates_to_a_peer_entity_construction() {
    let mut engine = runa_core::Engine::<Factory>::new().unwrap();
    let mut log = vec![ContextMessage::CreateEntityRequestReceived {
        offset: 0,
        args: args_positional(vec![Value::Str("Box".to_string())]),
    }];

    let produced = engine.complete(&log).unwrap();
    assert_eq!(
        produced,
        vec![ContextMessage::CreateEntityRequestSent {
            offset: 1,
            trace_offset: 0,
            entity_type: PRODUCT_TYPE,
            args: args_positional(vec![Value::Str("Box".to_string())]),
        }]
    );
    log.extend(produced);

    let box_handle = EntityHandle::new(1);
    log.push(ContextMessage::CreateEntityResponseReceived {
        offset: 2,
        request_offset: 1,
        entity: box_handle,
    });

    let produced = engine.complete(&log).unwrap();
    assert_eq!(
        produced,
        vec![
            ContextMessage::CreateEntityResponseSent {
                offset: 3,
                request_offset: 0,
            },
            ContextMessage::EntityStateChanged {
                offset: 4,
                state: Value::List(vec![Value::Entity(box_handle)]),
            },
        ]
    );
    log.extend(produced);

    assert_eq!(engine.context(), log);
}

#[test]
fn cleanup_prunes_a_fully_resolved_initiator_tree() {
    let mut engine = runa_core::Engine::<Factory>::new().unwrap();
    let mut log = vec![ContextMessage::CreateEntityRequestReceived {
        offset: 0,
        args: args_positional(vec![Value::Str("Box".to_string())]),
    }];
    log.extend(engine.complete(&log).unwrap());

    let box_handle = EntityHandle::new(1);
    log.push(ContextMessage::CreateEntityResponseReceived {
        offset: 2,
        request_offset: 1,
        entity: box_handle,
    });
    log.extend(engine.complete(&log).unwrap());

    // A second, independent trace: calling add_pet to completion.
    log.push(ContextMessage::EntityMethodRequestReceived {
        offset: 5,
        method_id: ADD_PET,
        args: args_positional(vec![Value::Str("Ball".to_string())]),
    });
    log.extend(engine.complete(&log).unwrap());

    let ball_handle = EntityHandle::new(2);
    log.push(ContextMessage::CreateEntityResponseReceived {
        offset: 7,
        request_offset: 6,
        entity: ball_handle,
    });
    log.extend(engine.complete(&log).unwrap());

    assert_eq!(engine.subject().unwrap().pets, vec![box_handle, ball_handle]);

    let pruned = engine.cleanup();
    let surviving = engine.context();

    // Only the latest state snapshot remains; everything that led up to it
    // (both completed initiator trees, their outgoing requests and
    // responses, and the now-superseded intermediate snapshot) is pruned.
    assert_eq!(surviving.len(), 1);
    assert!(matches!(
        surviving[0],
        ContextMessage::EntityStateChanged { .. }
    ));
    assert_eq!(pruned.len(), log.len() - 1);

    // The surviving context is still a valid, no-op replay input.
    let produced = engine.complete(&surviving).unwrap();
    assert!(produced.is_empty());
    assert_eq!(engine.subject().unwrap().pets, vec![box_handle, ball_handle]);
}

const ADD_PAIR: MethodId = MethodId::new("add_pair");
const LEAF_TYPE: &str = "Leaf";

/// A subject whose single method awaits two peer-entity constructions in
/// sequence, so that resuming it once leaves it suspended again rather than
/// finished — the shape needed to exercise rollback of a task resumed mid-call.
struct Relay {
    leaves: Vec<EntityHandle>,
}

impl Subject for Relay {
    const TYPE_NAME: &'static str = "Relay";
    const METHODS: &'static [MethodId] = &[ADD_PAIR];
    const DOMAIN_ERRORS: &'static [&'static str] = &[];

    fn construct(_ctx: Context<Self>, _args: Args) -> LocalBoxFuture<Result<Self, Raised>> {
        Box::pin(async move { Ok(Relay { leaves: Vec::new() }) })
    }

    fn snapshot(&self) -> Value {
        Value::List(self.leaves.iter().copied().map(Value::Entity).collect())
    }

    fn restore(&mut self, state: Value) {
        let Value::List(items) = state else {
            panic!("relay state is always a list of entity handles");
        };
        self.leaves = items.into_iter().filter_map(|v| v.as_entity()).collect();
    }

    fn dispatch(
        subject: Rc<RefCell<Self>>,
        ctx: Context<Self>,
        method: MethodId,
        _args: Args,
    ) -> LocalBoxFuture<Result<Value, Raised>> {
        Box::pin(async move {
            assert_eq!(method, ADD_PAIR);
            let first = ctx.create_entity(LEAF_TYPE, Args::empty()).await?;
            let second = ctx.create_entity(LEAF_TYPE, Args::empty()).await?;
            subject.borrow_mut().leaves.push(first.handle());
            subject.borrow_mut().leaves.push(second.handle());
            Ok(Value::Int(subject.borrow().leaves.len() as i64))
        })
    }
}

#[test]
fn rollback_restores_a_pending_task_resumed_and_resuspended_within_the_failing_call() {
    let mut engine = runa_core::Engine::<Relay>::new().unwrap();
    let mut log = vec![ContextMessage::CreateEntityRequestReceived {
        offset: 0,
        args: Args::empty(),
    }];
    log.extend(engine.complete(&log).unwrap());

    log.push(ContextMessage::EntityMethodRequestReceived {
        offset: 3,
        method_id: ADD_PAIR,
        args: Args::empty(),
    });
    let produced = engine.complete(&log).unwrap();
    assert_eq!(
        produced,
        vec![ContextMessage::CreateEntityRequestSent {
            offset: 4,
            trace_offset: 3,
            entity_type: LEAF_TYPE,
            args: Args::empty(),
        }]
    );
    log.extend(produced);

    // `log` now ends with a task left pending at offset 4 by a successful
    // call. The next call's suffix resumes it (re-suspending it under a
    // brand-new offset, 6) and then, in that same suffix, feeds a message
    // that fails — the exact path a key-diff rollback cannot reverse, since
    // the task's original map entry is gone by the time the later message
    // errors.
    let leaf1 = EntityHandle::new(1);
    let mut bad_log = log.clone();
    bad_log.push(ContextMessage::CreateEntityResponseReceived {
        offset: 5,
        request_offset: 4,
        entity: leaf1,
    });
    bad_log.push(ContextMessage::EntityMethodRequestReceived {
        offset: 0,
        method_id: ADD_PAIR,
        args: Args::empty(),
    });

    let err = engine.complete(&bad_log).unwrap_err();
    assert!(matches!(
        err,
        runa_core::EngineError::UnorderedOffsets { offset: 0, .. }
    ));

    // Rollback is total: the cached context is exactly what it was before
    // the failing call...
    assert_eq!(engine.context(), log);

    // ...and the task this call resumed-then-resuspended is still there
    // under its original key, not lost. A follow-up call carrying only the
    // valid response proves it is still resumable.
    let mut good_log = log.clone();
    good_log.push(ContextMessage::CreateEntityResponseReceived {
        offset: 5,
        request_offset: 4,
        entity: leaf1,
    });
    let produced = engine.complete(&good_log).unwrap();
    assert_eq!(
        produced,
        vec![ContextMessage::CreateEntityRequestSent {
            offset: 6,
            trace_offset: 3,
            entity_type: LEAF_TYPE,
            args: Args::empty(),
        }]
    );
    good_log.extend(produced);

    let leaf2 = EntityHandle::new(2);
    good_log.push(ContextMessage::CreateEntityResponseReceived {
        offset: 7,
        request_offset: 6,
        entity: leaf2,
    });
    let produced = engine.complete(&good_log).unwrap();
    assert_eq!(
        produced,
        vec![
            ContextMessage::EntityMethodResponseSent {
                offset: 8,
                request_offset: 3,
                response: Value::Int(2),
            },
            ContextMessage::EntityStateChanged {
                offset: 9,
                state: Value::List(vec![Value::Entity(leaf1), Value::Entity(leaf2)]),
            },
        ]
    );
    good_log.extend(produced);

    assert_eq!(engine.subject().unwrap().leaves, vec![leaf1, leaf2]);
    assert_eq!(engine.context(), good_log);
}
