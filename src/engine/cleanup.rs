//! The cleanup compactor: a three-pass mark-and-prune sweep over the cached
//! context that removes fully-resolved request trees while preserving
//! enough state for future replay.

use crate::message::{ContextMessage, Offset};
use std::collections::HashMap;

/// Run the three passes described for the cleanup compactor and split
/// `context` into (surviving, pruned), both in original order.
///
/// `context` is consumed and partitioned rather than mutated in place: the
/// three passes each need random access by offset, which a flat `Vec` only
/// gives cheaply once an `offset -> index` map has been built.
pub(crate) fn compact(context: Vec<ContextMessage>) -> (Vec<ContextMessage>, Vec<ContextMessage>) {
    let index_of: HashMap<Offset, usize> = context
        .iter()
        .enumerate()
        .map(|(i, m)| (m.offset(), i))
        .collect();

    let mut marked = vec![false; context.len()];

    // Pass 1: resolution, scanned in reverse so a terminal's initiator and a
    // request's trace root are both marked before we might need them marked
    // to mark something earlier still.
    for i in (0..context.len()).rev() {
        let msg = &context[i];
        if msg.is_terminal_sent() {
            marked[i] = true;
            if let Some(req_offset) = msg.request_offset() {
                if let Some(&j) = index_of.get(&req_offset) {
                    marked[j] = true;
                }
            }
        }
        if let Some(trace_offset) = msg.trace_offset() {
            if let Some(&root) = index_of.get(&trace_offset) {
                if marked[root] {
                    marked[i] = true;
                }
            }
        }
    }

    // Pass 2: reply absorption, forward. A received response/error whose
    // request was marked resolved is itself part of the resolved tree.
    for i in 0..context.len() {
        let msg = &context[i];
        let is_received = matches!(
            msg,
            ContextMessage::CreateEntityResponseReceived { .. }
                | ContextMessage::CreateEntityErrorReceived { .. }
                | ContextMessage::EntityMethodResponseReceived { .. }
                | ContextMessage::EntityMethodErrorReceived { .. }
                | ContextMessage::ServiceMethodResponseReceived { .. }
                | ContextMessage::ServiceMethodErrorReceived { .. }
        );
        if is_received {
            if let Some(req_offset) = msg.request_offset() {
                if let Some(&j) = index_of.get(&req_offset) {
                    if marked[j] {
                        marked[i] = true;
                    }
                }
            }
        }
    }

    // Pass 3: state collapse. Among messages that would survive (unmarked),
    // if two state snapshots are adjacent in that surviving sequence, only
    // the later one is kept.
    let mut last_surviving_snapshot: Option<usize> = None;
    for i in 0..context.len() {
        if marked[i] {
            continue;
        }
        if matches!(context[i], ContextMessage::EntityStateChanged { .. }) {
            if let Some(prev) = last_surviving_snapshot {
                marked[prev] = true;
            }
            last_surviving_snapshot = Some(i);
        } else {
            last_surviving_snapshot = None;
        }
    }

    let mut surviving = Vec::with_capacity(context.len());
    let mut pruned = Vec::with_capacity(context.len());
    for (i, msg) in context.into_iter().enumerate() {
        if marked[i] {
            pruned.push(msg);
        } else {
            surviving.push(msg);
        }
    }
    (surviving, pruned)
}
