//! A waker that does nothing.
//!
//! Tasks in this engine never suspend waiting on an external readiness
//! event; they suspend only at interception points, and resumption is
//! driven explicitly by the engine calling `poll` again after recording a
//! response. No wake-up notification is ever needed, so the waker backing
//! every poll is a pure no-op.

use std::task::{RawWaker, RawWakerVTable, Waker};

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);

fn clone(_: *const ()) -> RawWaker {
    RawWaker::new(std::ptr::null(), &VTABLE)
}

fn wake(_: *const ()) {}

fn wake_by_ref(_: *const ()) {}

fn drop(_: *const ()) {}

pub fn noop_waker() -> Waker {
    let raw = RawWaker::new(std::ptr::null(), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_waker_can_be_cloned_and_woken() {
        let waker = noop_waker();
        let cloned = waker.clone();
        cloned.wake();
        waker.wake_by_ref();
    }
}
