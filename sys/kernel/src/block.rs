// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The three-phase blocking-primitive protocol (mail wait, queue send/receive,
//! semaphore take all drive it) factored into one generic routine, so each
//! primitive only has to supply "try the fast path" and "how do I enqueue a
//! waiter".
//!
//! Phase 1 (fast path) and phase 3 (block) both run under the same
//! [`critical_section::with`] -- the original's `DisableISR`/`EnableISR`
//! bracket around the whole attempt. Phase 2 (retry after being woken) is the
//! same call, re-entered: `Task::retry` tells it apart from a fresh call
//! without needing the task body's own stage numbering to be any finer than
//! "one stage per suspension point".
//!
//! This crate makes one simplifying choice beyond what the fine-grained label
//! resume in the original buys for free: a blocking call retries its fast
//! path *once* after waking and resolves definitively either way, even if
//! ticks remain. Every wakeup path here fires because the exact condition
//! a task is waiting on just became true, so one retry always suffices; see
//! `DESIGN.md` for the full argument.

use critical_section::CriticalSection;

use abi::{BlockSource, RunState, Ticks, INFINITE_TICKS};

use crate::task::Task;

/// The outcome of one call into a blocking primitive.
pub enum Poll<T> {
    /// The fast path succeeded (on the first attempt, or on retry).
    Ready(T),
    /// The task must suspend and report this `RunState` back to the
    /// scheduler. Always `RunState::Blocked` or `RunState::Suspended`.
    Blocked(RunState),
    /// The fast path failed and there's no waiting left to do: either
    /// `ticks` was 0 on a fresh call, or this was the one allowed retry and
    /// it didn't pan out.
    Failed,
}

/// Drives one call through §4.3's three-phase shape.
///
/// `attempt` is phase 1: run with interrupts masked, it either completes the
/// operation and returns `Some`, or leaves everything untouched and returns
/// `None`. `enqueue` is phase 3's list-specific bookkeeping (inserting into a
/// priority-sorted waiter list, recording a unique receiver/holder slot,
/// ...), invoked only the first time this call decides to block.
pub fn poll<T>(
    task: &'static Task,
    source: BlockSource,
    ticks: Ticks,
    mut attempt: impl FnMut(CriticalSection) -> Option<T>,
    enqueue: impl FnOnce(CriticalSection),
) -> Poll<T> {
    critical_section::with(|cs| {
        let retrying = task.retry(cs) == source;

        if let Some(value) = attempt(cs) {
            if retrying {
                task.set_retry(cs, BlockSource::None);
            }
            return Poll::Ready(value);
        }

        if retrying {
            task.set_retry(cs, BlockSource::None);
            return Poll::Failed;
        }

        if ticks == 0 {
            return Poll::Failed;
        }

        enqueue(cs);
        task.begin_block(cs, source, ticks);
        task.set_retry(cs, source);

        Poll::Blocked(if ticks == INFINITE_TICKS { RunState::Suspended } else { RunState::Blocked })
    })
}
