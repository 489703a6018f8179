// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The always-yielding task the scheduler seeds priority 0 with. Every
//! dispatch of it calls a user-supplied idle hook and immediately yields, so
//! there is always something runnable and the ready-list invariant (every
//! task's `block_source` is `None` iff it is ready) never has to special-case
//! "nothing to do".
//!
//! The original calls this the lowest-priority always-ready task and gives it
//! no body of its own beyond spinning; this crate keeps that shape but adds a
//! hook so an application can do real idle-time work (a `WFI`, a power
//! counter) without needing its own dedicated priority-0 task.

#![cfg_attr(not(test), no_std)]

use userlib::{eos_yield, RunState, Task};

/// Called once per idle-task dispatch, with interrupts unmasked.
pub type IdleHook = fn();

fn noop_hook() {}

/// Packs `hook` into the opaque `arg` pointer `Kernel::create_static_task`
/// takes. The kernel never dereferences `arg` itself -- it only ever hands it
/// back to the body it was created with, which here is always [`idle_body`].
pub fn idle_arg(hook: IdleHook) -> *mut () {
    hook as *mut ()
}

/// The idle task's `TaskFn`. Pass [`idle_arg`] of your hook (or a null
/// pointer, for a no-op hook) as the `arg` to `Kernel::create_static_task`.
pub fn idle_body(task: &'static Task, _locals: &mut [u8], arg: *mut ()) -> RunState {
    let hook: IdleHook = if arg.is_null() {
        noop_hook
    } else {
        // Safety: `arg` is always either null or a value `idle_arg` produced
        // from a real `IdleHook`, since this function is never registered as
        // a `TaskFn` with any other `arg` encoding.
        unsafe { core::mem::transmute::<*mut (), IdleHook>(arg) }
    };
    hook();
    eos_yield!(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::Priority;
    use core::sync::atomic::{AtomicU32, Ordering};
    use kernel::Kernel;

    static TICKS: AtomicU32 = AtomicU32::new(0);

    fn count_hook() {
        TICKS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn idle_body_calls_the_hook_and_always_yields() {
        let k: &'static Kernel = Box::leak(Box::new(Kernel::new()));
        let stack: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
        let task: &'static Task = Box::leak(Box::new(Task::new("idle", idle_body, idle_arg(count_hook), Priority(0), stack)));
        critical_section::with(|cs| k.add_ready(cs, task));

        for _ in 0..5 {
            k.dispatch_once();
        }

        assert_eq!(TICKS.load(Ordering::Relaxed), 5);
        critical_section::with(|cs| {
            assert!(kernel::list::belongs_to::<kernel::list::Sched>(cs, k.ready(Priority(0)), task));
        });
    }
}
