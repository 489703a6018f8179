// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The surface a task body is actually written against: a set of macros that
//! expand the three-phase blocking protocol and the numbered-stage resume
//! convention (see `eos-kernel`'s `coroutine` and `task` modules) into
//! something close to the original's goto-based `EOS_MAIL_WAIT`/
//! `EOS_QUEUE_SEND`/`EOS_SEMAPHORE_TAKE` macros, minus the goto.
//!
//! A task body written against this crate looks like:
//!
//! ```ignore
//! fn my_task(task: &'static Task, locals: &mut [u8], _arg: *mut ()) -> RunState {
//!     let mut stack = Stack::new(locals);
//!     match task.current_step() {
//!         0 => {
//!             eos_local_set!(stack, 0, 0u32);
//!             eos_yield!(task);
//!         }
//!         1 => {
//!             let mut value = 0u32;
//!             if eos_mail_wait!(task, &mut value, abi::INFINITE_TICKS) {
//!                 eos_local_set!(stack, 0, value);
//!             }
//!             eos_yield!(task);
//!         }
//!         _ => RunState::Ended,
//!     }
//! }
//! ```
//!
//! Each arm is re-run from the top on every dispatch that lands on it; the
//! blocking macros are safe to re-run because they read `Task::retry`
//! (`kernel::block::poll`) to tell a fresh call from a retry, not anything
//! about *where* in the arm they're textually written.

#![cfg_attr(not(test), no_std)]

pub use abi;
pub use critical_section;
pub use kernel;

pub use kernel::coroutine::Stack;
pub use kernel::{abi::RunState, Kernel, Queue, Semaphore, Task};

/// Reads a persistent local at `offset` out of a task's stack buffer.
#[macro_export]
macro_rules! eos_local_copy {
    ($stack:expr, $offset:expr, $ty:ty) => {
        $crate::kernel::coroutine::Stack::local_copy::<$ty>(&mut $stack, $offset)
    };
}

/// Writes a persistent local at `offset` into a task's stack buffer.
#[macro_export]
macro_rules! eos_local_set {
    ($stack:expr, $offset:expr, $value:expr) => {
        $crate::kernel::coroutine::Stack::set_local_copy(&mut $stack, $offset, $value)
    };
}

/// Borrows a persistent by-pointer local at `offset`.
#[macro_export]
macro_rules! eos_local_mut {
    ($stack:expr, $offset:expr, $ty:ty) => {
        $crate::kernel::coroutine::Stack::local_mut::<$ty>(&mut $stack, $offset)
    };
}

/// Ends this task's body for good. `EOS_TASK_END`'s equivalent -- note that
/// unlike the original, an ended task is simply removed from scheduling;
/// there's no restart.
#[macro_export]
macro_rules! eos_exit {
    () => {
        return $crate::RunState::Ended
    };
}

/// Yields the rest of this tick back to the scheduler, resuming at the next
/// numbered stage on the next dispatch.
#[macro_export]
macro_rules! eos_yield {
    ($task:expr) => {
        return $crate::critical_section::with(|cs| {
            $task.advance_step(cs);
            $crate::RunState::Yield
        })
    };
}

/// Suspends this task for up to `ticks` ticks (or indefinitely, with
/// [`abi::INFINITE_TICKS`]), resuming at the next numbered stage once the
/// delay elapses.
#[macro_export]
macro_rules! eos_delay {
    ($task:expr, $ticks:expr) => {
        return $crate::critical_section::with(|cs| {
            let ticks = $ticks;
            $task.advance_step(cs);
            $task.begin_block(cs, $crate::abi::BlockSource::Delay, ticks);
            if ticks == $crate::abi::INFINITE_TICKS {
                $crate::RunState::Suspended
            } else {
                $crate::RunState::Blocked
            }
        })
    };
}

/// Pushes a fresh nested-call frame (`EOS_NEST_BEGIN`'s equivalent).
#[macro_export]
macro_rules! eos_nest_begin {
    ($task:expr) => {
        $crate::critical_section::with(|cs| $task.nest_begin(cs))
    };
}

/// Calls a nested task-shaped function, propagating any non-`Ended` state it
/// reports back up to this task's own caller (the scheduler), and popping the
/// nesting frame once it finally reports `Ended`.
#[macro_export]
macro_rules! eos_nest_call {
    ($task:expr, $locals:expr, $arg:expr, $callee:expr) => {{
        let __state = $callee($task, $locals, $arg);
        if !matches!(__state, $crate::RunState::Ended) {
            return __state;
        }
        $crate::critical_section::with(|cs| $task.nest_end(cs));
    }};
}

/// Waits up to `ticks` for mail, writing the received value through `$out`
/// and returning whether one arrived. `EOS_MAIL_WAIT`'s equivalent.
#[macro_export]
macro_rules! eos_mail_wait {
    ($task:expr, $out:expr, $ticks:expr) => {
        match $crate::kernel::mail::mail_wait($task, $ticks) {
            $crate::kernel::Poll::Ready(value) => {
                *$out = value;
                true
            }
            $crate::kernel::Poll::Failed => false,
            $crate::kernel::Poll::Blocked(state) => return state,
        }
    };
}

/// ISR-safe mail send. `EOS_MAIL_SEND`'s equivalent: yields if the send just
/// woke a task that now outranks whatever's running.
#[macro_export]
macro_rules! eos_mail_send {
    ($kernel:expr, $task:expr, $target:expr, $value:expr) => {
        if $crate::kernel::mail::mail_send_isr($kernel, $target, $value) {
            $crate::eos_yield!($task)
        }
    };
}

/// Clears any mail pending for `$target` without reading it.
#[macro_export]
macro_rules! eos_mail_clear {
    ($target:expr) => {
        $crate::kernel::mail::mail_clear($target)
    };
}

/// The number of sends outstanding for `$target`.
#[macro_export]
macro_rules! eos_mail_pending {
    ($target:expr) => {
        $crate::kernel::mail::mail_pending($target)
    };
}

/// Waits up to `ticks` for an item, writing it through `$out` and returning
/// whether one arrived. `EOS_QUEUE_RECEIVE`'s equivalent.
#[macro_export]
macro_rules! eos_queue_receive {
    ($kernel:expr, $queue:expr, $task:expr, $out:expr, $ticks:expr) => {
        match $crate::kernel::queue::queue_receive($kernel, $queue, $task, $ticks) {
            $crate::kernel::Poll::Ready(value) => {
                *$out = value;
                true
            }
            $crate::kernel::Poll::Failed => false,
            $crate::kernel::Poll::Blocked(state) => return state,
        }
    };
}

/// Waits up to `ticks` for room to send `$item` with `$flags`, returning
/// whether it was enqueued. `EOS_QUEUE_SEND`'s equivalent.
#[macro_export]
macro_rules! eos_queue_send {
    ($kernel:expr, $queue:expr, $task:expr, $item:expr, $flags:expr, $ticks:expr) => {
        match $crate::kernel::queue::queue_send($kernel, $queue, $task, $item, $flags, $ticks) {
            $crate::kernel::Poll::Ready(()) => true,
            $crate::kernel::Poll::Failed => false,
            $crate::kernel::Poll::Blocked(state) => return state,
        }
    };
}

/// ISR-safe, non-blocking send. `EOSQueueSendISR`'s equivalent: yields if the
/// send just woke a task that now outranks whatever's running. Expands to the
/// `(enqueued, should_yield)` pair's first element -- use this to learn
/// whether the item was actually enqueued, same as `eos_queue_send!`'s bool.
#[macro_export]
macro_rules! eos_queue_send_isr {
    ($kernel:expr, $queue:expr, $task:expr, $item:expr, $flags:expr) => {{
        let (enqueued, should_yield) = $crate::kernel::queue::queue_send_isr($kernel, $queue, $item, $flags);
        if should_yield {
            $crate::eos_yield!($task)
        }
        enqueued
    }};
}

/// Waits up to `ticks` for a key (or, for a mutex already held by `$task`,
/// returns immediately). `EOS_SEMAPHORE_TAKE`'s equivalent.
#[macro_export]
macro_rules! eos_semaphore_take {
    ($kernel:expr, $sem:expr, $task:expr, $ticks:expr) => {
        match $crate::kernel::semaphore::semaphore_take($kernel, $sem, $task, $ticks) {
            $crate::kernel::Poll::Ready(()) => true,
            $crate::kernel::Poll::Failed => false,
            $crate::kernel::Poll::Blocked(state) => return state,
        }
    };
}

/// ISR-safe key return. `EOS_SEMAPHORE_GIVE`'s equivalent: yields if it just
/// woke a task that now outranks whatever's running.
#[macro_export]
macro_rules! eos_semaphore_give {
    ($kernel:expr, $sem:expr, $task:expr) => {
        if $crate::kernel::semaphore::semaphore_give_isr($kernel, $sem) {
            $crate::eos_yield!($task)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::{Priority, RunState as RS};

    fn leak_kernel() -> &'static Kernel {
        Box::leak(Box::new(Kernel::new()))
    }

    fn leak_task(name: &str) -> &'static Task {
        let stack: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
        Box::leak(Box::new(Task::new(name, counting_body, core::ptr::null_mut(), Priority(1), stack)))
    }

    fn counting_body(task: &'static Task, locals: &mut [u8], _arg: *mut ()) -> RS {
        let mut stack = Stack::new(locals);
        match task.current_step() {
            0 => {
                eos_local_set!(stack, 0, 0u32);
                eos_yield!(task);
            }
            1 => {
                let n: u32 = eos_local_copy!(stack, 0, u32);
                eos_local_set!(stack, 0, n + 1);
                if n + 1 >= 3 {
                    eos_exit!();
                }
                critical_section::with(|cs| task.set_step(cs, task.depth(cs), 0));
                eos_yield!(task);
            }
            _ => RunState::Ended,
        }
    }

    #[test]
    fn a_task_body_written_against_these_macros_runs_to_completion() {
        let k = leak_kernel();
        let t = leak_task("counter");
        critical_section::with(|cs| k.add_ready(cs, t));
        for _ in 0..16 {
            let still_ready = critical_section::with(|cs| kernel::list::belongs_to::<kernel::list::Sched>(cs, k.ready(Priority(1)), t));
            if !still_ready {
                break;
            }
            k.dispatch_once();
        }
        critical_section::with(|cs| {
            assert!(!kernel::list::belongs_to::<kernel::list::Sched>(cs, k.ready(Priority(1)), t));
        });
    }
}
