// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A cooperative, priority-preemption-by-yield kernel for small bare-metal
//! targets that lack per-task hardware stacks.
//!
//! Tasks are not given their own machine stack. Instead each task body is a
//! plain function that suspends by returning to the scheduler, recording
//! where it left off in a caller-supplied byte buffer (its "stack"); the
//! scheduler multiplexes many such tasks onto the one native call stack it is
//! itself running on. See [`coroutine`] for how a function suspends and
//! resumes with its locals intact.
//!
//! # Design principles
//!
//! 1. Separate compilation. The kernel and every task, queue, and semaphore
//!    it manages are independently-allocated static objects wired together
//!    at startup, not a single generated image.
//! 2. Static configuration. No heap, no dynamic task creation after startup.
//!    See [`abi::config`] for the compile-time knobs.
//! 3. A strong preference for safe code where reasonable. List manipulation
//!    uses `Cell`-linked `'static` references rather than raw pointers; the
//!    `critical-section` crate stands in for `DisableISR`/`EnableISR`.
//! 4. A preference for simple and clear algorithms over fast and clever
//!    ones.

#![cfg_attr(not(test), no_std)]

pub mod block;
pub mod coroutine;
pub mod err;
pub mod list;
pub mod mail;
pub mod queue;
pub mod scheduler;
pub mod semaphore;
pub mod task;
pub mod time;

pub use abi::{self, BlockSource, Priority, QueueFlags, RunState, SemaphoreKind, Ticks, INFINITE_TICKS};
pub use block::Poll;
pub use err::Fault;
pub use list::ListHead;
pub use mail::mail_send_isr;
pub use queue::Queue;
pub use scheduler::Kernel;
pub use semaphore::Semaphore;
pub use task::Task;

#[cfg(not(any(test, feature = "nano")))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    err::die(info)
}
