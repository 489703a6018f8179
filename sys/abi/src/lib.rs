// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared between the kernel and task code.
//!
//! Everything in this crate is `no_std` and allocation-free: the kernel and
//! its tasks only ever exchange plain data, never pointers into each other's
//! address space (there is only one address space to begin with).

#![no_std]

use serde::{Deserialize, Serialize};

pub mod config {
    //! Compile-time configuration.
    //!
    //! These are plain constants rather than Cargo features or a build
    //! script, in keeping with this kernel's static-configuration
    //! philosophy: one shape, chosen once, at compile time.

    /// Highest priority level. Priority 0 is the lowest (and is where the
    /// idle task lives); `MAX_PRIORITY` is the highest.
    pub const MAX_PRIORITY: u8 = 7;

    /// Number of distinct priority levels, i.e. `0..=MAX_PRIORITY`.
    pub const PRIORITY_LEVELS: usize = MAX_PRIORITY as usize + 1;

    /// Maximum length of a task name, including any NUL padding.
    pub const TASK_NAME_LEN: usize = 8;

    /// Byte used to pre-fill the watermark region of a stack buffer.
    pub const WATERMARK_SYMBOL: u8 = 0x5A;

    /// Number of trailing watermark bytes checked for overflow after each
    /// dispatch.
    pub const WATERMARK_ROOM: usize = 8;

    /// Maximum depth of nested (sub-)coroutine calls within one task body.
    pub const MAX_NEST_DEPTH: usize = 4;
}

/// A task's scheduling priority.
///
/// Unlike some kernels, a *larger* number here means *more* important: the
/// scheduler always favors the highest-numbered non-empty ready list, and the
/// idle task is pinned at priority 0. This matches the priority-scan order of
/// the cooperative scheduler this crate implements, and is the opposite
/// convention from kernels (including this one's ancestor) that treat 0 as
/// "most important".
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// The priority of the built-in idle task. Always ready, never anything
    /// else should run here.
    pub const IDLE: Priority = Priority(0);

    pub fn clamp_to_max(self) -> Priority {
        if self.0 > config::MAX_PRIORITY {
            Priority(config::MAX_PRIORITY)
        } else {
            self
        }
    }
}

/// Post-dispatch state of a task body, read out of the task's stack buffer
/// immediately after it returns control to the scheduler.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum RunState {
    /// Body hasn't been entered yet, or is between dispatches. Never
    /// observed by the scheduler as a post-dispatch state.
    Running,
    /// The body returned all the way out (reached its `eos_end!`/`eos_exit!`).
    /// The task is removed from scheduling permanently.
    Ended,
    /// The body hit `eos_yield!` or fell through a non-blocking primitive.
    /// Stays in its ready list.
    Yield,
    /// The body blocked with a finite timeout.
    Blocked,
    /// The body blocked with no timeout (`INFINITE_TICKS`).
    Suspended,
}

/// Tag recording which blocking primitive, if any, a task is waiting on.
///
/// A task's `block_source` is `None` if and only if it currently sits in a
/// ready list (testable property #4): any other value means it's on the
/// blocked or suspended list and is waiting for a specific kind of wakeup.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum BlockSource {
    None,
    Delay,
    Mail,
    Queue,
    Semaphore,
}

/// Kind of a semaphore object, fixing its counting discipline.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum SemaphoreKind {
    /// Max count 1, starts empty (0 free keys).
    Binary,
    /// Arbitrary max count and initial count.
    Counter,
    /// Max count 1, starts full (1 free key); adds holder tracking and
    /// priority inheritance.
    Mutex,
}

bitflags::bitflags! {
    /// Flags controlling where a `QueueSend` writes and what it does when
    /// the queue is full.
    pub struct QueueFlags: u8 {
        /// Append at the tail (the default if no flags are given).
        const WRITE_BACK = 0;
        /// Prepend at the head, for urgent items that should be received
        /// before anything already queued.
        const WRITE_FRONT = 0b01;
        /// When full, silently discard the oldest item instead of blocking
        /// or failing the send.
        const OVERWRITE = 0b10;
    }
}

impl Default for QueueFlags {
    fn default() -> Self {
        QueueFlags::WRITE_BACK
    }
}

/// A tick count used for delays and timeouts.
pub type Ticks = u32;

/// Requests suspension with no deadline; only an explicit signal wakes the
/// task back up.
pub const INFINITE_TICKS: Ticks = Ticks::MAX;

/// A fixed-capacity, NUL-padded task name.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct TaskName([u8; config::TASK_NAME_LEN]);

impl TaskName {
    pub const fn new(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut buf = [0u8; config::TASK_NAME_LEN];
        let mut i = 0;
        while i < bytes.len() && i < config::TASK_NAME_LEN {
            buf[i] = bytes[i];
            i += 1;
        }
        TaskName(buf)
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        core::str::from_utf8(&self.0[..len]).unwrap_or("?")
    }
}

impl core::fmt::Display for TaskName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
