// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The task record: everything the scheduler and synchronization objects need
//! to know about one logical task, plus the small per-task state machine
//! bookkeeping a task body uses to resume where it left off.
//!
//! A task body never gets its own machine stack. Instead it is a plain
//! function, re-entered on every dispatch, that reads `Task::step` to decide
//! which numbered stage of its own control flow to resume (see
//! [`crate::coroutine`] and the `eos_begin!`/`eos_yield!` macros in `userlib`
//! for the surface task authors actually write against). Everything that
//! must survive a suspension -- the stage number, and any by-pointer locals --
//! lives either in one of this struct's `Cell`s or in the task's own caller-
//! supplied byte buffer; nothing survives on the native call stack.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};
use static_cell::StaticCell;

use abi::{config, BlockSource, Priority, TaskName, Ticks};

use crate::list::Link;

/// A task body. Re-entered on every dispatch; decides for itself, via
/// `task.step(0)`, which numbered stage to resume at.
///
/// `locals` is the task's caller-supplied byte buffer, minus nothing -- the
/// body is responsible for reserving its own watermark room (see
/// [`crate::coroutine::Stack`]) and laying out its persistent locals at fixed
/// offsets within it.
pub type TaskFn = fn(task: &'static Task, locals: &mut [u8], arg: *mut ()) -> abi::RunState;

/// One stage cursor per nesting level: the outer task body occupies level 0,
/// and each `eos_nest_begin!` pushes another level on top of it.
const FRAMES: usize = config::MAX_NEST_DEPTH + 1;

/// A statically-allocated task.
///
/// Every field that might be touched from an ISR or from a different task's
/// blocking/waking path is behind a [`Mutex`] (this crate's stand-in for
/// `DisableISR`/`EnableISR`): reading or writing it requires a
/// [`CriticalSection`] token.
pub struct Task {
    name: TaskName,
    body: TaskFn,
    arg: *mut (),

    stack: StaticCell<&'static mut [u8]>,

    priority: Mutex<Cell<Priority>>,
    original_priority: Priority,

    unblock_tick: Mutex<Cell<Ticks>>,
    tick_overflow: Mutex<Cell<bool>>,
    ticks_to_delay: Mutex<Cell<Ticks>>,

    mail_value: Mutex<Cell<u32>>,
    mail_count: Mutex<Cell<u32>>,

    block_source: Mutex<Cell<BlockSource>>,
    retry: Mutex<Cell<BlockSource>>,

    steps: [Mutex<Cell<u32>>; FRAMES],
    depth: Mutex<Cell<usize>>,

    pub(crate) sched_link: Link,
    pub(crate) sched_parent: Mutex<Cell<Option<&'static crate::ListHead>>>,
    pub(crate) sync_link: Link,
    pub(crate) sync_parent: Mutex<Cell<Option<&'static crate::ListHead>>>,
}

// Safety: `arg` is a plain opaque pointer, never dereferenced by the kernel
// itself -- only passed back to `body`, which runs on a single CPU with no
// concurrent aliasing. Every other field is behind a `critical_section::Mutex`
// or a `StaticCell`, both of which already carry their own `Sync` proof.
unsafe impl Sync for Task {}

impl Task {
    /// Builds a task record in place. `stack_buf` is caller-supplied storage;
    /// this is the only place the kernel ever writes to it directly (the
    /// watermark fill happens lazily, the first time the body constructs a
    /// [`crate::coroutine::Stack`] over it).
    pub fn new(name: &str, body: TaskFn, arg: *mut (), priority: Priority, stack_buf: &'static mut [u8]) -> Task {
        let priority = priority.clamp_to_max();
        Task {
            name: TaskName::new(name),
            body,
            arg,
            stack: StaticCell::new(stack_buf),
            priority: Mutex::new(Cell::new(priority)),
            original_priority: priority,
            unblock_tick: Mutex::new(Cell::new(0)),
            tick_overflow: Mutex::new(Cell::new(false)),
            ticks_to_delay: Mutex::new(Cell::new(0)),
            mail_value: Mutex::new(Cell::new(0)),
            mail_count: Mutex::new(Cell::new(0)),
            block_source: Mutex::new(Cell::new(BlockSource::None)),
            retry: Mutex::new(Cell::new(BlockSource::None)),
            steps: core::array::from_fn(|_| Mutex::new(Cell::new(0))),
            depth: Mutex::new(Cell::new(0)),
            sched_link: Link::new(),
            sched_parent: Mutex::new(Cell::new(None)),
            sync_link: Link::new(),
            sync_parent: Mutex::new(Cell::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Calls the task body with exclusive access to its stack buffer.
    ///
    /// Panics (via [`StaticCell::borrow_mut`]) if called re-entrantly, which
    /// would indicate the scheduler dispatching the same task twice without
    /// an intervening return -- a contract violation the cooperative model
    /// should make impossible.
    pub fn dispatch(&'static self) -> abi::RunState {
        let mut guard = self.stack.borrow_mut();
        let buf: &mut [u8] = &mut **guard;
        (self.body)(self, buf, self.arg)
    }

    /// Checks this task's stack-overflow watermark. Called by the scheduler
    /// immediately after every dispatch.
    pub fn check_watermark(&'static self) -> bool {
        let guard = self.stack.borrow_mut();
        let buf: &[u8] = &**guard;
        crate::coroutine::Stack::watermark_intact(buf)
    }

    pub fn priority(&self, cs: CriticalSection) -> Priority {
        self.priority.borrow(cs).get()
    }

    pub fn set_priority(&self, cs: CriticalSection, p: Priority) {
        self.priority.borrow(cs).set(p);
    }

    pub fn original_priority(&self) -> Priority {
        self.original_priority
    }

    /// True while this task's effective priority has been boosted above its
    /// original by mutex priority inheritance.
    pub fn is_inherited(&self, cs: CriticalSection) -> bool {
        self.priority(cs) > self.original_priority
    }

    pub fn unblock_tick(&self, cs: CriticalSection) -> Ticks {
        self.unblock_tick.borrow(cs).get()
    }

    pub fn set_unblock_tick(&self, cs: CriticalSection, t: Ticks) {
        self.unblock_tick.borrow(cs).set(t);
    }

    pub fn tick_overflow(&self, cs: CriticalSection) -> bool {
        self.tick_overflow.borrow(cs).get()
    }

    pub fn set_tick_overflow(&self, cs: CriticalSection, v: bool) {
        self.tick_overflow.borrow(cs).set(v);
    }

    pub fn ticks_to_delay(&self, cs: CriticalSection) -> Ticks {
        self.ticks_to_delay.borrow(cs).get()
    }

    pub fn set_ticks_to_delay(&self, cs: CriticalSection, t: Ticks) {
        self.ticks_to_delay.borrow(cs).set(t);
    }

    pub fn mail_value(&self, cs: CriticalSection) -> u32 {
        self.mail_value.borrow(cs).get()
    }

    pub fn set_mail_value(&self, cs: CriticalSection, v: u32) {
        self.mail_value.borrow(cs).set(v);
    }

    pub fn mail_count(&self, cs: CriticalSection) -> u32 {
        self.mail_count.borrow(cs).get()
    }

    pub fn set_mail_count(&self, cs: CriticalSection, v: u32) {
        self.mail_count.borrow(cs).set(v);
    }

    pub fn block_source(&self, cs: CriticalSection) -> BlockSource {
        self.block_source.borrow(cs).get()
    }

    pub fn set_block_source(&self, cs: CriticalSection, s: BlockSource) {
        self.block_source.borrow(cs).set(s);
    }

    /// Records that this task is about to return `Blocked`/`Suspended` for
    /// reason `source`, waiting up to `ticks` (a finite count, or
    /// [`abi::INFINITE_TICKS`]). Does not itself touch any list -- callers
    /// that need priority-sorted waiter-list membership (queues, semaphores)
    /// insert separately before calling this.
    pub fn begin_block(&self, cs: CriticalSection, source: BlockSource, ticks: Ticks) {
        self.set_block_source(cs, source);
        self.set_ticks_to_delay(cs, ticks);
    }

    /// The fresh-vs-retry discriminator a blocking primitive's fast path
    /// reads to tell "first attempt" from "resuming after being woken, still
    /// deciding whether the wait succeeded". Unlike `block_source`, which the
    /// waking path (`Kernel::wake`, `mail_send_isr`, a queue/semaphore give,
    /// `time::tick_increment`) always clears back to `None` as part of waking
    /// the task, `retry` is cleared only by the primitive itself, once it has
    /// resolved the call (see [`crate::block::poll`]).
    pub fn retry(&self, cs: CriticalSection) -> BlockSource {
        self.retry.borrow(cs).get()
    }

    pub fn set_retry(&self, cs: CriticalSection, source: BlockSource) {
        self.retry.borrow(cs).set(source);
    }

    /// Convenience wrapper around `step`/`depth` for task bodies that don't
    /// otherwise need a `CriticalSection` token of their own.
    pub fn current_step(&self) -> u32 {
        critical_section::with(|cs| self.step(cs, self.depth(cs)))
    }

    /// The stage cursor for nesting level `depth` (0 is the outer task body).
    pub fn step(&self, cs: CriticalSection, depth: usize) -> u32 {
        self.steps[depth].borrow(cs).get()
    }

    pub fn set_step(&self, cs: CriticalSection, depth: usize, step: u32) {
        self.steps[depth].borrow(cs).set(step);
    }

    /// Advances the current nesting level's stage by one -- what
    /// `eos_yield!`/`eos_delay!` do on their way out, so that re-entry lands
    /// on the statement just after the suspension point.
    pub fn advance_step(&self, cs: CriticalSection) {
        let d = self.depth(cs);
        let s = self.step(cs, d);
        self.set_step(cs, d, s + 1);
    }

    pub fn depth(&self, cs: CriticalSection) -> usize {
        self.depth.borrow(cs).get()
    }

    /// Pushes a fresh stage-0 frame for a nested call. Fatal
    /// ([`crate::err::Fault::NestTooDeep`]) past `MAX_NEST_DEPTH`.
    pub fn nest_begin(&self, cs: CriticalSection) {
        let d = self.depth(cs);
        crate::err::assert(d + 1 < FRAMES, crate::err::Fault::NestTooDeep);
        self.depth.borrow(cs).set(d + 1);
        self.steps[d + 1].borrow(cs).set(0);
    }

    /// Pops the current nesting level once its callee has reported `Ended`.
    pub fn nest_end(&self, cs: CriticalSection) {
        let d = self.depth(cs);
        crate::err::assert(d > 0, crate::err::Fault::ListCorruption);
        self.depth.borrow(cs).set(d - 1);
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use abi::RunState;

    fn stub_body(_task: &'static Task, _locals: &mut [u8], _arg: *mut ()) -> RunState {
        RunState::Ended
    }

    /// Leaks a task with a given name for use in list/scheduler unit tests.
    /// Priority defaults to 1 (above idle) unless overridden by the caller.
    pub fn leak_task(name: &str) -> &'static Task {
        leak_task_prio(name, Priority(1))
    }

    pub fn leak_task_prio(name: &str, priority: Priority) -> &'static Task {
        let stack: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
        Box::leak(Box::new(Task::new(name, stub_body, core::ptr::null_mut(), priority, stack)))
    }
}
