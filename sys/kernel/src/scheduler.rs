// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduler: picks the next runnable task, dispatches it, and relocates
//! it between the ready/blocked/suspended lists based on what it reported
//! back.
//!
//! [`Kernel`] is the process-wide singleton an application instantiates once,
//! `const`, as a `static`. Every field is either a fixed-size array of
//! [`ListHead`] or a [`critical_section::Mutex`]-guarded `Cell`, so the whole
//! thing is `Sync` without any unsafe beyond what `critical_section` already
//! grants.

use core::cell::Cell;
use core::mem::MaybeUninit;

use critical_section::{CriticalSection, Mutex};
use static_assertions::const_assert_eq;
use unwrap_lite::UnwrapLite;

use abi::{config, BlockSource, Priority, RunState, Ticks};

use crate::coroutine::Stack;
use crate::err::{self, Fault};
use crate::list::{self, ListHead};
use crate::task::{Task, TaskFn};
use crate::time;

const_assert_eq!(config::PRIORITY_LEVELS, 8);

/// The kernel's process-wide scheduling state: one ready list per priority
/// level, a single blocked list, a single suspended list, the tick counter,
/// and a pointer at whichever task is presently dispatched.
pub struct Kernel {
    ready: [ListHead; config::PRIORITY_LEVELS],
    blocked: ListHead,
    suspended: ListHead,
    tick: Mutex<Cell<Ticks>>,
    running: Mutex<Cell<Option<&'static Task>>>,
}

impl Kernel {
    pub const fn new() -> Kernel {
        Kernel {
            ready: [
                ListHead::new(),
                ListHead::new(),
                ListHead::new(),
                ListHead::new(),
                ListHead::new(),
                ListHead::new(),
                ListHead::new(),
                ListHead::new(),
            ],
            blocked: ListHead::new(),
            suspended: ListHead::new(),
            tick: Mutex::new(Cell::new(0)),
            running: Mutex::new(Cell::new(None)),
        }
    }

    pub fn ready(&'static self, p: Priority) -> &'static ListHead {
        &self.ready[p.0 as usize]
    }

    pub fn blocked(&'static self) -> &'static ListHead {
        &self.blocked
    }

    pub fn suspended(&'static self) -> &'static ListHead {
        &self.suspended
    }

    pub fn tick(&self, cs: CriticalSection) -> Ticks {
        self.tick.borrow(cs).get()
    }

    pub fn set_tick(&self, cs: CriticalSection, t: Ticks) {
        self.tick.borrow(cs).set(t);
    }

    pub fn running(&self, cs: CriticalSection) -> Option<&'static Task> {
        self.running.borrow(cs).get()
    }

    fn set_running(&self, cs: CriticalSection, t: Option<&'static Task>) {
        self.running.borrow(cs).set(t);
    }

    /// Whether `task` outranks whatever's presently running -- the signal
    /// every ISR-safe "give/send/mail" API returns so the caller knows it's
    /// worth yielding.
    pub fn outranks_running(&'static self, cs: CriticalSection, task: &'static Task) -> bool {
        match self.running(cs) {
            Some(running) => task.priority(cs) > running.priority(cs),
            None => true,
        }
    }

    /// Appends `task` to the tail of its own current-priority ready list.
    pub fn add_ready(&'static self, cs: CriticalSection, task: &'static Task) {
        list::add::<list::Sched>(cs, self.ready(task.priority(cs)), task);
    }

    /// Moves `task` from whichever list it's presently on (blocked,
    /// suspended, or a sync waiter list it was also linked into) onto its
    /// ready list. The caller is responsible for clearing `block_source`.
    pub fn wake(&'static self, cs: CriticalSection, task: &'static Task) {
        list::remove::<list::Sync>(cs, task);
        list::move_to_sched_list(cs, self.ready(task.priority(cs)), task);
    }

    /// Moves `task` to `new_priority`, relocating it between ready lists (and
    /// preserving the old list's FIFO-on-yield index cursor) if it's
    /// presently ready. Used by mutex give/take for priority inheritance and
    /// disinheritance.
    pub fn reprioritize(&'static self, cs: CriticalSection, task: &'static Task, new_priority: Priority) {
        let old_priority = task.priority(cs);
        if list::belongs_to::<list::Sched>(cs, self.ready(old_priority), task) {
            let old_list = self.ready(old_priority);
            if old_list.index(cs).is_some_and(|t| core::ptr::eq(t, task)) {
                old_list.set_index(cs, list::next::<list::Sched>(cs, task));
            }
            list::remove::<list::Sched>(cs, task);
            task.set_priority(cs, new_priority);
            list::add::<list::Sched>(cs, self.ready(new_priority), task);
        } else {
            task.set_priority(cs, new_priority);
        }
    }

    /// Builds a task into caller-supplied storage and adds it to its ready
    /// list. Both `task_storage` and `stack_buf` must live for the rest of
    /// the program: this is the kernel's entire answer to "dynamic
    /// allocation" -- the caller already did it, statically, at link time.
    pub fn create_static_task(
        &'static self,
        task_storage: &'static mut MaybeUninit<Task>,
        name: &str,
        body: TaskFn,
        arg: *mut (),
        priority: Priority,
        stack_buf: &'static mut [u8],
    ) -> &'static Task {
        Stack::paint_watermark(stack_buf);
        let task: &'static Task = task_storage.write(Task::new(name, body, arg, priority, stack_buf));
        critical_section::with(|cs| self.add_ready(cs, task));
        task
    }

    /// `pick_next`: the highest non-empty priority level's preserved-next
    /// cursor, or its head if no cursor is set.
    fn pick_next(&'static self, cs: CriticalSection) -> Option<&'static Task> {
        for p in (0..config::PRIORITY_LEVELS as u8).rev() {
            let list = self.ready(Priority(p));
            if !list.is_empty(cs) {
                return Some(list.index(cs).unwrap_or_else(|| list.head(cs).unwrap_lite()));
            }
        }
        None
    }

    /// One full scheduler step: pick, dispatch, inspect, relocate. Does not
    /// itself advance the tick -- callers drive that separately (an ISR in
    /// production, the test harness in `run_until_tick`).
    pub fn dispatch_once(&'static self) {
        let task = critical_section::with(|cs| {
            let task = self.pick_next(cs);
            err::assert(task.is_some(), Fault::NoRunnableTask);
            self.set_running(cs, task);
            task
        })
        .unwrap_lite();

        let run_state = task.dispatch();
        err::assert(task.check_watermark(), Fault::StackOverflow);

        self.relocate(task, run_state);
    }

    /// `Relocate`: the post-dispatch branch in §4.2.
    fn relocate(&'static self, task: &'static Task, run_state: RunState) {
        critical_section::with(|cs| {
            let list = self.ready(task.priority(cs));
            list.set_index(cs, list::next::<list::Sched>(cs, task));

            match run_state {
                RunState::Ended => {
                    list::remove::<list::Sched>(cs, task);
                }
                RunState::Yield => {}
                RunState::Blocked => {
                    if task.block_source(cs) != BlockSource::None {
                        list::remove::<list::Sched>(cs, task);
                        let (unblock, overflowed) = time::compute_deadline(self.tick(cs), task.ticks_to_delay(cs));
                        task.set_unblock_tick(cs, unblock);
                        task.set_tick_overflow(cs, overflowed);
                        time::insert_into_blocked(cs, self.blocked(), task);
                    }
                    // block_source == None: a primitive set Blocked speculatively
                    // and then changed its mind (fast path succeeded after all).
                    // Treated as Yield -- the index advance above already did
                    // the only thing that mattered.
                }
                RunState::Suspended => {
                    if task.block_source(cs) != BlockSource::None {
                        list::remove::<list::Sched>(cs, task);
                        list::add::<list::Sched>(cs, self.suspended(), task);
                    }
                }
                RunState::Running => {
                    err::assert(false, Fault::InvalidRunState);
                }
            }

            self.set_running(cs, None);
        });
    }

    /// Runs forever, advancing the tick only via an external
    /// [`crate::time::tick_increment`] call (an ISR, in production).
    pub fn run_forever(&'static self) -> ! {
        loop {
            self.dispatch_once();
        }
    }

    /// Runs the scheduler, self-pulsing the tick after every dispatch, until
    /// the tick counter reaches `bound`. Exists for host-side tests that have
    /// no timer ISR to drive `TickIncrement`.
    pub fn run_until_tick(&'static self, bound: Ticks) {
        while critical_section::with(|cs| self.tick(cs)) < bound {
            self.dispatch_once();
            time::tick_increment(self);
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::leak_task_prio;
    use abi::RunState as RS;

    fn leak_kernel() -> &'static Kernel {
        Box::leak(Box::new(Kernel::new()))
    }

    fn make_task(k: &'static Kernel, name: &str, priority: u8, body: TaskFn) -> &'static Task {
        let task = leak_task_prio(name, Priority(priority));
        critical_section::with(|cs| k.add_ready(cs, task));
        task
    }

    fn yield_forever(_task: &'static Task, _locals: &mut [u8], _arg: *mut ()) -> RS {
        RS::Yield
    }

    #[test]
    fn equal_priority_tasks_alternate_strictly() {
        let k = leak_kernel();
        let a = make_task(k, "a", 1, yield_forever);
        let b = make_task(k, "b", 1, yield_forever);

        let mut order = vec![];
        for _ in 0..6 {
            let picked = critical_section::with(|cs| k.pick_next(cs)).unwrap();
            order.push(picked.name());
            k.dispatch_once();
        }
        assert_eq!(order, ["a", "b", "a", "b", "a", "b"]);
        let _ = a;
        let _ = b;
    }

    #[test]
    fn higher_priority_always_wins_pick() {
        let k = leak_kernel();
        let _lo = make_task(k, "lo", 1, yield_forever);
        let hi = make_task(k, "hi", 3, yield_forever);

        let picked = critical_section::with(|cs| k.pick_next(cs)).unwrap();
        assert_eq!(picked.name(), hi.name());
    }

    #[test]
    fn ended_task_is_removed_from_ready() {
        fn ends_immediately(_task: &'static Task, _locals: &mut [u8], _arg: *mut ()) -> RS {
            RS::Ended
        }
        let k = leak_kernel();
        let t = make_task(k, "t", 1, ends_immediately);
        k.dispatch_once();
        critical_section::with(|cs| {
            assert!(!list::belongs_to::<list::Sched>(cs, k.ready(Priority(1)), t));
        });
    }
}
