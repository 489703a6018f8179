// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary, counting, and mutex semaphores, with priority inheritance on the
//! mutex kind. Grounded in `semaphore.c`/`.h`.
//!
//! The original tracks "is this mutex currently inherited" with a sentinel
//! (`original_priority == 0`) stored on the semaphore itself, because its
//! task struct has no field of its own for a task's un-boosted priority.
//! This crate's [`Task`] already carries `original_priority` permanently, set
//! once at creation (`Task::is_inherited`), so a mutex semaphore doesn't need
//! an equivalent sentinel: its `waiters.index` slot names the current
//! holder, and that's enough to look up and restore its priority directly.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

use abi::{BlockSource, SemaphoreKind, Ticks};

use crate::block::{self, Poll};
use crate::list::{self, ListHead};
use crate::scheduler::Kernel;
use crate::task::Task;

/// A statically-allocated semaphore. Needs no caller-supplied buffer (unlike
/// [`crate::queue::Queue`]), so it can be built as a `const` directly.
pub struct Semaphore {
    free_keys: Mutex<Cell<u32>>,
    max_keys: u32,
    kind: SemaphoreKind,
    /// Priority-sorted waiter list. For a mutex, `index` additionally names
    /// the current holder (distinct from ordinary list membership, just as
    /// a queue's `index` names its registered receiver).
    waiters: ListHead,
}

impl Semaphore {
    const fn new_raw(initial: u32, max: u32, kind: SemaphoreKind) -> Semaphore {
        Semaphore {
            free_keys: Mutex::new(Cell::new(initial)),
            max_keys: max,
            kind,
            waiters: ListHead::new(),
        }
    }

    pub const fn new_binary() -> Semaphore {
        Self::new_raw(0, 1, SemaphoreKind::Binary)
    }

    pub const fn new_counter(initial: u32, max: u32) -> Semaphore {
        Self::new_raw(initial, max, SemaphoreKind::Counter)
    }

    pub const fn new_mutex() -> Semaphore {
        Self::new_raw(1, 1, SemaphoreKind::Mutex)
    }

    fn free_keys(&self, cs: CriticalSection) -> u32 {
        self.free_keys.borrow(cs).get()
    }

    fn set_free_keys(&self, cs: CriticalSection, v: u32) {
        self.free_keys.borrow(cs).set(v);
    }

    /// For a mutex, the task presently holding it, if any.
    pub fn holder(&self, cs: CriticalSection) -> Option<&'static Task> {
        if self.kind == SemaphoreKind::Mutex {
            self.waiters.index(cs)
        } else {
            None
        }
    }
}

/// Boosts `holder`'s priority to `waiter`'s if `waiter` outranks it --
/// `EOSAddTaskToSemaphore`'s inheritance step.
fn inherit(kernel: &'static Kernel, cs: CriticalSection, sem: &'static Semaphore, waiter: &'static Task) {
    if sem.kind != SemaphoreKind::Mutex {
        return;
    }
    let Some(holder) = sem.waiters.index(cs) else {
        return;
    };
    if core::ptr::eq(holder, waiter) {
        return;
    }
    if holder.priority(cs) < waiter.priority(cs) {
        kernel.reprioritize(cs, holder, waiter.priority(cs));
    }
}

/// Restores `holder`'s original priority if a prior `take` boosted it --
/// `EOSSemaphoreGiveISR`'s disinheritance step, run before the key changes
/// hands.
fn disinherit(kernel: &'static Kernel, cs: CriticalSection, holder: &'static Task) {
    if holder.is_inherited(cs) {
        kernel.reprioritize(cs, holder, holder.original_priority());
    }
}

/// `EOSSemaphoreTake`: waits up to `ticks` for a key. Taking a mutex you
/// already hold succeeds immediately and is a no-op (no recursion count is
/// kept -- see `DESIGN.md`'s note on the recursive-take simplification).
pub fn semaphore_take(kernel: &'static Kernel, sem: &'static Semaphore, task: &'static Task, ticks: Ticks) -> Poll<()> {
    block::poll(
        task,
        BlockSource::Semaphore,
        ticks,
        |cs| {
            if let Some(holder) = sem.holder(cs) {
                if core::ptr::eq(holder, task) {
                    return Some(());
                }
            }
            let keys = sem.free_keys(cs);
            if keys == 0 {
                return None;
            }
            sem.set_free_keys(cs, keys - 1);
            if sem.kind == SemaphoreKind::Mutex {
                sem.waiters.set_index(cs, Some(task));
            }
            Some(())
        },
        |cs| {
            let mut cursor = sem.waiters.head(cs);
            while let Some(node) = cursor {
                if node.priority(cs) < task.priority(cs) {
                    list::insert_prev::<list::Sync>(cs, &sem.waiters, task, node);
                    inherit(kernel, cs, sem, task);
                    return;
                }
                cursor = list::next::<list::Sync>(cs, node);
            }
            list::add::<list::Sync>(cs, &sem.waiters, task);
            inherit(kernel, cs, sem, task);
        },
    )
}

/// `EOSSemaphoreGiveISR`: hands the key directly to the highest-priority
/// waiter if one exists, otherwise returns it to the free pool (up to
/// `max_keys`). Returns whether the woken waiter now outranks whatever's
/// running.
pub fn semaphore_give_isr(kernel: &'static Kernel, sem: &'static Semaphore) -> bool {
    critical_section::with(|cs| {
        if let Some(holder) = sem.holder(cs) {
            disinherit(kernel, cs, holder);
        }

        loop {
            let Some(candidate) = sem.waiters.head(cs) else {
                let keys = sem.free_keys(cs);
                if keys < sem.max_keys {
                    sem.set_free_keys(cs, keys + 1);
                }
                if sem.kind == SemaphoreKind::Mutex {
                    sem.waiters.set_index(cs, None);
                }
                return false;
            };

            list::remove::<list::Sync>(cs, candidate);
            if candidate.block_source(cs) != BlockSource::Semaphore {
                // Stale waiter left over from a timed-out wait; keep popping.
                continue;
            }

            if sem.kind == SemaphoreKind::Mutex {
                sem.waiters.set_index(cs, Some(candidate));
            }
            let outranks = kernel.outranks_running(cs, candidate);
            candidate.set_block_source(cs, BlockSource::None);
            kernel.wake(cs, candidate);
            return outranks;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::leak_task_prio;
    use abi::Priority;

    fn leak_kernel() -> &'static Kernel {
        Box::leak(Box::new(Kernel::new()))
    }

    fn leak_sem(s: Semaphore) -> &'static Semaphore {
        Box::leak(Box::new(s))
    }

    #[test]
    fn binary_semaphore_take_then_give() {
        let sem = leak_sem(Semaphore::new_binary());
        let t = leak_task_prio("t", Priority(1));
        assert!(matches!(semaphore_take(leak_kernel(), sem, t, 0), Poll::Failed));
        assert!(!semaphore_give_isr(leak_kernel(), sem));
        assert!(matches!(semaphore_take(leak_kernel(), sem, t, 0), Poll::Ready(())));
    }

    #[test]
    fn mutex_recursive_take_by_holder_is_a_no_op() {
        let sem = leak_sem(Semaphore::new_mutex());
        let k = leak_kernel();
        let t = leak_task_prio("t", Priority(1));
        assert!(matches!(semaphore_take(k, sem, t, 0), Poll::Ready(())));
        assert!(matches!(semaphore_take(k, sem, t, 0), Poll::Ready(())));
        critical_section::with(|cs| assert!(sem.holder(cs).is_some()));
    }

    #[test]
    fn mutex_boosts_holder_priority_to_waiters_and_restores_on_give() {
        let sem = leak_sem(Semaphore::new_mutex());
        let k = leak_kernel();
        let low = leak_task_prio("low", Priority(1));
        let high = leak_task_prio("high", Priority(5));

        assert!(matches!(semaphore_take(k, sem, low, 0), Poll::Ready(())));
        critical_section::with(|cs| assert_eq!(low.priority(cs), Priority(1)));

        match semaphore_take(k, sem, high, 10) {
            Poll::Blocked(_) => {}
            _ => panic!("expected Blocked"),
        }
        critical_section::with(|cs| {
            assert_eq!(low.priority(cs), Priority(5));
            assert!(low.is_inherited(cs));
        });

        assert!(semaphore_give_isr(k, sem));
        critical_section::with(|cs| {
            assert_eq!(low.priority(cs), Priority(1));
            assert!(!low.is_inherited(cs));
        });

        match semaphore_take(k, sem, high, 0) {
            Poll::Ready(()) => {}
            _ => panic!("expected Ready on retry"),
        }
        critical_section::with(|cs| assert!(core::ptr::eq(sem.holder(cs).unwrap(), high)));
    }

    #[test]
    fn counting_semaphore_never_exceeds_its_max() {
        let sem = leak_sem(Semaphore::new_counter(1, 1));
        let k = leak_kernel();
        assert!(!semaphore_give_isr(k, sem));
        critical_section::with(|cs| assert_eq!(sem.free_keys(cs), 1));
    }
}
