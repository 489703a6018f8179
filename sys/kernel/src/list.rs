// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Intrusive doubly-linked lists of tasks.
//!
//! Every task owns two link nodes -- one for the scheduler (which of
//! ready[p]/blocked/suspended it's in) and one for synchronization (which
//! queue's or semaphore's waiter list, if any, it's in). Nodes are never
//! owned by the list: the task owns the node, the list just threads it.
//!
//! Tasks live for the program's whole lifetime (created once, statically,
//! never freed), so every link is a plain `Option<&'static Task>` -- no
//! unsafe pointer arithmetic needed for intrusive, O(1), allocation-free
//! lists. The shared mutable state that makes this interesting is gated by
//! [`critical_section`]'s `Mutex`, which is `Sync` precisely because every
//! access requires proof (a [`CriticalSection`] token) that interrupts are
//! masked -- this is this crate's stand-in for `DisableISR`/`EnableISR`.
//!
//! Each node also carries a `parent` cell pointing back at the [`ListHead`]
//! that currently contains it. This is what lets code that didn't insert a
//! task (e.g. the tick handler waking a timed-out sender) remove it from
//! whichever list -- blocked, suspended, or a sync waiter list -- it
//! currently happens to be on, without being told which one that is.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

use crate::task::Task;

type Link1 = Mutex<Cell<Option<&'static Task>>>;

/// One link: the neighbors of a task within whatever list currently contains
/// it.
pub struct Link {
    pub(crate) prev: Link1,
    pub(crate) next: Link1,
}

impl Link {
    pub const fn new() -> Self {
        Link {
            prev: Mutex::new(Cell::new(None)),
            next: Mutex::new(Cell::new(None)),
        }
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

/// A list of tasks: head, tail, and a scratch `index` cursor.
///
/// `index` means different things to different lists: for a ready list it's
/// the "preserved next" cursor that keeps FIFO-on-yield correct across
/// preemption (see `scheduler`); for a queue or semaphore's waiter list it
/// names the unique current receiver or holder.
pub struct ListHead {
    head: Link1,
    tail: Link1,
    index: Link1,
}

impl ListHead {
    pub const fn new() -> Self {
        ListHead {
            head: Mutex::new(Cell::new(None)),
            tail: Mutex::new(Cell::new(None)),
            index: Mutex::new(Cell::new(None)),
        }
    }

    pub fn head(&self, cs: CriticalSection) -> Option<&'static Task> {
        self.head.borrow(cs).get()
    }

    pub fn tail(&self, cs: CriticalSection) -> Option<&'static Task> {
        self.tail.borrow(cs).get()
    }

    pub fn is_empty(&self, cs: CriticalSection) -> bool {
        self.head(cs).is_none()
    }

    pub fn index(&self, cs: CriticalSection) -> Option<&'static Task> {
        self.index.borrow(cs).get()
    }

    pub fn set_index(&self, cs: CriticalSection, task: Option<&'static Task>) {
        self.index.borrow(cs).set(task);
    }
}

impl Default for ListHead {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects which of a task's two link sets (scheduler or sync) a generic list
/// operation acts on.
///
/// This plays the role the original C macros filled with a link-field-name
/// macro parameter (`EOS_ADD_TO_LIST(list, item, scheduler)` vs. `..., sync)`);
/// here it's a zero-sized marker type instead of text substitution.
pub trait LinkSet {
    fn link(task: &'static Task) -> &Link;
    fn parent(task: &'static Task) -> &Mutex<Cell<Option<&'static ListHead>>>;
}

/// The scheduler link: threads a task through exactly one of
/// `ready[p]`/`blocked`/`suspended`.
pub struct Sched;

impl LinkSet for Sched {
    fn link(task: &'static Task) -> &Link {
        &task.sched_link
    }

    fn parent(task: &'static Task) -> &Mutex<Cell<Option<&'static ListHead>>> {
        &task.sched_parent
    }
}

/// The sync link: threads a task through at most one queue's or semaphore's
/// waiter list.
pub struct Sync;

impl LinkSet for Sync {
    fn link(task: &'static Task) -> &Link {
        &task.sync_link
    }

    fn parent(task: &'static Task) -> &Mutex<Cell<Option<&'static ListHead>>> {
        &task.sync_parent
    }
}

/// Appends `task` to the tail of `list`, under `L`'s link set.
///
/// Does not touch `index`.
pub fn add<L: LinkSet>(cs: CriticalSection, list: &'static ListHead, task: &'static Task) {
    let link = L::link(task);
    link.prev.borrow(cs).set(list.tail(cs));
    link.next.borrow(cs).set(None);

    match list.tail(cs) {
        Some(old_tail) => L::link(old_tail).next.borrow(cs).set(Some(task)),
        None => list.head.borrow(cs).set(Some(task)),
    }
    list.tail.borrow(cs).set(Some(task));
    L::parent(task).borrow(cs).set(Some(list));
}

/// Inserts `task` immediately before `before` (which must currently be a
/// member of `list`).
pub fn insert_prev<L: LinkSet>(
    cs: CriticalSection,
    list: &'static ListHead,
    task: &'static Task,
    before: &'static Task,
) {
    let before_link = L::link(before);
    let prior = before_link.prev.borrow(cs).get();

    let link = L::link(task);
    link.prev.borrow(cs).set(prior);
    link.next.borrow(cs).set(Some(before));
    before_link.prev.borrow(cs).set(Some(task));

    match prior {
        Some(p) => L::link(p).next.borrow(cs).set(Some(task)),
        None => list.head.borrow(cs).set(Some(task)),
    }
    L::parent(task).borrow(cs).set(Some(list));
}

/// Removes `task` from whichever list its own `parent` cell (under `L`)
/// currently names. A no-op if the task isn't presently linked.
///
/// Leaves `list.index` untouched even if it pointed at `task` -- callers that
/// care (the scheduler's relocate step, mutex give/take) manage `index`
/// themselves, since its meaning is list-specific.
pub fn remove<L: LinkSet>(cs: CriticalSection, task: &'static Task) {
    let Some(list) = L::parent(task).borrow(cs).get() else {
        return;
    };
    let link = L::link(task);
    let prev = link.prev.borrow(cs).get();
    let next = link.next.borrow(cs).get();

    match prev {
        Some(p) => L::link(p).next.borrow(cs).set(next),
        None => list.head.borrow(cs).set(next),
    }
    match next {
        Some(n) => L::link(n).prev.borrow(cs).set(prev),
        None => list.tail.borrow(cs).set(prev),
    }

    link.prev.borrow(cs).set(None);
    link.next.borrow(cs).set(None);
    L::parent(task).borrow(cs).set(None);
}

/// True if `task` is presently a member of `list` under link set `L`.
pub fn belongs_to<L: LinkSet>(cs: CriticalSection, list: &'static ListHead, task: &'static Task) -> bool {
    L::parent(task)
        .borrow(cs)
        .get()
        .is_some_and(|owner| core::ptr::eq(owner, list))
}

/// The task linked after `task` within whatever list (under `L`) presently
/// contains it, if any.
pub fn next<L: LinkSet>(cs: CriticalSection, task: &'static Task) -> Option<&'static Task> {
    L::link(task).next.borrow(cs).get()
}

/// Moves `task` from whichever list it is on (if any) into `dest`, under the
/// scheduler link set.
///
/// This is the operation an ISR-safe "wake me up" path needs: it doesn't
/// know, and shouldn't need to know, whether `task` is presently in
/// `blocked` or `suspended`.
pub fn move_to_sched_list(cs: CriticalSection, dest: &'static ListHead, task: &'static Task) {
    remove::<Sched>(cs, task);
    add::<Sched>(cs, dest, task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::leak_task;

    #[test]
    fn add_and_remove_preserve_fifo_order() {
        critical_section::with(|cs| {
            let list: &'static ListHead = Box::leak(Box::new(ListHead::new()));
            let a = leak_task("a");
            let b = leak_task("b");
            let c = leak_task("c");

            add::<Sched>(cs, list, a);
            add::<Sched>(cs, list, b);
            add::<Sched>(cs, list, c);

            assert_eq!(list.head(cs).map(|t| t.name()), Some("a"));
            assert_eq!(list.tail(cs).map(|t| t.name()), Some("c"));
            assert_eq!(next::<Sched>(cs, a).map(|t| t.name()), Some("b"));

            remove::<Sched>(cs, b);
            assert_eq!(next::<Sched>(cs, a).map(|t| t.name()), Some("c"));
            assert!(!belongs_to::<Sched>(cs, list, b));
            assert!(belongs_to::<Sched>(cs, list, a));
        });
    }

    #[test]
    fn insert_prev_splices_into_the_middle() {
        critical_section::with(|cs| {
            let list: &'static ListHead = Box::leak(Box::new(ListHead::new()));
            let a = leak_task("a");
            let b = leak_task("b");
            let mid = leak_task("mid");

            add::<Sched>(cs, list, a);
            add::<Sched>(cs, list, b);
            insert_prev::<Sched>(cs, list, mid, b);

            assert_eq!(next::<Sched>(cs, a).map(|t| t.name()), Some("mid"));
            assert_eq!(next::<Sched>(cs, mid).map(|t| t.name()), Some("b"));
        });
    }
}
