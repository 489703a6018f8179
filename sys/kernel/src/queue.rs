// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded FIFO queues of fixed-size items, with blocking send/receive.
//! Grounded in `queue.c`/`.h`.
//!
//! A queue has at most one registered receiver at a time, tracked purely in
//! its waiter list's `index` slot (never as an ordinary list member) --
//! exactly the discipline `EOSInternalQueueReceive` uses to tell "I'm the
//! task already waiting here, retrying" from "somebody else is already
//! registered, this is a usage error". Blocked *senders*, on the other hand,
//! thread through the same [`ListHead`]'s head/tail chain, priority-sorted
//! descending from the head, so a waking send always wakes the
//! highest-priority blocked sender first.

use core::cell::RefCell;
use core::mem::MaybeUninit;

use critical_section::{CriticalSection, Mutex};

use abi::{BlockSource, QueueFlags, Ticks};

use crate::block::{self, Poll};
use crate::list::{self, ListHead};
use crate::scheduler::Kernel;
use crate::task::Task;

struct Ring<T: Copy + Send> {
    buf: &'static mut [T],
    head: usize,
    tail: usize,
    count: usize,
}

/// A statically-allocated bounded queue of `T`.
pub struct Queue<T: Copy + Send> {
    ring: Mutex<RefCell<Ring<T>>>,
    waiters: ListHead,
}

impl<T: Copy + Send> Queue<T> {
    /// Builds a queue in place over caller-supplied storage, both of which
    /// must live for the rest of the program -- the same static-allocation
    /// discipline `Kernel::create_static_task` uses.
    pub fn create_static(storage: &'static mut MaybeUninit<Queue<T>>, buf: &'static mut [T]) -> &'static Queue<T> {
        storage.write(Queue {
            ring: Mutex::new(RefCell::new(Ring { buf, head: 0, tail: 0, count: 0 })),
            waiters: ListHead::new(),
        })
    }

    fn try_receive(&self, cs: CriticalSection) -> Option<T> {
        let mut ring = self.ring.borrow(cs).borrow_mut();
        if ring.count == 0 {
            return None;
        }
        let item = ring.buf[ring.tail];
        let len = ring.buf.len();
        ring.tail = (ring.tail + 1) % len;
        ring.count -= 1;
        Some(item)
    }

    fn try_send(&self, cs: CriticalSection, item: T, flags: QueueFlags) -> bool {
        let mut ring = self.ring.borrow(cs).borrow_mut();
        let cap = ring.buf.len();
        if ring.count >= cap {
            if !flags.contains(QueueFlags::OVERWRITE) {
                return false;
            }
            // Make room by discarding whichever end isn't being written to.
            if flags.contains(QueueFlags::WRITE_FRONT) {
                ring.head = (ring.head + cap - 1) % cap;
            } else {
                ring.tail = (ring.tail + 1) % cap;
            }
            ring.count -= 1;
        }
        if flags.contains(QueueFlags::WRITE_FRONT) {
            ring.tail = (ring.tail + cap - 1) % cap;
            ring.buf[ring.tail] = item;
        } else {
            ring.buf[ring.head] = item;
            ring.head = (ring.head + 1) % cap;
        }
        ring.count += 1;
        true
    }
}

/// Wakes `candidate` if it's genuinely still waiting on this queue. Returns
/// whether the woken task now outranks whatever's running.
fn wake_if_waiting_on_queue(kernel: &'static Kernel, cs: CriticalSection, candidate: &'static Task) -> bool {
    if candidate.block_source(cs) != BlockSource::Queue {
        return false;
    }
    let outranks = kernel.outranks_running(cs, candidate);
    candidate.set_block_source(cs, BlockSource::None);
    kernel.wake(cs, candidate);
    outranks
}

/// `EOSQueueReceive`: waits up to `ticks` for an item. Only one task may be
/// registered as a queue's waiting receiver at a time -- a second task
/// calling in while the first is still blocked is a usage error, and its
/// fast path simply never succeeds (it neither steals the slot nor corrupts
/// it).
pub fn queue_receive<T: Copy + Send>(kernel: &'static Kernel, queue: &'static Queue<T>, task: &'static Task, ticks: Ticks) -> Poll<T> {
    block::poll(
        task,
        BlockSource::Queue,
        ticks,
        |cs| {
            if let Some(registered) = queue.waiters.index(cs) {
                if !core::ptr::eq(registered, task) {
                    return None;
                }
            }
            let item = queue.try_receive(cs)?;
            queue.waiters.set_index(cs, None);
            if let Some(sender) = queue.waiters.head(cs) {
                let _ = wake_if_waiting_on_queue(kernel, cs, sender);
            }
            Some(item)
        },
        |cs| {
            queue.waiters.set_index(cs, Some(task));
        },
    )
}

/// `EOSQueueSend`: waits up to `ticks` for room (or, with
/// [`QueueFlags::OVERWRITE`], always succeeds immediately by discarding the
/// oldest/newest item as directed). Blocked senders queue up priority-sorted,
/// so `EOSInternalQueueSend`'s repeated re-blocking across multiple wakeups
/// is folded into this crate's single-retry simplification (see
/// [`crate::block`]).
pub fn queue_send<T: Copy + Send>(kernel: &'static Kernel, queue: &'static Queue<T>, task: &'static Task, item: T, flags: QueueFlags, ticks: Ticks) -> Poll<()> {
    block::poll(
        task,
        BlockSource::Queue,
        ticks,
        |cs| {
            if !queue.try_send(cs, item, flags) {
                return None;
            }
            if let Some(receiver) = queue.waiters.index(cs) {
                let _ = wake_if_waiting_on_queue(kernel, cs, receiver);
            }
            Some(())
        },
        |cs| {
            let mut cursor = queue.waiters.head(cs);
            while let Some(node) = cursor {
                if node.priority(cs) < task.priority(cs) {
                    list::insert_prev::<list::Sync>(cs, &queue.waiters, task, node);
                    return;
                }
                cursor = list::next::<list::Sync>(cs, node);
            }
            list::add::<list::Sync>(cs, &queue.waiters, task);
        },
    )
}

/// `EOSQueueSendISR`: ISR-safe, non-blocking send. Never registers a block --
/// if the queue is full and `OVERWRITE` isn't set, it fails immediately
/// instead of waiting. Returns `(enqueued, should_yield)`, where
/// `should_yield` mirrors [`crate::mail::mail_send_isr`]'s and
/// [`crate::semaphore::semaphore_give_isr`]'s convention: true when the send
/// woke a higher-priority receiver, so the ISR epilogue should request a
/// context switch.
pub fn queue_send_isr<T: Copy + Send>(kernel: &'static Kernel, queue: &'static Queue<T>, item: T, flags: QueueFlags) -> (bool, bool) {
    critical_section::with(|cs| {
        if !queue.try_send(cs, item, flags) {
            return (false, false);
        }
        let should_yield = match queue.waiters.index(cs) {
            Some(receiver) => wake_if_waiting_on_queue(kernel, cs, receiver),
            None => false,
        };
        (true, should_yield)
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

    fn leak_queue<T: Copy + Send + 'static>(cap: usize, fill: T) -> &'static Queue<T> {
        let storage: &'static mut MaybeUninit<Queue<T>> = Box::leak(Box::new(MaybeUninit::uninit()));
        let buf: &'static mut [T] = Box::leak(vec![fill; cap].into_boxed_slice());
        Queue::create_static(storage, buf)
    }

    #[test]
    fn send_then_receive_round_trips() {
        let q = leak_queue::<u32>(2, 0);
        let t = leak_task_prio("t", Priority(1));
        match queue_send(leak_kernel(), q, t, 5, QueueFlags::default(), 0) {
            Poll::Ready(()) => {}
            _ => panic!("expected Ready"),
        }
        match queue_receive(leak_kernel(), q, t, 0) {
            Poll::Ready(v) => assert_eq!(v, 5),
            _ => panic!("expected Ready"),
        }
    }

    #[test]
    fn full_queue_without_overwrite_blocks_the_sender() {
        let q = leak_queue::<u32>(1, 0);
        let t = leak_task_prio("t", Priority(1));
        assert!(matches!(queue_send(leak_kernel(), q, t, 1, QueueFlags::default(), 0), Poll::Ready(())));
        match queue_send(leak_kernel(), q, t, 2, QueueFlags::default(), 5) {
            Poll::Blocked(_) => {}
            _ => panic!("expected Blocked"),
        }
    }

    #[test]
    fn overwrite_never_blocks() {
        let q = leak_queue::<u32>(1, 0);
        let t = leak_task_prio("t", Priority(1));
        assert!(matches!(queue_send(leak_kernel(), q, t, 1, QueueFlags::default(), 0), Poll::Ready(())));
        match queue_send(leak_kernel(), q, t, 2, QueueFlags::OVERWRITE, 0) {
            Poll::Ready(()) => {}
            _ => panic!("expected Ready"),
        }
        match queue_receive(leak_kernel(), q, t, 0) {
            Poll::Ready(v) => assert_eq!(v, 2),
            _ => panic!("expected Ready"),
        }
    }

    #[test]
    fn write_front_is_received_before_older_items() {
        let q = leak_queue::<u32>(4, 0);
        let k = leak_kernel();
        let t = leak_task_prio("t", Priority(1));
        assert!(matches!(queue_send(k, q, t, 1, QueueFlags::default(), 0), Poll::Ready(())));
        assert!(matches!(queue_send(k, q, t, 2, QueueFlags::WRITE_FRONT, 0), Poll::Ready(())));
        match queue_receive(k, q, t, 0) {
            Poll::Ready(v) => assert_eq!(v, 2),
            _ => panic!("expected Ready"),
        }
    }

    #[test]
    fn second_receiver_while_one_is_registered_never_succeeds() {
        let q = leak_queue::<u32>(1, 0);
        let a = leak_task_prio("a", Priority(1));
        let b = leak_task_prio("b", Priority(1));
        match queue_receive(leak_kernel(), q, a, 5) {
            Poll::Blocked(_) => {}
            _ => panic!("expected Blocked"),
        }
        match queue_receive(leak_kernel(), q, b, 0) {
            Poll::Failed => {}
            _ => panic!("expected Failed, not a stolen registration"),
        }
    }

    #[test]
    fn send_isr_into_empty_queue_needs_no_yield() {
        let q = leak_queue::<u32>(2, 0);
        let (enqueued, should_yield) = queue_send_isr(leak_kernel(), q, 7, QueueFlags::default());
        assert!(enqueued);
        assert!(!should_yield);
    }

    #[test]
    fn send_isr_into_full_queue_without_overwrite_fails() {
        let q = leak_queue::<u32>(1, 0);
        let k = leak_kernel();
        assert_eq!(queue_send_isr(k, q, 1, QueueFlags::default()), (true, false));
        assert_eq!(queue_send_isr(k, q, 2, QueueFlags::default()), (false, false));
    }

    #[test]
    fn send_isr_overwrite_into_full_queue_succeeds() {
        let q = leak_queue::<u32>(1, 0);
        let k = leak_kernel();
        assert_eq!(queue_send_isr(k, q, 1, QueueFlags::default()), (true, false));
        assert_eq!(queue_send_isr(k, q, 2, QueueFlags::OVERWRITE), (true, false));
        match queue_receive(k, q, leak_task_prio("t", Priority(1)), 0) {
            Poll::Ready(v) => assert_eq!(v, 2),
            _ => panic!("expected Ready"),
        }
    }

    #[test]
    fn send_isr_wakes_waiting_receiver_and_reports_yield() {
        let q = leak_queue::<u32>(1, 0);
        let k = leak_kernel();
        let receiver = leak_task_prio("receiver", Priority(5));
        match queue_receive(k, q, receiver, 10) {
            Poll::Blocked(_) => {}
            _ => panic!("expected Blocked"),
        }
        let (enqueued, should_yield) = queue_send_isr(k, q, 9, QueueFlags::default());
        assert!(enqueued);
        assert!(should_yield);
    }
}
