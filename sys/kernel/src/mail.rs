// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mail: a one-slot, overwrite-on-send mailbox built directly into every
//! task -- no separate object to create. Grounded in `mailbox.c`/`.h`: a
//! sender always succeeds (there's no backpressure), and a waiting receiver
//! is woken as soon as anything arrives.
//!
//! `mail_count` is a saturating counter rather than a plain "is there mail"
//! flag so that `mail_pending` can report how many sends are outstanding,
//! matching `EOSMailPending`'s original semantics.

use abi::{BlockSource, Ticks};

use crate::block::{self, Poll};
use crate::scheduler::Kernel;
use crate::task::Task;

/// ISR-safe send: records `value`, bumps the pending count, and wakes
/// `task` if it's presently blocked on mail. Returns whether `task` now
/// outranks whatever's running -- the caller's cue to yield.
pub fn mail_send_isr(kernel: &'static Kernel, task: &'static Task, value: u32) -> bool {
    critical_section::with(|cs| {
        task.set_mail_value(cs, value);
        task.set_mail_count(cs, task.mail_count(cs).saturating_add(1));

        if task.block_source(cs) == BlockSource::Mail {
            task.set_block_source(cs, BlockSource::None);
            kernel.wake(cs, task);
        }

        kernel.outranks_running(cs, task)
    })
}

/// Clears any pending mail without reading it.
pub fn mail_clear(task: &'static Task) {
    critical_section::with(|cs| task.set_mail_count(cs, 0));
}

/// The number of sends outstanding (0 if none).
pub fn mail_pending(task: &'static Task) -> u32 {
    critical_section::with(|cs| task.mail_count(cs))
}

/// The `eos_mail_wait!` primitive: waits up to `ticks` for mail to arrive,
/// consuming one pending send on success.
pub fn mail_wait(task: &'static Task, ticks: Ticks) -> Poll<u32> {
    block::poll(
        task,
        BlockSource::Mail,
        ticks,
        |cs| {
            let count = task.mail_count(cs);
            if count == 0 {
                return None;
            }
            task.set_mail_count(cs, count - 1);
            Some(task.mail_value(cs))
        },
        |_cs| {
            // Mail has no waiter list of its own -- the task that's blocked
            // is discoverable directly via `block_source`, so there's
            // nothing further to enqueue.
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Kernel;
    use crate::task::test_support::leak_task;
    use abi::INFINITE_TICKS;

    fn leak_kernel() -> &'static Kernel {
        Box::leak(Box::new(Kernel::new()))
    }

    #[test]
    fn send_then_wait_succeeds_immediately() {
        let t = leak_task("t");
        mail_send_isr(leak_kernel(), t, 42);
        match mail_wait(t, INFINITE_TICKS) {
            Poll::Ready(v) => assert_eq!(v, 42),
            _ => panic!("expected Ready"),
        }
    }

    #[test]
    fn wait_with_nothing_pending_and_zero_ticks_fails() {
        let t = leak_task("t");
        match mail_wait(t, 0) {
            Poll::Failed => {}
            _ => panic!("expected Failed"),
        }
    }

    #[test]
    fn wait_with_nothing_pending_blocks() {
        let t = leak_task("t");
        match mail_wait(t, 5) {
            Poll::Blocked(abi::RunState::Blocked) => {}
            _ => panic!("expected Blocked"),
        }
        critical_section::with(|cs| assert_eq!(t.block_source(cs), BlockSource::Mail));
    }

    #[test]
    fn send_wakes_a_blocked_waiter_and_retry_succeeds() {
        let k = leak_kernel();
        let t = leak_task("t");
        critical_section::with(|cs| k.add_ready(cs, t));
        match mail_wait(t, 5) {
            Poll::Blocked(_) => {}
            _ => panic!("expected Blocked"),
        }
        assert!(mail_send_isr(k, t, 7));
        critical_section::with(|cs| assert_eq!(t.block_source(cs), BlockSource::None));
        match mail_wait(t, 5) {
            Poll::Ready(v) => assert_eq!(v, 7),
            _ => panic!("expected Ready on retry"),
        }
    }

    #[test]
    fn pending_and_clear_report_and_reset_the_counter() {
        let t = leak_task("t");
        assert_eq!(mail_pending(t), 0);
        mail_send_isr(leak_kernel(), t, 1);
        mail_send_isr(leak_kernel(), t, 2);
        assert_eq!(mail_pending(t), 2);
        mail_clear(t);
        assert_eq!(mail_pending(t), 0);
    }
}
