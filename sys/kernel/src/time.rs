// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wrap-safe tick bookkeeping: ordering the blocked list by remaining time,
//! and waking tasks whose deadline the tick counter has reached.
//!
//! The tick counter is a free-running 32-bit count. A task blocked near the
//! top of the range (`unblock_tick` computed as `now + delay`) can have its
//! deadline wrap around to a small absolute value while `now` hasn't wrapped
//! yet; `Task::tick_overflow` records that this happened so the comparison
//! at wake time doesn't mistake "wrapped and not yet due" for "somehow
//! already overdue".

use abi::{BlockSource, Ticks};

use crate::list::{self, ListHead};
use crate::scheduler::Kernel;
use crate::task::Task;

/// True if `a`'s wakeup is strictly further off than `b`'s, accounting for
/// which of them (if either) has wrapped past the top of the tick range
/// since being computed.
fn remaining_exceeds(cs: critical_section::CriticalSection, a: &'static Task, b: &'static Task) -> bool {
    match (a.tick_overflow(cs), b.tick_overflow(cs)) {
        (false, true) => false,
        (true, false) => true,
        _ => a.unblock_tick(cs) > b.unblock_tick(cs),
    }
}

/// Inserts `task` into `blocked`, maintaining the "remaining time ascending
/// from head" invariant (testable property #3).
pub fn insert_into_blocked(cs: critical_section::CriticalSection, blocked: &'static ListHead, task: &'static Task) {
    let mut cursor = blocked.head(cs);
    while let Some(node) = cursor {
        if remaining_exceeds(cs, node, task) {
            list::insert_prev::<list::Sched>(cs, blocked, task, node);
            return;
        }
        cursor = list::next::<list::Sched>(cs, node);
    }
    list::add::<list::Sched>(cs, blocked, task);
}

/// Computes `unblock_tick` and the overflow flag for a task about to block
/// for `ticks_to_delay` ticks starting at `now`.
pub fn compute_deadline(now: Ticks, ticks_to_delay: Ticks) -> (Ticks, bool) {
    let unblock_tick = now.wrapping_add(ticks_to_delay);
    let overflowed = unblock_tick < now;
    (unblock_tick, overflowed)
}

/// `TickIncrement`: advances the tick counter by one and wakes every task
/// whose deadline has been reached, moving it to its ready list.
///
/// A woken task's `ticks_to_delay` is left at 0, which is the "I was woken by
/// timeout, not by a signal" signal the blocking-primitive retry protocol
/// (§4.3) relies on.
pub fn tick_increment(kernel: &'static Kernel) {
    critical_section::with(|cs| {
        let now = kernel.tick(cs).wrapping_add(1);
        kernel.set_tick(cs, now);

        loop {
            let Some(head) = kernel.blocked().head(cs) else {
                break;
            };

            if head.tick_overflow(cs) {
                if head.unblock_tick(cs) >= now {
                    head.set_tick_overflow(cs, false);
                    continue;
                }
                break;
            }

            if head.unblock_tick(cs) <= now {
                list::remove::<list::Sched>(cs, head);
                list::remove::<list::Sync>(cs, head);
                head.set_block_source(cs, BlockSource::None);
                head.set_ticks_to_delay(cs, 0);
                kernel.add_ready(cs, head);
            } else {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::leak_task;
    use proptest::prelude::*;

    #[test]
    fn deadline_flags_overflow_only_on_wrap() {
        assert_eq!(compute_deadline(10, 5), (15, false));
        assert_eq!(compute_deadline(Ticks::MAX - 1, 5), (3, true));
    }

    proptest! {
        #[test]
        fn blocked_list_orders_by_delay_regardless_of_wrap(
            now in any::<Ticks>(),
            delays in proptest::collection::vec(0u32..10_000, 0..12),
        ) {
            let blocked: &'static ListHead = Box::leak(Box::new(ListHead::new()));
            critical_section::with(|cs| {
                for (i, &delay) in delays.iter().enumerate() {
                    let name = Box::leak(format!("t{i}").into_boxed_str());
                    let task = leak_task(name);
                    task.set_ticks_to_delay(cs, delay);
                    let (unblock, overflowed) = compute_deadline(now, delay);
                    task.set_unblock_tick(cs, unblock);
                    task.set_tick_overflow(cs, overflowed);
                    insert_into_blocked(cs, blocked, task);
                }

                let mut observed = vec![];
                let mut cursor = blocked.head(cs);
                while let Some(task) = cursor {
                    observed.push(task.ticks_to_delay(cs));
                    cursor = list::next::<list::Sched>(cs, task);
                }

                let mut sorted = observed.clone();
                sorted.sort_unstable();
                prop_assert_eq!(observed, sorted);
                Ok(())
            })?;
        }
    }
}
