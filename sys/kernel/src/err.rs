// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fatal-assertion support and the kernel's contract-violation type.
//!
//! The kernel distinguishes two kinds of bad outcome. A blocked take, a full
//! queue, a mail wait that times out -- these are ordinary, expected, and
//! surface as `false`/`None` from the primitive that hit them. A task not
//! being in the list it should be in, a negative watermark, a resume point
//! that doesn't exist -- these are contract violations: the kernel's own
//! invariants have been broken, almost certainly by a bug rather than by
//! anything an application did, and there's no reasonable way to keep
//! running. Those are reported through [`Fault`] and [`assert`].

#[cfg(not(test))]
use core::fmt::{Display, Write};
#[cfg(not(test))]
use core::sync::atomic::Ordering;

/// A contract violation detected by the kernel at runtime.
///
/// A build that wants `Assert` compiled out entirely in release could still
/// do so; here these are always checked, and always fatal.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Fault {
    /// `pick_next` found every ready list empty. Can't happen if the idle
    /// task was installed correctly -- priority 0 is never removed from
    /// ready.
    NoRunnableTask,
    /// A task's post-dispatch state did not match any of
    /// `Running`/`Ended`/`Yield`/`Blocked`/`Suspended`.
    InvalidRunState,
    /// The stack-overflow watermark was found disturbed after a dispatch.
    StackOverflow,
    /// A nested coroutine call stack exceeded `abi::config::MAX_NEST_DEPTH`.
    NestTooDeep,
    /// A list operation found a task whose `parent` pointer didn't match the
    /// list it was supposedly a member of.
    ListCorruption,
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Fault::NoRunnableTask => "no runnable task (idle task missing?)",
            Fault::InvalidRunState => "task returned an invalid run state",
            Fault::StackOverflow => "stack watermark overrun",
            Fault::NestTooDeep => "nested coroutine call exceeded MAX_NEST_DEPTH",
            Fault::ListCorruption => "task parent_list does not match containing list",
        };
        f.write_str(msg)
    }
}

/// The kernel's `Assert(cond)` hook: on failure, call [`die`] with the
/// triggering fault.
#[inline]
pub fn assert(cond: bool, fault: Fault) {
    if !cond {
        die(fault);
    }
}

/// Flag that gets set to `true` by [`die`], giving tooling (or, in tests, the
/// test itself) a one-stop shop for confirming that the kernel gave up.
#[cfg(not(test))]
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

#[cfg(not(test))]
const EPITAPH_LEN: usize = 128;

/// Records up to `EPITAPH_LEN` bytes describing the fault that killed the
/// kernel, padded with NULs.
#[cfg(not(test))]
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

#[cfg(not(test))]
fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: only ever called from `die`, and only meaningfully once --
    // concurrent calls degrade to the halt loop below rather than racing on
    // the buffer.
    let previous_fail = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if previous_fail {
        loop {
            core::sync::atomic::fence(Ordering::SeqCst);
        }
    }

    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

/// Halts the kernel for good, having recorded `msg` for a debugger to find.
#[cfg(not(test))]
#[inline(never)]
pub fn die(msg: impl Display) -> ! {
    let buf = begin_epitaph();
    let mut writer = Eulogist { dest: buf };
    write!(writer, "{msg}").ok();

    loop {
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

/// Host-test stand-in for [`die`]: panicking is the right "halt" primitive
/// when the kernel is itself running as a test harness.
#[cfg(test)]
pub fn die(msg: impl core::fmt::Display) -> ! {
    panic!("kernel fault: {msg}")
}

#[cfg(not(test))]
struct Eulogist {
    dest: &'static mut [u8],
}

#[cfg(not(test))]
impl Write for Eulogist {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}
