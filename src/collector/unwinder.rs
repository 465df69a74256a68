// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack unwinding, two strategies.
//!
//! Off the signal path (assertions, panics, live call-stack printing) the
//! DWARF/CFI unwinder behind the `backtrace` crate walks the current stack.
//! From a signal handler the same unwinder is used where it is known to
//! survive that context; on FreeBSD (where it historically double-frees or
//! blocks when entered from a signal frame) the interrupted IP and FP are
//! pulled out of the machine context and frames are walked manually through
//! saved frame-pointer pairs. The manual walk needs the host built with
//! frame pointers; without them the trace truncates or wanders.
//!
//! Every strategy reports the call site, not the return address: the raw IP
//! is decremented by one exactly once per frame.

use super::platform::MAX_STACK_TRACE;

/// Visits up to `max_frames` program counters starting at the caller,
/// innermost first. `visit` returns `true` to stop early. Returns the
/// unused frame budget.
///
/// # Safety
/// Drives `backtrace::trace_unsynchronized`; the caller must ensure no
/// other thread is unwinding concurrently on platforms where the system
/// unwinder is not reentrant.
pub unsafe fn stack_trace(visit: &mut dyn FnMut(u64) -> bool, max_frames: usize) -> usize {
    let mut left = max_frames;
    backtrace::trace_unsynchronized(|frame| {
        if left == 0 {
            return false;
        }
        left -= 1;
        let ip = frame.ip() as usize as u64;
        if ip == 0 {
            return false;
        }
        !visit(ip.wrapping_sub(1))
    });
    left
}

/// Like [`stack_trace`], but starting from the interrupted context of a
/// signal handler.
///
/// # Safety
/// Must only be called from a signal handler that received `ucontext` from
/// the kernel. See [`stack_trace`] for the unwinder caveat.
#[allow(unused_variables)]
pub unsafe fn stack_trace_signal(
    visit: &mut dyn FnMut(u64) -> bool,
    ucontext: *mut libc::c_void,
    max_frames: usize,
) -> usize {
    #[cfg(any(target_os = "freebsd", feature = "frame-pointer-unwinder"))]
    {
        let (ip, fp) =
            super::platform::interrupted_ip_fp(ucontext as *const libc::ucontext_t);
        walk_frame_pointers(ip, fp, visit, max_frames)
    }
    #[cfg(not(any(target_os = "freebsd", feature = "frame-pointer-unwinder")))]
    {
        // The CFI unwinder crosses the signal trampoline on these platforms;
        // the handler's own frames on top are stripped by the prefix filter.
        stack_trace(visit, max_frames)
    }
}

/// One saved frame record as the x86/ARM calling conventions lay it out:
/// the previous frame pointer, then the return address.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FrameRecord {
    pub next: *const FrameRecord,
    pub ret: usize,
}

/// Walks saved `(frame pointer, return address)` pairs starting from an
/// explicit IP and FP. Stops on a null or misaligned link, when the budget
/// runs out, or when `visit` says so. Returns the unused budget.
///
/// The stack normally grows down, but not always (alternate stacks, signal
/// frames), so no direction check is enforced.
///
/// # Safety
/// `fp` must be a frame pointer of a live stack of this process, or null.
pub unsafe fn walk_frame_pointers(
    ip: u64,
    fp: u64,
    visit: &mut dyn FnMut(u64) -> bool,
    max_frames: usize,
) -> usize {
    let mut left = max_frames;
    let mut ip = ip;
    let mut frame = fp as usize as *const FrameRecord;
    loop {
        if frame.is_null() || !frame.is_aligned() || left == 0 {
            return left;
        }
        if ip != 0 && visit(ip - 1) {
            return left - 1;
        }
        let record = *frame;
        ip = record.ret as u64;
        frame = record.next;
        left -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cfi_trace_sees_own_frames() {
        let mut pcs = Vec::new();
        let left = unsafe {
            stack_trace(
                &mut |pc| {
                    pcs.push(pc);
                    false
                },
                MAX_STACK_TRACE,
            )
        };
        assert!(!pcs.is_empty());
        assert!(left < MAX_STACK_TRACE);
        assert_eq!(left, MAX_STACK_TRACE - pcs.len());
    }

    #[test]
    fn cfi_trace_stops_on_request() {
        let mut count = 0usize;
        unsafe {
            stack_trace(
                &mut |_| {
                    count += 1;
                    true
                },
                MAX_STACK_TRACE,
            )
        };
        assert_eq!(count, 1);
    }

    fn synthetic_chain() -> Box<[FrameRecord; 3]> {
        let mut frames = Box::new([
            FrameRecord {
                next: std::ptr::null(),
                ret: 0,
            },
            FrameRecord {
                next: std::ptr::null(),
                ret: 0x3001,
            },
            FrameRecord {
                next: std::ptr::null(),
                ret: 0x2001,
            },
        ]);
        let innermost: *const FrameRecord = &frames[0];
        frames[1].next = innermost;
        let middle: *const FrameRecord = &frames[1];
        frames[2].next = middle;
        frames
    }

    fn chain_head(chain: &[FrameRecord; 3]) -> u64 {
        &chain[2] as *const FrameRecord as usize as u64
    }

    #[test]
    fn walker_decrements_each_return_address_once() {
        let chain = synthetic_chain();
        let mut pcs = Vec::new();
        let left = unsafe {
            walk_frame_pointers(
                0x1001,
                chain_head(&chain),
                &mut |pc| {
                    pcs.push(pc);
                    false
                },
                8,
            )
        };
        assert_eq!(pcs, vec![0x1000, 0x2000, 0x3000]);
        // Three links consumed before the null next pointer ended the walk.
        assert_eq!(left, 5);
    }

    #[test]
    fn walker_respects_budget() {
        let chain = synthetic_chain();
        let mut pcs = Vec::new();
        let left = unsafe {
            walk_frame_pointers(
                0x1001,
                chain_head(&chain),
                &mut |pc| {
                    pcs.push(pc);
                    false
                },
                2,
            )
        };
        assert_eq!(pcs, vec![0x1000, 0x2000]);
        assert_eq!(left, 0);
    }

    #[test]
    fn walker_early_stop() {
        let chain = synthetic_chain();
        let left = unsafe {
            walk_frame_pointers(
                0x1001,
                chain_head(&chain),
                &mut |_| true,
                4,
            )
        };
        assert_eq!(left, 3);
    }

    #[test]
    fn walker_handles_null_frame() {
        let mut pcs = Vec::new();
        let left = unsafe {
            walk_frame_pointers(
                0x1001,
                0,
                &mut |pc| {
                    pcs.push(pc);
                    false
                },
                4,
            )
        };
        assert!(pcs.is_empty());
        assert_eq!(left, 4);
    }
}
