// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Platform constants and machine-context access for stack capture.

/// Maximum number of frames captured for a crash report. Bounds the walk in
/// case of stack corruption.
pub const MAX_STACK_TRACE: usize = 32;

/// Reads the interrupted instruction pointer and frame pointer out of the
/// OS-supplied machine context. Field names are architecture- and
/// OS-specific, hence the cfg ladder.
///
/// # Safety
/// `ucontext` must point at the `ucontext_t` the kernel handed to the
/// signal handler.
#[cfg(any(target_os = "freebsd", feature = "frame-pointer-unwinder"))]
pub unsafe fn interrupted_ip_fp(ucontext: *const libc::ucontext_t) -> (u64, u64) {
    if ucontext.is_null() {
        return (0, 0);
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    {
        let mcontext = &(*ucontext).uc_mcontext;
        (
            mcontext.gregs[libc::REG_RIP as usize] as u64,
            mcontext.gregs[libc::REG_RBP as usize] as u64,
        )
    }
    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    {
        let mcontext = &(*ucontext).uc_mcontext;
        (mcontext.pc, mcontext.regs[29])
    }
    #[cfg(all(target_os = "freebsd", target_arch = "x86_64"))]
    {
        let mcontext = &(*ucontext).uc_mcontext;
        (mcontext.mc_rip as u64, mcontext.mc_rbp as u64)
    }
    #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
    {
        // uc_mcontext is itself a pointer on Darwin.
        let mcontext = (*ucontext).uc_mcontext;
        ((*mcontext).__ss.__rip, (*mcontext).__ss.__rbp)
    }
    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    {
        let mcontext = (*ucontext).uc_mcontext;
        ((*mcontext).__ss.__pc, (*mcontext).__ss.__fp)
    }
}
