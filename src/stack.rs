//! Conservative machine-stack scanning support.
//!
//! Reading arbitrary stack words as candidate pointers fundamentally
//! requires unsafe code; this module keeps that unsafety narrowly scoped
//! to (a) flushing callee-saved registers to the stack and (b) walking
//! word-aligned slots between two addresses, per spec §9's
//! re-architecture guidance.

/// Force any callee-saved registers the caller is using to spill to its
/// own stack frame before we sample the stack pointer.
///
/// The reference uses `setjmp` for this (its `jmp_buf` capture is a
/// portable "save calling environment" primitive). `setjmp` has no safe
/// FFI-free equivalent in Rust, so this crate reimplements its effect
/// directly: an inline-asm block that clobbers every callee-saved
/// general-purpose register forces LLVM's calling-convention contract to
/// spill whatever those registers held — on the way down from the host's
/// frame into this one — to memory before this function may clobber
/// them, and restore it on return. That spill lands somewhere between
/// `stack_bottom` and the stack pointer we read right after, so it is
/// visible to the subsequent stack walk.
///
/// This is best-effort, matching spec §1's "makes no guarantees" --
/// only the registers named in the clobber list are covered, and only
/// architectures with a clobber list below get any help at all.
#[inline(never)]
pub(crate) fn flush_registers() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::asm!(
            "",
            out("r12") _, out("r13") _, out("r14") _, out("r15") _,
            options(nostack, preserves_flags),
        );
        // `rbx` cannot be named as an inline-asm register operand on this
        // target (LLVM reserves it), so it is flushed separately with a
        // balanced push/pop instead of a clobber operand. This still
        // forces whatever `rbx` currently holds onto the stack, just
        // without `nostack` (the push/pop pair does touch the stack).
        std::arch::asm!(
            "push rbx",
            "pop rbx",
            options(preserves_flags),
        );
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!(
            "",
            out("x19") _, out("x20") _, out("x21") _, out("x22") _, out("x23") _,
            out("x24") _, out("x25") _, out("x26") _, out("x27") _, out("x28") _,
            options(nostack, preserves_flags),
        );
    }
}

/// Walk machine-word-aligned slots between `bottom` and `top` (inclusive
/// of both endpoints), calling `visit` on each word read.
///
/// Handles both stack growth directions by address comparison rather
/// than a compile-time assumption (spec §4.3). `bottom` is the host's
/// `stack_bottom`; `top` is the address of a local inside the tracer's
/// own frame, sampled immediately after [`flush_registers`].
///
/// # Safety
/// `[min(bottom, top), max(bottom, top)]` must be a currently-mapped,
/// readable region of this thread's machine stack, word-aligned reads
/// throughout.
pub(crate) unsafe fn scan_words(bottom: usize, top: usize, mut visit: impl FnMut(usize)) {
    let word = std::mem::size_of::<usize>();
    if bottom == top {
        return;
    }
    if bottom < top {
        let mut addr = top;
        loop {
            // SAFETY: addr is within [bottom, top], a live stack range per caller contract.
            let value = unsafe { *(addr as *const usize) };
            visit(value);
            if addr < bottom + word {
                break;
            }
            addr -= word;
        }
    } else {
        let mut addr = top;
        while addr < bottom {
            // SAFETY: addr is within [top, bottom), a live stack range per caller contract.
            let value = unsafe { *(addr as *const usize) };
            visit(value);
            addr += word;
        }
    }
}
