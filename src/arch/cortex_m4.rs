//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements the [`Port`] switch primitive via PendSV, builds the initial
//! stack frame of new threads and configures SysTick.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the bootstrap code and interrupt
//!   handlers
//! - **PSP** (Process Stack Pointer): Used by threads in Thread mode
//!
//! [`Port::switch_context`] does not touch registers. It records where the
//! outgoing stack pointer must be saved and where the incoming one is
//! found, then pends PendSV. Interrupts are masked at that point, so PendSV
//! runs as soon as the scheduler releases its critical section (or, from
//! SysTick, tail-chains right after it).
//!
//! On exception entry the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the process stack. PendSV saves and restores R4–R11 by hand.
//!
//! ```text
//!   thread stack after a save       (high address)
//!   ┌──────────────────────────┐
//!   │ xPSR PC LR R12 R3–R0     │  hardware frame
//!   ├──────────────────────────┤
//!   │ R11 … R4                 │  saved by PendSV
//!   └──────────────────────────┘  ◄── Context::sp
//! ```
//!
//! Threads never use the FPU, so frames are always the basic 8-word kind
//! (build for `thumbv7em-none-eabi`).
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest)
//! - PendSV: Priority 0xFF (lowest), never preempts SysTick or vice versa

use core::arch::naked_asm;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use log::trace;

use super::Port;
use crate::thread::{PageDir, Stack, ThreadFn, ThreadId};

/// Core clock after reset (16 MHz HSI on the STM32F4 family).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Saved register state: the process stack pointer after R4–R11 were
/// pushed. Zero for the bootstrap thread, which runs on MSP.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct Context {
    pub sp: u32,
}

/// The idle thread's body.
pub fn idle_loop(_: usize) {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Switch hand-over to PendSV
// ---------------------------------------------------------------------------

/// Where PendSV saves the outgoing PSP. Null when the outgoing thread is
/// dying, or is the bootstrap thread leaving MSP for good.
static PREV_SP: AtomicPtr<u32> = AtomicPtr::new(ptr::null_mut());

/// Where PendSV finds the incoming PSP.
static NEXT_SP: AtomicPtr<u32> = AtomicPtr::new(ptr::null_mut());

/// Set between a requested switch and the PendSV that performs it.
static SWITCH_PENDING: AtomicBool = AtomicBool::new(false);

/// The Cortex-M4 port.
#[derive(Debug, Default)]
pub struct CortexM4 {
    _private: (),
}

impl CortexM4 {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl Port for CortexM4 {
    fn adopt_context(&mut self, _thread: ThreadId, ctx: &mut Context) {
        ctx.sp = 0;
    }

    /// Build the frame PendSV will "restore" on the first switch.
    ///
    /// ## Stack Layout (top = high address, growing down)
    ///
    /// ```text
    /// [Hardware stacked frame]
    ///   xPSR  (Thumb bit set)
    ///   PC    (thread_start)
    ///   LR    (0)
    ///   R12   (0)
    ///   R3    (0)
    ///   R2    (0)
    ///   R1    (arg)
    ///   R0    (entry)
    /// [Software saved context]
    ///   R11 … R4 (0)           <- Context::sp
    /// ```
    fn init_context(
        &mut self,
        _thread: ThreadId,
        ctx: &mut Context,
        stack: &mut Stack,
        entry: ThreadFn,
        arg: usize,
    ) {
        // Stack is 8-byte aligned and a multiple of 8 bytes long.
        let top = stack.top() as *mut u32;

        // SAFETY: the 16 words below `top` lie inside `stack`, which is
        // exclusively borrowed here.
        unsafe {
            let frame = top.sub(16);
            for i in 0..8 {
                frame.add(i).write(0); // R4–R11
            }
            frame.add(8).write(entry as usize as u32); // R0
            frame.add(9).write(arg as u32); // R1
            frame.add(10).write(0); // R2
            frame.add(11).write(0); // R3
            frame.add(12).write(0); // R12
            frame.add(13).write(0); // LR
            frame.add(14).write(thread_start as usize as u32 & !1); // PC
            frame.add(15).write(0x0100_0000); // xPSR
            ctx.sp = frame as u32;
        }
    }

    fn switch_context(&mut self, prev: Option<&mut Context>, next: &Context) {
        assert!(next.sp != 0, "switch to the bootstrap thread");
        let prev_sp = match prev {
            Some(c) if c.sp != 0 => &mut c.sp as *mut u32,
            _ => ptr::null_mut(),
        };

        // A switch still pending means the CPU is still in the thread that
        // was outgoing then; its registers are the ones to save.
        if !SWITCH_PENDING.swap(true, Ordering::AcqRel) {
            PREV_SP.store(prev_sp, Ordering::Release);
        }
        NEXT_SP.store(&next.sp as *const u32 as *mut u32, Ordering::Release);
        SCB::set_pendsv();
    }

    fn activate(&mut self, thread: ThreadId, page_dir: Option<PageDir>) {
        // No MMU; address spaces are a host-side concept here.
        trace!("activate thread {} page dir {:?}", thread, page_dir);
    }
}

/// First code every thread runs: call the entry function, then exit.
extern "C" fn thread_start(entry: usize, arg: usize) -> ! {
    // SAFETY: `init_context` stored a `ThreadFn` in R0.
    let entry: ThreadFn = unsafe { core::mem::transmute::<usize, ThreadFn>(entry) };
    entry(arg);
    crate::kernel::exit()
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler. Performs the switch requested by
/// `switch_context`.
///
/// ## Sequence
/// 1. If `PREV_SP` is set, push R4–R11 onto PSP and store PSP there
/// 2. Load the new PSP from `*NEXT_SP`
/// 3. Pop R4–R11 from the new stack
/// 4. Clear `SWITCH_PENDING`
/// 5. Return to Thread mode on PSP (hardware restores the rest)
///
/// # Safety
/// Called by the NVIC only. Must follow the exception entry/exit
/// convention exactly.
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        // --- Save outgoing context ---
        "ldr r2, ={prev}",
        "ldr r0, [r2]",
        "cbz r0, 1f",
        "mrs r1, psp",
        "stmdb r1!, {{r4-r11}}",
        "str r1, [r0]",
        "1:",
        // --- Restore incoming context ---
        "ldr r2, ={next}",
        "ldr r0, [r2]",
        "ldr r1, [r0]",
        "ldmia r1!, {{r4-r11}}",
        "msr psp, r1",
        "ldr r2, ={pending}",
        "movs r0, #0",
        "strb r0, [r2]",
        // Return from exception using PSP (EXC_RETURN = 0xFFFFFFFD)
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        prev = sym PREV_SP,
        next = sym NEXT_SP,
        pending = sym SWITCH_PENDING,
    );
}

// ---------------------------------------------------------------------------
// SysTick and priorities
// ---------------------------------------------------------------------------

/// Configure SysTick to fire `timer_freq` times per second from the core
/// clock.
///
/// # Panics
/// If `timer_freq` is zero or faster than the core clock.
pub fn configure_systick(syst: &mut SYST, timer_freq: u32) {
    assert!(
        (1..=SYSTEM_CLOCK_HZ).contains(&timer_freq),
        "timer frequency {} Hz out of range",
        timer_freq
    );
    let reload = SYSTEM_CLOCK_HZ / timer_freq - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set PendSV and SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // SAFETY: lowering the priority of system handlers cannot break a
    // priority-based critical section.
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}
