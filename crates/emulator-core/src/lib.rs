//! Emulator core for the PV32 paged virtual processor.
//!
//! A pure single-threaded interpreter: a 32-bit register machine with a
//! two-level paged MMU, a software TLB split by mode and direction,
//! restartable traps with user/supervisor separation, and one polled
//! keyboard/console device. The host supplies physical memory contents
//! through the loader interface and a [`Console`] implementation; the
//! core never spawns threads and never blocks outside the guest's own
//! `IDLE` loop.

/// Guest fault taxonomy and the user-mode trap bit.
pub mod fault;
pub use fault::{Fault, USER};

/// Physical memory model.
pub mod memory;
pub use memory::{PhysMemory, DEFAULT_MEM_BYTES, PAGE_MASK, PAGE_OFFSET_MASK, PAGE_SIZE};

/// Paged translation and the software TLB.
pub mod mmu;
pub use mmu::{Access, Mmu, WalkError, PTE_A, PTE_D, PTE_P, PTE_U, PTE_W, TB_SZ, TPAGES};

/// Executable image header and loader placement rules.
pub mod image;
pub use image::{ImageError, ImageHeader, FS_BYTES, HEADER_BYTES, IMAGE_MAGIC};

/// Console device contract and scripted test console.
pub mod console;
pub use console::{Console, NullConsole, ScriptedConsole};

/// The opcode table and instruction-word decode helpers.
pub mod opcode;

/// The machine itself: state, dispatcher, trap engine, device tick.
pub mod machine;
pub use machine::{CrashDump, Exit, Machine, StepOutcome, DELTA, ESCAPE_CHAR};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
