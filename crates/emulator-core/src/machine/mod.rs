//! The PV32 machine: registers, memory, MMU and the execution loop.
//!
//! One `Machine` value owns everything. The host drives it with [`step`]
//! or [`run`], passing the console adapter by reference; nothing here
//! blocks except the guest's own `IDLE` loop.
//!
//! [`step`]: Machine::step
//! [`run`]: Machine::run

mod exec;

use std::fmt;

use log::{debug, error};

use crate::console::Console;
use crate::fault::{Fault, USER};
use crate::image::{ImageError, ImageHeader, FS_BYTES, HEADER_BYTES};
use crate::memory::{PhysMemory, PAGE_MASK, PAGE_OFFSET_MASK};
use crate::mmu::{Access, Mmu, WalkError};

/// Cycles between device ticks.
pub const DELTA: u32 = 4096;

/// Input byte that aborts the emulator unconditionally.
pub const ESCAPE_CHAR: u8 = b'`';

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Exit {
    /// `HALT` retired in supervisor mode; carries the A register.
    Halt { code: u32 },
    /// The escape keystroke arrived on the console.
    Escape,
    /// `BOUT` with a descriptor other than 1.
    BadWrite { fd: u32 },
    /// Unrecoverable fault; the machine state at the point of death.
    Fatal(CrashDump),
}

/// Machine context captured when execution cannot continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CrashDump {
    pub cycle: u64,
    pub pc: u32,
    pub ir: u32,
    pub sp: u32,
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub trap: u32,
}

impl fmt::Display for CrashDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle = {} pc = {:08x} ir = {:08x} sp = {:08x} a = {} b = {} c = {} trap = {}",
            self.cycle, self.pc, self.ir, self.sp, self.a, self.b, self.c, self.trap
        )
    }
}

/// Result of a single [`Machine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The machine can keep stepping.
    Continue,
    /// The run is over.
    Done(Exit),
}

/// What the dispatcher decided after one instruction.
pub(crate) enum Flow {
    /// Fall through to the next instruction.
    Next,
    /// `self.trap` holds a synchronous fault to deliver.
    Trap,
    /// Stop the run.
    Exit(Exit),
}

/// A cached single-page translation: the fast path for instruction fetch
/// and for stack-relative accesses.
#[derive(Debug, Clone, Copy, Default)]
struct PageWindow {
    vbase: u32,
    pbase: u32,
    live: bool,
}

impl PageWindow {
    #[inline]
    fn hit(&self, v: u32) -> bool {
        self.live && v & PAGE_MASK == self.vbase
    }

    #[inline]
    fn phys(&self, v: u32) -> u32 {
        self.pbase | (v & PAGE_OFFSET_MASK)
    }

    fn capture(token: u32, v: u32) -> Self {
        Self {
            vbase: v & PAGE_MASK,
            pbase: token & PAGE_MASK,
            live: true,
        }
    }
}

pub struct Machine {
    mem: PhysMemory,
    mmu: Mmu,

    // Register file.
    a: u32,
    b: u32,
    c: u32,
    f: f64,
    g: f64,
    pc: u32,
    sp: u32,
    usp: u32,
    ssp: u32,

    // Mode and interrupt state.
    user: bool,
    iena: bool,
    ipend: u32,
    trap: u32,
    vadr: u32,
    ivec: u32,

    // Device tick state.
    timer: u32,
    timeout: u32,
    kbchar: Option<u8>,

    cycle: u64,
    tick_due: u64,
    /// Last fetched instruction word, for crash dumps and the debugger.
    ir: u32,

    iwin: PageWindow,
    swin: PageWindow,
}

impl Machine {
    /// Creates a powered-on machine with `mem_bytes` of zeroed physical
    /// memory (rounded up to a page), in supervisor mode with paging and
    /// interrupts off.
    #[must_use]
    pub fn new(mem_bytes: u32) -> Self {
        Self {
            mem: PhysMemory::new(mem_bytes),
            mmu: Mmu::new(),
            a: 0,
            b: 0,
            c: 0,
            f: 0.0,
            g: 0.0,
            pc: 0,
            sp: 0,
            usp: 0,
            ssp: 0,
            user: false,
            iena: false,
            ipend: 0,
            trap: 0,
            vadr: 0,
            ivec: 0,
            timer: 0,
            timeout: 0,
            kbchar: None,
            cycle: 0,
            tick_due: u64::from(DELTA),
            ir: 0,
            iwin: PageWindow::default(),
            swin: PageWindow::default(),
        }
    }

    /// Loads an executable image: header plus payload at physical 0.
    /// On success the PC is the header's entry point and the SP sits just
    /// below the filesystem window.
    ///
    /// # Errors
    ///
    /// Header validation errors, or [`ImageError::TooLarge`] when the
    /// payload exceeds physical memory.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<ImageHeader, ImageError> {
        let header = ImageHeader::parse(bytes)?;
        let payload = &bytes[HEADER_BYTES..];
        if payload.len() > self.mem.size() as usize {
            return Err(ImageError::TooLarge {
                payload: payload.len(),
                mem: self.mem.size(),
            });
        }
        self.mem.bytes_mut()[..payload.len()].copy_from_slice(payload);
        self.pc = header.entry;
        self.sp = self.mem.size().saturating_sub(FS_BYTES);
        Ok(header)
    }

    /// Places a RAM-filesystem blob in the window at the top of memory.
    ///
    /// # Errors
    ///
    /// [`ImageError::FsTooLarge`] when the blob exceeds the window.
    pub fn load_filesystem(&mut self, blob: &[u8]) -> Result<(), ImageError> {
        if blob.len() > FS_BYTES as usize || (self.mem.size() as usize) < blob.len() {
            return Err(ImageError::FsTooLarge { blob: blob.len() });
        }
        let base = self.mem.size().saturating_sub(FS_BYTES) as usize;
        self.mem.bytes_mut()[base..base + blob.len()].copy_from_slice(blob);
        Ok(())
    }

    /// Runs until the machine exits.
    pub fn run(&mut self, console: &mut dyn Console) -> Exit {
        loop {
            if let StepOutcome::Done(exit) = self.step(console) {
                return exit;
            }
        }
    }

    /// Executes one dispatcher step: a device tick when one is due, then
    /// one instruction fetch/decode/execute, then any resulting trap
    /// delivery. An interrupt delivery counts as a step on its own.
    pub fn step(&mut self, console: &mut dyn Console) -> StepOutcome {
        if self.cycle >= self.tick_due {
            self.tick_due += u64::from(DELTA);
            match self.tick(console) {
                Ok(true) => return StepOutcome::Continue,
                Ok(false) => {}
                Err(exit) => return StepOutcome::Done(exit),
            }
        }

        // Refresh the instruction window when the PC left its page. Any
        // failure here is an instruction-fetch page fault, whatever the
        // walk itself reported.
        if !self.iwin.hit(self.pc) {
            match self.mmu.translate(&mut self.mem, self.user, Access::Read, self.pc) {
                Ok(token) => self.iwin = PageWindow::capture(token, self.pc),
                Err(_) => {
                    self.vadr = self.pc;
                    self.trap = Fault::IPage.code();
                    return match self.exception(self.pc) {
                        Some(exit) => StepOutcome::Done(exit),
                        None => StepOutcome::Continue,
                    };
                }
            }
        }

        let insn_pc = self.pc;
        let word = self.mem.read_u32(self.iwin.phys(insn_pc) & !3);
        self.ir = word;
        self.pc = self.pc.wrapping_add(4);
        self.cycle += 1;

        match self.execute(console, word) {
            Flow::Next => StepOutcome::Continue,
            Flow::Trap => match self.exception(insn_pc) {
                Some(exit) => StepOutcome::Done(exit),
                None => StepOutcome::Continue,
            },
            Flow::Exit(exit) => StepOutcome::Done(exit),
        }
    }

    /// One device tick: poll the console, advance the software timer, and
    /// raise whatever became due. `Ok(true)` means an interrupt was
    /// delivered and the step is spent.
    fn tick(&mut self, console: &mut dyn Console) -> Result<bool, Exit> {
        // Leave a buffered keystroke alone while its interrupt is pending.
        if self.iena || self.ipend & Fault::Keybd.code() == 0 {
            if let Some(byte) = console.poll_byte() {
                if byte == ESCAPE_CHAR {
                    debug!("ungraceful exit, cycle = {}", self.cycle);
                    return Err(Exit::Escape);
                }
                self.kbchar = Some(byte);
                if self.iena {
                    return self.interrupt(Fault::Keybd.code()).map(|()| true);
                }
                self.ipend |= Fault::Keybd.code();
            }
        }
        if self.timeout != 0 {
            self.timer = self.timer.wrapping_add(DELTA);
            if self.timer >= self.timeout {
                self.timer = 0;
                if self.iena {
                    return self.interrupt(Fault::Timer.code()).map(|()| true);
                }
                self.ipend |= Fault::Timer.code();
            }
        }
        Ok(false)
    }

    /// Delivers an asynchronous interrupt: the saved PC is the resume
    /// address.
    fn interrupt(&mut self, code: u32) -> Result<(), Exit> {
        self.trap = code;
        self.iena = false;
        match self.deliver(self.pc) {
            Some(exit) => Err(exit),
            None => Ok(()),
        }
    }

    /// Synchronous fault path: fatal when interrupts are disabled, else
    /// delivered with the faulting instruction's own address so the
    /// handler can restart it.
    fn exception(&mut self, fault_pc: u32) -> Option<Exit> {
        if !self.iena {
            return Some(self.fatal("exception with interrupts disabled"));
        }
        self.deliver(fault_pc)
    }

    /// Serializes context onto the supervisor stack and vectors to the
    /// handler. Interrupts are implicitly disabled; a kernel stack fault
    /// here is fatal.
    fn deliver(&mut self, saved_pc: u32) -> Option<Exit> {
        self.iwin.live = false;
        self.swin.live = false;
        if self.user {
            self.usp = self.sp;
            self.sp = self.ssp;
            self.user = false;
            self.trap |= USER;
        }
        self.iena = false;

        self.sp = self.sp.wrapping_sub(8);
        let Some(pa) = self.tr_write(self.sp) else {
            return Some(self.fatal("kernel stack fault"));
        };
        self.mem.write_u32(pa & !7, saved_pc);

        self.sp = self.sp.wrapping_sub(8);
        let Some(pa) = self.tr_write(self.sp) else {
            return Some(self.fatal("kernel stack fault"));
        };
        self.mem.write_u32(pa & !7, self.trap);

        self.pc = self.ivec;
        None
    }

    /// Picks the highest-priority pending interrupt (lowest set bit),
    /// clears it, and delivers it. Caller has checked `ipend != 0`.
    fn deliver_pending(&mut self) -> Result<(), Exit> {
        let code = self.ipend & self.ipend.wrapping_neg();
        self.ipend ^= code;
        self.interrupt(code)
    }

    fn fatal(&mut self, why: &str) -> Exit {
        let dump = CrashDump {
            cycle: self.cycle,
            pc: self.pc,
            ir: self.ir,
            sp: self.sp,
            a: self.a,
            b: self.b,
            c: self.c,
            trap: self.trap,
        };
        error!("processor halted, {why}: {dump}");
        Exit::Fatal(dump)
    }

    // Translation helpers. On failure the trap code and bad address are
    // recorded and `None` comes back, so opcode arms can bail with a
    // one-line `else`.

    fn walk_fault(&mut self, access: Access, v: u32, err: WalkError) {
        self.vadr = v;
        self.trap = match (err, access) {
            (WalkError::BadPhys, _) => Fault::Mem.code(),
            (WalkError::NotMapped, Access::Read) => Fault::RPage.code(),
            (WalkError::NotMapped, Access::Write) => Fault::WPage.code(),
        };
    }

    #[inline]
    pub(crate) fn tr_read(&mut self, v: u32) -> Option<u32> {
        match self.mmu.translate(&mut self.mem, self.user, Access::Read, v) {
            Ok(token) => Some(Mmu::phys_addr(token, v)),
            Err(err) => {
                self.walk_fault(Access::Read, v, err);
                None
            }
        }
    }

    #[inline]
    pub(crate) fn tr_write(&mut self, v: u32) -> Option<u32> {
        match self.mmu.translate(&mut self.mem, self.user, Access::Write, v) {
            Ok(token) => Some(Mmu::phys_addr(token, v)),
            Err(err) => {
                self.walk_fault(Access::Write, v, err);
                None
            }
        }
    }

    /// Stack-window read path for pops and local operands.
    #[inline]
    fn stack_pa_read(&mut self, v: u32) -> Option<u32> {
        if self.swin.hit(v) {
            return Some(self.swin.phys(v));
        }
        self.tr_read(v)
    }

    /// Stack-window write path for pushes and local stores; a miss that
    /// translates refreshes the window, so runs of stack traffic on one
    /// page translate once.
    #[inline]
    fn stack_pa_write(&mut self, v: u32) -> Option<u32> {
        if self.swin.hit(v) {
            return Some(self.swin.phys(v));
        }
        let pa = self.tr_write(v)?;
        self.swin = PageWindow::capture(pa, v);
        Some(pa)
    }

    // Stack slots are 8 bytes wide; scalar pushes store their 32 bits in
    // the low half of the slot.

    fn push_u32(&mut self, value: u32) -> Option<()> {
        let v = self.sp.wrapping_sub(8);
        let pa = self.stack_pa_write(v)?;
        self.mem.write_u32(pa & !7, value);
        self.sp = v;
        Some(())
    }

    fn push_f64(&mut self, value: f64) -> Option<()> {
        let v = self.sp.wrapping_sub(8);
        let pa = self.stack_pa_write(v)?;
        self.mem.write_f64(pa & !7, value);
        self.sp = v;
        Some(())
    }

    fn pop_u32(&mut self) -> Option<u32> {
        let pa = self.stack_pa_read(self.sp)?;
        let value = self.mem.read_u32(pa & !7);
        self.sp = self.sp.wrapping_add(8);
        Some(value)
    }

    fn pop_f64(&mut self) -> Option<f64> {
        let pa = self.stack_pa_read(self.sp)?;
        let value = self.mem.read_f64(pa & !7);
        self.sp = self.sp.wrapping_add(8);
        Some(value)
    }

    /// 32-bit local operand at `sp + offset`, for the `*L` ALU forms.
    fn local_u32(&mut self, offset: i32) -> Option<u32> {
        let v = self.sp.wrapping_add(offset as u32);
        let pa = self.stack_pa_read(v)?;
        Some(self.mem.read_u32(pa & !3))
    }

    // Host-facing accessors: the debugger, the loader driver and the test
    // suites inspect and seed state through these.

    #[must_use]
    pub fn a(&self) -> u32 {
        self.a
    }

    pub fn set_a(&mut self, value: u32) {
        self.a = value;
    }

    #[must_use]
    pub fn b(&self) -> u32 {
        self.b
    }

    pub fn set_b(&mut self, value: u32) {
        self.b = value;
    }

    #[must_use]
    pub fn c(&self) -> u32 {
        self.c
    }

    pub fn set_c(&mut self, value: u32) {
        self.c = value;
    }

    #[must_use]
    pub fn f(&self) -> f64 {
        self.f
    }

    pub fn set_f(&mut self, value: f64) {
        self.f = value;
    }

    #[must_use]
    pub fn g(&self) -> f64 {
        self.g
    }

    pub fn set_g(&mut self, value: f64) {
        self.g = value;
    }

    #[must_use]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, value: u32) {
        self.pc = value;
        self.iwin.live = false;
    }

    #[must_use]
    pub fn sp(&self) -> u32 {
        self.sp
    }

    pub fn set_sp(&mut self, value: u32) {
        self.sp = value;
        self.swin.live = false;
    }

    #[must_use]
    pub fn usp(&self) -> u32 {
        self.usp
    }

    pub fn set_usp(&mut self, value: u32) {
        self.usp = value;
    }

    #[must_use]
    pub fn ssp(&self) -> u32 {
        self.ssp
    }

    pub fn set_ssp(&mut self, value: u32) {
        self.ssp = value;
    }

    #[must_use]
    pub fn user(&self) -> bool {
        self.user
    }

    /// Switches the privilege mode directly. Host-side setup only; the
    /// guest changes mode through trap delivery and `RTI`.
    pub fn set_user(&mut self, user: bool) {
        self.user = user;
        self.iwin.live = false;
        self.swin.live = false;
    }

    #[must_use]
    pub fn iena(&self) -> bool {
        self.iena
    }

    pub fn set_iena(&mut self, enabled: bool) {
        self.iena = enabled;
    }

    #[must_use]
    pub fn ipend(&self) -> u32 {
        self.ipend
    }

    #[must_use]
    pub fn trap(&self) -> u32 {
        self.trap
    }

    #[must_use]
    pub fn vadr(&self) -> u32 {
        self.vadr
    }

    #[must_use]
    pub fn ivec(&self) -> u32 {
        self.ivec
    }

    pub fn set_ivec(&mut self, value: u32) {
        self.ivec = value;
    }

    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    #[must_use]
    pub fn ir(&self) -> u32 {
        self.ir
    }

    #[must_use]
    pub fn paging(&self) -> bool {
        self.mmu.paging
    }

    /// Enables paging with the given page-directory base. Host-side setup
    /// counterpart of the `PDIR`/`SPAG` opcodes.
    pub fn set_paging(&mut self, pdir: u32, enabled: bool) {
        self.mmu.pdir = pdir & PAGE_MASK;
        self.mmu.paging = enabled;
        self.mmu.flush();
        self.iwin.live = false;
        self.swin.live = false;
    }

    #[must_use]
    pub fn mem(&self) -> &PhysMemory {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut PhysMemory {
        &mut self.mem
    }

    /// Reads one byte at a guest virtual address without disturbing the
    /// TLB or the accessed/dirty bits. `None` when unmapped.
    #[must_use]
    pub fn peek_byte(&self, v: u32) -> Option<u8> {
        let pa = self.mmu.probe(&self.mem, self.user, v)?;
        Some(self.mem.read_u8(pa))
    }
}
