//! The instruction dispatcher: one match arm per opcode.
//!
//! Every arm either commits completely or bails through [`Flow::Trap`]
//! with no destination register written, so a faulting instruction can be
//! restarted by re-dispatching it. The bulk-memory quartet commits in
//! page-sized quanta and leaves A/B/C describing the unconsumed suffix.

use log::{debug, error};

use crate::console::Console;
use crate::fault::{Fault, USER};
use crate::memory::{PAGE_MASK, PAGE_OFFSET_MASK, PAGE_SIZE};
use crate::opcode::{self as op, branch_disp, imm, uimm};

use super::{Exit, Flow, Machine, PageWindow, DELTA, ESCAPE_CHAR};

/// Bytes from `v` to the end of its page, clipped to `remaining`.
#[inline]
fn chunk(v: u32, remaining: u32) -> u32 {
    (PAGE_SIZE - (v & PAGE_OFFSET_MASK)).min(remaining)
}

impl Machine {
    #[inline]
    fn raise(&mut self, fault: Fault) -> Flow {
        self.trap = fault.code();
        Flow::Trap
    }

    #[inline]
    fn take_branch(&mut self, word: u32) {
        self.pc = self.pc.wrapping_add(branch_disp(word) as u32);
    }

    // Addressing paths: `local` accesses ride the stack window, the rest
    // go straight through the TLB.

    #[inline]
    fn rd_pa(&mut self, v: u32, local: bool) -> Option<u32> {
        if local {
            self.stack_pa_read(v)
        } else {
            self.tr_read(v)
        }
    }

    #[inline]
    fn wr_pa(&mut self, v: u32, local: bool) -> Option<u32> {
        if local {
            self.stack_pa_write(v)
        } else {
            self.tr_write(v)
        }
    }

    fn ld_u32(&mut self, v: u32, local: bool) -> Option<u32> {
        let pa = self.rd_pa(v, local)?;
        Some(self.mem.read_u32(pa & !3))
    }

    fn ld_i16(&mut self, v: u32, local: bool) -> Option<u32> {
        let pa = self.rd_pa(v, local)?;
        Some(self.mem.read_u16(pa & !1) as i16 as i32 as u32)
    }

    fn ld_u16(&mut self, v: u32, local: bool) -> Option<u32> {
        let pa = self.rd_pa(v, local)?;
        Some(u32::from(self.mem.read_u16(pa & !1)))
    }

    fn ld_i8(&mut self, v: u32, local: bool) -> Option<u32> {
        let pa = self.rd_pa(v, local)?;
        Some(self.mem.read_u8(pa) as i8 as i32 as u32)
    }

    fn ld_u8(&mut self, v: u32, local: bool) -> Option<u32> {
        let pa = self.rd_pa(v, local)?;
        Some(u32::from(self.mem.read_u8(pa)))
    }

    fn ld_f64(&mut self, v: u32, local: bool) -> Option<f64> {
        let pa = self.rd_pa(v, local)?;
        Some(self.mem.read_f64(pa & !7))
    }

    fn ld_f32(&mut self, v: u32, local: bool) -> Option<f64> {
        let pa = self.rd_pa(v, local)?;
        Some(f64::from(self.mem.read_f32(pa & !3)))
    }

    fn st_u32(&mut self, v: u32, local: bool, value: u32) -> Option<()> {
        let pa = self.wr_pa(v, local)?;
        self.mem.write_u32(pa & !3, value);
        Some(())
    }

    fn st_u16(&mut self, v: u32, local: bool, value: u32) -> Option<()> {
        let pa = self.wr_pa(v, local)?;
        self.mem.write_u16(pa & !1, value as u16);
        Some(())
    }

    fn st_u8(&mut self, v: u32, local: bool, value: u32) -> Option<()> {
        let pa = self.wr_pa(v, local)?;
        self.mem.write_u8(pa, value as u8);
        Some(())
    }

    fn st_f64(&mut self, v: u32, local: bool, value: f64) -> Option<()> {
        let pa = self.wr_pa(v, local)?;
        self.mem.write_f64(pa & !7, value);
        Some(())
    }

    fn st_f32(&mut self, v: u32, local: bool, value: f64) -> Option<()> {
        let pa = self.wr_pa(v, local)?;
        self.mem.write_f32(pa & !3, value as f32);
        Some(())
    }

    #[inline]
    fn local_addr(&self, word: u32) -> u32 {
        self.sp.wrapping_add(imm(word) as u32)
    }

    #[inline]
    fn global_addr(&self, word: u32) -> u32 {
        self.pc.wrapping_add(imm(word) as u32)
    }

    /// Executes one already-fetched instruction word. `self.pc` has
    /// advanced past it; on [`Flow::Trap`] the caller still knows the
    /// faulting address and delivers with it.
    #[allow(clippy::too_many_lines)]
    pub(crate) fn execute(&mut self, console: &mut dyn Console, word: u32) -> Flow {
        match op::opcode(word) {
            // -- control ------------------------------------------------
            op::HALT => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                debug!("halt({}), cycle = {}", self.a, self.cycle);
                Flow::Exit(Exit::Halt { code: self.a })
            }
            op::ENT => {
                self.sp = self.sp.wrapping_add(imm(word) as u32);
                Flow::Next
            }
            op::LEV => {
                let v = self.local_addr(word);
                let Some(pa) = self.stack_pa_read(v) else {
                    return Flow::Trap;
                };
                let ret = self.mem.read_u32(pa & !7);
                self.sp = v.wrapping_add(8);
                self.pc = ret;
                Flow::Next
            }
            op::JMP => {
                self.take_branch(word);
                Flow::Next
            }
            op::JMPI => {
                let v = self
                    .global_addr(word)
                    .wrapping_add(self.a.wrapping_shl(2));
                let Some(pa) = self.tr_read(v) else {
                    return Flow::Trap;
                };
                let offset = self.mem.read_u32(pa & !3);
                self.pc = self.pc.wrapping_add(offset);
                Flow::Next
            }
            op::JSR => {
                if self.push_u32(self.pc).is_none() {
                    return Flow::Trap;
                }
                self.take_branch(word);
                Flow::Next
            }
            op::JSRA => {
                if self.push_u32(self.pc).is_none() {
                    return Flow::Trap;
                }
                self.pc = self.a;
                Flow::Next
            }
            op::NOP => Flow::Next,
            op::IDLE => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                if !self.iena {
                    return self.raise(Fault::Inst);
                }
                loop {
                    if let Some(byte) = console.poll_byte() {
                        if byte == ESCAPE_CHAR {
                            debug!("ungraceful exit, cycle = {}", self.cycle);
                            return Flow::Exit(Exit::Escape);
                        }
                        self.kbchar = Some(byte);
                        return match self.interrupt(Fault::Keybd.code()) {
                            Ok(()) => Flow::Next,
                            Err(exit) => Flow::Exit(exit),
                        };
                    }
                    self.cycle += u64::from(DELTA);
                    self.tick_due = self.cycle + u64::from(DELTA);
                    if self.timeout != 0 {
                        self.timer = self.timer.wrapping_add(DELTA);
                        if self.timer >= self.timeout {
                            self.timer = 0;
                            return match self.interrupt(Fault::Timer.code()) {
                                Ok(()) => Flow::Next,
                                Err(exit) => Flow::Exit(exit),
                            };
                        }
                    }
                }
            }

            // -- stack --------------------------------------------------
            op::PSHA => {
                if self.push_u32(self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::PSHB => {
                if self.push_u32(self.b).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::PSHC => {
                if self.push_u32(self.c).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::PSHF => {
                if self.push_f64(self.f).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::PSHG => {
                if self.push_f64(self.g).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::PSHI => {
                if self.push_u32(imm(word) as u32).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::POPA => {
                let Some(x) = self.pop_u32() else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::POPB => {
                let Some(x) = self.pop_u32() else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::POPC => {
                let Some(x) = self.pop_u32() else {
                    return Flow::Trap;
                };
                self.c = x;
                Flow::Next
            }
            op::POPF => {
                let Some(x) = self.pop_f64() else {
                    return Flow::Trap;
                };
                self.f = x;
                Flow::Next
            }
            op::POPG => {
                let Some(x) = self.pop_f64() else {
                    return Flow::Trap;
                };
                self.g = x;
                Flow::Next
            }

            // -- address formation --------------------------------------
            op::LEA => {
                self.a = self.local_addr(word);
                Flow::Next
            }
            op::LEAG => {
                self.a = self.global_addr(word);
                Flow::Next
            }

            // -- bulk memory, restartable after a page fault ------------
            op::MCPY => {
                while self.c != 0 {
                    let Some(src) = self.tr_read(self.b) else {
                        return Flow::Trap;
                    };
                    let Some(dst) = self.tr_write(self.a) else {
                        return Flow::Trap;
                    };
                    let n = chunk(self.b, chunk(self.a, self.c));
                    self.mem.copy_within(src, dst, n);
                    self.a = self.a.wrapping_add(n);
                    self.b = self.b.wrapping_add(n);
                    self.c -= n;
                }
                Flow::Next
            }
            op::MCMP => {
                loop {
                    if self.c == 0 {
                        self.a = 0;
                        break;
                    }
                    let Some(rhs) = self.tr_read(self.b) else {
                        return Flow::Trap;
                    };
                    let Some(lhs) = self.tr_read(self.a) else {
                        return Flow::Trap;
                    };
                    let n = chunk(self.b, chunk(self.a, self.c));
                    let diff = self.mem.compare(lhs, rhs, n);
                    if diff != 0 {
                        self.a = diff as u32;
                        self.b = self.b.wrapping_add(self.c);
                        self.c = 0;
                        break;
                    }
                    self.a = self.a.wrapping_add(n);
                    self.b = self.b.wrapping_add(n);
                    self.c -= n;
                }
                Flow::Next
            }
            op::MCHR => {
                loop {
                    if self.c == 0 {
                        self.a = 0;
                        break;
                    }
                    let Some(pa) = self.tr_read(self.a) else {
                        return Flow::Trap;
                    };
                    let n = chunk(self.a, self.c);
                    if let Some(k) = self.mem.find(pa, n, self.b as u8) {
                        self.a = self.a.wrapping_add(k);
                        self.c = 0;
                        break;
                    }
                    self.a = self.a.wrapping_add(n);
                    self.c -= n;
                }
                Flow::Next
            }
            op::MSET => {
                while self.c != 0 {
                    let Some(pa) = self.tr_write(self.a) else {
                        return Flow::Trap;
                    };
                    let n = chunk(self.a, self.c);
                    self.mem.fill(pa, n, self.b as u8);
                    self.a = self.a.wrapping_add(n);
                    self.c -= n;
                }
                Flow::Next
            }

            // -- load A -------------------------------------------------
            op::LL => {
                let Some(x) = self.ld_u32(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LLS => {
                let Some(x) = self.ld_i16(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LLH => {
                let Some(x) = self.ld_u16(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LLC => {
                let Some(x) = self.ld_i8(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LLB => {
                let Some(x) = self.ld_u8(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LLD => {
                let Some(x) = self.ld_f64(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.f = x;
                Flow::Next
            }
            op::LLF => {
                let Some(x) = self.ld_f32(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.f = x;
                Flow::Next
            }
            op::LG => {
                let Some(x) = self.ld_u32(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LGS => {
                let Some(x) = self.ld_i16(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LGH => {
                let Some(x) = self.ld_u16(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LGC => {
                let Some(x) = self.ld_i8(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LGB => {
                let Some(x) = self.ld_u8(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LGD => {
                let Some(x) = self.ld_f64(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.f = x;
                Flow::Next
            }
            op::LGF => {
                let Some(x) = self.ld_f32(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.f = x;
                Flow::Next
            }
            op::LX => {
                let v = self.a.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_u32(v, false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LXS => {
                let v = self.a.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_i16(v, false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LXH => {
                let v = self.a.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_u16(v, false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LXC => {
                let v = self.a.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_i8(v, false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LXB => {
                let v = self.a.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_u8(v, false) else {
                    return Flow::Trap;
                };
                self.a = x;
                Flow::Next
            }
            op::LXD => {
                let v = self.a.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_f64(v, false) else {
                    return Flow::Trap;
                };
                self.f = x;
                Flow::Next
            }
            op::LXF => {
                let v = self.a.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_f32(v, false) else {
                    return Flow::Trap;
                };
                self.f = x;
                Flow::Next
            }
            op::LI => {
                self.a = imm(word) as u32;
                Flow::Next
            }
            op::LHI => {
                self.a = self.a.wrapping_shl(24) | uimm(word);
                Flow::Next
            }
            op::LIF => {
                self.f = f64::from(imm(word)) / 256.0;
                Flow::Next
            }

            // -- load B -------------------------------------------------
            op::LBL => {
                let Some(x) = self.ld_u32(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBLS => {
                let Some(x) = self.ld_i16(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBLH => {
                let Some(x) = self.ld_u16(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBLC => {
                let Some(x) = self.ld_i8(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBLB => {
                let Some(x) = self.ld_u8(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBLD => {
                let Some(x) = self.ld_f64(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.g = x;
                Flow::Next
            }
            op::LBLF => {
                let Some(x) = self.ld_f32(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.g = x;
                Flow::Next
            }
            op::LBG => {
                let Some(x) = self.ld_u32(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBGS => {
                let Some(x) = self.ld_i16(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBGH => {
                let Some(x) = self.ld_u16(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBGC => {
                let Some(x) = self.ld_i8(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBGB => {
                let Some(x) = self.ld_u8(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBGD => {
                let Some(x) = self.ld_f64(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.g = x;
                Flow::Next
            }
            op::LBGF => {
                let Some(x) = self.ld_f32(self.global_addr(word), false) else {
                    return Flow::Trap;
                };
                self.g = x;
                Flow::Next
            }
            op::LBX => {
                let v = self.b.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_u32(v, false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBXS => {
                let v = self.b.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_i16(v, false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBXH => {
                let v = self.b.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_u16(v, false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBXC => {
                let v = self.b.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_i8(v, false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBXB => {
                let v = self.b.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_u8(v, false) else {
                    return Flow::Trap;
                };
                self.b = x;
                Flow::Next
            }
            op::LBXD => {
                let v = self.b.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_f64(v, false) else {
                    return Flow::Trap;
                };
                self.g = x;
                Flow::Next
            }
            op::LBXF => {
                let v = self.b.wrapping_add(imm(word) as u32);
                let Some(x) = self.ld_f32(v, false) else {
                    return Flow::Trap;
                };
                self.g = x;
                Flow::Next
            }
            op::LBI => {
                self.b = imm(word) as u32;
                Flow::Next
            }
            op::LBHI => {
                self.b = self.b.wrapping_shl(24) | uimm(word);
                Flow::Next
            }
            op::LBIF => {
                self.g = f64::from(imm(word)) / 256.0;
                Flow::Next
            }

            // -- misc transfers -----------------------------------------
            op::LCL => {
                let Some(x) = self.ld_u32(self.local_addr(word), true) else {
                    return Flow::Trap;
                };
                self.c = x;
                Flow::Next
            }
            op::LBA => {
                self.b = self.a;
                Flow::Next
            }
            op::LCA => {
                self.c = self.a;
                Flow::Next
            }
            op::LBAD => {
                self.g = self.f;
                Flow::Next
            }

            // -- store --------------------------------------------------
            op::SL => {
                if self.st_u32(self.local_addr(word), true, self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SLH => {
                if self.st_u16(self.local_addr(word), true, self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SLB => {
                if self.st_u8(self.local_addr(word), true, self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SLD => {
                if self.st_f64(self.local_addr(word), true, self.f).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SLF => {
                if self.st_f32(self.local_addr(word), true, self.f).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SG => {
                if self.st_u32(self.global_addr(word), false, self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SGH => {
                if self.st_u16(self.global_addr(word), false, self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SGB => {
                if self.st_u8(self.global_addr(word), false, self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SGD => {
                if self.st_f64(self.global_addr(word), false, self.f).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SGF => {
                if self.st_f32(self.global_addr(word), false, self.f).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SX => {
                let v = self.b.wrapping_add(imm(word) as u32);
                if self.st_u32(v, false, self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SXH => {
                let v = self.b.wrapping_add(imm(word) as u32);
                if self.st_u16(v, false, self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SXB => {
                let v = self.b.wrapping_add(imm(word) as u32);
                if self.st_u8(v, false, self.a).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SXD => {
                let v = self.b.wrapping_add(imm(word) as u32);
                if self.st_f64(v, false, self.f).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }
            op::SXF => {
                let v = self.b.wrapping_add(imm(word) as u32);
                if self.st_f32(v, false, self.f).is_none() {
                    return Flow::Trap;
                }
                Flow::Next
            }

            // -- float arithmetic ---------------------------------------
            op::ADDF => {
                self.f += self.g;
                Flow::Next
            }
            op::SUBF => {
                self.f -= self.g;
                Flow::Next
            }
            op::MULF => {
                self.f *= self.g;
                Flow::Next
            }
            op::DIVF => {
                if self.g == 0.0 {
                    return self.raise(Fault::Arith);
                }
                self.f /= self.g;
                Flow::Next
            }

            // -- integer ALU --------------------------------------------
            op::ADD => {
                self.a = self.a.wrapping_add(self.b);
                Flow::Next
            }
            op::ADDI => {
                self.a = self.a.wrapping_add(imm(word) as u32);
                Flow::Next
            }
            op::ADDL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                self.a = self.a.wrapping_add(x);
                Flow::Next
            }
            op::SUB => {
                self.a = self.a.wrapping_sub(self.b);
                Flow::Next
            }
            op::SUBI => {
                self.a = self.a.wrapping_sub(imm(word) as u32);
                Flow::Next
            }
            op::SUBL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                self.a = self.a.wrapping_sub(x);
                Flow::Next
            }
            op::MUL => {
                self.a = (self.a as i32).wrapping_mul(self.b as i32) as u32;
                Flow::Next
            }
            op::MULI => {
                self.a = (self.a as i32).wrapping_mul(imm(word)) as u32;
                Flow::Next
            }
            op::MULL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                self.a = (self.a as i32).wrapping_mul(x as i32) as u32;
                Flow::Next
            }
            op::DIV => {
                if self.b == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a = (self.a as i32).wrapping_div(self.b as i32) as u32;
                Flow::Next
            }
            op::DIVI => {
                let d = imm(word);
                if d == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a = (self.a as i32).wrapping_div(d) as u32;
                Flow::Next
            }
            op::DIVL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                if x == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a = (self.a as i32).wrapping_div(x as i32) as u32;
                Flow::Next
            }
            op::DVU => {
                if self.b == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a /= self.b;
                Flow::Next
            }
            op::DVUI => {
                let d = imm(word) as u32;
                if d == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a /= d;
                Flow::Next
            }
            op::DVUL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                if x == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a /= x;
                Flow::Next
            }
            op::MOD => {
                if self.b == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a = (self.a as i32).wrapping_rem(self.b as i32) as u32;
                Flow::Next
            }
            op::MODI => {
                let d = imm(word);
                if d == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a = (self.a as i32).wrapping_rem(d) as u32;
                Flow::Next
            }
            op::MODL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                if x == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a = (self.a as i32).wrapping_rem(x as i32) as u32;
                Flow::Next
            }
            op::MDU => {
                if self.b == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a %= self.b;
                Flow::Next
            }
            op::MDUI => {
                let d = imm(word) as u32;
                if d == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a %= d;
                Flow::Next
            }
            op::MDUL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                if x == 0 {
                    return self.raise(Fault::Arith);
                }
                self.a %= x;
                Flow::Next
            }
            op::AND => {
                self.a &= self.b;
                Flow::Next
            }
            op::ANDI => {
                self.a &= imm(word) as u32;
                Flow::Next
            }
            op::ANDL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                self.a &= x;
                Flow::Next
            }
            op::OR => {
                self.a |= self.b;
                Flow::Next
            }
            op::ORI => {
                self.a |= imm(word) as u32;
                Flow::Next
            }
            op::ORL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                self.a |= x;
                Flow::Next
            }
            op::XOR => {
                self.a ^= self.b;
                Flow::Next
            }
            op::XORI => {
                self.a ^= imm(word) as u32;
                Flow::Next
            }
            op::XORL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                self.a ^= x;
                Flow::Next
            }
            op::SHL => {
                self.a = self.a.wrapping_shl(self.b);
                Flow::Next
            }
            op::SHLI => {
                self.a = self.a.wrapping_shl(imm(word) as u32);
                Flow::Next
            }
            op::SHLL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                self.a = self.a.wrapping_shl(x);
                Flow::Next
            }
            op::SHR => {
                self.a = (self.a as i32).wrapping_shr(self.b) as u32;
                Flow::Next
            }
            op::SHRI => {
                self.a = (self.a as i32).wrapping_shr(imm(word) as u32) as u32;
                Flow::Next
            }
            op::SHRL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                self.a = (self.a as i32).wrapping_shr(x) as u32;
                Flow::Next
            }
            op::SRU => {
                self.a = self.a.wrapping_shr(self.b);
                Flow::Next
            }
            op::SRUI => {
                self.a = self.a.wrapping_shr(imm(word) as u32);
                Flow::Next
            }
            op::SRUL => {
                let Some(x) = self.local_u32(imm(word)) else {
                    return Flow::Trap;
                };
                self.a = self.a.wrapping_shr(x);
                Flow::Next
            }

            // -- comparisons --------------------------------------------
            op::EQ => {
                self.a = u32::from(self.a == self.b);
                Flow::Next
            }
            op::EQF => {
                self.a = u32::from(self.f == self.g);
                Flow::Next
            }
            op::NE => {
                self.a = u32::from(self.a != self.b);
                Flow::Next
            }
            op::NEF => {
                self.a = u32::from(self.f != self.g);
                Flow::Next
            }
            op::LT => {
                self.a = u32::from((self.a as i32) < self.b as i32);
                Flow::Next
            }
            op::LTU => {
                self.a = u32::from(self.a < self.b);
                Flow::Next
            }
            op::LTF => {
                self.a = u32::from(self.f < self.g);
                Flow::Next
            }
            op::GE => {
                self.a = u32::from(self.a as i32 >= self.b as i32);
                Flow::Next
            }
            op::GEU => {
                self.a = u32::from(self.a >= self.b);
                Flow::Next
            }
            op::GEF => {
                self.a = u32::from(self.f >= self.g);
                Flow::Next
            }

            // -- branches -----------------------------------------------
            op::BZ => {
                if self.a == 0 {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BZF => {
                if self.f == 0.0 {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BNZ => {
                if self.a != 0 {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BNZF => {
                if self.f != 0.0 {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BE => {
                if self.a == self.b {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BEF => {
                if self.f == self.g {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BNE => {
                if self.a != self.b {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BNEF => {
                if self.f != self.g {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BLT => {
                if (self.a as i32) < self.b as i32 {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BLTU => {
                if self.a < self.b {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BLTF => {
                if self.f < self.g {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BGE => {
                if self.a as i32 >= self.b as i32 {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BGEU => {
                if self.a >= self.b {
                    self.take_branch(word);
                }
                Flow::Next
            }
            op::BGEF => {
                if self.f >= self.g {
                    self.take_branch(word);
                }
                Flow::Next
            }

            // -- conversions --------------------------------------------
            op::CID => {
                self.f = f64::from(self.a as i32);
                Flow::Next
            }
            op::CUD => {
                self.f = f64::from(self.a);
                Flow::Next
            }
            op::CDI => {
                self.a = self.f as i32 as u32;
                Flow::Next
            }
            op::CDU => {
                self.a = self.f as u32;
                Flow::Next
            }

            // -- float function family ----------------------------------
            op::POW => {
                self.f = self.f.powf(self.g);
                Flow::Next
            }
            op::ATN2 => {
                self.f = self.f.atan2(self.g);
                Flow::Next
            }
            op::FABS => {
                self.f = self.f.abs();
                Flow::Next
            }
            op::ATAN => {
                self.f = self.f.atan();
                Flow::Next
            }
            op::LOG => {
                if self.f != 0.0 {
                    self.f = self.f.ln();
                }
                Flow::Next
            }
            op::LOGT => {
                if self.f != 0.0 {
                    self.f = self.f.log10();
                }
                Flow::Next
            }
            op::EXP => {
                self.f = self.f.exp();
                Flow::Next
            }
            op::FLOR => {
                self.f = self.f.floor();
                Flow::Next
            }
            op::CEIL => {
                self.f = self.f.ceil();
                Flow::Next
            }
            op::HYPO => {
                self.f = self.f.hypot(self.g);
                Flow::Next
            }
            op::SIN => {
                self.f = self.f.sin();
                Flow::Next
            }
            op::COS => {
                self.f = self.f.cos();
                Flow::Next
            }
            op::TAN => {
                self.f = self.f.tan();
                Flow::Next
            }
            op::ASIN => {
                self.f = self.f.asin();
                Flow::Next
            }
            op::ACOS => {
                self.f = self.f.acos();
                Flow::Next
            }
            op::SINH => {
                self.f = self.f.sinh();
                Flow::Next
            }
            op::COSH => {
                self.f = self.f.cosh();
                Flow::Next
            }
            op::TANH => {
                self.f = self.f.tanh();
                Flow::Next
            }
            op::SQRT => {
                self.f = self.f.sqrt();
                Flow::Next
            }
            op::FMOD => {
                self.f %= self.g;
                Flow::Next
            }

            // -- console ------------------------------------------------
            op::BIN => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                self.a = self.kbchar.take().map_or(u32::MAX, u32::from);
                Flow::Next
            }
            op::BOUT => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                if self.a != 1 {
                    error!("bad write descriptor {}", self.a);
                    return Flow::Exit(Exit::BadWrite { fd: self.a });
                }
                console.write_byte(self.b as u8);
                self.a = 1;
                Flow::Next
            }

            // -- system control -----------------------------------------
            op::CYC => {
                self.a = self.cycle as u32;
                Flow::Next
            }
            op::MSIZ => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                self.a = self.mem.size();
                Flow::Next
            }
            op::CLI => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                self.a = u32::from(self.iena);
                self.iena = false;
                Flow::Next
            }
            op::STI => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                if self.ipend != 0 {
                    return match self.deliver_pending() {
                        Ok(()) => Flow::Next,
                        Err(exit) => Flow::Exit(exit),
                    };
                }
                self.iena = true;
                Flow::Next
            }
            op::RTI => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                self.swin.live = false;
                let Some(pa) = self.tr_read(self.sp) else {
                    return Flow::Exit(self.fatal("kernel stack fault on interrupt return"));
                };
                let saved_trap = self.mem.read_u32(pa & !7);
                self.sp = self.sp.wrapping_add(8);
                let Some(pa) = self.tr_read(self.sp) else {
                    return Flow::Exit(self.fatal("kernel stack fault on interrupt return"));
                };
                self.pc = self.mem.read_u32(pa & !7);
                self.sp = self.sp.wrapping_add(8);
                if saved_trap & USER != 0 {
                    self.ssp = self.sp;
                    self.sp = self.usp;
                    self.user = true;
                }
                self.mmu.flush();
                self.iwin = PageWindow::default();
                self.swin = PageWindow::default();
                if !self.iena {
                    if self.ipend != 0 {
                        return match self.deliver_pending() {
                            Ok(()) => Flow::Next,
                            Err(exit) => Flow::Exit(exit),
                        };
                    }
                    self.iena = true;
                }
                Flow::Next
            }
            op::IVEC => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                self.ivec = self.a;
                Flow::Next
            }
            op::PDIR => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                if self.a > self.mem.size() {
                    return self.raise(Fault::Mem);
                }
                self.mmu.pdir = self.a & PAGE_MASK;
                self.mmu.flush();
                self.iwin = PageWindow::default();
                self.swin = PageWindow::default();
                Flow::Next
            }
            op::SPAG => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                if self.a != 0 && self.mmu.pdir == 0 {
                    return self.raise(Fault::Mem);
                }
                self.mmu.paging = self.a != 0;
                self.mmu.flush();
                self.iwin = PageWindow::default();
                self.swin = PageWindow::default();
                Flow::Next
            }
            op::TIME => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                if imm(word) != 0 {
                    debug!(
                        "timer{} = {} timeout = {}",
                        imm(word),
                        self.timer,
                        self.timeout
                    );
                    return Flow::Next;
                }
                self.timeout = self.a;
                Flow::Next
            }
            op::LVAD => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                self.a = self.vadr;
                Flow::Next
            }
            op::TRAP => self.raise(Fault::Sys),
            op::LUSP => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                self.a = self.usp;
                Flow::Next
            }
            op::SUSP => {
                if self.user {
                    return self.raise(Fault::Priv);
                }
                self.usp = self.a;
                Flow::Next
            }
            op::SSP => {
                self.sp = self.a;
                self.swin.live = false;
                Flow::Next
            }

            _ => self.raise(Fault::Inst),
        }
    }
}
