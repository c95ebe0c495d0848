//! Paging suite: translation through guest-built page tables, permission
//! separation between rings, dirty-bit promotion, restartable faults, and
//! the flush triggers.

use pv32_core::opcode::{self as op, encode};
use pv32_core::{
    Exit, Machine, NullConsole, FS_BYTES, HEADER_BYTES, IMAGE_MAGIC, PAGE_SIZE, PTE_A, PTE_D,
    PTE_P, PTE_U, PTE_W, USER,
};

use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const MEM_BYTES: u32 = FS_BYTES + 16 * PAGE_SIZE;

/// Physical locations used by every test here: a directory page, one
/// table page, and a kernel stack page below the top of mapped memory.
const PDIR_BASE: u32 = 0x1000;
const PTAB_BASE: u32 = 0x2000;
const KSTACK_TOP: u32 = 0xF000;

fn image_bytes(entry: u32, words: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_BYTES + words.len() * 4);
    for field in [IMAGE_MAGIC, 0, entry, 0] {
        bytes.extend_from_slice(&field.to_le_bytes());
    }
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

fn boot(words: &[u32]) -> Machine {
    let mut machine = Machine::new(MEM_BYTES);
    machine
        .load_image(&image_bytes(0, words))
        .expect("test image loads");
    machine
}

/// Maps `vpage` to `ppage` in the shared single table page.
fn map(machine: &mut Machine, vpage: u32, ppage: u32, flags: u32) {
    machine
        .mem_mut()
        .write_u32(PTAB_BASE + vpage * 4, ppage * PAGE_SIZE | flags);
}

/// Installs the directory entry covering the low 4 MiB with full
/// permissions; per-page rights come from the table entries.
fn install_directory(machine: &mut Machine) {
    machine
        .mem_mut()
        .write_u32(PDIR_BASE, PTAB_BASE | PTE_P | PTE_W | PTE_U);
}

const fn pte_addr(vpage: u32) -> u32 {
    PTAB_BASE + vpage * 4
}

// Scenario: a store to a readable-but-not-writeable page faults FWPAGE
// with the store's own PC saved; the handler grants write access and
// returns, and the store then commits with the dirty bit promoted. The
// whole flow runs through the guest-visible PDIR/SPAG opcodes.
#[test]
fn write_fault_restarts_and_promotes_dirty() {
    let mut machine = boot(&[
        encode(op::LI, PDIR_BASE as i32),  // 0
        encode(op::PDIR, 0),               // 4
        encode(op::LI, 64),                // 8
        encode(op::IVEC, 0),               // 12
        encode(op::STI, 0),                // 16
        encode(op::LI, 1),                 // 20
        encode(op::SPAG, 0),               // 24: paging on
        encode(op::LBI, 0x3000),           // 28
        encode(op::LI, 0xAB),              // 32
        encode(op::SX, 0),                 // 36: faults, restarts, commits
        encode(op::HALT, 0),               // 40
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::PSHA, 0),                 // 64: handler saves A
        encode(op::LI, pte_addr(3) as i32),  // 68
        encode(op::LX, 0),                   // 72: a = pte
        encode(op::ORI, PTE_W as i32),       // 76
        encode(op::LBI, pte_addr(3) as i32), // 80
        encode(op::SX, 0),                   // 84: pte |= W
        encode(op::POPA, 0),                 // 88
        encode(op::RTI, 0),                  // 92
    ]);
    install_directory(&mut machine);
    map(&mut machine, 0, 0, PTE_P);           // code
    map(&mut machine, 2, 2, PTE_P | PTE_W);   // the table page itself
    map(&mut machine, 3, 3, PTE_P);           // target: readable only
    map(&mut machine, 15, 15, PTE_P | PTE_W); // supervisor stack

    assert_eq!(machine.run(&mut NullConsole), Exit::Halt { code: 0xAB });
    assert_eq!(machine.vadr(), 0x3000);
    assert_eq!(machine.mem().read_u8(0x3000), 0xAB, "store committed");

    // Delivery context on the supervisor stack: the store's PC, FWPAGE.
    assert_eq!(machine.mem().read_u32(0x1_0000 - 8), 36);
    assert_eq!(machine.mem().read_u32(0x1_0000 - 16), 8);

    let pte = machine.mem().read_u32(pte_addr(3));
    assert_eq!(pte & (PTE_D | PTE_A), PTE_D | PTE_A, "write promoted D and A");
}

// Scenario: bulk copy with the second destination page unmapped. The
// first page-sized quantum commits; A, B, C describe the suffix.
#[test]
fn mcpy_fault_leaves_resumable_registers() {
    let mut machine = boot(&[
        encode(op::LI, 64),   // 0
        encode(op::IVEC, 0),  // 4
        encode(op::STI, 0),   // 8
        encode(op::MCPY, 0),  // 12
        encode(op::HALT, 0),  // 16
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::HALT, 0), // 64: fault handler just stops
    ]);
    install_directory(&mut machine);
    map(&mut machine, 0, 0, PTE_P);
    map(&mut machine, 5, 5, PTE_P); // source, both pages
    map(&mut machine, 6, 6, PTE_P);
    map(&mut machine, 8, 8, PTE_P | PTE_W); // destination page one
    // destination page two (vpage 9) left unmapped
    map(&mut machine, 15, 15, PTE_P | PTE_W);
    for k in 0..2 * PAGE_SIZE {
        machine.mem_mut().write_u8(5 * PAGE_SIZE + k, (k % 253) as u8);
    }
    machine.set_paging(PDIR_BASE, true);
    machine.set_a(8 * PAGE_SIZE);
    machine.set_b(5 * PAGE_SIZE);
    machine.set_c(2 * PAGE_SIZE);

    machine.run(&mut NullConsole);

    assert_eq!(machine.trap(), 8, "FWPAGE on the second page");
    assert_eq!(machine.vadr(), 9 * PAGE_SIZE);
    assert_eq!(machine.c(), PAGE_SIZE, "one quantum left");
    assert_eq!(machine.a(), 9 * PAGE_SIZE);
    assert_eq!(machine.b(), 6 * PAGE_SIZE);
    assert_eq!(machine.mem().read_u32(KSTACK_TOP + PAGE_SIZE - 8), 12, "MCPY's own PC saved");
    let bytes = machine.mem().bytes();
    assert_eq!(
        &bytes[8 * PAGE_SIZE as usize..9 * PAGE_SIZE as usize],
        &bytes[5 * PAGE_SIZE as usize..6 * PAGE_SIZE as usize],
        "first quantum committed",
    );
}

// Scenario: a privileged opcode in user mode delivers FPRIV with the USER
// bit, saving the opcode's own PC on the supervisor stack.
#[test]
fn user_mode_privileged_opcode_faults_with_user_bit() {
    let mut machine = boot(&[
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::HALT, 0), // 64: supervisor handler
    ]);
    install_directory(&mut machine);
    map(&mut machine, 0, 0, PTE_P);               // kernel handler code
    map(&mut machine, 4, 4, PTE_P | PTE_U);       // user code
    map(&mut machine, 14, 14, PTE_P | PTE_W);     // kernel stack
    machine.mem_mut().write_u32(0x4000, encode(op::IVEC, 0));

    machine.set_paging(PDIR_BASE, true);
    machine.set_user(true);
    machine.set_ssp(KSTACK_TOP);
    machine.set_sp(0x5000);
    machine.set_iena(true);
    machine.set_ivec(64);
    machine.set_pc(0x4000);

    assert_eq!(machine.run(&mut NullConsole), Exit::Halt { code: 0 });
    assert!(!machine.user(), "delivery switched to supervisor");
    assert_eq!(machine.trap(), 3 | USER);
    assert_eq!(machine.usp(), 0x5000, "user SP parked in USP");
    assert_eq!(machine.mem().read_u32(KSTACK_TOP - 8), 0x4000, "IVEC's guest PC");
    assert_eq!(machine.mem().read_u32(KSTACK_TOP - 16), 3 | USER);
}

#[test]
fn user_read_of_a_supervisor_page_faults_rpage_user() {
    let mut machine = boot(&[
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::HALT, 0), // 64
    ]);
    install_directory(&mut machine);
    map(&mut machine, 0, 0, PTE_P);
    map(&mut machine, 3, 3, PTE_P);           // no PTE_U: supervisor only
    map(&mut machine, 4, 4, PTE_P | PTE_U);
    map(&mut machine, 14, 14, PTE_P | PTE_W);
    machine.mem_mut().write_u32(0x4000, encode(op::LI, 0x3000));
    machine.mem_mut().write_u32(0x4004, encode(op::LX, 0));

    machine.set_paging(PDIR_BASE, true);
    machine.set_user(true);
    machine.set_ssp(KSTACK_TOP);
    machine.set_iena(true);
    machine.set_ivec(64);
    machine.set_pc(0x4000);

    machine.run(&mut NullConsole);
    assert_eq!(machine.trap(), 9 | USER, "FRPAGE from user mode");
    assert_eq!(machine.vadr(), 0x3000);
    assert_eq!(machine.a(), 0x3000, "destination register untouched");
}

// Property: RTI drops cached translations, so a permission change made by
// the handler is visible immediately after return.
#[test]
fn rti_flushes_cached_translations() {
    let mut machine = boot(&[
        encode(op::LBI, 0x3000),            // 0
        encode(op::LI, 1),                  // 4
        encode(op::SX, 0),                  // 8: caches a write slot
        encode(op::LI, 64),                 // 12
        encode(op::IVEC, 0),                // 16
        encode(op::STI, 0),                 // 20
        encode(op::LBI, pte_addr(3) as i32), // 24
        encode(op::LI, (3 * PAGE_SIZE | PTE_P) as i32), // 28: W cleared
        encode(op::SX, 0),                  // 32
        encode(op::PSHI, 48),               // 36: resume PC
        encode(op::PSHI, 0),                // 40: saved trap
        encode(op::RTI, 0),                 // 44
        encode(op::LBI, 0x3000),            // 48
        encode(op::LI, 2),                  // 52
        encode(op::SX, 0),                  // 56: must fault now
        encode(op::HALT, 0),                // 60: unreachable on fault
        encode(op::HALT, 0),                // 64: handler
    ]);
    install_directory(&mut machine);
    map(&mut machine, 0, 0, PTE_P);
    map(&mut machine, 2, 2, PTE_P | PTE_W);
    map(&mut machine, 3, 3, PTE_P | PTE_W);
    map(&mut machine, 15, 15, PTE_P | PTE_W);
    machine.set_paging(PDIR_BASE, true);

    assert_eq!(machine.run(&mut NullConsole), Exit::Halt { code: 2 });
    assert_eq!(machine.trap(), 8, "stale write slot would have let this through");
    assert_eq!(machine.vadr(), 0x3000);
    assert_eq!(machine.mem().read_u8(0x3000), 1, "second store never committed");
}

#[test]
fn pdir_reload_flushes_cached_translations() {
    let mut machine = boot(&[
        encode(op::LBI, 0x3000),            // 0
        encode(op::LI, 1),                  // 4
        encode(op::SX, 0),                  // 8: caches a write slot
        encode(op::LI, 64),                 // 12
        encode(op::IVEC, 0),                // 16
        encode(op::STI, 0),                 // 20
        encode(op::LBI, pte_addr(3) as i32), // 24
        encode(op::LI, (3 * PAGE_SIZE | PTE_P) as i32), // 28
        encode(op::SX, 0),                  // 32
        encode(op::LI, PDIR_BASE as i32),   // 36
        encode(op::PDIR, 0),                // 40: reload flushes
        encode(op::LBI, 0x3000),            // 44
        encode(op::LI, 2),                  // 48
        encode(op::SX, 0),                  // 52: must fault now
        encode(op::HALT, 0),                // 56
        encode(op::NOP, 0),
        encode(op::HALT, 0),                // 64: handler
    ]);
    install_directory(&mut machine);
    map(&mut machine, 0, 0, PTE_P);
    map(&mut machine, 2, 2, PTE_P | PTE_W);
    map(&mut machine, 3, 3, PTE_P | PTE_W);
    map(&mut machine, 15, 15, PTE_P | PTE_W);
    machine.set_paging(PDIR_BASE, true);

    assert_eq!(machine.run(&mut NullConsole), Exit::Halt { code: 2 });
    assert_eq!(machine.trap(), 8);
}

#[test]
fn instruction_fetch_from_unmapped_page_is_fipage() {
    let mut machine = boot(&[
        encode(op::LI, 64),                   // 0
        encode(op::IVEC, 0),                  // 4
        encode(op::STI, 0),                   // 8
        encode(op::JMP, 0x9000 - 12 - 4),     // 12: jump to the void
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::HALT, 0), // 64
    ]);
    install_directory(&mut machine);
    map(&mut machine, 0, 0, PTE_P);
    map(&mut machine, 15, 15, PTE_P | PTE_W);
    machine.set_paging(PDIR_BASE, true);
    machine.set_sp(KSTACK_TOP + PAGE_SIZE);

    machine.run(&mut NullConsole);
    assert_eq!(machine.trap(), 7, "FIPAGE");
    assert_eq!(machine.vadr(), 0x9000);
    assert_eq!(
        machine.mem().read_u32(KSTACK_TOP + PAGE_SIZE - 8),
        0x9000,
        "the unfetchable PC itself is saved",
    );
}

#[test]
fn spag_without_a_directory_faults_fmem() {
    let mut machine = boot(&[
        encode(op::LI, 64),  // 0
        encode(op::IVEC, 0), // 4
        encode(op::STI, 0),  // 8
        encode(op::LI, 1),   // 12
        encode(op::SPAG, 0), // 16: no PDIR was set
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::NOP, 0),
        encode(op::HALT, 0), // 64
    ]);
    machine.run(&mut NullConsole);
    assert_eq!(machine.trap(), 0, "FMEM");
    assert!(!machine.paging());
    assert_eq!(machine.a(), 1, "A untouched by the faulting SPAG");
    assert_eq!(machine.mem().read_u32(MEM_BYTES - FS_BYTES - 8), 16);
}

#[test]
fn dirty_bit_appears_only_after_a_real_write() {
    let mut machine = boot(&[
        encode(op::LI, 0x3000),  // 0
        encode(op::LX, 0),       // 4: read from the page
        encode(op::LBI, 0x3000), // 8
        encode(op::LI, 0x11),    // 12
        encode(op::SX, 0),       // 16: first real write
        encode(op::HALT, 0),     // 20
    ]);
    install_directory(&mut machine);
    map(&mut machine, 0, 0, PTE_P);
    map(&mut machine, 3, 3, PTE_P | PTE_W);
    map(&mut machine, 15, 15, PTE_P | PTE_W);
    machine.set_paging(PDIR_BASE, true);

    let mut console = NullConsole;
    // After the read the page is accessed but still clean.
    while machine.pc() != 8 {
        machine.step(&mut console);
    }
    let pte = machine.mem().read_u32(pte_addr(3));
    assert_eq!(pte & PTE_A, PTE_A);
    assert_eq!(pte & PTE_D, 0, "read must not dirty the page");

    machine.run(&mut console);
    let pte = machine.mem().read_u32(pte_addr(3));
    assert_eq!(pte & PTE_D, PTE_D, "write promoted the dirty bit");
    assert_eq!(machine.mem().read_u8(0x3000), 0x11);
}
