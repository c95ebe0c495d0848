//! The PV32 opcode table and instruction-word decode helpers.
//!
//! Every instruction is one little-endian 32-bit word: the low 8 bits are
//! the opcode, the high 24 bits the immediate. Immediates are signed unless
//! an opcode says otherwise, so extraction is an arithmetic shift.

/// Number of assigned opcodes. Values `OPCODE_COUNT..=255` are illegal.
pub const OPCODE_COUNT: usize = 200;

// Control.
pub const HALT: u8 = 0;
pub const ENT: u8 = 1;
pub const LEV: u8 = 2;
pub const JMP: u8 = 3;
pub const JMPI: u8 = 4;
pub const JSR: u8 = 5;
pub const JSRA: u8 = 6;

// Stack.
pub const PSHA: u8 = 7;
pub const PSHB: u8 = 8;
pub const PSHC: u8 = 9;
pub const PSHF: u8 = 10;
pub const PSHG: u8 = 11;
pub const PSHI: u8 = 12;
pub const POPA: u8 = 13;
pub const POPB: u8 = 14;
pub const POPC: u8 = 15;
pub const POPF: u8 = 16;
pub const POPG: u8 = 17;

// Address formation.
pub const LEA: u8 = 18;
pub const LEAG: u8 = 19;

// Bulk memory (restartable).
pub const MCPY: u8 = 20;
pub const MCMP: u8 = 21;
pub const MCHR: u8 = 22;
pub const MSET: u8 = 23;

// Load A: local, global, indexed, immediate.
pub const LL: u8 = 24;
pub const LLS: u8 = 25;
pub const LLH: u8 = 26;
pub const LLC: u8 = 27;
pub const LLB: u8 = 28;
pub const LLD: u8 = 29;
pub const LLF: u8 = 30;
pub const LG: u8 = 31;
pub const LGS: u8 = 32;
pub const LGH: u8 = 33;
pub const LGC: u8 = 34;
pub const LGB: u8 = 35;
pub const LGD: u8 = 36;
pub const LGF: u8 = 37;
pub const LX: u8 = 38;
pub const LXS: u8 = 39;
pub const LXH: u8 = 40;
pub const LXC: u8 = 41;
pub const LXB: u8 = 42;
pub const LXD: u8 = 43;
pub const LXF: u8 = 44;
pub const LI: u8 = 45;
pub const LHI: u8 = 46;
pub const LIF: u8 = 47;

// Load B: local, global, indexed, immediate.
pub const LBL: u8 = 48;
pub const LBLS: u8 = 49;
pub const LBLH: u8 = 50;
pub const LBLC: u8 = 51;
pub const LBLB: u8 = 52;
pub const LBLD: u8 = 53;
pub const LBLF: u8 = 54;
pub const LBG: u8 = 55;
pub const LBGS: u8 = 56;
pub const LBGH: u8 = 57;
pub const LBGC: u8 = 58;
pub const LBGB: u8 = 59;
pub const LBGD: u8 = 60;
pub const LBGF: u8 = 61;
pub const LBX: u8 = 62;
pub const LBXS: u8 = 63;
pub const LBXH: u8 = 64;
pub const LBXC: u8 = 65;
pub const LBXB: u8 = 66;
pub const LBXD: u8 = 67;
pub const LBXF: u8 = 68;
pub const LBI: u8 = 69;
pub const LBHI: u8 = 70;
pub const LBIF: u8 = 71;

// Misc transfers.
pub const LCL: u8 = 72;
pub const LBA: u8 = 73;
pub const LCA: u8 = 74;
pub const LBAD: u8 = 75;

// Store A (or F for the float widths): local, global, indexed.
pub const SL: u8 = 76;
pub const SLH: u8 = 77;
pub const SLB: u8 = 78;
pub const SLD: u8 = 79;
pub const SLF: u8 = 80;
pub const SG: u8 = 81;
pub const SGH: u8 = 82;
pub const SGB: u8 = 83;
pub const SGD: u8 = 84;
pub const SGF: u8 = 85;
pub const SX: u8 = 86;
pub const SXH: u8 = 87;
pub const SXB: u8 = 88;
pub const SXD: u8 = 89;
pub const SXF: u8 = 90;

// Float arithmetic.
pub const ADDF: u8 = 91;
pub const SUBF: u8 = 92;
pub const MULF: u8 = 93;
pub const DIVF: u8 = 94;

// Integer ALU: register, immediate, local-memory forms.
pub const ADD: u8 = 95;
pub const ADDI: u8 = 96;
pub const ADDL: u8 = 97;
pub const SUB: u8 = 98;
pub const SUBI: u8 = 99;
pub const SUBL: u8 = 100;
pub const MUL: u8 = 101;
pub const MULI: u8 = 102;
pub const MULL: u8 = 103;
pub const DIV: u8 = 104;
pub const DIVI: u8 = 105;
pub const DIVL: u8 = 106;
pub const DVU: u8 = 107;
pub const DVUI: u8 = 108;
pub const DVUL: u8 = 109;
pub const MOD: u8 = 110;
pub const MODI: u8 = 111;
pub const MODL: u8 = 112;
pub const MDU: u8 = 113;
pub const MDUI: u8 = 114;
pub const MDUL: u8 = 115;
pub const AND: u8 = 116;
pub const ANDI: u8 = 117;
pub const ANDL: u8 = 118;
pub const OR: u8 = 119;
pub const ORI: u8 = 120;
pub const ORL: u8 = 121;
pub const XOR: u8 = 122;
pub const XORI: u8 = 123;
pub const XORL: u8 = 124;
pub const SHL: u8 = 125;
pub const SHLI: u8 = 126;
pub const SHLL: u8 = 127;
pub const SHR: u8 = 128;
pub const SHRI: u8 = 129;
pub const SHRL: u8 = 130;
pub const SRU: u8 = 131;
pub const SRUI: u8 = 132;
pub const SRUL: u8 = 133;

// Comparisons.
pub const EQ: u8 = 134;
pub const EQF: u8 = 135;
pub const NE: u8 = 136;
pub const NEF: u8 = 137;
pub const LT: u8 = 138;
pub const LTU: u8 = 139;
pub const LTF: u8 = 140;
pub const GE: u8 = 141;
pub const GEU: u8 = 142;
pub const GEF: u8 = 143;

// Conditional branches.
pub const BZ: u8 = 144;
pub const BZF: u8 = 145;
pub const BNZ: u8 = 146;
pub const BNZF: u8 = 147;
pub const BE: u8 = 148;
pub const BEF: u8 = 149;
pub const BNE: u8 = 150;
pub const BNEF: u8 = 151;
pub const BLT: u8 = 152;
pub const BLTU: u8 = 153;
pub const BLTF: u8 = 154;
pub const BGE: u8 = 155;
pub const BGEU: u8 = 156;
pub const BGEF: u8 = 157;

// Conversions.
pub const CID: u8 = 158;
pub const CUD: u8 = 159;
pub const CDI: u8 = 160;
pub const CDU: u8 = 161;

// Float function family (F op G -> F, or unary on F).
pub const POW: u8 = 162;
pub const ATN2: u8 = 163;
pub const FABS: u8 = 164;
pub const ATAN: u8 = 165;
pub const LOG: u8 = 166;
pub const LOGT: u8 = 167;
pub const EXP: u8 = 168;
pub const FLOR: u8 = 169;
pub const CEIL: u8 = 170;
pub const HYPO: u8 = 171;
pub const SIN: u8 = 172;
pub const COS: u8 = 173;
pub const TAN: u8 = 174;
pub const ASIN: u8 = 175;
pub const ACOS: u8 = 176;
pub const SINH: u8 = 177;
pub const COSH: u8 = 178;
pub const TANH: u8 = 179;
pub const SQRT: u8 = 180;
pub const FMOD: u8 = 181;

// Console device.
pub const BIN: u8 = 182;
pub const BOUT: u8 = 183;

// System control.
pub const CYC: u8 = 184;
pub const MSIZ: u8 = 185;
pub const CLI: u8 = 186;
pub const STI: u8 = 187;
pub const RTI: u8 = 188;
pub const IVEC: u8 = 189;
pub const PDIR: u8 = 190;
pub const SPAG: u8 = 191;
pub const TIME: u8 = 192;
pub const LVAD: u8 = 193;
pub const TRAP: u8 = 194;
pub const LUSP: u8 = 195;
pub const SUSP: u8 = 196;
pub const SSP: u8 = 197;
pub const NOP: u8 = 198;
pub const IDLE: u8 = 199;

/// Mnemonics indexed by opcode, for the debugger and trace logging.
pub const NAMES: [&str; OPCODE_COUNT] = [
    "HALT", "ENT", "LEV", "JMP", "JMPI", "JSR", "JSRA", "PSHA", "PSHB", "PSHC", "PSHF", "PSHG",
    "PSHI", "POPA", "POPB", "POPC", "POPF", "POPG", "LEA", "LEAG", "MCPY", "MCMP", "MCHR", "MSET",
    "LL", "LLS", "LLH", "LLC", "LLB", "LLD", "LLF", "LG", "LGS", "LGH", "LGC", "LGB", "LGD", "LGF",
    "LX", "LXS", "LXH", "LXC", "LXB", "LXD", "LXF", "LI", "LHI", "LIF", "LBL", "LBLS", "LBLH",
    "LBLC", "LBLB", "LBLD", "LBLF", "LBG", "LBGS", "LBGH", "LBGC", "LBGB", "LBGD", "LBGF", "LBX",
    "LBXS", "LBXH", "LBXC", "LBXB", "LBXD", "LBXF", "LBI", "LBHI", "LBIF", "LCL", "LBA", "LCA",
    "LBAD", "SL", "SLH", "SLB", "SLD", "SLF", "SG", "SGH", "SGB", "SGD", "SGF", "SX", "SXH", "SXB",
    "SXD", "SXF", "ADDF", "SUBF", "MULF", "DIVF", "ADD", "ADDI", "ADDL", "SUB", "SUBI", "SUBL",
    "MUL", "MULI", "MULL", "DIV", "DIVI", "DIVL", "DVU", "DVUI", "DVUL", "MOD", "MODI", "MODL",
    "MDU", "MDUI", "MDUL", "AND", "ANDI", "ANDL", "OR", "ORI", "ORL", "XOR", "XORI", "XORL", "SHL",
    "SHLI", "SHLL", "SHR", "SHRI", "SHRL", "SRU", "SRUI", "SRUL", "EQ", "EQF", "NE", "NEF", "LT",
    "LTU", "LTF", "GE", "GEU", "GEF", "BZ", "BZF", "BNZ", "BNZF", "BE", "BEF", "BNE", "BNEF",
    "BLT", "BLTU", "BLTF", "BGE", "BGEU", "BGEF", "CID", "CUD", "CDI", "CDU", "POW", "ATN2",
    "FABS", "ATAN", "LOG", "LOGT", "EXP", "FLOR", "CEIL", "HYPO", "SIN", "COS", "TAN", "ASIN",
    "ACOS", "SINH", "COSH", "TANH", "SQRT", "FMOD", "BIN", "BOUT", "CYC", "MSIZ", "CLI", "STI",
    "RTI", "IVEC", "PDIR", "SPAG", "TIME", "LVAD", "TRAP", "LUSP", "SUSP", "SSP", "NOP", "IDLE",
];

/// Returns the mnemonic for an opcode, or `None` for an illegal one.
#[must_use]
pub fn name(op: u8) -> Option<&'static str> {
    NAMES.get(usize::from(op)).copied()
}

/// Extracts the opcode byte from an instruction word.
#[inline]
#[must_use]
pub const fn opcode(word: u32) -> u8 {
    word as u8
}

/// Extracts the signed immediate: the high 24 bits, sign-extended.
#[inline]
#[must_use]
pub const fn imm(word: u32) -> i32 {
    (word as i32) >> 8
}

/// Extracts the immediate without sign extension (`LHI`/`LBHI`).
#[inline]
#[must_use]
pub const fn uimm(word: u32) -> u32 {
    word >> 8
}

/// Branch and jump displacement in bytes, relative to the address of the
/// following instruction. The low two bits of the encoded word-granular
/// displacement are dropped, so a misassembled odd displacement cannot
/// produce an unaligned target.
#[inline]
#[must_use]
pub const fn branch_disp(word: u32) -> i32 {
    ((word as i32) >> 10) << 2
}

/// Packs an opcode and signed immediate into an instruction word.
///
/// The inverse of [`opcode`]/[`imm`]; the assembler and the test suites
/// build images with it.
#[inline]
#[must_use]
pub const fn encode(op: u8, imm: i32) -> u32 {
    ((imm as u32) << 8) | op as u32
}
