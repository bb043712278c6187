//! Target polymorphism (§4.10, §9 "Target polymorphism by types").
//!
//! The teacher hardcodes `EM_X86_64` and three relocation forms directly in
//! `link.rs`'s write path. A linker claiming multi-target support needs the
//! per-relocation code to dispatch on a target's own psABI, so this module
//! generalizes that into a `Target` trait plus one implementation per
//! architecture family, selected once per link (`by_e_machine`/
//! `by_emulation`) and threaded through `Context` as `&'static dyn Target`.
//! A `dyn` trait object is used rather than the generics-based
//! monomorphization the design notes call out as the faster option: every
//! other pass already carries `Context` (and thus the target) as a plain
//! value rather than a type parameter, and threading a target type
//! parameter through `gc`/`icf`/`layout`/`writer` would mean either
//! generic-izing the whole pipeline or duplicating it per architecture.
//! The relocation applier is the one part of this crate hot enough for that
//! tradeoff to matter, and it is reached once per live relocation rather
//! than once per instruction, so the vtable indirection here is cheap
//! relative to the rest of the pass.
//!
//! Relocation coverage below targets the direct (non-dynamic) forms: S+A,
//! S+A-P, and the range-limited branch types that drive thunk insertion,
//! plus the GOT-relative family for the two targets `src/got.rs` allocates
//! slots for (x86-64, AArch64). PLT/TLS slot allocation is still not wired
//! into `chunks`/`layout` (see DESIGN.md), and the remaining targets' own
//! GOT-relative relocation types still report [`UnsupportedRelocation`]
//! rather than guessing at an encoding this crate hasn't verified against
//! that architecture's psABI.

use crate::opt::OutputKind;

/// Inputs to a single relocation application, assembled by the writer from
/// a resolved symbol/thunk address and the relocation record.
pub struct RelocContext<'a> {
    /// Resolved value of the relocation's symbol (or thunk stand-in).
    pub s: u64,
    /// Addend, explicit (`RELA`) or already folded in by the reader.
    pub a: i64,
    /// Address of the relocation site itself (`P` in psABI formulas).
    pub p: u64,
    /// GOT entry address, when one has been allocated for this symbol.
    pub got: Option<u64>,
    /// PLT entry address, when one has been allocated for this symbol.
    pub plt: Option<u64>,
    /// Thread-pointer-relative offset, for TLS relocations.
    pub tp_offset: Option<u64>,
    /// The bytes to patch, truncated to at most the field width any
    /// relocation on this target could need.
    pub bytes: &'a mut [u8],
}

/// A relocation type this target has no application logic for, or one that
/// needs a GOT/PLT/TLS slot the pipeline hasn't allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsupportedRelocation;

pub type RelocResult = Result<(), UnsupportedRelocation>;

/// Per-architecture parameters and relocation semantics (§4.10).
pub trait Target: Send + Sync {
    fn name(&self) -> &'static str;
    fn e_machine(&self) -> u16;
    fn is_64(&self) -> bool;
    fn endianness(&self) -> object::Endianness;
    fn big_endian(&self) -> bool {
        matches!(self.endianness(), object::Endianness::Big)
    }
    /// Page size governing segment alignment (§4.9).
    fn page_size(&self) -> u64 {
        0x1000
    }
    /// Default image base for a non-PIE executable; `0` for `-shared`/`-pie`
    /// outputs, which are always position-independent.
    fn default_base_address(&self, kind: OutputKind) -> u64;
    /// `None` for targets whose direct-branch encoding reaches the whole
    /// address space in practice (x86-64, i386, S390X, SPARC64, M68K);
    /// `Some(range)` for the targets §4.9 names as needing thunks, where
    /// `range` is the largest `|target - site|` a direct branch encodes.
    fn max_branch_range(&self) -> Option<u64> {
        None
    }
    /// True if `r_type` is a direct-branch relocation subject to
    /// `max_branch_range`.
    fn is_range_limited_branch(&self, r_type: u32) -> bool {
        let _ = r_type;
        false
    }
    /// True if `r_type` is emitted by a call/jump instruction rather than
    /// one that materializes a data pointer — `--icf=safe`'s "address not
    /// taken" test (§4.6) excludes a section from folding only when some
    /// relocation against its symbol is *not* one of these. Defaults to
    /// `is_range_limited_branch`, since every range-limited target's only
    /// branch relocation type is exactly the one this also needs; targets
    /// with a direct call/jump form that isn't range-limited (x86-64,
    /// i386, SPARC64) override this separately.
    fn is_branch_relocation(&self, r_type: u32) -> bool {
        self.is_range_limited_branch(r_type)
    }
    /// True if `r_type` addresses its symbol indirectly through a GOT slot
    /// (`src/got.rs` allocates one entry per distinct symbol name any such
    /// relocation targets, and the writer fills `RelocContext::got` with
    /// that entry's absolute address before applying this relocation).
    fn is_got_relocation(&self, r_type: u32) -> bool {
        let _ = r_type;
        false
    }
    /// Synthesize a thunk at `thunk_addr` that branches unconditionally to
    /// `target`, for range-limited architectures only.
    fn make_thunk(&self, thunk_addr: u64, target: u64) -> Vec<u8> {
        let _ = (thunk_addr, target);
        Vec::new()
    }
    /// Apply one relocation, patching `ctx.bytes` in place.
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult;
}

// ---------------------------------------------------------------------
// Byte-patching helpers shared across targets.
// ---------------------------------------------------------------------

fn read_u32(bytes: &[u8], big_endian: bool) -> Option<u32> {
    let b: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
    Some(if big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) })
}

fn write_u32(bytes: &mut [u8], value: u32, big_endian: bool) -> RelocResult {
    if bytes.len() < 4 {
        return Err(UnsupportedRelocation);
    }
    bytes[..4].copy_from_slice(&if big_endian { value.to_be_bytes() } else { value.to_le_bytes() });
    Ok(())
}

/// Absolute/PC-relative write of `value` truncated to `width` bytes (1, 2,
/// 4, or 8), the shape every architecture's plain `ABSxx`/`PCxx` relocation
/// family shares.
fn write_int(bytes: &mut [u8], width: usize, value: i64, big_endian: bool) -> RelocResult {
    if bytes.len() < width {
        return Err(UnsupportedRelocation);
    }
    match width {
        1 => {
            bytes[0] = value as u8;
            Ok(())
        }
        2 => {
            let v = value as u16;
            bytes[..2].copy_from_slice(&if big_endian { v.to_be_bytes() } else { v.to_le_bytes() });
            Ok(())
        }
        4 => {
            let v = value as u32;
            bytes[..4].copy_from_slice(&if big_endian { v.to_be_bytes() } else { v.to_le_bytes() });
            Ok(())
        }
        8 => {
            let v = value as u64;
            bytes[..8].copy_from_slice(&if big_endian { v.to_be_bytes() } else { v.to_le_bytes() });
            Ok(())
        }
        _ => Err(UnsupportedRelocation),
    }
}

/// Read-modify-write a 32-bit instruction word: keep the bits in `!mask`,
/// replace the bits in `mask` with `value` (already shifted into place).
fn patch_insn32(bytes: &mut [u8], big_endian: bool, mask: u32, value: u32) -> RelocResult {
    let insn = read_u32(bytes, big_endian).ok_or(UnsupportedRelocation)?;
    let patched = (insn & !mask) | (value & mask);
    write_u32(bytes, patched, big_endian)
}

// ---------------------------------------------------------------------
// x86-64
// ---------------------------------------------------------------------

pub struct X86_64Target;

pub static X86_64: X86_64Target = X86_64Target;

mod x86_64_reloc {
    pub const NONE: u32 = 0;
    pub const R64: u32 = 1; // S + A
    pub const PC32: u32 = 2; // S + A - P
    pub const GOT32: u32 = 3; // G + A (unused: offset-from-GOT-base form, not allocated here)
    pub const PLT32: u32 = 4; // S + A - P (no PLT stub synthesized yet)
    pub const GOTPCREL: u32 = 9; // G + GOT + A - P
    pub const R32: u32 = 10; // S + A, truncated
    pub const R32S: u32 = 11; // S + A, sign-extended
    pub const R16: u32 = 12;
    pub const PC16: u32 = 13;
    pub const R8: u32 = 14;
    pub const PC8: u32 = 15;
    pub const PC64: u32 = 24;
    pub const GOTPCRELX: u32 = 41; // same formula as GOTPCREL, relaxable form
    pub const REX_GOTPCRELX: u32 = 42; // same formula, REX-prefixed encoding
}

impl Target for X86_64Target {
    fn name(&self) -> &'static str {
        "elf_x86_64"
    }
    fn e_machine(&self) -> u16 {
        object::elf::EM_X86_64
    }
    fn is_64(&self) -> bool {
        true
    }
    fn endianness(&self) -> object::Endianness {
        object::Endianness::Little
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x400000,
            _ => 0,
        }
    }
    fn is_got_relocation(&self, r_type: u32) -> bool {
        matches!(r_type, x86_64_reloc::GOTPCREL | x86_64_reloc::GOTPCRELX | x86_64_reloc::REX_GOTPCRELX)
    }
    fn is_branch_relocation(&self, r_type: u32) -> bool {
        r_type == x86_64_reloc::PLT32
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use x86_64_reloc::*;
        let s = ctx.s as i64;
        let pcrel = s + ctx.a - ctx.p as i64;
        match r_type {
            NONE => Ok(()),
            R64 | PC64 => write_int(ctx.bytes, 8, if r_type == R64 { s + ctx.a } else { pcrel }, false),
            R32 | R32S => write_int(ctx.bytes, 4, s + ctx.a, false),
            PC32 | PLT32 => write_int(ctx.bytes, 4, pcrel, false),
            R16 => write_int(ctx.bytes, 2, s + ctx.a, false),
            PC16 => write_int(ctx.bytes, 2, pcrel, false),
            R8 => write_int(ctx.bytes, 1, s + ctx.a, false),
            PC8 => write_int(ctx.bytes, 1, pcrel, false),
            // G + GOT + A - P: `ctx.got` is already the entry's absolute
            // address (GOT + G folded together by `src/got.rs`/the writer).
            GOTPCREL | GOTPCRELX | REX_GOTPCRELX => {
                let got = ctx.got.ok_or(UnsupportedRelocation)?;
                write_int(ctx.bytes, 4, got as i64 + ctx.a - ctx.p as i64, false)
            }
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// i386
// ---------------------------------------------------------------------

pub struct I386Target;

pub static I386: I386Target = I386Target;

mod i386_reloc {
    pub const NONE: u32 = 0;
    pub const R32: u32 = 1; // S + A
    pub const PC32: u32 = 2; // S + A - P
    pub const PLT32: u32 = 4;
    pub const R16: u32 = 20;
    pub const PC16: u32 = 21;
    pub const R8: u32 = 22;
    pub const PC8: u32 = 23;
}

impl Target for I386Target {
    fn name(&self) -> &'static str {
        "elf_i386"
    }
    fn e_machine(&self) -> u16 {
        object::elf::EM_386
    }
    fn is_64(&self) -> bool {
        false
    }
    fn endianness(&self) -> object::Endianness {
        object::Endianness::Little
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x08048000,
            _ => 0,
        }
    }
    fn is_branch_relocation(&self, r_type: u32) -> bool {
        r_type == i386_reloc::PLT32
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use i386_reloc::*;
        let s = ctx.s as i64;
        let pcrel = s + ctx.a - ctx.p as i64;
        match r_type {
            NONE => Ok(()),
            R32 => write_int(ctx.bytes, 4, s + ctx.a, false),
            PC32 | PLT32 => write_int(ctx.bytes, 4, pcrel, false),
            R16 => write_int(ctx.bytes, 2, s + ctx.a, false),
            PC16 => write_int(ctx.bytes, 2, pcrel, false),
            R8 => write_int(ctx.bytes, 1, s + ctx.a, false),
            PC8 => write_int(ctx.bytes, 1, pcrel, false),
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// AArch64
// ---------------------------------------------------------------------

pub struct Aarch64Target {
    pub big_endian: bool,
}

pub static AARCH64_LE: Aarch64Target = Aarch64Target { big_endian: false };
pub static AARCH64_BE: Aarch64Target = Aarch64Target { big_endian: true };

mod aarch64_reloc {
    pub const NONE: u32 = 0;
    pub const ABS64: u32 = 0x101;
    pub const ABS32: u32 = 0x102;
    pub const ABS16: u32 = 0x103;
    pub const PREL64: u32 = 0x104;
    pub const PREL32: u32 = 0x105;
    pub const PREL16: u32 = 0x106;
    pub const CALL26: u32 = 0x11a;
    pub const JUMP26: u32 = 0x11b;
    pub const ADR_GOT_PAGE: u32 = 0x137; // ADRP to the GOT entry's page
    pub const LD64_GOT_LO12_NC: u32 = 0x138; // LDR (64-bit, unsigned offset) low-12 of the entry
}

/// Page-align an address down to its containing 4KiB page, the unit
/// `ADRP`'s own immediate is scaled by.
fn aarch64_page(addr: u64) -> u64 {
    addr & !0xfff
}

/// Split a 21-bit signed page-count delta into `ADRP`'s `immlo`(2)/`immhi`(19)
/// fields and shift each into its instruction position.
fn aarch64_encode_adrp_imm(page_delta: i64) -> u32 {
    let imm21 = (page_delta as u32) & 0x1f_ffff;
    let immlo = imm21 & 0x3;
    let immhi = (imm21 >> 2) & 0x7_ffff;
    (immlo << 29) | (immhi << 5)
}

/// ±128MiB: 26-bit signed word (4-byte) displacement field shared by `BL`
/// (`CALL26`) and `B` (`JUMP26`).
const AARCH64_BRANCH_RANGE: u64 = 1 << 27;

impl Target for Aarch64Target {
    fn name(&self) -> &'static str {
        if self.big_endian { "aarch64_be" } else { "aarch64" }
    }
    fn e_machine(&self) -> u16 {
        object::elf::EM_AARCH64
    }
    fn is_64(&self) -> bool {
        true
    }
    fn endianness(&self) -> object::Endianness {
        if self.big_endian { object::Endianness::Big } else { object::Endianness::Little }
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x400000,
            _ => 0,
        }
    }
    fn max_branch_range(&self) -> Option<u64> {
        Some(AARCH64_BRANCH_RANGE)
    }
    fn is_range_limited_branch(&self, r_type: u32) -> bool {
        matches!(r_type, aarch64_reloc::CALL26 | aarch64_reloc::JUMP26)
    }
    fn is_got_relocation(&self, r_type: u32) -> bool {
        matches!(r_type, aarch64_reloc::ADR_GOT_PAGE | aarch64_reloc::LD64_GOT_LO12_NC)
    }
    fn make_thunk(&self, thunk_addr: u64, target: u64) -> Vec<u8> {
        let _ = thunk_addr;
        // `ldr x16, #8` / `br x16` / `.dword target`: the standard
        // literal-pool veneer also used for PLT entries on this target.
        let mut out = Vec::with_capacity(16);
        let ldr: u32 = 0x5800_0050;
        let br: u32 = 0xd61f_0200;
        out.extend_from_slice(&if self.big_endian { ldr.to_be_bytes() } else { ldr.to_le_bytes() });
        out.extend_from_slice(&if self.big_endian { br.to_be_bytes() } else { br.to_le_bytes() });
        out.extend_from_slice(&if self.big_endian { target.to_be_bytes() } else { target.to_le_bytes() });
        out
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use aarch64_reloc::*;
        let s = ctx.s as i64;
        let abs = s + ctx.a;
        let pcrel = abs - ctx.p as i64;
        match r_type {
            NONE => Ok(()),
            ABS64 => write_int(ctx.bytes, 8, abs, self.big_endian),
            ABS32 => write_int(ctx.bytes, 4, abs, self.big_endian),
            ABS16 => write_int(ctx.bytes, 2, abs, self.big_endian),
            PREL64 => write_int(ctx.bytes, 8, pcrel, self.big_endian),
            PREL32 => write_int(ctx.bytes, 4, pcrel, self.big_endian),
            PREL16 => write_int(ctx.bytes, 2, pcrel, self.big_endian),
            CALL26 | JUMP26 => {
                let imm26 = ((pcrel >> 2) as u32) & 0x03ff_ffff;
                patch_insn32(ctx.bytes, self.big_endian, 0x03ff_ffff, imm26)
            }
            // `ADRP`: page(GOT entry) - page(site), as a 21-bit signed
            // page-count split into the immlo/immhi fields.
            ADR_GOT_PAGE => {
                let got = ctx.got.ok_or(UnsupportedRelocation)?;
                let page_delta = (aarch64_page((got as i64 + ctx.a) as u64) as i64 - aarch64_page(ctx.p) as i64) >> 12;
                patch_insn32(ctx.bytes, self.big_endian, 0x60ff_ffe0, aarch64_encode_adrp_imm(page_delta))
            }
            // `LDR (64-bit, unsigned offset)`: low 12 bits of the entry's
            // address, scaled by 8 (the 64-bit variant's `size` field).
            LD64_GOT_LO12_NC => {
                let got = ctx.got.ok_or(UnsupportedRelocation)?;
                let off = ((got as i64 + ctx.a) as u64) & 0xfff;
                let imm12 = ((off >> 3) as u32) & 0xfff;
                patch_insn32(ctx.bytes, self.big_endian, 0x003f_fc00, imm12 << 10)
            }
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// ARM32
// ---------------------------------------------------------------------

pub struct Arm32Target {
    pub big_endian: bool,
}

pub static ARM32_LE: Arm32Target = Arm32Target { big_endian: false };
pub static ARM32_BE: Arm32Target = Arm32Target { big_endian: true };

mod arm_reloc {
    pub const NONE: u32 = 0;
    pub const ABS32: u32 = 2; // S + A
    pub const REL32: u32 = 3; // S + A - P
    pub const CALL: u32 = 28; // BL, 24-bit word-offset field
    pub const JUMP24: u32 = 29; // B, same field layout as CALL
}

/// ±32MiB: 24-bit signed word (4-byte) displacement field in `BL`/`B`.
const ARM32_BRANCH_RANGE: u64 = 1 << 25;

impl Target for Arm32Target {
    fn name(&self) -> &'static str {
        if self.big_endian { "armeb" } else { "arm" }
    }
    fn e_machine(&self) -> u16 {
        object::elf::EM_ARM
    }
    fn is_64(&self) -> bool {
        false
    }
    fn endianness(&self) -> object::Endianness {
        if self.big_endian { object::Endianness::Big } else { object::Endianness::Little }
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x10000,
            _ => 0,
        }
    }
    fn max_branch_range(&self) -> Option<u64> {
        Some(ARM32_BRANCH_RANGE)
    }
    fn is_range_limited_branch(&self, r_type: u32) -> bool {
        matches!(r_type, arm_reloc::CALL | arm_reloc::JUMP24)
    }
    fn make_thunk(&self, thunk_addr: u64, target: u64) -> Vec<u8> {
        let _ = (thunk_addr, target);
        // `ldr pc, [pc, #-4]` followed by the absolute target as a literal
        // word: an unconditional, range-independent long-branch veneer
        // (the same family GNU ld calls `long_branch_any_any`).
        let insn: u32 = 0xe51f_f004;
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&if self.big_endian { insn.to_be_bytes() } else { insn.to_le_bytes() });
        out.extend_from_slice(&if self.big_endian { (target as u32).to_be_bytes() } else { (target as u32).to_le_bytes() });
        out
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use arm_reloc::*;
        let s = ctx.s as i64;
        let abs = s + ctx.a;
        match r_type {
            NONE => Ok(()),
            ABS32 => write_int(ctx.bytes, 4, abs, self.big_endian),
            REL32 => write_int(ctx.bytes, 4, abs - ctx.p as i64, self.big_endian),
            CALL | JUMP24 => {
                // ARM's PC reads 8 ahead of the branch instruction itself.
                let disp = (abs - ctx.p as i64 - 8) >> 2;
                let imm24 = (disp as u32) & 0x00ff_ffff;
                patch_insn32(ctx.bytes, self.big_endian, 0x00ff_ffff, imm24)
            }
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// RISC-V
// ---------------------------------------------------------------------

pub struct RiscvTarget {
    pub is_64: bool,
    pub big_endian: bool,
}

pub static RISCV64_LE: RiscvTarget = RiscvTarget { is_64: true, big_endian: false };
pub static RISCV64_BE: RiscvTarget = RiscvTarget { is_64: true, big_endian: true };
pub static RISCV32_LE: RiscvTarget = RiscvTarget { is_64: false, big_endian: false };
pub static RISCV32_BE: RiscvTarget = RiscvTarget { is_64: false, big_endian: true };

mod riscv_reloc {
    pub const NONE: u32 = 0;
    pub const R32: u32 = 1; // S + A
    pub const R64: u32 = 2; // S + A
    pub const JAL: u32 = 17; // J-type imm20, S + A - P
    pub const CALL: u32 = 18; // auipc+jalr pair, S + A - P
    pub const CALL_PLT: u32 = 19; // same shape as CALL, no PLT stub synthesized yet
}

/// ±1MiB: `JAL`'s 20-bit signed, 2-byte-scaled immediate.
const RISCV_JAL_RANGE: u64 = 1 << 20;

fn riscv_encode_j_imm(disp: i64) -> u32 {
    let imm = disp as u32;
    let bit20 = (imm >> 20) & 0x1;
    let bits10_1 = (imm >> 1) & 0x3ff;
    let bit11 = (imm >> 11) & 0x1;
    let bits19_12 = (imm >> 12) & 0xff;
    (bit20 << 31) | (bits10_1 << 21) | (bit11 << 20) | (bits19_12 << 12)
}

/// `auipc t1, hi20` / `jalr x0, lo12(t1)`: an 8-byte, full-32-bit-range
/// unconditional jump, used both for `R_RISCV_CALL` application and as this
/// target's thunk body.
fn riscv_encode_auipc_jalr(site: u64, target: u64, auipc_base_insn: u32, jalr_base_insn: u32, big_endian: bool) -> [u8; 8] {
    let disp = target as i64 - site as i64;
    let hi20 = ((disp + 0x800) >> 12) as i32;
    let lo12 = (disp - ((hi20 as i64) << 12)) as i32;
    let auipc = (auipc_base_insn & 0x0000_0fff) | ((hi20 as u32) << 12);
    let jalr = (jalr_base_insn & 0x000f_ffff) | (((lo12 as u32) & 0xfff) << 20);
    let mut out = [0u8; 8];
    out[0..4].copy_from_slice(&if big_endian { auipc.to_be_bytes() } else { auipc.to_le_bytes() });
    out[4..8].copy_from_slice(&if big_endian { jalr.to_be_bytes() } else { jalr.to_le_bytes() });
    out
}

impl Target for RiscvTarget {
    fn name(&self) -> &'static str {
        match (self.is_64, self.big_endian) {
            (true, false) => "riscv64",
            (true, true) => "riscv64be",
            (false, false) => "riscv32",
            (false, true) => "riscv32be",
        }
    }
    fn e_machine(&self) -> u16 {
        object::elf::EM_RISCV
    }
    fn is_64(&self) -> bool {
        self.is_64
    }
    fn endianness(&self) -> object::Endianness {
        if self.big_endian { object::Endianness::Big } else { object::Endianness::Little }
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x10000,
            _ => 0,
        }
    }
    fn max_branch_range(&self) -> Option<u64> {
        Some(RISCV_JAL_RANGE)
    }
    fn is_range_limited_branch(&self, r_type: u32) -> bool {
        r_type == riscv_reloc::JAL
    }
    fn make_thunk(&self, thunk_addr: u64, target: u64) -> Vec<u8> {
        // `auipc t1, hi20; jalr x0, lo12(t1)`: `t1` = x6, rd field 00110;
        // `jalr` destination `x0` discards the return address (a plain
        // jump, not a call).
        let auipc_base: u32 = 0b0010111 | (6 << 7); // opcode=AUIPC, rd=t1(x6)
        let jalr_base: u32 = 0b1100111 | (0 << 7) | (6 << 15); // opcode=JALR, rd=x0, rs1=t1
        riscv_encode_auipc_jalr(thunk_addr, target, auipc_base, jalr_base, self.big_endian).to_vec()
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use riscv_reloc::*;
        let s = ctx.s as i64;
        match r_type {
            NONE => Ok(()),
            R32 => write_int(ctx.bytes, 4, s + ctx.a, self.big_endian),
            R64 => write_int(ctx.bytes, 8, s + ctx.a, self.big_endian),
            JAL => {
                let disp = s + ctx.a - ctx.p as i64;
                let imm = riscv_encode_j_imm(disp);
                patch_insn32(ctx.bytes, self.big_endian, 0xffff_f000, imm)
            }
            CALL | CALL_PLT => {
                if ctx.bytes.len() < 8 {
                    return Err(UnsupportedRelocation);
                }
                let auipc_base = read_u32(&ctx.bytes[0..4], self.big_endian).ok_or(UnsupportedRelocation)? & 0x0000_0fff;
                let jalr_base = read_u32(&ctx.bytes[4..8], self.big_endian).ok_or(UnsupportedRelocation)? & 0x000f_ffff;
                let target = (s + ctx.a) as u64;
                let patched = riscv_encode_auipc_jalr(ctx.p, target, auipc_base, jalr_base, self.big_endian);
                ctx.bytes[0..8].copy_from_slice(&patched);
                Ok(())
            }
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// PowerPC
// ---------------------------------------------------------------------

pub struct PowerPcTarget {
    pub is_64: bool,
}

pub static POWERPC64: PowerPcTarget = PowerPcTarget { is_64: true };
pub static POWERPC32: PowerPcTarget = PowerPcTarget { is_64: false };

mod ppc_reloc {
    pub const NONE: u32 = 0;
    pub const ADDR32: u32 = 1; // S + A
    pub const REL24: u32 = 10; // S + A - P, 24-bit word field (b/bl)
    pub const ADDR64: u32 = 38; // ppc64 only
}

/// ±32MiB: the 24-bit `LI` field in `b`/`bl`.
const PPC_BRANCH_RANGE: u64 = 1 << 25;

impl Target for PowerPcTarget {
    fn name(&self) -> &'static str {
        if self.is_64 { "powerpc64" } else { "powerpc" }
    }
    fn e_machine(&self) -> u16 {
        if self.is_64 { object::elf::EM_PPC64 } else { object::elf::EM_PPC }
    }
    fn is_64(&self) -> bool {
        self.is_64
    }
    fn endianness(&self) -> object::Endianness {
        object::Endianness::Big
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x1000_0000,
            _ => 0,
        }
    }
    fn max_branch_range(&self) -> Option<u64> {
        Some(PPC_BRANCH_RANGE)
    }
    fn is_range_limited_branch(&self, r_type: u32) -> bool {
        r_type == ppc_reloc::REL24
    }
    fn make_thunk(&self, thunk_addr: u64, target: u64) -> Vec<u8> {
        let _ = thunk_addr;
        // `lis r12, target@ha; ori r12, r12, target@l; mtctr r12; bctr`:
        // the classic long-branch-via-CTR veneer, range-independent.
        let hi = ((target >> 16) + if target & 0x8000 != 0 { 1 } else { 0 }) as u32 & 0xffff;
        let lo = (target & 0xffff) as u32;
        let lis: u32 = (15 << 26) | (12 << 21) | hi; // lis r12, hi
        let ori: u32 = (24 << 26) | (12 << 21) | (12 << 16) | lo; // ori r12, r12, lo
        let mtctr: u32 = (31 << 26) | (12 << 21) | (9 << 16) | (467 << 1); // mtctr r12
        let bctr: u32 = (19 << 26) | (20 << 21) | (528 << 1); // bctr
        let mut out = Vec::with_capacity(16);
        for insn in [lis, ori, mtctr, bctr] {
            out.extend_from_slice(&insn.to_be_bytes());
        }
        out
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use ppc_reloc::*;
        let s = ctx.s as i64;
        match r_type {
            NONE => Ok(()),
            ADDR32 => write_int(ctx.bytes, 4, s + ctx.a, true),
            ADDR64 if self.is_64 => write_int(ctx.bytes, 8, s + ctx.a, true),
            REL24 => {
                let disp = (s + ctx.a - ctx.p as i64) >> 2;
                let li = (disp as u32) & 0x00ff_ffff;
                patch_insn32(ctx.bytes, true, 0x03ff_fffc, li << 2)
            }
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// S390X
// ---------------------------------------------------------------------

pub struct S390xTarget;

pub static S390X: S390xTarget = S390xTarget;

mod s390_reloc {
    pub const NONE: u32 = 0;
    pub const R32: u32 = 4; // S + A
    pub const PC32: u32 = 5; // S + A - P
    pub const R64: u32 = 22; // S + A
    pub const PC64: u32 = 23; // S + A - P
}

impl Target for S390xTarget {
    fn name(&self) -> &'static str {
        "s390x"
    }
    fn e_machine(&self) -> u16 {
        object::elf::EM_S390
    }
    fn is_64(&self) -> bool {
        true
    }
    fn endianness(&self) -> object::Endianness {
        object::Endianness::Big
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x80_0000,
            _ => 0,
        }
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use s390_reloc::*;
        let s = ctx.s as i64;
        match r_type {
            NONE => Ok(()),
            R32 => write_int(ctx.bytes, 4, s + ctx.a, true),
            PC32 => write_int(ctx.bytes, 4, s + ctx.a - ctx.p as i64, true),
            R64 => write_int(ctx.bytes, 8, s + ctx.a, true),
            PC64 => write_int(ctx.bytes, 8, s + ctx.a - ctx.p as i64, true),
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// SPARC64
// ---------------------------------------------------------------------

pub struct Sparc64Target;

pub static SPARC64: Sparc64Target = Sparc64Target;

mod sparc_reloc {
    pub const NONE: u32 = 0;
    pub const R32: u32 = 3; // S + A
    pub const DISP32: u32 = 6; // S + A - P
    pub const WDISP30: u32 = 7; // (S + A - P) >> 2, 30-bit field (call)
    pub const R64: u32 = 32; // S + A
}

impl Target for Sparc64Target {
    fn name(&self) -> &'static str {
        "sparc64"
    }
    fn e_machine(&self) -> u16 {
        object::elf::EM_SPARCV9
    }
    fn is_64(&self) -> bool {
        true
    }
    fn endianness(&self) -> object::Endianness {
        object::Endianness::Big
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x10_0000,
            _ => 0,
        }
    }
    fn is_branch_relocation(&self, r_type: u32) -> bool {
        r_type == sparc_reloc::WDISP30
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use sparc_reloc::*;
        let s = ctx.s as i64;
        match r_type {
            NONE => Ok(()),
            R32 => write_int(ctx.bytes, 4, s + ctx.a, true),
            DISP32 => write_int(ctx.bytes, 4, s + ctx.a - ctx.p as i64, true),
            R64 => write_int(ctx.bytes, 8, s + ctx.a, true),
            WDISP30 => {
                let disp = (s + ctx.a - ctx.p as i64) >> 2;
                let field = (disp as u32) & 0x3fff_ffff;
                patch_insn32(ctx.bytes, true, 0x3fff_ffff, field)
            }
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// M68K
// ---------------------------------------------------------------------

pub struct M68kTarget;

pub static M68K: M68kTarget = M68kTarget;

mod m68k_reloc {
    pub const NONE: u32 = 0;
    pub const R32: u32 = 1; // S + A
    pub const R16: u32 = 2;
    pub const R8: u32 = 3;
    pub const PC32: u32 = 4; // S + A - P
    pub const PC16: u32 = 5;
    pub const PC8: u32 = 6;
}

impl Target for M68kTarget {
    fn name(&self) -> &'static str {
        "m68k"
    }
    fn e_machine(&self) -> u16 {
        object::elf::EM_68K
    }
    fn is_64(&self) -> bool {
        false
    }
    fn endianness(&self) -> object::Endianness {
        object::Endianness::Big
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x8000,
            _ => 0,
        }
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use m68k_reloc::*;
        let s = ctx.s as i64;
        let pcrel = s + ctx.a - ctx.p as i64;
        match r_type {
            NONE => Ok(()),
            R32 => write_int(ctx.bytes, 4, s + ctx.a, true),
            R16 => write_int(ctx.bytes, 2, s + ctx.a, true),
            R8 => write_int(ctx.bytes, 1, s + ctx.a, true),
            PC32 => write_int(ctx.bytes, 4, pcrel, true),
            PC16 => write_int(ctx.bytes, 2, pcrel, true),
            PC8 => write_int(ctx.bytes, 1, pcrel, true),
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// SH4
// ---------------------------------------------------------------------

pub struct Sh4Target {
    pub big_endian: bool,
}

pub static SH4_LE: Sh4Target = Sh4Target { big_endian: false };
pub static SH4_BE: Sh4Target = Sh4Target { big_endian: true };

mod sh_reloc {
    pub const NONE: u32 = 0;
    pub const DIR32: u32 = 1; // S + A
    pub const REL32: u32 = 2; // S + A - P
    pub const PLT32: u32 = 27; // treated as a range-limited call site
}

/// `bsr`'s 12-bit signed, 2-byte-scaled displacement: ±4KiB. Short even by
/// this architecture's own standards, which is exactly why SH4 needs
/// thunks far more readily than the other range-limited targets.
const SH4_BRANCH_RANGE: u64 = 1 << 12;

impl Target for Sh4Target {
    fn name(&self) -> &'static str {
        if self.big_endian { "sh4be" } else { "sh4" }
    }
    fn e_machine(&self) -> u16 {
        object::elf::EM_SH
    }
    fn is_64(&self) -> bool {
        false
    }
    fn endianness(&self) -> object::Endianness {
        if self.big_endian { object::Endianness::Big } else { object::Endianness::Little }
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x8000,
            _ => 0,
        }
    }
    fn max_branch_range(&self) -> Option<u64> {
        Some(SH4_BRANCH_RANGE)
    }
    fn is_range_limited_branch(&self, r_type: u32) -> bool {
        r_type == sh_reloc::PLT32
    }
    fn make_thunk(&self, thunk_addr: u64, target: u64) -> Vec<u8> {
        let _ = thunk_addr;
        // `mov.l @(2,pc), r0; jmp @r0; nop; .long target`: load the
        // absolute target from the trailing literal and jump through it.
        let movl: u16 = 0xd002;
        let jmp: u16 = 0x402b;
        let nop: u16 = 0x0009;
        let mut out = Vec::with_capacity(10);
        for half in [movl, jmp, nop] {
            out.extend_from_slice(&if self.big_endian { half.to_be_bytes() } else { half.to_le_bytes() });
        }
        let t32 = target as u32;
        out.extend_from_slice(&if self.big_endian { t32.to_be_bytes() } else { t32.to_le_bytes() });
        out
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use sh_reloc::*;
        let s = ctx.s as i64;
        match r_type {
            NONE => Ok(()),
            DIR32 => write_int(ctx.bytes, 4, s + ctx.a, self.big_endian),
            REL32 | PLT32 => write_int(ctx.bytes, 4, s + ctx.a - ctx.p as i64, self.big_endian),
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// LoongArch
// ---------------------------------------------------------------------

pub struct LoongArchTarget {
    pub is_64: bool,
}

pub static LOONGARCH64: LoongArchTarget = LoongArchTarget { is_64: true };
pub static LOONGARCH32: LoongArchTarget = LoongArchTarget { is_64: false };

/// `e_machine` for LoongArch per its ELF psABI; not yet named in every
/// `object` crate release, so spelled out numerically here rather than
/// risking a build against a constant that may not exist.
const EM_LOONGARCH: u16 = 258;

mod loongarch_reloc {
    pub const NONE: u32 = 0;
    pub const R32: u32 = 1; // S + A
    pub const R64: u32 = 2; // S + A
    pub const B26: u32 = 66; // (S + A - P) >> 2, 26-bit field (b/bl)
}

/// ±128MiB: the 26-bit word-offset field in `b`/`bl`.
const LOONGARCH_BRANCH_RANGE: u64 = 1 << 27;

impl Target for LoongArchTarget {
    fn name(&self) -> &'static str {
        if self.is_64 { "loongarch64" } else { "loongarch32" }
    }
    fn e_machine(&self) -> u16 {
        EM_LOONGARCH
    }
    fn is_64(&self) -> bool {
        self.is_64
    }
    fn endianness(&self) -> object::Endianness {
        object::Endianness::Little
    }
    fn default_base_address(&self, kind: OutputKind) -> u64 {
        match kind {
            OutputKind::Executable => 0x1_2000_0000,
            _ => 0,
        }
    }
    fn max_branch_range(&self) -> Option<u64> {
        Some(LOONGARCH_BRANCH_RANGE)
    }
    fn is_range_limited_branch(&self, r_type: u32) -> bool {
        r_type == loongarch_reloc::B26
    }
    fn make_thunk(&self, thunk_addr: u64, target: u64) -> Vec<u8> {
        // `pcaddu12i $t0, hi20; jirl $zero, $t0, lo12`: the full-range pair
        // this architecture's own compiler-generated veneers use.
        let disp = target as i64 - thunk_addr as i64;
        let hi20 = ((disp + 0x800) >> 12) as i32;
        let lo12 = (disp - ((hi20 as i64) << 12)) as i32;
        let pcaddu12i: u32 = (0b0001110 << 25) | (((hi20 as u32) & 0x000f_ffff) << 5) | 12; // rd=$t0(12)
        let jirl: u32 = (0b010011 << 26) | ((((lo12 as u32) & 0xfff)) << 10) | (12 << 5) | 0; // rd=$zero, rj=$t0
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&pcaddu12i.to_le_bytes());
        out.extend_from_slice(&jirl.to_le_bytes());
        out
    }
    fn apply_relocation(&self, r_type: u32, ctx: RelocContext) -> RelocResult {
        use loongarch_reloc::*;
        let s = ctx.s as i64;
        match r_type {
            NONE => Ok(()),
            R32 => write_int(ctx.bytes, 4, s + ctx.a, false),
            R64 if self.is_64 => write_int(ctx.bytes, 8, s + ctx.a, false),
            B26 => {
                let disp = (s + ctx.a - ctx.p as i64) >> 2;
                let lo16 = (disp as u32) & 0xffff;
                let hi10 = ((disp as u32) >> 16) & 0x3ff;
                // Layout matches this architecture's own split-immediate
                // branch encoding: low 16 bits then high 10 bits, each in
                // their own instruction field.
                let value = (hi10 << 16) | lo16;
                patch_insn32(ctx.bytes, false, 0x03ff_ffff, value)
            }
            _ => Err(UnsupportedRelocation),
        }
    }
}

// ---------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------

/// Resolve a target by the ELF header's own `(e_machine, is_64, little)`
/// triple, the §4.2 "target identification" step.
pub fn by_e_machine(e_machine: u16, is_64: bool, little: bool) -> Option<&'static dyn Target> {
    use object::elf::*;
    Some(match e_machine {
        EM_X86_64 => &X86_64,
        EM_386 => &I386,
        EM_AARCH64 => if little { &AARCH64_LE } else { &AARCH64_BE },
        EM_ARM => if little { &ARM32_LE } else { &ARM32_BE },
        EM_RISCV => match (is_64, little) {
            (true, true) => &RISCV64_LE,
            (true, false) => &RISCV64_BE,
            (false, true) => &RISCV32_LE,
            (false, false) => &RISCV32_BE,
        },
        EM_PPC64 => &POWERPC64,
        EM_PPC => &POWERPC32,
        EM_S390 => &S390X,
        EM_SPARCV9 => &SPARC64,
        EM_68K => &M68K,
        EM_SH => if little { &SH4_LE } else { &SH4_BE },
        m if m == EM_LOONGARCH => if is_64 { &LOONGARCH64 } else { &LOONGARCH32 },
        _ => return None,
    })
}

/// Resolve a target by GNU `ld`'s `-m` emulation name.
pub fn by_emulation(name: &str) -> Option<&'static dyn Target> {
    Some(match name {
        "elf_x86_64" => &X86_64,
        "elf_i386" => &I386,
        "aarch64linux" => &AARCH64_LE,
        "aarch64linuxb" => &AARCH64_BE,
        "armelf_linux_eabi" => &ARM32_LE,
        "armebelf_linux_eabi" => &ARM32_BE,
        "elf64lriscv" => &RISCV64_LE,
        "elf64briscv" => &RISCV64_BE,
        "elf32lriscv" => &RISCV32_LE,
        "elf32briscv" => &RISCV32_BE,
        "elf64ppc" => &POWERPC64,
        "elf32ppclinux" | "elf32ppc" => &POWERPC32,
        "elf64_s390" => &S390X,
        "elf64_sparc" => &SPARC64,
        "m68kelf" => &M68K,
        "shlelf_linux" => &SH4_LE,
        "shelf_linux" => &SH4_BE,
        "elf64loongarch" => &LOONGARCH64,
        "elf32loongarch" => &LOONGARCH32,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(s: u64, a: i64, p: u64, bytes: &'a mut [u8]) -> RelocContext<'a> {
        RelocContext { s, a, p, got: None, plt: None, tp_offset: None, bytes }
    }

    fn ctx_with_got<'a>(p: u64, got: u64, bytes: &'a mut [u8]) -> RelocContext<'a> {
        RelocContext { s: 0, a: 0, p, got: Some(got), plt: None, tp_offset: None, bytes }
    }

    #[test]
    fn x86_64_gotpcrel_uses_got_entry_address() {
        let mut bytes = [0u8; 4];
        X86_64
            .apply_relocation(x86_64_reloc::GOTPCREL, ctx_with_got(0x1000, 0x3000, &mut bytes))
            .unwrap();
        assert_eq!(i32::from_le_bytes(bytes), (0x3000i64 - 0x1000) as i32);
    }

    #[test]
    fn x86_64_gotpcrel_without_a_got_entry_is_unsupported() {
        let mut bytes = [0u8; 4];
        let result = X86_64.apply_relocation(x86_64_reloc::GOTPCREL, ctx(0, 0, 0x1000, &mut bytes));
        assert_eq!(result, Err(UnsupportedRelocation));
    }

    #[test]
    fn x86_64_reports_got_relocations() {
        assert!(X86_64.is_got_relocation(x86_64_reloc::GOTPCREL));
        assert!(X86_64.is_got_relocation(x86_64_reloc::REX_GOTPCRELX));
        assert!(!X86_64.is_got_relocation(x86_64_reloc::PC32));
    }

    #[test]
    fn aarch64_adrp_got_page_encodes_page_delta() {
        let mut bytes = (0x9000_0000u32).to_le_bytes(); // adrp x0, #0
        AARCH64_LE
            .apply_relocation(aarch64_reloc::ADR_GOT_PAGE, ctx_with_got(0x1000, 0x41000, &mut bytes))
            .unwrap();
        let insn = u32::from_le_bytes(bytes);
        assert_eq!(insn & 0x9000_0000, 0x9000_0000);
        let immlo = (insn >> 29) & 0x3;
        let immhi = (insn >> 5) & 0x7_ffff;
        let imm21 = ((immhi << 2) | immlo) as i32;
        assert_eq!(imm21, 0x40); // (0x41000 - 0x1000) >> 12
    }

    #[test]
    fn aarch64_ld64_got_lo12_encodes_scaled_offset() {
        let mut bytes = (0xf940_0000u32).to_le_bytes(); // ldr x0, [x0]
        AARCH64_LE
            .apply_relocation(aarch64_reloc::LD64_GOT_LO12_NC, ctx_with_got(0, 0x1018, &mut bytes))
            .unwrap();
        let insn = u32::from_le_bytes(bytes);
        let imm12 = (insn >> 10) & 0xfff;
        assert_eq!(imm12, 0x1018 / 8);
    }

    #[test]
    fn x86_64_pc32_matches_displacement() {
        let mut bytes = [0u8; 4];
        X86_64.apply_relocation(x86_64_reloc::PC32, ctx(0x2000, -4, 0x1000, &mut bytes)).unwrap();
        assert_eq!(i32::from_le_bytes(bytes), 0x1000 - 4);
    }

    #[test]
    fn x86_64_abs64_writes_full_width() {
        let mut bytes = [0u8; 8];
        X86_64.apply_relocation(x86_64_reloc::R64, ctx(0x1234_5678, 1, 0, &mut bytes)).unwrap();
        assert_eq!(u64::from_le_bytes(bytes), 0x1234_5679);
    }

    #[test]
    fn aarch64_call26_preserves_opcode_bits() {
        let mut bytes = (0x9400_0000u32).to_le_bytes(); // bl #0
        AARCH64_LE.apply_relocation(aarch64_reloc::CALL26, ctx(0x2000, 0, 0x1000, &mut bytes)).unwrap();
        let insn = u32::from_le_bytes(bytes);
        assert_eq!(insn & 0xfc00_0000, 0x9400_0000);
        assert_eq!(insn & 0x03ff_ffff, ((0x2000 - 0x1000) >> 2) as u32);
    }

    #[test]
    fn arm32_thunk_is_absolute_long_branch() {
        let bytes = ARM32_LE.make_thunk(0x20000, 0x10000000);
        assert_eq!(bytes.len(), 8);
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 0xe51f_f004);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 0x10000000);
    }

    #[test]
    fn riscv_jal_out_of_range_is_flagged() {
        assert!(RISCV64_LE.is_range_limited_branch(riscv_reloc::JAL));
        assert_eq!(RISCV64_LE.max_branch_range(), Some(RISCV_JAL_RANGE));
    }

    #[test]
    fn by_e_machine_resolves_x86_64() {
        let t = by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        assert_eq!(t.name(), "elf_x86_64");
    }

    #[test]
    fn by_emulation_resolves_arm() {
        let t = by_emulation("armelf_linux_eabi").unwrap();
        assert_eq!(t.e_machine(), object::elf::EM_ARM);
    }

    #[test]
    fn non_range_limited_targets_report_no_branch_range() {
        assert_eq!(X86_64.max_branch_range(), None);
        assert_eq!(S390X.max_branch_range(), None);
        assert_eq!(SPARC64.max_branch_range(), None);
        assert_eq!(M68K.max_branch_range(), None);
    }
}
