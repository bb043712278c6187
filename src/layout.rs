//! Address/offset assignment and the thunk insertion fixpoint (§4.9, §9).
//!
//! Segments are grouped by permission (read-only, read+execute,
//! read+write) rather than the teacher's single `PT_LOAD` covering every
//! section with `PF_R|PF_W|PF_X`: real object files mix `.text` and
//! `.data` and a single RWX mapping would work but isn't what a linker
//! claiming `mold`-like output is expected to produce. Each permission
//! group becomes one contiguous `PT_LOAD`, page-aligned, matching GNU
//! `ld`'s own default script grouping. A group whose leading chunk has an
//! explicit `SECTIONS` address (`. = expr;` / `name ADDR : { ... }`, §4.9)
//! has its `p_vaddr` forced to that value instead of the naturally packed
//! `base + file_offset`; file offsets stay sequential regardless, since
//! only `p_vaddr % page == p_offset % page` is an ELF requirement, not
//! equality.

use crate::chunks::Chunk;
use crate::context::Context;
use crate::opt::OutputKind;

pub struct Segment {
    pub flags: u32, // PF_R | PF_W | PF_X
    pub vaddr: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

pub struct Layout {
    pub segments: Vec<Segment>,
    pub image_len: u64,
    /// A synthetic executable chunk holding every inserted thunk, placed
    /// immediately after the last ordinary executable chunk. Empty when no
    /// relocation exceeded its target's branch range.
    pub thunks: ThunkChunk,
}

#[derive(Default)]
pub struct ThunkChunk {
    pub bytes: Vec<u8>,
    pub addr: u64,
    /// (requested target address) -> address of the synthesized thunk
    /// branching to it, so the relocation pass can redirect `S` there.
    pub entries: Vec<(u64, u64)>,
}

impl ThunkChunk {
    pub fn thunk_for(&self, target: u64) -> Option<u64> {
        self.entries.iter().find(|(t, _)| *t == target).map(|(_, addr)| *addr)
    }
}

const HEADER_RESERVE: u64 = 0x1000;

/// Assign virtual addresses and file offsets to every chunk, bounded-loop
/// fixpoint over thunk insertion for targets with a branch range limit.
pub fn run(ctx: &Context, chunks: &mut [Chunk]) -> Layout {
    let base = ctx.target.default_base_address(ctx.opt.output_kind);
    let page = ctx.target.page_size();

    let mut thunks = ThunkChunk::default();

    for round in 0..3 {
        let (image_len, segments, thunk_region_start) = assign_addresses(ctx, chunks, &thunks, base, page);
        if let Some(addr) = thunk_region_start {
            thunks.addr = addr;
        }
        if ctx.target.max_branch_range().is_none() {
            return Layout { segments, image_len, thunks };
        }
        let overflow_targets = find_out_of_range_targets(ctx, chunks, ctx.target.max_branch_range().unwrap());
        let new_targets: Vec<u64> = overflow_targets
            .into_iter()
            .filter(|t| thunks.thunk_for(*t).is_none())
            .collect();
        if new_targets.is_empty() {
            return Layout { segments, image_len, thunks };
        }
        if round == 2 {
            // Final round already assigned addresses with the thunks known
            // so far; stop growing to guarantee termination (§9).
            return Layout { segments, image_len, thunks };
        }
        for target in new_targets {
            let thunk_addr = thunks.addr + thunks.bytes.len() as u64;
            thunks.bytes.extend(ctx.target.make_thunk(thunk_addr, target));
            thunks.entries.push((target, thunk_addr));
        }
    }

    unreachable!()
}

fn assign_addresses(
    ctx: &Context,
    chunks: &mut [Chunk],
    thunks: &ThunkChunk,
    base: u64,
    page: u64,
) -> (u64, Vec<Segment>, Option<u64>) {
    let mut offset = HEADER_RESERVE;
    let mut segments = Vec::new();
    let mut thunk_region_start = None;

    // Group contiguous chunks by the (writable, executable) permission
    // pair; `chunks` is already sorted into (ro, rx, rw) order by the
    // planner so this is a single linear pass.
    let mut i = 0;
    while i < chunks.len() {
        let perm = (chunks[i].is_writable(), chunks[i].is_executable());
        let seg_start_offset = align_up(offset, page);
        let natural_vaddr = base + seg_start_offset;
        let seg_start_vaddr = script_addr_override(ctx, &chunks[i].key.name, natural_vaddr).unwrap_or(natural_vaddr);
        let mut cursor_offset = seg_start_offset;

        let mut j = i;
        while j < chunks.len() && (chunks[j].is_writable(), chunks[j].is_executable()) == perm {
            cursor_offset = align_up(cursor_offset, chunks[j].align.max(1));
            chunks[j].file_offset = cursor_offset;
            chunks[j].addr = seg_start_vaddr + (cursor_offset - seg_start_offset);
            if !chunks[j].is_nobits() {
                cursor_offset += chunks[j].bytes.len() as u64;
            } else {
                cursor_offset += chunks[j].bytes.len() as u64;
            }
            j += 1;
        }

        // Thunks share the executable group's tail so direct branches from
        // ordinary code to a thunk stay in range.
        let mut mem_end = cursor_offset;
        if perm.1 {
            thunk_region_start = Some(seg_start_vaddr + (cursor_offset - seg_start_offset));
            mem_end = cursor_offset + thunks.bytes.len() as u64;
        }

        let flags = (if perm.1 { object::elf::PF_X } else { 0 })
            | object::elf::PF_R
            | (if perm.0 { object::elf::PF_W } else { 0 });
        segments.push(Segment {
            flags,
            vaddr: seg_start_vaddr,
            file_offset: seg_start_offset,
            file_size: mem_end - seg_start_offset,
            mem_size: mem_end - seg_start_offset,
        });

        offset = mem_end;
        i = j;
    }

    (offset, segments, thunk_region_start)
}

/// Evaluate the `SECTIONS` placement's explicit address for `chunk_name`,
/// if any, with `.` bound to `natural_vaddr` (the address this segment
/// would otherwise have received) and symbol lookups served from the
/// already-resolved global table.
fn script_addr_override(ctx: &Context, chunk_name: &str, natural_vaddr: u64) -> Option<u64> {
    let placement = ctx.script_sections.iter().find(|p| p.output_name == chunk_name)?;
    let expr = placement.addr.as_ref()?;
    expr.eval(natural_vaddr, &|name| ctx.symbols.get(name).map(|d| d.value))
}

fn find_out_of_range_targets(ctx: &Context, chunks: &[Chunk], max_range: u64) -> Vec<u64> {
    let mut targets = Vec::new();
    for chunk in chunks {
        if !chunk.is_executable() {
            continue;
        }
        for piece in &chunk.pieces {
            let section = ctx.section(piece.handle);
            for reloc in &section.relocations {
                if !ctx.target.is_range_limited_branch(reloc.r_type) {
                    continue;
                }
                let site = chunk.addr + piece.offset_in_chunk + reloc.offset;
                let target_addr = match &reloc.target {
                    // `find_chunk_addr` already resolves to the section's
                    // final base address (chunk base + its piece offset,
                    // which equals `output_offset`); adding the latter
                    // again would double-count it.
                    crate::section::RelocationTarget::Section(h) => find_chunk_addr(chunks, *h).unwrap_or(0),
                    crate::section::RelocationTarget::Symbol(name) => {
                        ctx.symbols
                            .get(name)
                            .and_then(|def| def.section.map(|idx| (def.file, idx)))
                            .and_then(|(file, idx)| find_chunk_addr(chunks, crate::context::SectionHandle { file, index: idx }))
                            .unwrap_or(0)
                    }
                };
                let disp = (target_addr as i64) - (site as i64);
                if disp.unsigned_abs() > max_range {
                    targets.push(target_addr);
                }
            }
        }
    }
    targets.sort_unstable();
    targets.dedup();
    targets
}

fn find_chunk_addr(chunks: &[Chunk], handle: crate::context::SectionHandle) -> Option<u64> {
    for chunk in chunks {
        if let Some(piece) = chunk.pieces.iter().find(|p| p.handle == handle) {
            return Some(chunk.addr + piece.offset_in_chunk);
        }
    }
    None
}

fn align_up(value: u64, align: u64) -> u64 {
    let align = align.max(1);
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InputFile;
    use crate::opt::Opt;
    use crate::section::InputSection;

    #[test]
    fn assigns_distinct_segments_per_permission() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut opt = Opt::default();
        opt.output_kind = OutputKind::Executable;
        let mut ctx = Context::new(opt, target);
        let text = InputSection::new(".text".into(), vec![0x90; 16], (object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR) as u64, object::elf::SHT_PROGBITS, 16, vec![], None, None);
        let data = InputSection::new(".data".into(), vec![1; 16], (object::elf::SHF_ALLOC | object::elf::SHF_WRITE) as u64, object::elf::SHT_PROGBITS, 16, vec![], None, None);
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![text, data], local_symbols: vec![] });
        let merge_table = crate::merge::run(&ctx);
        let fold = crate::icf::run(&ctx, crate::opt::IcfMode::None);
        let mut chunks = crate::chunks::plan(&ctx, &merge_table, &fold);
        let layout = run(&ctx, &mut chunks);
        assert!(layout.segments.len() >= 2);
        assert!(layout.segments.iter().any(|s| s.flags & object::elf::PF_X != 0));
        assert!(layout.segments.iter().any(|s| s.flags & object::elf::PF_W != 0));
    }

    #[test]
    fn script_address_overrides_the_naturally_packed_vaddr() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut opt = Opt::default();
        opt.output_kind = OutputKind::Executable;
        let mut ctx = Context::new(opt, target);
        let text = InputSection::new(".text".into(), vec![0x90; 16], (object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR) as u64, object::elf::SHT_PROGBITS, 16, vec![], None, None);
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![text], local_symbols: vec![] });
        ctx.script_sections.push(crate::input::script::SectionPlacement {
            output_name: ".text".into(),
            input_patterns: vec![".text".into()],
            keep_patterns: vec![],
            addr: Some(crate::input::script::Expr::Num(0x20000)),
        });
        let merge_table = crate::merge::run(&ctx);
        let fold = crate::icf::run(&ctx, crate::opt::IcfMode::None);
        let mut chunks = crate::chunks::plan(&ctx, &merge_table, &fold);
        let layout = run(&ctx, &mut chunks);
        assert_eq!(layout.segments[0].vaddr, 0x20000);
    }
}
