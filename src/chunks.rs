//! Output chunk planning (§4.8).
//!
//! Generalizes the teacher's `BTreeMap<String, OutputSection>` (one entry
//! per exact input section name, filled as files are read) into the full
//! scheme: live input sections are first bucketed into output sections by
//! [`OutputSectionKey`] (collapsing `.text.foo` into `.text`, etc.), merge
//! sections contribute their already-interned blob instead of their raw
//! bytes, and the result is one ordered [`Chunk`] list the layout engine
//! assigns addresses to. Synthetic sections (`.dynsym`, `.dynstr`,
//! `.dynamic`, `.hash`, `.got`) are built by their own modules
//! (`dynamic.rs`, `got.rs`) as ordinary [`Chunk`]s and appended to this
//! list by the driver, rather than reserved directly through
//! `object::write::elf::Writer`'s own section-reservation API the way the
//! teacher's writer does; `.rela.dyn`, `.plt`, and `.gnu.hash` are still
//! unbuilt (see `DESIGN.md`). The `--build-id` note (`dynamic.rs`) is
//! likewise an ordinary `Chunk` appended by the driver; only its
//! descriptor bytes are patched later, directly in the final buffer by
//! `writer.rs`, once every chunk has a final file offset.

use object::elf;

use crate::context::{Context, SectionHandle};
use crate::merge::MergeTable;
use crate::section::OutputSectionKey;

/// One piece an input section contributes to a [`Chunk`]'s combined
/// bytes, recorded so the writer can patch relocations back into the
/// right byte range after layout assigns the chunk's base address.
pub struct ChunkPiece {
    pub handle: SectionHandle,
    pub offset_in_chunk: u64,
    pub len: u64,
}

pub struct Chunk {
    pub key: OutputSectionKey,
    pub pieces: Vec<ChunkPiece>,
    pub bytes: Vec<u8>,
    pub align: u64,
    /// Set by the layout engine once addresses are assigned.
    pub addr: u64,
    pub file_offset: u64,
    /// Name of another chunk this one's `sh_link` should point to (e.g.
    /// `.dynsym` -> `.dynstr`), resolved to a section index once the
    /// writer has assigned every chunk a slot. `None` for ordinary
    /// input-section-derived chunks, which have no cross-section link.
    pub sh_link_name: Option<String>,
    pub sh_info: u32,
    pub sh_entsize: u64,
}

impl Chunk {
    pub fn is_executable(&self) -> bool {
        self.key.flags & elf::SHF_EXECINSTR as u64 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.key.flags & elf::SHF_WRITE as u64 != 0
    }

    pub fn is_alloc(&self) -> bool {
        self.key.flags & elf::SHF_ALLOC as u64 != 0
    }

    pub fn is_nobits(&self) -> bool {
        self.key.sh_type == elf::SHT_NOBITS
    }
}

/// A live input section's output name is either whichever `SECTIONS`
/// placement's `input_patterns`/`keep_patterns` glob-matches it (script
/// order is preserved by the caller), or the canonical collapsed name
/// (`.text.foo` -> `.text`) when no script is present or none matches.
fn output_name_for(ctx: &Context, section_name: &str) -> Option<String> {
    ctx.script_sections.iter().find_map(|p| {
        let matches = p.input_patterns.iter().chain(p.keep_patterns.iter()).any(|pat| crate::input::script::glob_match(pat, section_name));
        matches.then(|| p.output_name.clone())
    })
}

/// Build the ordered chunk list from every live input section plus the
/// already-interned merge blobs. Without a linker script, allocated
/// sections are ordered read-only-data, executable, then writable, matching
/// a typical default GNU `ld` `SECTIONS` layout so that permission-grouped
/// `PT_LOAD` segments (§4.9) stay contiguous. When a `SECTIONS` block is
/// present, every chunk it names is emitted first, in the script's own
/// declaration order (§4.8); sections the script never mentions still fall
/// back to the permission-grouped order and are appended after it.
/// Non-allocated sections are never chunked here (the writer keeps
/// symbol/string tables separate).
pub fn plan(ctx: &Context, merge: &MergeTable, fold: &crate::icf::FoldMap) -> Vec<Chunk> {
    use std::collections::BTreeMap;

    struct Building {
        key: OutputSectionKey,
        bytes: Vec<u8>,
        align: u64,
        pieces: Vec<ChunkPiece>,
    }

    let mut by_name: BTreeMap<String, Building> = BTreeMap::new();

    for (handle, section) in ctx.live_sections() {
        if !section.is_alloc() {
            continue;
        }
        // A folded-away duplicate never contributes its own bytes; its
        // references are redirected to the representative by the writer.
        if fold.resolve(handle) != handle {
            continue;
        }
        let mut key = OutputSectionKey::for_section(section);
        if let Some(scripted_name) = output_name_for(ctx, &section.name) {
            key.name = scripted_name;
        }
        let building = by_name.entry(key.name.clone()).or_insert_with(|| Building {
            key: key.clone(),
            bytes: Vec::new(),
            align: section.align,
            pieces: Vec::new(),
        });
        building.align = building.align.max(section.align);
        building.key.flags |= key.flags;

        if section.is_mergeable() {
            // Merge sections contribute nothing to the byte stream here;
            // their content already lives in `merge`'s own blob, and the
            // writer resolves references directly through the merge table.
            continue;
        }

        let start = align_up(building.bytes.len() as u64, section.align.max(1));
        building.bytes.resize(start as usize, 0);
        // `SHT_NOBITS` (`.bss`/`.tbss`) sections carry no file bytes; the
        // reader already represents their size through `data.len()` (a
        // zero-filled placeholder of the right length), so they fold into
        // the same concatenation as ordinary `PROGBITS` without a special
        // case here, at the cost of that placeholder occupying real file
        // space the way the teacher's own single-segment layout already
        // tolerates.
        building.bytes.extend_from_slice(&section.data);
        section.output_offset.store(start, std::sync::atomic::Ordering::Relaxed);
        building.pieces.push(ChunkPiece { handle, offset_in_chunk: start, len: section.data.len() as u64 });
    }

    // Emit one standalone chunk per merged output-section blob that has no
    // ordinary (non-merge) contributor of the same name yet.
    for (name, merged) in &merge.sections {
        by_name.entry(name.clone()).or_insert_with(|| Building {
            key: OutputSectionKey { name: name.clone(), flags: (elf::SHF_ALLOC | elf::SHF_MERGE) as u64, sh_type: elf::SHT_PROGBITS },
            bytes: merged.bytes.clone(),
            align: merged.align,
            pieces: Vec::new(),
        });
    }

    let mut chunks: Vec<Chunk> = by_name
        .into_values()
        .map(|b| Chunk {
            key: b.key,
            pieces: b.pieces,
            bytes: b.bytes,
            align: b.align,
            addr: 0,
            file_offset: 0,
            sh_link_name: None,
            sh_info: 0,
            sh_entsize: 0,
        })
        .collect();

    sort(ctx, &mut chunks);
    chunks
}

/// Order chunks by the active `SECTIONS` placement when a script is
/// present (script declaration order first, anything the script never
/// named appended afterwards), or by the default permission grouping
/// otherwise. Exposed so the driver can re-apply the same order after
/// appending synthetic chunks (`.dynsym`, `.got`, the build-id note) that
/// `plan` itself never sees.
pub fn sort(ctx: &Context, chunks: &mut Vec<Chunk>) {
    if ctx.script_sections.is_empty() {
        chunks.sort_by_key(|c| (c.is_writable() as u8, c.is_executable() as u8, c.key.name.clone()));
    } else {
        let script_order: std::collections::HashMap<&str, usize> =
            ctx.script_sections.iter().enumerate().map(|(i, p)| (p.output_name.as_str(), i)).collect();
        chunks.sort_by_key(|c| match script_order.get(c.key.name.as_str()) {
            Some(&i) => (0u8, i, c.is_writable() as u8, c.is_executable() as u8, c.key.name.clone()),
            None => (1u8, usize::MAX, c.is_writable() as u8, c.is_executable() as u8, c.key.name.clone()),
        });
    }
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
    fn groups_function_sections_into_one_text_chunk() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let ctx_opt = Opt::default();
        let mut ctx = Context::new(ctx_opt, target);
        let a = InputSection::new(".text.a".into(), vec![0x90], (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64, elf::SHT_PROGBITS, 1, vec![], None, None);
        let b = InputSection::new(".text.b".into(), vec![0xc3], (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64, elf::SHT_PROGBITS, 1, vec![], None, None);
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![a, b], local_symbols: vec![] });
        let merge_table = crate::merge::run(&ctx);
        let fold = crate::icf::run(&ctx, crate::opt::IcfMode::None);
        let chunks = plan(&ctx, &merge_table, &fold);
        let text = chunks.iter().find(|c| c.key.name == ".text").unwrap();
        assert_eq!(text.bytes, vec![0x90, 0xc3]);
        assert_eq!(text.pieces.len(), 2);
    }

    #[test]
    fn script_sections_reorder_and_rename_output_chunks() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut ctx = Context::new(Opt::default(), target);
        let text = InputSection::new(".text.a".into(), vec![0x90], (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64, elf::SHT_PROGBITS, 1, vec![], None, None);
        let rodata = InputSection::new(".rodata.msg".into(), vec![0x01], elf::SHF_ALLOC as u64, elf::SHT_PROGBITS, 1, vec![], None, None);
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![text, rodata], local_symbols: vec![] });
        // A script that places read-only data *before* code, the reverse of
        // the default permission-grouped order, and folds it into a custom
        // output section name.
        ctx.script_sections.push(crate::input::script::SectionPlacement {
            output_name: ".rodata".into(),
            input_patterns: vec![".rodata".into(), ".rodata.*".into()],
            keep_patterns: vec![],
            addr: None,
        });
        ctx.script_sections.push(crate::input::script::SectionPlacement {
            output_name: ".text".into(),
            input_patterns: vec![".text".into(), ".text.*".into()],
            keep_patterns: vec![],
            addr: None,
        });
        let merge_table = crate::merge::run(&ctx);
        let fold = crate::icf::run(&ctx, crate::opt::IcfMode::None);
        let chunks = plan(&ctx, &merge_table, &fold);
        let names: Vec<&str> = chunks.iter().map(|c| c.key.name.as_str()).collect();
        assert_eq!(names, vec![".rodata", ".text"]);
    }
}
