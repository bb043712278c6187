//! GOT slot allocation (§4.10: "when the same GOT slot is requested for a
//! symbol by multiple relocations, it is allocated once").
//!
//! `src/target.rs` reports which relocation types are GOT-relative via
//! `Target::is_got_relocation`; this module is the single pass that scans
//! every live relocation once, assigns each distinct referenced symbol name
//! one entry index (first-sight order, so the result is deterministic given
//! `Context::live_sections`' own file-priority ordering), and builds the
//! `.got` chunk those entries live in. The writer fills each entry's bytes
//! with the symbol's resolved address once `layout::run` has assigned every
//! chunk its final address, and hands the entry's own absolute address back
//! to `Target::apply_relocation` as `RelocContext::got`.

use std::collections::BTreeMap;

use object::elf;

use crate::chunks::Chunk;
use crate::context::Context;
use crate::section::{OutputSectionKey, RelocationTarget};

pub struct GotTable {
    order: Vec<String>,
    index: BTreeMap<String, u64>,
}

impl GotTable {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Entry index for `name`, if one was allocated.
    pub fn index_of(&self, name: &str) -> Option<u64> {
        self.index.get(name).copied()
    }

    /// Every symbol name with an allocated slot, in entry order.
    pub fn names(&self) -> &[String] {
        &self.order
    }
}

/// One address-sized slot per target word size (§4.9's "GOT/PLT entry
/// counts" sizing step).
pub fn entry_width(ctx: &Context) -> u64 {
    if ctx.target.is_64() {
        8
    } else {
        4
    }
}

/// Scan every live relocation and allocate one slot per distinct
/// GOT-referenced symbol name.
pub fn plan(ctx: &Context) -> GotTable {
    let mut order = Vec::new();
    let mut index = BTreeMap::new();
    for (_, section) in ctx.live_sections() {
        for reloc in &section.relocations {
            if !ctx.target.is_got_relocation(reloc.r_type) {
                continue;
            }
            if let RelocationTarget::Symbol(name) = &reloc.target {
                if !index.contains_key(name) {
                    index.insert(name.clone(), order.len() as u64);
                    order.push(name.clone());
                }
            }
        }
    }
    GotTable { order, index }
}

/// Build the (as yet unfilled) `.got` chunk, sized for every allocated
/// entry. `None` when nothing in this link needs a GOT slot, so the
/// planner never emits an empty `.got` section. Entry contents are written
/// by the writer, not here: a GOT slot can hold another file's symbol
/// address, which isn't known until every chunk has been laid out.
pub fn chunk(ctx: &Context, table: &GotTable) -> Option<Chunk> {
    if table.is_empty() {
        return None;
    }
    let width = entry_width(ctx) as usize;
    Some(Chunk {
        key: OutputSectionKey {
            name: ".got".to_string(),
            flags: (elf::SHF_ALLOC | elf::SHF_WRITE) as u64,
            sh_type: elf::SHT_PROGBITS,
        },
        pieces: Vec::new(),
        bytes: vec![0u8; table.len() * width],
        align: width as u64,
        addr: 0,
        file_offset: 0,
        sh_link_name: None,
        sh_info: 0,
        sh_entsize: width as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InputFile;
    use crate::opt::Opt;
    use crate::section::{InputSection, RelocationRecord};

    fn x86_64_ctx() -> Context {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        Context::new(Opt::default(), target)
    }

    #[test]
    fn allocates_one_slot_per_distinct_got_symbol() {
        let mut ctx = x86_64_ctx();
        let reloc_a = RelocationRecord { offset: 0, r_type: 9 /* GOTPCREL */, addend: -4, target: RelocationTarget::Symbol("foo".into()) };
        let reloc_b = RelocationRecord { offset: 8, r_type: 9, addend: -4, target: RelocationTarget::Symbol("foo".into()) };
        let reloc_c = RelocationRecord { offset: 16, r_type: 9, addend: -4, target: RelocationTarget::Symbol("bar".into()) };
        let text = InputSection::new(
            ".text".into(),
            vec![0; 24],
            (object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR) as u64,
            object::elf::SHT_PROGBITS,
            1,
            vec![reloc_a, reloc_b, reloc_c],
            None,
            None,
        );
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![text], local_symbols: vec![] });

        let table = plan(&ctx);
        assert_eq!(table.len(), 2);
        assert_eq!(table.index_of("foo"), Some(0));
        assert_eq!(table.index_of("bar"), Some(1));
    }

    #[test]
    fn non_got_relocations_allocate_nothing() {
        let mut ctx = x86_64_ctx();
        let reloc = RelocationRecord { offset: 0, r_type: 2 /* PC32 */, addend: -4, target: RelocationTarget::Symbol("foo".into()) };
        let text = InputSection::new(
            ".text".into(),
            vec![0; 8],
            (object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR) as u64,
            object::elf::SHT_PROGBITS,
            1,
            vec![reloc],
            None,
            None,
        );
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![text], local_symbols: vec![] });

        let table = plan(&ctx);
        assert!(table.is_empty());
        assert!(chunk(&ctx, &table).is_none());
    }

    #[test]
    fn chunk_is_sized_by_entry_count_and_target_width() {
        let mut ctx = x86_64_ctx();
        let reloc = RelocationRecord { offset: 0, r_type: 9, addend: -4, target: RelocationTarget::Symbol("foo".into()) };
        let text = InputSection::new(
            ".text".into(),
            vec![0; 8],
            (object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR) as u64,
            object::elf::SHT_PROGBITS,
            1,
            vec![reloc],
            None,
            None,
        );
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![text], local_symbols: vec![] });

        let table = plan(&ctx);
        let got_chunk = chunk(&ctx, &table).unwrap();
        assert_eq!(got_chunk.bytes.len(), 8); // one 64-bit entry
        assert_eq!(got_chunk.key.name, ".got");
    }
}
