//! `SHF_MERGE`/`SHF_STRINGS` fragment interning (§4.7).
//!
//! Every live, mergeable input section contributes its fragments (whole
//! NUL-terminated strings for `SHF_STRINGS`, fixed `entsize` records
//! otherwise) into one content-addressed table per output section name;
//! duplicate fragments collapse to a single offset in the merged section,
//! and every input section's fragment offsets are rewritten to point into
//! that shared space. Consumers (the layout engine resolving a
//! section-relative relocation, the writer emitting final bytes) ask this
//! table for a fragment's output offset rather than re-deriving it.

use std::collections::HashMap;

use rustc_hash::FxHashMap;

use crate::context::{Context, SectionHandle};
use crate::section::OutputSectionKey;

/// One interned output blob for a given `OutputSectionKey`.
pub struct MergedSection {
    pub bytes: Vec<u8>,
    pub align: u64,
}

/// Per-(input section, fragment index) -> offset within its
/// `MergedSection`, plus the owning `OutputSectionKey` so the layout
/// engine can find which `MergedSection` an offset belongs to.
pub struct MergeTable {
    pub sections: FxHashMap<String, MergedSection>,
    offsets: FxHashMap<(SectionHandle, u64), (String, u64)>,
}

impl MergeTable {
    /// Resolve a section-relative byte offset that fell inside a mergeable
    /// section's original layout to (output section name, offset within
    /// the merged blob). `local_offset` must be a fragment start recorded
    /// during interning; callers resolving an arbitrary mid-fragment
    /// offset should subtract the fragment's start first.
    pub fn resolve(&self, handle: SectionHandle, local_offset: u64) -> Option<(&str, u64)> {
        self.offsets.get(&(handle, local_offset)).map(|(name, off)| (name.as_str(), *off))
    }
}

pub fn run(ctx: &Context) -> MergeTable {
    let mut interned: HashMap<String, HashMap<Vec<u8>, u64>> = HashMap::new();
    let mut blobs: FxHashMap<String, MergedSection> = FxHashMap::default();
    let mut offsets = FxHashMap::default();

    for (handle, section) in ctx.live_sections() {
        let Some(merge) = &section.merge else { continue };
        let key = OutputSectionKey::for_section(section);
        let table = interned.entry(key.name.clone()).or_default();
        let blob = blobs.entry(key.name.clone()).or_insert_with(|| MergedSection { bytes: Vec::new(), align: section.align });
        blob.align = blob.align.max(section.align);

        for fragment in &merge.fragments {
            let offset = *table.entry(fragment.bytes.clone()).or_insert_with(|| {
                let start = align_up(blob.bytes.len() as u64, merge.entsize.max(1));
                blob.bytes.resize(start as usize, 0);
                blob.bytes.extend_from_slice(&fragment.bytes);
                start
            });
            offsets.insert((handle, fragment.offset_in_section), (key.name.clone(), offset));
        }
    }

    MergeTable { sections: blobs, offsets }
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
    use crate::section::{InputSection, MergeFragment, MergeInfo};

    fn string_section(strings: &[&str]) -> InputSection {
        let mut data = Vec::new();
        let mut fragments = Vec::new();
        for s in strings {
            let start = data.len() as u64;
            data.extend_from_slice(s.as_bytes());
            data.push(0);
            fragments.push(MergeFragment { offset_in_section: start, bytes: data[start as usize..].to_vec() });
        }
        InputSection::new(
            ".rodata.str1.1".into(),
            data,
            (object::elf::SHF_ALLOC | object::elf::SHF_MERGE | object::elf::SHF_STRINGS) as u64,
            object::elf::SHT_PROGBITS,
            1,
            vec![],
            None,
            Some(MergeInfo { entsize: 1, is_strings: true, fragments }),
        )
    }

    #[test]
    fn duplicate_strings_collapse_to_one_offset() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut ctx = Context::new(Opt::default(), target);
        let file = InputFile {
            id: 0,
            name: "a.o".into(),
            priority: 0,
            sections: vec![string_section(&["hello", "world"]), string_section(&["world", "bye"])],
            local_symbols: vec![],
        };
        ctx.push_file(file);

        let table = run(&ctx);
        let h0 = SectionHandle { file: 0, index: 0 };
        let h1 = SectionHandle { file: 0, index: 1 };
        let (_, world_off_a) = table.resolve(h0, 6).unwrap(); // "world" starts after "hello\0"
        let (_, world_off_b) = table.resolve(h1, 0).unwrap();
        assert_eq!(world_off_a, world_off_b);

        let merged = &table.sections[".rodata"];
        assert!(merged.bytes.len() < "hello\0world\0world\0bye\0".len());
    }
}
