//! Input and output section representations.
//!
//! Grounded in the teacher's `OutputSection`/`Relocation` structs in
//! `src/link.rs`, generalized from "one name-keyed map filled in as files
//! are read" to the full pipeline: sections now carry liveness (`is_alive`,
//! for `--gc-sections`), an ICF equivalence class, and a comdat signature,
//! annotated in place rather than mutating the section graph's topology
//! (per the data-model invariant that later passes annotate, not rewrite).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::context::SectionHandle;

/// A relocation record preserved verbatim from the object file, as the
/// teacher's own `Relocation` struct does, but targeting a resolved
/// `(FileId, SectionIndex)` handle rather than holding a name-only slot for
/// section-relative relocations.
#[derive(Debug, Clone)]
pub struct RelocationRecord {
    /// Byte offset within the input section being patched.
    pub offset: u64,
    pub r_type: u32,
    pub addend: i64,
    pub target: RelocationTarget,
}

#[derive(Debug, Clone)]
pub enum RelocationTarget {
    /// Relocation against a global or local symbol name.
    Symbol(String),
    /// Relocation directly against a section (common for local/static
    /// data references that never got a symbol name), with the symbol's
    /// value within that section folded into `addend`.
    Section(SectionHandle),
}

/// One fragment of an `SHF_MERGE` section, keyed by content for
/// deduplication in `merge.rs`.
#[derive(Debug, Clone)]
pub struct MergeFragment {
    pub offset_in_section: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MergeInfo {
    pub entsize: u64,
    pub is_strings: bool,
    pub fragments: Vec<MergeFragment>,
}

/// A single parsed section from an `InputFile`. Content is an owned
/// buffer (copied out of the mapped file at parse time, as the teacher's
/// `OutputSection::content` already is) rather than an arena-borrowed
/// slice: arena lifetimes would make `Context` self-referential, so the
/// arena in this rewrite is scoped to the writer's name/string interning,
/// exactly where the teacher already uses `typed_arena::Arena`. Cross-file
/// references never hold a borrow into another file; they hold a
/// [`SectionHandle`].
#[derive(Debug)]
pub struct InputSection {
    pub name: String,
    pub data: Vec<u8>,
    pub sh_flags: u64,
    pub sh_type: u32,
    pub align: u64,
    pub relocations: Vec<RelocationRecord>,
    pub comdat_signature: Option<String>,
    pub merge: Option<MergeInfo>,

    pub is_alive: AtomicBool,
    pub is_visited: AtomicBool,
    /// `usize::MAX` until ICF assigns a class; sections in the same class
    /// with equal content fold to one representative.
    pub icf_class: AtomicUsize,
    /// Assigned by the layout engine; byte offset within the merged
    /// `OutputSection` this input section lands in.
    pub output_offset: AtomicU64,
}

impl InputSection {
    pub fn new(
        name: String,
        data: Vec<u8>,
        sh_flags: u64,
        sh_type: u32,
        align: u64,
        relocations: Vec<RelocationRecord>,
        comdat_signature: Option<String>,
        merge: Option<MergeInfo>,
    ) -> Self {
        InputSection {
            name,
            data,
            sh_flags,
            sh_type,
            align: align.max(1),
            relocations,
            comdat_signature,
            merge,
            is_alive: AtomicBool::new(true),
            is_visited: AtomicBool::new(false),
            icf_class: AtomicUsize::new(usize::MAX),
            output_offset: AtomicU64::new(0),
        }
    }

    pub fn is_executable(&self) -> bool {
        self.sh_flags & object::elf::SHF_EXECINSTR as u64 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.sh_flags & object::elf::SHF_WRITE as u64 != 0
    }

    pub fn is_alloc(&self) -> bool {
        self.sh_flags & object::elf::SHF_ALLOC as u64 != 0
    }

    pub fn is_tls(&self) -> bool {
        self.sh_flags & object::elf::SHF_TLS as u64 != 0
    }

    pub fn is_mergeable(&self) -> bool {
        self.sh_flags & object::elf::SHF_MERGE as u64 != 0
    }

    pub fn alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    pub fn kill(&self) {
        self.is_alive.store(false, Ordering::Relaxed);
    }
}

/// Key used to bucket input sections into one `OutputSection` per distinct
/// (name, flags, type) triple, per §4.8.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputSectionKey {
    pub name: String,
    pub flags: u64,
    pub sh_type: u32,
}

impl OutputSectionKey {
    pub fn for_section(sec: &InputSection) -> Self {
        // Canonicalize `.text.foo`-style fragments into `.text`'s bucket
        // the way a default GNU `ld` SECTIONS layout would, since we have
        // no explicit script for this input.
        let canonical = canonicalize_name(&sec.name);
        OutputSectionKey {
            name: canonical,
            flags: sec.sh_flags & (object::elf::SHF_WRITE | object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR) as u64,
            sh_type: sec.sh_type,
        }
    }
}

fn canonicalize_name(name: &str) -> String {
    const GROUPED_PREFIXES: &[&str] = &[
        ".text", ".data.rel.ro", ".data", ".rodata", ".bss", ".init_array", ".fini_array",
        ".tbss", ".tdata", ".ctors", ".dtors",
    ];
    for prefix in GROUPED_PREFIXES {
        if name == *prefix || name.starts_with(&format!("{prefix}.")) {
            return (*prefix).to_string();
        }
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_function_sections() {
        assert_eq!(canonicalize_name(".text.foo"), ".text");
        assert_eq!(canonicalize_name(".text"), ".text");
        assert_eq!(canonicalize_name(".rodata.str1.1"), ".rodata");
        assert_eq!(canonicalize_name(".note.gnu.build-id"), ".note.gnu.build-id");
    }

    #[test]
    fn new_section_is_alive_by_default() {
        let sec = InputSection::new(
            ".text".into(),
            vec![0; 16],
            (object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR) as u64,
            object::elf::SHT_PROGBITS,
            4,
            vec![],
            None,
            None,
        );
        assert!(sec.alive());
        sec.kill();
        assert!(!sec.alive());
    }
}
