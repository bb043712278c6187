//! Identical code folding (§4.6).
//!
//! Candidates are `.text` sections eligible under the current `--icf` mode
//! (`all` folds every byte-identical section; `safe` additionally excludes
//! any section whose address is taken — i.e. referenced by some relocation,
//! anywhere in the link, that is not itself a direct call/jump per
//! `Target::is_branch_relocation`). Folding proceeds by iterative
//! refinement: two sections start in the same class if their raw bytes,
//! flags, and relocation *shape* (offset, type, addend, and the class of
//! whatever each relocation targets) agree; classes are then refined until
//! a fixpoint, since two sections can only be truly identical if everything
//! they reference is itself identical.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::context::{Context, SectionHandle};
use crate::opt::IcfMode;
use crate::section::RelocationTarget;

/// Every section some relocation addresses without going through a
/// call/jump instruction — `--icf=safe`'s exclusion set. Scanned across
/// *every* live section (not just the folding candidates), since a data
/// section's function-pointer table is exactly the case this test exists
/// to catch.
fn address_taken_sections(ctx: &Context) -> HashSet<SectionHandle> {
    let mut taken = HashSet::new();
    for (_, section) in ctx.live_sections() {
        for reloc in &section.relocations {
            if ctx.target.is_branch_relocation(reloc.r_type) {
                continue;
            }
            match &reloc.target {
                RelocationTarget::Section(handle) => {
                    taken.insert(*handle);
                }
                RelocationTarget::Symbol(name) => {
                    if let Some(def) = ctx.symbols.get(name) {
                        if let Some(idx) = def.section {
                            taken.insert(SectionHandle { file: def.file, index: idx });
                        }
                    }
                }
            }
        }
    }
    taken
}

/// Map from a folded-away section to the representative section that
/// survives in the output; consulted wherever a relocation target or
/// layout lookup would otherwise land on a dead duplicate.
pub struct FoldMap {
    aliases: FxHashMap<SectionHandle, SectionHandle>,
}

impl FoldMap {
    pub fn resolve(&self, handle: SectionHandle) -> SectionHandle {
        self.aliases.get(&handle).copied().unwrap_or(handle)
    }
}

/// A coarse per-section signature used as the initial partition before
/// refinement: content, flags, and the (offset, r_type, addend) shape of
/// every relocation (target identity is refined in later rounds).
#[derive(Hash, PartialEq, Eq, Clone)]
struct ShapeKey {
    data: Vec<u8>,
    flags: u64,
    reloc_shape: Vec<(u64, u32, i64)>,
}

pub fn run(ctx: &Context, mode: IcfMode) -> FoldMap {
    if mode == IcfMode::None {
        return FoldMap { aliases: FxHashMap::default() };
    }

    let address_taken = if mode == IcfMode::Safe { address_taken_sections(ctx) } else { HashSet::new() };

    let candidates: Vec<SectionHandle> = ctx
        .live_sections()
        .filter(|(h, s)| s.is_executable() && eligible(s, mode, *h, &address_taken))
        .map(|(h, _)| h)
        .collect();

    if candidates.len() < 2 {
        return FoldMap { aliases: FxHashMap::default() };
    }

    // Round 0: partition purely on local shape. Computing each candidate's
    // key only ever reads its own section (cloning its bytes and
    // relocation shape), so every worker can build its own key
    // concurrently; only the bucket assignment that follows is sequential,
    // since it's what fixes the (otherwise thread-count-dependent) class
    // numbering.
    let keys: Vec<(SectionHandle, ShapeKey)> = candidates
        .par_iter()
        .map(|&handle| {
            let section = ctx.section(handle);
            let reloc_shape = section.relocations.iter().map(|r| (r.offset, r.r_type, r.addend)).collect();
            (handle, ShapeKey { data: section.data.clone(), flags: section.sh_flags, reloc_shape })
        })
        .collect();
    let mut class_of: HashMap<SectionHandle, u64> = HashMap::new();
    {
        let mut buckets: HashMap<ShapeKey, u64> = HashMap::new();
        let mut next_class = 0u64;
        for (handle, key) in keys {
            let class = *buckets.entry(key).or_insert_with(|| {
                let c = next_class;
                next_class += 1;
                c
            });
            class_of.insert(handle, class);
        }
    }

    // Refine: two sections in the same class only stay together if every
    // relocation target resolves to sections that are themselves still in
    // the same class as each other (by index). Bounded iteration count
    // matches the thunk fixpoint's own bounded-loop philosophy (§9): code
    // graphs converge in a handful of rounds in practice, and a cap avoids
    // pathological non-termination on adversarial input.
    for _ in 0..8 {
        let mut changed = false;
        // Every candidate's refinement key depends only on the previous
        // round's `class_of` snapshot (read-only here), so this pass runs
        // one worker per candidate; only folding the per-candidate results
        // into new class numbers afterwards needs to stay sequential.
        let refined: HashMap<SectionHandle, Vec<u64>> = candidates
            .par_iter()
            .map(|&handle| {
                let section = ctx.section(handle);
                let mut target_classes: Vec<u64> = section
                    .relocations
                    .iter()
                    .map(|r| match &r.target {
                        RelocationTarget::Section(target) => class_of.get(target).copied().unwrap_or(u64::MAX),
                        RelocationTarget::Symbol(name) => ctx
                            .symbols
                            .get(name)
                            .and_then(|def| def.section)
                            .and_then(|idx| class_of.get(&SectionHandle { file: def_file(ctx, name), index: idx }).copied())
                            .unwrap_or(u64::MAX),
                    })
                    .collect();
                target_classes.sort_unstable();
                (handle, target_classes)
            })
            .collect();

        let mut buckets: HashMap<(u64, Vec<u64>), u64> = HashMap::new();
        let mut next_class = 0u64;
        let mut new_class_of = HashMap::new();
        for &handle in &candidates {
            let base = class_of[&handle];
            let refinement = refined.remove(&handle).unwrap_or_default();
            let key = (base, refinement);
            let class = *buckets.entry(key).or_insert_with(|| {
                let c = next_class;
                next_class += 1;
                c
            });
            if class_of.get(&handle) != Some(&class) {
                changed = true;
            }
            new_class_of.insert(handle, class);
        }
        class_of = new_class_of;
        if !changed {
            break;
        }
    }

    // Within each final class, the lowest-priority (earliest command-line)
    // file's section is the representative; every other member folds into
    // it and is killed.
    let mut by_class: HashMap<u64, Vec<SectionHandle>> = HashMap::new();
    for &handle in &candidates {
        by_class.entry(class_of[&handle]).or_default().push(handle);
    }

    let mut aliases = FxHashMap::default();
    for members in by_class.values() {
        if members.len() < 2 {
            continue;
        }
        let representative = *members
            .iter()
            .min_by_key(|h| (ctx.file(h.file).priority, h.index))
            .unwrap();
        for &member in members {
            if member == representative {
                continue;
            }
            ctx.section(member).kill();
            aliases.insert(member, representative);
        }
    }

    FoldMap { aliases }
}

fn def_file(ctx: &Context, name: &str) -> crate::context::FileId {
    ctx.symbols.get(name).map(|d| d.file).unwrap_or(0)
}

fn eligible(section: &crate::section::InputSection, mode: IcfMode, handle: SectionHandle, address_taken: &HashSet<SectionHandle>) -> bool {
    match mode {
        IcfMode::None => false,
        IcfMode::All => true,
        // §4.6: "restricts candidates to those whose address is not
        // taken (symbols lacking any non-branch-relocation reference)".
        IcfMode::Safe => !address_taken.contains(&handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InputFile;
    use crate::opt::Opt;
    use crate::section::InputSection;

    fn text_section(data: &[u8]) -> InputSection {
        InputSection::new(
            ".text.f".into(),
            data.to_vec(),
            (object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR) as u64,
            object::elf::SHT_PROGBITS,
            1,
            vec![],
            None,
            None,
        )
    }

    #[test]
    fn identical_sections_fold_to_one_representative() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut ctx = Context::new(Opt::default(), target);
        let file = InputFile {
            id: 0,
            name: "a.o".into(),
            priority: 0,
            sections: vec![text_section(&[0x90, 0xc3]), text_section(&[0x90, 0xc3]), text_section(&[0xcc])],
            local_symbols: vec![],
        };
        ctx.push_file(file);

        let fold_map = run(&ctx, IcfMode::All);
        assert!(ctx.file(0).sections[0].alive());
        assert!(!ctx.file(0).sections[1].alive());
        assert!(ctx.file(0).sections[2].alive());
        assert_eq!(
            fold_map.resolve(SectionHandle { file: 0, index: 1 }),
            SectionHandle { file: 0, index: 0 }
        );
    }

    #[test]
    fn safe_mode_skips_a_section_whose_address_is_taken() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut ctx = Context::new(Opt::default(), target);
        // Section 0 ("f") and section 1 ("g") are byte-identical; a data
        // section (index 2) holds a non-branch (R64, address-taking)
        // relocation against "f", so only "g" may fold under `safe`.
        let data_section = InputSection::new(
            ".data".into(),
            vec![0; 8],
            (object::elf::SHF_ALLOC | object::elf::SHF_WRITE) as u64,
            object::elf::SHT_PROGBITS,
            8,
            vec![crate::section::RelocationRecord {
                offset: 0,
                r_type: 1, // x86-64 R_X86_64_64, not a branch relocation
                addend: 0,
                target: RelocationTarget::Symbol("f".into()),
            }],
            None,
            None,
        );
        let file = InputFile {
            id: 0,
            name: "a.o".into(),
            priority: 0,
            sections: vec![text_section(&[0x90, 0xc3]), text_section(&[0x90, 0xc3]), data_section],
            local_symbols: vec![],
        };
        ctx.push_file(file);
        ctx.symbols
            .resolve(
                "f",
                0,
                "a.o",
                0,
                &crate::symbol::LocalSymbol {
                    name: "f".into(),
                    section: Some(0),
                    value: 0,
                    size: 2,
                    binding: crate::symbol::Binding::Strong,
                    visibility: crate::symbol::Visibility::Default,
                    is_global: true,
                    common_align: 1,
                },
                false,
            )
            .unwrap();

        let fold_map = run(&ctx, IcfMode::Safe);
        assert!(ctx.file(0).sections[0].alive()); // address-taken: survives
        assert!(!ctx.file(0).sections[1].alive()); // untaken duplicate: folded away
        assert_eq!(
            fold_map.resolve(SectionHandle { file: 0, index: 1 }),
            SectionHandle { file: 0, index: 0 }
        );
    }

    #[test]
    fn icf_none_folds_nothing() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut ctx = Context::new(Opt::default(), target);
        let file = InputFile {
            id: 0,
            name: "a.o".into(),
            priority: 0,
            sections: vec![text_section(&[0x90]), text_section(&[0x90])],
            local_symbols: vec![],
        };
        ctx.push_file(file);
        run(&ctx, IcfMode::None);
        assert!(ctx.file(0).sections[0].alive());
        assert!(ctx.file(0).sections[1].alive());
    }
}
