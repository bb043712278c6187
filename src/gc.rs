//! `--gc-sections` mark-sweep (§4.5).
//!
//! Roots are the entry symbol, every symbol named by `--undefined`/
//! `--require-defined`, every symbol the dynamic symbol table will export
//! (`SymbolDef::is_dynamic_export`, when linking a `-shared` output, since
//! any of those is a valid call target for code outside this link unit),
//! and any section whose flags mark it inherently un-collectable
//! (`SHF_ALLOC` sections GNU `ld` never drops: `.init_array`/
//! `.fini_array`/note sections), plus anything named by a `KEEP(...)`
//! placement in a linker script. From the roots, relocations are walked
//! transitively; anything never visited is swept (`InputSection::kill`).

use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use crate::context::{Context, SectionHandle};
use crate::section::RelocationTarget;

/// True for sections GNU `ld` treats as always-live regardless of
/// reachability (the C runtime's array-of-pointers sections, and
/// `.note.*`, which carries no code but must survive for the loader/ABI).
fn is_inherently_root(name: &str) -> bool {
    name.starts_with(".init_array")
        || name.starts_with(".fini_array")
        || name.starts_with(".ctors")
        || name.starts_with(".dtors")
        || name.starts_with(".init")
        || name.starts_with(".fini")
        || name.starts_with(".note")
        || name.starts_with(".eh_frame")
}

/// Run mark-sweep across every section already read into `ctx`. Sections
/// not reachable from a root are marked dead; later passes (merge, chunk
/// planning) only ever look at `Context::live_sections`.
pub fn run(ctx: &Context, keep_patterns: &[String]) {
    let mut queue: VecDeque<SectionHandle> = VecDeque::new();
    let mut roots_pushed = std::collections::HashSet::new();

    let mut push_root = |handle: SectionHandle, queue: &mut VecDeque<SectionHandle>| {
        if roots_pushed.insert(handle) {
            queue.push_back(handle);
        }
    };

    for (handle, section) in ctx.all_sections() {
        if !section.is_alloc() {
            continue;
        }
        if is_inherently_root(&section.name) || keep_patterns.iter().any(|p| crate::input::script::glob_match(p, &section.name)) {
            push_root(handle, &mut queue);
        }
    }

    let exports_dynamic_symbols = matches!(ctx.opt.output_kind, crate::opt::OutputKind::SharedObject);

    for (name, def) in ctx.symbols.snapshot() {
        if !def.is_defined() {
            continue;
        }
        let is_named_root = ctx.opt.entry.as_deref() == Some(name.as_str())
            || ctx.opt.undefined.iter().any(|u| u == &name)
            || ctx.opt.require_defined.iter().any(|u| u == &name)
            || name == "_start"
            || name == "main"
            || (exports_dynamic_symbols && def.is_dynamic_export());
        if is_named_root {
            if let Some(section) = def.section {
                push_root(SectionHandle { file: def.file, index: section }, &mut queue);
            }
        }
    }

    while let Some(handle) = queue.pop_front() {
        let section = ctx.section(handle);
        if section.is_visited.swap(true, Ordering::Relaxed) {
            continue;
        }
        for reloc in &section.relocations {
            match &reloc.target {
                RelocationTarget::Section(target) => push_root(*target, &mut queue),
                RelocationTarget::Symbol(name) => {
                    if let Some(def) = ctx.symbols.get(name) {
                        if let Some(target_section) = def.section {
                            push_root(SectionHandle { file: def.file, index: target_section }, &mut queue);
                        }
                    }
                }
            }
        }
    }

    for (handle, section) in ctx.all_sections() {
        if section.is_alloc() && !section.is_visited.load(Ordering::Relaxed) {
            section.kill();
        }
        let _ = handle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InputFile;
    use crate::opt::Opt;
    use crate::section::{InputSection, RelocationRecord};

    fn alloc_section(name: &str, relocs: Vec<RelocationRecord>) -> InputSection {
        InputSection::new(
            name.into(),
            vec![0; 4],
            object::elf::SHF_ALLOC as u64,
            object::elf::SHT_PROGBITS,
            1,
            relocs,
            None,
            None,
        )
    }

    #[test]
    fn unreachable_section_is_collected() {
        let target: &'static dyn crate::target::Target = {
            use crate::target::by_e_machine;
            by_e_machine(object::elf::EM_X86_64, true, true).unwrap()
        };
        let mut opt = Opt::default();
        opt.entry = Some("_start".to_string());
        let mut ctx = Context::new(opt, target);
        let live = alloc_section("live", vec![]);
        let dead = alloc_section("dead", vec![]);
        let file = InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![live, dead], local_symbols: vec![] };
        ctx.push_file(file);
        ctx.symbols
            .resolve(
                "_start",
                0,
                "a.o",
                0,
                &crate::symbol::LocalSymbol {
                    name: "_start".into(),
                    section: Some(0),
                    value: 0,
                    size: 0,
                    binding: crate::symbol::Binding::Strong,
                    visibility: crate::symbol::Visibility::Default,
                    is_global: true,
                    common_align: 1,
                },
                false,
            )
            .unwrap();

        run(&ctx, &[]);
        assert!(ctx.file(0).sections[0].alive());
        assert!(!ctx.file(0).sections[1].alive());
    }

    #[test]
    fn shared_object_export_survives_unreferenced() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut opt = Opt::default();
        opt.output_kind = crate::opt::OutputKind::SharedObject;
        let mut ctx = Context::new(opt, target);
        let exported = alloc_section("exported", vec![]);
        let unreferenced = alloc_section("unreferenced", vec![]);
        let file = InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![exported, unreferenced], local_symbols: vec![] };
        ctx.push_file(file);
        ctx.symbols
            .resolve(
                "libfn",
                0,
                "a.o",
                0,
                &crate::symbol::LocalSymbol {
                    name: "libfn".into(),
                    section: Some(0),
                    value: 0,
                    size: 0,
                    binding: crate::symbol::Binding::Strong,
                    visibility: crate::symbol::Visibility::Default,
                    is_global: true,
                    common_align: 1,
                },
                false,
            )
            .unwrap();

        run(&ctx, &[]);
        assert!(ctx.file(0).sections[0].alive());
        assert!(!ctx.file(0).sections[1].alive());
    }

    #[test]
    fn reachable_via_relocation_survives() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut opt = Opt::default();
        opt.entry = Some("_start".to_string());
        let mut ctx = Context::new(opt, target);
        let reloc = RelocationRecord {
            offset: 0,
            r_type: 0,
            addend: 0,
            target: RelocationTarget::Section(SectionHandle { file: 0, index: 1 }),
        };
        let live = alloc_section("live", vec![reloc]);
        let referenced = alloc_section("referenced", vec![]);
        let file = InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![live, referenced], local_symbols: vec![] };
        ctx.push_file(file);
        ctx.symbols
            .resolve(
                "_start",
                0,
                "a.o",
                0,
                &crate::symbol::LocalSymbol {
                    name: "_start".into(),
                    section: Some(0),
                    value: 0,
                    size: 0,
                    binding: crate::symbol::Binding::Strong,
                    visibility: crate::symbol::Visibility::Default,
                    is_global: true,
                    common_align: 1,
                },
                false,
            )
            .unwrap();

        run(&ctx, &[]);
        assert!(ctx.file(0).sections[1].alive());
    }
}
