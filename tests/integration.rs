//! Crate-level integration scenarios, driven entirely through the public
//! `mold_rs::driver::link` entry point against real ELF fixtures built at
//! runtime with `object::write` (no binary fixtures to maintain).
//!
//! Covers three of the scenarios end to end: `--gc-sections` dropping an
//! unreferenced function, a strong/strong multiple-definition conflict
//! failing the link, and a version script narrowing `.dynsym` to the
//! symbols it marks `global:`. The other three scenarios (mutually
//! recursive archive extraction, ARM32 thunk insertion with actual
//! execution, and common-symbol bss sizing) are exercised at the unit
//! level next to the code they cover instead:
//! `src/input/archive.rs`'s `lazy_extractor_pulls_only_members_that_satisfy_demand`,
//! `src/symbol.rs`'s `common_symbols_collapse_to_largest_with_lcm_alignment`,
//! and `src/target.rs`'s `arm32_thunk_is_absolute_long_branch` (the thunk
//! veneer itself) plus `src/layout.rs`'s permission-segment tests (the
//! fixpoint loop that calls it). Building a real `ar` archive with a
//! working GNU symbol-table member, or running a cross-compiled ARM32
//! binary under an emulator to check its printed output, would need
//! fixture machinery this crate doesn't otherwise carry a dependency for;
//! those two stay unit-level rather than growing a test-only dependency
//! surface.

use std::fs;

use mold_rs::opt::{FileOpt, ObjectFileOpt, Opt, OutputKind};
use object::write::{Object, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, Object as _, ObjectSection, SectionKind, SymbolFlags,
    SymbolKind, SymbolScope,
};

fn write_object(path: &std::path::Path, build: impl FnOnce(&mut Object)) {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    build(&mut obj);
    fs::write(path, obj.write().unwrap()).unwrap();
}

#[test]
fn gc_sections_removes_unreferenced_function() {
    let dir = tempfile::tempdir().unwrap();
    let obj_path = dir.path().join("a.o");
    write_object(&obj_path, |obj| {
        let segment = obj.segment_name(object::write::StandardSegment::Text).to_vec();

        let text_main = obj.add_section(segment.clone(), b".text.main".to_vec(), SectionKind::Text);
        let main_off = obj.append_section_data(text_main, &[0x90, 0x90, 0xc3], 1);
        obj.add_symbol(Symbol {
            name: b"main".to_vec(),
            value: main_off,
            size: 3,
            kind: SymbolKind::Text,
            scope: SymbolScope::Dynamic,
            weak: false,
            section: SymbolSection::Section(text_main),
            flags: SymbolFlags::None,
        });

        let text_foo = obj.add_section(segment, b".text.foo".to_vec(), SectionKind::Text);
        let foo_off = obj.append_section_data(text_foo, &[0xcc; 5], 1);
        obj.add_symbol(Symbol {
            name: b"foo".to_vec(),
            value: foo_off,
            size: 5,
            kind: SymbolKind::Text,
            scope: SymbolScope::Dynamic,
            weak: false,
            section: SymbolSection::Section(text_foo),
            flags: SymbolFlags::None,
        });
    });

    let out_path = dir.path().join("out.o");
    let opt = Opt {
        gc_sections: true,
        output_kind: OutputKind::Relocatable,
        output: Some(out_path.display().to_string()),
        obj_file: vec![ObjectFileOpt::File(FileOpt {
            name: obj_path.display().to_string(),
            as_needed: false,
            whole_archive: false,
        })],
        ..Opt::default()
    };
    mold_rs::driver::link(opt).expect("link should succeed");

    let out_bytes = fs::read(&out_path).unwrap();
    assert!(out_bytes.windows(3).any(|w| w == [0x90, 0x90, 0xc3]), "main's bytes must survive GC");
    assert!(!out_bytes.windows(5).any(|w| w == [0xcc; 5]), "foo's unreferenced section must be collected");
}

#[test]
fn strong_multiple_definition_fails_the_link() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a.o");
    let b_path = dir.path().join("b.o");
    for (path, byte) in [(&a_path, 1u8), (&b_path, 2u8)] {
        write_object(path, |obj| {
            let data = obj.section_id(object::write::StandardSection::Data);
            let off = obj.append_section_data(data, &[byte; 4], 4);
            obj.add_symbol(Symbol {
                name: b"x".to_vec(),
                value: off,
                size: 4,
                kind: SymbolKind::Data,
                scope: SymbolScope::Dynamic,
                weak: false,
                section: SymbolSection::Section(data),
                flags: SymbolFlags::None,
            });
        });
    }

    let out_path = dir.path().join("out.o");
    let opt = Opt {
        output_kind: OutputKind::Relocatable,
        output: Some(out_path.display().to_string()),
        obj_file: vec![
            ObjectFileOpt::File(FileOpt { name: a_path.display().to_string(), as_needed: false, whole_archive: false }),
            ObjectFileOpt::File(FileOpt { name: b_path.display().to_string(), as_needed: false, whole_archive: false }),
        ],
        ..Opt::default()
    };
    let result = mold_rs::driver::link(opt);
    assert!(result.is_err(), "two strong definitions of `x` must fail the link");
}

#[test]
fn version_script_narrows_dynsym_to_global_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let obj_path = dir.path().join("a.o");
    write_object(&obj_path, |obj| {
        let data = obj.section_id(object::write::StandardSection::Data);
        for (name, byte) in [("foo", 1u8), ("bar", 2u8), ("baz", 3u8)] {
            let off = obj.append_section_data(data, &[byte; 4], 4);
            obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: off,
                size: 4,
                kind: SymbolKind::Data,
                scope: SymbolScope::Dynamic,
                weak: false,
                section: SymbolSection::Section(data),
                flags: SymbolFlags::None,
            });
        }
    });

    let script_path = dir.path().join("ver.script");
    fs::write(&script_path, "VER_X1 { global: *; local: b*; };").unwrap();

    let out_path = dir.path().join("out.so");
    let opt = Opt {
        output_kind: OutputKind::SharedObject,
        version_script: Some(script_path.display().to_string()),
        output: Some(out_path.display().to_string()),
        obj_file: vec![ObjectFileOpt::File(FileOpt { name: obj_path.display().to_string(), as_needed: false, whole_archive: false })],
        ..Opt::default()
    };
    mold_rs::driver::link(opt).expect("link should succeed");

    let out_bytes = fs::read(&out_path).unwrap();
    let file = object::File::parse(&*out_bytes).unwrap();
    let dynsym = file.section_by_name(".dynsym").expect(".dynsym must be present").data().unwrap();
    let dynstr = file.section_by_name(".dynstr").expect(".dynstr must be present").data().unwrap();

    // Entry 0 is the reserved null symbol; each entry is 24 bytes on a
    // 64-bit target (see `dynamic.rs`'s `sym_entsize`).
    let mut names = Vec::new();
    for entry in dynsym.chunks_exact(24).skip(1) {
        let name_off = u32::from_le_bytes(entry[0..4].try_into().unwrap()) as usize;
        let end = dynstr[name_off..].iter().position(|&b| b == 0).unwrap();
        names.push(String::from_utf8_lossy(&dynstr[name_off..name_off + end]).into_owned());
    }

    assert_eq!(names, vec!["foo@@VER_X1".to_string()], "only `foo` should survive the `local: b*` pattern");
}
