//! File classification and `-l`/`-L` namespec resolution (§4.1).
//!
//! Every path the driver is handed — a positional argument, a `-lfoo`
//! namespec resolved against `-L` search directories, or a file named by a
//! linker script's `INPUT`/`GROUP` — funnels through [`classify`], which
//! looks at the file's own magic bytes rather than trusting its extension:
//! a `.a` can be a real archive or (rarely) a linker script naming further
//! inputs, and a bare path with no extension is routinely an ELF object.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};

use crate::input::script::ScriptAst;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const AR_MAGIC_COMMON: &[u8; 8] = b"!<arch>\n";
const AR_MAGIC_THIN: &[u8; 8] = b"!<thin>\n";

pub enum Classified {
    Object,
    Archive,
    /// `e_type == ET_DYN`: a shared object, distinguished from a
    /// relocatable object so the driver can apply `--as-needed` and avoid
    /// copy-relocation logic reserved for objects.
    SharedObject,
    Script(ScriptAst),
}

/// Inspect `path`'s contents and classify it. `data` is the already-mapped
/// file contents (the caller owns the mapping's lifetime).
pub fn classify(path: &Path, data: &[u8]) -> anyhow::Result<Classified> {
    if data.len() >= 4 && &data[0..4] == ELF_MAGIC {
        let e_type = read_e_type(data).with_context(|| format!("reading ELF header of {}", path.display()))?;
        return Ok(if e_type == object::elf::ET_DYN { Classified::SharedObject } else { Classified::Object });
    }
    if data.len() >= 8 && (&data[0..8] == AR_MAGIC_COMMON || &data[0..8] == AR_MAGIC_THIN) {
        return Ok(Classified::Archive);
    }
    // Not a recognized binary magic: attempt to parse as a linker script.
    // `ld` accepts arbitrary text here (including a GNU ld "ld script"
    // stand-in for a symlink-style `libfoo.so` wrapper naming the real
    // `.so` via an `INPUT` directive), so a parse failure is the file's
    // own error, not evidence it should have been binary.
    let text = std::str::from_utf8(data)
        .with_context(|| format!("{}: not ELF, not an archive, and not valid UTF-8 text", path.display()))?;
    let ast = crate::input::script::parse_script(text)
        .with_context(|| format!("{}: failed to parse as a linker script", path.display()))?;
    Ok(Classified::Script(ast))
}

fn read_e_type(data: &[u8]) -> anyhow::Result<u16> {
    use object::read::elf::FileHeader;
    let ei_class = *data.get(4).ok_or_else(|| anyhow!("truncated ELF identification"))?;
    let little = *data.get(5).ok_or_else(|| anyhow!("truncated ELF identification"))? == 1;
    let endian = if little { object::Endianness::Little } else { object::Endianness::Big };
    match ei_class {
        1 => {
            let header = object::elf::FileHeader32::<object::Endianness>::parse(data)
                .map_err(|e| anyhow!("parsing Elf32 header: {e}"))?;
            Ok(header.e_type(endian))
        }
        2 => {
            let header = object::elf::FileHeader64::<object::Endianness>::parse(data)
                .map_err(|e| anyhow!("parsing Elf64 header: {e}"))?;
            Ok(header.e_type(endian))
        }
        _ => Err(anyhow!("unrecognized ELF class byte {ei_class}")),
    }
}

/// Resolve a `-lfoo` namespec against the search path, preferring a shared
/// object unless `link_static` (`-Bstatic`/`--whole-archive` with
/// `-static`) forces a static-only search, matching `ld`'s own
/// `libfoo.so` before `libfoo.a` ordering.
pub fn resolve_library(name: &str, search_dirs: &[String], link_static: bool) -> anyhow::Result<PathBuf> {
    for dir in search_dirs {
        let dir = Path::new(dir);
        if !link_static {
            let so = dir.join(format!("lib{name}.so"));
            if so.is_file() {
                return Ok(so);
            }
        }
        let a = dir.join(format!("lib{name}.a"));
        if a.is_file() {
            return Ok(a);
        }
    }
    Err(anyhow!("cannot find -l{name}: searched {} director{}", search_dirs.len(), if search_dirs.len() == 1 { "y" } else { "ies" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn classifies_ar_magic_as_archive() {
        let data = b"!<arch>\n".to_vec();
        let classified = classify(Path::new("liba.a"), &data).unwrap();
        assert!(matches!(classified, Classified::Archive));
    }

    #[test]
    fn classifies_text_as_a_linker_script() {
        let data = b"INPUT(a.o b.o)".to_vec();
        let classified = classify(Path::new("group.ld"), &data).unwrap();
        match classified {
            Classified::Script(ast) => assert_eq!(ast.inputs, vec!["a.o", "b.o"]),
            _ => panic!("expected a script"),
        }
    }

    #[test]
    fn resolve_library_prefers_shared_object_when_not_static() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("libfoo.a")).unwrap();
        let mut so = std::fs::File::create(dir.path().join("libfoo.so")).unwrap();
        so.write_all(b"\x7fELF").unwrap();
        let dirs = vec![dir.path().to_string_lossy().into_owned()];
        let found = resolve_library("foo", &dirs, false).unwrap();
        assert_eq!(found.file_name().unwrap(), "libfoo.so");
    }

    #[test]
    fn resolve_library_static_only_skips_shared_object() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("libfoo.a")).unwrap();
        std::fs::File::create(dir.path().join("libfoo.so")).unwrap();
        let dirs = vec![dir.path().to_string_lossy().into_owned()];
        let found = resolve_library("foo", &dirs, true).unwrap();
        assert_eq!(found.file_name().unwrap(), "libfoo.a");
    }
}
