//! Dynamic symbol table and `.dynamic` section emission for `-shared`
//! output (§4.8's synthetic-chunk list, §6's `DT_NEEDED`/`DT_SONAME`), plus
//! the `--build-id` note chunk (§4.11, §6).
//!
//! Scoped deliberately: this builds `.dynstr`/`.dynsym`/`.dynamic`/`.hash`/
//! `.note.gnu.build-id` as ordinary [`Chunk`]s so they flow through the
//! same address-assignment (`layout::run`) and section-header-writing path
//! every other output section already uses, rather than driving
//! `object::write::elf::Writer`'s own (unused here) dynamic-section
//! reservation API directly. No `.gnu.hash` lookup table and no GOT/PLT-
//! backed dynamic relocations are produced (tracked in DESIGN.md as the
//! next addition); what's here is enough to populate a real, inspectable
//! `.dynsym` per §8 scenario 2, a minimal `.dynamic` with
//! `DT_NEEDED`/`DT_SONAME`, a SysV `.hash` a real dynamic loader could
//! actually walk, and a build-id note with the canonical `Elf_Nhdr`
//! envelope.

use object::elf;

use crate::chunks::{Chunk, ChunkPiece};
use crate::context::Context;
use crate::section::OutputSectionKey;
use crate::symbol::Visibility;

const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;
const DT_HASH: u64 = 4;
const DT_STRTAB: u64 = 5;
const DT_SYMTAB: u64 = 6;
const DT_STRSZ: u64 = 10;
const DT_SYMENT: u64 = 11;
const DT_SONAME: u64 = 14;

/// SysV `.hash` (§5.4.6 of the gABI) name hash: same recurrence every
/// ELF dynamic linker implements, so a symbol looked up at runtime lands
/// in the same bucket this table puts it in.
fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in name {
        h = h.wrapping_shl(4).wrapping_add(b as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// Build the SysV `.hash` table for `names`, in the same order those
/// names were assigned consecutive `.dynsym` indices starting at 1 (index
/// 0 is the reserved null symbol). Hashed on the base name, not the
/// `name@@version` spelling `.dynstr` actually stores for a versioned
/// symbol: a real loader resolves the version separately via `.gnu.version`
/// once the base-name hash bucket has narrowed the search, which this
/// crate doesn't build yet (tracked in DESIGN.md).
fn build_hash_chunk(big_endian: bool, names: &[String]) -> Chunk {
    let nbucket = names.len().max(1) as u32;
    let nchain = names.len() as u32 + 1;
    let mut buckets = vec![0u32; nbucket as usize];
    let mut chain = vec![0u32; nchain as usize];
    for (i, name) in names.iter().enumerate() {
        let sym_idx = (i + 1) as u32;
        let bucket = (elf_hash(name.as_bytes()) % nbucket) as usize;
        chain[sym_idx as usize] = buckets[bucket];
        buckets[bucket] = sym_idx;
    }

    let mut bytes = Vec::with_capacity(8 + (buckets.len() + chain.len()) * 4);
    put_u32(&mut bytes, nbucket, big_endian);
    put_u32(&mut bytes, nchain, big_endian);
    for b in &buckets {
        put_u32(&mut bytes, *b, big_endian);
    }
    for c in &chain {
        put_u32(&mut bytes, *c, big_endian);
    }

    let mut chunk = plain_chunk(
        OutputSectionKey { name: ".hash".into(), flags: elf::SHF_ALLOC as u64, sh_type: elf::SHT_HASH },
        bytes,
        4,
    );
    chunk.sh_link_name = Some(".dynsym".into());
    chunk.sh_entsize = 4;
    chunk
}

fn put_u16(out: &mut Vec<u8>, v: u16, big_endian: bool) {
    out.extend_from_slice(&if big_endian { v.to_be_bytes() } else { v.to_le_bytes() });
}
fn put_u32(out: &mut Vec<u8>, v: u32, big_endian: bool) {
    out.extend_from_slice(&if big_endian { v.to_be_bytes() } else { v.to_le_bytes() });
}
fn put_u64(out: &mut Vec<u8>, v: u64, big_endian: bool) {
    out.extend_from_slice(&if big_endian { v.to_be_bytes() } else { v.to_le_bytes() });
}

struct DynStrBuilder {
    bytes: Vec<u8>,
}

impl DynStrBuilder {
    fn new() -> Self {
        // Index 0 is always the empty string, per ELF convention.
        DynStrBuilder { bytes: vec![0] }
    }

    fn add(&mut self, s: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        offset
    }
}

fn plain_chunk(key: OutputSectionKey, bytes: Vec<u8>, align: u64) -> Chunk {
    Chunk {
        key,
        pieces: Vec::<ChunkPiece>::new(),
        bytes,
        align,
        addr: 0,
        file_offset: 0,
        sh_link_name: None,
        sh_info: 0,
        sh_entsize: 0,
    }
}

const NT_GNU_BUILD_ID: u32 = 3;
/// `SHA-256`-derived digest width the writer stamps into the note's
/// descriptor; narrower than the full digest to match the conventional
/// `--build-id=sha1`-shaped 20-byte identifier most toolchains expect.
pub const BUILD_ID_SIZE: usize = 20;

/// Reserve a `.note.gnu.build-id` chunk with a real `Elf32_Nhdr`/
/// `Elf64_Nhdr` envelope (the note header layout is word-width-independent
/// per the gABI) and a zero-filled descriptor of [`BUILD_ID_SIZE`] bytes.
/// The descriptor is patched in `writer::apply_build_id` once the whole
/// image is assembled and every other chunk's bytes are final — the note
/// chunk's own bytes (including its zero descriptor) are hashed right
/// along with everything else, so the hash covers "everything except the
/// build-id bytes themselves" (§4.11) rather than the whole note.
pub fn build_id_chunk(big_endian: bool) -> Chunk {
    let name = b"GNU\0";
    let mut bytes = Vec::with_capacity(4 + 4 + 4 + name.len() + BUILD_ID_SIZE);
    put_u32(&mut bytes, name.len() as u32, big_endian);
    put_u32(&mut bytes, BUILD_ID_SIZE as u32, big_endian);
    put_u32(&mut bytes, NT_GNU_BUILD_ID, big_endian);
    bytes.extend_from_slice(name);
    bytes.extend(std::iter::repeat(0u8).take(BUILD_ID_SIZE));

    plain_chunk(
        OutputSectionKey { name: ".note.gnu.build-id".into(), flags: elf::SHF_ALLOC as u64, sh_type: elf::SHT_NOTE },
        bytes,
        4,
    )
}

/// Byte offset of the descriptor (the build-id digest itself) within a
/// chunk built by [`build_id_chunk`], so the writer can locate it again
/// once the chunk has a final file offset.
pub fn build_id_descriptor_offset() -> u64 {
    (4 + 4 + 4 + 4) as u64 // namesz, descsz, type, "GNU\0"
}

/// Build `.dynstr`, `.dynsym`, and `.dynamic` for a `-shared` link.
/// Returns an empty list for any other output kind.
pub fn plan(ctx: &Context) -> Vec<Chunk> {
    if !matches!(ctx.opt.output_kind, crate::opt::OutputKind::SharedObject) {
        return Vec::new();
    }

    let big_endian = ctx.target.big_endian();
    let is_64 = ctx.target.is_64();
    let sym_entsize: u64 = if is_64 { 24 } else { 16 };
    let dyn_entsize: u64 = if is_64 { 16 } else { 8 };

    let mut dynstr = DynStrBuilder::new();

    let versions = ctx.symbol_versions.lock().unwrap();
    let mut exported: Vec<(String, crate::symbol::SymbolDef)> =
        ctx.symbols.snapshot().into_iter().filter(|(_, def)| def.is_dynamic_export()).collect();
    exported.sort_by(|a, b| a.0.cmp(&b.0));

    let mut dynsym = Vec::new();
    // Null symbol at index 0.
    dynsym.resize(sym_entsize as usize, 0);

    for (name, def) in &exported {
        let rendered = match versions.get(name) {
            Some(tag) => format!("{name}@@{tag}"),
            None => name.clone(),
        };
        let name_off = dynstr.add(&rendered);
        let bind = match def.visibility {
            Visibility::Protected => elf::STV_PROTECTED,
            _ => elf::STV_DEFAULT,
        };
        let mut entry = Vec::with_capacity(sym_entsize as usize);
        if is_64 {
            put_u32(&mut entry, name_off, big_endian);
            entry.push((elf::STB_GLOBAL << 4) | elf::STT_NOTYPE);
            entry.push(bind);
            put_u16(&mut entry, elf::SHN_ABS, big_endian);
            put_u64(&mut entry, def.value, big_endian);
            put_u64(&mut entry, def.size, big_endian);
        } else {
            put_u32(&mut entry, name_off, big_endian);
            put_u32(&mut entry, def.value as u32, big_endian);
            put_u32(&mut entry, def.size as u32, big_endian);
            entry.push((elf::STB_GLOBAL << 4) | elf::STT_NOTYPE);
            entry.push(bind);
            put_u16(&mut entry, elf::SHN_ABS, big_endian);
        }
        dynsym.extend_from_slice(&entry);
    }
    drop(versions);

    let needed = ctx.needed_sonames.lock().unwrap().clone();
    let mut dynamic_entries: Vec<(u64, u64)> = Vec::new();
    for soname in &needed {
        let off = dynstr.add(soname);
        dynamic_entries.push((DT_NEEDED, off as u64));
    }
    if let Some(soname) = &ctx.opt.soname {
        let off = dynstr.add(soname);
        dynamic_entries.push((DT_SONAME, off as u64));
    }
    // DT_HASH/DT_SYMTAB/DT_STRTAB are address-valued and not known until
    // `layout::run` places the chunks they point at; `writer::write`
    // patches these placeholders in once every chunk has its final
    // address, the same "reserve now, fill later" split `got.rs` uses.
    dynamic_entries.push((DT_HASH, 0));
    dynamic_entries.push((DT_SYMTAB, 0));
    dynamic_entries.push((DT_STRTAB, 0));
    dynamic_entries.push((DT_STRSZ, dynstr.bytes.len() as u64));
    dynamic_entries.push((DT_SYMENT, sym_entsize));
    dynamic_entries.push((DT_NULL, 0));

    let mut dynamic_bytes = Vec::new();
    for (tag, val) in &dynamic_entries {
        if is_64 {
            put_u64(&mut dynamic_bytes, *tag, big_endian);
            put_u64(&mut dynamic_bytes, *val, big_endian);
        } else {
            put_u32(&mut dynamic_bytes, *tag as u32, big_endian);
            put_u32(&mut dynamic_bytes, *val as u32, big_endian);
        }
    }

    let ptr_align = if is_64 { 8 } else { 4 };

    let mut dynstr_chunk = plain_chunk(
        OutputSectionKey { name: ".dynstr".into(), flags: elf::SHF_ALLOC as u64, sh_type: elf::SHT_STRTAB },
        dynstr.bytes,
        1,
    );
    dynstr_chunk.sh_entsize = 0;

    let mut dynsym_chunk = plain_chunk(
        OutputSectionKey { name: ".dynsym".into(), flags: elf::SHF_ALLOC as u64, sh_type: elf::SHT_DYNSYM },
        dynsym,
        ptr_align,
    );
    dynsym_chunk.sh_link_name = Some(".dynstr".into());
    dynsym_chunk.sh_info = 1; // one local (null) symbol, matching the reserved index-0 entry
    dynsym_chunk.sh_entsize = sym_entsize;

    let mut dynamic_chunk = plain_chunk(
        OutputSectionKey {
            name: ".dynamic".into(),
            flags: (elf::SHF_ALLOC | elf::SHF_WRITE) as u64,
            sh_type: elf::SHT_DYNAMIC,
        },
        dynamic_bytes,
        ptr_align,
    );
    dynamic_chunk.sh_link_name = Some(".dynstr".into());
    dynamic_chunk.sh_entsize = dyn_entsize;

    let hash_names: Vec<String> = exported.iter().map(|(name, _)| name.clone()).collect();
    let hash_chunk = build_hash_chunk(big_endian, &hash_names);

    vec![dynstr_chunk, dynsym_chunk, dynamic_chunk, hash_chunk]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InputFile;
    use crate::opt::{Opt, OutputKind};
    use crate::symbol::{Binding, LocalSymbol};

    #[test]
    fn exports_only_default_visibility_symbols_with_version_suffix() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut opt = Opt::default();
        opt.output_kind = OutputKind::SharedObject;
        let mut ctx = Context::new(opt, target);
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![], local_symbols: vec![] });
        let mk = |vis| LocalSymbol {
            name: String::new(),
            section: None,
            value: 0x1000,
            size: 8,
            binding: Binding::Strong,
            visibility: vis,
            is_global: true,
            common_align: 1,
        };
        ctx.symbols.resolve("foo", 0, "a.o", 0, &LocalSymbol { name: "foo".into(), ..mk(crate::symbol::Visibility::Default) }, false).unwrap();
        ctx.symbols.resolve("bar", 0, "a.o", 0, &LocalSymbol { name: "bar".into(), ..mk(crate::symbol::Visibility::Default) }, false).unwrap();
        ctx.symbols.strengthen_visibility("bar", crate::symbol::Visibility::Hidden);
        ctx.symbol_versions.lock().unwrap().insert("foo".to_string(), "VER_X1".to_string());

        let chunks = plan(&ctx);
        let dynsym = chunks.iter().find(|c| c.key.name == ".dynsym").unwrap();
        let dynstr = chunks.iter().find(|c| c.key.name == ".dynstr").unwrap();
        // one null entry (24 bytes) + one exported symbol (foo)
        assert_eq!(dynsym.bytes.len(), 48);
        let text = String::from_utf8_lossy(&dynstr.bytes);
        assert!(text.contains("foo@@VER_X1"));
        assert!(!text.contains("bar"));
    }

    #[test]
    fn hash_chunk_bucket_count_tracks_exported_symbol_count() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut opt = Opt::default();
        opt.output_kind = OutputKind::SharedObject;
        let mut ctx = Context::new(opt, target);
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![], local_symbols: vec![] });
        let mk = |name: &str| LocalSymbol {
            name: name.into(),
            section: None,
            value: 0x2000,
            size: 4,
            binding: Binding::Strong,
            visibility: crate::symbol::Visibility::Default,
            is_global: true,
            common_align: 1,
        };
        ctx.symbols.resolve("foo", 0, "a.o", 0, &mk("foo"), false).unwrap();
        ctx.symbols.resolve("bar", 0, "a.o", 0, &mk("bar"), false).unwrap();

        let chunks = plan(&ctx);
        let hash = chunks.iter().find(|c| c.key.name == ".hash").unwrap();
        // 2 header words + 2 buckets + 3 chain slots (null + 2 symbols), all 32-bit
        assert_eq!(hash.bytes.len(), (2 + 2 + 3) * 4);
        let nbucket = u32::from_le_bytes(hash.bytes[0..4].try_into().unwrap());
        let nchain = u32::from_le_bytes(hash.bytes[4..8].try_into().unwrap());
        assert_eq!(nbucket, 2);
        assert_eq!(nchain, 3);
    }

    #[test]
    fn dynamic_reserves_placeholder_address_tags() {
        let target = crate::target::by_e_machine(object::elf::EM_X86_64, true, true).unwrap();
        let mut opt = Opt::default();
        opt.output_kind = OutputKind::SharedObject;
        let mut ctx = Context::new(opt, target);
        ctx.push_file(InputFile { id: 0, name: "a.o".into(), priority: 0, sections: vec![], local_symbols: vec![] });

        let chunks = plan(&ctx);
        let dynamic = chunks.iter().find(|c| c.key.name == ".dynamic").unwrap();
        let mut tags = Vec::new();
        for entry in dynamic.bytes.chunks(16) {
            tags.push(u64::from_le_bytes(entry[0..8].try_into().unwrap()));
        }
        assert!(tags.contains(&DT_HASH));
        assert!(tags.contains(&DT_SYMTAB));
        assert!(tags.contains(&DT_STRTAB));
        assert!(tags.contains(&DT_STRSZ));
        assert!(tags.contains(&DT_SYMENT));
        assert_eq!(*tags.last().unwrap(), DT_NULL);
    }
}
