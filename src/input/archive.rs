//! `ar` archive parsing and lazy, worklist-driven member extraction (§4.3).
//!
//! Two archive flavors are accepted: the common format, where each member's
//! bytes sit inline in the archive file, and the thin format (`!<thin>\n`),
//! where each header instead names a path to read the member from
//! (produced by `ar rcST`). Both share the same 60-byte header layout.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};

const GLOBAL_HEADER: &[u8; 8] = b"!<arch>\n";
const THIN_HEADER: &[u8; 8] = b"!<thin>\n";
const HEADER_LEN: usize = 60;

/// One member's header plus either its inline bytes (common format) or the
/// external path it lives at (thin format).
pub struct ArchiveMember {
    pub name: String,
    pub body: MemberBody,
}

pub enum MemberBody {
    Inline(Vec<u8>),
    ThinPath(PathBuf),
}

impl ArchiveMember {
    /// Read the member's bytes, resolving a thin-archive path relative to
    /// the archive's own directory if given.
    pub fn data(&self) -> anyhow::Result<std::borrow::Cow<'_, [u8]>> {
        match &self.body {
            MemberBody::Inline(bytes) => Ok(std::borrow::Cow::Borrowed(bytes)),
            MemberBody::ThinPath(path) => {
                let bytes = std::fs::read(path).with_context(|| format!("reading thin archive member {}", path.display()))?;
                Ok(std::borrow::Cow::Owned(bytes))
            }
        }
    }
}

pub struct Archive {
    pub is_thin: bool,
    pub members: Vec<ArchiveMember>,
    /// Symbol name -> member indices that define it, built from the `/` (or
    /// `/SYM64/`) symbol-table member. Drives lazy extraction: a member is
    /// only pulled in once something already-extracted references one of
    /// its symbols.
    pub symbol_index: HashMap<String, Vec<usize>>,
    /// Per-member extraction state, kept on the `Archive` itself (rather
    /// than a separate borrowing `LazyExtractor`) so a `Vec<Archive>` can
    /// grow across the fixpoint loop in `driver::link` without running
    /// into a self-referential borrow.
    extracted: RefCell<Vec<bool>>,
}

/// Parse an `ar` archive's bytes. `dir` is the archive's containing
/// directory, used to resolve thin-member paths that are relative.
pub fn parse(data: &[u8], dir: &Path) -> anyhow::Result<Archive> {
    if data.len() < 8 {
        return Err(anyhow!("archive too short to contain a magic header"));
    }
    let is_thin = if &data[0..8] == GLOBAL_HEADER {
        false
    } else if &data[0..8] == THIN_HEADER {
        true
    } else {
        return Err(anyhow!("not an ar archive (bad magic)"));
    };

    let mut pos = 8usize;
    let mut long_names: Vec<u8> = Vec::new();
    let mut sym_names: Vec<(String, u64)> = Vec::new(); // (symbol, member offset)
    let mut offset_to_member: HashMap<u64, usize> = HashMap::new();
    let mut members = Vec::new();

    while pos + HEADER_LEN <= data.len() {
        let header = &data[pos..pos + HEADER_LEN];
        let raw_name = std::str::from_utf8(&header[0..16]).unwrap_or("").trim_end();
        let size_str = std::str::from_utf8(&header[48..58]).unwrap_or("0").trim();
        let size: usize = size_str.trim().parse().unwrap_or(0);
        let member_start = pos; // offset of this header, used as the symbol-table's member key
        let data_start = pos + HEADER_LEN;
        if &header[58..60] != b"\x60\n" {
            return Err(anyhow!("archive member header at offset {pos} missing terminator"));
        }

        let body_end = if is_thin { data_start } else { (data_start + size).min(data.len()) };
        let body_slice = if is_thin { &[][..] } else { &data[data_start..body_end] };

        if raw_name == "/" {
            // GNU symbol table: skip for thin archives' own bookkeeping,
            // parsed below instead via a dedicated pass since we need
            // member byte offsets resolved after this loop completes.
            sym_names.extend(parse_gnu_symtab(body_slice, member_start as u64));
        } else if raw_name == "/SYM64/" {
            sym_names.extend(parse_gnu_symtab64(body_slice, member_start as u64));
        } else if raw_name == "//" {
            long_names = body_slice.to_vec();
        } else {
            let name = resolve_name(raw_name, &long_names);
            offset_to_member.insert(member_start as u64, members.len());
            if is_thin {
                let member_path = if Path::new(&name).is_absolute() { PathBuf::from(&name) } else { dir.join(&name) };
                members.push(ArchiveMember { name, body: MemberBody::ThinPath(member_path) });
            } else {
                members.push(ArchiveMember { name, body: MemberBody::Inline(body_slice.to_vec()) });
            }
        }

        let advance = HEADER_LEN + if is_thin { 0 } else { size };
        pos += advance + (advance % 2); // members are 2-byte aligned, padded with '\n'
    }

    let mut symbol_index: HashMap<String, Vec<usize>> = HashMap::new();
    for (name, member_offset) in sym_names {
        if let Some(&idx) = offset_to_member.get(&member_offset) {
            symbol_index.entry(name).or_default().push(idx);
        }
    }

    let extracted = RefCell::new(vec![false; members.len()]);
    Ok(Archive { is_thin, members, symbol_index, extracted })
}

fn resolve_name(raw_name: &str, long_names: &[u8]) -> String {
    if let Some(idx) = raw_name.strip_prefix('/').and_then(|s| s.parse::<usize>().ok()) {
        let rest = &long_names[idx.min(long_names.len())..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        std::str::from_utf8(&rest[..end]).unwrap_or("").trim_end_matches('/').to_string()
    } else {
        raw_name.trim_end_matches('/').to_string()
    }
}

/// GNU `/` symbol table: a big-endian member count, that many big-endian
/// 4-byte member offsets, then that many NUL-terminated symbol name
/// strings in the same order (one name may map to a repeated offset if
/// several symbols come from the same member).
fn parse_gnu_symtab(data: &[u8], _self_offset: u64) -> Vec<(String, u64)> {
    parse_gnu_symtab_generic(data, 4, |b| u32::from_be_bytes(b.try_into().unwrap()) as u64)
}

fn parse_gnu_symtab64(data: &[u8], _self_offset: u64) -> Vec<(String, u64)> {
    parse_gnu_symtab_generic(data, 8, |b| u64::from_be_bytes(b.try_into().unwrap()))
}

fn parse_gnu_symtab_generic(data: &[u8], word: usize, read: impl Fn(&[u8]) -> u64) -> Vec<(String, u64)> {
    if data.len() < word {
        return Vec::new();
    }
    let count = read(&data[0..word]) as usize;
    let offsets_end = word + count * word;
    if offsets_end > data.len() {
        return Vec::new();
    }
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let start = word + i * word;
        offsets.push(read(&data[start..start + word]));
    }
    let mut names = Vec::with_capacity(count);
    let mut cursor = offsets_end;
    for _ in 0..count {
        let start = cursor;
        while cursor < data.len() && data[cursor] != 0 {
            cursor += 1;
        }
        names.push(String::from_utf8_lossy(&data[start..cursor]).into_owned());
        cursor += 1;
    }
    offsets.into_iter().zip(names).collect()
}

impl Archive {
    /// Worklist-fixpoint lazy extraction (§4.3): given the current set of
    /// unresolved symbol names, return the not-yet-extracted member indices
    /// that would satisfy at least one of them, and mark those members
    /// extracted. Call in a loop, feeding back the newly undefined names the
    /// extracted members bring with them, until a call returns empty.
    pub fn members_satisfying(&self, undefined: &[String]) -> Vec<usize> {
        let mut extracted = self.extracted.borrow_mut();
        let mut picked = Vec::new();
        for name in undefined {
            if let Some(candidates) = self.symbol_index.get(name) {
                for &idx in candidates {
                    if !extracted[idx] {
                        extracted[idx] = true;
                        picked.push(idx);
                    }
                }
            }
        }
        picked
    }

    /// `--whole-archive`: every member not yet extracted, regardless of
    /// symbol demand.
    pub fn all_remaining(&self) -> Vec<usize> {
        let mut extracted = self.extracted.borrow_mut();
        let mut picked = Vec::new();
        for (idx, done) in extracted.iter_mut().enumerate() {
            if !*done {
                *done = true;
                picked.push(idx);
            }
        }
        picked
    }

    pub fn member(&self, idx: usize) -> &ArchiveMember {
        &self.members[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad_field(value: &str, width: usize) -> String {
        format!("{value:<width$}")
    }

    fn build_member_header(name: &str, size: usize) -> Vec<u8> {
        let mut h = Vec::with_capacity(HEADER_LEN);
        h.extend_from_slice(pad_field(name, 16).as_bytes());
        h.extend_from_slice(pad_field("0", 12).as_bytes()); // mtime
        h.extend_from_slice(pad_field("0", 6).as_bytes()); // uid
        h.extend_from_slice(pad_field("0", 6).as_bytes()); // gid
        h.extend_from_slice(pad_field("100644", 8).as_bytes()); // mode
        h.extend_from_slice(pad_field(&size.to_string(), 10).as_bytes());
        h.extend_from_slice(b"\x60\n");
        assert_eq!(h.len(), HEADER_LEN);
        h
    }

    #[test]
    fn parses_a_single_member_common_archive() {
        let mut data = GLOBAL_HEADER.to_vec();
        let body = b"hello!!!".to_vec(); // 8 bytes, even length, no padding needed
        data.extend(build_member_header("a.o/", body.len()));
        data.extend(&body);
        let archive = parse(&data, Path::new(".")).unwrap();
        assert_eq!(archive.members.len(), 1);
        assert_eq!(archive.members[0].name, "a.o");
        assert_eq!(&*archive.members[0].data().unwrap(), &body[..]);
    }

    #[test]
    fn thin_archive_member_resolves_external_path() {
        let mut data = THIN_HEADER.to_vec();
        data.extend(build_member_header("member.o/", 0));
        let archive = parse(&data, Path::new("/some/dir")).unwrap();
        assert!(archive.is_thin);
        match &archive.members[0].body {
            MemberBody::ThinPath(p) => assert_eq!(p, Path::new("/some/dir/member.o")),
            _ => panic!("expected a thin path"),
        }
    }

    #[test]
    fn lazy_extractor_pulls_only_members_that_satisfy_demand() {
        let mut data = GLOBAL_HEADER.to_vec();
        data.extend(build_member_header("a.o/", 2));
        data.extend(b"aa");
        data.extend(build_member_header("b.o/", 2));
        data.extend(b"bb");
        let mut archive = parse(&data, Path::new(".")).unwrap();
        archive.symbol_index.insert("needed_symbol".to_string(), vec![1]);
        let picked = archive.members_satisfying(&["needed_symbol".to_string()]);
        assert_eq!(picked, vec![1]);
        assert!(archive.members_satisfying(&["needed_symbol".to_string()]).is_empty());
    }
}
