//! Command-line driver.
//!
//! `ld`'s grammar is order- and stack-sensitive (`-Bstatic`/`-Bdynamic`,
//! `--as-needed`, `--push-state`/`--pop-state`, `--whole-archive`,
//! `--start-group`/`--end-group` all mutate how *later* positional
//! arguments are interpreted). A declarative parser does not model this
//! well, so - as in the teacher crate - this stays a hand-written scanner.
//! `clap` remains a dependency for auxiliary entry points (e.g. a future
//! `--help` pretty-printer) that don't need the stateful grammar.

use anyhow::anyhow;

/// Stack frame pushed/popped by `--push-state`/`--pop-state`.
#[derive(Debug, Copy, Clone)]
struct OptStack {
    /// `--as-needed` / `--no-as-needed`
    pub as_needed: bool,
    /// `-Bstatic` / `-static` vs `-Bdynamic`
    pub link_static: bool,
    /// `--whole-archive` / `--no-whole-archive`
    pub whole_archive: bool,
}

#[derive(Debug, Clone)]
pub struct FileOpt {
    pub name: String,
    /// `--as-needed`
    pub as_needed: bool,
    /// `--whole-archive`
    pub whole_archive: bool,
}

#[derive(Debug, Clone)]
pub struct LibraryOpt {
    pub name: String,
    /// `--as-needed`
    pub as_needed: bool,
    /// `-static`
    pub link_static: bool,
    /// `--whole-archive`
    pub whole_archive: bool,
}

#[derive(Debug, Clone)]
pub enum ObjectFileOpt {
    /// A plain object, archive, or shared-object path.
    File(FileOpt),
    /// `-l namespec`
    Library(LibraryOpt),
    /// `--start-group`
    StartGroup,
    /// `--end-group`
    EndGroup,
}

#[derive(Debug, Clone)]
pub struct HashStyle {
    pub sysv: bool,
    pub gnu: bool,
}

impl Default for HashStyle {
    fn default() -> Self {
        Self {
            sysv: true,
            gnu: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcfMode {
    None,
    All,
    Safe,
}

impl Default for IcfMode {
    fn default() -> Self {
        IcfMode::None
    }
}

/// `--compress-debug-sections` is parsed for CLI compatibility but not
/// acted on: debug sections aren't copied into the output at all yet (see
/// `DESIGN.md`), so there's nothing to compress. Only `None` is
/// representable; `zlib`/`zstd` values are accepted and silently treated
/// as `None` rather than rejected, since a build system driving this
/// linker through the flag shouldn't fail just because the knob is inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressDebug {
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Plain `ET_EXEC`/`ET_DYN` executable.
    Executable,
    /// `-shared`: `ET_DYN` shared object.
    SharedObject,
    /// `-r`: `ET_REL` relocatable output.
    Relocatable,
}

impl Default for OutputKind {
    fn default() -> Self {
        OutputKind::Executable
    }
}

/// `-z` keyword flags. Unknown keywords are accepted and ignored (matching
/// the common behavior of tolerating vendor `-z` extensions) rather than
/// fatal, since `-z` is explicitly an open-ended keyword namespace.
#[derive(Debug, Clone, Default)]
pub struct ZFlags {
    pub defs: bool,
    pub notext: bool,
    pub text: bool,
    pub noexecstack: bool,
    pub execstack: bool,
    pub now: bool,
    pub lazy: bool,
    pub relro: bool,
    pub norelro: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Opt {
    /// `--build-id[=style]`
    pub build_id: bool,
    /// `--eh-frame-hdr`
    pub eh_frame_hdr: bool,
    /// `-pie`
    pub pie: bool,
    /// `-shared` / `-r`
    pub output_kind: OutputKind,
    /// `-m emulation`
    pub emulation: Option<String>,
    /// `-o output`
    pub output: Option<String>,
    /// `-e` / `--entry`
    pub entry: Option<String>,
    /// `-dynamic-linker`
    pub dynamic_linker: Option<String>,
    /// `-L searchdir`
    pub search_dir: Vec<String>,
    /// `--hash-style=sysv/gnu/both`
    pub hash_style: HashStyle,
    /// `--gc-sections`
    pub gc_sections: bool,
    /// `--icf={all,safe,none}`
    pub icf: IcfMode,
    /// `--compress-debug-sections`
    pub compress_debug_sections: CompressDebug,
    /// `-z keyword` (may repeat)
    pub z_flags: ZFlags,
    /// `--version-script`
    pub version_script: Option<String>,
    /// `--dynamic-list`
    pub dynamic_list: Option<String>,
    /// `--wrap symbol` (may repeat)
    pub wrap: Vec<String>,
    /// `--defsym symbol=expr` (may repeat)
    pub defsym: Vec<String>,
    /// `-T script`
    pub scripts: Vec<String>,
    /// `--soname`/`-soname`
    pub soname: Option<String>,
    /// `-M` / `--print-map`
    pub print_map: bool,
    /// `--print-dependencies`
    pub print_dependencies: bool,
    /// `--undefined symbol` (may repeat): forced GC root / unresolved check
    pub undefined: Vec<String>,
    /// `--require-defined symbol` (may repeat)
    pub require_defined: Vec<String>,
    /// `--allow-multiple-definition`
    pub allow_multiple_definition: bool,
    /// `--fatal-warnings`
    pub fatal_warnings: bool,
    /// `--threads N`
    pub threads: Option<usize>,
    /// `--no-threads`
    pub no_threads: bool,
    /// positional object files, libraries, and group markers, in order
    pub obj_file: Vec<ObjectFileOpt>,
}

/// Parse the argument vector into an [`Opt`]. `args` should already have
/// `argv[0]` stripped.
pub fn parse_opts(args: &[String]) -> anyhow::Result<Opt> {
    let mut opt = Opt::default();
    let mut cur = OptStack {
        as_needed: false,
        link_static: false,
        whole_archive: false,
    };
    let mut stack = vec![];
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            s if s.starts_with("-L") && s.len() > 2 => {
                opt.search_dir.push(s.strip_prefix("-L").unwrap().to_string());
            }
            "-L" => {
                opt.search_dir.push(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing argument after -L"))?
                        .to_string(),
                );
            }
            "-dynamic-linker" | "--dynamic-linker" => {
                opt.dynamic_linker = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing dynamic linker after -dynamic-linker"))?
                        .to_string(),
                );
            }
            s if s.starts_with("-l") && s.len() > 2 => {
                opt.obj_file.push(ObjectFileOpt::Library(LibraryOpt {
                    name: s.strip_prefix("-l").unwrap().to_string(),
                    as_needed: cur.as_needed,
                    link_static: cur.link_static,
                    whole_archive: cur.whole_archive,
                }));
            }
            "-m" => {
                opt.emulation = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing emulation after -m"))?
                        .to_string(),
                );
            }
            "-o" => {
                opt.output = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing output after -o"))?
                        .to_string(),
                );
            }
            "-e" | "--entry" => {
                opt.entry = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing symbol after -e"))?
                        .to_string(),
                );
            }
            "-T" => {
                opt.scripts.push(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing script after -T"))?
                        .to_string(),
                );
            }
            "-soname" | "--soname" | "-h" => {
                opt.soname = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing name after -soname"))?
                        .to_string(),
                );
            }
            "-pie" => opt.pie = true,
            "-plugin" => {
                iter.next();
            }
            s if s.starts_with("-plugin-opt=") => {}
            "-shared" | "-Bshareable" => opt.output_kind = OutputKind::SharedObject,
            "-r" | "--relocatable" => opt.output_kind = OutputKind::Relocatable,
            "-static" | "-Bstatic" => cur.link_static = true,
            "-Bdynamic" | "-call_shared" => cur.link_static = false,
            "-z" => {
                let kw = iter
                    .next()
                    .ok_or_else(|| anyhow!("Missing keyword after -z"))?;
                apply_z_keyword(&mut opt.z_flags, kw);
            }
            s if s.starts_with("-z") && s.len() > 2 => {
                apply_z_keyword(&mut opt.z_flags, s.strip_prefix("-z").unwrap());
            }
            "-M" | "--print-map" => opt.print_map = true,

            // double dashes
            "--as-needed" => cur.as_needed = true,
            "--no-as-needed" => cur.as_needed = false,
            "--whole-archive" => cur.whole_archive = true,
            "--no-whole-archive" => cur.whole_archive = false,
            "--build-id" => opt.build_id = true,
            s if s.starts_with("--build-id=") => opt.build_id = true,
            "--eh-frame-hdr" => opt.eh_frame_hdr = true,
            "--end-group" => opt.obj_file.push(ObjectFileOpt::EndGroup),
            "--start-group" => opt.obj_file.push(ObjectFileOpt::StartGroup),
            "--gc-sections" => opt.gc_sections = true,
            "--no-gc-sections" => opt.gc_sections = false,
            s if s.starts_with("--icf=") => {
                opt.icf = match s {
                    "--icf=all" => IcfMode::All,
                    "--icf=safe" => IcfMode::Safe,
                    "--icf=none" => IcfMode::None,
                    _ => return Err(anyhow!("Unknown --icf mode: {s}")),
                };
            }
            s if s.starts_with("--compress-debug-sections=") => {
                opt.compress_debug_sections = match s {
                    "--compress-debug-sections=none" | "--compress-debug-sections=zlib" | "--compress-debug-sections=zstd" => CompressDebug::None,
                    _ => return Err(anyhow!("Unknown --compress-debug-sections value: {s}")),
                };
            }
            s if s.starts_with("--hash-style=") => match s {
                "--hash-style=sysv" => {
                    opt.hash_style.sysv = true;
                    opt.hash_style.gnu = false;
                }
                "--hash-style=gnu" => {
                    opt.hash_style.sysv = false;
                    opt.hash_style.gnu = true;
                }
                "--hash-style=both" => {
                    opt.hash_style.sysv = true;
                    opt.hash_style.gnu = true;
                }
                _ => {}
            },
            "--version-script" => {
                opt.version_script = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing file after --version-script"))?
                        .to_string(),
                );
            }
            s if s.starts_with("--version-script=") => {
                opt.version_script = Some(s.strip_prefix("--version-script=").unwrap().to_string());
            }
            "--dynamic-list" => {
                opt.dynamic_list = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing file after --dynamic-list"))?
                        .to_string(),
                );
            }
            "--wrap" => {
                opt.wrap.push(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing symbol after --wrap"))?
                        .to_string(),
                );
            }
            s if s.starts_with("--wrap=") => {
                opt.wrap.push(s.strip_prefix("--wrap=").unwrap().to_string());
            }
            "--defsym" => {
                opt.defsym.push(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing symbol=expr after --defsym"))?
                        .to_string(),
                );
            }
            "--undefined" | "-u" => {
                opt.undefined.push(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing symbol after --undefined"))?
                        .to_string(),
                );
            }
            "--require-defined" => {
                opt.require_defined.push(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing symbol after --require-defined"))?
                        .to_string(),
                );
            }
            "--allow-multiple-definition" => opt.allow_multiple_definition = true,
            "--fatal-warnings" => opt.fatal_warnings = true,
            "--print-dependencies" => opt.print_dependencies = true,
            "--no-threads" => opt.no_threads = true,
            "--threads" => {
                opt.threads = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("Missing count after --threads"))?
                        .parse()
                        .map_err(|_| anyhow!("--threads expects an integer"))?,
                );
            }
            "--push-state" => stack.push(cur),
            "--pop-state" => {
                cur = stack
                    .pop()
                    .ok_or_else(|| anyhow!("--pop-state without matching --push-state"))?;
            }
            s if s.starts_with("-") && s.len() > 1 => {
                return Err(anyhow!("Unknown argument: {s}"));
            }
            s => {
                opt.obj_file.push(ObjectFileOpt::File(FileOpt {
                    name: s.to_string(),
                    as_needed: cur.as_needed,
                    whole_archive: cur.whole_archive,
                }));
            }
        }
    }
    Ok(opt)
}

fn apply_z_keyword(z: &mut ZFlags, kw: &str) {
    match kw {
        "defs" => z.defs = true,
        "notext" => z.notext = true,
        "text" => z.text = true,
        "noexecstack" => z.noexecstack = true,
        "execstack" => z.execstack = true,
        "now" => z.now = true,
        "lazy" => z.lazy = true,
        "relro" => z.relro = true,
        "norelro" => z.norelro = true,
        // Tolerate vendor/unknown -z keywords rather than failing the link.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_state() {
        let opts = parse_opts(&[
            "-la".to_string(),
            "--push-state".to_string(),
            "--as-needed".to_string(),
            "-lb".to_string(),
            "--pop-state".to_string(),
            "-lc".to_string(),
        ])
        .unwrap();

        assert_eq!(opts.obj_file.len(), 3);
        if let ObjectFileOpt::Library(lib) = &opts.obj_file[0] {
            assert_eq!(lib.name, "a");
            assert!(!lib.as_needed);
        } else {
            panic!("expected library");
        }

        if let ObjectFileOpt::Library(lib) = &opts.obj_file[1] {
            assert_eq!(lib.name, "b");
            assert!(lib.as_needed);
        } else {
            panic!("expected library");
        }

        if let ObjectFileOpt::Library(lib) = &opts.obj_file[2] {
            assert_eq!(lib.name, "c");
            assert!(!lib.as_needed);
        } else {
            panic!("expected library");
        }
    }

    #[test]
    fn test_start_end_group() {
        let opts = parse_opts(&[
            "--start-group".to_string(),
            "-la".to_string(),
            "-lb".to_string(),
            "--end-group".to_string(),
        ])
        .unwrap();
        assert!(matches!(opts.obj_file[0], ObjectFileOpt::StartGroup));
        assert!(matches!(opts.obj_file.last().unwrap(), ObjectFileOpt::EndGroup));
    }

    #[test]
    fn test_whole_archive_scoping() {
        let opts = parse_opts(&[
            "--whole-archive".to_string(),
            "-la".to_string(),
            "--no-whole-archive".to_string(),
            "-lb".to_string(),
        ])
        .unwrap();
        if let ObjectFileOpt::Library(lib) = &opts.obj_file[0] {
            assert!(lib.whole_archive);
        } else {
            panic!("expected library");
        }
        if let ObjectFileOpt::Library(lib) = &opts.obj_file[1] {
            assert!(!lib.whole_archive);
        } else {
            panic!("expected library");
        }
    }

    #[test]
    fn test_icf_and_gc() {
        let opts = parse_opts(&[
            "--gc-sections".to_string(),
            "--icf=all".to_string(),
            "a.o".to_string(),
        ])
        .unwrap();
        assert!(opts.gc_sections);
        assert_eq!(opts.icf, IcfMode::All);
    }

    #[test]
    fn test_z_keyword() {
        let opts = parse_opts(&["-z".to_string(), "now".to_string(), "a.o".to_string()]).unwrap();
        assert!(opts.z_flags.now);
    }

    #[test]
    fn test_unknown_flag_is_fatal() {
        assert!(parse_opts(&["--definitely-not-a-flag".to_string()]).is_err());
    }
}
