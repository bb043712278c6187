//! Per-link state shared across pipeline stages.
//!
//! Owns every `InputFile` and, through it, every `InputSection`. Cross-file
//! references (a relocation in file A targeting a section defined in file
//! B) never borrow file B's data directly; they carry a [`SectionHandle`]
//! resolved back through `Context::section`. This is the handle discipline
//! that keeps the `Symbol <-> InputFile <-> InputSection` graph from
//! requiring self-referential borrows.

use crate::error::DiagnosticBag;
use crate::opt::Opt;
use crate::section::InputSection;
use crate::target::Target;

pub type FileId = usize;
pub type SectionIdx = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionHandle {
    pub file: FileId,
    pub index: SectionIdx,
}

/// One input object file (never an archive itself; archive members are
/// expanded into their own `InputFile` by the archive extractor).
#[derive(Debug)]
pub struct InputFile {
    pub id: FileId,
    /// Display name: `path` for a plain object, `archive.a(member.o)` for
    /// an extracted archive member.
    pub name: String,
    /// Command-line position; lower sorts earlier. Used as the
    /// deterministic tie-break in symbol resolution (§4.4 rule 4) and ICF
    /// representative selection (§4.6).
    pub priority: usize,
    pub sections: Vec<InputSection>,
    /// Local symbols defined by this file, plus every global this file
    /// defines or references (globals are additionally registered in the
    /// `Context`-wide symbol table).
    pub local_symbols: Vec<crate::symbol::LocalSymbol>,
}

pub struct Context {
    pub opt: Opt,
    pub target: &'static dyn Target,
    pub files: Vec<InputFile>,
    pub symbols: crate::symbol::SymbolTable,
    pub diagnostics: DiagnosticBag,
    /// `name -> version tag` assigned by `--version-script`'s `global:`
    /// patterns (§4.4's versioning, §6's `--version-script`); read by the
    /// writer when building `.dynsym` (`foo@@VER_X1`-style names).
    pub symbol_versions: std::sync::Mutex<rustc_hash::FxHashMap<String, String>>,
    /// Sonames of shared objects named on the command line, in the order
    /// they were seen, for the `.dynamic` section's `DT_NEEDED` entries.
    pub needed_sonames: std::sync::Mutex<Vec<String>>,
    /// `SECTIONS` output-section placements from every linker script named
    /// on the command line, in declaration order, consulted by the chunk
    /// planner (§4.8) in place of the canonical permission-grouped order
    /// once a script is present.
    pub script_sections: Vec<crate::input::script::SectionPlacement>,
    /// `PROVIDE`/bare `sym = expr;` assignments collected from every script,
    /// applied once layout has assigned every chunk a final address.
    pub script_provides: Vec<crate::input::script::ProvideDef>,
    /// `ASSERT(expr, "message")` directives collected from every script,
    /// checked at the same point as `script_provides`.
    pub script_asserts: Vec<(crate::input::script::Expr, String)>,
}

impl Context {
    pub fn new(opt: Opt, target: &'static dyn Target) -> Self {
        let shards = opt.threads.unwrap_or_else(|| rayon::current_num_threads());
        Context {
            opt,
            target,
            files: Vec::new(),
            symbols: crate::symbol::SymbolTable::new(shards),
            diagnostics: DiagnosticBag::new(shards),
            symbol_versions: std::sync::Mutex::new(rustc_hash::FxHashMap::default()),
            needed_sonames: std::sync::Mutex::new(Vec::new()),
            script_sections: Vec::new(),
            script_provides: Vec::new(),
            script_asserts: Vec::new(),
        }
    }

    pub fn push_file(&mut self, mut file: InputFile) -> FileId {
        let id = self.files.len();
        file.id = id;
        self.files.push(file);
        id
    }

    pub fn section(&self, handle: SectionHandle) -> &InputSection {
        &self.files[handle.file].sections[handle.index]
    }

    pub fn file(&self, id: FileId) -> &InputFile {
        &self.files[id]
    }

    /// Iterate over every live input section across every file, in file
    /// (command-line priority) order.
    pub fn live_sections(&self) -> impl Iterator<Item = (SectionHandle, &InputSection)> {
        self.files.iter().flat_map(|f| {
            f.sections.iter().enumerate().filter_map(move |(i, s)| {
                if s.alive() {
                    Some((SectionHandle { file: f.id, index: i }, s))
                } else {
                    None
                }
            })
        })
    }

    pub fn all_sections(&self) -> impl Iterator<Item = (SectionHandle, &InputSection)> {
        self.files.iter().flat_map(|f| {
            f.sections
                .iter()
                .enumerate()
                .map(move |(i, s)| (SectionHandle { file: f.id, index: i }, s))
        })
    }
}
