//! Global symbol resolution (§4.4).
//!
//! The teacher's `symbols: BTreeMap<String, Symbol>` is a single-owner map
//! filled in file order with no conflict handling (`symbols.insert` always
//! wins). This module replaces it with the full precedence rule set:
//! strong beats weak beats common beats undefined, multiple strong
//! definitions are a fatal diagnostic, common symbols collapse to
//! largest-size/LCM-alignment, and visibility only ever strengthens.

use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::context::{FileId, SectionIdx};
use crate::error::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    Default,
    Protected,
    Hidden,
    Internal,
}

impl Visibility {
    /// Visibility only ever strengthens (§4.4 rule 6); fold two
    /// occurrences to the more restrictive one.
    pub fn strengthen(self, other: Visibility) -> Visibility {
        self.max(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Undefined,
    SharedObject,
    Common,
    Weak,
    Strong,
}

/// A symbol as seen locally within one file, before global resolution.
#[derive(Debug, Clone)]
pub struct LocalSymbol {
    pub name: String,
    pub section: Option<SectionIdx>,
    pub value: u64,
    pub size: u64,
    pub binding: Binding,
    pub visibility: Visibility,
    pub is_global: bool,
    /// Alignment requirement for common symbols (§4.4 rule 3); `1`
    /// otherwise.
    pub common_align: u64,
}

/// The winning definition recorded in the global table.
#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub file: FileId,
    pub section: Option<SectionIdx>,
    pub value: u64,
    pub size: u64,
    pub binding: Binding,
    pub visibility: Visibility,
    pub common_align: u64,
    pub priority: usize,
}

impl SymbolDef {
    pub fn is_defined(&self) -> bool {
        !matches!(self.binding, Binding::Undefined)
    }

    /// Eligible for the dynamic symbol table: defined, not itself a
    /// shared-object import, and not hidden/internal (either originally or
    /// by a `local:` version-script pattern).
    pub fn is_dynamic_export(&self) -> bool {
        self.is_defined() && matches!(self.visibility, Visibility::Default | Visibility::Protected)
    }
}

struct Shard {
    map: FxHashMap<String, SymbolDef>,
}

/// Sharded concurrent symbol table. Shard selection is by a cheap string
/// hash rather than `rayon::current_thread_index` (unlike `DiagnosticBag`,
/// which only ever needs a home for the *calling* thread's pushes): two
/// different threads resolving the same symbol name must land in the same
/// shard, or the "one slot per (name, version)" invariant breaks.
pub struct SymbolTable {
    shards: Vec<Mutex<Shard>>,
}

impl SymbolTable {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        SymbolTable {
            shards: (0..shard_count)
                .map(|_| Mutex::new(Shard { map: FxHashMap::default() }))
                .collect(),
        }
    }

    fn shard_for(&self, name: &str) -> &Mutex<Shard> {
        let hash = rustc_hash::FxHasher::default();
        use std::hash::{Hash, Hasher};
        let mut hash = hash;
        name.hash(&mut hash);
        &self.shards[(hash.finish() as usize) % self.shards.len()]
    }

    /// Resolve an incoming local symbol against the current winner, per
    /// the precedence rules in §4.4. Returns a fatal diagnostic on an
    /// unresolvable multiple-strong-definition conflict.
    pub fn resolve(
        &self,
        name: &str,
        file: FileId,
        file_name: &str,
        priority: usize,
        incoming: &LocalSymbol,
        allow_multiple_definition: bool,
    ) -> Result<(), Diagnostic> {
        let shard = self.shard_for(name);
        let mut shard = shard.lock().unwrap();
        let candidate = SymbolDef {
            file,
            section: incoming.section,
            value: incoming.value,
            size: incoming.size,
            binding: incoming.binding,
            visibility: incoming.visibility,
            common_align: incoming.common_align,
            priority,
        };

        match shard.map.get_mut(name) {
            None => {
                shard.map.insert(name.to_string(), candidate);
                Ok(())
            }
            Some(current) => {
                Self::merge(current, candidate, name, file_name, allow_multiple_definition)
            }
        }
    }

    fn merge(
        current: &mut SymbolDef,
        incoming: SymbolDef,
        name: &str,
        incoming_file_name: &str,
        allow_multiple_definition: bool,
    ) -> Result<(), Diagnostic> {
        use Binding::*;
        match (current.binding, incoming.binding) {
            // Two strong definitions: fatal unless explicitly tolerated.
            (Strong, Strong) => {
                if allow_multiple_definition {
                    if incoming.priority < current.priority {
                        *current = incoming;
                    }
                    Ok(())
                } else {
                    Err(Diagnostic::MultipleDefinition {
                        symbol: name.to_string(),
                        first: format!("file#{}", current.file),
                        second: incoming_file_name.to_string(),
                    })
                }
            }
            // Strong always wins over anything weaker.
            (Strong, _) => Ok(()),
            (_, Strong) => {
                *current = incoming;
                Ok(())
            }
            // Common symbols collapse: largest size, LCM alignment.
            (Common, Common) => {
                current.size = current.size.max(incoming.size);
                current.common_align = lcm(current.common_align, incoming.common_align);
                current.visibility = current.visibility.strengthen(incoming.visibility);
                Ok(())
            }
            (Common, Weak) | (Weak, Common) => {
                // Weak is still just a hint value; a common allocation is
                // a real (tentative) definition and wins.
                if current.binding == Weak {
                    *current = incoming;
                }
                Ok(())
            }
            (Weak, Weak) => {
                // Earlier (lower priority number) wins, per rule 4.
                if incoming.priority < current.priority {
                    *current = incoming;
                }
                current.visibility = current.visibility.strengthen(incoming.visibility);
                Ok(())
            }
            // A shared-object definition never overrides anything already
            // defined by an object file, but is itself overridden later.
            (SharedObject, SharedObject) => Ok(()),
            (_, SharedObject) => Ok(()),
            (SharedObject, _) => {
                *current = incoming;
                Ok(())
            }
            (Undefined, Undefined) => Ok(()),
            (Undefined, _) => {
                *current = incoming;
                Ok(())
            }
            (_, Undefined) => Ok(()),
        }
    }

    pub fn get(&self, name: &str) -> Option<SymbolDef> {
        self.shard_for(name).lock().unwrap().map.get(name).cloned()
    }

    pub fn contains_defined(&self, name: &str) -> bool {
        self.get(name).map(|s| s.is_defined()).unwrap_or(false)
    }

    /// Strengthen `name`'s recorded visibility towards `vis` (§4.4 rule 6),
    /// used by `--version-script`'s `local:` patterns to suppress a
    /// symbol's dynamic export without touching its binding or value.
    /// A no-op if `name` has no current definition.
    pub fn strengthen_visibility(&self, name: &str, vis: Visibility) {
        let shard = self.shard_for(name);
        let mut shard = shard.lock().unwrap();
        if let Some(current) = shard.map.get_mut(name) {
            current.visibility = current.visibility.strengthen(vis);
        }
    }

    /// Snapshot every entry, for the layout/writer stages that need to
    /// enumerate the whole table deterministically.
    pub fn snapshot(&self) -> Vec<(String, SymbolDef)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock().unwrap();
            out.extend(shard.map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a.max(1)
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    let a = a.max(1);
    let b = b.max(1);
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(binding: Binding, size: u64, align: u64, priority: usize) -> LocalSymbol {
        LocalSymbol {
            name: "x".into(),
            section: Some(0),
            value: 0,
            size,
            binding,
            visibility: Visibility::Default,
            is_global: true,
            common_align: align,
        }
    }

    #[test]
    fn strong_beats_weak() {
        let table = SymbolTable::new(1);
        table.resolve("x", 0, "a.o", 0, &sym(Binding::Weak, 0, 1, 0), false).unwrap();
        table.resolve("x", 1, "b.o", 1, &sym(Binding::Strong, 0, 1, 1), false).unwrap();
        assert_eq!(table.get("x").unwrap().binding, Binding::Strong);
        assert_eq!(table.get("x").unwrap().file, 1);
    }

    #[test]
    fn two_strong_definitions_is_fatal() {
        let table = SymbolTable::new(1);
        table.resolve("x", 0, "a.o", 0, &sym(Binding::Strong, 0, 1, 0), false).unwrap();
        let err = table.resolve("x", 1, "b.o", 1, &sym(Binding::Strong, 0, 1, 1), false);
        assert!(matches!(err, Err(Diagnostic::MultipleDefinition { .. })));
    }

    #[test]
    fn common_symbols_collapse_to_largest_with_lcm_alignment() {
        let table = SymbolTable::new(1);
        table.resolve("x", 0, "a.o", 0, &sym(Binding::Common, 4, 4, 0), false).unwrap();
        table.resolve("x", 1, "b.o", 1, &sym(Binding::Common, 8, 8, 1), false).unwrap();
        table.resolve("x", 2, "c.o", 2, &sym(Binding::Common, 4, 4, 2), false).unwrap();
        let def = table.get("x").unwrap();
        assert_eq!(def.size, 8);
        assert_eq!(def.common_align, 8);
    }

    #[test]
    fn shared_object_definition_is_overridden_by_later_object_file() {
        let table = SymbolTable::new(1);
        table
            .resolve("x", 0, "libfoo.so", 0, &sym(Binding::SharedObject, 0, 1, 0), false)
            .unwrap();
        table.resolve("x", 1, "b.o", 1, &sym(Binding::Strong, 4, 1, 1), false).unwrap();
        assert_eq!(table.get("x").unwrap().binding, Binding::Strong);
    }
}
