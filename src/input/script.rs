//! Linker script subset (§4.12): `INPUT`, `GROUP`, `AS_NEEDED`, `OUTPUT`,
//! `SEARCH_DIR`, `SECTIONS`, `PHDRS`, `MEMORY`, `VERSION`, `ENTRY`,
//! `ASSERT`, `PROVIDE`, and `+`/`-`/`*`/`ALIGN`/`.` arithmetic.
//!
//! A hand-written recursive-descent parser, in the spirit of the hand-
//! written, stateful CLI scanner in `opt.rs`: linker-script grammar mixes
//! bare identifiers, parenthesized argument lists, and brace-delimited
//! blocks in a way a declarative grammar crate models awkwardly for a
//! "parse what we need, reject the rest" subset.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(i64),
    Punct(char),
    Eof,
}

struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Lexer { bytes: text.as_bytes(), pos: 0 }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_byte() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.bytes.get(self.pos + 1) == Some(&b'*') => {
                    self.pos += 2;
                    while self.pos < self.bytes.len()
                        && !(self.bytes[self.pos] == b'*' && self.bytes.get(self.pos + 1) == Some(&b'/'))
                    {
                        self.pos += 1;
                    }
                    self.pos = (self.pos + 2).min(self.bytes.len());
                }
                _ => break,
            }
        }
    }

    fn next(&mut self) -> Tok {
        self.skip_trivia();
        let Some(b) = self.peek_byte() else { return Tok::Eof };
        if b == b'"' {
            self.pos += 1;
            let start = self.pos;
            while self.peek_byte().map(|c| c != b'"').unwrap_or(false) {
                self.pos += 1;
            }
            let s = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
            self.pos += 1;
            return Tok::Str(s);
        }
        if b.is_ascii_digit() {
            let start = self.pos;
            if b == b'0' && matches!(self.bytes.get(self.pos + 1), Some(b'x') | Some(b'X')) {
                self.pos += 2;
                while self.peek_byte().map(|c| c.is_ascii_hexdigit()).unwrap_or(false) {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.bytes[start + 2..self.pos]).unwrap_or("0");
                let v = i64::from_str_radix(text, 16).unwrap_or(0);
                return Tok::Num(v);
            }
            while self.peek_byte().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.pos += 1;
            }
            // GNU ld accepts a trailing K/M size suffix.
            let mult = match self.peek_byte() {
                Some(b'K') | Some(b'k') => {
                    self.pos += 1;
                    1024
                }
                Some(b'M') | Some(b'm') => {
                    self.pos += 1;
                    1024 * 1024
                }
                _ => 1,
            };
            let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("0");
            let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
            let v: i64 = digits.parse().unwrap_or(0);
            return Tok::Num(v * mult);
        }
        if is_ident_start(b) {
            let start = self.pos;
            while self.peek_byte().map(is_ident_continue).unwrap_or(false) {
                self.pos += 1;
            }
            let s = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("").to_string();
            return Tok::Ident(s);
        }
        self.pos += 1;
        Tok::Punct(b as char)
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'.' || b == b'$' || b == b'-' || b == b'*' || b == b'/'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'$' | b'-' | b'*' | b'/' | b'+')
}

/// A placement directive inside a `SECTIONS { ... }` block: an output
/// section name and the ordered list of input-section glob patterns
/// assigned to it, consulted by the chunk planner (§4.8) in place of the
/// canonical order when a script is present.
#[derive(Debug, Clone, Default)]
pub struct SectionPlacement {
    pub output_name: String,
    pub input_patterns: Vec<String>,
    /// `KEEP(...)` input patterns: always GC roots (§4.5).
    pub keep_patterns: Vec<String>,
    pub addr: Option<Expr>,
}

/// An entry in a `PHDRS { ... }` block.
#[derive(Debug, Clone)]
pub struct PhdrDef {
    pub name: String,
    pub p_type: String,
}

/// A minimal arithmetic expression tree over `.`, integers, symbol names,
/// and `+`/`-`/`*`/`ALIGN(..)`, matching the grammar subset named in §4.12.
#[derive(Debug, Clone)]
pub enum Expr {
    Dot,
    Num(i64),
    Symbol(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Align(Box<Expr>),
}

impl Expr {
    pub fn eval(&self, dot: u64, lookup: &dyn Fn(&str) -> Option<u64>) -> Option<u64> {
        match self {
            Expr::Dot => Some(dot),
            Expr::Num(n) => Some(*n as u64),
            Expr::Symbol(name) => lookup(name),
            Expr::Add(a, b) => Some(a.eval(dot, lookup)?.wrapping_add(b.eval(dot, lookup)?)),
            Expr::Sub(a, b) => Some(a.eval(dot, lookup)?.wrapping_sub(b.eval(dot, lookup)?)),
            Expr::Mul(a, b) => Some(a.eval(dot, lookup)?.wrapping_mul(b.eval(dot, lookup)?)),
            Expr::Align(a) => {
                let align = a.eval(dot, lookup)?.max(1);
                Some((dot + align - 1) & !(align - 1))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvideDef {
    pub name: String,
    pub expr: Expr,
    /// `PROVIDE` only defines the symbol if nothing else already does;
    /// plain assignment (`sym = expr;`) always defines it.
    pub weak: bool,
}

/// Everything this subset extracts from a parsed `SECTIONS`/top-level
/// linker script, consumed by the driver and chunk planner.
#[derive(Debug, Clone, Default)]
pub struct ScriptAst {
    pub output: Option<String>,
    pub entry: Option<String>,
    pub search_dirs: Vec<String>,
    /// Further input files named by `INPUT`/`GROUP`, in order.
    pub inputs: Vec<String>,
    /// `AS_NEEDED(...)` file groups, kept separate so the classifier can
    /// mark them accordingly.
    pub as_needed_inputs: Vec<String>,
    pub sections: Vec<SectionPlacement>,
    pub phdrs: Vec<PhdrDef>,
    pub provides: Vec<ProvideDef>,
    pub asserts: Vec<(Expr, String)>,
}

pub fn parse_script(text: &str) -> anyhow::Result<ScriptAst> {
    let mut p = Parser { lex: Lexer::new(text), ast: ScriptAst::default() };
    p.parse_top()?;
    Ok(p.ast)
}

struct Parser<'a> {
    lex: Lexer<'a>,
    ast: ScriptAst,
}

impl<'a> Parser<'a> {
    fn parse_top(&mut self) -> anyhow::Result<()> {
        loop {
            let tok = self.lex.next();
            match tok {
                Tok::Eof => return Ok(()),
                Tok::Ident(kw) => self.parse_directive(&kw)?,
                Tok::Punct(';') => {}
                other => return Err(anyhow::anyhow!("linker script: unexpected token {other:?} at top level")),
            }
        }
    }

    fn expect_punct(&mut self, c: char) -> anyhow::Result<()> {
        match self.lex.next() {
            Tok::Punct(p) if p == c => Ok(()),
            other => Err(anyhow::anyhow!("linker script: expected '{c}', found {other:?}")),
        }
    }

    fn parse_directive(&mut self, kw: &str) -> anyhow::Result<()> {
        match kw {
            "OUTPUT" | "OUTPUT_FORMAT" | "OUTPUT_ARCH" => {
                self.expect_punct('(')?;
                let names = self.read_name_list()?;
                if kw == "OUTPUT" {
                    self.ast.output = names.into_iter().next();
                }
                Ok(())
            }
            "ENTRY" => {
                self.expect_punct('(')?;
                let names = self.read_name_list()?;
                self.ast.entry = names.into_iter().next();
                Ok(())
            }
            "SEARCH_DIR" => {
                self.expect_punct('(')?;
                let names = self.read_name_list()?;
                self.ast.search_dirs.extend(names);
                Ok(())
            }
            "INPUT" | "GROUP" => {
                self.expect_punct('(')?;
                let names = self.read_name_list()?;
                self.ast.inputs.extend(names);
                Ok(())
            }
            "AS_NEEDED" => {
                self.expect_punct('(')?;
                let names = self.read_name_list()?;
                self.ast.as_needed_inputs.extend(names);
                Ok(())
            }
            "ASSERT" => {
                self.expect_punct('(')?;
                let expr = self.parse_expr()?;
                self.expect_punct(',')?;
                let msg = match self.lex.next() {
                    Tok::Str(s) => s,
                    other => return Err(anyhow::anyhow!("ASSERT: expected message string, found {other:?}")),
                };
                self.expect_punct(')')?;
                self.ast.asserts.push((expr, msg));
                Ok(())
            }
            "PROVIDE" | "PROVIDE_HIDDEN" => {
                self.expect_punct('(')?;
                let name = self.read_ident()?;
                self.expect_punct('=')?;
                let expr = self.parse_expr()?;
                self.expect_punct(')')?;
                self.ast.provides.push(ProvideDef { name, expr, weak: true });
                Ok(())
            }
            "MEMORY" => self.skip_block(),
            "VERSION" => self.skip_block(),
            "SECTIONS" => self.parse_sections(),
            "PHDRS" => self.parse_phdrs(),
            _ => {
                // A bare `sym = expr;` top-level assignment.
                match self.lex.next() {
                    Tok::Punct('=') => {
                        let expr = self.parse_expr()?;
                        let _ = self.expect_punct(';');
                        self.ast.provides.push(ProvideDef { name: kw.to_string(), expr, weak: false });
                        Ok(())
                    }
                    Tok::Punct(';') => Ok(()),
                    _ => Ok(()),
                }
            }
        }
    }

    fn read_name_list(&mut self) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::new();
        loop {
            match self.lex.next() {
                Tok::Str(s) | Tok::Ident(s) => out.push(s),
                Tok::Punct(')') => return Ok(out),
                Tok::Punct(',') => {}
                Tok::Eof => return Err(anyhow::anyhow!("linker script: unterminated argument list")),
                _ => {}
            }
        }
    }

    fn read_ident(&mut self) -> anyhow::Result<String> {
        match self.lex.next() {
            Tok::Ident(s) => Ok(s),
            other => Err(anyhow::anyhow!("linker script: expected identifier, found {other:?}")),
        }
    }

    fn skip_block(&mut self) -> anyhow::Result<()> {
        self.expect_punct('{')?;
        let mut depth = 1;
        loop {
            match self.lex.next() {
                Tok::Punct('{') => depth += 1,
                Tok::Punct('}') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Tok::Eof => return Err(anyhow::anyhow!("linker script: unterminated block")),
                _ => {}
            }
        }
    }

    fn parse_phdrs(&mut self) -> anyhow::Result<()> {
        self.expect_punct('{')?;
        loop {
            match self.lex.next() {
                Tok::Punct('}') => return Ok(()),
                Tok::Ident(name) => {
                    let p_type = self.read_ident()?;
                    // Skip FLAGS(...)/AT(...)/trailing modifiers up to ';'.
                    loop {
                        match self.lex.next() {
                            Tok::Punct(';') => break,
                            Tok::Eof => return Err(anyhow::anyhow!("linker script: unterminated PHDRS entry")),
                            _ => {}
                        }
                    }
                    self.ast.phdrs.push(PhdrDef { name, p_type });
                }
                Tok::Eof => return Err(anyhow::anyhow!("linker script: unterminated PHDRS block")),
                _ => {}
            }
        }
    }

    fn parse_sections(&mut self) -> anyhow::Result<()> {
        self.expect_punct('{')?;
        loop {
            match self.lex.next() {
                Tok::Punct('}') => return Ok(()),
                Tok::Ident(kw) if kw == "PROVIDE" || kw == "PROVIDE_HIDDEN" => {
                    self.expect_punct('(')?;
                    let name = self.read_ident()?;
                    self.expect_punct('=')?;
                    let expr = self.parse_expr()?;
                    self.expect_punct(')')?;
                    let _ = self.expect_punct(';');
                    self.ast.provides.push(ProvideDef { name, expr, weak: true });
                }
                Tok::Ident(name) => {
                    // Either `name = expr;` (a location-counter/symbol
                    // assignment, including `. = expr;` represented as the
                    // identifier "." from the lexer), `name : { ... }` (an
                    // output section with no explicit address), or
                    // `name ADDR_EXPR : { ... }` (address forced by the
                    // script rather than assigned by the layout engine).
                    let save = self.lex.pos;
                    match self.lex.next() {
                        Tok::Punct('=') => {
                            let expr = self.parse_expr()?;
                            let _ = self.expect_punct(';');
                            if name != "." {
                                self.ast.provides.push(ProvideDef { name, expr, weak: false });
                            }
                        }
                        Tok::Punct(':') => {
                            self.parse_output_section(name, None)?;
                        }
                        _ => {
                            self.lex.pos = save;
                            let addr = self.parse_expr().ok();
                            self.expect_punct(':')?;
                            self.parse_output_section(name, addr)?;
                        }
                    }
                }
                Tok::Eof => return Err(anyhow::anyhow!("linker script: unterminated SECTIONS block")),
                _ => {}
            }
        }
    }

    fn parse_output_section(&mut self, name: String, addr: Option<Expr>) -> anyhow::Result<()> {
        // Skip an optional `(TYPE) AT(...) ALIGN(...)` prefix before `{`.
        loop {
            match self.lex.next() {
                Tok::Punct('{') => break,
                Tok::Eof => return Err(anyhow::anyhow!("linker script: unterminated output section header")),
                _ => {}
            }
        }
        let mut placement = SectionPlacement { output_name: name, addr, ..Default::default() };
        loop {
            match self.lex.next() {
                Tok::Punct('}') => break,
                Tok::Punct(';') => {}
                Tok::Ident(kw) if kw == "KEEP" => {
                    self.expect_punct('(')?;
                    self.parse_input_section_list(&mut placement.keep_patterns)?;
                    self.expect_punct(')')?;
                }
                Tok::Punct('*') => {
                    // Bare `*(.foo .bar)` wildcard-file input selector.
                    self.expect_punct('(')?;
                    self.parse_input_section_list(&mut placement.input_patterns)?;
                    self.expect_punct(')')?;
                }
                Tok::Ident(_) => {
                    // A file-qualified selector (`file.o(.text)`) or a
                    // symbol assignment inside the section body; skip to
                    // the statement terminator since only glob-style
                    // `*(...)` placement feeds the chunk planner here.
                    loop {
                        match self.lex.next() {
                            Tok::Punct(';') | Tok::Eof => break,
                            _ => {}
                        }
                    }
                }
                Tok::Eof => return Err(anyhow::anyhow!("linker script: unterminated output section body")),
                _ => {}
            }
        }
        // Trailing `: > region` / `AT>` after the closing brace.
        loop {
            match self.lex.next() {
                Tok::Punct(';') | Tok::Eof => break,
                _ => continue,
            }
        }
        self.ast.sections.push(placement);
        Ok(())
    }

    fn parse_input_section_list(&mut self, out: &mut Vec<String>) -> anyhow::Result<()> {
        loop {
            match self.lex.next() {
                Tok::Punct(')') => return Ok(()),
                Tok::Ident(pat) => out.push(pat),
                Tok::Punct(_) | Tok::Num(_) => {}
                Tok::Eof => return Err(anyhow::anyhow!("linker script: unterminated input-section list")),
            }
        }
    }

    fn parse_expr(&mut self) -> anyhow::Result<Expr> {
        self.parse_additive()
    }

    fn parse_additive(&mut self) -> anyhow::Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let save = self.lex.pos;
            match self.lex.next() {
                Tok::Punct('+') => lhs = Expr::Add(Box::new(lhs), Box::new(self.parse_multiplicative()?)),
                Tok::Punct('-') => lhs = Expr::Sub(Box::new(lhs), Box::new(self.parse_multiplicative()?)),
                _ => {
                    self.lex.pos = save;
                    return Ok(lhs);
                }
            }
        }
    }

    fn parse_multiplicative(&mut self) -> anyhow::Result<Expr> {
        let mut lhs = self.parse_primary()?;
        loop {
            let save = self.lex.pos;
            match self.lex.next() {
                Tok::Punct('*') => lhs = Expr::Mul(Box::new(lhs), Box::new(self.parse_primary()?)),
                _ => {
                    self.lex.pos = save;
                    return Ok(lhs);
                }
            }
        }
    }

    fn parse_primary(&mut self) -> anyhow::Result<Expr> {
        match self.lex.next() {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Ident(name) if name == "." => Ok(Expr::Dot),
            Tok::Ident(name) if name == "ALIGN" => {
                self.expect_punct('(')?;
                let inner = self.parse_expr()?;
                self.expect_punct(')')?;
                Ok(Expr::Align(Box::new(inner)))
            }
            Tok::Ident(name) => Ok(Expr::Symbol(name)),
            Tok::Punct('(') => {
                let inner = self.parse_expr()?;
                self.expect_punct(')')?;
                Ok(inner)
            }
            other => Err(anyhow::anyhow!("linker script: expected expression, found {other:?}")),
        }
    }
}

impl fmt::Debug for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "ident({s})"),
            Tok::Str(s) => write!(f, "str({s:?})"),
            Tok::Num(n) => write!(f, "num({n})"),
            Tok::Punct(c) => write!(f, "'{c}'"),
            Tok::Eof => write!(f, "<eof>"),
        }
    }
}

/// The simplified `VERSION { global: pat; local: pat; };` grammar fed via
/// `--version-script`, restricted to glob patterns over symbol names
/// (§4.12).
#[derive(Debug, Clone, Default)]
pub struct VersionScript {
    /// (version tag, global patterns, local patterns), in declaration
    /// order; an anonymous leading block has an empty tag.
    pub versions: Vec<(String, Vec<String>, Vec<String>)>,
}

impl VersionScript {
    /// True if `name` is assigned to any version's `local:` pattern list.
    pub fn is_local(&self, name: &str) -> bool {
        self.versions.iter().any(|(_, _, locals)| locals.iter().any(|p| glob_match(p, name)))
    }

    /// The version tag a symbol is assigned to by the first matching
    /// `global:` pattern, if any.
    pub fn version_of(&self, name: &str) -> Option<&str> {
        for (tag, globals, _) in &self.versions {
            if globals.iter().any(|p| glob_match(p, name)) {
                return Some(tag.as_str());
            }
        }
        None
    }
}

/// `fnmatch`-style glob supporting `*` and `?`, sufficient for the version
/// script patterns named in §4.12 and scenario 2 of §8.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

pub fn parse_version_script(text: &str) -> anyhow::Result<VersionScript> {
    let mut lex = Lexer::new(text);
    let mut out = VersionScript::default();
    loop {
        let first = lex.next();
        let tag = match &first {
            Tok::Eof => return Ok(out),
            Tok::Ident(s) if s != "{" => s.clone(),
            _ => String::new(),
        };
        if tag.is_empty() {
            if first != Tok::Punct('{') {
                return Err(anyhow::anyhow!("version script: expected a version block"));
            }
        } else if lex.next() != Tok::Punct('{') {
            return Err(anyhow::anyhow!("version script: expected '{{' after tag {tag}"));
        }
        let mut globals = Vec::new();
        let mut locals = Vec::new();
        let mut in_locals = false;
        loop {
            match lex.next() {
                Tok::Punct('}') => break,
                Tok::Ident(kw) if kw == "global" => {
                    in_locals = false;
                    expect_colon(&mut lex)?;
                }
                Tok::Ident(kw) if kw == "local" => {
                    in_locals = true;
                    expect_colon(&mut lex)?;
                }
                Tok::Ident(pat) => {
                    if in_locals {
                        locals.push(pat);
                    } else {
                        globals.push(pat);
                    }
                }
                Tok::Punct(',') | Tok::Punct(';') => {}
                Tok::Eof => return Err(anyhow::anyhow!("version script: unterminated block")),
                _ => {}
            }
        }
        // Consume the optional base-version reference and trailing `;`.
        loop {
            match lex.next() {
                Tok::Punct(';') | Tok::Eof => break,
                _ => {}
            }
        }
        out.versions.push((tag, globals, locals));
    }
}

fn expect_colon(lex: &mut Lexer) -> anyhow::Result<()> {
    match lex.next() {
        Tok::Punct(':') => Ok(()),
        other => Err(anyhow::anyhow!("version script: expected ':', found {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_input_group_and_entry() {
        let ast = parse_script(r#"ENTRY(_start) GROUP(a.o b.a) INPUT(c.o)"#).unwrap();
        assert_eq!(ast.entry.as_deref(), Some("_start"));
        assert_eq!(ast.inputs, vec!["a.o", "b.a", "c.o"]);
    }

    #[test]
    fn parses_sections_placement() {
        let ast = parse_script(
            r#"SECTIONS {
                . = 0x10000;
                .text : { *(.text .text.*) }
                .data : { KEEP(*(.data)) }
            }"#,
        )
        .unwrap();
        assert_eq!(ast.sections.len(), 2);
        assert_eq!(ast.sections[0].output_name, ".text");
        assert_eq!(ast.sections[0].input_patterns, vec![".text", ".text.*"]);
        assert_eq!(ast.sections[1].keep_patterns, vec![".data"]);
    }

    #[test]
    fn parses_explicit_output_section_address() {
        let ast = parse_script(
            r#"SECTIONS {
                .text 0x10000 : { *(.text) }
                .data : { *(.data) }
            }"#,
        )
        .unwrap();
        assert_eq!(ast.sections.len(), 2);
        assert!(matches!(ast.sections[0].addr, Some(Expr::Num(0x10000))));
        assert!(ast.sections[1].addr.is_none());
    }

    #[test]
    fn version_script_splits_global_and_local() {
        let vs = parse_version_script("VER_X1 { global: *; local: b*; };").unwrap();
        assert!(vs.version_of("foo").is_some());
        assert!(vs.is_local("bar"));
        assert!(!vs.is_local("foo"));
    }

    #[test]
    fn glob_matches_star_prefix() {
        assert!(glob_match("b*", "bar"));
        assert!(!glob_match("b*", "foo"));
        assert!(glob_match("*", "anything"));
    }
}
