// Two-pass assembler. One Assembler struct is threaded through every parse
// helper; pass 1 resolves labels and sizes everything, pass 2 emits bytes.
// Both passes run the exact same driver so PCs advance identically and
// forward references land where pass 1 said they would.

use crate::expression::{parse_expression, EvalContext};
use crate::fields::{AddrMode, Width};
use crate::isa::{self, ImmClass};
use crate::operand::{parse_operand, Operand};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_INCLUDE_DEPTH: u32 = 16;

/// Fatal conditions that abort a pass. Ordinary per-line diagnostics just
/// bump the error counter and move on.
#[derive(Debug, Error)]
pub enum AsmError {
    #[error("cannot read {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("include depth exceeded (max {MAX_INCLUDE_DEPTH})")]
    IncludeDepth,
    #[error("{0} error(s) generated")]
    Errors(u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    Label,
    Constant,
    Section,
}

impl SymbolKind {
    pub fn map_tag(&self) -> char {
        match self {
            Self::Label => 'L',
            Self::Constant => 'C',
            Self::Section => 'S',
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    pub defined: bool,
    pub referenced: bool,
    pub line_defined: u32,
    pub kind: SymbolKind,
}

/// Names are folded to upper case on insert and lookup, except `.L`-prefixed
/// locals which stay case-sensitive.
pub struct SymbolTable {
    map: HashMap<String, Symbol>,
    undefined_seen: bool,
}

fn fold_name(name: &str) -> String {
    if name.starts_with(".L") {
        name.to_string()
    } else {
        name.to_ascii_uppercase()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable { map: HashMap::new(), undefined_seen: false }
    }

    /// Look a name up for an expression; unknown names are inserted as
    /// undefined so pass 2 can report them if they never materialize.
    pub fn reference(&mut self, name: &str) -> u32 {
        let key = fold_name(name);
        let entry = self.map.entry(key.clone()).or_insert(Symbol {
            name: key,
            value: 0,
            defined: false,
            referenced: false,
            line_defined: 0,
            kind: SymbolKind::Label,
        });
        entry.referenced = true;
        if !entry.defined {
            self.undefined_seen = true;
        }
        entry.value
    }

    /// Did any lookup since the last call touch an undefined symbol? Used
    /// to size forward-referencing operands.
    pub fn take_undefined_seen(&mut self) -> bool {
        std::mem::take(&mut self.undefined_seen)
    }

    /// Define or re-define. Pass 2 re-defines every label with the value
    /// pass 1 computed; a different value means either a user redefinition
    /// or a phase error, both reportable.
    pub fn define(&mut self, name: &str, value: u32, line: u32) -> Result<(), String> {
        self.define_kind(name, value, line, SymbolKind::Label)
    }

    pub fn define_kind(
        &mut self,
        name: &str,
        value: u32,
        line: u32,
        kind: SymbolKind,
    ) -> Result<(), String> {
        let key = fold_name(name);
        match self.map.get_mut(&key) {
            Some(sym) if sym.defined && sym.value != value => Err(format!(
                "symbol '{}' already defined with value ${:x} (line {})",
                key, sym.value, sym.line_defined
            )),
            Some(sym) => {
                sym.defined = true;
                sym.value = value;
                sym.line_defined = line;
                sym.kind = kind;
                Ok(())
            }
            None => {
                self.map.insert(
                    key.clone(),
                    Symbol {
                        name: key,
                        value,
                        defined: true,
                        referenced: false,
                        line_defined: line,
                        kind,
                    },
                );
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.map.get(&fold_name(name))
    }

    pub fn iter_sorted(&self) -> Vec<&Symbol> {
        let mut all: Vec<&Symbol> = self.map.values().collect();
        all.sort_by(|a, b| a.value.cmp(&b.value).then_with(|| a.name.cmp(&b.name)));
        all
    }

    pub fn undefined_referenced(&self) -> Vec<&Symbol> {
        let mut out: Vec<&Symbol> =
            self.map.values().filter(|s| s.referenced && !s.defined).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub org: u32,
    pub pc: u32,
    pub size: u32,
    pub data: Vec<u8>,
    pub org_set: bool,
}

impl Section {
    fn new(name: &str) -> Self {
        Section {
            name: name.to_string(),
            org: 0,
            pc: 0,
            size: 0,
            data: Vec::new(),
            org_set: false,
        }
    }
}

#[derive(Default)]
struct CfiState {
    in_proc: bool,
    remember_depth: u32,
}

pub struct Assembler {
    pub symbols: SymbolTable,
    sections: Vec<Section>,
    current: usize,
    /// Legacy flat output: every emitted byte in emission order, across
    /// sections.
    flat: Vec<u8>,
    m_width: Width,
    x_width: Width,
    pass: u8,
    errors: u32,
    include_paths: Vec<PathBuf>,
    include_depth: u32,
    cfi: CfiState,
    cur_file: String,
    cur_line: u32,
    verbose: bool,
    /// Branches promoted to their long form in pass 1, keyed by
    /// (file, line) so pass 2 sizes them identically.
    promoted: HashSet<(String, u32)>,
    /// Operands that referenced a then-undefined symbol in pass 1: they
    /// assume the absolute form, and pass 2 must size them the same way.
    forward_ops: HashSet<(String, u32)>,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            symbols: SymbolTable::new(),
            sections: vec![Section::new("text")],
            current: 0,
            flat: Vec::new(),
            m_width: Width::W32,
            x_width: Width::W32,
            pass: 1,
            errors: 0,
            include_paths: Vec::new(),
            include_depth: 0,
            cfi: CfiState::default(),
            cur_file: String::new(),
            cur_line: 0,
            verbose: false,
            promoted: HashSet::new(),
            forward_ops: HashSet::new(),
        }
    }

    pub fn add_include_path(&mut self, path: impl Into<PathBuf>) {
        self.include_paths.push(path.into());
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn flat_image(&self) -> &[u8] {
        &self.flat
    }

    pub fn m_width(&self) -> Width {
        self.m_width
    }

    pub fn x_width(&self) -> Width {
        self.x_width
    }

    pub fn assemble_file(&mut self, path: &Path) -> Result<(), AsmError> {
        let source = fs::read_to_string(path).map_err(|e| AsmError::Io(path.to_path_buf(), e))?;
        self.assemble_str(&source, &path.to_string_lossy())
    }

    pub fn assemble_str(&mut self, source: &str, name: &str) -> Result<(), AsmError> {
        for pass in 1..=2 {
            self.begin_pass(pass);
            self.process_source(source, name)?;
            self.end_pass();
        }
        if self.errors > 0 {
            Err(AsmError::Errors(self.errors))
        } else {
            Ok(())
        }
    }

    fn begin_pass(&mut self, pass: u8) {
        self.pass = pass;
        if pass == 1 {
            self.promoted.clear();
            self.forward_ops.clear();
        }
        self.m_width = Width::W32;
        self.x_width = Width::W32;
        self.current = 0;
        self.flat.clear();
        self.cfi = CfiState::default();
        for section in &mut self.sections {
            section.pc = section.org;
            section.size = 0;
            section.data.clear();
        }
        debug!("assembler pass {}", pass);
    }

    fn end_pass(&mut self) {
        if self.cfi.in_proc {
            self.error(".cfi_startproc without matching .cfi_endproc");
        }
        if self.pass == 2 {
            let missing: Vec<String> = self
                .symbols
                .undefined_referenced()
                .iter()
                .map(|sym| sym.name.clone())
                .collect();
            for name in missing {
                self.error(&format!("undefined symbol '{}'", name));
            }
        }
    }

    fn process_source(&mut self, source: &str, name: &str) -> Result<(), AsmError> {
        let saved_file = std::mem::replace(&mut self.cur_file, name.to_string());
        let saved_line = self.cur_line;
        for (number, raw) in source.lines().enumerate() {
            self.cur_line = number as u32 + 1;
            self.process_line(raw)?;
        }
        self.cur_file = saved_file;
        self.cur_line = saved_line;
        Ok(())
    }

    fn process_file(&mut self, path: &Path) -> Result<(), AsmError> {
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(AsmError::IncludeDepth);
        }
        let source = fs::read_to_string(path).map_err(|e| AsmError::Io(path.to_path_buf(), e))?;
        self.include_depth += 1;
        let result = self.process_source(&source, &path.to_string_lossy());
        self.include_depth -= 1;
        result
    }

    /// Per-line diagnostic: report, count, continue with the next line.
    fn error(&mut self, message: &str) {
        if self.pass == 2 || self.verbose {
            eprintln!("{}:{}: error: {}", self.cur_file, self.cur_line, message);
        }
        // Both passes see most errors; count them once.
        if self.pass == 2 {
            self.errors += 1;
        }
    }

    fn section(&self) -> &Section {
        &self.sections[self.current]
    }

    fn pc(&self) -> u32 {
        self.section().pc
    }

    fn emit(&mut self, bytes: &[u8]) {
        let section = &mut self.sections[self.current];
        if self.pass == 2 {
            section.data.extend_from_slice(bytes);
            self.flat.extend_from_slice(bytes);
        }
        section.pc = section.pc.wrapping_add(bytes.len() as u32);
        section.size += bytes.len() as u32;
    }

    fn pad(&mut self, count: u32) {
        let section = &mut self.sections[self.current];
        if self.pass == 2 {
            section.data.extend(std::iter::repeat(0).take(count as usize));
            self.flat.extend(std::iter::repeat(0).take(count as usize));
        }
        section.pc = section.pc.wrapping_add(count);
        section.size += count;
    }

    // ------------------------------------------------------------------
    // Line lexing

    fn process_line(&mut self, raw: &str) -> Result<(), AsmError> {
        let line = strip_comment(raw);
        if line.trim().is_empty() {
            return Ok(());
        }

        let mut rest = line;

        // Leading (column-0) identifier: label, equate, or a mnemonic.
        if !line.starts_with(|c: char| c.is_whitespace()) {
            let end = ident_len(line);
            if end > 0 {
                let ident = &line[..end];
                let after = &line[end..];
                if let Some(tail) = after.strip_prefix(':') {
                    self.define_label(ident);
                    rest = tail;
                } else if is_equate(after) {
                    return self.handle_equate(ident, after);
                } else if !ident.starts_with('.')
                    && !ident.starts_with('*')
                    && isa::find_instruction(ident).is_none()
                    && !isa::extended_mnemonic(ident)
                    && isa::find_ext_alu(strip_suffix(ident).0).is_none()
                    && isa::shift_subop(&ident.to_ascii_uppercase()).is_none()
                    && isa::extend_subop(&ident.to_ascii_uppercase()).is_none()
                {
                    // Bare label without a colon.
                    self.define_label(ident);
                    rest = after;
                }
            }
        }

        let rest = rest.trim();
        if rest.is_empty() {
            return Ok(());
        }
        if rest.starts_with('.') || rest.starts_with("*=") {
            return self.handle_directive(rest);
        }

        let (mnemonic, operand) = match rest.find(|c: char| c.is_whitespace()) {
            Some(split) => (&rest[..split], rest[split..].trim()),
            None => (rest, ""),
        };
        // `NAME EQU value` with whitespace before EQU.
        if operand.len() >= 4
            && operand[..3].eq_ignore_ascii_case("EQU")
            && operand.as_bytes()[3].is_ascii_whitespace()
        {
            return self.handle_equate(mnemonic, &format!(" EQU {}", &operand[3..]));
        }
        self.encode_instruction(mnemonic, operand);
        Ok(())
    }

    fn define_label(&mut self, name: &str) {
        let pc = self.pc();
        let line = self.cur_line;
        if let Err(msg) = self.symbols.define(name, pc, line) {
            self.error(&msg);
        }
    }

    fn handle_equate(&mut self, name: &str, after: &str) -> Result<(), AsmError> {
        let expr = if let Some(rest) = after.trim_start().strip_prefix('=') {
            rest
        } else {
            // `EQU`
            after.trim_start()[3..].trim_start()
        };
        match self.eval(expr) {
            Some((value, _)) => {
                let line = self.cur_line;
                if let Err(msg) = self.symbols.define_kind(name, value, line, SymbolKind::Constant) {
                    self.error(&msg);
                }
            }
            None => {}
        }
        Ok(())
    }

    fn eval(&mut self, text: &str) -> Option<(u32, usize)> {
        let pc = self.pc();
        let mut ctx = EvalContext { pc, symbols: &mut self.symbols };
        match parse_expression(text, &mut ctx) {
            Ok(result) => Some(result),
            Err(err) => {
                self.error(&err.to_string());
                None
            }
        }
    }

    fn parse_op(&mut self, text: &str) -> Option<Operand> {
        self.symbols.take_undefined_seen();
        let pc = self.pc();
        let mut ctx = EvalContext { pc, symbols: &mut self.symbols };
        match parse_operand(text, &mut ctx) {
            Ok(op) => Some(op),
            Err(err) => {
                self.error(&err.to_string());
                None
            }
        }
    }

    /// Did the operand just parsed reference a forward symbol? Pass 1
    /// records the site so pass 2 answers identically.
    fn operand_forward(&mut self) -> bool {
        let key = (self.cur_file.clone(), self.cur_line);
        if self.pass == 1 {
            if self.symbols.take_undefined_seen() {
                self.forward_ops.insert(key);
                true
            } else {
                false
            }
        } else {
            self.forward_ops.contains(&key)
        }
    }

    // ------------------------------------------------------------------
    // Directives

    fn handle_directive(&mut self, line: &str) -> Result<(), AsmError> {
        let (name, args) = if let Some(rest) = line.strip_prefix("*=") {
            ("*=", rest.trim())
        } else {
            match line.find(|c: char| c.is_whitespace()) {
                Some(split) => (&line[..split], line[split..].trim()),
                None => (line, ""),
            }
        };
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            ".ORG" | "*=" => self.directive_org(args),
            ".ALIGN" => self.directive_align(args, false),
            ".P2ALIGN" => self.directive_align(args, true),
            ".BYTE" | ".DB" | ".DCB" => self.directive_data(args, 1),
            ".WORD" | ".DW" | ".DCW" => self.directive_data(args, 2),
            ".LONG" | ".DL" | ".DCL" => self.directive_data(args, 4),
            ".DWORD" | ".DD" | ".QUAD" => self.directive_data(args, 4),
            ".ASCII" => self.directive_ascii(args, false),
            ".ASCIZ" | ".STRING" => self.directive_ascii(args, true),
            ".DS" | ".RES" | ".SPACE" | ".ZERO" => self.directive_reserve(args),
            ".M8" | ".A8" => self.m_width = Width::W8,
            ".M16" | ".A16" => self.m_width = Width::W16,
            ".M32" | ".A32" => self.m_width = Width::W32,
            ".X8" | ".I8" => self.x_width = Width::W8,
            ".X16" | ".I16" => self.x_width = Width::W16,
            ".X32" | ".I32" => self.x_width = Width::W32,
            ".TEXT" | ".CODE" => self.switch_section("text"),
            ".DATA" => self.switch_section("data"),
            ".BSS" => self.switch_section("bss"),
            ".RODATA" => self.switch_section("rodata"),
            ".SECTION" => {
                // ELF-style flags after a comma are accepted and ignored.
                let section = args.split(',').next().unwrap_or("").trim();
                if section.is_empty() {
                    self.error(".section requires a name");
                } else {
                    self.switch_section(section.trim_start_matches('.'));
                }
            }
            ".SET" => {
                let mut parts = args.splitn(2, ',');
                let name = parts.next().unwrap_or("").trim().to_string();
                let expr = parts.next().unwrap_or("").trim().to_string();
                if name.is_empty() || expr.is_empty() {
                    self.error(".set requires a name and a value");
                } else {
                    return self.handle_equate(&name, &format!("={}", expr));
                }
            }
            ".INCLUDE" | ".INC" => return self.directive_include(args),
            ".CFI_STARTPROC" => {
                if self.cfi.in_proc {
                    self.error("nested .cfi_startproc");
                }
                self.cfi.in_proc = true;
            }
            ".CFI_ENDPROC" => {
                if !self.cfi.in_proc {
                    self.error(".cfi_endproc without .cfi_startproc");
                }
                self.cfi.in_proc = false;
                self.cfi.remember_depth = 0;
            }
            ".CFI_REMEMBER_STATE" => {
                if !self.cfi.in_proc {
                    self.error(".cfi_remember_state outside a procedure");
                }
                self.cfi.remember_depth += 1;
            }
            ".CFI_RESTORE_STATE" => {
                if self.cfi.remember_depth == 0 {
                    self.error(".cfi_restore_state without .cfi_remember_state");
                } else {
                    self.cfi.remember_depth -= 1;
                }
            }
            // Tracked but not emitted; balance checked above.
            ".CFI_DEF_CFA" | ".CFI_DEF_CFA_OFFSET" | ".CFI_DEF_CFA_REGISTER" | ".CFI_OFFSET"
            | ".CFI_RESTORE" | ".CFI_SAME_VALUE" | ".CFI_UNDEFINED" => {
                if !self.cfi.in_proc {
                    self.error("CFI directive outside a procedure");
                }
            }
            // ELF metadata accepted and discarded.
            ".GLOBL" | ".GLOBAL" | ".FILE" | ".TYPE" | ".SIZE" | ".IDENT" | ".ADDRSIG"
            | ".ADDRSIG_SYM" | ".WEAK" | ".LOCAL" | ".COMM" => {}
            other => self.error(&format!("unknown directive '{}'", other)),
        }
        Ok(())
    }

    fn directive_org(&mut self, args: &str) {
        let value = match self.eval(args) {
            Some((v, _)) => v,
            None => return,
        };
        let section = &mut self.sections[self.current];
        if !section.org_set {
            section.org = value;
            section.pc = value;
            section.org_set = true;
        } else if value < section.pc {
            self.error(&format!(
                ".org ${:x} would move backwards past the current pc ${:x}",
                value,
                self.pc()
            ));
        } else {
            let gap = value - self.pc();
            self.pad(gap);
        }
    }

    fn directive_align(&mut self, args: &str, power_of_two: bool) {
        let value = match self.eval(args) {
            Some((v, _)) => v,
            None => return,
        };
        let alignment = if power_of_two {
            if value > 31 {
                self.error(".p2align argument too large");
                return;
            }
            1u32 << value
        } else {
            if value == 0 || !value.is_power_of_two() {
                self.error(".align requires a power of two");
                return;
            }
            value
        };
        let misalign = self.pc() % alignment;
        if misalign != 0 {
            self.pad(alignment - misalign);
        }
    }

    fn directive_data(&mut self, args: &str, item_bytes: u32) {
        for item in split_args(args) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if item.starts_with('"') {
                if let Some(text) = parse_string(item) {
                    for byte in text {
                        let mut bytes = vec![0u8; item_bytes as usize];
                        bytes[0] = byte;
                        self.emit(&bytes);
                    }
                } else {
                    self.error("unterminated string literal");
                }
                continue;
            }
            if let Some((value, _)) = self.eval(item) {
                let bytes: Vec<u8> = (0..item_bytes).map(|j| (value >> (8 * j)) as u8).collect();
                self.emit(&bytes);
            }
        }
    }

    fn directive_ascii(&mut self, args: &str, zero_terminate: bool) {
        match parse_string(args.trim()) {
            Some(mut bytes) => {
                if zero_terminate {
                    bytes.push(0);
                }
                self.emit(&bytes);
            }
            None => self.error("expected a quoted string"),
        }
    }

    fn directive_reserve(&mut self, args: &str) {
        if let Some((count, _)) = self.eval(args) {
            self.pad(count);
        }
    }

    fn directive_include(&mut self, args: &str) -> Result<(), AsmError> {
        let name = args.trim().trim_matches('"');
        if name.is_empty() {
            self.error(".include requires a file name");
            return Ok(());
        }
        // Current file's directory first, then -I paths, then the bare name.
        let mut candidates = Vec::new();
        if let Some(dir) = Path::new(&self.cur_file).parent() {
            candidates.push(dir.join(name));
        }
        for dir in &self.include_paths {
            candidates.push(dir.join(name));
        }
        candidates.push(PathBuf::from(name));
        for candidate in candidates {
            if candidate.is_file() {
                return self.process_file(&candidate);
            }
        }
        self.error(&format!("include file '{}' not found", name));
        Ok(())
    }

    fn switch_section(&mut self, name: &str) {
        let folded = name.to_ascii_lowercase();
        let index = match self.sections.iter().position(|s| s.name == folded) {
            Some(index) => index,
            None => {
                self.sections.push(Section::new(&folded));
                self.sections.len() - 1
            }
        };
        self.current = index;
        // The section symbol pins the pc of the first explicit switch;
        // revisiting the section must not redefine it.
        if self.symbols.lookup(&folded).map_or(true, |sym| !sym.defined) {
            let pc = self.sections[index].pc;
            let line = self.cur_line;
            let _ = self
                .symbols
                .define_kind(&folded, pc, line, SymbolKind::Section);
        }
    }

    // ------------------------------------------------------------------
    // Instruction encoding

    fn encode_instruction(&mut self, raw_mnemonic: &str, operand_text: &str) {
        let (base, forced) = strip_suffix(raw_mnemonic);
        let mnemonic = base.to_ascii_uppercase();

        // Three-operand barrel shifter / extend families.
        if let Some(subop) = isa::shift_subop(&mnemonic) {
            return self.encode_shift(subop, operand_text);
        }
        if let Some(subop) = isa::extend_subop(&mnemonic) {
            return self.encode_extend(subop, operand_text);
        }
        // The $02 fixed-function families (MUL, CAS, LEA, FPU moves, ...).
        if isa::extended_mnemonic(&mnemonic) {
            return self.encode_extended(&mnemonic, operand_text);
        }

        // A size suffix, an explicit register destination, or LD/ST route
        // to the register-targeted ALU machinery.
        let has_dest = explicit_alu_dest(operand_text);
        if isa::find_ext_alu(&mnemonic).is_some()
            && (forced.is_some() || has_dest || matches!(mnemonic.as_str(), "LD" | "ST"))
        {
            return self.encode_ext_alu(&mnemonic, forced, operand_text);
        }
        // A suffixed shift spells the one-bit accumulator/DP form.
        if forced.is_some() {
            if let Some(subop) = shift_alias(&mnemonic) {
                return self.encode_shift_alias(subop, operand_text);
            }
        }
        if forced.is_some() && isa::find_ext_alu(&mnemonic).is_none() {
            self.error(&format!("size suffix not supported on {}", mnemonic));
            return;
        }

        let row = match isa::find_instruction(&mnemonic) {
            Some(row) => row,
            None => {
                self.error(&format!("unknown mnemonic '{}'", raw_mnemonic));
                return;
            }
        };

        if row.opcode(AddrMode::Relative).is_some() || row.opcode(AddrMode::RelativeLong).is_some()
        {
            return self.encode_branch(&mnemonic, operand_text);
        }
        if row.opcode(AddrMode::BlockMove).is_some() {
            return self.encode_block_move(&mnemonic, operand_text);
        }

        let mut op = match self.parse_op(operand_text) {
            Some(op) => op,
            None => return,
        };

        // Bare `ASL` means `ASL A`.
        if op.mode == AddrMode::Implied
            && row.opcode(AddrMode::Implied).is_none()
            && row.opcode(AddrMode::Accumulator).is_some()
        {
            op.mode = AddrMode::Accumulator;
        }

        // Forward references cannot be sized by magnitude: they take the
        // default absolute form in both passes.
        if self.operand_forward() {
            op.mode = assume_forward_mode(op.mode, row, self.m_width);
            if self.pass == 2
                && self.m_width != Width::W32
                && op.value > 0xFFFF
                && matches!(
                    op.mode,
                    AddrMode::Absolute | AddrMode::AbsoluteX | AddrMode::AbsoluteY
                )
            {
                self.error("forward reference does not fit a 16-bit address");
                return;
            }
        }

        let control_flow = isa::is_control_flow(&mnemonic);
        // PEA pushes its operand as data; the B+ rule is about addresses.
        let b_exempt = control_flow || mnemonic == "PEA";
        if self.m_width == Width::W32 && !b_exempt {
            // Data accesses in 32-bit mode: 16-bit absolutes must be B+,
            // 32-bit absolutes go through the extended-ALU encodings, and
            // an 8-digit hex literal always means a 32-bit address.
            if !op.b_relative && op.is_hex_literal && op.hex_digits == 8 {
                op.mode = match op.mode {
                    AddrMode::Direct | AddrMode::Absolute | AddrMode::Long | AddrMode::Absolute32 => {
                        AddrMode::Absolute32
                    }
                    AddrMode::DirectX
                    | AddrMode::AbsoluteX
                    | AddrMode::LongX
                    | AddrMode::Absolute32X => AddrMode::Absolute32X,
                    AddrMode::DirectY | AddrMode::AbsoluteY | AddrMode::Absolute32Y => {
                        AddrMode::Absolute32Y
                    }
                    other => other,
                };
            } else if !op.b_relative
                && matches!(
                    op.mode,
                    AddrMode::Absolute | AddrMode::AbsoluteX | AddrMode::AbsoluteY
                )
            {
                self.error("16-bit absolute addresses need B+ in 32-bit mode");
                return;
            }
            if matches!(
                op.mode,
                AddrMode::Absolute32 | AddrMode::Absolute32X | AddrMode::Absolute32Y
            ) && isa::find_ext_alu(ext_alias(&mnemonic)).is_some()
            {
                return self.encode_ext_alu_operand(ext_alias(&mnemonic), None, AluDest::A, &op);
            }
        }

        // DP operands in 32-bit mode address the register window and must
        // stay 4-byte aligned.
        if self.m_width == Width::W32
            && matches!(
                op.mode,
                AddrMode::Direct
                    | AddrMode::DirectX
                    | AddrMode::DirectY
                    | AddrMode::Indirect
                    | AddrMode::IndirectX
                    | AddrMode::IndirectY
                    | AddrMode::IndirectLong
                    | AddrMode::IndirectLongY
            )
            && op.value % 4 != 0
        {
            self.error(&format!(
                "direct-page address ${:02x} is not 4-byte aligned in 32-bit mode",
                op.value
            ));
            return;
        }

        // 32-bit absolutes outside 32-bit mode ride the WID prefix.
        let mut wid = false;
        let lookup_mode = match op.mode {
            AddrMode::Absolute32 | AddrMode::Absolute32X | AddrMode::Absolute32Y
                if !control_flow && self.m_width != Width::W32 =>
            {
                wid = true;
                match op.mode {
                    AddrMode::Absolute32 => AddrMode::Absolute,
                    AddrMode::Absolute32X => AddrMode::AbsoluteX,
                    _ => AddrMode::AbsoluteY,
                }
            }
            AddrMode::Absolute32 if control_flow => AddrMode::Absolute,
            AddrMode::AbsIndirect | AddrMode::AbsIndirectX | AddrMode::AbsIndirectLong => op.mode,
            other => other,
        };

        // Small operands parse as DP by magnitude; fall back to the wider
        // form when the mnemonic only has that one (JMP ($10), PEA $12).
        let lookup_mode = if row.opcode(lookup_mode).is_none() {
            match lookup_mode {
                AddrMode::Indirect if row.opcode(AddrMode::AbsIndirect).is_some() => {
                    AddrMode::AbsIndirect
                }
                AddrMode::IndirectX if row.opcode(AddrMode::AbsIndirectX).is_some() => {
                    AddrMode::AbsIndirectX
                }
                AddrMode::IndirectLong if row.opcode(AddrMode::AbsIndirectLong).is_some() => {
                    AddrMode::AbsIndirectLong
                }
                AddrMode::Direct if row.opcode(AddrMode::Absolute).is_some() => AddrMode::Absolute,
                AddrMode::DirectX if row.opcode(AddrMode::AbsoluteX).is_some() => {
                    AddrMode::AbsoluteX
                }
                AddrMode::DirectY if row.opcode(AddrMode::AbsoluteY).is_some() => {
                    AddrMode::AbsoluteY
                }
                other => other,
            }
        } else {
            lookup_mode
        };

        let opcode = match row.opcode(lookup_mode) {
            Some(op) => op,
            None => {
                self.error(&format!(
                    "addressing mode {:?} is not legal for {}",
                    op.mode, mnemonic
                ));
                return;
            }
        };

        let mut bytes = Vec::with_capacity(6);
        if wid {
            bytes.push(isa::WID_PREFIX);
        }
        bytes.push(opcode);

        match lookup_mode {
            AddrMode::Immediate => {
                let width = match isa::imm_class(&mnemonic) {
                    ImmClass::M => self.m_width,
                    ImmClass::X => self.x_width,
                    ImmClass::Fixed8 => Width::W8,
                    ImmClass::Fixed16 => Width::W16,
                };
                if op.value & !width.mask() != 0 {
                    self.error(&format!(
                        "immediate ${:x} does not fit in {} bits",
                        op.value,
                        width.bits()
                    ));
                    return;
                }
                for j in 0..width.bytes() {
                    bytes.push((op.value >> (8 * j)) as u8);
                }
            }
            AddrMode::Absolute | AddrMode::AbsoluteX | AddrMode::AbsoluteY
                if control_flow && self.m_width == Width::W32 =>
            {
                // Control flow carries full 32-bit targets in 32-bit mode.
                bytes.extend_from_slice(&op.value.to_le_bytes());
            }
            AddrMode::AbsIndirect | AddrMode::AbsIndirectX | AddrMode::AbsIndirectLong => {
                if self.m_width == Width::W32 {
                    bytes.extend_from_slice(&op.value.to_le_bytes());
                } else {
                    bytes.extend_from_slice(&(op.value as u16).to_le_bytes());
                }
            }
            mode => {
                let count = if wid { 4 } else { mode.operand_bytes().unwrap_or(0) };
                for j in 0..count {
                    bytes.push((op.value >> (8 * j)) as u8);
                }
            }
        }
        self.emit(&bytes);
    }

    fn encode_branch(&mut self, mnemonic: &str, operand_text: &str) {
        let target = match self.eval(operand_text) {
            Some((v, _)) => v,
            None => return,
        };
        let row = isa::find_instruction(mnemonic).unwrap();
        let long_only = row.opcode(AddrMode::Relative).is_none();

        if self.m_width == Width::W32 || long_only {
            // All branches are 16-bit relative in 32-bit mode.
            let opcode = row
                .opcode(AddrMode::RelativeLong)
                .or_else(|| row.opcode(AddrMode::Relative))
                .unwrap();
            let disp = target.wrapping_sub(self.pc().wrapping_add(3)) as i32;
            if !long_only && !(-0x8000..=0x7FFF).contains(&disp) {
                self.error(&format!("branch target out of 16-bit range ({})", disp));
                return;
            }
            let disp = disp as u16;
            self.emit(&[opcode, disp as u8, (disp >> 8) as u8]);
            return;
        }

        let opcode = row.opcode(AddrMode::Relative).unwrap();
        let key = (self.cur_file.clone(), self.cur_line);
        let disp = target.wrapping_sub(self.pc().wrapping_add(2)) as i32;
        let backward = branch_target_known(operand_text, &self.symbols, self.cur_line);

        let promote = if self.pass == 1 {
            let out_of_range = backward && !(-0x80..=0x7F).contains(&disp);
            if out_of_range && isa::long_branch_form(mnemonic).is_some() {
                self.promoted.insert(key.clone());
                true
            } else {
                false
            }
        } else {
            self.promoted.contains(&key)
        };

        if promote {
            let long = isa::long_branch_form(mnemonic).unwrap();
            let opcode = isa::find_instruction(long)
                .unwrap()
                .opcode(AddrMode::RelativeLong)
                .unwrap();
            let disp = target.wrapping_sub(self.pc().wrapping_add(3)) as u16;
            self.emit(&[opcode, disp as u8, (disp >> 8) as u8]);
            return;
        }

        if self.pass == 2 && !(-0x80..=0x7F).contains(&disp) {
            self.error(&format!("branch target out of 8-bit range ({})", disp));
            return;
        }
        self.emit(&[opcode, disp as u8]);
    }

    fn encode_block_move(&mut self, mnemonic: &str, operand_text: &str) {
        let op = match self.parse_op(operand_text) {
            Some(op) => op,
            None => return,
        };
        if op.mode != AddrMode::BlockMove {
            self.error(&format!("{} needs 'src, dst' operands", mnemonic));
            return;
        }
        let opcode = isa::find_instruction(mnemonic)
            .unwrap()
            .opcode(AddrMode::BlockMove)
            .unwrap();
        // Destination byte first, matching the hardware fetch order.
        self.emit(&[opcode, op.mvp_dst as u8, op.value as u8]);
    }

    fn encode_extended(&mut self, mnemonic: &str, operand_text: &str) {
        // FPU forms carry a leading F-register operand.
        if matches!(mnemonic, "LDF" | "STF" | "MVF" | "TFA" | "TAF") {
            return self.encode_fpu(mnemonic, operand_text);
        }
        let mut op = match self.parse_op(operand_text) {
            Some(op) => op,
            None => return,
        };
        if self.operand_forward()
            && op.mode == AddrMode::Direct
            && isa::find_extended(mnemonic, AddrMode::Absolute).is_some()
        {
            op.mode = AddrMode::Absolute;
        }
        let lookup_mode = match op.mode {
            AddrMode::Immediate if matches!(mnemonic, "SETD" | "SETB") => AddrMode::Immediate32,
            AddrMode::Direct | AddrMode::DirectX | AddrMode::Implied | AddrMode::Immediate => {
                op.mode
            }
            AddrMode::Absolute | AddrMode::AbsoluteX => op.mode,
            other => {
                self.error(&format!("addressing mode {:?} is not legal for {}", other, mnemonic));
                return;
            }
        };
        let row = match isa::find_extended(mnemonic, lookup_mode) {
            Some(row) => row,
            None => {
                self.error(&format!(
                    "addressing mode {:?} is not legal for {}",
                    op.mode, mnemonic
                ));
                return;
            }
        };
        let mut bytes = vec![isa::EXT_PREFIX, row.opcode];
        match lookup_mode {
            AddrMode::Implied => {}
            AddrMode::Immediate => {
                // TRAP #imm8.
                if op.value > 0xFF {
                    self.error("trap number must fit in 8 bits");
                    return;
                }
                bytes.push(op.value as u8);
            }
            AddrMode::Immediate32 => bytes.extend_from_slice(&op.value.to_le_bytes()),
            AddrMode::Direct | AddrMode::DirectX => bytes.push(op.value as u8),
            AddrMode::Absolute | AddrMode::AbsoluteX => {
                bytes.extend_from_slice(&(op.value as u16).to_le_bytes())
            }
            _ => unreachable!(),
        }
        self.emit(&bytes);
    }

    fn encode_fpu(&mut self, mnemonic: &str, operand_text: &str) {
        let mut fields = split_args(operand_text);
        if fields.is_empty() {
            self.error(&format!("{} needs an F-register operand", mnemonic));
            return;
        }
        let freg = match parse_freg(fields[0].trim()) {
            Some(reg) => reg,
            None => {
                self.error(&format!("'{}' is not an F-register", fields[0].trim()));
                return;
            }
        };
        match mnemonic {
            "TFA" | "TAF" => {
                let row = isa::find_extended(mnemonic, AddrMode::FpuOneReg).unwrap();
                self.emit(&[isa::EXT_PREFIX, row.opcode, freg]);
            }
            "MVF" => {
                if fields.len() != 2 {
                    self.error("MVF needs two F-registers");
                    return;
                }
                let src = match parse_freg(fields[1].trim()) {
                    Some(reg) => reg,
                    None => {
                        self.error(&format!("'{}' is not an F-register", fields[1].trim()));
                        return;
                    }
                };
                let row = isa::find_extended(mnemonic, AddrMode::FpuTwoReg).unwrap();
                self.emit(&[isa::EXT_PREFIX, row.opcode, (freg << 4) | src]);
            }
            _ => {
                if fields.len() != 2 {
                    self.error(&format!("{} needs 'Fn, operand'", mnemonic));
                    return;
                }
                let mem = fields.remove(1);
                let op = match self.parse_op(mem.trim()) {
                    Some(op) => op,
                    None => return,
                };
                let (mode, operand_bytes): (AddrMode, Vec<u8>) = match op.mode {
                    AddrMode::Direct => (AddrMode::FpuDirect, vec![op.value as u8]),
                    AddrMode::Absolute => {
                        (AddrMode::FpuAbsolute, (op.value as u16).to_le_bytes().to_vec())
                    }
                    AddrMode::Long => (AddrMode::FpuLong, op.value.to_le_bytes()[..3].to_vec()),
                    AddrMode::Indirect => (AddrMode::FpuIndirect, vec![op.value as u8]),
                    other => {
                        self.error(&format!(
                            "addressing mode {:?} is not legal for {}",
                            other, mnemonic
                        ));
                        return;
                    }
                };
                let row = isa::find_extended(mnemonic, mode).unwrap();
                let mut bytes = vec![isa::EXT_PREFIX, row.opcode, freg];
                bytes.extend_from_slice(&operand_bytes);
                self.emit(&bytes);
            }
        }
    }

    fn encode_ext_alu(&mut self, mnemonic: &str, forced: Option<Width>, operand_text: &str) {
        let fields = split_args(operand_text);
        let alu = isa::find_ext_alu(mnemonic).unwrap();
        let (dest, src_text) = if alu.is_unary {
            // Single operand names the destination.
            (AluDest::parse(operand_text.trim()), String::new())
        } else if fields.len() >= 2 {
            match AluDest::try_parse(fields[0].trim()) {
                Some(dest) => (dest, fields[1..].join(",")),
                None => (AluDest::A, operand_text.to_string()),
            }
        } else {
            (AluDest::A, operand_text.to_string())
        };

        if alu.is_unary {
            let mut dest_op = match self.parse_op(operand_text.trim()) {
                Some(op) => op,
                None => return,
            };
            if self.operand_forward() {
                dest_op.mode = widen_dp(dest_op.mode);
            }
            return self.emit_ext_alu(alu.opcode, forced, AluDest::A, &dest_op, true);
        }

        let mut src = match self.parse_op(src_text.trim()) {
            Some(op) => op,
            None => return,
        };
        if self.operand_forward() {
            src.mode = widen_dp(src.mode);
        }
        self.emit_ext_alu(alu.opcode, forced, dest, &src, false);
    }

    fn encode_ext_alu_operand(
        &mut self,
        mnemonic: &str,
        forced: Option<Width>,
        dest: AluDest,
        src: &Operand,
    ) {
        let alu = isa::find_ext_alu(mnemonic).unwrap();
        self.emit_ext_alu(alu.opcode, forced, dest, src, alu.is_unary);
    }

    fn emit_ext_alu(
        &mut self,
        opcode: u8,
        forced: Option<Width>,
        dest: AluDest,
        operand: &Operand,
        unary: bool,
    ) {
        let width = forced.unwrap_or(self.m_width);
        let mode_code = match operand.mode {
            AddrMode::Accumulator => isa::alu_mode::ACC,
            mode => match isa::alu_mode_of(mode) {
                Some(code) => code,
                None => {
                    self.error(&format!("addressing mode {:?} has no extended encoding", mode));
                    return;
                }
            },
        };
        let target_reg = match dest {
            AluDest::A => None,
            AluDest::Reg(dp) => Some(dp),
        };
        let mode_byte =
            (width.field() << 6) | ((target_reg.is_some() as u8) << 5) | (mode_code & 0x1F);
        let mut bytes = vec![isa::EXT_PREFIX, opcode, mode_byte];
        if let Some(dp) = target_reg {
            bytes.push(dp);
        }
        let _ = unary;
        match mode_code {
            isa::alu_mode::IMM => {
                if operand.value & !width.mask() != 0 {
                    self.error(&format!(
                        "immediate ${:x} does not fit in {} bits",
                        operand.value,
                        width.bits()
                    ));
                    return;
                }
                for j in 0..width.bytes() {
                    bytes.push((operand.value >> (8 * j)) as u8);
                }
            }
            isa::alu_mode::ACC => {}
            isa::alu_mode::DP
            | isa::alu_mode::DPX
            | isa::alu_mode::DPY
            | isa::alu_mode::IND
            | isa::alu_mode::INDX
            | isa::alu_mode::INDY
            | isa::alu_mode::INDL
            | isa::alu_mode::INDLY
            | isa::alu_mode::SR
            | isa::alu_mode::SRY => bytes.push(operand.value as u8),
            isa::alu_mode::ABS | isa::alu_mode::ABSX | isa::alu_mode::ABSY => {
                bytes.extend_from_slice(&(operand.value as u16).to_le_bytes())
            }
            isa::alu_mode::LONG | isa::alu_mode::LONGX => {
                bytes.extend_from_slice(&operand.value.to_le_bytes()[..3])
            }
            _ => bytes.extend_from_slice(&operand.value.to_le_bytes()),
        }
        self.emit(&bytes);
    }

    fn encode_shift(&mut self, subop: u8, operand_text: &str) {
        let fields = split_args(operand_text);
        if fields.len() != 3 {
            self.error("shift operations need 'dest, src, count|A'");
            return;
        }
        let dest = AluDest::parse(fields[0].trim());
        let src = AluDest::parse(fields[1].trim());
        let count_text = fields[2].trim();
        let count = if count_text.eq_ignore_ascii_case("A") {
            isa::SHIFT_COUNT_FROM_A
        } else {
            match self.eval(count_text) {
                Some((v, _)) if v < 31 => v as u8,
                Some(_) => {
                    self.error("shift count must be below 31 (use A for dynamic counts)");
                    return;
                }
                None => return,
            }
        };
        let packed = (subop << 5) | count;
        match (dest, src) {
            (AluDest::A, AluDest::A) => {
                self.emit(&[isa::EXT_PREFIX, isa::EXT_SHIFT_ACC, packed]);
            }
            (dest, src) => {
                let dest = self.alu_dest_dp(dest);
                let src = self.alu_dest_dp(src);
                self.emit(&[isa::EXT_PREFIX, isa::EXT_SHIFT_DP, packed, dest, src]);
            }
        }
    }

    fn encode_shift_alias(&mut self, subop: u8, operand_text: &str) {
        // `ASL.W R5` spells a one-bit DP-form shift.
        let dest = AluDest::parse(operand_text.trim());
        let packed = (subop << 5) | 1;
        match dest {
            AluDest::A => self.emit(&[isa::EXT_PREFIX, isa::EXT_SHIFT_ACC, packed]),
            reg => {
                let dp = self.alu_dest_dp(reg);
                self.emit(&[isa::EXT_PREFIX, isa::EXT_SHIFT_DP, packed, dp, dp]);
            }
        }
    }

    fn encode_extend(&mut self, subop: u8, operand_text: &str) {
        let fields = split_args(operand_text);
        let (dest, src) = match fields.len() {
            1 => (AluDest::parse(fields[0].trim()), AluDest::parse(fields[0].trim())),
            2 => (AluDest::parse(fields[0].trim()), AluDest::parse(fields[1].trim())),
            _ => {
                self.error("extend operations need 'dest, src'");
                return;
            }
        };
        match (dest, src) {
            (AluDest::A, AluDest::A) => {
                self.emit(&[isa::EXT_PREFIX, isa::EXT_EXTEND_ACC, subop]);
            }
            (dest, src) => {
                let dest = self.alu_dest_dp(dest);
                let src = self.alu_dest_dp(src);
                self.emit(&[isa::EXT_PREFIX, isa::EXT_EXTEND_DP, subop, dest, src]);
            }
        }
    }

    fn alu_dest_dp(&mut self, dest: AluDest) -> u8 {
        match dest {
            AluDest::A => {
                self.error("A is not addressable here; use a register or DP slot");
                0
            }
            AluDest::Reg(dp) => dp,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum AluDest {
    A,
    Reg(u8),
}

impl AluDest {
    fn try_parse(text: &str) -> Option<Self> {
        if text.eq_ignore_ascii_case("A") {
            return Some(AluDest::A);
        }
        let rest = text.strip_prefix('R').or_else(|| text.strip_prefix('r'))?;
        if rest.is_empty() || !rest.bytes().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let reg: u32 = rest.parse().ok()?;
        if reg < 64 {
            Some(AluDest::Reg((reg * 4) as u8))
        } else {
            None
        }
    }

    fn parse(text: &str) -> Self {
        Self::try_parse(text).unwrap_or(AluDest::A)
    }
}

/// Default mode for a forward-referencing operand: the absolute form at
/// the current width, or the long form when that is all the mnemonic has.
fn assume_forward_mode(
    mode: AddrMode,
    row: &crate::isa::InstructionRow,
    m_width: Width,
) -> AddrMode {
    let wide = m_width == Width::W32;
    match mode {
        AddrMode::Direct | AddrMode::Absolute | AddrMode::Long | AddrMode::Absolute32 => {
            if wide {
                if row.opcode(AddrMode::Absolute).is_some() {
                    AddrMode::Absolute32
                } else {
                    AddrMode::Long
                }
            } else if row.opcode(AddrMode::Absolute).is_some() {
                AddrMode::Absolute
            } else if row.opcode(AddrMode::Long).is_some() {
                AddrMode::Long
            } else {
                mode
            }
        }
        AddrMode::DirectX | AddrMode::AbsoluteX | AddrMode::LongX | AddrMode::Absolute32X => {
            if wide && row.opcode(AddrMode::AbsoluteX).is_some() {
                AddrMode::Absolute32X
            } else if row.opcode(AddrMode::AbsoluteX).is_some() {
                AddrMode::AbsoluteX
            } else if row.opcode(AddrMode::LongX).is_some() {
                AddrMode::LongX
            } else {
                mode
            }
        }
        AddrMode::DirectY | AddrMode::AbsoluteY | AddrMode::Absolute32Y => {
            if wide && row.opcode(AddrMode::AbsoluteY).is_some() {
                AddrMode::Absolute32Y
            } else if row.opcode(AddrMode::AbsoluteY).is_some() {
                AddrMode::AbsoluteY
            } else {
                mode
            }
        }
        other => other,
    }
}

fn widen_dp(mode: AddrMode) -> AddrMode {
    match mode {
        AddrMode::Direct => AddrMode::Absolute,
        AddrMode::DirectX => AddrMode::AbsoluteX,
        AddrMode::DirectY => AddrMode::AbsoluteY,
        other => other,
    }
}

fn parse_freg(text: &str) -> Option<u8> {
    let rest = text.strip_prefix('F').or_else(|| text.strip_prefix('f'))?;
    if rest.is_empty() || !rest.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let reg: u8 = rest.parse().ok()?;
    if reg < 8 {
        Some(reg)
    } else {
        None
    }
}

/// Does the operand start with an explicit `A,` or `Rn,` ALU destination?
fn explicit_alu_dest(operand_text: &str) -> bool {
    let fields = split_args(operand_text);
    fields.len() >= 2 && AluDest::try_parse(fields[0].trim()).is_some()
}

/// The extended-ALU spelling of the classic load/store mnemonics, used when
/// 32-bit mode forces an operand onto the secondary encoding.
fn ext_alias(mnemonic: &str) -> &str {
    match mnemonic {
        "LDA" => "LD",
        "STA" => "ST",
        other => other,
    }
}

fn shift_alias(mnemonic: &str) -> Option<u8> {
    match mnemonic {
        "ASL" => Some(0),
        "LSR" => Some(1),
        "ROL" => Some(3),
        "ROR" => Some(4),
        _ => None,
    }
}

/// Strip a trailing `.B`/`.W`/`.L` size suffix.
fn strip_suffix(mnemonic: &str) -> (&str, Option<Width>) {
    let upper_end = mnemonic.len();
    if upper_end > 2 {
        let (head, tail) = mnemonic.split_at(upper_end - 2);
        match tail.to_ascii_uppercase().as_str() {
            ".B" => return (head, Some(Width::W8)),
            ".W" => return (head, Some(Width::W16)),
            ".L" => return (head, Some(Width::W32)),
            _ => {}
        }
    }
    (mnemonic, None)
}

/// Split an operand list at top-level commas (parens, brackets and quotes
/// protect their contents).
fn split_args(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut in_char = false;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '"' if !in_char => in_string = !in_string,
            '\'' if !in_string => in_char = !in_char,
            '(' | '[' if !in_string && !in_char => depth += 1,
            ')' | ']' if !in_string && !in_char => depth -= 1,
            ',' if depth == 0 && !in_string && !in_char => {
                out.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() || !out.is_empty() {
        out.push(current);
    }
    out
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut in_char = false;
    for (pos, c) in line.char_indices() {
        match c {
            '"' if !in_char => in_string = !in_string,
            '\'' if !in_string => in_char = !in_char,
            ';' if !in_string && !in_char => return &line[..pos],
            _ => {}
        }
    }
    line
}

fn ident_len(line: &str) -> usize {
    let bytes = line.as_bytes();
    if bytes.is_empty() || !(bytes[0].is_ascii_alphabetic() || matches!(bytes[0], b'_' | b'.' | b'@')) {
        return 0;
    }
    let mut end = 1;
    while end < bytes.len()
        && (bytes[end].is_ascii_alphanumeric() || matches!(bytes[end], b'_' | b'.' | b'@'))
    {
        end += 1;
    }
    end
}

fn is_equate(after: &str) -> bool {
    let t = after.trim_start();
    t.starts_with('=')
        || (t.len() >= 4
            && t[..3].eq_ignore_ascii_case("EQU")
            && t.as_bytes()[3].is_ascii_whitespace())
}

/// A branch target counts as known (for long-form promotion) when it is a
/// single identifier already defined on an earlier line. Forward targets
/// assume the short form in pass 1 and must fit it in pass 2.
fn branch_target_known(operand: &str, symbols: &SymbolTable, cur_line: u32) -> bool {
    let trimmed = operand.trim();
    if trimmed.is_empty() {
        return false;
    }
    let bytes = trimmed.as_bytes();
    if !(bytes[0].is_ascii_alphabetic() || matches!(bytes[0], b'_' | b'.' | b'@')) {
        // Numeric or expression target: value is available either way.
        return true;
    }
    if ident_len(trimmed) != trimmed.len() {
        return true;
    }
    match symbols.lookup(trimmed) {
        Some(sym) => sym.defined && sym.line_defined < cur_line,
        None => false,
    }
}

fn parse_string(text: &str) -> Option<Vec<u8>> {
    let inner = text.strip_prefix('"')?;
    let mut out = Vec::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(out),
            '\\' => {
                let escaped = chars.next()?;
                out.push(match escaped {
                    'n' => b'\n',
                    'r' => b'\r',
                    't' => b'\t',
                    '0' => 0,
                    '\\' => b'\\',
                    '"' => b'"',
                    other => other as u8,
                });
            }
            other => out.push(other as u8),
        }
    }
    None
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X} {} {}", self.value, self.kind.map_tag(), self.name)
    }
}
