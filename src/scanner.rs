// src/scanner.rs
use crate::types::*;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, trace};

/// Anything that can turn source text into detected constructs.
///
/// Implementations must never fail: malformed input yields fewer constructs,
/// and the output is sorted by line, then column.
pub trait ConstructScanner: Send + Sync {
    fn scan(&self, source: &str) -> Vec<DetectedConstruct>;
}

/// Regex-driven scanner for Solidity-like contract source.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternScanner;

impl ConstructScanner for PatternScanner {
    fn scan(&self, source: &str) -> Vec<DetectedConstruct> {
        SourceScanner::new(source).scan()
    }
}

static_regex!(
    declaration_regex,
    r"(?s)^(?P<ty>mapping\s*\(.*\)|[A-Za-z_][\w.]*(?:\s+payable)?(?:\s*\[[^\]]*\])*)\s+(?P<mods>(?:(?:public|private|internal|constant|immutable|override|transient)\s+)*)(?P<name>[A-Za-z_]\w*)\s*(?:=\s*(?P<init>.*?))?\s*;$"
);
static_regex!(
    function_regex,
    r"\b(?:function\s+(?P<name>[A-Za-z_]\w*)|(?P<special>constructor|fallback|receive))\s*\("
);
static_regex!(modifier_regex, r"\bmodifier\s+(?P<name>[A-Za-z_]\w*)");
static_regex!(loop_regex, r"\b(?P<kw>for|while)\s*\(");
static_regex!(
    contract_var_regex,
    r"\b(?P<ty>[A-Z]\w*)\s+(?:(?:public|private|internal|immutable|constant|memory|storage|calldata)\s+)*(?P<name>[a-z_]\w*)\b"
);
static_regex!(
    call_regex,
    r"(?P<recv>\b[A-Za-z_]\w*(?:\s*\([^()]*\))?)\s*\.\s*(?P<method>[A-Za-z_]\w*)\s*(?:\{[^{}]*\}\s*)?\("
);
static_regex!(
    new_alloc_regex,
    r"\bnew\s+(?:[A-Za-z_]\w*\s*(?:\[\s*\]\s*)+|bytes|string)\s*\("
);
static_regex!(
    memory_binding_regex,
    r"\b[A-Za-z_][\w.]*(?:\s*\[[^\]]*\])*\s+memory\s+(?P<name>[A-Za-z_]\w*)\s*="
);
static_regex!(memory_param_regex, r"\bmemory\s+(?P<name>[A-Za-z_]\w*)");
static_regex!(literal_bound_regex, r"^\s*[A-Za-z_]\w*\s*(?P<op><=|<)\s*(?P<n>\d+)\s*$");

const DECLARATION_KEYWORDS: &[&str] = &[
    "using", "event", "error", "pragma", "import", "function", "modifier", "return", "emit",
    "type", "constructor", "fallback", "receive", "library", "contract", "interface", "abstract",
    "delete", "struct", "enum",
];

const EXTERNAL_METHODS: &[&str] = &["call", "delegatecall", "staticcall", "transfer", "send"];

const VISIBILITIES: &[&str] = &["public", "external", "internal", "private"];

/// Maps byte offsets to 1-based line/column positions and back.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            line_starts,
            len: text.len(),
        }
    }

    pub fn position(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.len);
        let line = self.line_starts.partition_point(|&start| start <= offset);
        (line, offset - self.line_starts[line - 1] + 1)
    }

    /// Byte offset of a position. A column one past the last byte of a line is valid.
    pub fn offset(&self, line: usize, column: usize) -> Option<usize> {
        if line == 0 || column == 0 {
            return None;
        }
        let start = *self.line_starts.get(line - 1)?;
        let line_end = match self.line_starts.get(line) {
            Some(next) => next - 1,
            None => self.len,
        };
        let offset = start.checked_add(column - 1)?;
        (offset <= line_end).then_some(offset)
    }

    pub fn range(&self, start: usize, end: usize) -> SourceRange {
        let (start_line, start_column) = self.position(start);
        let (end_line, end_column) = self.position(end);
        SourceRange {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    pub fn span(&self, range: &SourceRange) -> Option<(usize, usize)> {
        let start = self.offset(range.start_line, range.start_column)?;
        let end = self.offset(range.end_line, range.end_column)?;
        (start <= end).then_some((start, end))
    }
}

/// A contract-level variable declaration. Offsets index into the original source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariable {
    pub name: String,
    pub type_name: String,
    pub modifiers: Vec<String>,
    pub initializer: Option<String>,
    pub start: usize,
    pub end: usize,
    pub name_offset: usize,
}

impl StateVariable {
    /// `constant` and `immutable` values live in bytecode, not in a storage slot.
    pub fn is_storage(&self) -> bool {
        !self
            .modifiers
            .iter()
            .any(|m| m == "constant" || m == "immutable")
    }
}

/// Blanks out comments and string contents, keeping byte offsets and newlines intact.
pub fn mask_comments_and_strings(source: &str) -> String {
    enum Mask {
        Code,
        LineComment,
        BlockComment,
        Str(char),
    }

    fn blank(out: &mut String, c: char) {
        if c == '\n' {
            out.push('\n');
        } else {
            out.extend(std::iter::repeat(' ').take(c.len_utf8()));
        }
    }

    let mut out = String::with_capacity(source.len());
    let mut state = Mask::Code;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Mask::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = Mask::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = Mask::BlockComment;
                }
                '"' | '\'' => {
                    out.push(c);
                    state = Mask::Str(c);
                }
                _ => out.push(c),
            },
            Mask::LineComment => {
                if c == '\n' {
                    state = Mask::Code;
                }
                blank(&mut out, c);
            }
            Mask::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = Mask::Code;
                } else {
                    blank(&mut out, c);
                }
            }
            Mask::Str(quote) => {
                if c == '\\' {
                    blank(&mut out, c);
                    if let Some(escaped) = chars.next() {
                        blank(&mut out, escaped);
                    }
                } else if c == quote {
                    out.push(c);
                    state = Mask::Code;
                } else if c == '\n' {
                    // Unterminated literal: resume scanning on the next line
                    out.push('\n');
                    state = Mask::Code;
                } else {
                    blank(&mut out, c);
                }
            }
        }
    }

    out
}

/// Index of the bracket closing the one at `open`, if it is balanced.
pub fn matching_close(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let (open_b, close_b) = match bytes.get(open)? {
        b'(' => (b'(', b')'),
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if b == open_b {
            depth += 1;
        } else if b == close_b {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

fn next_non_ws(masked: &str, from: usize) -> Option<(usize, u8)> {
    masked
        .as_bytes()
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, b)| !b.is_ascii_whitespace())
        .map(|(i, b)| (i, *b))
}

pub(crate) fn prev_non_ws(masked: &str, before: usize) -> Option<(usize, u8)> {
    masked.as_bytes()[..before.min(masked.len())]
        .iter()
        .enumerate()
        .rev()
        .find(|(_, b)| !b.is_ascii_whitespace())
        .map(|(i, b)| (i, *b))
}

fn trim_span(text: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead == slice.len() {
        return (start, start);
    }
    (start + lead, end - trail)
}

/// Contract-level variable declarations found in `source`.
pub fn state_variables(source: &str) -> Vec<StateVariable> {
    collect_state_variables(source, &mask_comments_and_strings(source))
}

fn collect_state_variables(source: &str, masked: &str) -> Vec<StateVariable> {
    let mut variables = Vec::new();
    let mut depth = 0usize;
    let mut stmt_start: Option<usize> = None;

    for (i, b) in masked.bytes().enumerate() {
        match b {
            b'{' => {
                depth += 1;
                stmt_start = None;
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                stmt_start = None;
            }
            b';' if depth == 1 => {
                if let Some(start) = stmt_start.take() {
                    if let Some(var) = parse_declaration(source, masked, start, i + 1) {
                        variables.push(var);
                    }
                }
            }
            _ if depth == 1 && stmt_start.is_none() && !b.is_ascii_whitespace() => {
                stmt_start = Some(i);
            }
            _ => {}
        }
    }

    variables
}

fn parse_declaration(source: &str, masked: &str, start: usize, end: usize) -> Option<StateVariable> {
    let text = &masked[start..end];
    let caps = declaration_regex().captures(text)?;
    let ty = caps.name("ty")?;
    let first_word = ty.as_str().split_whitespace().next().unwrap_or("");
    let first_word = first_word.split('(').next().unwrap_or(first_word);
    if DECLARATION_KEYWORDS.contains(&first_word) {
        return None;
    }

    let name = caps.name("name")?;
    let modifiers = caps
        .name("mods")
        .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    // Initializer text comes from the original so string literals survive masking
    let initializer = caps
        .name("init")
        .map(|m| {
            source
                .get(start + m.start()..start + m.end())
                .unwrap_or(m.as_str())
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty());

    Some(StateVariable {
        name: name.as_str().to_string(),
        type_name: ty.as_str().split_whitespace().collect::<Vec<_>>().join(" "),
        modifiers,
        initializer,
        start,
        end,
        name_offset: start + name.start(),
    })
}

/// Literal iteration count for bounds like `i < 10` or `i <= 10`.
pub fn literal_iterations(bound: &str) -> Option<u64> {
    let caps = literal_bound_regex().captures(bound)?;
    let n: u64 = caps.name("n")?.as_str().parse().ok()?;
    match caps.name("op")?.as_str() {
        "<=" => Some(n.saturating_add(1)),
        _ => Some(n),
    }
}

#[derive(Debug, Clone)]
struct FunctionSpan {
    header_start: usize,
    header_end: usize,
    body_end: usize,
}

pub struct SourceScanner<'a> {
    source: &'a str,
    masked: String,
    index: LineIndex,
    constructs: Vec<DetectedConstruct>,
    state_variables: Vec<StateVariable>,
    functions: Vec<FunctionSpan>,
}

impl<'a> SourceScanner<'a> {
    pub fn new(source: &'a str) -> Self {
        let masked = mask_comments_and_strings(source);
        let state_variables = collect_state_variables(source, &masked);
        Self {
            source,
            index: LineIndex::new(source),
            masked,
            constructs: Vec::new(),
            state_variables,
            functions: Vec::new(),
        }
    }

    pub fn scan(mut self) -> Vec<DetectedConstruct> {
        self.scan_functions();
        self.scan_modifiers();
        self.scan_loops();
        self.scan_external_calls();
        self.scan_state_initializers();
        self.scan_storage_accesses();
        self.scan_memory_allocations();

        // Stable: constructs at the same position keep emission order
        self.constructs.sort_by_key(|c| (c.line, c.column));
        debug!(
            constructs = self.constructs.len(),
            state_variables = self.state_variables.len(),
            functions = self.functions.len(),
            "scanned source"
        );
        self.constructs
    }

    fn push(&mut self, kind: ConstructKind, start: usize, end: usize, attributes: BTreeMap<String, String>) {
        let (line, column) = self.index.position(start);
        trace!(?kind, line, column, "detected construct");
        self.constructs.push(DetectedConstruct {
            kind,
            line,
            column,
            length: end.saturating_sub(start),
            attributes,
        });
    }

    fn in_function_header(&self, offset: usize) -> bool {
        self.functions
            .iter()
            .any(|f| offset >= f.header_start && offset < f.header_end)
    }

    fn in_function_body(&self, offset: usize) -> bool {
        self.functions
            .iter()
            .any(|f| offset >= f.header_end && offset <= f.body_end)
    }

    fn scan_functions(&mut self) {
        let matches: Vec<_> = function_regex()
            .captures_iter(&self.masked)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let name = caps
                    .name("name")
                    .or_else(|| caps.name("special"))?
                    .as_str()
                    .to_string();
                Some((whole.start(), whole.end() - 1, name))
            })
            .collect();

        for (start, paren, name) in matches {
            let Some(close) = matching_close(&self.masked, paren) else {
                continue;
            };
            let tail_end = self.masked[close + 1..]
                .find(|c| c == '{' || c == ';')
                .map(|i| close + 1 + i)
                .unwrap_or(self.masked.len());
            let modifiers = &self.masked[close + 1..tail_end];
            let words: Vec<&str> = modifiers
                .split(|c: char| !c.is_alphanumeric() && c != '_')
                .filter(|w| !w.is_empty())
                .collect();

            let visibility = words
                .iter()
                .find(|w| VISIBILITIES.contains(w))
                .map(|w| w.to_string())
                .unwrap_or_else(|| "default".to_string());
            let mutability = words
                .iter()
                .find(|w| matches!(**w, "pure" | "view" | "payable"))
                .map(|w| w.to_string())
                .unwrap_or_else(|| "nonpayable".to_string());

            let (_, header_end) = trim_span(&self.masked, start, tail_end);
            let has_body = self.masked.as_bytes().get(tail_end) == Some(&b'{');
            let body_end = if has_body {
                matching_close(&self.masked, tail_end).unwrap_or(self.masked.len().saturating_sub(1))
            } else {
                header_end
            };

            let params = self.source[paren + 1..close].trim().to_string();
            let (end_line, _) = self.index.position(body_end);
            let (header_end_line, header_end_column) = self.index.position(header_end);

            let mut attributes = BTreeMap::new();
            attributes.insert("name".to_string(), name.clone());
            attributes.insert("visibility".to_string(), visibility.clone());
            attributes.insert("mutability".to_string(), mutability);
            attributes.insert("params".to_string(), params);
            attributes.insert("has_body".to_string(), has_body.to_string());
            attributes.insert("end_line".to_string(), end_line.to_string());
            attributes.insert("header_end_line".to_string(), header_end_line.to_string());
            attributes.insert("header_end_column".to_string(), header_end_column.to_string());
            if words.iter().any(|w| matches!(*w, "virtual" | "override")) {
                attributes.insert("inherited".to_string(), "true".to_string());
            }
            self.push(ConstructKind::FunctionDecl, start, header_end, attributes);

            // Reference-type arguments are copied out of calldata on entry
            if matches!(visibility.as_str(), "public" | "external") {
                let params: Vec<(usize, usize, String)> = memory_param_regex()
                    .captures_iter(&self.masked[paren + 1..close])
                    .filter_map(|caps| {
                        let whole = caps.get(0)?;
                        let param = caps.name("name")?;
                        Some((paren + 1 + whole.start(), paren + 1 + whole.end(), param.as_str().to_string()))
                    })
                    .collect();
                for (param_start, param_end, param) in params {
                    let mut attributes = BTreeMap::new();
                    attributes.insert("source".to_string(), "parameter".to_string());
                    attributes.insert("name".to_string(), param);
                    attributes.insert("function".to_string(), name.clone());
                    self.push(ConstructKind::MemoryAlloc, param_start, param_end, attributes);
                }
            }

            self.functions.push(FunctionSpan {
                header_start: start,
                header_end: tail_end,
                body_end,
            });
        }
    }

    /// Modifier bodies run inline with the functions they wrap, so their
    /// storage accesses are scanned like a function body.
    fn scan_modifiers(&mut self) {
        let matches: Vec<_> = modifier_regex()
            .captures_iter(&self.masked)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((whole.start(), whole.end(), caps.name("name")?.as_str().to_string()))
            })
            .collect();

        for (start, name_end, name) in matches {
            // The parameter list is optional: `modifier onlyOwner { .. }`
            let (after_params, params) = match next_non_ws(&self.masked, name_end) {
                Some((i, b'(')) => match matching_close(&self.masked, i) {
                    Some(close) => (close + 1, self.source[i + 1..close].trim().to_string()),
                    None => continue,
                },
                Some(_) => (name_end, String::new()),
                None => continue,
            };
            let Some(tail_end) = self.masked[after_params..]
                .find(|c| c == '{' || c == ';')
                .map(|i| after_params + i)
            else {
                continue;
            };
            let has_body = self.masked.as_bytes().get(tail_end) == Some(&b'{');
            let (_, header_end) = trim_span(&self.masked, start, tail_end);
            let body_end = if has_body {
                matching_close(&self.masked, tail_end).unwrap_or(self.masked.len().saturating_sub(1))
            } else {
                header_end
            };
            let (end_line, _) = self.index.position(body_end);
            let (header_end_line, header_end_column) = self.index.position(header_end);

            let mut attributes = BTreeMap::new();
            attributes.insert("name".to_string(), name);
            attributes.insert("kind".to_string(), "modifier".to_string());
            attributes.insert("visibility".to_string(), "internal".to_string());
            attributes.insert("mutability".to_string(), "nonpayable".to_string());
            attributes.insert("params".to_string(), params);
            attributes.insert("has_body".to_string(), has_body.to_string());
            attributes.insert("end_line".to_string(), end_line.to_string());
            attributes.insert("header_end_line".to_string(), header_end_line.to_string());
            attributes.insert("header_end_column".to_string(), header_end_column.to_string());
            self.push(ConstructKind::FunctionDecl, start, header_end, attributes);

            self.functions.push(FunctionSpan {
                header_start: start,
                header_end: tail_end,
                body_end,
            });
        }
    }

    fn scan_loops(&mut self) {
        let matches: Vec<_> = loop_regex()
            .captures_iter(&self.masked)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((whole.start(), whole.end() - 1, caps.name("kw")?.as_str().to_string()))
            })
            .collect();

        for (start, paren, keyword) in matches {
            let Some(close) = matching_close(&self.masked, paren) else {
                continue;
            };
            let inner = &self.source[paren + 1..close];
            let masked_inner = &self.masked[paren + 1..close];

            let mut attributes = BTreeMap::new();
            if keyword == "for" {
                // Split on the top-level semicolons of `init; cond; step`
                let mut parts = Vec::new();
                let mut depth = 0i32;
                let mut last = 0;
                for (i, b) in masked_inner.bytes().enumerate() {
                    match b {
                        b'(' | b'[' => depth += 1,
                        b')' | b']' => depth -= 1,
                        b';' if depth == 0 => {
                            parts.push(&inner[last..i]);
                            last = i + 1;
                        }
                        _ => {}
                    }
                }
                parts.push(&inner[last..]);
                let bound = parts.get(1).map(|s| s.trim()).unwrap_or("");
                let step = parts.get(2).map(|s| s.trim()).unwrap_or("");
                attributes.insert("bound".to_string(), bound.to_string());
                attributes.insert("step".to_string(), step.to_string());
            } else {
                attributes.insert("bound".to_string(), inner.trim().to_string());
            }
            if let Some(n) = attributes.get("bound").and_then(|b| literal_iterations(b)) {
                attributes.insert("literal_iterations".to_string(), n.to_string());
            }

            let body_end = match next_non_ws(&self.masked, close + 1) {
                Some((i, b'{')) => matching_close(&self.masked, i).unwrap_or(self.masked.len()),
                Some((i, _)) => self.masked[i..]
                    .find(';')
                    .map(|j| i + j)
                    .unwrap_or(self.masked.len()),
                None => close,
            };
            let (end_line, _) = self.index.position(body_end);
            let (header_end_line, header_end_column) = self.index.position(close + 1);

            attributes.insert("keyword".to_string(), keyword);
            attributes.insert("header".to_string(), self.source[start..close + 1].to_string());
            attributes.insert("end_line".to_string(), end_line.to_string());
            attributes.insert("header_end_line".to_string(), header_end_line.to_string());
            attributes.insert("header_end_column".to_string(), header_end_column.to_string());
            self.push(ConstructKind::Loop, start, close + 1, attributes);
        }
    }

    fn contract_typed_names(&self) -> HashSet<String> {
        contract_var_regex()
            .captures_iter(&self.masked)
            .filter_map(|caps| {
                caps.name("ty")?;
                let name = caps.name("name")?.as_str();
                // Struct bindings look the same; accepted as a false positive
                if DECLARATION_KEYWORDS.contains(&name) || VISIBILITIES.contains(&name) {
                    return None;
                }
                Some(name.to_string())
            })
            .collect()
    }

    fn scan_external_calls(&mut self) {
        let receivers = self.contract_typed_names();
        let matches: Vec<_> = call_regex()
            .captures_iter(&self.masked)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let recv = caps.name("recv")?.as_str().trim().to_string();
                let method = caps.name("method")?;
                Some((whole.start(), method.end(), recv, method.as_str().to_string()))
            })
            .collect();

        for (start, end, receiver, method) in matches {
            if self.in_function_header(start) {
                continue;
            }
            let recv_ident = receiver.split('(').next().unwrap_or("").trim();
            let is_cast = receiver.contains('(')
                && recv_ident.chars().next().is_some_and(|c| c.is_ascii_uppercase());
            let is_external = EXTERNAL_METHODS.contains(&method.as_str())
                || is_cast
                || recv_ident == "this"
                || (!receiver.contains('(') && receivers.contains(recv_ident));
            if !is_external || recv_ident == "abi" || recv_ident == "super" {
                continue;
            }

            let mut attributes = BTreeMap::new();
            attributes.insert("receiver".to_string(), receiver);
            attributes.insert("method".to_string(), method);
            self.push(ConstructKind::ExternalCall, start, end, attributes);
        }
    }

    fn scan_state_initializers(&mut self) {
        let writes: Vec<_> = self
            .state_variables
            .iter()
            .filter(|v| v.is_storage() && v.initializer.is_some())
            .map(|v| (v.name_offset, v.name.clone()))
            .collect();

        for (offset, name) in writes {
            let end = offset + name.len();
            let mut attributes = BTreeMap::new();
            attributes.insert("name".to_string(), name);
            attributes.insert("access".to_string(), "init".to_string());
            self.push(ConstructKind::StorageWrite, offset, end, attributes);
        }
    }

    fn scan_storage_accesses(&mut self) {
        let mut names: Vec<&str> = self
            .state_variables
            .iter()
            .filter(|v| v.is_storage())
            .map(|v| v.name.as_str())
            .collect();
        if names.is_empty() {
            return;
        }
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        names.dedup();
        let pattern = format!(
            r"\b(?:{})\b",
            names.iter().map(|n| regex::escape(n)).collect::<Vec<_>>().join("|")
        );
        let Ok(re) = Regex::new(&pattern) else {
            return;
        };

        let declared_at: HashSet<usize> = self.state_variables.iter().map(|v| v.name_offset).collect();
        let hits: Vec<(usize, usize)> = re.find_iter(&self.masked).map(|m| (m.start(), m.end())).collect();

        for (start, end) in hits {
            if declared_at.contains(&start) || self.in_function_header(start) || !self.in_function_body(start) {
                continue;
            }
            if matches!(prev_non_ws(&self.masked, start), Some((_, b'.'))) {
                continue;
            }

            let name = self.masked[start..end].to_string();
            let access = self.classify_access(start, end);
            let mut attributes = BTreeMap::new();
            attributes.insert("name".to_string(), name.clone());

            match access {
                Access::Read => {
                    attributes.insert("access".to_string(), "read".to_string());
                    self.push(ConstructKind::StorageRead, start, end, attributes);
                }
                Access::Write(kind) => {
                    // Read-modify-write forms load the slot before storing it
                    if matches!(kind, "compound" | "increment") {
                        let mut read = BTreeMap::new();
                        read.insert("name".to_string(), name);
                        read.insert("access".to_string(), "read".to_string());
                        self.push(ConstructKind::StorageRead, start, end, read);
                    }
                    attributes.insert("access".to_string(), kind.to_string());
                    self.push(ConstructKind::StorageWrite, start, end, attributes);
                }
            }
        }
    }

    fn classify_access(&self, start: usize, end: usize) -> Access {
        let bytes = self.masked.as_bytes();

        if let Some((i, b)) = prev_non_ws(&self.masked, start) {
            if (b == b'+' || b == b'-') && i > 0 && bytes[i - 1] == b {
                return Access::Write("increment");
            }
            if b == b'e' && self.masked[..=i].ends_with("delete") {
                return Access::Write("delete");
            }
        }

        // Walk past index expressions and member accesses
        let mut pos = end;
        loop {
            match next_non_ws(&self.masked, pos) {
                Some((i, b'[')) => match matching_close(&self.masked, i) {
                    Some(close) => pos = close + 1,
                    None => return Access::Read,
                },
                Some((i, b'.')) => {
                    let Some((ident_start, _)) = next_non_ws(&self.masked, i + 1) else {
                        return Access::Read;
                    };
                    let ident_len = self.masked[ident_start..]
                        .find(|c: char| !c.is_alphanumeric() && c != '_')
                        .unwrap_or(self.masked.len() - ident_start);
                    if ident_len == 0 {
                        return Access::Read;
                    }
                    let ident = &self.masked[ident_start..ident_start + ident_len];
                    let after = ident_start + ident_len;
                    if matches!(ident, "push" | "pop") && matches!(next_non_ws(&self.masked, after), Some((_, b'('))) {
                        return Access::Write(if ident == "push" { "push" } else { "pop" });
                    }
                    pos = after;
                }
                Some((i, _)) => {
                    let rest = &self.masked[i..];
                    if rest.starts_with("++") || rest.starts_with("--") {
                        return Access::Write("increment");
                    }
                    const COMPOUND: &[&str] = &["+=", "-=", "*=", "/=", "%=", "|=", "&=", "^=", "<<=", ">>="];
                    if COMPOUND.iter().any(|op| rest.starts_with(op)) {
                        return Access::Write("compound");
                    }
                    if rest.starts_with('=') && !rest.starts_with("==") && !rest.starts_with("=>") {
                        return Access::Write("assign");
                    }
                    return Access::Read;
                }
                None => return Access::Read,
            }
        }
    }

    fn scan_memory_allocations(&mut self) {
        let mut found: Vec<(usize, usize, &'static str, String)> = Vec::new();

        for m in new_alloc_regex().find_iter(&self.masked) {
            if self.in_function_body(m.start()) {
                found.push((m.start(), m.end(), "new", self.masked[m.start()..m.end()].trim().to_string()));
            }
        }

        for caps in memory_binding_regex().captures_iter(&self.masked) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.name("name")) else {
                continue;
            };
            if !self.in_function_body(whole.start()) || self.in_function_header(whole.start()) {
                continue;
            }
            // `x = new T[](n)` is already counted by the allocation itself
            let rhs_is_new = next_non_ws(&self.masked, whole.end())
                .map(|(i, _)| self.masked[i..].starts_with("new"))
                .unwrap_or(false);
            if !rhs_is_new {
                found.push((whole.start(), whole.end(), "binding", name.as_str().to_string()));
            }
        }

        for (start, end, source, detail) in found {
            let mut attributes = BTreeMap::new();
            attributes.insert("source".to_string(), source.to_string());
            attributes.insert(if source == "new" { "expr" } else { "name" }.to_string(), detail);
            self.push(ConstructKind::MemoryAlloc, start, end, attributes);
        }
    }
}

enum Access {
    Read,
    Write(&'static str),
}
