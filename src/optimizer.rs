// src/optimizer.rs
use crate::aggregator::estimated_iterations;
use crate::config::AnalyzerConfig;
use crate::scanner::{self, LineIndex, StateVariable};
use crate::types::*;
use regex::Regex;
use tracing::debug;

/// Heuristic per-call saving from skipping the public dispatcher's argument handling.
const EXTERNAL_DISPATCH_SAVING: u64 = 24;
/// Heuristic saving per iteration of `++i` over `i++`.
const PREFIX_INCREMENT_SAVING: u64 = 5;
const SLOT_BYTES: u64 = 32;

/// Everything a rule may inspect. Built once per detection pass.
pub struct RuleContext<'a> {
    pub constructs: &'a [DetectedConstruct],
    pub source: &'a str,
    pub config: &'a AnalyzerConfig,
    pub masked: String,
    pub index: LineIndex,
    pub state_variables: Vec<StateVariable>,
}

impl<'a> RuleContext<'a> {
    pub fn new(constructs: &'a [DetectedConstruct], source: &'a str, config: &'a AnalyzerConfig) -> Self {
        Self {
            constructs,
            source,
            config,
            masked: scanner::mask_comments_and_strings(source),
            index: LineIndex::new(source),
            state_variables: scanner::state_variables(source),
        }
    }

    pub fn of_kind(&self, kind: ConstructKind) -> impl Iterator<Item = &'a DetectedConstruct> {
        self.constructs.iter().filter(move |c| c.kind == kind)
    }

    /// Byte span `[start, end)` a construct covers in the source.
    pub fn span_of(&self, construct: &DetectedConstruct) -> Option<(usize, usize)> {
        let start = self.index.offset(construct.line, construct.column)?;
        let end = start.checked_add(construct.length)?;
        (end <= self.source.len()).then_some((start, end))
    }

    /// Leading whitespace of the line holding `offset`, if `offset` starts the line's code.
    fn indentation_at(&self, offset: usize) -> Option<&'a str> {
        let line_start = self.source.get(..offset)?.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let prefix = &self.source[line_start..offset];
        prefix.trim().is_empty().then_some(prefix)
    }

    fn suggestion_id(&self, rule: &str, offset: usize) -> String {
        let (line, column) = self.index.position(offset);
        format!("{}:{}:{}", rule, line, column)
    }

    fn word_in_source(&self, word: &str) -> bool {
        Regex::new(&format!(r"\b{}\b", regex::escape(word)))
            .map(|re| re.is_match(&self.masked))
            .unwrap_or(true)
    }
}

/// One declarative optimization check. Rules must not panic and must only
/// emit suggestions whose saving they can estimate as positive.
pub trait OptimizationRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn detect(&self, ctx: &RuleContext) -> Vec<OptimizationSuggestion>;
}

pub struct OptimizationEngine {
    rules: Vec<Box<dyn OptimizationRule>>,
}

impl Default for OptimizationEngine {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

impl OptimizationEngine {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_default_rules() -> Self {
        let mut engine = Self::empty();
        engine.register(Box::new(VisibilityRule));
        engine.register(Box::new(StoragePackingRule));
        engine.register(Box::new(LoopBoundCacheRule));
        engine.register(Box::new(PrefixIncrementRule));
        engine.register(Box::new(CalldataParamsRule));
        engine.register(Box::new(ConstantStateRule));
        engine
    }

    pub fn register(&mut self, rule: Box<dyn OptimizationRule>) {
        self.rules.push(rule);
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn detect(
        &self,
        constructs: &[DetectedConstruct],
        source: &str,
        config: &AnalyzerConfig,
    ) -> Vec<OptimizationSuggestion> {
        if source.trim().is_empty() {
            return Vec::new();
        }
        let ctx = RuleContext::new(constructs, source, config);

        let mut suggestions: Vec<OptimizationSuggestion> = Vec::new();
        for rule in &self.rules {
            let found = rule.detect(&ctx);
            debug!(rule = rule.id(), suggestions = found.len(), "rule evaluated");
            suggestions.extend(found.into_iter().filter(|s| s.savings > 0));
        }

        // Stable sort keeps registration order among suggestions at the same position
        suggestions.sort_by_key(|s| (s.range.start_line, s.range.start_column));
        suggestions
    }
}

static_regex!(public_word_regex, r"\bpublic\b");
static_regex!(memory_param_regex, r"\bmemory\s+(?P<name>[A-Za-z_]\w*)");
static_regex!(step_regex, r"^(?P<var>[A-Za-z_]\w*)\s*(?P<op>\+\+|--)$");
static_regex!(
    literal_regex,
    r#"^(?:-?\d[\d_]*(?:\.\d+)?(?:e\d+)?(?:\s+(?:wei|gwei|ether|seconds|minutes|hours|days|weeks))?|true|false|0x[0-9a-fA-F]+|"[^"]*"|'[^']*')$"#
);

// ---------------------------------------------------------------------------
// Visibility tightening
// ---------------------------------------------------------------------------

pub struct VisibilityRule;

impl VisibilityRule {
    /// True when `name(` appears as a bare call, not a declaration or member call.
    fn called_internally(ctx: &RuleContext, name: &str) -> bool {
        let Ok(re) = Regex::new(&format!(r"\b{}\s*\(", regex::escape(name))) else {
            return true;
        };
        let called = re.find_iter(&ctx.masked).any(|m| {
            match scanner::prev_non_ws(&ctx.masked, m.start()) {
                Some((_, b'.')) => false,
                Some((i, _)) => {
                    let before = &ctx.masked[..=i];
                    !(before.ends_with("function") || before.ends_with("emit") || before.ends_with("new"))
                }
                None => true,
            }
        });
        called
    }
}

impl OptimizationRule for VisibilityRule {
    fn id(&self) -> &'static str {
        "visibility"
    }

    fn detect(&self, ctx: &RuleContext) -> Vec<OptimizationSuggestion> {
        let mut suggestions = Vec::new();

        for decl in ctx.of_kind(ConstructKind::FunctionDecl) {
            let Some(name) = decl.attr("name") else { continue };
            if decl.attr("visibility") != Some("public")
                || decl.attr("inherited").is_some()
                || matches!(name, "constructor" | "fallback" | "receive")
                || Self::called_internally(ctx, name)
            {
                continue;
            }
            let Some((start, end)) = ctx.span_of(decl) else { continue };
            // The keyword is searched after the parameter list
            let Some(open) = ctx.masked[start..end].find('(').map(|i| start + i) else {
                continue;
            };
            let Some(params_end) = scanner::matching_close(&ctx.masked, open).filter(|close| *close < end) else {
                continue;
            };
            let Some(keyword) = public_word_regex().find(&ctx.masked[params_end..end]) else {
                continue;
            };
            let (kw_start, kw_end) = (params_end + keyword.start(), params_end + keyword.end());

            let before_code = ctx.source[start..end].to_string();
            let after_code = format!("{}external{}", &ctx.source[start..kw_start], &ctx.source[kw_end..end]);
            let copies_memory = decl.attr("params").is_some_and(|p| p.contains("memory"));

            suggestions.push(OptimizationSuggestion {
                id: ctx.suggestion_id(self.id(), start),
                title: format!("Declare `{}` as external", name),
                category: GasCategory::Call,
                difficulty: Difficulty::Easy,
                impact: if copies_memory { Impact::Medium } else { Impact::Low },
                before_code,
                after_code,
                range: ctx.index.range(start, end),
                savings: EXTERNAL_DISPATCH_SAVING,
                auto_fix_available: true,
            });
        }

        suggestions
    }
}

// ---------------------------------------------------------------------------
// Storage packing
// ---------------------------------------------------------------------------

pub struct StoragePackingRule;

impl StoragePackingRule {
    /// Bytes a value of `type_name` occupies in a storage slot.
    pub fn slot_size(type_name: &str) -> u64 {
        let ty = type_name.trim();
        if ty.contains('[') || ty.starts_with("mapping") {
            return SLOT_BYTES;
        }
        match ty {
            "bool" => return 1,
            "address" | "address payable" => return 20,
            "uint" | "int" | "bytes" | "string" => return SLOT_BYTES,
            _ => {}
        }
        if let Some(bits) = ty.strip_prefix("uint").or_else(|| ty.strip_prefix("int")) {
            if let Ok(bits) = bits.parse::<u64>() {
                return (bits / 8).clamp(1, SLOT_BYTES);
            }
        }
        if let Some(bytes) = ty.strip_prefix("bytes") {
            if let Ok(bytes) = bytes.parse::<u64>() {
                return bytes.clamp(1, SLOT_BYTES);
            }
        }
        SLOT_BYTES
    }

    /// Slots used when values are laid out in declaration order.
    pub fn slots_used(sizes: &[u64]) -> u64 {
        let mut slots = 0u64;
        let mut current: Option<u64> = None;
        for &size in sizes {
            if size >= SLOT_BYTES {
                if current.take().is_some() {
                    slots += 1;
                }
                slots += 1;
                continue;
            }
            current = match current {
                Some(used) if used + size <= SLOT_BYTES => Some(used + size),
                Some(_) => {
                    slots += 1;
                    Some(size)
                }
                None => Some(size),
            };
        }
        if current.is_some() {
            slots += 1;
        }
        slots
    }

    /// Full-slot values first, then small values grouped first-fit decreasing.
    fn packed_order<'v>(vars: &[&'v StateVariable]) -> Vec<&'v StateVariable> {
        let mut order: Vec<&StateVariable> = vars
            .iter()
            .copied()
            .filter(|v| Self::slot_size(&v.type_name) >= SLOT_BYTES)
            .collect();

        let mut small: Vec<&StateVariable> = vars
            .iter()
            .copied()
            .filter(|v| Self::slot_size(&v.type_name) < SLOT_BYTES)
            .collect();
        small.sort_by_key(|v| std::cmp::Reverse(Self::slot_size(&v.type_name)));

        let mut bins: Vec<(u64, Vec<&StateVariable>)> = Vec::new();
        for var in small {
            let size = Self::slot_size(&var.type_name);
            match bins.iter_mut().find(|(used, _)| used + size <= SLOT_BYTES) {
                Some((used, members)) => {
                    *used += size;
                    members.push(var);
                }
                None => bins.push((size, vec![var])),
            }
        }
        order.extend(bins.into_iter().flat_map(|(_, members)| members));
        order
    }

    /// Runs of storage declarations separated only by whitespace.
    fn blocks<'v>(ctx: &'v RuleContext) -> Vec<Vec<&'v StateVariable>> {
        let mut blocks: Vec<Vec<&StateVariable>> = Vec::new();
        let mut current: Vec<&StateVariable> = Vec::new();
        for var in &ctx.state_variables {
            let contiguous = current
                .last()
                .map(|prev| prev.end <= var.start && ctx.source[prev.end..var.start].trim().is_empty())
                .unwrap_or(true);
            if !var.is_storage() || !contiguous {
                if current.len() > 1 {
                    blocks.push(std::mem::take(&mut current));
                }
                current.clear();
            }
            if var.is_storage() {
                current.push(var);
            }
        }
        if current.len() > 1 {
            blocks.push(current);
        }
        blocks
    }
}

impl OptimizationRule for StoragePackingRule {
    fn id(&self) -> &'static str {
        "storage-packing"
    }

    fn detect(&self, ctx: &RuleContext) -> Vec<OptimizationSuggestion> {
        let mut suggestions = Vec::new();

        for block in Self::blocks(ctx) {
            let sizes: Vec<u64> = block.iter().map(|v| Self::slot_size(&v.type_name)).collect();
            if sizes.iter().filter(|s| **s < SLOT_BYTES).count() < 2 {
                continue;
            }
            let current_slots = Self::slots_used(&sizes);
            let order = Self::packed_order(&block);
            let packed_sizes: Vec<u64> = order.iter().map(|v| Self::slot_size(&v.type_name)).collect();
            let packed_slots = Self::slots_used(&packed_sizes);
            if packed_slots >= current_slots {
                continue;
            }

            let (first, last) = (block[0], block[block.len() - 1]);
            let indent = ctx.indentation_at(first.start).unwrap_or("");
            let after_code = order
                .iter()
                .map(|v| ctx.source[v.start..v.end].trim())
                .collect::<Vec<_>>()
                .join(&format!("\n{}", indent));
            let saved_slots = current_slots - packed_slots;

            suggestions.push(OptimizationSuggestion {
                id: ctx.suggestion_id(self.id(), first.start),
                title: format!(
                    "Reorder {} state variables to use {} storage slots instead of {}",
                    block.len(),
                    packed_slots,
                    current_slots
                ),
                category: GasCategory::Storage,
                difficulty: Difficulty::Medium,
                impact: if saved_slots >= 2 { Impact::High } else { Impact::Medium },
                before_code: ctx.source[first.start..last.end].to_string(),
                after_code,
                range: ctx.index.range(first.start, last.end),
                savings: saved_slots.saturating_mul(ctx.config.cost_model.sstore_set),
                auto_fix_available: false,
            });
        }

        suggestions
    }
}

// ---------------------------------------------------------------------------
// Loop-bound caching
// ---------------------------------------------------------------------------

pub struct LoopBoundCacheRule;

impl LoopBoundCacheRule {
    fn local_name(expr_segments: &[&str]) -> String {
        match expr_segments {
            [single] => {
                let mut chars = single.chars();
                match chars.next() {
                    Some(c) => format!("cached{}{}", c.to_ascii_uppercase(), chars.as_str()),
                    None => "cached".to_string(),
                }
            }
            [head, rest @ ..] => {
                let mut name = head.to_string();
                for seg in rest {
                    let mut chars = seg.chars();
                    if let Some(c) = chars.next() {
                        name.push(c.to_ascii_uppercase());
                        name.push_str(chars.as_str());
                    }
                }
                name
            }
            [] => "cached".to_string(),
        }
    }

    /// Byte range of the condition inside a loop header, relative to the header.
    fn condition_span(masked_header: &str, keyword: &str) -> Option<(usize, usize)> {
        let open = masked_header.find('(')?;
        let close = masked_header.rfind(')')?;
        if keyword != "for" {
            return Some((open + 1, close));
        }
        let mut semis = masked_header[open..close]
            .match_indices(';')
            .map(|(i, _)| open + i);
        let first = semis.next()?;
        let second = semis.next()?;
        Some((first + 1, second))
    }
}

impl OptimizationRule for LoopBoundCacheRule {
    fn id(&self) -> &'static str {
        "loop-bound-cache"
    }

    fn detect(&self, ctx: &RuleContext) -> Vec<OptimizationSuggestion> {
        let mut suggestions = Vec::new();
        let sload = ctx.config.cost_model.sload;

        for lp in ctx.of_kind(ConstructKind::Loop) {
            let bound = lp.attr("bound").unwrap_or("");
            let keyword = lp.attr("keyword").unwrap_or("for");
            if bound.is_empty() {
                continue;
            }
            let Some((start, end)) = ctx.span_of(lp) else { continue };
            // Hoisting above a loop that shares its line (`if (x) for ..`) would change control flow
            let Some(indent) = ctx.indentation_at(start) else { continue };
            let end_line = lp.attr_usize("end_line").unwrap_or(lp.line);

            // A storage read inside this header whose variable shows up in the bound
            let Some(name) = ctx
                .of_kind(ConstructKind::StorageRead)
                .filter(|r| ctx.span_of(r).is_some_and(|(s, _)| s >= start && s < end))
                .filter_map(|r| r.attr("name"))
                .find(|name| {
                    Regex::new(&format!(r"\b{}\b", regex::escape(name)))
                        .map(|re| re.is_match(bound))
                        .unwrap_or(false)
                })
            else {
                continue;
            };

            // Hoisting is only sound if the loop never writes the variable
            let written_in_loop = ctx
                .of_kind(ConstructKind::StorageWrite)
                .any(|w| w.attr("name") == Some(name) && w.line >= lp.line && w.line <= end_line);
            if written_in_loop {
                continue;
            }

            let Ok(expr_re) = Regex::new(&format!(r"\b{}\b(?:\s*\.\s*[A-Za-z_]\w*)*", regex::escape(name))) else {
                continue;
            };
            let Some(expr) = expr_re.find(bound) else { continue };
            let trailing = bound[expr.end()..].trim_start();
            if trailing.starts_with('[') || trailing.starts_with('(') {
                continue;
            }
            let segments: Vec<&str> = expr.as_str().split('.').map(str::trim).collect();
            let local = Self::local_name(&segments);
            let expr_text = segments.join(".");
            if ctx.word_in_source(&local) {
                continue;
            }

            let local_type = if segments.last() == Some(&"length") {
                "uint256".to_string()
            } else {
                match ctx.state_variables.iter().find(|v| v.name == name) {
                    Some(var)
                        if segments.len() == 1
                            && !var.type_name.contains('[')
                            && !var.type_name.starts_with("mapping")
                            && !matches!(var.type_name.as_str(), "string" | "bytes") =>
                    {
                        var.type_name.clone()
                    }
                    _ => continue,
                }
            };

            let Some((cond_start, cond_end)) = Self::condition_span(&ctx.masked[start..end], keyword) else {
                continue;
            };
            let header = &ctx.source[start..end];
            let condition = expr_re.replace_all(&header[cond_start..cond_end], local.as_str());
            let new_header = format!("{}{}{}", &header[..cond_start], condition, &header[cond_end..]);

            let iterations = estimated_iterations(lp, ctx.config);
            let savings = iterations.saturating_sub(1).saturating_mul(sload);
            if savings == 0 {
                continue;
            }

            suggestions.push(OptimizationSuggestion {
                id: ctx.suggestion_id(self.id(), start),
                title: format!("Cache `{}` in a local before the loop", expr_text),
                category: GasCategory::Computation,
                difficulty: Difficulty::Easy,
                impact: if savings >= 10_000 { Impact::High } else { Impact::Medium },
                before_code: header.to_string(),
                after_code: format!("{} {} = {};\n{}{}", local_type, local, expr_text, indent, new_header),
                range: ctx.index.range(start, end),
                savings,
                auto_fix_available: true,
            });
        }

        suggestions
    }
}

// ---------------------------------------------------------------------------
// Prefix increment in loop steps
// ---------------------------------------------------------------------------

pub struct PrefixIncrementRule;

impl OptimizationRule for PrefixIncrementRule {
    fn id(&self) -> &'static str {
        "prefix-increment"
    }

    fn detect(&self, ctx: &RuleContext) -> Vec<OptimizationSuggestion> {
        let mut suggestions = Vec::new();

        for lp in ctx.of_kind(ConstructKind::Loop) {
            if lp.attr("keyword") != Some("for") {
                continue;
            }
            let Some(caps) = lp.attr("step").and_then(|s| step_regex().captures(s)) else {
                continue;
            };
            let (Some(var), Some(op)) = (caps.name("var"), caps.name("op")) else {
                continue;
            };
            let Some((start, end)) = ctx.span_of(lp) else { continue };

            // The step sits between the last top-level `;` and the closing paren
            let masked_header = &ctx.masked[start..end];
            let (Some(semi), Some(close)) = (masked_header.rfind(';'), masked_header.rfind(')')) else {
                continue;
            };
            if semi >= close {
                continue;
            }
            let raw = &ctx.source[start + semi + 1..start + close];
            let lead = raw.len() - raw.trim_start().len();
            let step_start = start + semi + 1 + lead;
            let step_end = step_start + raw.trim().len();

            let iterations = estimated_iterations(lp, ctx.config);
            suggestions.push(OptimizationSuggestion {
                id: ctx.suggestion_id(self.id(), step_start),
                title: format!("Use prefix `{}{}` in the loop step", op.as_str(), var.as_str()),
                category: GasCategory::Computation,
                difficulty: Difficulty::Easy,
                impact: Impact::Low,
                before_code: ctx.source[step_start..step_end].to_string(),
                after_code: format!("{}{}", op.as_str(), var.as_str()),
                range: ctx.index.range(step_start, step_end),
                savings: PREFIX_INCREMENT_SAVING.saturating_mul(iterations),
                auto_fix_available: true,
            });
        }

        suggestions
    }
}

// ---------------------------------------------------------------------------
// calldata for read-only external parameters
// ---------------------------------------------------------------------------

pub struct CalldataParamsRule;

impl CalldataParamsRule {
    fn assigned_in(body: &str, param: &str) -> bool {
        let pattern = format!(
            r"\b{}\b\s*(?:\[[^\]]*\]\s*)*(?:=[^=]|\+=|-=|\*=|/=|\.\s*push|\.\s*pop)",
            regex::escape(param)
        );
        Regex::new(&pattern).map(|re| re.is_match(body)).unwrap_or(true)
    }
}

impl OptimizationRule for CalldataParamsRule {
    fn id(&self) -> &'static str {
        "calldata-params"
    }

    fn detect(&self, ctx: &RuleContext) -> Vec<OptimizationSuggestion> {
        let mut suggestions = Vec::new();
        let unit = ctx.config.cost_model.memory_alloc;

        for decl in ctx.of_kind(ConstructKind::FunctionDecl) {
            if decl.attr("visibility") != Some("external") || decl.attr("has_body") != Some("true") {
                continue;
            }
            let Some((start, end)) = ctx.span_of(decl) else { continue };
            let Some(open) = ctx.masked[start..end].find('(').map(|i| start + i) else {
                continue;
            };
            let Some(close) = scanner::matching_close(&ctx.masked, open) else {
                continue;
            };

            // Body runs from the header to the end of the function's last line
            let body_end = decl
                .attr_usize("end_line")
                .and_then(|l| ctx.index.offset(l + 1, 1))
                .unwrap_or(ctx.source.len());
            let body = &ctx.masked[end.min(body_end)..body_end];

            let params = &ctx.masked[open + 1..close];
            let convertible: Vec<usize> = memory_param_regex()
                .captures_iter(params)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    let name = caps.name("name")?.as_str();
                    (!Self::assigned_in(body, name)).then_some(open + 1 + whole.start())
                })
                .collect();
            if convertible.is_empty() {
                continue;
            }

            // Rewrite each `memory` keyword in place, keeping everything else
            let mut after_code = String::new();
            let mut cursor = open + 1;
            for kw_start in &convertible {
                after_code.push_str(&ctx.source[cursor..*kw_start]);
                after_code.push_str("calldata");
                cursor = kw_start + "memory".len();
            }
            after_code.push_str(&ctx.source[cursor..close]);

            let name = decl.attr("name").unwrap_or("function");
            suggestions.push(OptimizationSuggestion {
                id: ctx.suggestion_id(self.id(), open + 1),
                title: format!("Read `{}` parameters from calldata", name),
                category: GasCategory::Memory,
                difficulty: Difficulty::Easy,
                impact: if convertible.len() >= 3 { Impact::Medium } else { Impact::Low },
                before_code: ctx.source[open + 1..close].to_string(),
                after_code,
                range: ctx.index.range(open + 1, close),
                savings: unit.saturating_mul(convertible.len() as u64),
                auto_fix_available: true,
            });
        }

        suggestions
    }
}

// ---------------------------------------------------------------------------
// constant for never-written literals
// ---------------------------------------------------------------------------

pub struct ConstantStateRule;

impl OptimizationRule for ConstantStateRule {
    fn id(&self) -> &'static str {
        "constant-state"
    }

    fn detect(&self, ctx: &RuleContext) -> Vec<OptimizationSuggestion> {
        let mut suggestions = Vec::new();
        let model = &ctx.config.cost_model;

        for var in ctx.state_variables.iter().filter(|v| v.is_storage()) {
            let Some(init) = var.initializer.as_deref() else { continue };
            if !literal_regex().is_match(init)
                || var.type_name.contains('[')
                || var.type_name.starts_with("mapping")
            {
                continue;
            }
            let written = ctx
                .of_kind(ConstructKind::StorageWrite)
                .any(|w| w.attr("name") == Some(var.name.as_str()) && w.attr("access") != Some("init"));
            if written {
                continue;
            }
            let reads = ctx
                .of_kind(ConstructKind::StorageRead)
                .filter(|r| r.attr("name") == Some(var.name.as_str()))
                .count() as u64;

            let after_code = format!(
                "{}constant {}",
                &ctx.source[var.start..var.name_offset],
                &ctx.source[var.name_offset..var.end]
            );
            suggestions.push(OptimizationSuggestion {
                id: ctx.suggestion_id(self.id(), var.start),
                title: format!("Declare never-written `{}` as constant", var.name),
                category: GasCategory::Storage,
                difficulty: Difficulty::Easy,
                impact: if reads > 0 { Impact::High } else { Impact::Medium },
                before_code: ctx.source[var.start..var.end].to_string(),
                after_code,
                range: ctx.index.range(var.start, var.end),
                savings: model
                    .sstore_set
                    .saturating_add(reads.saturating_mul(model.sload)),
                auto_fix_available: true,
            });
        }

        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{ConstructScanner, PatternScanner};

    fn detect(source: &str) -> Vec<OptimizationSuggestion> {
        let config = AnalyzerConfig::default();
        let constructs = PatternScanner.scan(source);
        OptimizationEngine::with_default_rules().detect(&constructs, source, &config)
    }

    fn by_rule<'s>(suggestions: &'s [OptimizationSuggestion], rule: &str) -> Vec<&'s OptimizationSuggestion> {
        suggestions
            .iter()
            .filter(|s| s.id.starts_with(&format!("{}:", rule)))
            .collect()
    }

    #[test]
    fn test_visibility_for_uncalled_public_pure() {
        let source = "contract M {\n    function add(uint256 a, uint256 b) public pure returns (uint256) {\n        return a + b;\n    }\n}\n";
        let suggestions = detect(source);
        let found = by_rule(&suggestions, "visibility");
        assert_eq!(found.len(), 1);
        assert!(found[0].auto_fix_available);
        assert_eq!(found[0].difficulty, Difficulty::Easy);
        assert_eq!(
            found[0].after_code,
            "function add(uint256 a, uint256 b) external pure returns (uint256)"
        );
        assert_eq!(found[0].range.start_line, 2);
    }

    #[test]
    fn test_visibility_skipped_when_called_internally() {
        let source = "contract M {\n    function helper() public pure returns (uint256) {\n        return 1;\n    }\n    function run() external pure returns (uint256) {\n        return helper();\n    }\n}\n";
        assert!(by_rule(&detect(source), "visibility").is_empty());
    }

    #[test]
    fn test_visibility_with_nested_parameter_parens() {
        let source = "contract M {\n    function run(function (uint256) external returns (uint256) cb) public returns (uint256) {\n        return cb(1);\n    }\n}\n";
        let suggestions = detect(source);
        let found = by_rule(&suggestions, "visibility");
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].after_code,
            "function run(function (uint256) external returns (uint256) cb) external returns (uint256)"
        );
    }

    #[test]
    fn test_slot_sizes() {
        assert_eq!(StoragePackingRule::slot_size("uint128"), 16);
        assert_eq!(StoragePackingRule::slot_size("bool"), 1);
        assert_eq!(StoragePackingRule::slot_size("address"), 20);
        assert_eq!(StoragePackingRule::slot_size("bytes4"), 4);
        assert_eq!(StoragePackingRule::slot_size("uint256"), 32);
        assert_eq!(StoragePackingRule::slot_size("mapping(address => uint8)"), 32);
        assert_eq!(StoragePackingRule::slot_size("uint8[]"), 32);
        assert_eq!(StoragePackingRule::slots_used(&[16, 32, 16]), 3);
        assert_eq!(StoragePackingRule::slots_used(&[16, 16, 32]), 2);
    }

    #[test]
    fn test_storage_packing_groups_small_values() {
        let source = "contract P {\n    uint128 a;\n    uint256 b;\n    uint128 c;\n\n    function f() external {}\n}\n";
        let suggestions = detect(source);
        let found = by_rule(&suggestions, "storage-packing");
        assert_eq!(found.len(), 1);
        let s = found[0];
        assert_eq!(s.difficulty, Difficulty::Medium);
        assert_eq!(s.category, GasCategory::Storage);
        assert!(!s.auto_fix_available);
        assert_eq!(s.savings, 20000);
        assert_eq!(s.before_code, "uint128 a;\n    uint256 b;\n    uint128 c;");
        assert_eq!(s.after_code, "uint256 b;\n    uint128 a;\n    uint128 c;");
    }

    #[test]
    fn test_already_packed_is_left_alone() {
        let source = "contract P {\n    uint128 a;\n    uint128 c;\n    uint256 b;\n}\n";
        assert!(by_rule(&detect(source), "storage-packing").is_empty());
    }

    #[test]
    fn test_loop_bound_caching() {
        let source = "contract L {\n    uint256[] items;\n    function sum() external view returns (uint256 t) {\n        for (uint256 i = 0; i < items.length; i++) {\n            t += i;\n        }\n    }\n}\n";
        let suggestions = detect(source);
        let found = by_rule(&suggestions, "loop-bound-cache");
        assert_eq!(found.len(), 1);
        let s = found[0];
        assert!(s.savings > 0);
        assert_eq!(s.savings, 9 * 2100);
        assert_eq!(s.category, GasCategory::Computation);
        assert!(s.auto_fix_available);
        assert_eq!(s.before_code, "for (uint256 i = 0; i < items.length; i++)");
        assert_eq!(
            s.after_code,
            "uint256 itemsLength = items.length;\n        for (uint256 i = 0; i < itemsLength; i++)"
        );
    }

    #[test]
    fn test_loop_bound_not_cached_when_loop_writes_it() {
        let source = "contract L {\n    uint256[] items;\n    function grow() external {\n        for (uint256 i = 0; i < items.length; i++) {\n            items.push(i);\n        }\n    }\n}\n";
        assert!(by_rule(&detect(source), "loop-bound-cache").is_empty());
    }

    #[test]
    fn test_loop_bound_not_cached_when_loop_shares_its_line() {
        let source = "contract L {\n    uint256[] items;\n    function sum(bool x) external view returns (uint256 t) {\n        if (x) for (uint256 i = 0; i < items.length; i++) t += i;\n    }\n}\n";
        assert!(by_rule(&detect(source), "loop-bound-cache").is_empty());
    }

    #[test]
    fn test_prefix_increment() {
        let source = "contract L {\n    function f() external pure {\n        for (uint256 i = 0; i < 4; i++) {}\n    }\n}\n";
        let suggestions = detect(source);
        let found = by_rule(&suggestions, "prefix-increment");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].before_code, "i++");
        assert_eq!(found[0].after_code, "++i");
        assert_eq!(found[0].savings, 20);
    }

    #[test]
    fn test_calldata_params() {
        let source = "contract C {\n    function f(string memory label, uint256[] memory ids) external pure returns (uint256) {\n        ids[0] = 1;\n        return bytes(label).length;\n    }\n}\n";
        let suggestions = detect(source);
        let found = by_rule(&suggestions, "calldata-params");
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].after_code,
            "string calldata label, uint256[] memory ids"
        );
        assert_eq!(found[0].savings, 96);
    }

    #[test]
    fn test_constant_state() {
        let source = "contract K {\n    uint256 public fee = 100;\n    function quote() external view returns (uint256) {\n        return fee * 2;\n    }\n}\n";
        let suggestions = detect(source);
        let found = by_rule(&suggestions, "constant-state");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].after_code, "uint256 public constant fee = 100;");
        assert_eq!(found[0].savings, 20000 + 2100);
        assert_eq!(found[0].impact, Impact::High);
    }

    #[test]
    fn test_constant_state_skips_variable_written_in_modifier() {
        let source = "contract G {\n    bool private locked = false;\n    modifier nonReentrant() {\n        require(!locked);\n        locked = true;\n        _;\n        locked = false;\n    }\n    function f() external nonReentrant {}\n}\n";
        assert!(by_rule(&detect(source), "constant-state").is_empty());
    }

    #[test]
    fn test_suggestions_are_in_source_order() {
        let source = "contract K {\n    uint256 public fee = 100;\n    uint8 a;\n    uint256 b;\n    uint8 c;\n    function add(uint256 x) public pure returns (uint256) {\n        return x;\n    }\n}\n";
        let suggestions = detect(source);
        assert!(suggestions.len() >= 2);
        assert!(suggestions
            .windows(2)
            .all(|w| (w[0].range.start_line, w[0].range.start_column) <= (w[1].range.start_line, w[1].range.start_column)));
    }

    struct FixedRule(u64);

    impl OptimizationRule for FixedRule {
        fn id(&self) -> &'static str {
            "fixed"
        }

        fn detect(&self, ctx: &RuleContext) -> Vec<OptimizationSuggestion> {
            vec![OptimizationSuggestion {
                id: ctx.suggestion_id(self.id(), 0),
                title: "fixed".to_string(),
                category: GasCategory::Computation,
                difficulty: Difficulty::Hard,
                impact: Impact::Low,
                before_code: String::new(),
                after_code: String::new(),
                range: ctx.index.range(0, 0),
                savings: self.0,
                auto_fix_available: false,
            }]
        }
    }

    #[test]
    fn test_custom_rules_and_zero_savings_filter() {
        let mut engine = OptimizationEngine::empty();
        engine.register(Box::new(FixedRule(0)));
        engine.register(Box::new(FixedRule(3)));
        assert_eq!(engine.rule_ids(), vec!["fixed", "fixed"]);

        let found = engine.detect(&[], "contract A {}", &AnalyzerConfig::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].savings, 3);
        assert_eq!(found[0].id, "fixed:1:1");
    }

    #[test]
    fn test_empty_source_has_no_suggestions() {
        assert!(detect("").is_empty());
    }
}
