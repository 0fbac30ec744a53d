//! Diagnostic types shared by every stage of the compiler core: spans,
//! severity levels, a structured `Diagnostic`, and the `DiagnosticEngine`
//! that collects them for a module and renders the final report.
//!
//! Rendering deliberately stays close to `file:line:col: message` (see
//! `Diagnostic::format`) rather than a source-snippet-and-underline style:
//! turning that text into a formatted terminal report is a job for the
//! caller, not this crate.

use colored::Colorize;
use std::fmt;
use std::path::Path;

pub mod span_map;
pub use span_map::SpanMap;

/// Source code location (line, column, file).
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Span {
    pub fn new(file: String, line: usize, column: usize, length: usize) -> Self {
        Self {
            file,
            line,
            column,
            length,
        }
    }

    pub fn from_file_and_span(file: &str, source: &str, span: std::ops::Range<usize>) -> Self {
        let before = &source[..span.start];
        let line = before.chars().filter(|&c| c == '\n').count() + 1;
        let column = before
            .rfind('\n')
            .map_or(before.len() + 1, |pos| before.len() - pos);
        let length = span.end.saturating_sub(span.start).max(1);

        Self {
            file: file.to_string(),
            line,
            column,
            length,
        }
    }

    pub fn unknown() -> Self {
        Self {
            file: "<unknown>".to_string(),
            line: 0,
            column: 0,
            length: 0,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self {
            file: path.display().to_string(),
            line: 0,
            column: 0,
            length: 0,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Severity of a reported diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Error,
    Warning,
    Info,
    Note,
    Help,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorLevel::Error => write!(f, "{}", "error".red().bold()),
            ErrorLevel::Warning => write!(f, "{}", "warning".yellow().bold()),
            ErrorLevel::Info => write!(f, "{}", "info".blue().bold()),
            ErrorLevel::Note => write!(f, "{}", "note".cyan().bold()),
            ErrorLevel::Help => write!(f, "{}", "help".green().bold()),
        }
    }
}

/// One reported problem: a `(token, message)` pair in spec terms, enriched
/// with a stable code, severity, and optional notes/help text.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: ErrorLevel,
    pub code: String,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(level: ErrorLevel, code: &str, message: String, span: Span) -> Self {
        Self {
            level,
            code: code.to_string(),
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn error(code: &str, message: String, span: Span) -> Self {
        Self::new(ErrorLevel::Error, code, message, span)
    }

    pub fn warning(code: &str, message: String, span: Span) -> Self {
        Self::new(ErrorLevel::Warning, code, message, span)
    }

    pub fn info(code: &str, message: String, span: Span) -> Self {
        Self::new(ErrorLevel::Info, code, message, span)
    }

    pub fn note(message: String, span: Span) -> Self {
        Self::new(ErrorLevel::Note, "", message, span)
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render as `file:line:col: message`, one line per note/help entry.
    /// The engine concatenates these and appends `found N errors`.
    pub fn format_plain(&self) -> String {
        let mut out = format!("{}: {} [{}]", self.span, self.message, self.code);
        for note in &self.notes {
            out.push('\n');
            out.push_str(&format!("  = note: {}", note));
        }
        if let Some(help) = &self.help {
            out.push('\n');
            out.push_str(&format!("  = help: {}", help));
        }
        out
    }

    /// Same content as `format_plain` with ANSI coloring for a terminal.
    pub fn format_colored(&self) -> String {
        let mut out = format!(
            "{} {}: {} {}",
            self.span.to_string().bold(),
            self.level,
            self.message,
            format!("[{}]", self.code).dimmed()
        );
        for note in &self.notes {
            out.push('\n');
            out.push_str(&format!("  {} {}", "=".cyan().bold(), note.cyan()));
        }
        if let Some(help) = &self.help {
            out.push('\n');
            out.push_str(&format!("  {} {}", "help:".green().bold(), help));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.format_plain())
    }
}

/// Collects diagnostics for one module compile and renders the final
/// report. Mirrors the per-module error sink the Global/Code Context owns:
/// every semantic check appends here instead of raising an exception.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
    info_count: usize,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, diagnostic: Diagnostic) {
        match diagnostic.level {
            ErrorLevel::Error => self.error_count += 1,
            ErrorLevel::Warning => self.warning_count += 1,
            ErrorLevel::Info => self.info_count += 1,
            _ => {}
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn emit_error(&mut self, code: &str, message: String, span: Span) {
        self.emit(Diagnostic::error(code, message, span));
    }

    pub fn emit_warning(&mut self, code: &str, message: String, span: Span) {
        self.emit(Diagnostic::warning(code, message, span));
    }

    pub fn emit_info(&mut self, code: &str, message: String, span: Span) {
        self.emit(Diagnostic::info(code, message, span));
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn info_count(&self) -> usize {
        self.info_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Exit code a driver should return after a compile: 0 clean, 2 with
    /// any error-level diagnostic (the CLI collaborator's `1` is reserved
    /// for its own parse/IO failures, never produced here).
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() {
            2
        } else {
            0
        }
    }

    /// `file:line:col: message` per diagnostic, newline separated, followed
    /// by a `found N errors` summary line.
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        for diag in &self.diagnostics {
            out.push_str(&diag.format_plain());
            out.push('\n');
        }
        if self.error_count > 0 {
            out.push_str(&format!(
                "found {} error{}\n",
                self.error_count,
                if self.error_count == 1 { "" } else { "s" }
            ));
        }
        out
    }

    pub fn print_all(&self) {
        for diag in &self.diagnostics {
            eprintln!("{}", diag.format_colored());
        }
    }

    pub fn print_summary(&self) {
        if self.error_count > 0 {
            eprintln!(
                "\n{}: {} error{} emitted",
                "error".red().bold(),
                self.error_count,
                if self.error_count == 1 { "" } else { "s" }
            );
        }
        if self.warning_count > 0 {
            eprintln!(
                "{}: {} warning{} emitted",
                "warning".yellow().bold(),
                self.warning_count,
                if self.warning_count == 1 { "" } else { "s" }
            );
        }
        if self.info_count > 0 {
            eprintln!(
                "{}: {} info message{} emitted",
                "info".blue().bold(),
                self.info_count,
                if self.info_count == 1 { "" } else { "s" }
            );
        }
    }

    /// Export diagnostics as JSON, for a caller that wants to feed an IDE
    /// or LSP-like consumer rather than a terminal.
    pub fn to_json(&self) -> String {
        let mut json = String::from("{\"diagnostics\":[");

        for (i, diag) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                json.push(',');
            }

            let level_str = match diag.level {
                ErrorLevel::Error => "error",
                ErrorLevel::Warning => "warning",
                ErrorLevel::Info => "info",
                ErrorLevel::Note => "note",
                ErrorLevel::Help => "help",
            };

            json.push_str(&format!(
                "{{\"level\":\"{}\",\"code\":\"{}\",\"message\":\"{}\",\"file\":\"{}\",\"line\":{},\"column\":{},\"length\":{}",
                level_str,
                diag.code,
                diag.message.replace('"', "\\\""),
                diag.span.file,
                diag.span.line,
                diag.span.column,
                diag.span.length
            ));

            if !diag.notes.is_empty() {
                json.push_str(",\"notes\":[");
                for (j, note) in diag.notes.iter().enumerate() {
                    if j > 0 {
                        json.push(',');
                    }
                    json.push_str(&format!("\"{}\"", note.replace('"', "\\\"")));
                }
                json.push(']');
            }

            if let Some(help) = &diag.help {
                json.push_str(&format!(",\"help\":\"{}\"", help.replace('"', "\\\"")));
            }

            json.push('}');
        }

        json.push_str("]}");
        json
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
        self.error_count = 0;
        self.warning_count = 0;
        self.info_count = 0;
    }
}

/// Diagnostic-construction helpers for each error category, so call sites
/// pass structured arguments instead of building message strings inline at
/// every use.
impl DiagnosticEngine {
    pub fn duplicate_name(&mut self, name: &str, span: Span) {
        self.emit(Diagnostic::error(
            error_codes::DUPLICATE_DEFINITION,
            format!("`{}` is already declared in this scope", name),
            span,
        ));
    }

    pub fn type_mismatch(&mut self, expected: &str, found: &str, span: Span) {
        self.emit(
            Diagnostic::error(
                error_codes::TYPE_MISMATCH,
                "mismatched types".to_string(),
                span.clone(),
            )
            .with_note(format!("expected `{}`, found `{}`", expected, found)),
        );
    }

    pub fn undefined_variable(&mut self, name: &str, span: Span, suggestions: &[String]) {
        let mut diag = Diagnostic::error(
            error_codes::UNDEFINED_VARIABLE,
            format!("cannot find value `{}` in this scope", name),
            span,
        );
        if !suggestions.is_empty() {
            diag = diag.with_help(format!("did you mean `{}`?", suggestions.join("`, `")));
        }
        self.emit(diag);
    }

    pub fn argument_count_mismatch(
        &mut self,
        fn_name: &str,
        expected: usize,
        found: usize,
        span: Span,
    ) {
        self.emit(
            Diagnostic::error(
                error_codes::ARGUMENT_COUNT,
                format!(
                    "this function takes {} argument{} but {} {} supplied",
                    expected,
                    if expected == 1 { "" } else { "s" },
                    found,
                    if found == 1 { "was" } else { "were" }
                ),
                span,
            )
            .with_note(format!("function `{}` defined here", fn_name)),
        );
    }

    pub fn ambiguous_overload(&mut self, fn_name: &str, candidates: &[String], span: Span) {
        self.emit(
            Diagnostic::error(
                error_codes::AMBIGUOUS_OVERLOAD,
                format!("call to `{}` is ambiguous", fn_name),
                span,
            )
            .with_note(format!("candidates: {}", candidates.join(", "))),
        );
    }
}

/// Stable string codes, grouped by category, so tests can match on code
/// rather than message text.
pub mod error_codes {
    // Declaration errors
    pub const DUPLICATE_DEFINITION: &str = "E0100";
    pub const TYPE_ALREADY_DECLARED: &str = "E0101";
    pub const AMBIGUOUS_NAME: &str = "E0102";
    pub const MISSING_DECLARATION: &str = "E0103";

    // Type errors
    pub const TYPE_MISMATCH: &str = "E0200";
    pub const UNSIZED_TYPE: &str = "E0201";
    pub const INVALID_ARRAY_SIZE: &str = "E0202";
    pub const INVALID_VEC_ELEMENT: &str = "E0203";
    pub const AUTO_REQUIRES_INIT: &str = "E0204";
    pub const REFERENCE_REQUIRES_INIT: &str = "E0205";
    pub const UNDEFINED_TYPE: &str = "E0206";

    // Cast errors
    pub const COMPOSITE_CAST: &str = "E0300";
    pub const POINTER_CAST_POLICY: &str = "E0301";
    pub const NON_POINTER_TO_POINTER: &str = "E0302";
    pub const VEC_SIZE_MISMATCH: &str = "E0303";

    // Overload errors
    pub const ARGUMENT_COUNT: &str = "E0400";
    pub const AMBIGUOUS_OVERLOAD: &str = "E0401";

    // Control flow errors
    pub const JUMP_OUTSIDE_LOOP: &str = "E0500";
    pub const BRANCH_LEVEL_OUT_OF_RANGE: &str = "E0501";
    pub const LABEL_REDEFINITION: &str = "E0502";
    pub const UNDEFINED_LABEL: &str = "E0503";
    pub const SWITCH_NON_INTEGER: &str = "E0504";
    pub const DUPLICATE_CASE: &str = "E0505";
    pub const MULTIPLE_DEFAULTS: &str = "E0506";

    // Class errors
    pub const NON_STATIC_IN_STATIC_CONTEXT: &str = "E0600";
    pub const NON_UNIQUE_OPERATOR_OVERLOAD: &str = "E0601";
    pub const MULTIPLE_DESTRUCTORS: &str = "E0602";

    // Template errors
    pub const TEMPLATE_ARG_COUNT: &str = "E0700";
    pub const TEMPLATE_ARGS_REQUIRED: &str = "E0701";
    pub const NOT_A_TEMPLATE: &str = "E0702";

    // Builtin / constant errors
    pub const NON_CONSTANT_GLOBAL_INIT: &str = "E0800";
    pub const CONST_WITHOUT_INIT: &str = "E0801";

    // Name resolution
    pub const UNDEFINED_VARIABLE: &str = "E0900";
    pub const UNDEFINED_FUNCTION: &str = "E0901";
    pub const NOT_AN_LVALUE: &str = "E0902";
    pub const NOT_A_POINTER: &str = "E0903";
    pub const NOT_A_MEMBER_CONTAINER: &str = "E0904";
    pub const UNDEFINED_MEMBER: &str = "E0905";
    pub const NOT_INDEXABLE: &str = "E0906";
    pub const NON_INTEGER_INDEX: &str = "E0907";

    // Warnings
    pub const UNUSED_VARIABLE: &str = "W0001";
    pub const UNUSED_FUNCTION: &str = "W0002";
    pub const DEAD_CODE: &str = "W0003";

    // Info
    pub const TYPE_INFERENCE: &str = "I0001";
    pub const TEMPLATE_INSTANTIATION: &str = "I0002";
}

/// "Did you mean?" fuzzy matching for undefined-name diagnostics.
pub mod fuzzy {
    use strsim::jaro_winkler;

    pub fn find_similar_names(
        target: &str,
        candidates: &[String],
        threshold: f64,
        max_suggestions: usize,
    ) -> Vec<String> {
        let mut scored: Vec<(String, f64)> = candidates
            .iter()
            .map(|candidate| (candidate.clone(), jaro_winkler(target, candidate)))
            .filter(|(_, score)| *score > threshold)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(max_suggestions)
            .map(|(name, _)| name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_format_is_file_line_col_message() {
        let span = Span::new("main.em".to_string(), 2, 21, 7);
        let diag = Diagnostic::error(
            error_codes::TYPE_MISMATCH,
            "mismatched types".to_string(),
            span,
        )
        .with_note("expected `i32`, found `string`".to_string());

        let formatted = diag.format_plain();
        assert!(formatted.starts_with("main.em:2:21: mismatched types"));
        assert!(formatted.contains("expected `i32`, found `string`"));
    }

    #[test]
    fn engine_reports_found_n_errors() {
        let mut engine = DiagnosticEngine::new();
        engine.emit_error("E0900", "cannot find value `x`".to_string(), Span::unknown());
        engine.emit_error("E0900", "cannot find value `y`".to_string(), Span::unknown());

        let rendered = engine.render_plain();
        assert!(rendered.contains("found 2 errors"));
        assert_eq!(engine.exit_code(), 2);
    }

    #[test]
    fn clean_engine_exits_zero() {
        let engine = DiagnosticEngine::new();
        assert_eq!(engine.exit_code(), 0);
        assert!(!engine.has_errors());
    }

    #[test]
    fn undefined_variable_suggestion_round_trips_into_json() {
        let mut engine = DiagnosticEngine::new();
        engine.undefined_variable(
            "fooo",
            Span::new("main.em".to_string(), 1, 1, 4),
            &["foo".to_string()],
        );
        let json = engine.to_json();
        assert!(json.contains("did you mean"));
    }

    #[test]
    fn fuzzy_matching_finds_close_name() {
        let candidates = vec!["foo".to_string(), "bar".to_string()];
        let hits = fuzzy::find_similar_names("fooo", &candidates, 0.7, 3);
        assert_eq!(hits, vec!["foo".to_string()]);
    }
}
