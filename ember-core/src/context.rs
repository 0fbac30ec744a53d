//! Global and per-function context (§3 "Code Context").
//!
//! `GlobalContext` lives for the whole module: the Type Manager, the symbol
//! tables, the diagnostic sink, the import tracker, the attribute arena, and
//! the function-overload registry. `CodeContext` lives for one function body
//! at a time: the current block, the `break`/`continue`/`redo` target stack,
//! the label map, and which function/class/`this`-type is in scope. Template
//! instantiation clones a `FunctionContext`-sized slice of state into a fresh
//! child and re-runs the Statement Visitor against it (§4.13); nothing here
//! assumes there is only ever one `CodeContext` alive per `GlobalContext`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ember_ast::{Attribute, ClassDecl, StructDecl, Token};
use ember_diagnostics::DiagnosticEngine;

use crate::backend::Backend;
use crate::config::CoreOptions;
use crate::symtab::SymbolTable;
use crate::types::{SType, TypeManager};
use crate::value::SFunction;

/// A template's AST, stored by its un-parameterized name at declaration time
/// (§4.13) so the Builder's instantiation callback can clone and bind it
/// against a reference site's arguments without re-parsing anything.
#[derive(Debug, Clone)]
pub enum TemplateDecl {
    Struct(StructDecl),
    Class(ClassDecl),
}

/// Canonicalized set of already-loaded files plus the three lines the
/// (excluded) CLI's `--imports` flag would print: `P:key[=val]` for package
/// keys, `i:file` for file imports, `I:pkg` for package imports.
#[derive(Default)]
pub struct ImportTracker {
    loaded: HashSet<PathBuf>,
    package_key_lines: Vec<String>,
    import_file_lines: Vec<String>,
    package_import_lines: Vec<String>,
}

impl ImportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `path` as loaded; returns `false` if it was already loaded
    /// (the caller should skip re-processing the file, per §6).
    pub fn mark_loaded(&mut self, path: &Path) -> bool {
        self.loaded.insert(path.to_path_buf())
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        self.loaded.contains(path)
    }

    pub fn record_package_key(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(v) => self.package_key_lines.push(format!("P:{}={}", key, v)),
            None => self.package_key_lines.push(format!("P:{}", key)),
        }
    }

    pub fn record_import_file(&mut self, file: &str) {
        self.import_file_lines.push(format!("i:{}", file));
    }

    pub fn record_package_import(&mut self, pkg: &str) {
        self.package_import_lines.push(format!("I:{}", pkg));
    }

    /// All recorded lines in the order a `--imports` dump expects: package
    /// keys, then file imports, then package imports.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(
            self.package_key_lines.len() + self.import_file_lines.len() + self.package_import_lines.len(),
        );
        out.extend(self.package_key_lines.iter().cloned());
        out.extend(self.import_file_lines.iter().cloned());
        out.extend(self.package_import_lines.iter().cloned());
        out
    }
}

/// Opaque handle into an `AttributeArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSetId(usize);

/// Owns every declaration's parsed attribute list for the module's lifetime,
/// matching the original's `GlobalContext::attrs` arena.
#[derive(Default)]
pub struct AttributeArena {
    entries: Vec<Vec<Attribute>>,
}

impl AttributeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, attrs: Vec<Attribute>) -> AttributeSetId {
        self.entries.push(attrs);
        AttributeSetId(self.entries.len() - 1)
    }

    pub fn get(&self, id: AttributeSetId) -> &[Attribute] {
        &self.entries[id.0]
    }
}

/// Module-wide state shared by every function the Statement Visitor
/// processes: the type system, the symbol stack, diagnostics, imports, and
/// the attribute arena, plus the overload-candidate registry `CallFunction`
/// (§4.9) searches.
pub struct GlobalContext<B: Backend> {
    pub options: CoreOptions,
    pub types: TypeManager,
    pub symbols: SymbolTable<B>,
    pub diagnostics: DiagnosticEngine,
    pub imports: ImportTracker,
    pub attributes: AttributeArena,
    functions: HashMap<String, Vec<SFunction<B>>>,
    externs: HashMap<&'static str, SFunction<B>>,
    template_names: HashSet<String>,
    templates: HashMap<String, TemplateDecl>,
    /// Stack of `type-param name -> bound SType` maps, pushed by the Builder
    /// while it instantiates a template and consulted by the Data-Type
    /// Visitor before it otherwise rejects a bare `Named` reference as
    /// unknown. A stack (not a single map) because instantiating one
    /// template can itself reference another template's parameter nested
    /// inside its own body.
    type_param_scopes: Vec<HashMap<String, SType>>,
}

impl<B: Backend> GlobalContext<B> {
    pub fn new(options: CoreOptions) -> Self {
        Self {
            options,
            types: TypeManager::new(),
            symbols: SymbolTable::new(),
            diagnostics: DiagnosticEngine::new(),
            imports: ImportTracker::new(),
            attributes: AttributeArena::new(),
            functions: HashMap::new(),
            externs: HashMap::new(),
            template_names: HashSet::new(),
            templates: HashMap::new(),
            type_param_scopes: Vec::new(),
        }
    }

    /// Marks `name` (the struct/class/union's base, un-parameterized name)
    /// as carrying type parameters, so the Data-Type Visitor knows an
    /// unresolved `Name<args>` reference should go through template
    /// instantiation rather than failing outright as an unknown type.
    pub fn mark_template(&mut self, name: &str) {
        self.template_names.insert(name.to_string());
    }

    pub fn is_template(&self, name: &str) -> bool {
        self.template_names.contains(name)
    }

    /// Stores `decl`'s AST under its base name, for the Builder's
    /// instantiation callback to clone on first reference.
    pub fn store_template(&mut self, name: &str, decl: TemplateDecl) {
        self.templates.insert(name.to_string(), decl);
    }

    pub fn get_template(&self, name: &str) -> Option<&TemplateDecl> {
        self.templates.get(name)
    }

    /// Opens a type-param binding scope for one template instantiation.
    pub fn push_type_params(&mut self, bindings: HashMap<String, SType>) {
        self.type_param_scopes.push(bindings);
    }

    pub fn pop_type_params(&mut self) {
        self.type_param_scopes.pop();
    }

    /// Innermost-first lookup, mirroring how nested instantiation can shadow
    /// an outer template's parameter of the same name.
    pub fn lookup_type_param(&self, name: &str) -> Option<SType> {
        self.type_param_scopes.iter().rev().find_map(|scope| scope.get(name).cloned())
    }

    /// Registers `function` as an overload candidate under its user-facing
    /// (unmangled) `name` and stores its value in the global scope so it can
    /// also be looked up as an ordinary symbol (e.g. passed as a value).
    pub fn declare_function(&mut self, backend: &mut B, name: &str, function: SFunction<B>) {
        let value = function.as_value(backend);
        self.symbols.store_global(name, value);
        self.functions.entry(name.to_string()).or_default().push(function);
    }

    /// The overload candidate set `CallFunction` filters by arity.
    pub fn candidates(&self, name: &str) -> &[SFunction<B>] {
        self.functions.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `malloc(usize) -> @i8`, declared the first time it's referenced and
    /// cached for reuse (§4.15).
    pub fn get_or_declare_malloc(&mut self, backend: &mut B) -> SFunction<B> {
        if let Some(f) = self.externs.get("malloc") {
            return f.clone();
        }
        let i8_t = self.types.get_int(8, true).expect("i8 is a supported width");
        let ret = self.types.get_pointer(i8_t);
        let size_ty = self.types.get_int(64, true).expect("i64 is a supported width");

        let be_i8 = backend.int_type(8);
        let be_ptr = backend.pointer_type(be_i8);
        let be_size = backend.int_type(64);
        let be_fn_ty = backend.function_type(be_ptr, &[be_size]);
        let function = backend.add_function("malloc", be_fn_ty);

        let sf = SFunction::new(function, ret, "malloc".to_string(), vec![size_ty], false);
        self.externs.insert("malloc", sf.clone());
        sf
    }

    /// `free(@i8) -> void`.
    pub fn get_or_declare_free(&mut self, backend: &mut B) -> SFunction<B> {
        if let Some(f) = self.externs.get("free") {
            return f.clone();
        }
        let i8_t = self.types.get_int(8, true).expect("i8 is a supported width");
        let ptr_t = self.types.get_pointer(i8_t);
        let void_t = self.types.get_void();

        let be_i8 = backend.int_type(8);
        let be_ptr = backend.pointer_type(be_i8);
        let be_void = backend.void_type();
        let be_fn_ty = backend.function_type(be_void, &[be_ptr]);
        let function = backend.add_function("free", be_fn_ty);

        let sf = SFunction::new(function, void_t, "free".to_string(), vec![ptr_t], false);
        self.externs.insert("free", sf.clone());
        sf
    }

    /// `printf(@i8, ...) -> i32`, variadic.
    pub fn get_or_declare_printf(&mut self, backend: &mut B) -> SFunction<B> {
        if let Some(f) = self.externs.get("printf") {
            return f.clone();
        }
        let i8_t = self.types.get_int(8, true).expect("i8 is a supported width");
        let ptr_t = self.types.get_pointer(i8_t);
        let i32_t = self.types.get_int(32, false).expect("i32 is a supported width");

        let be_i8 = backend.int_type(8);
        let be_ptr = backend.pointer_type(be_i8);
        let be_i32 = backend.int_type(32);
        let be_fn_ty = backend.function_type(be_i32, &[be_ptr]);
        let function = backend.add_function("printf", be_fn_ty);

        let sf = SFunction::new(function, i32_t, "printf".to_string(), vec![ptr_t], true);
        self.externs.insert("printf", sf.clone());
        sf
    }
}

/// One `break`/`continue`/`redo` target: the blocks a jump from inside the
/// loop body can land on, plus the scope depth the loop opened at (so
/// destructor cleanup on the way out knows where to stop, per §4.10).
pub struct LoopFrame<B: Backend> {
    pub break_block: B::Block,
    pub continue_block: B::Block,
    pub redo_block: B::Block,
    pub scope_depth: usize,
}

impl<B: Backend> Clone for LoopFrame<B> {
    fn clone(&self) -> Self {
        Self {
            break_block: self.break_block,
            continue_block: self.continue_block,
            redo_block: self.redo_block,
            scope_depth: self.scope_depth,
        }
    }
}

/// A named label's target block, plus whether it has actually been defined
/// yet (a forward `goto` creates the block before the label statement is
/// reached).
pub struct LabelState<B: Backend> {
    pub block: B::Block,
    pub defined: bool,
    pub token: Token,
}

/// Per-function state: which function/class/`this`-type is active, the
/// current insertion block, the loop-target stack, and the label map. Reset
/// (via `new`) at the start of every function body, including a template
/// instantiation's synthesized body.
pub struct CodeContext<B: Backend> {
    pub current_function: Option<SFunction<B>>,
    pub current_class: Option<SType>,
    pub this_type: Option<SType>,
    pub current_block: Option<B::Block>,
    loop_stack: Vec<LoopFrame<B>>,
    labels: HashMap<String, LabelState<B>>,
}

impl<B: Backend> Default for CodeContext<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> CodeContext<B> {
    pub fn new() -> Self {
        Self {
            current_function: None,
            current_class: None,
            this_type: None,
            current_block: None,
            loop_stack: Vec::new(),
            labels: HashMap::new(),
        }
    }

    pub fn is_static_context(&self) -> bool {
        self.this_type.is_none()
    }

    pub fn push_loop(&mut self, frame: LoopFrame<B>) {
        self.loop_stack.push(frame);
    }

    pub fn pop_loop(&mut self) -> Option<LoopFrame<B>> {
        self.loop_stack.pop()
    }

    pub fn loop_depth(&self) -> usize {
        self.loop_stack.len()
    }

    /// Resolves a `break`/`continue`/`redo` level to its target frame.
    /// `level == 1` (the default) is the innermost loop; a larger positive
    /// level counts outward from there. A negative level counts from the
    /// outside in (`-1` is the outermost loop). Returns `None` if the level
    /// names no enclosing loop.
    pub fn resolve_loop(&self, level: i64) -> Option<&LoopFrame<B>> {
        let n = self.loop_stack.len();
        if n == 0 || level == 0 {
            return None;
        }
        if level > 0 {
            let level = level as usize;
            if level > n {
                return None;
            }
            self.loop_stack.get(n - level)
        } else {
            let from_outside = (-level - 1) as usize;
            self.loop_stack.get(from_outside)
        }
    }

    /// Declares a label block lazily: the first reference (whether the
    /// label statement itself or a forward `goto`) creates the block;
    /// later references reuse it.
    pub fn declare_label(&mut self, name: &str, token: &Token, backend: &mut B, function: B::Function) -> B::Block {
        if let Some(state) = self.labels.get(name) {
            return state.block;
        }
        let block = backend.append_block(function, name);
        self.labels.insert(
            name.to_string(),
            LabelState {
                block,
                defined: false,
                token: token.clone(),
            },
        );
        block
    }

    /// Marks a label as defined at the point the label statement itself is
    /// reached. Returns `false` if the label was already defined (a
    /// redefinition error).
    pub fn define_label(&mut self, name: &str) -> bool {
        match self.labels.get_mut(name) {
            Some(state) if !state.defined => {
                state.defined = true;
                true
            }
            _ => false,
        }
    }

    pub fn label_block(&self, name: &str) -> Option<B::Block> {
        self.labels.get(name).map(|s| s.block)
    }

    /// Labels referenced by a forward `goto` but never defined by the time
    /// the function body ends -- each is an "undefined label" error.
    pub fn undefined_labels(&self) -> Vec<(String, Token)> {
        self.labels
            .iter()
            .filter(|(_, state)| !state.defined)
            .map(|(name, state)| (name.clone(), state.token.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    #[test]
    fn malloc_is_declared_once_and_cached() {
        let mut be = MockBackend::new();
        let mut gctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let a = gctx.get_or_declare_malloc(&mut be);
        let b = gctx.get_or_declare_malloc(&mut be);
        assert_eq!(a.function, b.function);
        assert_eq!(be.ops.iter().filter(|op| matches!(op, crate::backend::mock::Op::AddFunction { name, .. } if name == "malloc")).count(), 1);
    }

    #[test]
    fn declare_function_registers_overload_candidate() {
        let mut be = MockBackend::new();
        let mut gctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let i32_t = gctx.types.get_int(32, false).unwrap();
        let fn_ty = be.function_type(be.int_type(32), &[]);
        let function = be.add_function("area", fn_ty);
        let sf = SFunction::new(function, i32_t, "area".to_string(), vec![], false);
        gctx.declare_function(&mut be, "area", sf);
        assert_eq!(gctx.candidates("area").len(), 1);
        assert_eq!(gctx.symbols.load_global("area").len(), 1);
    }

    #[test]
    fn resolve_loop_level_one_is_innermost() {
        let mut be = MockBackend::new();
        let fn_ty = be.function_type(be.void_type(), &[]);
        let function = be.add_function("f", fn_ty);
        let mut ctx = CodeContext::<MockBackend>::new();
        let outer = LoopFrame {
            break_block: be.append_block(function, "outer.break"),
            continue_block: be.append_block(function, "outer.cont"),
            redo_block: be.append_block(function, "outer.redo"),
            scope_depth: 0,
        };
        let inner = LoopFrame {
            break_block: be.append_block(function, "inner.break"),
            continue_block: be.append_block(function, "inner.cont"),
            redo_block: be.append_block(function, "inner.redo"),
            scope_depth: 1,
        };
        ctx.push_loop(outer);
        ctx.push_loop(inner.clone());
        assert_eq!(ctx.resolve_loop(1).unwrap().break_block, inner.break_block);
        assert_eq!(ctx.resolve_loop(-1).unwrap().scope_depth, 0);
        assert!(ctx.resolve_loop(3).is_none());
    }

    #[test]
    fn forward_goto_creates_placeholder_then_define_clears_it() {
        let mut be = MockBackend::new();
        let fn_ty = be.function_type(be.void_type(), &[]);
        let function = be.add_function("f", fn_ty);
        let mut ctx = CodeContext::<MockBackend>::new();
        let token = Token::synthetic("done");
        let block = ctx.declare_label("done", &token, &mut be, function);
        assert_eq!(ctx.undefined_labels().len(), 1);
        assert_eq!(ctx.label_block("done"), Some(block));
        assert!(ctx.define_label("done"));
        assert!(ctx.undefined_labels().is_empty());
        assert!(!ctx.define_label("done"));
    }

    #[test]
    fn import_tracker_marks_loaded_once() {
        let mut tracker = ImportTracker::new();
        let path = std::path::PathBuf::from("a.em");
        assert!(tracker.mark_loaded(&path));
        assert!(!tracker.mark_loaded(&path));
        assert!(tracker.is_loaded(&path));
    }

    #[test]
    fn import_tracker_lines_are_ordered_package_then_file_then_pkg() {
        let mut tracker = ImportTracker::new();
        tracker.record_package_key("opt", Some("1"));
        tracker.record_import_file("a.em");
        tracker.record_package_import("std");
        assert_eq!(tracker.lines(), vec!["P:opt=1", "i:a.em", "I:std"]);
    }
}
