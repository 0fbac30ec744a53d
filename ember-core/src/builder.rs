//! The Builder (§4.13/§4.14/§4.15): walks a `Program`'s top-level
//! declarations, creates every type and function prototype, then hands each
//! function body to the Statement Visitor. Everything the other visitors
//! need but can't construct themselves -- a template's first instantiation,
//! a class's synthesized constructor/destructor, an implicit trailing
//! `ret` -- is assembled here.
//!
//! Declaration order matters in one place that isn't obvious from the AST
//! shape alone: a class's methods must be registered (`add_class_method`,
//! which upgrades an opaque type to `UserTypeBody::Class` on first call)
//! before its fields are finalized (`set_struct_body`), because finishing
//! the struct body on an opaque type produces a plain `Struct` body and any
//! later `add_class_method` call then fails. So `build_class` always
//! declares methods first and calls `set_struct_body` last.

use std::collections::HashMap;

use ember_ast::{
    ClassDecl, Decl, EnumDecl, EnumMember, Expr, FieldDecl, FunctionDecl, ImportKind, NodeList, Program, Stmt,
    StructDecl, Token, TypeExpr, UnaryOp, UnionDecl,
};
use ember_diagnostics::error_codes;

use crate::backend::Backend;
use crate::cast::backend_type_of;
use crate::context::{CodeContext, GlobalContext, TemplateDecl};
use crate::diag::span_of;
use crate::mangle::{self, MangleOverride};
use crate::types::apint::ApInt;
use crate::types::user::UserTypeBody;
use crate::types::{SType, TypeFlags};
use crate::value::{RValue, SFunction};
use crate::visitors::expression::{run_constructor, run_destructor};
use crate::visitors::{datatype, statement};

/// Walks every top-level declaration in `program.decls` and builds the
/// module. Returns `None` if any declaration failed irrecoverably, but --
/// matching the Statement Visitor's "keep walking siblings" policy -- still
/// processes every remaining declaration first so a single bad one doesn't
/// suppress the rest of the module's diagnostics.
pub fn build_program<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, program: &Program) -> Option<()> {
    let mut ok = true;

    // Pass 1: register template bases so forward references to them inside
    // sibling declarations resolve as pending instantiations rather than
    // unknown names, and build every non-templated composite type.
    for decl in program.decls.iter() {
        match decl {
            Decl::Struct(s) if !s.type_params.is_empty() => {
                ctx.mark_template(s.name.text.as_ref());
                ctx.store_template(s.name.text.as_ref(), TemplateDecl::Struct(s.clone()));
            }
            Decl::Class(c) if !c.type_params.is_empty() => {
                ctx.mark_template(c.name.text.as_ref());
                ctx.store_template(c.name.text.as_ref(), TemplateDecl::Class(c.clone()));
            }
            Decl::Struct(s) => {
                if build_struct(backend, ctx, s.name.text.as_ref(), s).is_none() {
                    ok = false;
                }
            }
            Decl::Class(c) => {
                if build_class(backend, ctx, c.name.text.as_ref(), c).is_none() {
                    ok = false;
                }
            }
            Decl::Union(u) => {
                if build_union(backend, ctx, u.name.text.as_ref(), u).is_none() {
                    ok = false;
                }
            }
            Decl::Enum(e) => {
                if build_enum(backend, ctx, e.name.text.as_ref(), e).is_none() {
                    ok = false;
                }
            }
            _ => {}
        }
    }

    // Pass 2: aliases, function prototypes + bodies, globals, imports. These
    // may reference the types pass 1 just created (including templates,
    // lazily instantiated on first `resolve_type` call).
    for decl in program.decls.iter() {
        match decl {
            Decl::Struct(_) | Decl::Class(_) | Decl::Union(_) | Decl::Enum(_) => {}
            Decl::Alias(a) => {
                let Some(target) = resolve_type(backend, ctx, &a.target) else {
                    ok = false;
                    continue;
                };
                ctx.types.create_alias(a.name.text.as_ref(), target);
            }
            Decl::Function(f) => {
                if declare_free_function(backend, ctx, f).is_none() {
                    ok = false;
                }
            }
            Decl::Variable(v) => {
                if build_global(backend, ctx, v).is_none() {
                    ok = false;
                }
            }
            Decl::Import(i) => {
                match i.kind {
                    ImportKind::File => ctx.imports.record_import_file(i.path.text.as_ref()),
                    ImportKind::Package => ctx.imports.record_package_import(i.path.text.as_ref()),
                }
            }
        }
    }

    if ok { Some(()) } else { None }
}

fn resolve_type<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, ty: &TypeExpr) -> Option<SType> {
    datatype::resolve(backend, ctx, ty, &mut instantiate_template)
}

/// The `datatype::resolve` instantiation callback (§4.13): looks up the
/// template stored under `token`'s text, checks the supplied argument count
/// against its type-parameter list, binds parameter names to `args` for the
/// duration of building the instantiated body, and builds it under the
/// already-composed `raw` name.
fn instantiate_template<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    raw: &str,
    args: Vec<SType>,
    token: &Token,
) -> Option<SType> {
    let Some(template) = ctx.get_template(token.text.as_ref()).cloned() else {
        ctx.diagnostics.emit_error(
            error_codes::NOT_A_TEMPLATE,
            format!("`{}` is not a template", token.text),
            span_of(token),
        );
        return None;
    };

    let type_params: &[ember_ast::TypeParam] = match &template {
        TemplateDecl::Struct(s) => &s.type_params,
        TemplateDecl::Class(c) => &c.type_params,
    };

    if args.is_empty() {
        ctx.diagnostics.emit_error(
            error_codes::TEMPLATE_ARGS_REQUIRED,
            format!("`{}` requires template arguments", token.text),
            span_of(token),
        );
        return None;
    }
    if args.len() != type_params.len() {
        ctx.diagnostics.emit_error(
            error_codes::TEMPLATE_ARG_COUNT,
            format!(
                "template `{}` expects {} argument(s), found {}",
                token.text,
                type_params.len(),
                args.len()
            ),
            span_of(token),
        );
        return None;
    }

    let bindings: HashMap<String, SType> = type_params
        .iter()
        .zip(args.iter())
        .map(|(p, a)| (p.name.text.to_string(), a.clone()))
        .collect();

    log::debug!("instantiating template `{}` as `{}`", token.text, raw);
    ctx.push_type_params(bindings);
    let result = match &template {
        TemplateDecl::Struct(s) => build_struct(backend, ctx, raw, s),
        TemplateDecl::Class(c) => build_class(backend, ctx, raw, c),
    };
    ctx.pop_type_params();

    result
}

fn resolve_fields<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    fields: &[FieldDecl],
) -> Option<Vec<(String, SType)>> {
    let mut out = Vec::with_capacity(fields.len());
    for f in fields {
        let ty = resolve_type(backend, ctx, &f.ty)?;
        out.push((f.name.text.to_string(), ty));
    }
    Some(out)
}

fn build_struct<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, raw: &str, decl: &StructDecl) -> Option<SType> {
    let sty = ctx.types.create_struct(raw);
    let fields = resolve_fields(backend, ctx, &decl.fields)?;
    if let Err(e) = ctx.types.set_struct_body(raw, fields) {
        ctx.diagnostics.emit_error(error_codes::TYPE_ALREADY_DECLARED, e.to_string(), span_of(&decl.token));
        return None;
    }
    Some(sty)
}

fn build_union<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, raw: &str, decl: &UnionDecl) -> Option<SType> {
    let sty = ctx.types.create_union(raw);
    let members = resolve_fields(backend, ctx, &decl.members)?;
    if let Err(e) = ctx.types.set_union_body(raw, members) {
        ctx.diagnostics.emit_error(error_codes::TYPE_ALREADY_DECLARED, e.to_string(), span_of(&decl.token));
        return None;
    }
    Some(sty)
}

/// Folds an enum member's initializer as a signed 128-bit constant. Unlike
/// the Data-Type Visitor's array/vec size folding (`const_eval_u64`, unsigned
/// only), enum constants may be negative.
fn const_eval_i128(expr: &Expr) -> Option<i128> {
    match expr {
        Expr::IntLit { value, .. } => Some(*value),
        Expr::Unary { op: UnaryOp::Neg, operand, .. } => const_eval_i128(operand).map(|v| -v),
        _ => None,
    }
}

/// Default base for an enum with no declared underlying type (Open Question,
/// resolved in DESIGN.md): signed 32-bit, matching a bare C-style `enum`.
fn default_enum_base<B: Backend>(ctx: &GlobalContext<B>) -> SType {
    ctx.types.get_int(32, false).expect("i32 is a supported width")
}

fn build_enum<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, raw: &str, decl: &EnumDecl) -> Option<SType> {
    let sty = ctx.types.create_enum(raw);
    let base = match &decl.base {
        Some(b) => resolve_type(backend, ctx, b)?,
        None => default_enum_base(ctx),
    };
    let unsigned = base.flags().contains(TypeFlags::UNSIGNED);
    let bits = base.size() as u32;

    let mut members = Vec::with_capacity(decl.members.len());
    let mut next: i128 = 0;
    for m in decl.members.iter() {
        let value = match resolve_enum_member_value(ctx, m, next) {
            Some(v) => v,
            None => return None,
        };
        next = value + 1;
        members.push((m.name.text.to_string(), ApInt::new(value, bits, unsigned)));
    }

    if let Err(e) = ctx.types.set_enum_body(raw, members, base) {
        ctx.diagnostics.emit_error(error_codes::TYPE_ALREADY_DECLARED, e.to_string(), span_of(&decl.token));
        return None;
    }
    Some(sty)
}

/// A member with no explicit initializer defaults to one past the previous
/// member's value (`next`), starting at 0 for the first member -- the usual
/// C-style auto-increment.
fn resolve_enum_member_value<B: Backend>(ctx: &mut GlobalContext<B>, member: &EnumMember, next: i128) -> Option<i128> {
    match &member.value {
        Some(expr) => match const_eval_i128(expr) {
            Some(v) => Some(v),
            None => {
                ctx.diagnostics.emit_error(
                    error_codes::NON_CONSTANT_GLOBAL_INIT,
                    format!("enum member `{}` must be a constant integer", member.name.text),
                    span_of(&member.name),
                );
                None
            }
        },
        None => Some(next),
    }
}

fn build_global<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, decl: &ember_ast::VariableDecl) -> Option<()> {
    if decl.is_const && decl.init.is_none() {
        ctx.diagnostics.emit_error(
            error_codes::CONST_WITHOUT_INIT,
            format!("const global `{}` requires an initializer", decl.name.text),
            span_of(&decl.token),
        );
        return None;
    }

    let ty = resolve_type(backend, ctx, &decl.ty)?;
    let be_ty = backend_type_of(backend, &ctx.types, &ty);

    let initializer = match &decl.init {
        Some(Expr::IntLit { value, .. }) => Some(backend.const_int(be_ty, *value)),
        Some(Expr::FloatLit { value, .. }) => Some(backend.const_float(be_ty, *value)),
        Some(Expr::BoolLit { value, .. }) => Some(backend.const_int(be_ty, if *value { 1 } else { 0 })),
        Some(Expr::NullLit { .. }) => Some(backend.const_null(be_ty)),
        Some(other) => {
            ctx.diagnostics.emit_error(
                error_codes::NON_CONSTANT_GLOBAL_INIT,
                format!("global `{}`'s initializer must be a constant expression", decl.name.text),
                span_of(other.token()),
            );
            return None;
        }
        None => None,
    };

    let value = backend.add_global(be_ty, decl.name.text.as_ref(), initializer);
    ctx.symbols.store_global(decl.name.text.as_ref(), RValue::lvalue(value, ty));
    Some(())
}

/// Builds a class's full prototype + body, in the order `set_struct_body`
/// requires: field *types* are resolved first (so a self-referential
/// pointer field sees the still-opaque handle), then every declared method
/// is registered, then synthesized constructor/destructor (if needed), and
/// only then is the field layout finalized.
fn build_class<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, raw: &str, decl: &ClassDecl) -> Option<SType> {
    let class_ty = ctx.types.create_class(raw);
    let is_templated = !decl.type_params.is_empty();

    let fields = resolve_fields(backend, ctx, &decl.fields)?;

    let mut saw_destructor = false;
    for m in &decl.methods {
        if m.name.text.as_ref() == "null" {
            if saw_destructor {
                ctx.diagnostics.emit_error(
                    error_codes::MULTIPLE_DESTRUCTORS,
                    format!("class `{}` declares more than one destructor", raw),
                    span_of(&m.token),
                );
                continue;
            }
            saw_destructor = true;
        }
        declare_method(backend, ctx, raw, &class_ty, m, is_templated)?;
    }

    if !saw_destructor {
        synthesize_implicit_dtor_if_needed(backend, ctx, raw, &class_ty, &fields);
    }
    if !decl.methods.iter().any(|m| m.name.text.as_ref() == "this") {
        synthesize_implicit_ctor_if_needed(backend, ctx, raw, &class_ty, &fields);
    }

    if let Err(e) = ctx.types.set_struct_body(raw, fields) {
        ctx.diagnostics.emit_error(error_codes::TYPE_ALREADY_DECLARED, e.to_string(), span_of(&decl.token));
        return None;
    }
    Some(class_ty)
}

fn field_has_constructor<B: Backend>(ctx: &GlobalContext<B>, field_ty: &SType) -> bool {
    let Some(name) = field_ty.name() else { return false };
    let Some(entry) = ctx.types.user_type_entry(name) else { return false };
    let body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
    matches!(&*body, UserTypeBody::Class(c) if !c.constructors().is_empty())
}

fn field_has_destructor<B: Backend>(ctx: &GlobalContext<B>, field_ty: &SType) -> bool {
    let Some(name) = field_ty.name() else { return false };
    let Some(entry) = ctx.types.user_type_entry(name) else { return false };
    let body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
    matches!(&*body, UserTypeBody::Class(c) if c.destructor().is_some())
}

/// §4.10: a class with no explicit `this` gets a synthesized default
/// constructor only if at least one field's own type needs its constructor
/// run -- a class with purely primitive fields is left to raw `malloc`
/// zero-init, matching a default struct's semantics.
fn synthesize_implicit_ctor_if_needed<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    raw: &str,
    class_ty: &SType,
    fields: &[(String, SType)],
) {
    if !fields.iter().any(|(_, t)| field_has_constructor(ctx, t)) {
        return;
    }
    log::debug!("synthesizing default constructor for `{}`", raw);
    let this_ptr_ty = ctx.types.get_pointer(class_ty.clone());
    let void_ty = ctx.types.get_void();
    let be_ptr_ty = backend_type_of(backend, &ctx.types, &this_ptr_ty);
    let be_void_ty = backend_type_of(backend, &ctx.types, &void_ty);
    let be_fn_ty = backend.function_type(be_void_ty, &[be_ptr_ty]);
    let mangled = format!("{}_this", raw);
    let function = backend.add_function(&mangled, be_fn_ty);
    let sf = SFunction::new(function, void_ty, mangled.clone(), vec![this_ptr_ty], false);
    ctx.declare_function(backend, &mangled, sf.clone());
    let _ = ctx.types.add_class_method(
        raw,
        "this",
        crate::types::user::MethodSignature {
            mangled: mangled.clone(),
            params: vec![],
            ret: ctx.types.get_void(),
            is_variadic: false,
        },
    );

    let entry_block = backend.append_block(sf.function, "entry");
    backend.position_at_end(entry_block);
    let this_value = backend.param_value(sf.function, 0);
    let synthetic = Token::synthetic(mangled.clone());
    for (index, (_, field_ty)) in fields.iter().enumerate() {
        if !field_has_constructor(ctx, field_ty) {
            continue;
        }
        let be_field_ty = backend_type_of(backend, &ctx.types, field_ty);
        let idx_value = backend.const_int(backend.int_type(32), index as i128);
        let field_ptr = backend.build_gep(be_field_ty, this_value, &[idx_value], "field.ptr");
        run_constructor(backend, ctx, &synthetic, field_ty, field_ptr, vec![]);
    }
    backend.build_ret(None);
}

/// Symmetric destructor synthesis: a class with no explicit `null` gets one
/// only if some field's type needs its own destructor run.
fn synthesize_implicit_dtor_if_needed<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    raw: &str,
    class_ty: &SType,
    fields: &[(String, SType)],
) {
    if !fields.iter().any(|(_, t)| field_has_destructor(ctx, t)) {
        return;
    }
    log::debug!("synthesizing default destructor for `{}`", raw);
    let this_ptr_ty = ctx.types.get_pointer(class_ty.clone());
    let void_ty = ctx.types.get_void();
    let be_ptr_ty = backend_type_of(backend, &ctx.types, &this_ptr_ty);
    let be_void_ty = backend_type_of(backend, &ctx.types, &void_ty);
    let be_fn_ty = backend.function_type(be_void_ty, &[be_ptr_ty]);
    let mangled = format!("{}_null", raw);
    let function = backend.add_function(&mangled, be_fn_ty);
    let sf = SFunction::new(function, void_ty, mangled.clone(), vec![this_ptr_ty], false);
    ctx.declare_function(backend, &mangled, sf.clone());
    let _ = ctx.types.add_class_method(
        raw,
        "null",
        crate::types::user::MethodSignature {
            mangled: mangled.clone(),
            params: vec![],
            ret: ctx.types.get_void(),
            is_variadic: false,
        },
    );

    let entry_block = backend.append_block(sf.function, "entry");
    backend.position_at_end(entry_block);
    let this_value = backend.param_value(sf.function, 0);
    for (index, (_, field_ty)) in fields.iter().enumerate() {
        if !field_has_destructor(ctx, field_ty) {
            continue;
        }
        let be_field_ty = backend_type_of(backend, &ctx.types, field_ty);
        let idx_value = backend.const_int(backend.int_type(32), index as i128);
        let field_ptr = backend.build_gep(be_field_ty, this_value, &[idx_value], "field.ptr");
        run_destructor(backend, ctx, &RValue::lvalue(field_ptr, field_ty.clone()));
    }
    backend.build_ret(None);
}

/// Declares (and, if a body is present, builds) one class member function,
/// per §4.14's mangling rules: an implicit `this: *Class` parameter is
/// prepended to whatever the declaration lists, and the constructor/
/// destructor both return `void` regardless of a declared return type.
fn declare_method<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    class_raw: &str,
    class_ty: &SType,
    m: &FunctionDecl,
    is_templated: bool,
) -> Option<()> {
    let method_name = m.name.text.as_ref();
    let is_ctor = method_name == "this";
    let is_dtor = method_name == "null";

    let mangle_override: Option<MangleOverride> = mangle::parse_mangle_attribute(&m.attributes);
    let mangled = match mangle::mangle_member_function(class_raw, method_name, mangle_override.as_ref(), is_templated) {
        Ok(name) => name,
        Err(msg) => {
            ctx.diagnostics.emit_error(error_codes::NON_UNIQUE_OPERATOR_OVERLOAD, msg.to_string(), span_of(&m.token));
            return None;
        }
    };

    let this_ptr_ty = ctx.types.get_pointer(class_ty.clone());
    let mut param_types = vec![this_ptr_ty.clone()];
    for p in &m.params {
        param_types.push(resolve_type(backend, ctx, &p.ty)?);
    }

    let ret_ty = if is_ctor || is_dtor {
        ctx.types.get_void()
    } else {
        match &m.return_type {
            Some(rt) => resolve_type(backend, ctx, rt)?,
            None => ctx.types.get_void(),
        }
    };

    let be_param_types: Vec<B::Type> = param_types.iter().map(|t| backend_type_of(backend, &ctx.types, t)).collect();
    let be_ret_ty = backend_type_of(backend, &ctx.types, &ret_ty);
    let be_fn_ty = backend.function_type(be_ret_ty, &be_param_types);
    let function = backend.add_function(&mangled, be_fn_ty);

    let sf = SFunction::new(function, ret_ty, mangled.clone(), param_types.clone(), false);
    ctx.declare_function(backend, &mangled, sf.clone());
    ctx.types
        .add_class_method(
            class_raw,
            method_name,
            crate::types::user::MethodSignature {
                mangled: mangled.clone(),
                params: param_types[1..].to_vec(),
                ret: sf.ty.clone(),
                is_variadic: false,
            },
        )
        .ok()?;

    if let Some(body) = &m.body {
        build_function_body(backend, ctx, &sf, Some(class_ty.clone()), m, body);
    }
    Some(())
}

fn declare_free_function<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, decl: &FunctionDecl) -> Option<()> {
    let mangle_override = mangle::parse_mangle_attribute(&decl.attributes);
    let mangled = mangle::mangle_free_function(decl.name.text.as_ref(), mangle_override.as_ref());

    let mut param_types = Vec::with_capacity(decl.params.len());
    for p in &decl.params {
        param_types.push(resolve_type(backend, ctx, &p.ty)?);
    }
    let ret_ty = match &decl.return_type {
        Some(rt) => resolve_type(backend, ctx, rt)?,
        None => ctx.types.get_void(),
    };

    let be_param_types: Vec<B::Type> = param_types.iter().map(|t| backend_type_of(backend, &ctx.types, t)).collect();
    let be_ret_ty = backend_type_of(backend, &ctx.types, &ret_ty);
    let be_fn_ty = backend.function_type(be_ret_ty, &be_param_types);
    let function = backend.add_function(&mangled, be_fn_ty);

    let sf = SFunction::new(function, ret_ty, mangled, param_types, false);
    ctx.declare_function(backend, decl.name.text.as_ref(), sf.clone());

    if let Some(body) = &decl.body {
        build_function_body(backend, ctx, &sf, None, decl, body);
    }
    Some(())
}

/// Lowers one function/method body (§4.13): opens an entry block, binds
/// `this` (if any) and every declared parameter to fresh locals, runs the
/// Statement Visitor over each top-level statement, reports any label
/// referenced by a forward `goto` but never defined, destructs the
/// parameter scope, and terminates whatever block is current when the walk
/// finishes.
///
/// The Statement Visitor always reopens a fresh, empty block immediately
/// after emitting `return`/`break`/`continue`/`redo`/`goto` (so the
/// enclosing construct's own trailing branch lands somewhere live instead of
/// double-terminating the jump's block), so the block current here is
/// unterminated regardless of whether the body's last top-level statement
/// was itself a jump -- every §8 "one terminator per block" obligation is
/// closed out right here rather than by a shallow "last statement is
/// `return`" check.
fn build_function_body<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    sf: &SFunction<B>,
    this_type: Option<SType>,
    decl: &FunctionDecl,
    body: &NodeList<Stmt>,
) {
    let entry = backend.append_block(sf.function, "entry");
    backend.position_at_end(entry);

    let mut code = CodeContext::<B>::new();
    code.current_function = Some(sf.clone());
    code.current_block = Some(entry);
    if let Some(t) = &this_type {
        code.current_class = Some(t.clone());
        code.this_type = Some(t.clone());
    }

    ctx.symbols.push_scope();

    let param_offset = if this_type.is_some() {
        let this_value = backend.param_value(sf.function, 0);
        ctx.symbols.store_local("this", RValue::lvalue(this_value, sf.param_types[0].clone()), true, false);
        1
    } else {
        0
    };
    for (i, p) in decl.params.iter().enumerate() {
        let idx = i + param_offset;
        let param_value = backend.param_value(sf.function, idx);
        let param_ty = sf.param_types[idx].clone();
        ctx.symbols.store_local(p.name.text.as_ref(), RValue::lvalue(param_value, param_ty), true, false);
    }

    for stmt in body.iter() {
        statement::execute(backend, ctx, &mut code, stmt);
    }

    for (name, token) in code.undefined_labels() {
        ctx.diagnostics.emit_error(
            error_codes::UNDEFINED_LABEL,
            format!("label `{}` is never defined", name),
            span_of(&token),
        );
    }

    for d in ctx.symbols.pop_scope() {
        run_destructor(backend, ctx, &d.value);
    }

    if sf.ty.flags().contains(TypeFlags::VOID) {
        backend.build_ret(None);
    } else {
        let be_ret_ty = backend_type_of(backend, &ctx.types, &sf.ty);
        let undef = backend.const_undef(be_ret_ty);
        backend.build_ret(Some(undef));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::config::CoreOptions;
    use ember_ast::{Param, TypeParam};

    fn field(name: &str, ty: TypeExpr) -> FieldDecl {
        FieldDecl {
            token: Token::synthetic(name),
            name: Token::synthetic(name),
            ty,
        }
    }

    fn int_ty(bits: u32) -> TypeExpr {
        TypeExpr::Int {
            token: Token::synthetic("i"),
            width: bits,
            unsigned: false,
        }
    }

    fn named_ty(name: &str) -> TypeExpr {
        TypeExpr::Named {
            token: Token::synthetic(name),
            args: NodeList::new(),
        }
    }

    #[test]
    fn struct_decl_creates_fields_in_order() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let decl = StructDecl {
            token: Token::synthetic("Point"),
            name: Token::synthetic("Point"),
            type_params: vec![],
            fields: vec![field("x", int_ty(32)), field("y", int_ty(32))],
        };
        let sty = build_struct(&mut be, &mut ctx, "Point", &decl).unwrap();
        assert_eq!(ctx.types.alloc_size(&sty), 8);
    }

    #[test]
    fn duplicate_destructor_is_rejected() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let dtor = FunctionDecl {
            token: Token::synthetic("null"),
            name: Token::synthetic("null"),
            type_params: vec![],
            params: vec![],
            return_type: None,
            body: None,
            attributes: vec![],
            is_static: false,
        };
        let decl = ClassDecl {
            token: Token::synthetic("Resource"),
            name: Token::synthetic("Resource"),
            type_params: vec![],
            fields: vec![],
            methods: vec![dtor.clone(), dtor],
        };
        build_class(&mut be, &mut ctx, "Resource", &decl);
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn class_method_is_registered_as_overload_candidate() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let area = FunctionDecl {
            token: Token::synthetic("area"),
            name: Token::synthetic("area"),
            type_params: vec![],
            params: vec![],
            return_type: Some(int_ty(32)),
            body: None,
            attributes: vec![],
            is_static: false,
        };
        let decl = ClassDecl {
            token: Token::synthetic("Rect"),
            name: Token::synthetic("Rect"),
            type_params: vec![],
            fields: vec![field("w", int_ty(32)), field("h", int_ty(32))],
            methods: vec![area],
        };
        build_class(&mut be, &mut ctx, "Rect", &decl);
        assert_eq!(ctx.candidates("Rect_area").len(), 1);
    }

    #[test]
    fn free_function_is_registered_under_unmangled_name() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let decl = FunctionDecl {
            token: Token::synthetic("main"),
            name: Token::synthetic("main"),
            type_params: vec![],
            params: vec![Param {
                token: Token::synthetic("argc"),
                name: Token::synthetic("argc"),
                ty: int_ty(32),
            }],
            return_type: Some(int_ty(32)),
            body: Some({
                let mut body = NodeList::new();
                body.push(Stmt::Return {
                    token: Token::synthetic("return"),
                    value: Some(Expr::IntLit {
                        token: Token::synthetic("0"),
                        value: 0,
                        width: 32,
                        unsigned: false,
                    }),
                });
                body
            }),
            attributes: vec![],
            is_static: false,
        };
        declare_free_function(&mut be, &mut ctx, &decl);
        assert_eq!(ctx.candidates("main").len(), 1);
        assert!(!ctx.diagnostics.has_errors());
    }

    #[test]
    fn template_instantiation_is_idempotent_by_raw_name() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let decl = StructDecl {
            token: Token::synthetic("Box"),
            name: Token::synthetic("Box"),
            type_params: vec![TypeParam { name: Token::synthetic("T") }],
            fields: vec![field("value", named_ty("T"))],
        };
        ctx.mark_template("Box");
        ctx.store_template("Box", TemplateDecl::Struct(decl));

        let mut args = NodeList::new();
        args.push(int_ty(32));
        let expr = TypeExpr::Named {
            token: Token::synthetic("Box"),
            args,
        };
        let first = resolve_type(&mut be, &mut ctx, &expr).unwrap();
        let second = resolve_type(&mut be, &mut ctx, &expr).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name(), Some("Box<i32>"));
    }

    #[test]
    fn enum_members_default_to_prior_plus_one() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let decl = EnumDecl {
            token: Token::synthetic("Color"),
            name: Token::synthetic("Color"),
            base: None,
            members: vec![
                EnumMember { name: Token::synthetic("Red"), value: None },
                EnumMember { name: Token::synthetic("Green"), value: None },
                EnumMember {
                    name: Token::synthetic("Blue"),
                    value: Some(Expr::IntLit {
                        token: Token::synthetic("10"),
                        value: 10,
                        width: 32,
                        unsigned: false,
                    }),
                },
                EnumMember { name: Token::synthetic("Alpha"), value: None },
            ],
        };
        build_enum(&mut be, &mut ctx, "Color", &decl).unwrap();
        let entry = ctx.types.user_type_entry("Color").unwrap();
        let body = entry.body.lock().unwrap();
        match &*body {
            UserTypeBody::Enum(e) => {
                let values: Vec<i128> = e.members.iter().map(|(_, v)| v.as_i128()).collect();
                assert_eq!(values, vec![0, 1, 10, 11]);
            }
            _ => panic!("expected enum body"),
        }
    }
}
