//! Variable Visitor (§4.5): resolves an `Expr` to an lvalue `RValue` --
//! a storage address plus the type stored there. `expression::load` wraps
//! this with the load that turns an address into a value; assignment
//! targets stop here and never load.

use ember_ast::{ArrowBase, Expr, Token};

use crate::backend::Backend;
use crate::cast::backend_type_of;
use crate::context::{CodeContext, GlobalContext};
use crate::diag::span_of;
use crate::types::{SType, TypeFlags, UserTypeBody};
use crate::value::RValue;

use ember_diagnostics::error_codes;

/// Evaluates a sub-expression to an rvalue. Provided by `expression::load`
/// (via a plain function pointer rather than a direct `use`, since
/// `expression` calls back into `resolve` for assignment targets and the
/// two modules would otherwise form an import cycle through their public
/// surfaces).
pub type RvalueLoader<'a, B> = &'a mut dyn FnMut(&mut B, &mut GlobalContext<B>, &CodeContext<B>, &Expr) -> Option<RValue<B>>;

/// Resolves `expr` to its storage address. Returns `None` (after emitting a
/// diagnostic) both for genuine resolution failures and for expressions
/// that simply aren't lvalues (a literal, a binary operator result).
pub fn resolve<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    expr: &Expr,
    load_rvalue: RvalueLoader<'_, B>,
) -> Option<RValue<B>> {
    match expr {
        Expr::Ident { token } => resolve_ident(backend, ctx, code, token),

        Expr::Deref { token, base } => {
            let base_value = load_rvalue(backend, ctx, code, base)?;
            if !base_value.ty.flags().contains(TypeFlags::POINTER) {
                ctx.diagnostics.emit_error(
                    error_codes::NOT_A_POINTER,
                    "`@` requires a pointer operand".to_string(),
                    span_of(token),
                );
                return None;
            }
            let pointee = base_value.ty.subtype().cloned().unwrap_or_else(|| ctx.types.get_void());
            Some(RValue::lvalue(base_value.value, pointee))
        }

        Expr::ArrayIndex { token, base, index } => {
            resolve_array_index(backend, ctx, code, token, base, index, load_rvalue)
        }

        Expr::Member { token, base, member } => resolve_member(backend, ctx, code, token, base, member, load_rvalue),

        Expr::ArrowAs { token, base, target } => {
            let base_lv = resolve(backend, ctx, code, base, load_rvalue)?;
            let target_ty = crate::visitors::datatype::resolve(backend, ctx, target, &mut |_, c: &mut GlobalContext<B>, raw, _, tok| {
                c.diagnostics.emit_error(
                    error_codes::UNDEFINED_TYPE,
                    format!("unknown type `{}` in `->as` cast", raw),
                    span_of(tok),
                );
                None
            })?;
            let be_target_ptr = backend.pointer_type(backend_type_of(backend, &ctx.types, &target_ty));
            let new_addr = backend.build_bitcast(base_lv.value, be_target_ptr, "arrowas");
            Some(RValue::lvalue(new_addr, target_ty))
        }

        Expr::ArrowMut { base, .. } => {
            let base_lv = resolve(backend, ctx, code, base, load_rvalue)?;
            let mutable = ctx.types.get_mutable(base_lv.ty.clone());
            Some(RValue::lvalue(base_lv.value, mutable))
        }

        Expr::ArrowSize { token, base } => resolve_arrow_size(backend, ctx, code, token, base, load_rvalue),
        Expr::ArrowLen { token, base } => resolve_arrow_len(backend, ctx, code, token, base, load_rvalue),

        _ => {
            ctx.diagnostics.emit_error(
                error_codes::NOT_AN_LVALUE,
                "expression is not assignable".to_string(),
                span_of(expr_token(expr)),
            );
            None
        }
    }
}

fn resolve_ident<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, code: &CodeContext<B>, token: &Token) -> Option<RValue<B>> {
    let name = token.text.as_ref();

    let locals = ctx.symbols.load_locals_only(name);
    if let Some(v) = locals.last() {
        return Some(v.clone());
    }

    if let Some(this_ty) = &code.this_type {
        if let Some(member) = lookup_member_gep(backend, ctx, this_ty, name) {
            let this_ptr = ctx.symbols.load_locals_only("this");
            if let Some(this_rv) = this_ptr.last() {
                let be_this_ty = backend_type_of(backend, &ctx.types, this_ty);
                let idx_ty = backend.int_type(32);
                let zero = backend.const_int(idx_ty, 0);
                let idx = backend.const_int(idx_ty, member.index as i128);
                let addr = backend.build_gep(be_this_ty, this_rv.value, &[zero, idx], "this.member");
                return Some(RValue::lvalue(addr, member.ty));
            }
        }
    }

    let globals = ctx.symbols.load_global(name);
    if let Some(v) = globals.last() {
        return Some(v.clone());
    }

    if let Some(class_ty) = &code.current_class {
        if code.is_static_context() {
            if let Some(raw) = class_ty.name() {
                if lookup_member_gep(backend, ctx, class_ty, name).is_some() {
                    ctx.diagnostics.emit_error(
                        error_codes::NON_STATIC_IN_STATIC_CONTEXT,
                        format!("cannot use member `{}` of `{}` from a static function", name, raw),
                        span_of(token),
                    );
                    return None;
                }
            }
        }
    }

    if let Some(sty) = ctx.types.lookup_user_type(name) {
        return Some(RValue::rvalue(backend.const_null(backend_type_of(backend, &ctx.types, &sty)), sty));
    }

    ctx.diagnostics.emit_error(
        error_codes::UNDEFINED_VARIABLE,
        format!("undefined name `{}`", name),
        span_of(token),
    );
    None
}

struct Member {
    index: usize,
    ty: SType,
}

/// Looks a field up in a struct/class body (walking through an alias),
/// returning its storage index and type. Unions and enums never reach this
/// helper -- their members are addressed differently (§4.5 dispatches on
/// the user-type kind before calling in).
fn lookup_member_gep<B: Backend>(_backend: &mut B, ctx: &GlobalContext<B>, ty: &SType, name: &str) -> Option<Member> {
    let raw = ty.name()?;
    let entry = ctx.types.user_type_entry(raw)?;
    let body = entry.body.lock().ok()?;
    match &*body {
        UserTypeBody::Struct(s) => s.field_index(name).map(|(i, t)| Member { index: i, ty: t.clone() }),
        UserTypeBody::Class(c) => c.fields.field_index(name).map(|(i, t)| Member { index: i, ty: t.clone() }),
        _ => None,
    }
}

fn resolve_member<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    base: &Expr,
    member: &Token,
    load_rvalue: RvalueLoader<'_, B>,
) -> Option<RValue<B>> {
    let mut base_rv = resolve(backend, ctx, code, base, load_rvalue)?;

    // Auto-deref a chain of pointers until we reach the struct/class/union
    // itself: `p.field` on a `*Point` reads through the pointer the same
    // way `p@.field` would.
    while base_rv.ty.flags().contains(TypeFlags::POINTER) {
        let pointee = base_rv.ty.subtype().cloned()?;
        let loaded = backend.build_load(backend_type_of(backend, &ctx.types, &base_rv.ty), base_rv.value, "member.deref");
        base_rv = RValue::lvalue(loaded, pointee);
    }

    let raw = match base_rv.ty.name() {
        Some(n) => n.to_string(),
        None => {
            ctx.diagnostics.emit_error(
                error_codes::NOT_A_MEMBER_CONTAINER,
                "member access requires a struct, class, union, or enum value".to_string(),
                span_of(token),
            );
            return None;
        }
    };
    let entry = ctx.types.user_type_entry(&raw);
    let Some(entry) = entry else {
        ctx.diagnostics.emit_error(
            error_codes::NOT_A_MEMBER_CONTAINER,
            format!("`{}` has no members", raw),
            span_of(token),
        );
        return None;
    };
    let body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
    let is_union = matches!(&*body, UserTypeBody::Union(_));
    let field = match &*body {
        UserTypeBody::Struct(s) => s.field_index(member.text.as_ref()),
        UserTypeBody::Class(c) => c.fields.field_index(member.text.as_ref()),
        UserTypeBody::Union(u) => u
            .members
            .iter()
            .enumerate()
            .find(|(_, (n, _))| n == member.text.as_ref())
            .map(|(i, (_, t))| (i, t)),
        UserTypeBody::Enum(_) => None,
        _ => None,
    };
    let Some((index, field_ty)) = field else {
        ctx.diagnostics.emit_error(
            error_codes::UNDEFINED_MEMBER,
            format!("`{}` has no member `{}`", raw, member.text),
            span_of(member),
        );
        return None;
    };
    let field_ty = field_ty.clone();
    drop(body);

    if is_union {
        // Every union member shares the same storage address: no GEP, just
        // reinterpret the base address as the requested member's type.
        return Some(RValue::lvalue(base_rv.value, field_ty));
    }

    let be_base_ty = backend_type_of(backend, &ctx.types, &base_rv.ty);
    let idx_ty = backend.int_type(32);
    let zero = backend.const_int(idx_ty, 0);
    let idx = backend.const_int(idx_ty, index as i128);
    let addr = backend.build_gep(be_base_ty, base_rv.value, &[zero, idx], "member");
    Some(RValue::lvalue(addr, field_ty))
}

fn resolve_array_index<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    base: &Expr,
    index: &Expr,
    load_rvalue: RvalueLoader<'_, B>,
) -> Option<RValue<B>> {
    let base_rv = resolve(backend, ctx, code, base, load_rvalue)?;

    if !base_rv.ty.flags().is_sequence() && !base_rv.ty.flags().contains(TypeFlags::POINTER) {
        ctx.diagnostics.emit_error(
            error_codes::NOT_INDEXABLE,
            "`[]` requires an array, vec, or pointer operand".to_string(),
            span_of(token),
        );
        return None;
    }

    let mut index_rv = load_rvalue(backend, ctx, code, index)?;
    if !index_rv.ty.flags().contains(TypeFlags::INTEGER) {
        ctx.diagnostics.emit_error(
            error_codes::NON_INTEGER_INDEX,
            "array index must be an integer".to_string(),
            span_of(token),
        );
        return None;
    }
    let i64_ty = ctx.types.get_int(64, false).ok()?;
    if index_rv.ty != i64_ty {
        crate::cast::cast_to(backend, &ctx.types, &mut index_rv, &i64_ty, false).ok()?;
    }

    let elem_ty = base_rv.ty.subtype().cloned()?;
    let be_base_ty = backend_type_of(backend, &ctx.types, &base_rv.ty);

    let addr = if base_rv.ty.flags().is_sequence() {
        // Arrays and vecs are stored inline: `resolve` already gave us the
        // storage address, so a leading `0` selects the sequence object
        // itself and the second index selects the element.
        let idx_ty = backend.int_type(32);
        let zero = backend.const_int(idx_ty, 0);
        backend.build_gep(be_base_ty, base_rv.value, &[zero, index_rv.value], "index")
    } else {
        // A pointer variable's storage holds the pointer *value*, not the
        // pointee -- load it first, then step off the loaded address.
        let ptr_value = backend.build_load(be_base_ty, base_rv.value, "ptrbase");
        let be_elem_ty = backend_type_of(backend, &ctx.types, &elem_ty);
        backend.build_gep(be_elem_ty, ptr_value, &[index_rv.value], "index")
    };
    Some(RValue::lvalue(addr, elem_ty))
}

fn resolve_arrow_size<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    base: &ArrowBase,
    load_rvalue: RvalueLoader<'_, B>,
) -> Option<RValue<B>> {
    let ty = arrow_base_type(backend, ctx, code, token, base, load_rvalue)?;
    let bytes = ctx.types.alloc_size(&ty);
    let i64_t = ctx.types.get_int(64, false).ok()?;
    let be_i64 = backend.int_type(64);
    let value = backend.const_int(be_i64, bytes as i128);
    Some(RValue::rvalue(value, i64_t))
}

fn resolve_arrow_len<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    base: &ArrowBase,
    load_rvalue: RvalueLoader<'_, B>,
) -> Option<RValue<B>> {
    let ty = arrow_base_type(backend, ctx, code, token, base, load_rvalue)?;
    if !ty.flags().is_sequence() {
        ctx.diagnostics.emit_error(
            error_codes::NOT_INDEXABLE,
            "`->len` requires an array or vec type".to_string(),
            span_of(token),
        );
        return None;
    }
    let i64_t = ctx.types.get_int(64, false).ok()?;
    let be_i64 = backend.int_type(64);
    let value = backend.const_int(be_i64, ty.size() as i128);
    Some(RValue::rvalue(value, i64_t))
}

fn arrow_base_type<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    _token: &Token,
    base: &ArrowBase,
    load_rvalue: RvalueLoader<'_, B>,
) -> Option<SType> {
    match base {
        ArrowBase::Type(te) => crate::visitors::datatype::resolve(backend, ctx, te, &mut |_, ctx, raw, _, tok| {
            ctx.diagnostics.emit_error(error_codes::UNDEFINED_TYPE, format!("unknown type `{}`", raw), span_of(tok));
            None
        }),
        // `->size`/`->len` only need the operand's type, never its value, but
        // `expression::load` is the one place that knows how to type every
        // expression form (not just the lvalue ones `resolve` covers), so we
        // go through it rather than duplicating that dispatch here.
        ArrowBase::Value(expr) => load_rvalue(backend, ctx, code, expr).map(|rv| rv.ty),
    }
}

fn expr_token(expr: &Expr) -> &Token {
    match expr {
        Expr::IntLit { token, .. }
        | Expr::FloatLit { token, .. }
        | Expr::BoolLit { token, .. }
        | Expr::StringLit { token, .. }
        | Expr::NullLit { token }
        | Expr::Ident { token }
        | Expr::ArrayIndex { token, .. }
        | Expr::Member { token, .. }
        | Expr::Deref { token, .. }
        | Expr::AddrOf { token, .. }
        | Expr::ArrowSize { token, .. }
        | Expr::ArrowLen { token, .. }
        | Expr::ArrowAs { token, .. }
        | Expr::ArrowMut { token, .. }
        | Expr::Assign { token, .. }
        | Expr::CompoundAssign { token, .. }
        | Expr::Ternary { token, .. }
        | Expr::LogicalAnd { token, .. }
        | Expr::LogicalOr { token, .. }
        | Expr::NullCoalesce { token, .. }
        | Expr::Compare { token, .. }
        | Expr::Binary { token, .. }
        | Expr::Unary { token, .. }
        | Expr::IncDec { token, .. }
        | Expr::New { token, .. }
        | Expr::Call { token, .. }
        | Expr::MethodCall { token, .. }
        | Expr::Cast { token, .. } => token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::config::CoreOptions;

    fn no_loader<B: Backend>(
        _b: &mut B,
        _c: &mut GlobalContext<B>,
        _code: &CodeContext<B>,
        _e: &Expr,
    ) -> Option<RValue<B>> {
        None
    }

    #[test]
    fn resolves_local_variable() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let code = CodeContext::<MockBackend>::new();
        let i32_t = ctx.types.get_int(32, false).unwrap();
        let be_i32 = be.int_type(32);
        let slot = be.build_alloca(be_i32, "x");
        ctx.symbols.push_scope();
        ctx.symbols.store_local("x", RValue::lvalue(slot, i32_t.clone()), false, false);

        let token = Token::synthetic("x");
        let rv = resolve_ident(&mut be, &mut ctx, &code, &token).unwrap();
        assert_eq!(rv.ty, i32_t);
        assert!(rv.is_lvalue);
    }

    #[test]
    fn undefined_name_emits_diagnostic() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let code = CodeContext::<MockBackend>::new();
        let token = Token::synthetic("nope");
        assert!(resolve_ident(&mut be, &mut ctx, &code, &token).is_none());
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn struct_field_resolves_via_gep() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let code = CodeContext::<MockBackend>::new();
        ctx.types.create_struct("Point");
        let i32_t = ctx.types.get_int(32, false).unwrap();
        ctx.types
            .set_struct_body("Point", vec![("x".to_string(), i32_t.clone()), ("y".to_string(), i32_t.clone())])
            .unwrap();
        let point_t = ctx.types.lookup_user_type("Point").unwrap();
        let be_point_t = backend_type_of(&mut be, &ctx.types, &point_t);
        let slot = be.build_alloca(be_point_t, "p");
        ctx.symbols.push_scope();
        ctx.symbols.store_local("p", RValue::lvalue(slot, point_t), false, false);

        let base = Expr::Ident { token: Token::synthetic("p") };
        let member = Token::synthetic("y");
        let rv = resolve_member(&mut be, &mut ctx, &code, &Token::synthetic("."), &base, &member, &mut no_loader).unwrap();
        assert_eq!(rv.ty, i32_t);
    }

    #[test]
    fn array_index_out_of_sequence_type_is_rejected() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let code = CodeContext::<MockBackend>::new();
        let i32_t = ctx.types.get_int(32, false).unwrap();
        let be_i32 = be.int_type(32);
        let slot = be.build_alloca(be_i32, "x");
        ctx.symbols.push_scope();
        ctx.symbols.store_local("x", RValue::lvalue(slot, i32_t), false, false);

        let base = Expr::Ident { token: Token::synthetic("x") };
        let index = Expr::IntLit { token: Token::synthetic("0"), value: 0, width: 32, unsigned: false };
        let mut loader = |b: &mut MockBackend, c: &mut GlobalContext<MockBackend>, _code: &CodeContext<MockBackend>, e: &Expr| {
            if let Expr::IntLit { value, .. } = e {
                let i32_t = c.types.get_int(32, false).unwrap();
                let ty = b.int_type(32);
                Some(RValue::rvalue(b.const_int(ty, *value), i32_t))
            } else {
                None
            }
        };
        assert!(resolve_array_index(&mut be, &mut ctx, &code, &Token::synthetic("[]"), &base, &index, &mut loader).is_none());
    }
}
