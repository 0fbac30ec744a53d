//! Expression Visitor (§4.6): evaluates an `Expr` to an rvalue.
//!
//! Everything that is also an lvalue (`Ident`, `Member`, ...) goes through
//! the Variable Visitor first and then loads; everything else (literals,
//! operators, `new`, calls) is built directly here. `load` doubles as the
//! `RvalueLoader` the Variable Visitor calls back into for sub-expressions
//! that aren't themselves lvalues (an array index, an assignment's RHS).

use ember_ast::{Args, BinOp, CompoundAssignOp, Expr, IncDecOp, Token, TypeExpr};
use ember_diagnostics::error_codes;

use crate::backend::{Backend, FloatPredicate, IntBinOp, IntPredicate};
use crate::cast::{backend_type_of, cast_to};
use crate::context::{CodeContext, GlobalContext};
use crate::diag::span_of;
use crate::errors::CastError;
use crate::instructions::{build_binop, build_compare, build_inc_dec, build_unary};
use crate::overload::{resolve_call, OverloadError};
use crate::types::{SType, TypeFlags, UserTypeBody};
use crate::value::{RValue, SFunction};
use crate::visitors::{datatype, variable};

/// `load` cast to a plain function pointer, for passing to
/// `variable::resolve`'s `RvalueLoader` parameter without capturing
/// anything (a closure would work too, but a bare `fn` item makes the
/// "no cycle, just can't `use` each other's items" relationship between
/// this module and `variable` obvious at the call site).
fn as_loader<B: Backend>() -> fn(&mut B, &mut GlobalContext<B>, &CodeContext<B>, &Expr) -> Option<RValue<B>> {
    load
}

/// Evaluates `expr` to a value. Usable as the `variable::RvalueLoader` a
/// lvalue resolution needs for its own sub-expressions (an array index, the
/// right-hand side of an assignment).
pub fn load<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, code: &CodeContext<B>, expr: &Expr) -> Option<RValue<B>> {
    match expr {
        Expr::IntLit { value, width, unsigned, .. } => {
            let ty = match ctx.types.get_int(*width, *unsigned) {
                Ok(t) => t,
                Err(e) => {
                    ctx.diagnostics.emit_error(error_codes::UNDEFINED_TYPE, e.to_string(), span_of(expr.token()));
                    return None;
                }
            };
            let be_ty = backend.int_type(*width);
            Some(RValue::rvalue(backend.const_int(be_ty, *value), ty))
        }
        Expr::FloatLit { value, is_double, .. } => {
            let ty = ctx.types.get_float(*is_double);
            let be_ty = backend.float_type(*is_double);
            Some(RValue::rvalue(backend.const_float(be_ty, *value), ty))
        }
        Expr::BoolLit { value, .. } => {
            let ty = ctx.types.get_bool();
            let be_ty = backend.bool_type();
            Some(RValue::rvalue(backend.const_int(be_ty, if *value { 1 } else { 0 }), ty))
        }
        Expr::StringLit { value, .. } => Some(load_string_lit(backend, ctx, value)),
        Expr::NullLit { .. } => {
            let i8_t = ctx.types.get_int(8, true).ok()?;
            let ptr_t = ctx.types.get_pointer(i8_t);
            let be_ptr = backend_type_of(backend, &ctx.types, &ptr_t);
            Some(RValue::rvalue(backend.const_null(be_ptr), ptr_t))
        }

        Expr::Ident { .. } | Expr::ArrayIndex { .. } | Expr::Member { .. } | Expr::Deref { .. } | Expr::ArrowMut { .. } => {
            let mut loader = as_loader::<B>();
            let lv = variable::resolve(backend, ctx, code, expr, &mut loader)?;
            load_from_lvalue(backend, ctx, lv)
        }

        Expr::ArrowAs { token, base, target } => load_arrow_as(backend, ctx, code, token, base, target),

        Expr::ArrowSize { .. } | Expr::ArrowLen { .. } => {
            let mut loader = as_loader::<B>();
            variable::resolve(backend, ctx, code, expr, &mut loader)
        }

        Expr::AddrOf { base, .. } => {
            let mut loader = as_loader::<B>();
            let lv = variable::resolve(backend, ctx, code, base, &mut loader)?;
            let ptr_t = ctx.types.get_pointer(lv.ty.clone());
            Some(RValue::rvalue(lv.value, ptr_t))
        }

        Expr::Assign { token, target, value } => load_assign(backend, ctx, code, token, target, value),
        Expr::CompoundAssign { token, op, target, value } => {
            load_compound_assign(backend, ctx, code, token, *op, target, value)
        }

        Expr::Ternary { token, cond, then_val, else_val } => load_ternary(backend, ctx, code, token, cond, then_val, else_val),
        Expr::LogicalAnd { token, lhs, rhs } => load_logical(backend, ctx, code, token, lhs, rhs, true),
        Expr::LogicalOr { token, lhs, rhs } => load_logical(backend, ctx, code, token, lhs, rhs, false),
        Expr::NullCoalesce { token, lhs, rhs } => load_null_coalesce(backend, ctx, code, token, lhs, rhs),

        Expr::Compare { token, op, lhs, rhs } => {
            let l = load(backend, ctx, code, lhs)?;
            let r = load(backend, ctx, code, rhs)?;
            match build_compare(backend, &ctx.types, *op, l, r, ctx.options.int32_min_promote) {
                Ok(v) => Some(v),
                Err(e) => {
                    emit_str_error(ctx, token, e);
                    None
                }
            }
        }
        Expr::Binary { token, op, lhs, rhs } => {
            let l = load(backend, ctx, code, lhs)?;
            let r = load(backend, ctx, code, rhs)?;
            match build_binop(backend, &ctx.types, *op, l, r, ctx.options.int32_min_promote) {
                Ok(v) => Some(v),
                Err(e) => {
                    emit_str_error(ctx, token, e);
                    None
                }
            }
        }
        Expr::Unary { token, op, operand } => {
            let v = load(backend, ctx, code, operand)?;
            match build_unary(backend, &ctx.types, *op, v, ctx.options.int32_min_promote) {
                Ok(v) => Some(v),
                Err(e) => {
                    emit_str_error(ctx, token, e);
                    None
                }
            }
        }

        Expr::IncDec { token, op, is_prefix, operand } => load_inc_dec(backend, ctx, code, token, *op, *is_prefix, operand),

        Expr::New { token, ty, count, args } => load_new(backend, ctx, code, token, ty, count, args),

        Expr::Call { token, callee, args } => load_call(backend, ctx, code, token, callee, args),
        Expr::MethodCall { token, base, method, args } => load_method_call(backend, ctx, code, token, base, method, args),

        Expr::Cast { token, value, target } => load_cast(backend, ctx, code, token, value, target),
    }
}

/// Turns an lvalue into the value stored at it. A value that already isn't
/// an lvalue (a declared function, looked up as a plain name) or whose type
/// is still forward-declared just passes through unchanged -- there is
/// nothing sized to load yet.
fn load_from_lvalue<B: Backend>(backend: &mut B, ctx: &GlobalContext<B>, lv: RValue<B>) -> Option<RValue<B>> {
    if !lv.is_lvalue || lv.ty.flags().contains(TypeFlags::FUNCTION) || lv.ty.is_opaque() {
        return Some(RValue::rvalue(lv.value, lv.ty));
    }
    let be_ty = backend_type_of(backend, &ctx.types, &lv.ty);
    let loaded = backend.build_load(be_ty, lv.value, "load");
    Some(RValue::rvalue(loaded, lv.ty))
}

fn load_string_lit<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, s: &str) -> RValue<B> {
    let i8_t = ctx.types.get_int(8, true).expect("i8 is a supported width");
    let be_i8 = backend.int_type(8);
    let mut bytes: Vec<i128> = s.bytes().map(|b| b as i128).collect();
    bytes.push(0);
    let values: Vec<B::Value> = bytes.iter().map(|b| backend.const_int(be_i8, *b)).collect();
    let data = backend.const_data_array(be_i8, &values);
    let arr_t = ctx
        .types
        .get_array(i8_t.clone(), bytes.len() as u64)
        .unwrap_or_else(|_| ctx.types.get_array(i8_t.clone(), 0).expect("zero-length array is always valid"));
    let be_arr_t = backend_type_of(backend, &ctx.types, &arr_t);
    let global = backend.add_global(be_arr_t, "str", Some(data));
    let ptr_t = ctx.types.get_pointer(i8_t);
    RValue::rvalue(global, ptr_t)
}

fn load_arrow_as<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    base: &Expr,
    target: &TypeExpr,
) -> Option<RValue<B>> {
    let mut value = load(backend, ctx, code, base)?;
    let target_ty = datatype::resolve(backend, ctx, target, &mut |_, c: &mut GlobalContext<B>, raw, _, tok| {
        c.diagnostics.emit_error(error_codes::UNDEFINED_TYPE, format!("unknown type `{}` in `->as` cast", raw), span_of(tok));
        None
    })?;
    match cast_to(backend, &ctx.types, &mut value, &target_ty, true) {
        Ok(()) => Some(value),
        Err(e) => {
            emit_cast_error(ctx, token, e);
            None
        }
    }
}

fn load_assign<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    target: &Expr,
    value: &Expr,
) -> Option<RValue<B>> {
    let mut loader = as_loader::<B>();
    let target_lv = variable::resolve(backend, ctx, code, target, &mut loader)?;
    if target_lv.ty.is_const() {
        ctx.diagnostics.emit_error(
            error_codes::NOT_AN_LVALUE,
            "cannot assign to a const-qualified value".to_string(),
            span_of(token),
        );
        return None;
    }
    let mut rhs = load(backend, ctx, code, value)?;
    if let Err(e) = cast_to(backend, &ctx.types, &mut rhs, &target_lv.ty, false) {
        emit_cast_error(ctx, token, e);
        return None;
    }
    backend.build_store(target_lv.value, rhs.value);
    Some(RValue::rvalue(rhs.value, target_lv.ty))
}

fn load_compound_assign<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    op: CompoundAssignOp,
    target: &Expr,
    value: &Expr,
) -> Option<RValue<B>> {
    let mut loader = as_loader::<B>();
    let target_lv = variable::resolve(backend, ctx, code, target, &mut loader)?;
    if target_lv.ty.is_const() {
        ctx.diagnostics.emit_error(
            error_codes::NOT_AN_LVALUE,
            "cannot assign to a const-qualified value".to_string(),
            span_of(token),
        );
        return None;
    }

    if op == CompoundAssignOp::NullCoalesce {
        return load_null_coalesce_assign(backend, ctx, code, token, target_lv, value);
    }

    let be_target_ty = backend_type_of(backend, &ctx.types, &target_lv.ty);
    let current = backend.build_load(be_target_ty, target_lv.value, "compound.load");
    let current_rv = RValue::rvalue(current, target_lv.ty.clone());
    let rhs = load(backend, ctx, code, value)?;

    let bin_op = match op {
        CompoundAssignOp::Add => BinOp::Add,
        CompoundAssignOp::Sub => BinOp::Sub,
        CompoundAssignOp::Mul => BinOp::Mul,
        CompoundAssignOp::Div => BinOp::Div,
        CompoundAssignOp::Mod => BinOp::Mod,
        CompoundAssignOp::Shl => BinOp::Shl,
        CompoundAssignOp::Shr => BinOp::Shr,
        CompoundAssignOp::BitAnd => BinOp::BitAnd,
        CompoundAssignOp::BitOr => BinOp::BitOr,
        CompoundAssignOp::BitXor => BinOp::BitXor,
        CompoundAssignOp::NullCoalesce => unreachable!("handled above"),
    };

    let mut combined = match build_binop(backend, &ctx.types, bin_op, current_rv, rhs, ctx.options.int32_min_promote) {
        Ok(v) => v,
        Err(e) => {
            emit_str_error(ctx, token, e);
            return None;
        }
    };
    if let Err(e) = cast_to(backend, &ctx.types, &mut combined, &target_lv.ty, false) {
        emit_cast_error(ctx, token, e);
        return None;
    }
    backend.build_store(target_lv.value, combined.value);
    Some(RValue::rvalue(combined.value, target_lv.ty))
}

/// `target ??= value`: only stores when `target` is currently falsy
/// (null/zero); otherwise `target` keeps its value. Lowered as a two-way
/// branch and a phi rather than a plain conditional store, so the stored
/// value and the left-in-place value come back through the same merge
/// point the rest of `load` expects a result from.
fn load_null_coalesce_assign<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    target_lv: RValue<B>,
    value: &Expr,
) -> Option<RValue<B>> {
    let function = code.current_function.as_ref()?.function;
    let be_target_ty = backend_type_of(backend, &ctx.types, &target_lv.ty);
    let current = backend.build_load(be_target_ty, target_lv.value, "coalesce.load");
    let is_falsy = falsy_test(backend, ctx, &target_lv.ty, current);

    let store_block = backend.append_block(function, "coalesce.store");
    let skip_block = backend.append_block(function, "coalesce.skip");
    let merge_block = backend.append_block(function, "coalesce.merge");
    backend.build_cond_br(is_falsy, store_block, skip_block);

    backend.position_at_end(store_block);
    let mut rhs = load(backend, ctx, code, value)?;
    if let Err(e) = cast_to(backend, &ctx.types, &mut rhs, &target_lv.ty, false) {
        emit_cast_error(ctx, token, e);
        return None;
    }
    backend.build_store(target_lv.value, rhs.value);
    let store_end = backend.current_block()?;
    backend.build_br(merge_block);

    backend.position_at_end(skip_block);
    backend.build_br(merge_block);

    backend.position_at_end(merge_block);
    let phi = backend.build_phi(be_target_ty, &[(rhs.value, store_end), (current, skip_block)], "coalesce.result");
    Some(RValue::rvalue(phi, target_lv.ty))
}

fn falsy_test<B: Backend>(backend: &mut B, ctx: &GlobalContext<B>, ty: &SType, value: B::Value) -> B::Value {
    let be_ty = backend_type_of(backend, &ctx.types, ty);
    if ty.flags().contains(TypeFlags::FLOATING) {
        let zero = backend.const_float(be_ty, 0.0);
        backend.build_float_compare(FloatPredicate::OEq, value, zero, "falsy")
    } else if ty.flags().contains(TypeFlags::POINTER) {
        let zero = backend.const_null(be_ty);
        backend.build_int_compare(IntPredicate::Eq, value, zero, "falsy")
    } else {
        let zero = backend.const_int(be_ty, 0);
        backend.build_int_compare(IntPredicate::Eq, value, zero, "falsy")
    }
}

fn cast_to_bool<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, token: &Token, rv: &mut RValue<B>) -> Option<()> {
    let bool_t = ctx.types.get_bool();
    if rv.ty == bool_t {
        return Some(());
    }
    match cast_to(backend, &ctx.types, rv, &bool_t, false) {
        Ok(()) => Some(()),
        Err(e) => {
            emit_cast_error(ctx, token, e);
            None
        }
    }
}

/// Literals and bare names are cheap enough to evaluate twice (once per
/// ternary/`??` arm) without the diamond-plus-phi machinery; anything else
/// gets the full short-circuiting lowering.
fn is_simple_expr(e: &Expr) -> bool {
    matches!(
        e,
        Expr::IntLit { .. } | Expr::FloatLit { .. } | Expr::BoolLit { .. } | Expr::StringLit { .. } | Expr::NullLit { .. } | Expr::Ident { .. }
    )
}

fn load_ternary<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    cond: &Expr,
    then_val: &Expr,
    else_val: &Expr,
) -> Option<RValue<B>> {
    let mut cond_rv = load(backend, ctx, code, cond)?;
    cast_to_bool(backend, ctx, token, &mut cond_rv)?;

    if is_simple_expr(then_val) && is_simple_expr(else_val) {
        let then_rv = load(backend, ctx, code, then_val)?;
        let else_rv = load(backend, ctx, code, else_val)?;
        if then_rv.ty != else_rv.ty {
            ctx.diagnostics.emit_error(error_codes::TYPE_MISMATCH, "ternary operands must have the same type".to_string(), span_of(token));
            return None;
        }
        let result = backend.build_select(cond_rv.value, then_rv.value, else_rv.value, "ternary");
        return Some(RValue::rvalue(result, then_rv.ty));
    }

    let function = code.current_function.as_ref()?.function;
    let then_block = backend.append_block(function, "ternary.then");
    let else_block = backend.append_block(function, "ternary.else");
    let merge_block = backend.append_block(function, "ternary.merge");
    backend.build_cond_br(cond_rv.value, then_block, else_block);

    backend.position_at_end(then_block);
    let then_rv = load(backend, ctx, code, then_val)?;
    let then_end = backend.current_block()?;
    backend.build_br(merge_block);

    backend.position_at_end(else_block);
    let else_rv = load(backend, ctx, code, else_val)?;
    let else_end = backend.current_block()?;
    backend.build_br(merge_block);

    if then_rv.ty != else_rv.ty {
        ctx.diagnostics.emit_error(error_codes::TYPE_MISMATCH, "ternary operands must have the same type".to_string(), span_of(token));
        return None;
    }

    backend.position_at_end(merge_block);
    let be_ty = backend_type_of(backend, &ctx.types, &then_rv.ty);
    let phi = backend.build_phi(be_ty, &[(then_rv.value, then_end), (else_rv.value, else_end)], "ternary.result");
    Some(RValue::rvalue(phi, then_rv.ty))
}

fn load_logical<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    lhs: &Expr,
    rhs: &Expr,
    is_and: bool,
) -> Option<RValue<B>> {
    let mut lhs_rv = load(backend, ctx, code, lhs)?;
    cast_to_bool(backend, ctx, token, &mut lhs_rv)?;
    let lhs_end = backend.current_block()?;

    let function = code.current_function.as_ref()?.function;
    let rhs_block = backend.append_block(function, if is_and { "and.rhs" } else { "or.rhs" });
    let merge_block = backend.append_block(function, if is_and { "and.merge" } else { "or.merge" });

    if is_and {
        backend.build_cond_br(lhs_rv.value, rhs_block, merge_block);
    } else {
        backend.build_cond_br(lhs_rv.value, merge_block, rhs_block);
    }

    backend.position_at_end(rhs_block);
    let mut rhs_rv = load(backend, ctx, code, rhs)?;
    cast_to_bool(backend, ctx, token, &mut rhs_rv)?;
    let rhs_end = backend.current_block()?;
    backend.build_br(merge_block);

    backend.position_at_end(merge_block);
    let bool_t = ctx.types.get_bool();
    let be_bool = backend_type_of(backend, &ctx.types, &bool_t);
    let short_circuit_value = backend.const_int(be_bool, if is_and { 0 } else { 1 });
    let phi = backend.build_phi(be_bool, &[(short_circuit_value, lhs_end), (rhs_rv.value, rhs_end)], "logical.result");
    Some(RValue::rvalue(phi, bool_t))
}

fn load_null_coalesce<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    lhs: &Expr,
    rhs: &Expr,
) -> Option<RValue<B>> {
    let lhs_rv = load(backend, ctx, code, lhs)?;
    let falsy = falsy_test(backend, ctx, &lhs_rv.ty, lhs_rv.value);

    if is_simple_expr(rhs) {
        let rhs_rv = load(backend, ctx, code, rhs)?;
        if rhs_rv.ty != lhs_rv.ty {
            ctx.diagnostics.emit_error(error_codes::TYPE_MISMATCH, "`??` operands must have the same type".to_string(), span_of(token));
            return None;
        }
        let result = backend.build_select(falsy, rhs_rv.value, lhs_rv.value, "nullcoalesce");
        return Some(RValue::rvalue(result, lhs_rv.ty));
    }

    let function = code.current_function.as_ref()?.function;
    let rhs_block = backend.append_block(function, "nc.rhs");
    let merge_block = backend.append_block(function, "nc.merge");
    let lhs_end = backend.current_block()?;
    backend.build_cond_br(falsy, rhs_block, merge_block);

    backend.position_at_end(rhs_block);
    let rhs_rv = load(backend, ctx, code, rhs)?;
    if rhs_rv.ty != lhs_rv.ty {
        ctx.diagnostics.emit_error(error_codes::TYPE_MISMATCH, "`??` operands must have the same type".to_string(), span_of(token));
        return None;
    }
    let rhs_end = backend.current_block()?;
    backend.build_br(merge_block);

    backend.position_at_end(merge_block);
    let be_ty = backend_type_of(backend, &ctx.types, &lhs_rv.ty);
    let phi = backend.build_phi(be_ty, &[(lhs_rv.value, lhs_end), (rhs_rv.value, rhs_end)], "nc.result");
    Some(RValue::rvalue(phi, lhs_rv.ty))
}

fn load_inc_dec<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    op: IncDecOp,
    is_prefix: bool,
    operand: &Expr,
) -> Option<RValue<B>> {
    let mut loader = as_loader::<B>();
    let ptr = variable::resolve(backend, ctx, code, operand, &mut loader)?;
    let value_ty = ptr.ty.clone();
    let be_ty = backend_type_of(backend, &ctx.types, &value_ty);
    match build_inc_dec(backend, op, !is_prefix, &ptr, &value_ty, be_ty) {
        Ok(v) => Some(v),
        Err(e) => {
            emit_str_error(ctx, token, e);
            None
        }
    }
}

fn load_new<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    ty_expr: &TypeExpr,
    count: &Option<Box<Expr>>,
    args: &Args,
) -> Option<RValue<B>> {
    let elem_ty = datatype::resolve(backend, ctx, ty_expr, &mut |_, c: &mut GlobalContext<B>, raw, _, tok| {
        c.diagnostics.emit_error(error_codes::UNDEFINED_TYPE, format!("unknown type `{}`", raw), span_of(tok));
        None
    })?;

    let mut arg_values = Vec::with_capacity(args.len());
    for a in args.iter() {
        arg_values.push(load(backend, ctx, code, a)?);
    }

    let malloc = ctx.get_or_declare_malloc(backend);
    let ptr_t = ctx.types.get_pointer(elem_ty.clone());
    let be_ptr_t = backend_type_of(backend, &ctx.types, &ptr_t);

    match count {
        None => {
            let (size_value, _) = datatype::new_size(backend, ctx, &elem_ty, 1);
            let raw_ptr = backend.build_call(malloc.function, &[size_value], "new.raw");
            let ptr = backend.build_bitcast(raw_ptr, be_ptr_t, "new.ptr");
            run_constructor(backend, ctx, token, &elem_ty, ptr, arg_values)?;
            Some(RValue::rvalue(ptr, ptr_t))
        }
        Some(count_expr) => {
            let be_elem_t = backend_type_of(backend, &ctx.types, &elem_ty);
            let (size_value, count_value) = new_size_dynamic(backend, ctx, code, &elem_ty, count_expr)?;
            let raw_ptr = backend.build_call(malloc.function, &[size_value], "new.raw");
            let start = backend.build_bitcast(raw_ptr, be_ptr_t, "new.arr.start");

            let function = code.current_function.as_ref()?.function;
            let cond_block = backend.append_block(function, "new.arr.cond");
            let body_block = backend.append_block(function, "new.arr.body");
            let end_block = backend.append_block(function, "new.arr.end");

            let be_i64 = backend.int_type(64);
            let idx_slot = backend.build_alloca(be_i64, "new.arr.idx");
            let zero = backend.const_int(be_i64, 0);
            backend.build_store(idx_slot, zero);
            backend.build_br(cond_block);

            backend.position_at_end(cond_block);
            let idx_val = backend.build_load(be_i64, idx_slot, "new.arr.idx.val");
            let keep_going = backend.build_int_compare(IntPredicate::SLt, idx_val, count_value, "new.arr.test");
            backend.build_cond_br(keep_going, body_block, end_block);

            backend.position_at_end(body_block);
            let elem_ptr = backend.build_gep(be_elem_t, start, &[idx_val], "new.arr.elem");
            run_constructor(backend, ctx, token, &elem_ty, elem_ptr, arg_values.clone())?;
            let one = backend.const_int(be_i64, 1);
            let next = backend.build_int_binop(IntBinOp::Add, idx_val, one, "new.arr.next");
            backend.build_store(idx_slot, next);
            backend.build_br(cond_block);

            backend.position_at_end(end_block);
            Some(RValue::rvalue(start, ptr_t))
        }
    }
}

/// `sizeBytes`/`count` for a `new T[n]` whose `n` isn't a compile-time
/// constant: falls back to `datatype::new_size` (which only takes an
/// already-known `u64`) when the count folds to a literal, otherwise
/// computes `elemSize * n` at run time.
fn new_size_dynamic<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    elem_ty: &SType,
    count_expr: &Expr,
) -> Option<(B::Value, B::Value)> {
    if let Expr::IntLit { value, .. } = count_expr {
        if let Ok(n) = u64::try_from(*value) {
            return Some(datatype::new_size(backend, ctx, elem_ty, n));
        }
    }
    let mut count_rv = load(backend, ctx, code, count_expr)?;
    let i64_t = ctx.types.get_int(64, false).ok()?;
    if count_rv.ty != i64_t {
        cast_to(backend, &ctx.types, &mut count_rv, &i64_t, false).ok()?;
    }
    let elem_bytes = ctx.types.alloc_size(elem_ty).max(1);
    let be_i64 = backend.int_type(64);
    let elem_bytes_v = backend.const_int(be_i64, elem_bytes as i128);
    let size_v = backend.build_int_binop(IntBinOp::Mul, elem_bytes_v, count_rv.value, "new.arr.size");
    Some((size_v, count_rv.value))
}

/// Runs `elem_ty`'s best-matching `this(ptr, args...)` constructor overload
/// against `ptr`, per §4.10. A type with no declared constructor is left
/// zero-initialized by `malloc`'s raw memory unless the caller passed
/// arguments it has nowhere to go.
pub(crate) fn run_constructor<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    token: &Token,
    elem_ty: &SType,
    ptr: B::Value,
    args: Vec<RValue<B>>,
) -> Option<()> {
    let Some(raw) = elem_ty.name().map(str::to_string) else {
        if !args.is_empty() {
            ctx.diagnostics.emit_error(
                error_codes::ARGUMENT_COUNT,
                "this type has no constructor to pass arguments to".to_string(),
                span_of(token),
            );
            return None;
        }
        return Some(());
    };
    let Some(entry) = ctx.types.user_type_entry(&raw) else { return Some(()) };
    let body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
    let ctor_mangled = match &*body {
        UserTypeBody::Class(c) => c.constructors().first().map(|s| s.mangled.clone()),
        _ => None,
    };
    drop(body);
    let Some(mangled) = ctor_mangled else {
        if !args.is_empty() {
            ctx.diagnostics.emit_error(error_codes::ARGUMENT_COUNT, format!("`{}` has no constructor", raw), span_of(token));
            return None;
        }
        return Some(());
    };
    let candidates = ctx.candidates(&mangled).to_vec();
    let (chosen, casted_args) = resolve_and_cast(backend, ctx, token, &candidates, args)?;
    let mut call_args = vec![ptr];
    call_args.extend(casted_args.iter().map(|a| a.value));
    backend.build_call(chosen.function, &call_args, "ctor.call");
    Some(())
}

/// Runs `value`'s destructor (if its type declares one), passing its
/// storage address as `this`. Used by `Block`/`Delete`/`Return` statement
/// handling when a destructable local goes out of scope (§4.9/§4.12).
pub(crate) fn run_destructor<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, value: &RValue<B>) -> Option<()> {
    let Some(raw) = value.ty.name().map(str::to_string) else { return Some(()) };
    let Some(entry) = ctx.types.user_type_entry(&raw) else { return Some(()) };
    let body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
    let dtor_mangled = match &*body {
        UserTypeBody::Class(c) => c.destructor().map(|s| s.mangled.clone()),
        _ => None,
    };
    drop(body);
    let Some(mangled) = dtor_mangled else { return Some(()) };
    let candidates = ctx.candidates(&mangled);
    let Some(dtor) = candidates.first().cloned() else { return Some(()) };
    backend.build_call(dtor.function, &[value.value], "dtor.call");
    Some(())
}

fn load_call<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    callee: &Token,
    args: &Args,
) -> Option<RValue<B>> {
    let name = callee.text.as_ref();

    let mut arg_values = Vec::with_capacity(args.len());
    for a in args.iter() {
        arg_values.push(load(backend, ctx, code, a)?);
    }

    if let Some(this_ty) = &code.this_type {
        if let Some(raw) = this_ty.name() {
            let raw = raw.to_string();
            if let Some(entry) = ctx.types.user_type_entry(&raw) {
                let body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
                let mangled = match &*body {
                    UserTypeBody::Class(c) if !c.overloads(name).is_empty() => Some(c.overloads(name)[0].mangled.clone()),
                    _ => None,
                };
                drop(body);
                if let Some(mangled) = mangled {
                    let candidates = ctx.candidates(&mangled).to_vec();
                    let (chosen, casted) = resolve_and_cast(backend, ctx, token, &candidates, arg_values)?;
                    let this_rv = ctx.symbols.load_locals_only("this");
                    let this_ptr = this_rv.last()?.value;
                    let mut call_args = vec![this_ptr];
                    call_args.extend(casted.iter().map(|a| a.value));
                    let result = backend.build_call(chosen.function, &call_args, "call");
                    return Some(RValue::rvalue(result, chosen.ty.clone()));
                }
            }
        }
    }

    let candidates = ctx.candidates(name).to_vec();
    if !candidates.is_empty() {
        let (chosen, casted) = resolve_and_cast(backend, ctx, token, &candidates, arg_values)?;
        let call_args: Vec<B::Value> = casted.iter().map(|a| a.value).collect();
        let result = backend.build_call(chosen.function, &call_args, "call");
        return Some(RValue::rvalue(result, chosen.ty.clone()));
    }

    ctx.diagnostics.emit_error(error_codes::UNDEFINED_FUNCTION, format!("undefined function `{}`", name), span_of(token));
    None
}

fn load_method_call<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    base: &Expr,
    method: &Token,
    args: &Args,
) -> Option<RValue<B>> {
    let mut loader = as_loader::<B>();
    let mut base_rv = variable::resolve(backend, ctx, code, base, &mut loader)?;

    while base_rv.ty.flags().contains(TypeFlags::POINTER) {
        let pointee = base_rv.ty.subtype().cloned()?;
        let be_ty = backend_type_of(backend, &ctx.types, &base_rv.ty);
        let loaded = backend.build_load(be_ty, base_rv.value, "methodcall.deref");
        base_rv = RValue::lvalue(loaded, pointee);
    }

    let mut arg_values = Vec::with_capacity(args.len());
    for a in args.iter() {
        arg_values.push(load(backend, ctx, code, a)?);
    }

    let Some(raw) = base_rv.ty.name().map(str::to_string) else {
        ctx.diagnostics.emit_error(
            error_codes::NOT_A_MEMBER_CONTAINER,
            "method call requires a struct, class, union, or enum value".to_string(),
            span_of(token),
        );
        return None;
    };
    let Some(entry) = ctx.types.user_type_entry(&raw) else {
        ctx.diagnostics.emit_error(error_codes::NOT_A_MEMBER_CONTAINER, format!("`{}` has no methods", raw), span_of(token));
        return None;
    };
    let method_name = method.text.as_ref();
    let body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
    let class = match &*body {
        UserTypeBody::Class(c) => Some((c.overloads(method_name).to_vec(), c.fields.field_index(method_name).map(|(i, t)| (i, t.clone())))),
        _ => None,
    };
    drop(body);

    let Some((overloads, field)) = class else {
        ctx.diagnostics.emit_error(error_codes::NOT_A_MEMBER_CONTAINER, format!("`{}` has no methods", raw), span_of(token));
        return None;
    };

    if overloads.is_empty() {
        match field {
            Some((_, field_ty)) if field_ty.flags().contains(TypeFlags::FUNCTION) => {
                ctx.diagnostics.emit_error(
                    error_codes::UNDEFINED_MEMBER,
                    "calling a function-typed field indirectly is not supported".to_string(),
                    span_of(method),
                );
            }
            _ => {
                ctx.diagnostics.emit_error(error_codes::UNDEFINED_MEMBER, format!("`{}` has no method `{}`", raw, method_name), span_of(method));
            }
        }
        return None;
    }

    let mangled = overloads[0].mangled.clone();
    let candidates = ctx.candidates(&mangled).to_vec();
    let (chosen, casted) = resolve_and_cast(backend, ctx, token, &candidates, arg_values)?;
    let mut call_args = vec![base_rv.value];
    call_args.extend(casted.iter().map(|a| a.value));
    let result = backend.build_call(chosen.function, &call_args, "methodcall");
    Some(RValue::rvalue(result, chosen.ty.clone()))
}

fn load_cast<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &Token,
    value: &Expr,
    target: &TypeExpr,
) -> Option<RValue<B>> {
    let mut rv = load(backend, ctx, code, value)?;
    let target_ty = datatype::resolve(backend, ctx, target, &mut |_, c: &mut GlobalContext<B>, raw, _, tok| {
        c.diagnostics.emit_error(error_codes::UNDEFINED_TYPE, format!("unknown type `{}`", raw), span_of(tok));
        None
    })?;
    match cast_to(backend, &ctx.types, &mut rv, &target_ty, true) {
        Ok(()) => Some(rv),
        Err(e) => {
            emit_cast_error(ctx, token, e);
            None
        }
    }
}

/// §4.9's `CallFunction`: resolves the overload and casts every argument to
/// its chosen parameter type. Shared by free-function calls, method calls
/// and constructor invocation -- they differ only in how the candidate set
/// and the implicit `this`/`ptr` argument (if any) are assembled.
fn resolve_and_cast<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    token: &Token,
    candidates: &[SFunction<B>],
    mut args: Vec<RValue<B>>,
) -> Option<(SFunction<B>, Vec<RValue<B>>)> {
    if candidates.is_empty() {
        ctx.diagnostics.emit_error(error_codes::UNDEFINED_FUNCTION, "no matching function".to_string(), span_of(token));
        return None;
    }
    let arg_types: Vec<SType> = args.iter().map(|a| a.ty.clone()).collect();
    match resolve_call(&ctx.types, candidates, &arg_types) {
        Ok(idx) => {
            let chosen = candidates[idx].clone();
            for (arg, param_ty) in args.iter_mut().zip(chosen.param_types.iter()) {
                if let Err(e) = cast_to(backend, &ctx.types, arg, param_ty, false) {
                    emit_cast_error(ctx, token, e);
                    return None;
                }
            }
            Some((chosen, args))
        }
        Err(OverloadError::ArityMismatch) => {
            ctx.diagnostics.emit_error(error_codes::ARGUMENT_COUNT, "argument count for this call is invalid".to_string(), span_of(token));
            None
        }
        Err(OverloadError::Ambiguous(indices)) => {
            let mut msg = "call is ambiguous between:".to_string();
            for i in indices {
                msg.push_str(&format!("\n  candidate `{}`", candidates[i].mangled_name));
            }
            ctx.diagnostics.emit_error(error_codes::AMBIGUOUS_OVERLOAD, msg, span_of(token));
            None
        }
    }
}

fn emit_str_error<B: Backend>(ctx: &mut GlobalContext<B>, token: &Token, msg: &'static str) {
    ctx.diagnostics.emit_error(error_codes::TYPE_MISMATCH, msg.to_string(), span_of(token));
}

fn emit_cast_error<B: Backend>(ctx: &mut GlobalContext<B>, token: &Token, err: CastError) {
    let code = match &err {
        CastError::CompositeCast { .. } => error_codes::COMPOSITE_CAST,
        CastError::PointerCastPolicy { .. } => error_codes::POINTER_CAST_POLICY,
        CastError::NonPointerToPointer(_) => error_codes::NON_POINTER_TO_POINTER,
        CastError::VecSizeMismatch { .. } => error_codes::VEC_SIZE_MISMATCH,
        CastError::CastToEnum(_) => error_codes::COMPOSITE_CAST,
    };
    ctx.diagnostics.emit_error(code, err.to_string(), span_of(token));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, Op};
    use crate::config::CoreOptions;

    fn setup() -> (MockBackend, GlobalContext<MockBackend>, CodeContext<MockBackend>) {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let i32_t = ctx.types.get_int(32, false).unwrap();
        let be_i32 = be.int_type(32);
        let fn_ty = be.function_type(be_i32, &[]);
        let function = be.add_function("main", fn_ty);
        let entry = be.append_block(function, "entry");
        be.position_at_end(entry);
        let sf = SFunction::new(function, i32_t, "main".to_string(), vec![], false);
        let mut code = CodeContext::<MockBackend>::new();
        code.current_function = Some(sf);
        code.current_block = Some(entry);
        (be, ctx, code)
    }

    fn int_lit(v: i128) -> Expr {
        Expr::IntLit { token: Token::synthetic(v.to_string()), value: v, width: 32, unsigned: false }
    }

    #[test]
    fn int_literal_loads_as_rvalue() {
        let (mut be, mut ctx, code) = setup();
        let rv = load(&mut be, &mut ctx, &code, &int_lit(7)).unwrap();
        assert!(!rv.is_lvalue);
        assert_eq!(rv.ty.size(), 32);
    }

    #[test]
    fn binary_add_dispatches_without_diagnostics() {
        let (mut be, mut ctx, code) = setup();
        let expr = Expr::Binary {
            token: Token::synthetic("+"),
            op: BinOp::Add,
            lhs: Box::new(int_lit(1)),
            rhs: Box::new(int_lit(2)),
        };
        let rv = load(&mut be, &mut ctx, &code, &expr).unwrap();
        assert!(rv.ty.flags().contains(TypeFlags::INTEGER));
        assert!(!ctx.diagnostics.has_errors());
    }

    #[test]
    fn assign_to_const_lvalue_is_rejected() {
        let (mut be, mut ctx, code) = setup();
        let i32_t = ctx.types.get_int(32, false).unwrap();
        let const_t = ctx.types.get_const(i32_t);
        let be_i32 = be.int_type(32);
        let slot = be.build_alloca(be_i32, "x");
        ctx.symbols.push_scope();
        ctx.symbols.store_local("x", RValue::lvalue(slot, const_t), false, false);

        let expr = Expr::Assign {
            token: Token::synthetic("="),
            target: Box::new(Expr::Ident { token: Token::synthetic("x") }),
            value: Box::new(int_lit(1)),
        };
        assert!(load(&mut be, &mut ctx, &code, &expr).is_none());
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn ternary_with_simple_arms_uses_select_not_branches() {
        let (mut be, mut ctx, code) = setup();
        let expr = Expr::Ternary {
            token: Token::synthetic("?"),
            cond: Box::new(Expr::BoolLit { token: Token::synthetic("true"), value: true }),
            then_val: Box::new(int_lit(1)),
            else_val: Box::new(int_lit(2)),
        };
        let before = be.ops.len();
        let rv = load(&mut be, &mut ctx, &code, &expr).unwrap();
        assert!(!rv.is_lvalue);
        assert!(!be.ops[before..].iter().any(|op| matches!(op, Op::AppendBlock { .. })));
    }

    #[test]
    fn logical_and_with_complex_rhs_builds_short_circuit_blocks() {
        let (mut be, mut ctx, code) = setup();
        let rhs = Expr::Binary {
            token: Token::synthetic("+"),
            op: BinOp::Add,
            lhs: Box::new(int_lit(1)),
            rhs: Box::new(int_lit(2)),
        };
        let expr = Expr::LogicalAnd {
            token: Token::synthetic("&&"),
            lhs: Box::new(Expr::BoolLit { token: Token::synthetic("true"), value: true }),
            rhs: Box::new(rhs),
        };
        let rv = load(&mut be, &mut ctx, &code, &expr).unwrap();
        assert_eq!(rv.ty, ctx.types.get_bool());
        let new_blocks = be.ops.iter().filter(|op| matches!(op, Op::AppendBlock { .. })).count();
        assert!(new_blocks >= 2);
    }

    #[test]
    fn call_resolves_declared_function() {
        let (mut be, mut ctx, code) = setup();
        let i32_t = ctx.types.get_int(32, false).unwrap();
        let fn_ty = be.function_type(be.int_type(32), &[]);
        let function = be.add_function("area", fn_ty);
        let sf = SFunction::new(function, i32_t, "area".to_string(), vec![], false);
        ctx.declare_function(&mut be, "area", sf);

        let expr = Expr::Call { token: Token::synthetic("area"), callee: Token::synthetic("area"), args: Args::new() };
        let rv = load(&mut be, &mut ctx, &code, &expr).unwrap();
        assert!(!rv.is_lvalue);
    }

    #[test]
    fn undefined_call_emits_diagnostic() {
        let (mut be, mut ctx, code) = setup();
        let expr = Expr::Call { token: Token::synthetic("nope"), callee: Token::synthetic("nope"), args: Args::new() };
        assert!(load(&mut be, &mut ctx, &code, &expr).is_none());
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn new_without_constructor_just_allocates() {
        let (mut be, mut ctx, code) = setup();
        ctx.types.create_struct("Point");
        let i32_t = ctx.types.get_int(32, false).unwrap();
        ctx.types
            .set_struct_body("Point", vec![("x".to_string(), i32_t.clone()), ("y".to_string(), i32_t)])
            .unwrap();

        let expr = Expr::New {
            token: Token::synthetic("new"),
            ty: TypeExpr::Named { token: Token::synthetic("Point"), args: ember_ast::NodeList::new() },
            count: None,
            args: Args::new(),
        };
        let rv = load(&mut be, &mut ctx, &code, &expr).unwrap();
        assert!(rv.ty.flags().contains(TypeFlags::POINTER));
        assert!(!ctx.diagnostics.has_errors());
    }
}
