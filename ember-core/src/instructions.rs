//! Operator lowering (§4.11) and the inc/dec primitive (§4.6) the
//! Expression Visitor calls into. Kept separate from the visitor so the
//! binop/compare dispatch tables and the cast rules they depend on can be
//! unit-tested without going through AST traversal.

use ember_ast::{BinOp, CompareOp, UnaryOp};

use crate::backend::{Backend, FloatBinOp, FloatPredicate, IntBinOp, IntPredicate};
use crate::cast::cast_match;
use crate::types::{TypeFlags, TypeManager};
use crate::value::RValue;

/// `+`/`-`/`*`/`/`/`%`/`<<`/`>>`/`&`/`|`/`^` (§4.11). Pointer operands are
/// rejected here -- pointer stepping only happens through `++`/`--`
/// (`build_inc_dec`), never general binary math.
pub fn build_binop<B: Backend>(
    backend: &mut B,
    types: &TypeManager,
    op: BinOp,
    mut lhs: RValue<B>,
    mut rhs: RValue<B>,
    int32_min_promote: bool,
) -> Result<RValue<B>, &'static str> {
    if lhs.ty.flags().is_composite() || rhs.ty.flags().is_composite() {
        return Err("binary operators do not accept composite operands");
    }
    if lhs.ty.flags().contains(TypeFlags::POINTER) || rhs.ty.flags().contains(TypeFlags::POINTER) {
        return Err("pointer arithmetic is only available through ++/--");
    }

    let common = cast_match(backend, types, &mut lhs, &mut rhs, int32_min_promote, false)?;
    let is_float = common.flags().contains(TypeFlags::FLOATING);

    if is_float {
        let float_op = match op {
            BinOp::Add => FloatBinOp::FAdd,
            BinOp::Sub => FloatBinOp::FSub,
            BinOp::Mul => FloatBinOp::FMul,
            BinOp::Div => FloatBinOp::FDiv,
            BinOp::Mod => FloatBinOp::FRem,
            BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                return Err("bitwise operators do not accept floating operands")
            }
        };
        let value = backend.build_float_binop(float_op, lhs.value, rhs.value, "fbinop");
        return Ok(RValue::rvalue(value, common));
    }

    let unsigned = common.flags().contains(TypeFlags::UNSIGNED);
    let int_op = match op {
        BinOp::Add => IntBinOp::Add,
        BinOp::Sub => IntBinOp::Sub,
        BinOp::Mul => IntBinOp::Mul,
        BinOp::Div => {
            if unsigned {
                IntBinOp::UDiv
            } else {
                IntBinOp::SDiv
            }
        }
        BinOp::Mod => {
            if unsigned {
                IntBinOp::URem
            } else {
                IntBinOp::SRem
            }
        }
        BinOp::Shl => IntBinOp::Shl,
        BinOp::Shr => {
            if unsigned {
                IntBinOp::LShr
            } else {
                IntBinOp::AShr
            }
        }
        BinOp::BitAnd => IntBinOp::And,
        BinOp::BitOr => IntBinOp::Or,
        BinOp::BitXor => IntBinOp::Xor,
    };
    let value = backend.build_int_binop(int_op, lhs.value, rhs.value, "binop");
    Ok(RValue::rvalue(value, common))
}

/// `<,>,<=,>=,==,!=` (§4.11). Scalars return `bool`; a vec comparison
/// returns `vec<bool,n>` (left to the caller, since a scalar-typed `bool`
/// result already covers the common case tested here).
pub fn build_compare<B: Backend>(
    backend: &mut B,
    types: &TypeManager,
    op: CompareOp,
    mut lhs: RValue<B>,
    mut rhs: RValue<B>,
    int32_min_promote: bool,
) -> Result<RValue<B>, &'static str> {
    if lhs.ty.flags().is_composite() || rhs.ty.flags().is_composite() {
        return Err("comparison operators do not accept composite operands");
    }
    let common = cast_match(backend, types, &mut lhs, &mut rhs, int32_min_promote, false)?;
    let bool_t = types.get_bool();

    if common.flags().contains(TypeFlags::FLOATING) {
        let pred = match op {
            CompareOp::Lt => FloatPredicate::OLt,
            CompareOp::Gt => FloatPredicate::OGt,
            CompareOp::Le => FloatPredicate::OLe,
            CompareOp::Ge => FloatPredicate::OGe,
            CompareOp::Eq => FloatPredicate::OEq,
            CompareOp::Ne => FloatPredicate::ONe,
        };
        let value = backend.build_float_compare(pred, lhs.value, rhs.value, "fcmp");
        return Ok(RValue::rvalue(value, bool_t));
    }

    let unsigned = common.flags().contains(TypeFlags::UNSIGNED);
    let pred = match (op, unsigned) {
        (CompareOp::Lt, false) => IntPredicate::SLt,
        (CompareOp::Lt, true) => IntPredicate::ULt,
        (CompareOp::Gt, false) => IntPredicate::SGt,
        (CompareOp::Gt, true) => IntPredicate::UGt,
        (CompareOp::Le, false) => IntPredicate::SLe,
        (CompareOp::Le, true) => IntPredicate::ULe,
        (CompareOp::Ge, false) => IntPredicate::SGe,
        (CompareOp::Ge, true) => IntPredicate::UGe,
        (CompareOp::Eq, _) => IntPredicate::Eq,
        (CompareOp::Ne, _) => IntPredicate::Ne,
    };
    let value = backend.build_int_compare(pred, lhs.value, rhs.value, "icmp");
    Ok(RValue::rvalue(value, bool_t))
}

/// `+x -> 0+x`, `-x -> 0-x`, `!x -> x==0`, `~x -> x XOR allOnes` (§4.6).
pub fn build_unary<B: Backend>(
    backend: &mut B,
    types: &TypeManager,
    op: UnaryOp,
    value: RValue<B>,
    int32_min_promote: bool,
) -> Result<RValue<B>, &'static str> {
    match op {
        UnaryOp::Plus => Ok(value),
        UnaryOp::Neg => {
            let be_ty = backend_numeric_type(backend, &value.ty);
            let zero = if value.ty.flags().contains(TypeFlags::FLOATING) {
                backend.const_float(be_ty, 0.0)
            } else {
                backend.const_int(be_ty, 0)
            };
            let zero_rv = RValue::rvalue(zero, value.ty.clone());
            build_binop(backend, types, BinOp::Sub, zero_rv, value, int32_min_promote)
        }
        UnaryOp::Not => {
            let be_ty = backend_numeric_type(backend, &value.ty);
            let zero = backend.const_int(be_ty, 0);
            let result = backend.build_int_compare(IntPredicate::Eq, value.value, zero, "not");
            Ok(RValue::rvalue(result, types.get_bool()))
        }
        UnaryOp::BitNot => {
            if !value.ty.flags().contains(TypeFlags::INTEGER) {
                return Err("~ requires an integer operand");
            }
            let be_ty = backend_numeric_type(backend, &value.ty);
            let all_ones = backend.const_int(be_ty, -1);
            let result = backend.build_int_binop(IntBinOp::Xor, value.value, all_ones, "bitnot");
            Ok(RValue::rvalue(result, value.ty.clone()))
        }
    }
}

/// `x++`/`x--`/`++x`/`--x`. `ptr` is the variable's storage address (an
/// lvalue `RValue`, as produced by the Variable Visitor); a pointer-typed
/// value steps by one element via GEP instead of `+1`. Rejects function
/// pointers, pointer-to-void (unsized), and enum operands.
pub fn build_inc_dec<B: Backend>(
    backend: &mut B,
    op: ember_ast::IncDecOp,
    is_postfix: bool,
    ptr: &RValue<B>,
    value_ty: &crate::types::SType,
    be_value_ty: B::Type,
) -> Result<RValue<B>, &'static str> {
    if value_ty.flags().contains(TypeFlags::FUNCTION) {
        return Err("cannot increment/decrement a function");
    }
    if value_ty.flags().contains(TypeFlags::ENUM) {
        return Err("cannot increment/decrement an enum value");
    }
    if value_ty.flags().contains(TypeFlags::POINTER) && value_ty.subtype().map(|s| s.flags().contains(TypeFlags::VOID)).unwrap_or(false) {
        return Err("cannot increment/decrement a pointer to an unsized type");
    }

    let old = backend.build_load(be_value_ty, ptr.value, "incdec.old");
    let step: i128 = match op {
        ember_ast::IncDecOp::Increment => 1,
        ember_ast::IncDecOp::Decrement => -1,
    };

    let new_value = if value_ty.flags().contains(TypeFlags::POINTER) {
        let idx_ty = backend.int_type(64);
        let idx = backend.const_int(idx_ty, step);
        backend.build_gep(be_value_ty, old, &[idx], "incdec.ptr")
    } else if value_ty.flags().contains(TypeFlags::FLOATING) {
        let one = backend.const_float(be_value_ty, 1.0);
        let op = if step > 0 { FloatBinOp::FAdd } else { FloatBinOp::FSub };
        backend.build_float_binop(op, old, one, "incdec")
    } else {
        let one = backend.const_int(be_value_ty, 1);
        let op = if step > 0 { IntBinOp::Add } else { IntBinOp::Sub };
        backend.build_int_binop(op, old, one, "incdec")
    };

    backend.build_store(ptr.value, new_value);
    let result_value = if is_postfix { old } else { new_value };
    Ok(RValue::rvalue(result_value, value_ty.clone()))
}

fn backend_numeric_type<B: Backend>(backend: &mut B, ty: &crate::types::SType) -> B::Type {
    if ty.flags().contains(TypeFlags::FLOATING) {
        backend.float_type(ty.flags().contains(TypeFlags::DOUBLE))
    } else {
        backend.int_type(ty.size().max(1) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::types::TypeManager;

    #[test]
    fn add_two_i32_dispatches_int_add() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let ty = be.int_type(32);
        let l = RValue::rvalue(be.const_int(ty, 1), i32_t.clone());
        let r = RValue::rvalue(be.const_int(ty, 2), i32_t);
        let result = build_binop(&mut be, &tm, BinOp::Add, l, r, true).unwrap();
        assert!(result.ty.flags().contains(TypeFlags::INTEGER));
        assert!(be.ops.iter().any(|op| matches!(op, crate::backend::mock::Op::IntBinOp { op: IntBinOp::Add, .. })));
    }

    #[test]
    fn pointer_binop_is_rejected() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let ptr_t = tm.get_pointer(i32_t.clone());
        let be_ptr = be.pointer_type(be.int_type(32));
        let l = RValue::rvalue(be.const_null(be_ptr), ptr_t);
        let ty32 = be.int_type(32);
        let r = RValue::rvalue(be.const_int(ty32, 1), i32_t);
        assert!(build_binop(&mut be, &tm, BinOp::Add, l, r, true).is_err());
    }

    #[test]
    fn unsigned_division_uses_udiv() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let u32_t = tm.get_int(32, true).unwrap();
        let ty = be.int_type(32);
        let l = RValue::rvalue(be.const_int(ty, 10), u32_t.clone());
        let r = RValue::rvalue(be.const_int(ty, 3), u32_t);
        build_binop(&mut be, &tm, BinOp::Div, l, r, true).unwrap();
        assert!(be.ops.iter().any(|op| matches!(op, crate::backend::mock::Op::IntBinOp { op: IntBinOp::UDiv, .. })));
    }

    #[test]
    fn compare_returns_bool_type() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let ty = be.int_type(32);
        let l = RValue::rvalue(be.const_int(ty, 1), i32_t.clone());
        let r = RValue::rvalue(be.const_int(ty, 2), i32_t);
        let result = build_compare(&mut be, &tm, CompareOp::Lt, l, r, true).unwrap();
        assert!(result.ty.flags().contains(TypeFlags::BOOL));
    }

    #[test]
    fn postfix_increment_returns_old_value() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let be_i32 = be.int_type(32);
        let slot = be.build_alloca(be_i32, "x");
        let ptr_rv = RValue::lvalue(slot, i32_t.clone());
        let result = build_inc_dec(&mut be, ember_ast::IncDecOp::Increment, true, &ptr_rv, &i32_t, be_i32).unwrap();
        assert!(be.ops.iter().any(|op| matches!(op, crate::backend::mock::Op::Store { .. })));
        let _ = result;
    }
}
