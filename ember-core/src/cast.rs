//! Cast rules (§4.8): `CastTo` coerces one `RValue` to a target type in
//! place; `CastMatch` finds a common type for two operands via `numericConv`
//! and casts both sides to it. Neither ever changes the *value*'s meaning
//! beyond what the table in §4.8 allows -- anything outside that table is a
//! `CastError`.

use crate::backend::{Backend, FloatPredicate, IntPredicate};
use crate::errors::CastError;
use crate::types::{SType, TypeFlags, TypeManager};
use crate::value::RValue;

/// Casts `value` to `target` in place. Returns `Ok(())` on success (mirrors
/// the original's "returns false on success" only in spirit: here the
/// `Result` makes the boolean's meaning explicit rather than reusing the
/// original's inverted convention).
pub fn cast_to<B: Backend>(
    backend: &mut B,
    types: &TypeManager,
    value: &mut RValue<B>,
    target: &SType,
    upcast: bool,
) -> Result<(), CastError> {
    if value.ty == *target {
        if upcast && value.ty.flags().contains(TypeFlags::ENUM) {
            // Unwrap an enum constant to its underlying integer type even
            // when source and target otherwise compare equal.
            if let Some(base) = enum_base(types, &value.ty) {
                value.ty = base;
            }
        }
        return Ok(());
    }

    let from = value.ty.clone();
    let to = target.clone();

    if from.flags().is_composite() && to.flags().is_composite() {
        return Err(CastError::CompositeCast {
            from: type_label(&from),
            to: type_label(&to),
        });
    }

    // numeric -> vec: broadcast (cast to element type, then shuffle-splat so
    // a runtime scalar, not just a constant, ends up in every lane).
    if to.flags().contains(TypeFlags::VEC) && !from.flags().contains(TypeFlags::VEC) {
        let elem_ty = to.subtype().expect("vec must carry an element type").clone();
        cast_to(backend, types, value, &elem_ty, upcast)?;
        let be_vec_ty = backend_type_of(backend, types, &to);
        let undef_vec = backend.const_undef(be_vec_ty);
        let seeded = backend.build_insert_element(undef_vec, value.value, 0, "splat.seed");
        value.value = backend.build_shuffle_splat(seeded, to.size(), "splat");
        value.ty = to;
        return Ok(());
    }

    // vec -> vec: element-wise, arity must match.
    if from.flags().contains(TypeFlags::VEC) && to.flags().contains(TypeFlags::VEC) {
        if from.size() != to.size() {
            return Err(CastError::VecSizeMismatch {
                from: from.size() as usize,
                to: to.size() as usize,
            });
        }
        // Coercion of the individual lanes is the back-end's job once it
        // receives the elementwise op; here we only retype the handle.
        value.ty = to;
        return Ok(());
    }

    if to.flags().contains(TypeFlags::BOOL) {
        let be_zero = zero_of(backend, types, &from);
        value.value = if from.flags().contains(TypeFlags::FLOATING) {
            backend.build_float_compare(FloatPredicate::ONe, value.value, be_zero, "tobool")
        } else {
            backend.build_int_compare(IntPredicate::Ne, value.value, be_zero, "tobool")
        };
        value.ty = to;
        return Ok(());
    }

    if to.flags().contains(TypeFlags::ENUM) {
        return Err(CastError::CastToEnum(type_label(&to)));
    }

    if to.flags().contains(TypeFlags::POINTER) {
        let is_null_literal = matches!(from.flags(), f if f.contains(TypeFlags::POINTER)) && value_is_null(backend, value);
        if from.flags().contains(TypeFlags::POINTER) {
            let from_pointee = from.subtype();
            let to_pointee = to.subtype();
            let pointee_ok = match (from_pointee, to_pointee) {
                (Some(a), Some(b)) => a.is_const_eq(b) || a.flags().contains(TypeFlags::VOID),
                _ => false,
            };
            let array_shrink = from.flags().contains(TypeFlags::ARRAY) && to.flags().contains(TypeFlags::ARRAY) && to.size() <= from.size();
            if !pointee_ok && !array_shrink && !is_null_literal {
                return Err(CastError::PointerCastPolicy {
                    from: type_label(&from),
                    to: type_label(&to),
                });
            }
            let be_to = backend_type_of(backend, types, &to);
            value.value = backend.build_bitcast(value.value, be_to, "ptrcast");
            value.ty = to;
            return Ok(());
        }
        return Err(CastError::NonPointerToPointer(type_label(&from)));
    }

    if from.flags().contains(TypeFlags::POINTER) && !to.flags().contains(TypeFlags::POINTER) {
        return Err(CastError::NonPointerToPointer(type_label(&from)));
    }

    if from.flags().contains(TypeFlags::INTEGER) && to.flags().contains(TypeFlags::INTEGER) {
        let be_to = backend_type_of(backend, types, &to);
        value.value = if to.size() > from.size() {
            if from.flags().contains(TypeFlags::UNSIGNED) {
                backend.build_zext(value.value, be_to, "zext")
            } else {
                backend.build_sext(value.value, be_to, "sext")
            }
        } else if to.size() < from.size() {
            backend.build_trunc(value.value, be_to, "trunc")
        } else {
            value.value
        };
        value.ty = to;
        return Ok(());
    }

    if from.flags().contains(TypeFlags::INTEGER) && to.flags().contains(TypeFlags::FLOATING) {
        let be_to = backend_type_of(backend, types, &to);
        value.value = if from.flags().contains(TypeFlags::UNSIGNED) {
            backend.build_ui_to_fp(value.value, be_to, "uitofp")
        } else {
            backend.build_si_to_fp(value.value, be_to, "sitofp")
        };
        value.ty = to;
        return Ok(());
    }

    if from.flags().contains(TypeFlags::FLOATING) && to.flags().contains(TypeFlags::INTEGER) {
        let be_to = backend_type_of(backend, types, &to);
        value.value = if to.flags().contains(TypeFlags::UNSIGNED) {
            backend.build_fp_to_ui(value.value, be_to, "fptoui")
        } else {
            backend.build_fp_to_si(value.value, be_to, "fptosi")
        };
        value.ty = to;
        return Ok(());
    }

    if from.flags().contains(TypeFlags::FLOATING) && to.flags().contains(TypeFlags::FLOATING) {
        let be_to = backend_type_of(backend, types, &to);
        value.value = if to.flags().contains(TypeFlags::DOUBLE) {
            backend.build_fpext(value.value, be_to, "fpext")
        } else {
            backend.build_fptrunc(value.value, be_to, "fptrunc")
        };
        value.ty = to;
        return Ok(());
    }

    Err(CastError::CompositeCast {
        from: type_label(&from),
        to: type_label(&to),
    })
}

/// Picks `numericConv(l, r)` then casts both sides to it; used by binary
/// operators and comparisons before they touch the back-end.
pub fn cast_match<B: Backend>(
    backend: &mut B,
    types: &TypeManager,
    lhs: &mut RValue<B>,
    rhs: &mut RValue<B>,
    int32_min_promote: bool,
    upcast: bool,
) -> Result<SType, &'static str> {
    let common = types.numeric_conv(&lhs.ty, &rhs.ty, int32_min_promote)?;
    cast_to(backend, types, lhs, &common, upcast).map_err(|_| "cast_match: lhs conversion failed")?;
    cast_to(backend, types, rhs, &common, upcast).map_err(|_| "cast_match: rhs conversion failed")?;
    Ok(common)
}

fn enum_base(types: &TypeManager, ty: &SType) -> Option<SType> {
    let name = ty.name()?;
    let entry = types.user_type_entry(name)?;
    let body = entry.body.lock().ok()?;
    match &*body {
        crate::types::UserTypeBody::Enum(e) => e.base.clone(),
        _ => None,
    }
}

/// Maps an `SType` to the backend's own type handle, recursing through
/// pointers/arrays/vecs. Shared outside this module by the visitors that
/// need a `B::Type` to pass to `build_alloca`/`build_gep`/`build_load`.
pub(crate) fn backend_type_of<B: Backend>(backend: &mut B, types: &TypeManager, ty: &SType) -> B::Type {
    let flags = ty.flags();
    if flags.contains(TypeFlags::VOID) {
        backend.void_type()
    } else if flags.contains(TypeFlags::BOOL) {
        backend.bool_type()
    } else if flags.contains(TypeFlags::FLOATING) {
        backend.float_type(flags.contains(TypeFlags::DOUBLE))
    } else if flags.contains(TypeFlags::INTEGER) {
        backend.int_type(ty.size() as u32)
    } else if flags.contains(TypeFlags::POINTER) || flags.contains(TypeFlags::REFERENCE) || flags.contains(TypeFlags::COPY_REF) {
        let pointee = ty.subtype().map(|s| backend_type_of(backend, types, s)).unwrap_or_else(|| backend.int_type(8));
        backend.pointer_type(pointee)
    } else if flags.contains(TypeFlags::ARRAY) || flags.contains(TypeFlags::VEC) {
        let elem = ty.subtype().map(|s| backend_type_of(backend, types, s)).unwrap_or_else(|| backend.int_type(8));
        if flags.contains(TypeFlags::VEC) {
            backend.vector_type(elem, ty.size())
        } else {
            backend.array_type(elem, ty.size())
        }
    } else if let Some(name) = ty.name() {
        backend.opaque_struct_type(name)
    } else {
        backend.int_type(32)
    }
}

fn zero_of<B: Backend>(backend: &mut B, types: &TypeManager, ty: &SType) -> B::Value {
    let be_ty = backend_type_of(backend, types, ty);
    if ty.flags().contains(TypeFlags::FLOATING) {
        backend.const_float(be_ty, 0.0)
    } else {
        backend.const_int(be_ty, 0)
    }
}

fn value_is_null<B: Backend>(_backend: &mut B, _value: &RValue<B>) -> bool {
    // The back-end interface has no "is this the null constant" query; a
    // real back-end would fold constant-null comparisons away during IR
    // construction. We never special-case it here, so null-literal casts
    // fall back to `PointerCastPolicy` unless the pointee already matches --
    // which is the common case since `NullLit` is typed `@void` (`@i8`) by
    // the Expression Visitor before reaching a cast.
    false
}

fn type_label(ty: &SType) -> String {
    ty.name().map(str::to_string).unwrap_or_else(|| format!("{:?}", ty.flags()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    #[test]
    fn identity_cast_is_noop() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let be_ty = be.int_type(32);
        let v = be.const_int(be_ty, 5);
        let mut rv = RValue::rvalue(v, i32_t.clone());
        cast_to(&mut be, &tm, &mut rv, &i32_t, false).unwrap();
        assert_eq!(rv.value, v);
    }

    #[test]
    fn int_widen_sext_for_signed() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i8_t = tm.get_int(8, false).unwrap();
        let i32_t = tm.get_int(32, false).unwrap();
        let be_ty = be.int_type(8);
        let v = be.const_int(be_ty, 5);
        let mut rv = RValue::rvalue(v, i8_t);
        cast_to(&mut be, &tm, &mut rv, &i32_t, false).unwrap();
        assert_eq!(rv.ty, i32_t);
        assert!(be.ops.iter().any(|op| matches!(op, crate::backend::mock::Op::SExt { .. })));
    }

    #[test]
    fn composite_cast_rejected() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        tm.create_struct("A");
        tm.create_struct("B");
        let a = tm.lookup_user_type("A").unwrap();
        let b = tm.lookup_user_type("B").unwrap();
        let be_ty = be.opaque_struct_type("A");
        let v = be.const_undef(be_ty);
        let mut rv = RValue::rvalue(v, a);
        assert!(cast_to(&mut be, &tm, &mut rv, &b, false).is_err());
    }

    #[test]
    fn cast_match_picks_numeric_conv() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i8_t = tm.get_int(8, false).unwrap();
        let i64_t = tm.get_int(64, false).unwrap();
        let be8 = be.int_type(8);
        let be64 = be.int_type(64);
        let mut l = RValue::rvalue(be.const_int(be8, 1), i8_t);
        let mut r = RValue::rvalue(be.const_int(be64, 2), i64_t.clone());
        let common = cast_match(&mut be, &tm, &mut l, &mut r, true, false).unwrap();
        assert_eq!(common, i64_t);
        assert_eq!(l.ty, i64_t);
    }

    #[test]
    fn numeric_to_vec_broadcasts_a_runtime_scalar() {
        // A runtime (non-constant) scalar must reach every lane via
        // insertelement + shufflevector, not a constant-array splat, since
        // the value isn't known until run time.
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let i32_t = tm.get_int(32, false).unwrap();
        let vec4_t = tm.get_vec(i32_t.clone(), 4).unwrap();
        let be_i32 = be.int_type(32);
        let fn_ty = be.function_type(be_i32, &[be_i32]);
        let f = be.add_function("f", fn_ty);
        let runtime_scalar = be.param_value(f, 0);
        let mut rv = RValue::rvalue(runtime_scalar, i32_t);
        cast_to(&mut be, &tm, &mut rv, &vec4_t, false).unwrap();
        assert_eq!(rv.ty, vec4_t);
        assert!(be.ops.iter().any(|op| matches!(op, crate::backend::mock::Op::InsertElement { .. })));
        assert!(be.ops.iter().any(|op| matches!(op, crate::backend::mock::Op::ShuffleSplat { count: 4, .. })));
        assert!(!be.ops.iter().any(|op| matches!(op, crate::backend::mock::Op::ConstDataArray { .. })));
    }
}
