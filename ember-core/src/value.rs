//! The value model: `RValue` wraps whatever a back-end produces (a register,
//! a constant, a stack slot) together with the `SType` it carries, and
//! `SFunction` is the `RValue` produced by looking up or declaring a
//! function -- its back-end handle is a function, not a plain value.
//!
//! Both are generic over `Backend` so the same visitor code drives the mock
//! back-end in tests and a real one in the binary.

use std::fmt;

use crate::backend::Backend;
use crate::types::SType;

/// Anything that carries a type through the visitors: a loaded value, an
/// address about to be stored to, a folded constant. Error propagation uses
/// `Option<RValue<B>>` rather than a dedicated "invalid value" sentinel --
/// `None` means "a diagnostic was already emitted for this expression."
pub struct RValue<B: Backend> {
    pub value: B::Value,
    pub ty: SType,
    /// True when `value` is the address of a variable rather than its
    /// contents -- an lvalue still waiting to be loaded.
    pub is_lvalue: bool,
}

impl<B: Backend> RValue<B> {
    pub fn rvalue(value: B::Value, ty: SType) -> Self {
        Self {
            value,
            ty,
            is_lvalue: false,
        }
    }

    pub fn lvalue(value: B::Value, ty: SType) -> Self {
        Self {
            value,
            ty,
            is_lvalue: true,
        }
    }
}

impl<B: Backend> Clone for RValue<B> {
    fn clone(&self) -> Self {
        Self {
            value: self.value,
            ty: self.ty.clone(),
            is_lvalue: self.is_lvalue,
        }
    }
}

impl<B: Backend> fmt::Debug for RValue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RValue")
            .field("value", &self.value)
            .field("ty", &self.ty.name().unwrap_or("<anon>"))
            .field("is_lvalue", &self.is_lvalue)
            .finish()
    }
}

/// A declared or defined function: its back-end handle, its prototype's
/// `SType`, and the bookkeeping the Builder's overload resolution needs.
pub struct SFunction<B: Backend> {
    pub function: B::Function,
    pub ty: SType,
    pub mangled_name: String,
    pub param_types: Vec<SType>,
    pub is_variadic: bool,
}

impl<B: Backend> SFunction<B> {
    pub fn new(function: B::Function, ty: SType, mangled_name: String, param_types: Vec<SType>, is_variadic: bool) -> Self {
        Self {
            function,
            ty,
            mangled_name,
            param_types,
            is_variadic,
        }
    }

    pub fn as_value(&self, backend: &mut B) -> RValue<B> {
        RValue::rvalue(backend.function_as_value(self.function), self.ty.clone())
    }

    /// Arity-and-type match used by overload resolution before falling back
    /// to `numericConv`-driven implicit conversions.
    pub fn matches_exactly(&self, args: &[SType]) -> bool {
        if self.is_variadic {
            if args.len() < self.param_types.len() {
                return false;
            }
        } else if args.len() != self.param_types.len() {
            return false;
        }
        self.param_types.iter().zip(args.iter()).all(|(p, a)| p == a)
    }
}

impl<B: Backend> Clone for SFunction<B> {
    fn clone(&self) -> Self {
        Self {
            function: self.function,
            ty: self.ty.clone(),
            mangled_name: self.mangled_name.clone(),
            param_types: self.param_types.clone(),
            is_variadic: self.is_variadic,
        }
    }
}

impl<B: Backend> fmt::Debug for SFunction<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SFunction")
            .field("function", &self.function)
            .field("mangled_name", &self.mangled_name)
            .field("is_variadic", &self.is_variadic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    #[test]
    fn rvalue_clone_preserves_lvalue_flag() {
        let mut be = MockBackend::new();
        let i32_ty = be.int_type(32);
        let v = be.const_int(i32_ty, 7);
        let tm = crate::types::TypeManager::new();
        let sty = tm.get_int(32, false).unwrap();
        let rv = RValue::<MockBackend>::lvalue(v, sty);
        let cloned = rv.clone();
        assert!(cloned.is_lvalue);
    }

    #[test]
    fn exact_match_rejects_wrong_arity() {
        let mut be = MockBackend::new();
        let tm = crate::types::TypeManager::new();
        let i32_ty = tm.get_int(32, false).unwrap();
        let fn_ty = be.function_type(be.int_type(32), &[]);
        let function = be.add_function("f", fn_ty);
        let sf = SFunction::<MockBackend>::new(function, i32_ty.clone(), "f".to_string(), vec![i32_ty.clone()], false);
        assert!(!sf.matches_exactly(&[]));
        assert!(sf.matches_exactly(&[i32_ty]));
    }
}
