//! Data-Type Visitor (§4.4): resolves AST type expressions to `SType`.
//!
//! A `Named` reference whose raw (mangled) name isn't registered yet is
//! either an outright unknown name, or -- when its base name was previously
//! marked as a template (`GlobalContext::mark_template`) -- a pending
//! instantiation, handed off to the `instantiate` callback the Builder
//! supplies. Keeping instantiation behind a callback (rather than calling
//! the Builder directly) avoids a dependency cycle between this module and
//! `builder`, which itself calls back into here to resolve a template's
//! member signatures.

use ember_ast::{Expr, Token, TypeExpr, UnaryOp};
use ember_diagnostics::error_codes;

use crate::backend::Backend;
use crate::context::GlobalContext;
use crate::diag::span_of;
use crate::types::{SType, TypeFlags};

/// Resolves `expr` to a canonical `SType`, or `None` if a diagnostic was
/// already emitted. `instantiate` is called exactly when a `Name<args>`
/// reference names a known template but no matching instantiation exists
/// yet; it must either create and return the new type, or emit its own
/// diagnostic and return `None`.
pub fn resolve<B, F>(backend: &mut B, ctx: &mut GlobalContext<B>, expr: &TypeExpr, instantiate: &mut F) -> Option<SType>
where
    B: Backend,
    F: FnMut(&mut B, &mut GlobalContext<B>, &str, Vec<SType>, &Token) -> Option<SType>,
{
    match expr {
        TypeExpr::Void(_) => Some(ctx.types.get_void()),
        TypeExpr::Auto(_) => Some(ctx.types.get_auto()),
        TypeExpr::Bool(_) => Some(ctx.types.get_bool()),

        TypeExpr::Int { token, width, unsigned } => match ctx.types.get_int(*width, *unsigned) {
            Ok(t) => Some(t),
            Err(e) => {
                ctx.diagnostics.emit_error(error_codes::UNDEFINED_TYPE, e.to_string(), span_of(token));
                None
            }
        },

        TypeExpr::Float { is_double, .. } => Some(ctx.types.get_float(*is_double)),

        TypeExpr::Named { token, args } => {
            if args.is_empty() {
                if let Some(bound) = ctx.lookup_type_param(&token.text) {
                    return Some(bound);
                }
            }
            let mut resolved_args = Vec::with_capacity(args.len());
            for arg in args.iter() {
                resolved_args.push(resolve(backend, ctx, arg, instantiate)?);
            }
            let raw = compose_raw_name(&token.text, &resolved_args);
            if let Some(existing) = ctx.types.lookup_user_type(&raw) {
                return Some(existing);
            }
            if !resolved_args.is_empty() || ctx.is_template(&token.text) {
                return instantiate(backend, ctx, &raw, resolved_args, token);
            }
            ctx.diagnostics.emit_error(
                error_codes::UNDEFINED_TYPE,
                format!("unknown type `{}`", token.text),
                span_of(token),
            );
            None
        }

        TypeExpr::Pointer { pointee, .. } => {
            let p = resolve(backend, ctx, pointee, instantiate)?;
            Some(ctx.types.get_pointer(p))
        }

        TypeExpr::Reference { token, referent } => {
            let r = resolve(backend, ctx, referent, instantiate)?;
            emit_on_err(ctx, token, ctx_types_get_reference(ctx, r))
        }

        TypeExpr::CopyReference { token, referent } => {
            let r = resolve(backend, ctx, referent, instantiate)?;
            emit_on_err(ctx, token, ctx_types_get_copy_ref(ctx, r))
        }

        TypeExpr::Array { token, element, size } => {
            let elem = resolve(backend, ctx, element, instantiate)?;
            if elem.flags().intersects(TypeFlags::VOID | TypeFlags::AUTO) || elem.is_opaque() {
                ctx.diagnostics.emit_error(
                    error_codes::INVALID_ARRAY_SIZE,
                    "array element type must be a concrete, sized type".to_string(),
                    span_of(token),
                );
                return None;
            }
            let n = match size {
                None => 0,
                Some(expr) => match const_eval_u64(expr) {
                    Some(n) if n > 0 => n,
                    _ => {
                        ctx.diagnostics.emit_error(
                            error_codes::INVALID_ARRAY_SIZE,
                            "array size must be a positive integer constant".to_string(),
                            span_of(token),
                        );
                        return None;
                    }
                },
            };
            emit_on_err(ctx, token, ctx.types.get_array(elem, n))
        }

        TypeExpr::Vec { token, element, size } => {
            let elem = resolve(backend, ctx, element, instantiate)?;
            let n = match const_eval_u64(size) {
                Some(n) => n,
                None => {
                    ctx.diagnostics.emit_error(
                        error_codes::INVALID_VEC_ELEMENT,
                        "vec size must be a positive integer constant".to_string(),
                        span_of(token),
                    );
                    return None;
                }
            };
            emit_on_err(ctx, token, ctx.types.get_vec(elem, n))
        }

        TypeExpr::FuncPointer { token, ret, params } => {
            let ret_t = resolve(backend, ctx, ret, instantiate)?;
            if ret_t.flags().contains(TypeFlags::AUTO) {
                ctx.diagnostics.emit_error(
                    error_codes::AUTO_REQUIRES_INIT,
                    "a function pointer's return type cannot be `auto`".to_string(),
                    span_of(token),
                );
                return None;
            }
            let mut param_types = Vec::with_capacity(params.len());
            for p in params.iter() {
                param_types.push(resolve(backend, ctx, p, instantiate)?);
            }
            Some(ctx.types.get_function(ret_t, param_types))
        }
    }
}

/// `sizeBytes`/`count` for `new T[n]` (§4.4's `CGNDataTypeNew`): resolves
/// `elem` and multiplies its `allocSize` by the (already-evaluated) element
/// count, so array-`new` can drive the constructor loop over both numbers
/// (§4.10) without re-deriving them.
pub fn new_size<B: Backend>(backend: &mut B, ctx: &GlobalContext<B>, elem: &SType, count: u64) -> (B::Value, B::Value) {
    let elem_bytes = ctx.types.alloc_size(elem);
    let size_bytes = elem_bytes * count;
    let i64_ty = backend.int_type(64);
    let size_value = backend.const_int(i64_ty, size_bytes as i128);
    let count_value = backend.const_int(i64_ty, count as i128);
    (size_value, count_value)
}

fn emit_on_err<B: Backend>(ctx: &mut GlobalContext<B>, token: &Token, result: Result<SType, &'static str>) -> Option<SType> {
    match result {
        Ok(t) => Some(t),
        Err(msg) => {
            ctx.diagnostics.emit_error(error_codes::UNDEFINED_TYPE, msg.to_string(), span_of(token));
            None
        }
    }
}

// `get_reference`/`get_copy_ref` borrow `ctx.types` immutably while we still
// need `ctx` mutably for diagnostics afterwards; these free functions just
// make that split explicit instead of fighting the borrow checker inline.
fn ctx_types_get_reference<B: Backend>(ctx: &GlobalContext<B>, t: SType) -> Result<SType, &'static str> {
    ctx.types.get_reference(t)
}

fn ctx_types_get_copy_ref<B: Backend>(ctx: &GlobalContext<B>, t: SType) -> Result<SType, &'static str> {
    ctx.types.get_copy_ref(t)
}

fn compose_raw_name(base: &str, args: &[SType]) -> String {
    if args.is_empty() {
        return base.to_string();
    }
    let parts: Vec<String> = args.iter().map(type_display_name).collect();
    format!("{}<{}>", base, parts.join(","))
}

fn type_display_name(t: &SType) -> String {
    if let Some(name) = t.name() {
        return name.to_string();
    }
    let flags = t.flags();
    if flags.contains(TypeFlags::VOID) {
        "void".to_string()
    } else if flags.contains(TypeFlags::AUTO) {
        "auto".to_string()
    } else if flags.contains(TypeFlags::BOOL) {
        "bool".to_string()
    } else if flags.contains(TypeFlags::FLOATING) {
        if flags.contains(TypeFlags::DOUBLE) { "f64".to_string() } else { "f32".to_string() }
    } else if flags.contains(TypeFlags::INTEGER) {
        format!("{}{}", if flags.contains(TypeFlags::UNSIGNED) { "u" } else { "i" }, t.size())
    } else if flags.contains(TypeFlags::POINTER) {
        format!("*{}", t.subtype().map(type_display_name).unwrap_or_default())
    } else if flags.contains(TypeFlags::REFERENCE) {
        format!("&{}", t.subtype().map(type_display_name).unwrap_or_default())
    } else if flags.contains(TypeFlags::ARRAY) {
        format!("{}[{}]", t.subtype().map(type_display_name).unwrap_or_default(), t.size())
    } else if flags.contains(TypeFlags::VEC) {
        format!("vec<{},{}>", t.subtype().map(type_display_name).unwrap_or_default(), t.size())
    } else {
        "?".to_string()
    }
}

/// Constant-folds a type-expression-position size argument. Only literal
/// integers are accepted (array/vec sizes are never runtime values); an
/// optional leading unary `-` is recognized only to produce a clear
/// "must be positive" diagnostic rather than silently wrapping.
fn const_eval_u64(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::IntLit { value, .. } => u64::try_from(*value).ok(),
        // A literal `-N` folds to `None` here rather than wrapping, so the
        // caller's "must be a positive integer constant" diagnostic fires.
        Expr::Unary { op: UnaryOp::Neg, .. } => None,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::config::CoreOptions;
    use ember_ast::NodeList;

    fn no_templates<B: Backend>(_b: &mut B, _c: &mut GlobalContext<B>, _raw: &str, _args: Vec<SType>, _t: &Token) -> Option<SType> {
        None
    }

    #[test]
    fn resolves_primitive_ints() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let expr = TypeExpr::Int { token: Token::synthetic("i32"), width: 32, unsigned: false };
        let t = resolve(&mut be, &mut ctx, &expr, &mut no_templates).unwrap();
        assert!(t.flags().contains(TypeFlags::INTEGER));
        assert_eq!(t.size(), 32);
    }

    #[test]
    fn unknown_named_type_emits_diagnostic() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let expr = TypeExpr::Named { token: Token::synthetic("Widget"), args: NodeList::new() };
        let result = resolve(&mut be, &mut ctx, &expr, &mut no_templates);
        assert!(result.is_none());
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn existing_struct_resolves_by_raw_name() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        ctx.types.create_struct("Point");
        let expr = TypeExpr::Named { token: Token::synthetic("Point"), args: NodeList::new() };
        let t = resolve(&mut be, &mut ctx, &expr, &mut no_templates).unwrap();
        assert_eq!(t.name(), Some("Point"));
    }

    #[test]
    fn template_without_instance_calls_instantiate_callback() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        ctx.mark_template("Box");
        let mut called = false;
        let mut instantiate = |_b: &mut MockBackend, c: &mut GlobalContext<MockBackend>, raw: &str, _args: Vec<SType>, _t: &Token| {
            called = true;
            Some(c.types.create_struct(raw))
        };
        let i32_arg = TypeExpr::Int { token: Token::synthetic("i32"), width: 32, unsigned: false };
        let mut args = NodeList::new();
        args.push(i32_arg);
        let expr = TypeExpr::Named { token: Token::synthetic("Box"), args };
        let t = resolve(&mut be, &mut ctx, &expr, &mut instantiate).unwrap();
        assert!(called);
        assert_eq!(t.name(), Some("Box<i32>"));
    }

    #[test]
    fn array_with_zero_size_constant_is_rejected() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let elem = TypeExpr::Int { token: Token::synthetic("i32"), width: 32, unsigned: false };
        let size = Expr::IntLit { token: Token::synthetic("0"), value: 0, width: 32, unsigned: false };
        let expr = TypeExpr::Array {
            token: Token::synthetic("[]"),
            element: Box::new(elem),
            size: Some(Box::new(size)),
        };
        assert!(resolve(&mut be, &mut ctx, &expr, &mut no_templates).is_none());
    }

    #[test]
    fn array_without_size_is_zero_length_pointer_target() {
        let mut be = MockBackend::new();
        let mut ctx = GlobalContext::<MockBackend>::new(CoreOptions::default());
        let elem = TypeExpr::Int { token: Token::synthetic("i32"), width: 32, unsigned: false };
        let expr = TypeExpr::Array {
            token: Token::synthetic("[]"),
            element: Box::new(elem),
            size: None,
        };
        let t = resolve(&mut be, &mut ctx, &expr, &mut no_templates).unwrap();
        assert_eq!(t.size(), 0);
    }
}
