//! Statement Visitor (§4.9/§4.12): executes a `Stmt`, threading scopes,
//! loop targets and labels through the Code Context as it goes.
//!
//! Every statement that opens a scope (`Block`, a loop body, an `if` arm)
//! pairs its `push_scope` with a `pop_scope` that runs destructors for
//! whatever destructable locals that scope collected, LIFO. `Break`/
//! `Continue`/`Redo`/`Return` additionally destruct every scope between the
//! current one and their target before jumping, since a jump out of a scope
//! skips the block's own natural exit.

use ember_ast::{Stmt, SwitchCase};
use ember_diagnostics::error_codes;

use crate::backend::Backend;
use crate::cast::cast_to;
use crate::context::{CodeContext, GlobalContext, LoopFrame};
use crate::diag::span_of;
use crate::types::TypeFlags;
use crate::value::RValue;
use crate::visitors::expression::{load, run_constructor, run_destructor};
use crate::visitors::{datatype, variable};

/// Executes `stmt`. Returns `Some(())` on success; `None` once a diagnostic
/// has already been emitted for something unrecoverable inside it (the
/// caller keeps walking sibling statements regardless, matching how a
/// single bad statement shouldn't suppress every diagnostic after it --
/// callers that want to stop early check `ctx.diagnostics.has_errors()`
/// themselves).
pub fn execute<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, code: &mut CodeContext<B>, stmt: &Stmt) -> Option<()> {
    match stmt {
        Stmt::ExprStmt { expr } => {
            load(backend, ctx, code, expr);
            Some(())
        }
        Stmt::VarDecl { token, name, ty, init, is_const } => execute_var_decl(backend, ctx, code, token, name, ty, init, *is_const),
        Stmt::Block { body } => execute_block(backend, ctx, code, body),
        Stmt::Loop { token, body } => execute_loop(backend, ctx, code, token, None, None, body),
        Stmt::While { token, cond, body } => execute_while(backend, ctx, code, token, cond, body, false),
        Stmt::Until { token, cond, body } => execute_while(backend, ctx, code, token, cond, body, true),
        Stmt::DoWhile { token, body, cond } => execute_do_while(backend, ctx, code, token, body, cond),
        Stmt::For { token, init, cond, post, body } => execute_for(backend, ctx, code, token, init, cond, post, body),
        Stmt::Switch { token, value, cases } => execute_switch(backend, ctx, code, token, value, cases),
        Stmt::If { token, cond, then_branch, else_branch } => execute_if(backend, ctx, code, token, cond, then_branch, else_branch),
        Stmt::Label { token, name } => execute_label(backend, ctx, code, token, name),
        Stmt::Goto { token, target } => execute_goto(backend, ctx, code, token, target),
        Stmt::Break { token, level } => execute_jump(backend, ctx, code, token, level, JumpKind::Break),
        Stmt::Continue { token, level } => execute_jump(backend, ctx, code, token, level, JumpKind::Continue),
        Stmt::Redo { token, level } => execute_jump(backend, ctx, code, token, level, JumpKind::Redo),
        Stmt::Return { token, value } => execute_return(backend, ctx, code, token, value),
        Stmt::Delete { token, value, array_count } => execute_delete(backend, ctx, code, token, value, array_count),
    }
}

/// A block's worth of statements, wrapped in its own scope (and that
/// scope's destructor cleanup on the way out). Shared by `Stmt::Block` and
/// every construct whose body is itself a `Block` statement.
fn execute_block<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, code: &mut CodeContext<B>, body: &ember_ast::NodeList<Stmt>) -> Option<()> {
    ctx.symbols.push_scope();
    for stmt in body.iter() {
        execute(backend, ctx, code, stmt);
    }
    destruct_scope(backend, ctx);
    Some(())
}

fn destruct_scope<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>) {
    for d in ctx.symbols.pop_scope() {
        run_destructor(backend, ctx, &d.value);
    }
}

fn execute_var_decl<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &ember_ast::Token,
    name: &ember_ast::Token,
    ty: &ember_ast::TypeExpr,
    init: &Option<ember_ast::Expr>,
    is_const: bool,
) -> Option<()> {
    let mut var_ty = datatype::resolve(backend, ctx, ty, &mut |_, c: &mut GlobalContext<B>, raw, _, tok| {
        c.diagnostics.emit_error(error_codes::UNDEFINED_TYPE, format!("unknown type `{}`", raw), span_of(tok));
        None
    })?;

    if var_ty.flags().contains(TypeFlags::AUTO) && init.is_none() {
        ctx.diagnostics.emit_error(error_codes::AUTO_REQUIRES_INIT, "`auto` variable requires an initializer".to_string(), span_of(token));
        return None;
    }
    if var_ty.flags().contains(TypeFlags::REFERENCE) && init.is_none() {
        ctx.diagnostics.emit_error(
            error_codes::REFERENCE_REQUIRES_INIT,
            "a reference variable requires an initializer".to_string(),
            span_of(token),
        );
        return None;
    }
    if is_const && init.is_none() {
        ctx.diagnostics.emit_error(error_codes::CONST_WITHOUT_INIT, "`const` variable requires an initializer".to_string(), span_of(token));
        return None;
    }

    let init_rv = match init {
        Some(expr) => Some(load(backend, ctx, code, expr)?),
        None => None,
    };

    if var_ty.flags().contains(TypeFlags::AUTO) {
        var_ty = init_rv.as_ref()?.ty.clone();
    }
    if is_const {
        var_ty = ctx.types.get_const(var_ty);
    }

    let be_ty = crate::cast::backend_type_of(backend, &ctx.types, &var_ty);
    let slot = backend.build_alloca(be_ty, name.text.as_ref());

    match init_rv {
        Some(mut rv) => {
            if let Err(e) = cast_to(backend, &ctx.types, &mut rv, &var_ty, false) {
                ctx.diagnostics.emit_error(error_codes::TYPE_MISMATCH, e.to_string(), span_of(token));
                return None;
            }
            backend.build_store(slot, rv.value);
        }
        None => {
            run_constructor(backend, ctx, token, &var_ty, slot, Vec::new())?;
        }
    }

    let has_destructor = var_ty
        .name()
        .and_then(|raw| ctx.types.user_type_entry(raw))
        .map(|entry| {
            let body = entry.body.lock().unwrap_or_else(|p| p.into_inner());
            matches!(&*body, crate::types::UserTypeBody::Class(c) if c.destructor().is_some())
        })
        .unwrap_or(false);

    ctx.symbols.store_local(name.text.as_ref(), RValue::lvalue(slot, var_ty), false, has_destructor);
    Some(())
}

fn execute_loop<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &mut CodeContext<B>,
    _token: &ember_ast::Token,
    explicit_cond: Option<&ember_ast::Expr>,
    explicit_until: Option<bool>,
    body: &Stmt,
) -> Option<()> {
    let function = code.current_function.as_ref()?.function;
    let cond_block = backend.append_block(function, "loop.cond");
    let body_block = backend.append_block(function, "loop.body");
    let continue_block = backend.append_block(function, "loop.continue");
    let break_block = backend.append_block(function, "loop.end");

    backend.build_br(cond_block);
    backend.position_at_end(cond_block);
    match explicit_cond {
        Some(cond_expr) => {
            let mut cond_rv = load(backend, ctx, code, cond_expr)?;
            let bool_t = ctx.types.get_bool();
            if cond_rv.ty != bool_t {
                cast_to(backend, &ctx.types, &mut cond_rv, &bool_t, false).ok()?;
            }
            match explicit_until {
                Some(true) => backend.build_cond_br(cond_rv.value, break_block, body_block),
                _ => backend.build_cond_br(cond_rv.value, body_block, break_block),
            }
        }
        None => backend.build_br(body_block),
    }

    backend.position_at_end(body_block);
    code.push_loop(LoopFrame {
        break_block,
        continue_block,
        redo_block: body_block,
        scope_depth: ctx.symbols.depth(),
    });
    execute(backend, ctx, code, body);
    code.pop_loop();
    backend.build_br(continue_block);

    backend.position_at_end(continue_block);
    backend.build_br(cond_block);

    backend.position_at_end(break_block);
    Some(())
}

fn execute_while<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &mut CodeContext<B>,
    token: &ember_ast::Token,
    cond: &ember_ast::Expr,
    body: &Stmt,
    is_until: bool,
) -> Option<()> {
    execute_loop(backend, ctx, code, token, Some(cond), Some(is_until), body)
}

fn execute_do_while<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &mut CodeContext<B>,
    _token: &ember_ast::Token,
    body: &Stmt,
    cond: &ember_ast::Expr,
) -> Option<()> {
    let function = code.current_function.as_ref()?.function;
    let body_block = backend.append_block(function, "dowhile.body");
    let continue_block = backend.append_block(function, "dowhile.continue");
    let cond_block = backend.append_block(function, "dowhile.cond");
    let break_block = backend.append_block(function, "dowhile.end");

    backend.build_br(body_block);
    backend.position_at_end(body_block);
    code.push_loop(LoopFrame { break_block, continue_block, redo_block: body_block, scope_depth: ctx.symbols.depth() });
    execute(backend, ctx, code, body);
    code.pop_loop();
    backend.build_br(continue_block);

    backend.position_at_end(continue_block);
    backend.build_br(cond_block);

    backend.position_at_end(cond_block);
    let mut cond_rv = load(backend, ctx, code, cond)?;
    let bool_t = ctx.types.get_bool();
    if cond_rv.ty != bool_t {
        cast_to(backend, &ctx.types, &mut cond_rv, &bool_t, false).ok()?;
    }
    backend.build_cond_br(cond_rv.value, body_block, break_block);

    backend.position_at_end(break_block);
    Some(())
}

fn execute_for<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &mut CodeContext<B>,
    _token: &ember_ast::Token,
    init: &Option<Box<Stmt>>,
    cond: &Option<ember_ast::Expr>,
    post: &Option<Box<Stmt>>,
    body: &Stmt,
) -> Option<()> {
    ctx.symbols.push_scope();
    if let Some(init_stmt) = init {
        execute(backend, ctx, code, init_stmt);
    }

    let function = code.current_function.as_ref()?.function;
    let cond_block = backend.append_block(function, "for.cond");
    let body_block = backend.append_block(function, "for.body");
    let continue_block = backend.append_block(function, "for.continue");
    let break_block = backend.append_block(function, "for.end");

    backend.build_br(cond_block);
    backend.position_at_end(cond_block);
    match cond {
        Some(cond_expr) => {
            let mut cond_rv = load(backend, ctx, code, cond_expr)?;
            let bool_t = ctx.types.get_bool();
            if cond_rv.ty != bool_t {
                cast_to(backend, &ctx.types, &mut cond_rv, &bool_t, false).ok()?;
            }
            backend.build_cond_br(cond_rv.value, body_block, break_block);
        }
        None => backend.build_br(body_block),
    }

    backend.position_at_end(body_block);
    code.push_loop(LoopFrame { break_block, continue_block, redo_block: body_block, scope_depth: ctx.symbols.depth() });
    execute(backend, ctx, code, body);
    code.pop_loop();
    backend.build_br(continue_block);

    backend.position_at_end(continue_block);
    if let Some(post_stmt) = post {
        execute(backend, ctx, code, post_stmt);
    }
    backend.build_br(cond_block);

    backend.position_at_end(break_block);
    destruct_scope(backend, ctx);
    Some(())
}

fn execute_if<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &mut CodeContext<B>,
    token: &ember_ast::Token,
    cond: &ember_ast::Expr,
    then_branch: &Stmt,
    else_branch: &Option<Box<Stmt>>,
) -> Option<()> {
    let mut cond_rv = load(backend, ctx, code, cond)?;
    let bool_t = ctx.types.get_bool();
    if cond_rv.ty != bool_t {
        if let Err(e) = cast_to(backend, &ctx.types, &mut cond_rv, &bool_t, false) {
            ctx.diagnostics.emit_error(error_codes::TYPE_MISMATCH, e.to_string(), span_of(token));
            return None;
        }
    }

    let function = code.current_function.as_ref()?.function;
    let then_block = backend.append_block(function, "if.then");
    let merge_block = backend.append_block(function, "if.end");
    let else_block = if else_branch.is_some() { backend.append_block(function, "if.else") } else { merge_block };
    backend.build_cond_br(cond_rv.value, then_block, else_block);

    backend.position_at_end(then_block);
    ctx.symbols.push_scope();
    execute(backend, ctx, code, then_branch);
    destruct_scope(backend, ctx);
    backend.build_br(merge_block);

    if let Some(else_stmt) = else_branch {
        backend.position_at_end(else_block);
        ctx.symbols.push_scope();
        execute(backend, ctx, code, else_stmt);
        destruct_scope(backend, ctx);
        backend.build_br(merge_block);
    }

    backend.position_at_end(merge_block);
    Some(())
}

/// `switch` (§4.9): the scrutinee must be integer-typed; each `case` value
/// must be a compile-time integer literal and unique, at most one arm may
/// be `default`. Cases fall through into the next arm's block unless the
/// body itself ends in `break`.
fn execute_switch<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &mut CodeContext<B>,
    token: &ember_ast::Token,
    value: &ember_ast::Expr,
    cases: &ember_ast::NodeList<SwitchCase>,
) -> Option<()> {
    let scrutinee = load(backend, ctx, code, value)?;
    if !scrutinee.ty.flags().contains(TypeFlags::INTEGER) {
        ctx.diagnostics.emit_error(error_codes::SWITCH_NON_INTEGER, "switch scrutinee must be an integer".to_string(), span_of(token));
        return None;
    }

    let function = code.current_function.as_ref()?.function;
    let break_block = backend.append_block(function, "switch.end");

    let mut seen_values = std::collections::HashSet::new();
    let mut default_seen = false;
    let mut case_blocks = Vec::with_capacity(cases.len());
    for case in cases.iter() {
        if case.is_default {
            if default_seen {
                ctx.diagnostics.emit_error(error_codes::MULTIPLE_DEFAULTS, "switch has more than one `default` arm".to_string(), span_of(&case.token));
            }
            default_seen = true;
        }
        for v in &case.values {
            if let ember_ast::Expr::IntLit { value, .. } = v {
                if !seen_values.insert(*value) {
                    ctx.diagnostics.emit_error(error_codes::DUPLICATE_CASE, format!("duplicate case value `{}`", value), span_of(v.token()));
                }
            } else {
                ctx.diagnostics.emit_error(error_codes::SWITCH_NON_INTEGER, "case values must be integer literals".to_string(), span_of(v.token()));
            }
        }
        let block = backend.append_block(function, if case.is_default { "switch.default" } else { "switch.case" });
        case_blocks.push(block);
    }

    let mut const_cases: Vec<(i128, B::Block)> = Vec::new();
    let mut default_block = break_block;
    for (case, block) in cases.iter().zip(case_blocks.iter().copied()) {
        if case.is_default {
            default_block = block;
        }
        for v in &case.values {
            if let ember_ast::Expr::IntLit { value, .. } = v {
                const_cases.push((*value, block));
            }
        }
    }
    backend.build_switch(scrutinee.value, default_block, &const_cases);

    code.push_loop(LoopFrame { break_block, continue_block: break_block, redo_block: break_block, scope_depth: ctx.symbols.depth() });
    ctx.symbols.push_scope();
    for (i, case) in cases.iter().enumerate() {
        backend.position_at_end(case_blocks[i]);
        for stmt in case.body.iter() {
            execute(backend, ctx, code, stmt);
        }
        let next = case_blocks.get(i + 1).copied().unwrap_or(break_block);
        backend.build_br(next);
    }
    destruct_scope(backend, ctx);
    code.pop_loop();

    backend.position_at_end(break_block);
    Some(())
}

fn execute_label<B: Backend>(backend: &mut B, ctx: &mut GlobalContext<B>, code: &mut CodeContext<B>, token: &ember_ast::Token, name: &ember_ast::Token) -> Option<()> {
    let function = code.current_function.as_ref()?.function;
    let block = code.declare_label(name.text.as_ref(), token, backend, function);
    if !code.define_label(name.text.as_ref()) {
        ctx.diagnostics.emit_error(error_codes::LABEL_REDEFINITION, format!("label `{}` is already defined", name.text), span_of(token));
        return None;
    }
    backend.build_br(block);
    backend.position_at_end(block);
    Some(())
}

fn execute_goto<B: Backend>(backend: &mut B, _ctx: &mut GlobalContext<B>, code: &mut CodeContext<B>, _token: &ember_ast::Token, target: &ember_ast::Token) -> Option<()> {
    let function = code.current_function.as_ref()?.function;
    let block = code.declare_label(target.text.as_ref(), target, backend, function);
    backend.build_br(block);

    let skip = backend.append_block(function, "goto.unreachable");
    backend.position_at_end(skip);
    Some(())
}

enum JumpKind {
    Break,
    Continue,
    Redo,
}

fn execute_jump<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &mut CodeContext<B>,
    token: &ember_ast::Token,
    level: &Option<ember_ast::Expr>,
    kind: JumpKind,
) -> Option<()> {
    let level_value = match level {
        Some(ember_ast::Expr::IntLit { value, .. }) => *value as i64,
        Some(_) => {
            ctx.diagnostics.emit_error(error_codes::BRANCH_LEVEL_OUT_OF_RANGE, "break/continue/redo level must be an integer literal".to_string(), span_of(token));
            return None;
        }
        None => 1,
    };

    let Some(frame) = code.resolve_loop(level_value).cloned() else {
        ctx.diagnostics.emit_error(error_codes::JUMP_OUTSIDE_LOOP, "no enclosing loop at this level".to_string(), span_of(token));
        return None;
    };

    for d in ctx.symbols.destructables_from(frame.scope_depth) {
        run_destructor(backend, ctx, &d.value);
    }

    let target = match kind {
        JumpKind::Break => frame.break_block,
        JumpKind::Continue => frame.continue_block,
        JumpKind::Redo => frame.redo_block,
    };
    backend.build_br(target);

    let function = code.current_function.as_ref()?.function;
    let unreachable = backend.append_block(function, "jump.unreachable");
    backend.position_at_end(unreachable);
    Some(())
}

fn execute_return<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &mut CodeContext<B>,
    token: &ember_ast::Token,
    value: &Option<ember_ast::Expr>,
) -> Option<()> {
    let sf = code.current_function.clone()?;
    let fn_is_void = sf.ty.flags().contains(TypeFlags::VOID);
    match (fn_is_void, value.is_some()) {
        (true, true) => {
            ctx.diagnostics.emit_error(
                error_codes::TYPE_MISMATCH,
                format!("function {} declared void, but non-void return found", sf.mangled_name),
                span_of(token),
            );
            return None;
        }
        (false, false) => {
            ctx.diagnostics.emit_error(
                error_codes::TYPE_MISMATCH,
                format!("function {} declared non-void, but void return found", sf.mangled_name),
                span_of(token),
            );
            return None;
        }
        _ => {}
    }

    let result = match value {
        Some(expr) => {
            let mut rv = load(backend, ctx, code, expr)?;
            if rv.ty != sf.ty {
                if let Err(e) = cast_to(backend, &ctx.types, &mut rv, &sf.ty, false) {
                    ctx.diagnostics.emit_error(error_codes::TYPE_MISMATCH, e.to_string(), span_of(token));
                    return None;
                }
            }
            Some(rv.value)
        }
        None => None,
    };

    for d in ctx.symbols.destructables_from(0) {
        run_destructor(backend, ctx, &d.value);
    }

    backend.build_ret(result);

    let function = code.current_function.as_ref()?.function;
    let unreachable = backend.append_block(function, "return.unreachable");
    backend.position_at_end(unreachable);
    Some(())
}

fn execute_delete<B: Backend>(
    backend: &mut B,
    ctx: &mut GlobalContext<B>,
    code: &CodeContext<B>,
    token: &ember_ast::Token,
    value: &ember_ast::Expr,
    array_count: &Option<ember_ast::Expr>,
) -> Option<()> {
    let target = load(backend, ctx, code, value)?;
    if !target.ty.flags().contains(TypeFlags::POINTER) {
        ctx.diagnostics.emit_error(error_codes::NOT_A_POINTER, "`delete` requires a pointer operand".to_string(), span_of(token));
        return None;
    }
    let elem_ty = target.ty.subtype().cloned()?;

    match array_count {
        Some(count_expr) => {
            let count_rv = load(backend, ctx, code, count_expr)?;
            let function = code.current_function.as_ref()?.function;
            let be_elem_t = crate::cast::backend_type_of(backend, &ctx.types, &elem_ty);
            let be_i64 = backend.int_type(64);

            let cond_block = backend.append_block(function, "delete.cond");
            let body_block = backend.append_block(function, "delete.body");
            let end_block = backend.append_block(function, "delete.end");

            let idx_slot = backend.build_alloca(be_i64, "delete.idx");
            let zero = backend.const_int(be_i64, 0);
            backend.build_store(idx_slot, zero);
            backend.build_br(cond_block);

            backend.position_at_end(cond_block);
            let idx_val = backend.build_load(be_i64, idx_slot, "delete.idx.val");
            let keep_going = backend.build_int_compare(crate::backend::IntPredicate::SLt, idx_val, count_rv.value, "delete.test");
            backend.build_cond_br(keep_going, body_block, end_block);

            backend.position_at_end(body_block);
            let elem_ptr = backend.build_gep(be_elem_t, target.value, &[idx_val], "delete.elem");
            run_destructor(backend, ctx, &RValue::lvalue(elem_ptr, elem_ty.clone()));
            let one = backend.const_int(be_i64, 1);
            let next = backend.build_int_binop(crate::backend::IntBinOp::Add, idx_val, one, "delete.next");
            backend.build_store(idx_slot, next);
            backend.build_br(cond_block);

            backend.position_at_end(end_block);
        }
        None => {
            run_destructor(backend, ctx, &RValue::lvalue(target.value, elem_ty));
        }
    }

    let free = ctx.get_or_declare_free(backend);
    let i8_t = ctx.types.get_int(8, true).ok()?;
    let ptr_i8_t = ctx.types.get_pointer(i8_t);
    let be_ptr_i8 = crate::cast::backend_type_of(backend, &ctx.types, &ptr_i8_t);
    let raw_ptr = backend.build_bitcast(target.value, be_ptr_i8, "delete.raw");
    backend.build_call(free.function, &[raw_ptr], "delete.call");
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, Op};
    use crate::config::CoreOptions;
    use crate::value::SFunction;
    use ember_ast::{Expr, NodeList, Token, TypeExpr};

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
    fn var_decl_allocates_and_stores_local() {
        let (mut be, mut ctx, code) = setup();
        let mut code = code;
        let stmt = Stmt::VarDecl {
            token: Token::synthetic("var"),
            name: Token::synthetic("x"),
            ty: TypeExpr::Int { token: Token::synthetic("i32"), width: 32, unsigned: false },
            init: Some(int_lit(5)),
            is_const: false,
        };
        assert!(execute(&mut be, &mut ctx, &mut code, &stmt).is_some());
        assert!(!ctx.symbols.load_locals_only("x").is_empty());
        assert!(be.ops.iter().any(|op| matches!(op, Op::Store { .. })));
    }

    #[test]
    fn const_var_decl_without_init_is_rejected() {
        let (mut be, mut ctx, code) = setup();
        let mut code = code;
        let stmt = Stmt::VarDecl {
            token: Token::synthetic("var"),
            name: Token::synthetic("x"),
            ty: TypeExpr::Int { token: Token::synthetic("i32"), width: 32, unsigned: false },
            init: None,
            is_const: true,
        };
        assert!(execute(&mut be, &mut ctx, &mut code, &stmt).is_none());
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn break_outside_loop_emits_diagnostic() {
        let (mut be, mut ctx, code) = setup();
        let mut code = code;
        let stmt = Stmt::Break { token: Token::synthetic("break"), level: None };
        assert!(execute(&mut be, &mut ctx, &mut code, &stmt).is_none());
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn while_loop_builds_cond_and_body_blocks() {
        let (mut be, mut ctx, code) = setup();
        let mut code = code;
        let stmt = Stmt::While {
            token: Token::synthetic("while"),
            cond: Expr::BoolLit { token: Token::synthetic("true"), value: true },
            body: Box::new(Stmt::Block { body: NodeList::new() }),
        };
        execute(&mut be, &mut ctx, &mut code, &stmt);
        let appended = be.ops.iter().filter(|op| matches!(op, Op::AppendBlock { .. })).count();
        assert!(appended >= 4);
    }

    #[test]
    fn return_with_value_emits_ret() {
        let (mut be, mut ctx, code) = setup();
        let mut code = code;
        let stmt = Stmt::Return { token: Token::synthetic("return"), value: Some(int_lit(1)) };
        assert!(execute(&mut be, &mut ctx, &mut code, &stmt).is_some());
        assert!(be.ops.iter().any(|op| matches!(op, Op::Ret { value: Some(_), .. })));
    }

    #[test]
    fn switch_with_duplicate_default_emits_diagnostic() {
        let (mut be, mut ctx, code) = setup();
        let mut code = code;
        let cases = NodeList::from(vec![
            SwitchCase { token: Token::synthetic("default"), values: vec![], body: NodeList::new(), is_default: true },
            SwitchCase { token: Token::synthetic("default"), values: vec![], body: NodeList::new(), is_default: true },
        ]);
        let stmt = Stmt::Switch { token: Token::synthetic("switch"), value: int_lit(0), cases };
        execute(&mut be, &mut ctx, &mut code, &stmt);
        assert!(ctx.diagnostics.has_errors());
    }
}
