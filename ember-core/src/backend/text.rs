//! Renders a [`mock::Op`] tape as a human-readable pseudo-IR dump. Not real
//! LLVM IR -- emitting that is the excluded back-end's job -- but stable
//! enough to snapshot-compare the control flow a test run produced.

use super::mock::Op;

pub fn render(ops: &[Op]) -> String {
    let mut out = String::new();
    for op in ops {
        out.push_str(&render_op(op));
        out.push('\n');
    }
    out
}

fn render_op(op: &Op) -> String {
    match op {
        Op::VoidType(t) => format!("{:?} = type void", t),
        Op::BoolType(t) => format!("{:?} = type bool", t),
        Op::IntType { ty, bits } => format!("{:?} = type i{}", ty, bits),
        Op::FloatType { ty, is_double } => {
            format!("{:?} = type {}", ty, if *is_double { "double" } else { "float" })
        }
        Op::PointerType { ty, pointee } => format!("{:?} = type {:?}*", ty, pointee),
        Op::ArrayType { ty, elem, count } => format!("{:?} = type [{} x {:?}]", ty, count, elem),
        Op::VectorType { ty, elem, count } => format!("{:?} = type <{} x {:?}>", ty, count, elem),
        Op::FunctionType { ty, ret, params } => {
            format!("{:?} = type {:?} ({:?})", ty, ret, params)
        }
        Op::OpaqueStruct { ty, name } => format!("{:?} = type %{} {{}}", ty, name),
        Op::SetStructBody { ty, fields } => format!("{:?} body = {:?}", ty, fields),
        Op::ConstNull { value, ty } => format!("{:?} = const null {:?}", value, ty),
        Op::ConstUndef { value, ty } => format!("{:?} = const undef {:?}", value, ty),
        Op::ConstInt { value, ty, literal } => format!("{:?} = const {:?} {}", value, ty, literal),
        Op::ConstFloat { value, ty, literal } => format!("{:?} = const {:?} {}", value, ty, literal),
        Op::ConstDataArray { value, elem_ty, values } => {
            format!("{:?} = const [{:?} x {}] {:?}", value, elem_ty, values.len(), values)
        }
        Op::AppendBlock { block, function, name } => {
            format!("{:?}: ; preds=none, fn={:?}, name={}", block, function, name)
        }
        Op::PositionAtEnd { block } => format!("  ; position {:?}", block),
        Op::MoveBlockAfter { block, after } => format!("  ; move {:?} after {:?}", block, after),
        Op::Alloca { value, ty, name } => format!("  {:?} = alloca {:?} ; {}", value, ty, name),
        Op::Load { value, ty, ptr, name } => {
            format!("  {:?} = load {:?}, {:?} ; {}", value, ty, ptr, name)
        }
        Op::Store { ptr, value } => format!("  store {:?}, {:?}", value, ptr),
        Op::Bitcast { value, src, target } => format!("  {:?} = bitcast {:?} to {:?}", value, src, target),
        Op::PtrToInt { value, src, target } => {
            format!("  {:?} = ptrtoint {:?} to {:?}", value, src, target)
        }
        Op::IntToPtr { value, src, target } => {
            format!("  {:?} = inttoptr {:?} to {:?}", value, src, target)
        }
        Op::IntBinOp { value, op, lhs, rhs } => format!("  {:?} = {:?} {:?}, {:?}", value, op, lhs, rhs),
        Op::FloatBinOp { value, op, lhs, rhs } => format!("  {:?} = {:?} {:?}, {:?}", value, op, lhs, rhs),
        Op::IntCompare { value, pred, lhs, rhs } => {
            format!("  {:?} = icmp {:?} {:?}, {:?}", value, pred, lhs, rhs)
        }
        Op::FloatCompare { value, pred, lhs, rhs } => {
            format!("  {:?} = fcmp {:?} {:?}, {:?}", value, pred, lhs, rhs)
        }
        Op::SExt { value, src, target } => format!("  {:?} = sext {:?} to {:?}", value, src, target),
        Op::ZExt { value, src, target } => format!("  {:?} = zext {:?} to {:?}", value, src, target),
        Op::Trunc { value, src, target } => format!("  {:?} = trunc {:?} to {:?}", value, src, target),
        Op::SiToFp { value, src, target } => format!("  {:?} = sitofp {:?} to {:?}", value, src, target),
        Op::UiToFp { value, src, target } => format!("  {:?} = uitofp {:?} to {:?}", value, src, target),
        Op::FpToSi { value, src, target } => format!("  {:?} = fptosi {:?} to {:?}", value, src, target),
        Op::FpToUi { value, src, target } => format!("  {:?} = fptoui {:?} to {:?}", value, src, target),
        Op::FpExt { value, src, target } => format!("  {:?} = fpext {:?} to {:?}", value, src, target),
        Op::FpTrunc { value, src, target } => format!("  {:?} = fptrunc {:?} to {:?}", value, src, target),
        Op::Gep { value, elem_ty, ptr, indices } => {
            format!("  {:?} = getelementptr {:?}, {:?}, {:?}", value, elem_ty, ptr, indices)
        }
        Op::Select { value, cond, then_val, else_val } => {
            format!("  {:?} = select {:?}, {:?}, {:?}", value, cond, then_val, else_val)
        }
        Op::Phi { value, ty, incoming } => format!("  {:?} = phi {:?} {:?}", value, ty, incoming),
        Op::InsertElement { value, vector, element, index } => {
            format!("  {:?} = insertelement {:?}, {:?}, {}", value, vector, element, index)
        }
        Op::ShuffleSplat { value, vector, count } => {
            format!("  {:?} = shufflevector {:?}, undef, <{} x 0>", value, vector, count)
        }
        Op::Br { from, target } => format!("  ; {:?}: br {:?}", from, target),
        Op::CondBr { from, cond, then_block, else_block } => format!(
            "  ; {:?}: br {:?}, {:?}, {:?}",
            from, cond, then_block, else_block
        ),
        Op::Switch { from, value, default, cases } => {
            format!("  ; {:?}: switch {:?}, default {:?}, cases {:?}", from, value, default, cases)
        }
        Op::Call { value, function, args } => format!("  {:?} = call {:?}({:?})", value, function, args),
        Op::Ret { from, value } => format!("  ; {:?}: ret {:?}", from, value),
        Op::AddGlobal { value, ty, name, initializer } => {
            format!("{:?} = global {:?} %{} = {:?}", value, ty, name, initializer)
        }
        Op::AddFunction { function, name, ty } => format!("{:?} = define {:?} %{}", function, ty, name),
        Op::ParamValue { value, function, index } => format!("  {:?} = param {:?}[{}]", value, function, index),
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::MockBackend;
    use super::super::Backend;

    #[test]
    fn render_includes_function_definition() {
        let mut be = MockBackend::new();
        let i32_ty = be.int_type(32);
        let fn_ty = be.function_type(i32_ty, &[]);
        be.add_function("main", fn_ty);

        let rendered = be.emit_ir();
        assert!(rendered.contains("define"));
        assert!(rendered.contains("main"));
    }
}
