//! A back-end that records every call onto a flat instruction tape instead
//! of generating real code. Sufficient to drive the whole engine under test
//! and to check the testable properties (one terminator per block, etc.)
//! without linking a real code generator.

use super::{Backend, FloatBinOp, FloatPredicate, IntBinOp, IntPredicate};
use std::collections::HashMap;

macro_rules! handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);
    };
}

handle!(MockType);
handle!(MockValue);
handle!(MockBlock);
handle!(MockFunction);

/// One recorded back-end call. Field names mirror the `Backend` method that
/// produced them.
#[derive(Debug, Clone)]
pub enum Op {
    VoidType(MockType),
    BoolType(MockType),
    IntType { ty: MockType, bits: u32 },
    FloatType { ty: MockType, is_double: bool },
    PointerType { ty: MockType, pointee: MockType },
    ArrayType { ty: MockType, elem: MockType, count: u64 },
    VectorType { ty: MockType, elem: MockType, count: u64 },
    FunctionType { ty: MockType, ret: MockType, params: Vec<MockType> },
    OpaqueStruct { ty: MockType, name: String },
    SetStructBody { ty: MockType, fields: Vec<MockType> },
    ConstNull { value: MockValue, ty: MockType },
    ConstUndef { value: MockValue, ty: MockType },
    ConstInt { value: MockValue, ty: MockType, literal: i128 },
    ConstFloat { value: MockValue, ty: MockType, literal: f64 },
    ConstDataArray { value: MockValue, elem_ty: MockType, values: Vec<MockValue> },
    AppendBlock { block: MockBlock, function: MockFunction, name: String },
    PositionAtEnd { block: MockBlock },
    MoveBlockAfter { block: MockBlock, after: MockBlock },
    Alloca { value: MockValue, ty: MockType, name: String },
    Load { value: MockValue, ty: MockType, ptr: MockValue, name: String },
    Store { ptr: MockValue, value: MockValue },
    Bitcast { value: MockValue, src: MockValue, target: MockType },
    PtrToInt { value: MockValue, src: MockValue, target: MockType },
    IntToPtr { value: MockValue, src: MockValue, target: MockType },
    IntBinOp { value: MockValue, op: IntBinOp, lhs: MockValue, rhs: MockValue },
    FloatBinOp { value: MockValue, op: FloatBinOp, lhs: MockValue, rhs: MockValue },
    IntCompare { value: MockValue, pred: IntPredicate, lhs: MockValue, rhs: MockValue },
    FloatCompare { value: MockValue, pred: FloatPredicate, lhs: MockValue, rhs: MockValue },
    SExt { value: MockValue, src: MockValue, target: MockType },
    ZExt { value: MockValue, src: MockValue, target: MockType },
    Trunc { value: MockValue, src: MockValue, target: MockType },
    SiToFp { value: MockValue, src: MockValue, target: MockType },
    UiToFp { value: MockValue, src: MockValue, target: MockType },
    FpToSi { value: MockValue, src: MockValue, target: MockType },
    FpToUi { value: MockValue, src: MockValue, target: MockType },
    FpExt { value: MockValue, src: MockValue, target: MockType },
    FpTrunc { value: MockValue, src: MockValue, target: MockType },
    Gep { value: MockValue, elem_ty: MockType, ptr: MockValue, indices: Vec<MockValue> },
    Select { value: MockValue, cond: MockValue, then_val: MockValue, else_val: MockValue },
    Phi { value: MockValue, ty: MockType, incoming: Vec<(MockValue, MockBlock)> },
    InsertElement { value: MockValue, vector: MockValue, element: MockValue, index: u64 },
    ShuffleSplat { value: MockValue, vector: MockValue, count: u64 },
    Br { from: MockBlock, target: MockBlock },
    CondBr { from: MockBlock, cond: MockValue, then_block: MockBlock, else_block: MockBlock },
    Switch { from: MockBlock, value: MockValue, default: MockBlock, cases: Vec<(i128, MockBlock)> },
    Call { value: MockValue, function: MockFunction, args: Vec<MockValue> },
    Ret { from: MockBlock, value: Option<MockValue> },
    AddGlobal { value: MockValue, ty: MockType, name: String, initializer: Option<MockValue> },
    AddFunction { function: MockFunction, name: String, ty: MockType },
    ParamValue { value: MockValue, function: MockFunction, index: usize },
}

/// Records an `Op` tape plus enough bookkeeping to answer the control-flow
/// questions tests ask: how many terminators did this block get, and what
/// blocks belong to this function.
#[derive(Debug, Default)]
pub struct MockBackend {
    pub ops: Vec<Op>,
    next_type: u32,
    next_value: u32,
    next_block: u32,
    next_function: u32,
    current_block: Option<MockBlock>,
    terminator_count: HashMap<MockBlock, usize>,
    function_blocks: HashMap<MockFunction, Vec<MockBlock>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_type(&mut self) -> MockType {
        let id = self.next_type;
        self.next_type += 1;
        MockType(id)
    }

    fn fresh_value(&mut self) -> MockValue {
        let id = self.next_value;
        self.next_value += 1;
        MockValue(id)
    }

    fn fresh_block(&mut self) -> MockBlock {
        let id = self.next_block;
        self.next_block += 1;
        MockBlock(id)
    }

    fn fresh_function(&mut self) -> MockFunction {
        let id = self.next_function;
        self.next_function += 1;
        MockFunction(id)
    }

    fn mark_terminator(&mut self, block: MockBlock) {
        *self.terminator_count.entry(block).or_insert(0) += 1;
    }

    /// How many terminating instructions (br/cond_br/switch/ret) were
    /// emitted into `block`. A well-formed function has exactly 1 for
    /// every block it created.
    pub fn terminator_count(&self, block: MockBlock) -> usize {
        self.terminator_count.get(&block).copied().unwrap_or(0)
    }

    /// True iff every block that has received at least one instruction has
    /// exactly one terminator.
    pub fn all_blocks_singly_terminated(&self) -> bool {
        (0..self.next_block)
            .map(MockBlock)
            .all(|b| self.terminator_count(b) == 1)
    }

    pub fn blocks_of(&self, function: MockFunction) -> &[MockBlock] {
        self.function_blocks
            .get(&function)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Backend for MockBackend {
    type Type = MockType;
    type Value = MockValue;
    type Block = MockBlock;
    type Function = MockFunction;

    fn void_type(&mut self) -> Self::Type {
        let ty = self.fresh_type();
        self.ops.push(Op::VoidType(ty));
        ty
    }

    fn bool_type(&mut self) -> Self::Type {
        let ty = self.fresh_type();
        self.ops.push(Op::BoolType(ty));
        ty
    }

    fn int_type(&mut self, bits: u32) -> Self::Type {
        let ty = self.fresh_type();
        self.ops.push(Op::IntType { ty, bits });
        ty
    }

    fn float_type(&mut self, is_double: bool) -> Self::Type {
        let ty = self.fresh_type();
        self.ops.push(Op::FloatType { ty, is_double });
        ty
    }

    fn pointer_type(&mut self, pointee: Self::Type) -> Self::Type {
        let ty = self.fresh_type();
        self.ops.push(Op::PointerType { ty, pointee });
        ty
    }

    fn array_type(&mut self, elem: Self::Type, count: u64) -> Self::Type {
        let ty = self.fresh_type();
        self.ops.push(Op::ArrayType { ty, elem, count });
        ty
    }

    fn vector_type(&mut self, elem: Self::Type, count: u64) -> Self::Type {
        let ty = self.fresh_type();
        self.ops.push(Op::VectorType { ty, elem, count });
        ty
    }

    fn function_type(&mut self, ret: Self::Type, params: &[Self::Type]) -> Self::Type {
        let ty = self.fresh_type();
        self.ops.push(Op::FunctionType {
            ty,
            ret,
            params: params.to_vec(),
        });
        ty
    }

    fn opaque_struct_type(&mut self, name: &str) -> Self::Type {
        let ty = self.fresh_type();
        self.ops.push(Op::OpaqueStruct {
            ty,
            name: name.to_string(),
        });
        ty
    }

    fn set_struct_body(&mut self, ty: Self::Type, fields: &[Self::Type]) {
        self.ops.push(Op::SetStructBody {
            ty,
            fields: fields.to_vec(),
        });
    }

    fn const_null(&mut self, ty: Self::Type) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::ConstNull { value, ty });
        value
    }

    fn const_undef(&mut self, ty: Self::Type) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::ConstUndef { value, ty });
        value
    }

    fn const_int(&mut self, ty: Self::Type, literal: i128) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::ConstInt { value, ty, literal });
        value
    }

    fn const_float(&mut self, ty: Self::Type, literal: f64) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::ConstFloat { value, ty, literal });
        value
    }

    fn const_data_array(&mut self, elem_ty: Self::Type, values: &[Self::Value]) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::ConstDataArray {
            value,
            elem_ty,
            values: values.to_vec(),
        });
        value
    }

    fn append_block(&mut self, function: Self::Function, name: &str) -> Self::Block {
        let block = self.fresh_block();
        self.function_blocks.entry(function).or_default().push(block);
        self.ops.push(Op::AppendBlock {
            block,
            function,
            name: name.to_string(),
        });
        block
    }

    fn position_at_end(&mut self, block: Self::Block) {
        self.current_block = Some(block);
        self.ops.push(Op::PositionAtEnd { block });
    }

    fn move_block_after(&mut self, block: Self::Block, after: Self::Block) {
        self.ops.push(Op::MoveBlockAfter { block, after });
    }

    fn current_block(&self) -> Option<Self::Block> {
        self.current_block
    }

    fn build_alloca(&mut self, ty: Self::Type, name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::Alloca {
            value,
            ty,
            name: name.to_string(),
        });
        value
    }

    fn build_load(&mut self, ty: Self::Type, ptr: Self::Value, name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::Load {
            value,
            ty,
            ptr,
            name: name.to_string(),
        });
        value
    }

    fn build_store(&mut self, ptr: Self::Value, value: Self::Value) {
        self.ops.push(Op::Store { ptr, value });
    }

    fn build_bitcast(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::Bitcast { value, src, target });
        value
    }

    fn build_ptrtoint(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::PtrToInt { value, src, target });
        value
    }

    fn build_inttoptr(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::IntToPtr { value, src, target });
        value
    }

    fn build_int_binop(
        &mut self,
        op: IntBinOp,
        lhs: Self::Value,
        rhs: Self::Value,
        _name: &str,
    ) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::IntBinOp { value, op, lhs, rhs });
        value
    }

    fn build_float_binop(
        &mut self,
        op: FloatBinOp,
        lhs: Self::Value,
        rhs: Self::Value,
        _name: &str,
    ) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::FloatBinOp { value, op, lhs, rhs });
        value
    }

    fn build_int_compare(
        &mut self,
        pred: IntPredicate,
        lhs: Self::Value,
        rhs: Self::Value,
        _name: &str,
    ) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::IntCompare { value, pred, lhs, rhs });
        value
    }

    fn build_float_compare(
        &mut self,
        pred: FloatPredicate,
        lhs: Self::Value,
        rhs: Self::Value,
        _name: &str,
    ) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::FloatCompare { value, pred, lhs, rhs });
        value
    }

    fn build_sext(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::SExt { value, src, target });
        value
    }

    fn build_zext(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::ZExt { value, src, target });
        value
    }

    fn build_trunc(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::Trunc { value, src, target });
        value
    }

    fn build_si_to_fp(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::SiToFp { value, src, target });
        value
    }

    fn build_ui_to_fp(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::UiToFp { value, src, target });
        value
    }

    fn build_fp_to_si(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::FpToSi { value, src, target });
        value
    }

    fn build_fp_to_ui(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::FpToUi { value, src, target });
        value
    }

    fn build_fpext(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::FpExt { value, src, target });
        value
    }

    fn build_fptrunc(&mut self, src: Self::Value, target: Self::Type, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::FpTrunc { value, src, target });
        value
    }

    fn build_gep(
        &mut self,
        elem_ty: Self::Type,
        ptr: Self::Value,
        indices: &[Self::Value],
        _name: &str,
    ) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::Gep {
            value,
            elem_ty,
            ptr,
            indices: indices.to_vec(),
        });
        value
    }

    fn build_select(
        &mut self,
        cond: Self::Value,
        then_val: Self::Value,
        else_val: Self::Value,
        _name: &str,
    ) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::Select {
            value,
            cond,
            then_val,
            else_val,
        });
        value
    }

    fn build_phi(
        &mut self,
        ty: Self::Type,
        incoming: &[(Self::Value, Self::Block)],
        _name: &str,
    ) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::Phi {
            value,
            ty,
            incoming: incoming.to_vec(),
        });
        value
    }

    fn build_insert_element(
        &mut self,
        vector: Self::Value,
        element: Self::Value,
        index: u64,
        _name: &str,
    ) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::InsertElement {
            value,
            vector,
            element,
            index,
        });
        value
    }

    fn build_shuffle_splat(&mut self, vector: Self::Value, count: u64, _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::ShuffleSplat { value, vector, count });
        value
    }

    fn build_br(&mut self, target: Self::Block) {
        if let Some(from) = self.current_block {
            self.mark_terminator(from);
            self.ops.push(Op::Br { from, target });
        }
    }

    fn build_cond_br(&mut self, cond: Self::Value, then_block: Self::Block, else_block: Self::Block) {
        if let Some(from) = self.current_block {
            self.mark_terminator(from);
            self.ops.push(Op::CondBr {
                from,
                cond,
                then_block,
                else_block,
            });
        }
    }

    fn build_switch(&mut self, value: Self::Value, default: Self::Block, cases: &[(i128, Self::Block)]) {
        if let Some(from) = self.current_block {
            self.mark_terminator(from);
            self.ops.push(Op::Switch {
                from,
                value,
                default,
                cases: cases.to_vec(),
            });
        }
    }

    fn build_call(&mut self, function: Self::Function, args: &[Self::Value], _name: &str) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::Call {
            value,
            function,
            args: args.to_vec(),
        });
        value
    }

    fn build_ret(&mut self, value: Option<Self::Value>) {
        if let Some(from) = self.current_block {
            self.mark_terminator(from);
            self.ops.push(Op::Ret { from, value });
        }
    }

    fn add_global(&mut self, ty: Self::Type, name: &str, initializer: Option<Self::Value>) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::AddGlobal {
            value,
            ty,
            name: name.to_string(),
            initializer,
        });
        value
    }

    fn add_function(&mut self, name: &str, ty: Self::Type) -> Self::Function {
        let function = self.fresh_function();
        self.function_blocks.entry(function).or_default();
        self.ops.push(Op::AddFunction {
            function,
            name: name.to_string(),
            ty,
        });
        function
    }

    fn function_as_value(&mut self, _function: Self::Function) -> Self::Value {
        // Mock has no distinct function-value representation; a function
        // reference used where a value is expected (e.g. as a function
        // pointer) just gets a fresh opaque handle.
        self.fresh_value()
    }

    fn param_value(&mut self, function: Self::Function, index: usize) -> Self::Value {
        let value = self.fresh_value();
        self.ops.push(Op::ParamValue { value, function, index });
        value
    }

    fn emit_ir(&self) -> String {
        super::text::render(&self.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_gains_exactly_one_terminator_on_ret() {
        let mut be = MockBackend::new();
        let i32_ty = be.int_type(32);
        let fn_ty = be.function_type(i32_ty, &[]);
        let f = be.add_function("main", fn_ty);
        let entry = be.append_block(f, "entry");
        be.position_at_end(entry);
        let zero = be.const_int(i32_ty, 0);
        be.build_ret(Some(zero));

        assert_eq!(be.terminator_count(entry), 1);
        assert!(be.all_blocks_singly_terminated());
    }

    #[test]
    fn untouched_block_has_no_terminator() {
        let mut be = MockBackend::new();
        let void_ty = be.void_type();
        let fn_ty = be.function_type(void_ty, &[]);
        let f = be.add_function("f", fn_ty);
        let entry = be.append_block(f, "entry");
        assert_eq!(be.terminator_count(entry), 0);
        assert!(!be.all_blocks_singly_terminated());
    }

    #[test]
    fn emit_ir_is_nonempty_after_instructions() {
        let mut be = MockBackend::new();
        let i32_ty = be.int_type(32);
        let fn_ty = be.function_type(i32_ty, &[]);
        let f = be.add_function("main", fn_ty);
        let entry = be.append_block(f, "entry");
        be.position_at_end(entry);
        let zero = be.const_int(i32_ty, 0);
        be.build_ret(Some(zero));

        assert!(!be.emit_ir().is_empty());
    }
}
