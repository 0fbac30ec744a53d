//! The interface the core uses to ask an external code generator for types,
//! values, blocks and instructions. Every visitor and the instructions
//! helper talk to the back-end exclusively through this trait; nothing in
//! this crate references a concrete code generator.
//!
//! A real back-end (LLVM, a bytecode VM, whatever) implements `Backend`
//! outside this crate. [`mock::MockBackend`] is the implementation the test
//! suite links against: it records every call instead of generating real
//! instructions, which is enough to check the engine's control-flow and
//! typing invariants without linking anything external.

pub mod mock;
pub mod text;

/// Integer arithmetic/bitwise operators the back-end must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntBinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    AShr,
    LShr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatBinOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    SLt,
    SGt,
    SLe,
    SGe,
    ULt,
    UGt,
    ULe,
    UGe,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatPredicate {
    OLt,
    OGt,
    OLe,
    OGe,
    OEq,
    ONe,
}

/// Opaque handles plus the operations a code generator needs to expose:
/// type/value/block constructors, the instruction set the visitors lower
/// to, and the module-level escape hatches (globals, function
/// declarations, textual IR dump).
pub trait Backend {
    type Type: Copy + Eq + std::hash::Hash + std::fmt::Debug;
    type Value: Copy + Eq + std::hash::Hash + std::fmt::Debug;
    type Block: Copy + Eq + std::hash::Hash + std::fmt::Debug;
    type Function: Copy + Eq + std::hash::Hash + std::fmt::Debug;

    fn void_type(&mut self) -> Self::Type;
    fn bool_type(&mut self) -> Self::Type;
    fn int_type(&mut self, bits: u32) -> Self::Type;
    fn float_type(&mut self, is_double: bool) -> Self::Type;
    fn pointer_type(&mut self, pointee: Self::Type) -> Self::Type;
    fn array_type(&mut self, elem: Self::Type, count: u64) -> Self::Type;
    fn vector_type(&mut self, elem: Self::Type, count: u64) -> Self::Type;
    fn function_type(&mut self, ret: Self::Type, params: &[Self::Type]) -> Self::Type;
    fn opaque_struct_type(&mut self, name: &str) -> Self::Type;
    fn set_struct_body(&mut self, ty: Self::Type, fields: &[Self::Type]);

    fn const_null(&mut self, ty: Self::Type) -> Self::Value;
    fn const_undef(&mut self, ty: Self::Type) -> Self::Value;
    fn const_int(&mut self, ty: Self::Type, value: i128) -> Self::Value;
    fn const_float(&mut self, ty: Self::Type, value: f64) -> Self::Value;
    fn const_data_array(&mut self, elem_ty: Self::Type, values: &[Self::Value]) -> Self::Value;

    fn append_block(&mut self, function: Self::Function, name: &str) -> Self::Block;
    fn position_at_end(&mut self, block: Self::Block);
    fn move_block_after(&mut self, block: Self::Block, after: Self::Block);
    /// The block `position_at_end` last pointed at, mirroring LLVM's
    /// `IRBuilder::GetInsertBlock`. Lets a visitor that only holds a shared
    /// `&CodeContext` (the Expression Visitor's `load`, callable as a plain
    /// function pointer) still learn which block a value it just built ended
    /// up in, for phi-node predecessor bookkeeping.
    fn current_block(&self) -> Option<Self::Block>;

    fn build_alloca(&mut self, ty: Self::Type, name: &str) -> Self::Value;
    fn build_load(&mut self, ty: Self::Type, ptr: Self::Value, name: &str) -> Self::Value;
    fn build_store(&mut self, ptr: Self::Value, value: Self::Value);
    fn build_bitcast(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_ptrtoint(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_inttoptr(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_int_binop(
        &mut self,
        op: IntBinOp,
        lhs: Self::Value,
        rhs: Self::Value,
        name: &str,
    ) -> Self::Value;
    fn build_float_binop(
        &mut self,
        op: FloatBinOp,
        lhs: Self::Value,
        rhs: Self::Value,
        name: &str,
    ) -> Self::Value;
    fn build_int_compare(
        &mut self,
        pred: IntPredicate,
        lhs: Self::Value,
        rhs: Self::Value,
        name: &str,
    ) -> Self::Value;
    fn build_float_compare(
        &mut self,
        pred: FloatPredicate,
        lhs: Self::Value,
        rhs: Self::Value,
        name: &str,
    ) -> Self::Value;
    fn build_sext(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_zext(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_trunc(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_si_to_fp(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_ui_to_fp(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_fp_to_si(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_fp_to_ui(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_fpext(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_fptrunc(&mut self, value: Self::Value, target: Self::Type, name: &str) -> Self::Value;
    fn build_gep(
        &mut self,
        elem_ty: Self::Type,
        ptr: Self::Value,
        indices: &[Self::Value],
        name: &str,
    ) -> Self::Value;
    fn build_select(
        &mut self,
        cond: Self::Value,
        then_val: Self::Value,
        else_val: Self::Value,
        name: &str,
    ) -> Self::Value;
    fn build_phi(
        &mut self,
        ty: Self::Type,
        incoming: &[(Self::Value, Self::Block)],
        name: &str,
    ) -> Self::Value;
    /// Inserts `value` into lane `index` of `vector`, mirroring LLVM's
    /// `insertelement`. Used to seed a vector with a single runtime scalar
    /// before it is broadcast to every lane by `build_shuffle_splat`.
    fn build_insert_element(
        &mut self,
        vector: Self::Value,
        value: Self::Value,
        index: u64,
        name: &str,
    ) -> Self::Value;
    /// Broadcasts lane 0 of `vector` to all `count` lanes, mirroring LLVM's
    /// idiom for a runtime splat: a `shufflevector` against an undef operand
    /// with every mask index set to 0.
    fn build_shuffle_splat(&mut self, vector: Self::Value, count: u64, name: &str) -> Self::Value;
    fn build_br(&mut self, target: Self::Block);
    fn build_cond_br(&mut self, cond: Self::Value, then_block: Self::Block, else_block: Self::Block);
    fn build_switch(&mut self, value: Self::Value, default: Self::Block, cases: &[(i128, Self::Block)]);
    fn build_call(&mut self, function: Self::Function, args: &[Self::Value], name: &str) -> Self::Value;
    fn build_ret(&mut self, value: Option<Self::Value>);

    fn add_global(&mut self, ty: Self::Type, name: &str, initializer: Option<Self::Value>) -> Self::Value;
    fn add_function(&mut self, name: &str, ty: Self::Type) -> Self::Function;
    fn function_as_value(&mut self, function: Self::Function) -> Self::Value;
    /// The value of `function`'s `index`-th parameter, for binding it to a
    /// local at the start of the Builder's function-body pass (§4.13).
    fn param_value(&mut self, function: Self::Function, index: usize) -> Self::Value;

    /// Implementation-defined textual IR dump, used only for `--llvmir`-style
    /// debugging output; the core never parses it back.
    fn emit_ir(&self) -> String;
}
