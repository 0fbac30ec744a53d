//! The four AST-to-semantics passes: resolving type expressions, producing
//! lvalues, producing rvalues, and lowering statements. Each module is a
//! free-function API over [`crate::context::GlobalContext`] /
//! [`crate::context::CodeContext`] rather than a `Visitor` trait impl --
//! there is exactly one concrete AST to walk (`ember_ast`), so the
//! indirection a trait would buy isn't needed.

pub mod datatype;
pub mod expression;
pub mod statement;
pub mod variable;
