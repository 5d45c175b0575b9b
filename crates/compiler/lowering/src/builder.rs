//! The seam between the lowering stage and the surrounding compiler. The
//! driver owns an instruction builder and the analyzer's type results;
//! specializer rules and the context model reach both only through this
//! trait, so they stay testable against a stub compiler.

use ivy_compiler_ir::{FunctionBuilder, RType, Value};

use crate::ast::{Expr, NodeId};

pub trait Backend<'ctx> {
    /// The instruction builder of the function currently being lowered.
    fn code(&mut self) -> &mut FunctionBuilder<'ctx>;

    /// Number of instructions emitted so far, across all blocks.
    fn emitted(&self) -> usize;

    /// The runtime representation the analyzer inferred for a node.
    fn node_type(&self, node: NodeId) -> RType<'ctx>;

    /// Lowers a subexpression through the generic path and returns the
    /// value holding its result.
    fn accept(&mut self, expr: &Expr<'ctx>) -> Value<'ctx>;

    /// Binds a name to a value for subexpressions lowered afterwards. Used
    /// by rules that unroll comprehensions and need the index variable in
    /// scope.
    fn bind_local(&mut self, name: &'ctx str, value: Value<'ctx>);
}
