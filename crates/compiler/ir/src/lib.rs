//! Typed register IR shared between the lowering core and the native
//! code generation backend.
//!
//! The IR is deliberately small: a closed lattice of runtime
//! representation types ([`RType`]), class descriptors for compiled and
//! synthesized classes, calling-convention descriptors, and a basic-block
//! instruction stream assembled through [`FunctionBuilder`].

pub mod class;
pub mod code;
pub mod func;
pub mod rtype;

pub use class::{ClassDescriptor, ClassFlags};
pub use code::{
    BasicBlock, BinaryOp, FuncBody, FunctionBuilder, Instr, Label, Register, UnaryOp, Value,
};
pub use func::{FuncSignature, Param, PassingKind};
pub use rtype::{ClassId, NameInterner, RType};
