use std::borrow::Cow;
use std::fmt;

use slab::Slab;

use crate::rtype::{ClassId, RType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(u32);

impl Register {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An operand of an instruction: a typed register or an integer literal
/// known at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'ctx> {
    Reg(Register),
    Int { value: i128, typ: RType<'ctx> },
}

impl<'ctx> Value<'ctx> {
    /// An arbitrary-precision integer literal.
    #[inline]
    pub fn int(value: i128) -> Self {
        Self::Int {
            value,
            typ: RType::Int,
        }
    }

    pub fn as_int_literal(&self) -> Option<(i128, &RType<'ctx>)> {
        match self {
            Self::Int { value, typ } => Some((*value, typ)),
            Self::Reg(_) => None,
        }
    }
}

impl From<Register> for Value<'_> {
    #[inline]
    fn from(reg: Register) -> Self {
        Self::Reg(reg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr<'ctx> {
    Assign {
        dst: Register,
        src: Value<'ctx>,
    },
    Goto(Label),
    Branch {
        cond: Value<'ctx>,
        on_true: Label,
        on_false: Label,
    },
    /// Indexed branch over an integer slot. Scrutinee values outside of
    /// `arms` fall through to `default`.
    Dispatch {
        scrutinee: Value<'ctx>,
        arms: Box<[Label]>,
        default: Label,
    },
    Binary {
        dst: Register,
        op: BinaryOp,
        lhs: Value<'ctx>,
        rhs: Value<'ctx>,
    },
    Unary {
        dst: Register,
        op: UnaryOp,
        src: Value<'ctx>,
    },
    /// Representation change that preserves the value (boxing, unboxing,
    /// numeric widening between compatible representations).
    Coerce {
        dst: Register,
        src: Value<'ctx>,
        to: RType<'ctx>,
    },
    /// Two's-complement truncation to a narrower fixed-width integer.
    Truncate {
        dst: Register,
        src: Value<'ctx>,
        to: RType<'ctx>,
    },
    /// Sign or zero extension to a wider fixed-width integer.
    Extend {
        dst: Register,
        src: Value<'ctx>,
        to: RType<'ctx>,
        signed: bool,
    },
    /// Exact runtime class test, valid only against classes whose layout
    /// cannot be extended by foreign subclasses.
    TypeCheck {
        dst: Register,
        obj: Value<'ctx>,
        class: ClassId<'ctx>,
    },
    GetAttr {
        dst: Register,
        obj: Value<'ctx>,
        class: ClassId<'ctx>,
        attr: Cow<'ctx, str>,
    },
    SetAttr {
        obj: Value<'ctx>,
        class: ClassId<'ctx>,
        attr: Cow<'ctx, str>,
        value: Value<'ctx>,
    },
    /// Call to a named runtime primitive with a known calling convention.
    CallPrimitive {
        dst: Register,
        name: &'static str,
        args: Box<[Value<'ctx>]>,
    },
    /// Generic dynamic-dispatch call through a boxed callee.
    CallDynamic {
        dst: Register,
        callee: Value<'ctx>,
        args: Box<[Value<'ctx>]>,
    },
    Return(Option<Value<'ctx>>),
    Raise(&'static str),
    Unreachable,
}

#[derive(Debug, Default)]
pub struct BasicBlock<'ctx> {
    pub instrs: Vec<Instr<'ctx>>,
}

/// Assembles the instruction stream of a single function.
///
/// The builder hands out typed registers and labels, and appends
/// instructions to whichever block is currently active. Blocks may be
/// created ahead of time and filled later, which the generator dispatch
/// code relies on.
#[derive(Debug)]
pub struct FunctionBuilder<'ctx> {
    registers: Vec<RType<'ctx>>,
    blocks: Slab<BasicBlock<'ctx>>,
    order: Vec<Label>,
    current: Label,
    emitted: usize,
}

impl<'ctx> FunctionBuilder<'ctx> {
    pub fn new() -> Self {
        let mut blocks = Slab::new();
        let entry = Label(blocks.insert(BasicBlock::default()) as u32);
        Self {
            registers: Vec::new(),
            blocks,
            order: vec![entry],
            current: entry,
            emitted: 0,
        }
    }

    pub fn alloc(&mut self, typ: RType<'ctx>) -> Register {
        let reg = Register(self.registers.len() as u32);
        self.registers.push(typ);
        reg
    }

    #[inline]
    pub fn register_type(&self, reg: Register) -> &RType<'ctx> {
        &self.registers[reg.index()]
    }

    pub fn value_type(&self, value: &Value<'ctx>) -> RType<'ctx> {
        match value {
            Value::Reg(reg) => self.register_type(*reg).clone(),
            Value::Int { typ, .. } => typ.clone(),
        }
    }

    pub fn new_block(&mut self) -> Label {
        let label = Label(self.blocks.insert(BasicBlock::default()) as u32);
        self.order.push(label);
        label
    }

    #[inline]
    pub fn activate(&mut self, label: Label) {
        self.current = label;
    }

    #[inline]
    pub fn current(&self) -> Label {
        self.current
    }

    /// Total number of instructions emitted so far, across all blocks.
    #[inline]
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn emit(&mut self, instr: Instr<'ctx>) {
        self.emitted += 1;
        self.blocks[self.current.index()].instrs.push(instr);
    }

    pub fn assign(&mut self, dst: Register, src: Value<'ctx>) {
        self.emit(Instr::Assign { dst, src });
    }

    pub fn goto(&mut self, label: Label) {
        self.emit(Instr::Goto(label));
    }

    pub fn goto_and_activate(&mut self, label: Label) {
        self.goto(label);
        self.activate(label);
    }

    pub fn branch(&mut self, cond: Value<'ctx>, on_true: Label, on_false: Label) {
        self.emit(Instr::Branch {
            cond,
            on_true,
            on_false,
        });
    }

    pub fn dispatch(
        &mut self,
        scrutinee: Value<'ctx>,
        arms: impl Into<Box<[Label]>>,
        default: Label,
    ) {
        self.emit(Instr::Dispatch {
            scrutinee,
            arms: arms.into(),
            default,
        });
    }

    pub fn binary(
        &mut self,
        op: BinaryOp,
        lhs: Value<'ctx>,
        rhs: Value<'ctx>,
        typ: RType<'ctx>,
    ) -> Value<'ctx> {
        let dst = self.alloc(typ);
        self.emit(Instr::Binary { dst, op, lhs, rhs });
        dst.into()
    }

    pub fn unary(&mut self, op: UnaryOp, src: Value<'ctx>, typ: RType<'ctx>) -> Value<'ctx> {
        let dst = self.alloc(typ);
        self.emit(Instr::Unary { dst, op, src });
        dst.into()
    }

    /// Coerces `src` to the representation `to`. A coercion to the same
    /// representation emits nothing and returns the operand untouched.
    pub fn coerce(&mut self, src: Value<'ctx>, to: RType<'ctx>) -> Value<'ctx> {
        if self.value_type(&src) == to {
            return src;
        }
        let dst = self.alloc(to.clone());
        self.emit(Instr::Coerce { dst, src, to });
        dst.into()
    }

    pub fn truncate(&mut self, src: Value<'ctx>, to: RType<'ctx>) -> Value<'ctx> {
        let dst = self.alloc(to.clone());
        self.emit(Instr::Truncate { dst, src, to });
        dst.into()
    }

    pub fn extend(&mut self, src: Value<'ctx>, to: RType<'ctx>, signed: bool) -> Value<'ctx> {
        let dst = self.alloc(to.clone());
        self.emit(Instr::Extend {
            dst,
            src,
            to,
            signed,
        });
        dst.into()
    }

    pub fn type_check(&mut self, obj: Value<'ctx>, class: ClassId<'ctx>) -> Value<'ctx> {
        let dst = self.alloc(RType::Bool);
        self.emit(Instr::TypeCheck { dst, obj, class });
        dst.into()
    }

    pub fn get_attr(
        &mut self,
        obj: Value<'ctx>,
        class: ClassId<'ctx>,
        attr: impl Into<Cow<'ctx, str>>,
        typ: RType<'ctx>,
    ) -> Value<'ctx> {
        let dst = self.alloc(typ);
        self.emit(Instr::GetAttr {
            dst,
            obj,
            class,
            attr: attr.into(),
        });
        dst.into()
    }

    pub fn set_attr(
        &mut self,
        obj: Value<'ctx>,
        class: ClassId<'ctx>,
        attr: impl Into<Cow<'ctx, str>>,
        value: Value<'ctx>,
    ) {
        self.emit(Instr::SetAttr {
            obj,
            class,
            attr: attr.into(),
            value,
        });
    }

    pub fn call_primitive(
        &mut self,
        name: &'static str,
        args: impl Into<Box<[Value<'ctx>]>>,
        ret: RType<'ctx>,
    ) -> Value<'ctx> {
        let dst = self.alloc(ret);
        self.emit(Instr::CallPrimitive {
            dst,
            name,
            args: args.into(),
        });
        dst.into()
    }

    pub fn call_dynamic(
        &mut self,
        callee: Value<'ctx>,
        args: impl Into<Box<[Value<'ctx>]>>,
        ret: RType<'ctx>,
    ) -> Value<'ctx> {
        let dst = self.alloc(ret);
        self.emit(Instr::CallDynamic {
            dst,
            callee,
            args: args.into(),
        });
        dst.into()
    }

    pub fn ret(&mut self, value: Option<Value<'ctx>>) {
        self.emit(Instr::Return(value));
    }

    pub fn raise(&mut self, error: &'static str) {
        self.emit(Instr::Raise(error));
    }

    pub fn unreachable(&mut self) {
        self.emit(Instr::Unreachable);
    }

    pub fn finish(mut self) -> FuncBody<'ctx> {
        let blocks = self
            .order
            .iter()
            .map(|label| std::mem::take(&mut self.blocks[label.index()]))
            .collect();
        FuncBody {
            registers: self.registers,
            blocks,
        }
    }
}

impl Default for FunctionBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// The finished instruction stream of one function, in block creation
/// order with the entry block first.
#[derive(Debug)]
pub struct FuncBody<'ctx> {
    pub registers: Vec<RType<'ctx>>,
    pub blocks: Vec<BasicBlock<'ctx>>,
}

impl fmt::Display for FuncBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, block) in self.blocks.iter().enumerate() {
            writeln!(f, "b{i}:")?;
            for instr in &block.instrs {
                writeln!(f, "  {instr:?}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_block_is_active_by_default() {
        let mut builder = FunctionBuilder::new();
        let reg = builder.alloc(RType::Bool);
        builder.assign(reg, Value::int(1));
        let body = builder.finish();
        assert_eq!(body.blocks.len(), 1);
        assert_eq!(body.blocks[0].instrs.len(), 1);
    }

    #[test]
    fn blocks_can_be_filled_out_of_order() {
        let mut builder = FunctionBuilder::new();
        let later = builder.new_block();
        builder.goto(later);
        builder.activate(later);
        builder.ret(None);
        let body = builder.finish();
        assert_eq!(body.blocks.len(), 2);
        assert_eq!(body.blocks[0].instrs, [Instr::Goto(later)]);
        assert_eq!(body.blocks[1].instrs, [Instr::Return(None)]);
    }

    #[test]
    fn coerce_to_same_representation_is_a_no_op() {
        let mut builder = FunctionBuilder::new();
        let reg = builder.alloc(RType::I64);
        let before = builder.emitted();
        let out = builder.coerce(reg.into(), RType::I64);
        assert_eq!(out, Value::Reg(reg));
        assert_eq!(builder.emitted(), before);
    }

    #[test]
    fn emitted_counts_across_blocks() {
        let mut builder = FunctionBuilder::new();
        builder.ret(None);
        let other = builder.new_block();
        builder.activate(other);
        builder.unreachable();
        assert_eq!(builder.emitted(), 2);
    }
}
