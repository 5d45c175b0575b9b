//! The built-in specialization rules. Every rule checks its preconditions
//! before emitting any code, since declining after a partial emission would
//! corrupt the instruction stream.

use ivy_compiler_ir::{BinaryOp, ClassId, Label, RType, Value};
use smallvec::SmallVec;

use super::SpecializeCtx;
use crate::ast::{ArgKind, CallExpr, Comprehension, ExprKind, NameRef, NodeId};
use crate::types::wellknown;

const UTF8_ALIASES: [&str; 4] = ["u8", "utf", "utf8", "cp65001"];
const ASCII_ALIASES: [&str; 3] = ["646", "ascii", "usascii"];
const LATIN1_ALIASES: [&str; 6] = ["iso88591", "8859", "cp819", "latin", "latin1", "l1"];

fn sole_comprehension<'a, 'ctx>(call: &'a CallExpr<'ctx>) -> Option<&'a Comprehension<'ctx>> {
    if call.args.len() != 1 || !call.all_positional() {
        return None;
    }
    match &call.args[0].kind {
        ExprKind::Comprehension(comp) => Some(comp.as_ref()),
        _ => None,
    }
}

/// `len` of a fixed tuple folds to its arity; lists and strings read their
/// stored length directly.
pub(super) fn translate_len<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    _id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    if call.args.len() != 1 || !call.all_positional() {
        return None;
    }
    let arg = &call.args[0];
    match ctx.backend.node_type(arg.id) {
        RType::Tuple(items) => {
            // the operand may still have effects
            ctx.backend.accept(arg);
            Some(Value::int(items.len() as i128))
        }
        RType::List => {
            let obj = ctx.backend.accept(arg);
            Some(ctx.backend.code().call_primitive("list.len", [obj], RType::Int))
        }
        RType::Str => {
            let obj = ctx.backend.accept(arg);
            Some(ctx.backend.code().call_primitive("str.len", [obj], RType::Int))
        }
        _ => None,
    }
}

pub(super) fn list_from_comprehension<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    _id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    sequence_from_comprehension(ctx, call, "list.alloc_sized", "list.set_item_unsafe", RType::List)
}

pub(super) fn tuple_from_comprehension<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    _id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    sequence_from_comprehension(
        ctx,
        call,
        "tuple.alloc_sized",
        "tuple.set_item_unsafe",
        RType::VarTuple,
    )
}

/// Builds a container from a comprehension over a source whose length is
/// known at compile time: the container is allocated at its final size once
/// and the loop is unrolled into direct slot stores.
fn sequence_from_comprehension<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    call: &CallExpr<'ctx>,
    alloc_prim: &'static str,
    store_prim: &'static str,
    ret: RType<'ctx>,
) -> Option<Value<'ctx>> {
    let comp = sole_comprehension(call)?;
    if !comp.conditions.is_empty() {
        return None;
    }
    let RType::Tuple(items) = ctx.backend.node_type(comp.sequence.id) else {
        return None;
    };
    let len = items.len();
    let src = ctx.backend.accept(&comp.sequence);
    let result = ctx
        .backend
        .code()
        .call_primitive(alloc_prim, [Value::int(len as i128)], ret);
    for (i, item_type) in items.iter().enumerate() {
        let item = ctx.backend.code().call_primitive(
            "tuple.get_item_unsafe",
            [src.clone(), Value::int(i as i128)],
            item_type.clone(),
        );
        ctx.backend.bind_local(comp.index, item);
        let elem = ctx.backend.accept(&comp.element);
        ctx.backend.code().call_primitive(
            store_prim,
            [result.clone(), Value::int(i as i128), elem],
            RType::None,
        );
    }
    Some(result)
}

/// Emits the shared loop scaffolding of a comprehension over a runtime
/// iterator. The body callback runs with the index variable bound and must
/// leave its block unterminated; control then loops back to the condition
/// check. The caller activates `exit` afterwards.
fn comprehension_loop<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    comp: &Comprehension<'ctx>,
    exit: Label,
    mut body: impl FnMut(&mut SpecializeCtx<'_, 'ctx>),
) {
    let src = ctx.backend.accept(&comp.sequence);
    let it = ctx.backend.code().call_primitive("iter.new", [src], RType::Object);
    let check = ctx.backend.code().new_block();
    let step = ctx.backend.code().new_block();
    ctx.backend.code().goto_and_activate(check);
    let has = ctx
        .backend
        .code()
        .call_primitive("iter.has_next", [it.clone()], RType::Bool);
    ctx.backend.code().branch(has, step, exit);
    ctx.backend.code().activate(step);
    let item = ctx.backend.code().call_primitive("iter.next", [it], RType::Object);
    ctx.backend.bind_local(comp.index, item);
    for cond in &comp.conditions {
        let keep = ctx.backend.accept(cond);
        let matched = ctx.backend.code().new_block();
        ctx.backend.code().branch(keep, matched, check);
        ctx.backend.code().activate(matched);
    }
    body(ctx);
    ctx.backend.code().goto(check);
}

pub(super) fn translate_any<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    _id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    translate_any_all(ctx, call, false)
}

pub(super) fn translate_all<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    _id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    translate_any_all(ctx, call, true)
}

/// Short-circuiting `any`/`all` over a comprehension, without materializing
/// an intermediate sequence.
fn translate_any_all<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    call: &CallExpr<'ctx>,
    initial: bool,
) -> Option<Value<'ctx>> {
    let comp = sole_comprehension(call)?;
    let result = ctx.backend.code().alloc(RType::Bool);
    ctx.backend.code().assign(
        result,
        Value::Int {
            value: initial as i128,
            typ: RType::Bool,
        },
    );
    let exit = ctx.backend.code().new_block();
    comprehension_loop(ctx, comp, exit, |ctx| {
        let value = ctx.backend.accept(&comp.element);
        let value = ctx.backend.code().coerce(value, RType::Bool);
        let decided = ctx.backend.code().new_block();
        let undecided = ctx.backend.code().new_block();
        if initial {
            // all: the first false element decides
            ctx.backend.code().branch(value, undecided, decided);
        } else {
            ctx.backend.code().branch(value, decided, undecided);
        }
        ctx.backend.code().activate(decided);
        ctx.backend.code().assign(
            result,
            Value::Int {
                value: !initial as i128,
                typ: RType::Bool,
            },
        );
        ctx.backend.code().goto(exit);
        ctx.backend.code().activate(undecided);
    });
    ctx.backend.code().activate(exit);
    Some(result.into())
}

pub(super) fn translate_sum<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    if call.args.is_empty() || call.args.len() > 2 || !call.all_positional() {
        return None;
    }
    let ExprKind::Comprehension(comp) = &call.args[0].kind else {
        return None;
    };
    if ctx.backend.node_type(id) != RType::Int {
        return None;
    }
    let total = ctx.backend.code().alloc(RType::Int);
    let start = match call.args.get(1) {
        Some(arg) => ctx.backend.accept(arg),
        None => Value::int(0),
    };
    let start = ctx.backend.code().coerce(start, RType::Int);
    ctx.backend.code().assign(total, start);
    let exit = ctx.backend.code().new_block();
    comprehension_loop(ctx, comp, exit, |ctx| {
        let value = ctx.backend.accept(&comp.element);
        let value = ctx.backend.code().coerce(value, RType::Int);
        let sum = ctx
            .backend
            .code()
            .binary(BinaryOp::Add, total.into(), value, RType::Int);
        ctx.backend.code().assign(total, sum);
    });
    ctx.backend.code().activate(exit);
    Some(total.into())
}

/// First element of a comprehension that passes its conditions, stopping
/// the scan as soon as one is found.
pub(super) fn translate_next<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    if call.args.is_empty() || call.args.len() > 2 || !call.all_positional() {
        return None;
    }
    let ExprKind::Comprehension(comp) = &call.args[0].kind else {
        return None;
    };
    let ret = ctx.backend.node_type(id);
    let result = ctx.backend.code().alloc(ret.clone());

    let src = ctx.backend.accept(&comp.sequence);
    let it = ctx.backend.code().call_primitive("iter.new", [src], RType::Object);
    let check = ctx.backend.code().new_block();
    let step = ctx.backend.code().new_block();
    let empty = ctx.backend.code().new_block();
    let done = ctx.backend.code().new_block();

    ctx.backend.code().goto_and_activate(check);
    let has = ctx
        .backend
        .code()
        .call_primitive("iter.has_next", [it.clone()], RType::Bool);
    ctx.backend.code().branch(has, step, empty);
    ctx.backend.code().activate(step);
    let item = ctx.backend.code().call_primitive("iter.next", [it], RType::Object);
    ctx.backend.bind_local(comp.index, item);
    for cond in &comp.conditions {
        let keep = ctx.backend.accept(cond);
        let matched = ctx.backend.code().new_block();
        ctx.backend.code().branch(keep, matched, check);
        ctx.backend.code().activate(matched);
    }
    let value = ctx.backend.accept(&comp.element);
    let value = ctx.backend.code().coerce(value, ret.clone());
    ctx.backend.code().assign(result, value);
    ctx.backend.code().goto(done);

    ctx.backend.code().activate(empty);
    match call.args.get(1) {
        Some(default) => {
            let value = ctx.backend.accept(default);
            let value = ctx.backend.code().coerce(value, ret);
            ctx.backend.code().assign(result, value);
            ctx.backend.code().goto(done);
        }
        None => {
            ctx.backend.code().raise("StopIteration");
            ctx.backend.code().unreachable();
        }
    }
    ctx.backend.code().activate(done);
    Some(result.into())
}

/// Two-argument `min`/`max` on matching unboxed or string operands compiles
/// to a compare and select instead of a generic runtime call.
pub(super) fn faster_min_max<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    if call.args.len() != 2 || !call.all_positional() {
        return None;
    }
    let ExprKind::Name(NameRef {
        fullname: Some(fullname),
        ..
    }) = &call.callee.kind
    else {
        return None;
    };
    let op = if *fullname == wellknown::MIN {
        BinaryOp::Lt
    } else {
        BinaryOp::Gt
    };
    let ret = ctx.backend.node_type(id);
    if ctx.backend.node_type(call.args[0].id) != ret || ctx.backend.node_type(call.args[1].id) != ret
    {
        return None;
    }
    if !ret.is_unboxed() && ret != RType::Str {
        return None;
    }
    let lhs = ctx.backend.accept(&call.args[0]);
    let rhs = ctx.backend.accept(&call.args[1]);
    let result = ctx.backend.code().alloc(ret);
    // operands reversed so that ties and unordered floats keep the first one
    let cmp = ctx
        .backend
        .code()
        .binary(op, rhs.clone(), lhs.clone(), RType::Bool);
    let take_rhs = ctx.backend.code().new_block();
    let take_lhs = ctx.backend.code().new_block();
    let done = ctx.backend.code().new_block();
    ctx.backend.code().branch(cmp, take_rhs, take_lhs);
    ctx.backend.code().activate(take_rhs);
    ctx.backend.code().assign(result, rhs);
    ctx.backend.code().goto(done);
    ctx.backend.code().activate(take_lhs);
    ctx.backend.code().assign(result, lhs);
    ctx.backend.code().goto(done);
    ctx.backend.code().activate(done);
    Some(result.into())
}

/// Conversion calls to the fixed-width integer types. Literal operands are
/// wrapped at compile time with two's-complement semantics; fixed-width
/// operands truncate or extend; arbitrary-precision operands go through a
/// checked coercion.
pub(super) fn fixed_width_conversion<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    _id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    let ExprKind::Name(NameRef {
        fullname: Some(fullname),
        ..
    }) = &call.callee.kind
    else {
        return None;
    };
    let to = match *fullname {
        wellknown::I8 => RType::I8,
        wellknown::I16 => RType::I16,
        wellknown::I32 => RType::I32,
        wellknown::I64 => RType::I64,
        wellknown::U8 => RType::U8,
        wellknown::U16 => RType::U16,
        wellknown::U32 => RType::U32,
        wellknown::U64 => RType::U64,
        _ => return None,
    };
    if call.args.len() != 1 || !call.all_positional() {
        return None;
    }
    let arg = &call.args[0];
    let from = ctx.backend.node_type(arg.id);
    if from == to {
        return Some(ctx.backend.accept(arg));
    }
    if from.is_fixed_width_int() {
        let src = ctx.backend.accept(arg);
        let (Some(from_bits), Some(to_bits)) = (from.size_bits(), to.size_bits()) else {
            return None;
        };
        return Some(if from_bits > to_bits {
            ctx.backend.code().truncate(src, to)
        } else if from_bits < to_bits {
            let signed = from.is_signed();
            ctx.backend.code().extend(src, to, signed)
        } else {
            // same width, signedness reinterpretation
            ctx.backend.code().truncate(src, to)
        });
    }
    if matches!(from, RType::Int | RType::Bool) {
        let src = ctx.backend.accept(arg);
        let src = truncate_literal(src, &to);
        return Some(ctx.backend.code().coerce(src, to));
    }
    None
}

/// Wraps an integer literal into the value range of a fixed-width type,
/// matching the two's-complement behavior of the runtime conversion.
/// Non-literal values are returned unchanged.
pub fn truncate_literal<'ctx>(value: Value<'ctx>, to: &RType<'ctx>) -> Value<'ctx> {
    let Some((literal, _)) = value.as_int_literal() else {
        return value;
    };
    let Some(bits) = to.size_bits() else {
        return value;
    };
    let modulus = 1i128 << bits;
    let mut wrapped = literal.rem_euclid(modulus);
    if to.is_signed() && wrapped >= modulus / 2 {
        wrapped -= modulus;
    }
    Value::Int {
        value: wrapped,
        typ: to.clone(),
    }
}

fn normalize_encoding(name: &str) -> String {
    name.to_lowercase().replace(['-', '_'], "")
}

/// `str.encode` with a literal encoding that names utf-8, ascii or latin-1
/// under any of its aliases, and strict error handling, becomes a direct
/// runtime call. Everything else goes through the generic codec machinery.
pub(super) fn str_encode_fast_path<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    _id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    let ExprKind::Member { receiver, .. } = &call.callee.kind else {
        return None;
    };
    if call.args.len() > 2
        || call
            .arg_kinds
            .iter()
            .any(|kind| matches!(kind, ArgKind::Star | ArgKind::Star2))
    {
        return None;
    }
    let encoding = match call.arg(0, "encoding") {
        Some(arg) => match &arg.kind {
            ExprKind::StrLit(name) => Some(*name),
            _ => return None,
        },
        None => None,
    };
    let errors = match call.arg(1, "errors") {
        Some(arg) => match &arg.kind {
            ExprKind::StrLit(mode) => *mode,
            _ => return None,
        },
        None => "strict",
    };
    if errors != "strict" {
        return None;
    }
    let prim = match encoding.map(normalize_encoding) {
        None => "str.encode_utf8",
        Some(name) if UTF8_ALIASES.contains(&name.as_str()) => "str.encode_utf8",
        Some(name) if ASCII_ALIASES.contains(&name.as_str()) => "str.encode_ascii",
        Some(name) if LATIN1_ALIASES.contains(&name.as_str()) => "str.encode_latin1",
        Some(_) => return None,
    };
    let obj = ctx.backend.accept(receiver);
    Some(ctx.backend.code().call_primitive(prim, [obj], RType::Bytes))
}

/// Classification primitives for `isinstance` checks against the builtin
/// classes.
fn builtin_class_check(fullname: &str) -> Option<&'static str> {
    match fullname {
        wellknown::BOOL => Some("bool.check"),
        wellknown::INT => Some("int.check"),
        wellknown::FLOAT => Some("float.check"),
        wellknown::STR => Some("str.check"),
        wellknown::BYTES => Some("bytes.check"),
        wellknown::LIST => Some("list.check"),
        wellknown::MAP => Some("map.check"),
        wellknown::SET => Some("set.check"),
        wellknown::FROZENSET => Some("frozenset.check"),
        wellknown::TUPLE => Some("tuple.check"),
        wellknown::RANGE => Some("range.check"),
        _ => None,
    }
}

enum InstanceCheck<'ctx> {
    Builtin(&'static str),
    Exact(ClassId<'ctx>),
}

/// `isinstance` against builtin classes or compiled classes without foreign
/// subclasses becomes a chain of classification calls and exact class-tag
/// tests.
pub(super) fn translate_isinstance<'ctx>(
    ctx: &mut SpecializeCtx<'_, 'ctx>,
    _id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    if call.args.len() != 2 || !call.all_positional() {
        return None;
    }
    let mut names: SmallVec<[&str; 4]> = SmallVec::new();
    match &call.args[1].kind {
        ExprKind::Name(NameRef {
            fullname: Some(fullname),
            ..
        }) => names.push(*fullname),
        ExprKind::TupleLit(items) => {
            for item in items {
                match &item.kind {
                    ExprKind::Name(NameRef {
                        fullname: Some(fullname),
                        ..
                    }) => names.push(*fullname),
                    _ => return None,
                }
            }
        }
        _ => return None,
    }
    if names.is_empty() {
        return None;
    }
    let mut checks: SmallVec<[InstanceCheck<'ctx>; 4]> = SmallVec::new();
    for name in names {
        if let Some(prim) = builtin_class_check(name) {
            checks.push(InstanceCheck::Builtin(prim));
            continue;
        }
        let id = ctx.mapper.class_id(name);
        let descriptor = ctx.mapper.class(id)?;
        if !descriptor.has_exact_layout() {
            return None;
        }
        checks.push(InstanceCheck::Exact(id));
    }

    let obj = ctx.backend.accept(&call.args[0]);
    let result = ctx.backend.code().alloc(RType::Bool);
    let done = ctx.backend.code().new_block();
    for check in checks {
        let hit = match check {
            InstanceCheck::Builtin(prim) => {
                ctx.backend
                    .code()
                    .call_primitive(prim, [obj.clone()], RType::Bool)
            }
            InstanceCheck::Exact(class) => ctx.backend.code().type_check(obj.clone(), class),
        };
        let matched = ctx.backend.code().new_block();
        let next = ctx.backend.code().new_block();
        ctx.backend.code().branch(hit, matched, next);
        ctx.backend.code().activate(matched);
        ctx.backend.code().assign(
            result,
            Value::Int {
                value: 1,
                typ: RType::Bool,
            },
        );
        ctx.backend.code().goto(done);
        ctx.backend.code().activate(next);
    }
    ctx.backend.code().assign(
        result,
        Value::Int {
            value: 0,
            typ: RType::Bool,
        },
    );
    ctx.backend.code().goto(done);
    ctx.backend.code().activate(done);
    Some(result.into())
}

/// `ord` of a single-character literal folds to its code point.
pub(super) fn translate_ord<'ctx>(
    _ctx: &mut SpecializeCtx<'_, 'ctx>,
    _id: NodeId,
    call: &CallExpr<'ctx>,
) -> Option<Value<'ctx>> {
    if call.args.len() != 1 || !call.all_positional() {
        return None;
    }
    match &call.args[0].kind {
        ExprKind::StrLit(text) => {
            let mut chars = text.chars();
            let ch = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            Some(Value::int(ch as i128))
        }
        ExprKind::BytesLit(bytes) if bytes.len() == 1 => Some(Value::int(bytes[0] as i128)),
        _ => None,
    }
}
