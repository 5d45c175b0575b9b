//! Call-site specialization. A registry maps intrinsic callables and typed
//! method receivers to rule functions that may replace the generic call
//! lowering with a faster sequence. Rules are all-or-nothing: a rule either
//! produces the complete result value or declines without having emitted
//! anything, and the first rule to accept wins.

use ivy_compiler_ir::{RType, Value};

use crate::ast::{CallExpr, ExprKind, NameRef, NodeId};
use crate::builder::Backend;
use crate::mapper::Mapper;
use crate::types::wellknown;
use crate::IndexMap;

mod rules;

pub use rules::truncate_literal;

/// Services a rule works against: the emission backend and the mapped
/// per-unit class information.
pub struct SpecializeCtx<'a, 'ctx> {
    pub backend: &'a mut dyn Backend<'ctx>,
    pub mapper: &'a Mapper<'ctx>,
}

/// A single specialization rule. Returns the value of the call when the
/// rule applies, or None to fall through to the next candidate.
pub type Specializer<'ctx> =
    fn(&mut SpecializeCtx<'_, 'ctx>, NodeId, &CallExpr<'ctx>) -> Option<Value<'ctx>>;

pub struct SpecializerRegistry<'ctx> {
    rules: IndexMap<(&'ctx str, Option<RType<'ctx>>), Vec<Specializer<'ctx>>>,
}

impl<'ctx> SpecializerRegistry<'ctx> {
    pub fn empty() -> Self {
        Self {
            rules: IndexMap::default(),
        }
    }

    pub fn with_default_rules() -> Self {
        let mut registry = Self::empty();
        registry.register(wellknown::LEN, None, rules::translate_len);
        registry.register(wellknown::LIST, None, rules::list_from_comprehension);
        registry.register(wellknown::TUPLE, None, rules::tuple_from_comprehension);
        registry.register(wellknown::ANY, None, rules::translate_any);
        registry.register(wellknown::ALL, None, rules::translate_all);
        registry.register(wellknown::SUM, None, rules::translate_sum);
        registry.register(wellknown::NEXT, None, rules::translate_next);
        registry.register(wellknown::MIN, None, rules::faster_min_max);
        registry.register(wellknown::MAX, None, rules::faster_min_max);
        for name in [
            wellknown::I8,
            wellknown::I16,
            wellknown::I32,
            wellknown::I64,
            wellknown::U8,
            wellknown::U16,
            wellknown::U32,
            wellknown::U64,
        ] {
            registry.register(name, None, rules::fixed_width_conversion);
        }
        registry.register("encode", Some(RType::Str), rules::str_encode_fast_path);
        registry.register(wellknown::ISINSTANCE, None, rules::translate_isinstance);
        registry.register(wellknown::ORD, None, rules::translate_ord);
        registry
    }

    /// Appends a rule for a callee key. Rules registered earlier for the
    /// same key take priority.
    pub fn register(
        &mut self,
        name: &'ctx str,
        receiver: Option<RType<'ctx>>,
        rule: Specializer<'ctx>,
    ) {
        self.rules.entry((name, receiver)).or_default().push(rule);
    }

    pub fn rules(&self, name: &'ctx str, receiver: Option<RType<'ctx>>) -> &[Specializer<'ctx>] {
        self.rules
            .get(&(name, receiver))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Tries to specialize a call. Method callees are looked up under their
    /// unqualified name keyed by the receiver representation, falling back
    /// to the receiver-free qualified name; plain callees use the qualified
    /// name directly.
    pub fn attempt(
        &self,
        ctx: &mut SpecializeCtx<'_, 'ctx>,
        id: NodeId,
        call: &CallExpr<'ctx>,
    ) -> Option<Value<'ctx>> {
        let key = match &call.callee.kind {
            ExprKind::Name(NameRef {
                fullname: Some(fullname),
                ..
            }) => (*fullname, None),
            ExprKind::Member {
                receiver,
                name,
                fullname,
            } => {
                let typ = ctx.backend.node_type(receiver.id);
                if self.rules.contains_key(&(*name, Some(typ.clone()))) {
                    (*name, Some(typ))
                } else {
                    ((*fullname)?, None)
                }
            }
            _ => return None,
        };
        let rules = self.rules.get(&key)?;
        for (i, rule) in rules.iter().enumerate() {
            let checkpoint = ctx.backend.emitted();
            if let Some(value) = rule(ctx, id, call) {
                log::trace!("specialized call to {} with rule #{i}", key.0);
                return Some(value);
            }
            debug_assert_eq!(
                ctx.backend.emitted(),
                checkpoint,
                "rule #{i} for {} emitted code before declining",
                key.0
            );
        }
        None
    }
}

impl Default for SpecializerRegistry<'_> {
    fn default() -> Self {
        Self::with_default_rules()
    }
}
