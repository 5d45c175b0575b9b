//! Maps analyzer types onto their runtime representations. The mapping is
//! total: anything without a more precise representation falls back to the
//! boxed object representation, so lowering never fails on an exotic type.

use std::borrow::Cow;

use hashbrown::HashMap;
use identity_hash::BuildIdentityHasher;
use ivy_compiler_ir::{
    ClassDescriptor, ClassId, FuncSignature, NameInterner, Param, PassingKind, RType,
};

use crate::ast::ArgKind;
use crate::error::{FaultError, LowerResult};
use crate::types::{wellknown, ClassInfo, FuncItem, StaticType};

/// Comparison methods whose declared return type is widened to object unless
/// strict operator typing is enabled, since the runtime lets them return the
/// not-implemented marker.
const COMPARISON_METHODS: [&str; 6] = ["eq", "ne", "lt", "gt", "le", "ge"];

#[derive(Debug)]
pub struct Mapper<'ctx> {
    interner: &'ctx NameInterner,
    classes: HashMap<ClassId<'ctx>, ClassDescriptor<'ctx>, BuildIdentityHasher<usize>>,
    generators: HashMap<&'ctx str, ClassId<'ctx>>,
}

impl<'ctx> Mapper<'ctx> {
    pub fn new(interner: &'ctx NameInterner) -> Self {
        Self {
            interner,
            classes: HashMap::default(),
            generators: HashMap::new(),
        }
    }

    #[inline]
    pub fn interner(&self) -> &'ctx NameInterner {
        self.interner
    }

    pub fn class_id(&self, fullname: impl AsRef<str> + Into<String>) -> ClassId<'ctx> {
        self.interner.intern(fullname)
    }

    /// Registers a class that is being compiled in this unit. Instances of
    /// registered classes get a dedicated unboxed-pointer representation.
    pub fn register_class(&mut self, descriptor: ClassDescriptor<'ctx>) -> ClassId<'ctx> {
        let id = descriptor.name();
        log::debug!("registering class {id}");
        self.classes.insert(id, descriptor);
        id
    }

    pub fn class(&self, id: ClassId<'ctx>) -> Option<&ClassDescriptor<'ctx>> {
        self.classes.get(&id)
    }

    pub fn class_mut(&mut self, id: ClassId<'ctx>) -> Option<&mut ClassDescriptor<'ctx>> {
        self.classes.get_mut(&id)
    }

    /// Associates a generator or coroutine definition with its synthesized
    /// state machine class.
    pub fn register_generator(&mut self, func: &'ctx str, machine: ClassId<'ctx>) {
        log::debug!("registering generator machine {machine} for {func}");
        self.generators.insert(func, machine);
    }

    pub fn generator_class(&self, func: &str) -> Option<ClassId<'ctx>> {
        self.generators.get(func).copied()
    }

    /// Picks the runtime representation for an analyzer type.
    pub fn lower(&self, typ: &StaticType<'ctx>) -> RType<'ctx> {
        match typ {
            StaticType::Instance(info) => self.lower_instance(info),
            StaticType::Tuple { items, fixed: true } => {
                RType::Tuple(items.iter().map(|item| self.lower(item)).collect())
            }
            StaticType::Tuple { fixed: false, .. } => RType::VarTuple,
            StaticType::None => RType::None,
            StaticType::Union(items) => {
                RType::simplified_union(items.iter().map(|item| self.lower(item)))
            }
            StaticType::Var(upper_bound) => self.lower(upper_bound),
            StaticType::Literal(fallback) => self.lower(fallback),
            StaticType::ShapedMap => RType::Map,
            StaticType::Callable
            | StaticType::Overloaded
            | StaticType::TypeObject
            | StaticType::Any
            | StaticType::Unresolved
            | StaticType::Uninhabited => RType::Object,
        }
    }

    fn lower_instance(&self, info: &ClassInfo<'ctx>) -> RType<'ctx> {
        match info.fullname() {
            wellknown::BOOL => return RType::Bool,
            wellknown::INT => return RType::Int,
            wellknown::FLOAT => return RType::Float,
            wellknown::STR => return RType::Str,
            wellknown::BYTES => return RType::Bytes,
            wellknown::LIST => return RType::List,
            wellknown::MAP => return RType::Map,
            wellknown::SET => return RType::Set,
            wellknown::FROZENSET => return RType::FrozenSet,
            wellknown::TUPLE => return RType::VarTuple,
            wellknown::RANGE => return RType::Range,
            wellknown::I8 => return RType::I8,
            wellknown::I16 => return RType::I16,
            wellknown::I32 => return RType::I32,
            wellknown::I64 => return RType::I64,
            wellknown::U8 => return RType::U8,
            wellknown::U16 => return RType::U16,
            wellknown::U32 => return RType::U32,
            wellknown::U64 => return RType::U64,
            _ => {}
        }
        // Map subclasses are treated as plain maps. Lookups through the
        // subclass then ignore overridden accessors, which is accepted for
        // the speed of the direct map representation.
        if info.has_ancestor(wellknown::MAP) {
            return RType::Map;
        }
        let id = self.interner.intern(info.fullname());
        if self.classes.contains_key(&id) {
            if info.is_protocol() {
                RType::simplified_union([RType::Instance(id), RType::Object])
            } else {
                RType::Instance(id)
            }
        } else {
            RType::Object
        }
    }

    /// Lowers the representation of one parameter, widening the variadic
    /// collector kinds to their container representations.
    pub fn param_rtype(&self, typ: &StaticType<'ctx>, kind: ArgKind) -> RType<'ctx> {
        match kind {
            ArgKind::Star => RType::VarTuple,
            ArgKind::Star2 => RType::Map,
            ArgKind::Positional | ArgKind::Named => self.lower(typ),
        }
    }

    /// Computes the runtime signature of a function definition.
    ///
    /// Generators and coroutines return an instance of their synthesized
    /// state machine class instead of their declared return type; the
    /// machine class must have been registered beforehand.
    pub fn signature(
        &self,
        item: &FuncItem<'ctx>,
        strict_comparison_typing: bool,
    ) -> LowerResult<FuncSignature<'ctx>> {
        let params = item.params.iter().enumerate().map(|(i, param)| {
            let name = match param.name {
                Some(name) => Cow::Borrowed(name),
                None => Cow::Owned(format!("arg{i}")),
            };
            let kind = if param.pos_only {
                PassingKind::PositionOnly
            } else {
                match param.kind {
                    ArgKind::Star => PassingKind::VarPositional,
                    ArgKind::Star2 => PassingKind::VarKeyword,
                    ArgKind::Positional | ArgKind::Named => PassingKind::Positional,
                }
            };
            Param::new(name, self.param_rtype(&param.typ, param.kind), kind)
        });

        let ret = if (item.is_generator || item.is_coroutine) && !item.is_decorated {
            let machine = self.generator_class(item.fullname).ok_or_else(|| {
                FaultError::UnrepresentableType(format!("generator machine of {}", item.fullname))
            })?;
            RType::Instance(machine)
        } else if item.is_constructor() {
            RType::None
        } else if item.class_name.is_some()
            && !strict_comparison_typing
            && COMPARISON_METHODS.contains(&item.name)
        {
            RType::Object
        } else {
            match &item.ret {
                Some(typ) => self.lower(typ),
                None => RType::Object,
            }
        };

        Ok(FuncSignature::new(params, ret))
    }
}
