use std::rc::Rc;

use crate::ast::ArgKind;

/// Fully qualified names of core types and intrinsic callables that the
/// lowering stage recognizes structurally.
pub mod wellknown {
    pub const BOOL: &str = "core.bool";
    pub const INT: &str = "core.int";
    pub const FLOAT: &str = "core.float";
    pub const STR: &str = "core.str";
    pub const BYTES: &str = "core.bytes";
    pub const LIST: &str = "core.list";
    pub const MAP: &str = "core.map";
    pub const SET: &str = "core.set";
    pub const FROZENSET: &str = "core.frozenset";
    pub const TUPLE: &str = "core.tuple";
    pub const RANGE: &str = "core.range";

    pub const I8: &str = "native.i8";
    pub const I16: &str = "native.i16";
    pub const I32: &str = "native.i32";
    pub const I64: &str = "native.i64";
    pub const U8: &str = "native.u8";
    pub const U16: &str = "native.u16";
    pub const U32: &str = "native.u32";
    pub const U64: &str = "native.u64";

    pub const LEN: &str = "core.len";
    pub const ANY: &str = "core.any";
    pub const ALL: &str = "core.all";
    pub const SUM: &str = "core.sum";
    pub const NEXT: &str = "core.next";
    pub const MIN: &str = "core.min";
    pub const MAX: &str = "core.max";
    pub const ORD: &str = "core.ord";
    pub const ISINSTANCE: &str = "core.isinstance";
}

/// A class as the front-end analyzer sees it. The linearized ancestry is
/// stored by fully qualified name, starting with the class itself.
#[derive(Debug, PartialEq, Eq)]
pub struct ClassInfo<'ctx> {
    fullname: &'ctx str,
    mro: Vec<&'ctx str>,
    is_protocol: bool,
}

impl<'ctx> ClassInfo<'ctx> {
    pub fn new(fullname: &'ctx str) -> Self {
        Self {
            fullname,
            mro: vec![fullname],
            is_protocol: false,
        }
    }

    pub fn with_ancestors(fullname: &'ctx str, ancestors: impl IntoIterator<Item = &'ctx str>) -> Self {
        let mut mro = vec![fullname];
        mro.extend(ancestors);
        Self {
            fullname,
            mro,
            is_protocol: false,
        }
    }

    pub fn protocol(fullname: &'ctx str) -> Self {
        Self {
            fullname,
            mro: vec![fullname],
            is_protocol: true,
        }
    }

    #[inline]
    pub fn fullname(&self) -> &'ctx str {
        self.fullname
    }

    #[inline]
    pub fn is_protocol(&self) -> bool {
        self.is_protocol
    }

    pub fn has_ancestor(&self, fullname: &str) -> bool {
        self.mro.iter().any(|&name| name == fullname)
    }
}

/// A type in the analyzer's type system, before any representation decisions
/// have been made.
#[derive(Debug, Clone)]
pub enum StaticType<'ctx> {
    Instance(Rc<ClassInfo<'ctx>>),
    Tuple {
        items: Vec<StaticType<'ctx>>,
        /// False for tuples containing an unpacked variadic item, whose
        /// arity is unknown at compile time.
        fixed: bool,
    },
    Callable,
    Union(Vec<StaticType<'ctx>>),
    /// A type variable, erased to its upper bound during lowering.
    Var(Box<StaticType<'ctx>>),
    /// A literal type with the instance type it narrows.
    Literal(Box<StaticType<'ctx>>),
    Overloaded,
    /// A structural mapping type with per-key value types.
    ShapedMap,
    TypeObject,
    None,
    Any,
    Unresolved,
    Uninhabited,
}

impl<'ctx> StaticType<'ctx> {
    pub fn instance(info: ClassInfo<'ctx>) -> Self {
        Self::Instance(Rc::new(info))
    }

    pub fn fixed_tuple(items: impl IntoIterator<Item = StaticType<'ctx>>) -> Self {
        Self::Tuple {
            items: items.into_iter().collect(),
            fixed: true,
        }
    }
}

/// A function definition as handed over by the analyzer.
#[derive(Debug)]
pub struct FuncItem<'ctx> {
    pub fullname: &'ctx str,
    pub name: &'ctx str,
    pub class_name: Option<&'ctx str>,
    pub params: Vec<FuncParam<'ctx>>,
    /// None on unannotated functions.
    pub ret: Option<StaticType<'ctx>>,
    pub is_generator: bool,
    pub is_coroutine: bool,
    pub is_decorated: bool,
}

impl<'ctx> FuncItem<'ctx> {
    pub fn new(fullname: &'ctx str, name: &'ctx str, params: Vec<FuncParam<'ctx>>, ret: StaticType<'ctx>) -> Self {
        Self {
            fullname,
            name,
            class_name: None,
            params,
            ret: Some(ret),
            is_generator: false,
            is_coroutine: false,
            is_decorated: false,
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.class_name.is_some() && self.name == "init"
    }
}

#[derive(Debug)]
pub struct FuncParam<'ctx> {
    /// None when the definition was reconstructed from persisted metadata
    /// and parameter names were not retained.
    pub name: Option<&'ctx str>,
    pub typ: StaticType<'ctx>,
    pub kind: ArgKind,
    pub pos_only: bool,
}

impl<'ctx> FuncParam<'ctx> {
    pub fn new(name: &'ctx str, typ: StaticType<'ctx>) -> Self {
        Self {
            name: Some(name),
            typ,
            kind: ArgKind::Positional,
            pos_only: false,
        }
    }

    pub fn with_kind(name: &'ctx str, typ: StaticType<'ctx>, kind: ArgKind) -> Self {
        Self {
            name: Some(name),
            typ,
            kind,
            pos_only: false,
        }
    }
}
