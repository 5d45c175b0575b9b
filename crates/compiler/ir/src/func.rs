use std::borrow::Cow;
use std::fmt;

use smallvec::SmallVec;

use crate::rtype::RType;

/// How a parameter is passed at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassingKind {
    #[default]
    Positional,
    PositionOnly,
    /// Collects excess positional arguments into a dynamically-sized
    /// tuple.
    VarPositional,
    /// Collects excess keyword arguments into a mapping.
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param<'ctx> {
    pub name: Cow<'ctx, str>,
    pub typ: RType<'ctx>,
    pub kind: PassingKind,
}

impl<'ctx> Param<'ctx> {
    pub fn new(name: impl Into<Cow<'ctx, str>>, typ: RType<'ctx>, kind: PassingKind) -> Self {
        Self {
            name: name.into(),
            typ,
            kind,
        }
    }

    #[inline]
    pub fn positional(name: impl Into<Cow<'ctx, str>>, typ: RType<'ctx>) -> Self {
        Self::new(name, typ, PassingKind::Positional)
    }
}

/// Calling-convention descriptor derived from a function's declared
/// parameter and return types.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncSignature<'ctx> {
    params: SmallVec<[Param<'ctx>; 4]>,
    ret: RType<'ctx>,
}

impl<'ctx> FuncSignature<'ctx> {
    pub fn new(params: impl IntoIterator<Item = Param<'ctx>>, ret: RType<'ctx>) -> Self {
        Self {
            params: params.into_iter().collect(),
            ret,
        }
    }

    #[inline]
    pub fn params(&self) -> &[Param<'ctx>] {
        &self.params
    }

    #[inline]
    pub fn return_type(&self) -> &RType<'ctx> {
        &self.ret
    }
}

impl fmt::Display for FuncSignature<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match param.kind {
                PassingKind::VarPositional => write!(f, "*{}: {}", param.name, param.typ)?,
                PassingKind::VarKeyword => write!(f, "**{}: {}", param.name, param.typ)?,
                _ => write!(f, "{}: {}", param.name, param.typ)?,
            }
        }
        write!(f, ") -> {}", self.ret)
    }
}
