use std::hash::Hash;
use std::rc::Rc;
use std::{fmt, ptr};

use elsa::FrozenIndexSet;
use enum_as_inner::EnumAsInner;
use identity_hash::IdentityHashable;

/// A runtime representation type.
///
/// Every value in lowered code has exactly one of these representations.
/// The fixed-width integers, `Bool`, `Float` and fixed-arity `Tuple`s are
/// unboxed; everything else is a tagged heap value. `Object` is the
/// universal boxed fallback that can hold anything at the cost of dynamic
/// dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumAsInner)]
pub enum RType<'ctx> {
    Bool,
    /// Arbitrary-precision integer.
    Int,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Float,
    Str,
    Bytes,
    /// Fixed-arity unboxed tuple with statically known element types.
    Tuple(Rc<[RType<'ctx>]>),
    /// Dynamically-sized boxed tuple.
    VarTuple,
    List,
    Map,
    Set,
    FrozenSet,
    Range,
    Instance(ClassId<'ctx>),
    Union(Rc<[RType<'ctx>]>),
    /// The universal boxed fallback.
    Object,
    None,
}

impl<'ctx> RType<'ctx> {
    /// Builds a union out of `items`, flattening nested unions and
    /// removing duplicates. Members are put into a canonical order so that
    /// unions built from the same set of types compare equal regardless of
    /// the order they were supplied in. A singleton collapses to its only
    /// member and an empty union degrades to `Object`.
    pub fn simplified_union(items: impl IntoIterator<Item = RType<'ctx>>) -> RType<'ctx> {
        fn flatten<'ctx>(typ: RType<'ctx>, out: &mut Vec<RType<'ctx>>) {
            match typ {
                RType::Union(members) => {
                    for member in members.iter() {
                        flatten(member.clone(), out);
                    }
                }
                other => {
                    if !out.contains(&other) {
                        out.push(other);
                    }
                }
            }
        }

        let mut members = Vec::new();
        for item in items {
            flatten(item, &mut members);
        }
        members.sort_by_key(|member| member.to_string());
        match members.len() {
            0 => RType::Object,
            1 => members.pop().unwrap(),
            _ => RType::Union(members.into()),
        }
    }

    /// Width in bits of a fixed-width integer representation.
    pub fn size_bits(&self) -> Option<u32> {
        match self {
            Self::I8 | Self::U8 => Some(8),
            Self::I16 | Self::U16 => Some(16),
            Self::I32 | Self::U32 => Some(32),
            Self::I64 | Self::U64 => Some(64),
            _ => None,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::Int)
    }

    #[inline]
    pub fn is_fixed_width_int(&self) -> bool {
        self.size_bits().is_some()
    }

    /// Whether values of this representation live outside the heap.
    pub fn is_unboxed(&self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Float | Self::Tuple(_) | Self::None
        ) || self.is_fixed_width_int()
    }
}

impl fmt::Display for RType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::I8 => f.write_str("i8"),
            Self::I16 => f.write_str("i16"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::U8 => f.write_str("u8"),
            Self::U16 => f.write_str("u16"),
            Self::U32 => f.write_str("u32"),
            Self::U64 => f.write_str("u64"),
            Self::Float => f.write_str("float"),
            Self::Str => f.write_str("str"),
            Self::Bytes => f.write_str("bytes"),
            Self::Tuple(items) => {
                f.write_str("tuple<")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(">")
            }
            Self::VarTuple => f.write_str("tuple"),
            Self::List => f.write_str("list"),
            Self::Map => f.write_str("map"),
            Self::Set => f.write_str("set"),
            Self::FrozenSet => f.write_str("frozenset"),
            Self::Range => f.write_str("range"),
            Self::Instance(id) => write!(f, "{id}"),
            Self::Union(members) => {
                f.write_str("union<")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str(">")
            }
            Self::Object => f.write_str("object"),
            Self::None => f.write_str("none"),
        }
    }
}

/// Identity of a compiled or synthesized class, stable for the lifetime
/// of the compilation unit.
///
/// Ids created by the same [`NameInterner`] compare by pointer, so two
/// lookups of the same name are guaranteed to produce equal ids.
#[derive(Debug, Clone, Copy)]
pub struct ClassId<'ctx>(&'ctx str);

impl<'ctx> ClassId<'ctx> {
    #[inline]
    pub fn as_str(&self) -> &'ctx str {
        self.0
    }
}

impl PartialEq for ClassId<'_> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0.as_ptr(), other.0.as_ptr())
    }
}

impl Eq for ClassId<'_> {}

impl Hash for ClassId<'_> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        ptr::hash(self.0.as_ptr(), state);
    }
}

impl IdentityHashable for ClassId<'_> {}

impl AsRef<str> for ClassId<'_> {
    #[inline]
    fn as_ref(&self) -> &str {
        self.0
    }
}

impl fmt::Display for ClassId<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Interner backing [`ClassId`] identities.
#[derive(Default)]
pub struct NameInterner {
    names: FrozenIndexSet<String>,
}

impl NameInterner {
    pub fn intern(&self, name: impl AsRef<str> + Into<String>) -> ClassId<'_> {
        match self.names.get(name.as_ref()) {
            Some(str) => ClassId(str),
            None => ClassId(self.names.insert(name.into())),
        }
    }
}

impl fmt::Debug for NameInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameInterner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_ids_compare_by_identity() {
        let interner = NameInterner::default();
        let a = interner.intern("app.Widget");
        let b = interner.intern("app.Widget");
        let c = interner.intern("app.Gadget");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn union_simplification_deduplicates_and_flattens() {
        let inner = RType::simplified_union([RType::Int, RType::Str]);
        let outer = RType::simplified_union([inner, RType::Int, RType::None]);
        let RType::Union(members) = outer else {
            panic!("expected a union");
        };
        assert_eq!(members.len(), 3);
        assert!(members.contains(&RType::Int));
        assert!(members.contains(&RType::Str));
        assert!(members.contains(&RType::None));
    }

    #[test]
    fn union_of_identical_members_collapses() {
        assert_eq!(RType::simplified_union([RType::Bool, RType::Bool]), RType::Bool);
    }

    #[test]
    fn union_simplification_is_order_insensitive() {
        let ab = RType::simplified_union([RType::Int, RType::Str]);
        let ba = RType::simplified_union([RType::Str, RType::Int]);
        assert_eq!(ab, ba);
    }

    #[test]
    fn union_simplification_is_idempotent() {
        let once = RType::simplified_union([RType::Int, RType::Str, RType::None]);
        let twice = RType::simplified_union([once.clone()]);
        assert_eq!(once, twice);
    }

    #[test]
    fn fixed_width_queries() {
        assert_eq!(RType::U8.size_bits(), Some(8));
        assert_eq!(RType::I64.size_bits(), Some(64));
        assert!(!RType::U8.is_signed());
        assert!(RType::I16.is_signed());
        assert!(RType::Int.size_bits().is_none());
        assert!(RType::Tuple([RType::Bool].into()).is_unboxed());
        assert!(!RType::List.is_unboxed());
    }
}
