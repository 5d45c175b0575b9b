use std::borrow::Cow;

use bitfield_struct::bitfield;
use indexmap::IndexMap;

use crate::rtype::{ClassId, RType};

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ClassFlags {
    pub is_final: bool,
    /// Set when subclasses may be defined outside of the compilation
    /// unit, which makes the attribute layout unreliable for direct
    /// type tag checks.
    pub allows_foreign_subclasses: bool,
    /// Set on classes invented by the compiler (environments, callable
    /// wrappers, generator state machines).
    pub is_synthesized: bool,
    #[bits(5)]
    __: u8,
}

/// Layout and identity of a compiled class.
///
/// Descriptors are registered once when the class is compiled and remain
/// stable for the whole compilation unit. Synthesized classes use the
/// same shape as user classes so the backend needs no special cases.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDescriptor<'ctx> {
    name: ClassId<'ctx>,
    base: Option<ClassId<'ctx>>,
    attrs: IndexMap<Cow<'ctx, str>, RType<'ctx>>,
    flags: ClassFlags,
}

impl<'ctx> ClassDescriptor<'ctx> {
    pub fn new(name: ClassId<'ctx>, flags: ClassFlags) -> Self {
        Self {
            name,
            base: None,
            attrs: IndexMap::default(),
            flags,
        }
    }

    pub fn synthesized(name: ClassId<'ctx>) -> Self {
        Self::new(name, ClassFlags::new().with_is_final(true).with_is_synthesized(true))
    }

    pub fn with_base(mut self, base: ClassId<'ctx>) -> Self {
        self.base = Some(base);
        self
    }

    #[inline]
    pub fn name(&self) -> ClassId<'ctx> {
        self.name
    }

    #[inline]
    pub fn base(&self) -> Option<ClassId<'ctx>> {
        self.base
    }

    #[inline]
    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    /// Adds an attribute slot, returning its index. Re-adding an existing
    /// attribute keeps the original slot and type.
    pub fn add_attr(&mut self, name: impl Into<Cow<'ctx, str>>, typ: RType<'ctx>) -> usize {
        let entry = self.attrs.entry(name.into());
        let index = entry.index();
        entry.or_insert(typ);
        index
    }

    pub fn attr_type(&self, name: &str) -> Option<&RType<'ctx>> {
        self.attrs.get(name)
    }

    pub fn attr_index(&self, name: &str) -> Option<usize> {
        self.attrs.get_index_of(name)
    }

    #[inline]
    pub fn attrs(&self) -> impl ExactSizeIterator<Item = (&str, &RType<'ctx>)> {
        self.attrs.iter().map(|(name, typ)| (name.as_ref(), typ))
    }

    /// Whether values of this class are guaranteed to carry exactly this
    /// layout at runtime, making a direct type tag comparison valid.
    pub fn has_exact_layout(&self) -> bool {
        !self.flags.allows_foreign_subclasses()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtype::NameInterner;

    #[test]
    fn attr_slots_are_idempotent() {
        let interner = NameInterner::default();
        let mut class = ClassDescriptor::synthesized(interner.intern("env.outer"));
        let first = class.add_attr("count", RType::Int);
        let again = class.add_attr("count", RType::Object);
        assert_eq!(first, again);
        assert_eq!(class.attr_type("count"), Some(&RType::Int));
        assert_eq!(class.attrs().len(), 1);
    }

    #[test]
    fn foreign_subclassing_disables_exact_layout() {
        let interner = NameInterner::default();
        let open = ClassDescriptor::new(
            interner.intern("app.Open"),
            ClassFlags::new().with_allows_foreign_subclasses(true),
        );
        let sealed = ClassDescriptor::new(interner.intern("app.Sealed"), ClassFlags::new());
        assert!(!open.has_exact_layout());
        assert!(sealed.has_exact_layout());
    }
}
