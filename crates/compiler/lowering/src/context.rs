//! Per-function lowering context: tracks nesting, decides which classes get
//! synthesized for closures and generators, and wires the slots of the
//! generator state machine.

use std::iter;

use bitfield_struct::bitfield;
use itertools::Itertools;
use ivy_compiler_ir::{
    ClassDescriptor, ClassId, FunctionBuilder, Label, NameInterner, RType, Value,
};

use crate::error::{FaultError, LowerResult};

/// Slot holding the enclosing environment instance on a nested environment
/// or callable class.
pub const ENV_SLOT: &str = "$env";
/// Slot holding the resume label of a generator machine.
pub const RESUME_SLOT: &str = "$resume";
pub const SEND_SLOT: &str = "$send";
pub const EXC_KIND_SLOT: &str = "$exc_kind";
pub const EXC_VALUE_SLOT: &str = "$exc_value";
pub const EXC_TRACE_SLOT: &str = "$exc_trace";
pub const RETURN_SLOT: &str = "$retval";

/// Stored resume label of a generator that has finished. Any value outside
/// of the dispatch arms resolves to the terminal arm, so a finished machine
/// stays finished no matter how often it is resumed.
pub const EXHAUSTED: i64 = -1;

/// A deferred wire-up point. Parts of the context are only attached once an
/// earlier lowering pass has produced them; reading one too early is a
/// driver bug and reported as such instead of a crash.
#[derive(Debug)]
pub struct Link<T> {
    what: &'static str,
    value: Option<T>,
}

impl<T> Link<T> {
    pub fn new(what: &'static str) -> Self {
        Self { what, value: None }
    }

    pub fn attach(&mut self, value: T) -> &mut T {
        self.value.insert(value)
    }

    pub fn get(&self) -> LowerResult<&T> {
        self.value
            .as_ref()
            .ok_or(FaultError::UninitializedLink(self.what))
    }

    pub fn get_mut(&mut self) -> LowerResult<&mut T> {
        self.value
            .as_mut()
            .ok_or(FaultError::UninitializedLink(self.what))
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.value.is_some()
    }
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct FuncFlags {
    pub is_nested: bool,
    pub contains_nested: bool,
    pub is_decorated: bool,
    pub is_generator: bool,
    pub is_coroutine: bool,
    /// Set for methods of classes compiled without a fixed native layout.
    pub in_non_ext_class: bool,
    #[bits(2)]
    __: u8,
}

/// The synthesized class holding variables captured by nested functions.
/// Captured variables live in numbered slots; the enclosing function reads
/// and writes them through the environment instance instead of local
/// registers.
#[derive(Debug)]
pub struct EnvClass<'ctx> {
    class: ClassDescriptor<'ctx>,
}

impl<'ctx> EnvClass<'ctx> {
    pub fn new(name: ClassId<'ctx>, parent: Option<ClassId<'ctx>>) -> Self {
        let mut class = ClassDescriptor::synthesized(name);
        if let Some(parent) = parent {
            class.add_attr(ENV_SLOT, RType::Instance(parent));
        }
        Self { class }
    }

    /// Adds a capture slot for a variable, returning its index. Capturing
    /// the same name again returns the existing slot.
    pub fn add_capture(&mut self, name: &'ctx str, typ: RType<'ctx>) -> usize {
        self.class.add_attr(name, typ)
    }

    #[inline]
    pub fn name(&self) -> ClassId<'ctx> {
        self.class.name()
    }

    #[inline]
    pub fn class(&self) -> &ClassDescriptor<'ctx> {
        &self.class
    }
}

/// The synthesized callable class standing in for a nested function value.
/// It captures the active environment instance at creation time.
#[derive(Debug)]
pub struct CallableClass<'ctx> {
    class: ClassDescriptor<'ctx>,
    self_value: Link<Value<'ctx>>,
    env_value: Link<Value<'ctx>>,
}

impl<'ctx> CallableClass<'ctx> {
    pub fn new(name: ClassId<'ctx>) -> Self {
        Self {
            class: ClassDescriptor::synthesized(name),
            self_value: Link::new("callable self value"),
            env_value: Link::new("callable environment value"),
        }
    }

    /// Wires the environment slot once the environment class is known.
    pub fn attach_env(&mut self, env: ClassId<'ctx>) -> usize {
        self.class.add_attr(ENV_SLOT, RType::Instance(env))
    }

    /// Records the environment instance captured when the callable value
    /// is created.
    pub fn set_env_value(&mut self, value: Value<'ctx>) {
        self.env_value.attach(value);
    }

    pub fn env_value(&self) -> LowerResult<&Value<'ctx>> {
        self.env_value.get()
    }

    pub fn set_self_value(&mut self, value: Value<'ctx>) {
        self.self_value.attach(value);
    }

    pub fn self_value(&self) -> LowerResult<&Value<'ctx>> {
        self.self_value.get()
    }

    #[inline]
    pub fn name(&self) -> ClassId<'ctx> {
        self.class.name()
    }

    #[inline]
    pub fn class(&self) -> &ClassDescriptor<'ctx> {
        &self.class
    }
}

/// The synthesized state machine class of a generator or coroutine. It
/// stores the resume label, the value passed into the last resume, the
/// exception slots of a pending throw, and the eventual return value.
#[derive(Debug)]
pub struct GeneratorClass<'ctx> {
    class: ClassDescriptor<'ctx>,
    self_value: Link<Value<'ctx>>,
    dispatch_block: Label,
    continuations: Vec<Label>,
}

impl<'ctx> GeneratorClass<'ctx> {
    pub fn new(name: ClassId<'ctx>, dispatch_block: Label) -> Self {
        let mut class = ClassDescriptor::synthesized(name);
        class.add_attr(RESUME_SLOT, RType::I32);
        class.add_attr(SEND_SLOT, RType::Object);
        class.add_attr(EXC_KIND_SLOT, RType::Object);
        class.add_attr(EXC_VALUE_SLOT, RType::Object);
        class.add_attr(EXC_TRACE_SLOT, RType::Object);
        class.add_attr(RETURN_SLOT, RType::Object);
        Self {
            class,
            self_value: Link::new("generator self value"),
            dispatch_block,
            continuations: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> ClassId<'ctx> {
        self.class.name()
    }

    #[inline]
    pub fn class(&self) -> &ClassDescriptor<'ctx> {
        &self.class
    }

    pub fn class_mut(&mut self) -> &mut ClassDescriptor<'ctx> {
        &mut self.class
    }

    pub fn set_self_value(&mut self, value: Value<'ctx>) {
        self.self_value.attach(value);
    }

    pub fn self_value(&self) -> LowerResult<&Value<'ctx>> {
        self.self_value.get()
    }

    #[inline]
    pub fn dispatch_block(&self) -> Label {
        self.dispatch_block
    }

    #[inline]
    pub fn continuations(&self) -> &[Label] {
        &self.continuations
    }

    /// Registers a continuation block for a suspension point and returns the
    /// resume label that selects it. Arm zero is the function entry, so
    /// continuation labels start at one.
    pub fn add_continuation(&mut self, block: Label) -> i64 {
        self.continuations.push(block);
        self.continuations.len() as i64
    }

    /// Suspends the machine: stores `resume_label` into the resume slot,
    /// then returns `value` to the caller of the resume entry point.
    pub fn emit_suspend(
        &self,
        code: &mut FunctionBuilder<'ctx>,
        resume_label: i64,
        value: Value<'ctx>,
    ) -> LowerResult<()> {
        let this = self.self_value.get()?.clone();
        code.set_attr(
            this,
            self.class.name(),
            RESUME_SLOT,
            Value::Int {
                value: resume_label as i128,
                typ: RType::I32,
            },
        );
        code.ret(Some(value));
        Ok(())
    }

    /// Marks the machine as finished, pinning every later resume onto the
    /// terminal dispatch arm.
    pub fn emit_finish(&self, code: &mut FunctionBuilder<'ctx>) -> LowerResult<()> {
        let this = self.self_value.get()?.clone();
        code.set_attr(
            this,
            self.class.name(),
            RESUME_SLOT,
            Value::Int {
                value: EXHAUSTED as i128,
                typ: RType::I32,
            },
        );
        Ok(())
    }

    /// Fills the dispatch block: loads the resume label and branches to the
    /// matching continuation. Labels outside of the table, including the
    /// exhausted sentinel, fall through to `exhausted`.
    pub fn emit_dispatch(
        &self,
        code: &mut FunctionBuilder<'ctx>,
        entry: Label,
        exhausted: Label,
    ) -> LowerResult<()> {
        let this = self.self_value.get()?.clone();
        code.activate(self.dispatch_block);
        let label = code.get_attr(this, self.class.name(), RESUME_SLOT, RType::I32);
        let arms: Vec<Label> = iter::once(entry)
            .chain(self.continuations.iter().copied())
            .collect();
        code.dispatch(label, arms, exhausted);
        Ok(())
    }
}

/// The observable lifecycle of a generator machine, decoded from the
/// resume slot. `Running` is transient and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeState {
    NotStarted,
    Running,
    SuspendedAt(u32),
    Exhausted,
}

impl ResumeState {
    pub fn decode(slot: i64) -> Self {
        match slot {
            0 => Self::NotStarted,
            n if n > 0 => Self::SuspendedAt(n as u32),
            _ => Self::Exhausted,
        }
    }

    pub fn encode(self) -> Option<i64> {
        match self {
            Self::NotStarted => Some(0),
            Self::SuspendedAt(label) => Some(label as i64),
            Self::Exhausted => Some(EXHAUSTED),
            Self::Running => None,
        }
    }

    /// The dispatch arm a resume enters, or None when the machine has
    /// finished and the resume resolves to the terminal outcome.
    pub fn entry_arm(self) -> Option<u32> {
        match self {
            Self::NotStarted => Some(0),
            Self::SuspendedAt(label) => Some(label),
            Self::Running | Self::Exhausted => None,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        self == Self::Exhausted
    }
}

/// Everything the lowering driver tracks about the function currently being
/// translated. The synthesized class handles start out unattached and are
/// wired as the corresponding setup passes run.
#[derive(Debug)]
pub struct FuncCtx<'ctx> {
    name: &'ctx str,
    class_name: Option<&'ctx str>,
    namespace: &'ctx str,
    flags: FuncFlags,
    callable_class: Link<CallableClass<'ctx>>,
    env_class: Link<EnvClass<'ctx>>,
    generator_class: Link<GeneratorClass<'ctx>>,
    curr_env: Link<Value<'ctx>>,
}

impl<'ctx> FuncCtx<'ctx> {
    pub fn new(
        name: &'ctx str,
        class_name: Option<&'ctx str>,
        namespace: &'ctx str,
        flags: FuncFlags,
    ) -> Self {
        Self {
            name,
            class_name,
            namespace,
            flags,
            callable_class: Link::new("callable class"),
            env_class: Link::new("environment class"),
            generator_class: Link::new("generator class"),
            curr_env: Link::new("current environment"),
        }
    }

    #[inline]
    pub fn name(&self) -> &'ctx str {
        self.name
    }

    #[inline]
    pub fn flags(&self) -> FuncFlags {
        self.flags
    }

    /// A name unique across the compilation unit, used to name the
    /// synthesized classes of this function.
    pub fn namespaced_name(&self) -> String {
        [Some(self.namespace), self.class_name, Some(self.name)]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .join("_")
    }

    /// A generator or coroutine that neither is nested nor contains nested
    /// functions can carry its captures on the machine class itself, saving
    /// a class and an indirection on every capture access.
    pub fn can_merge_generator_and_env(&self) -> bool {
        (self.flags.is_generator() || self.flags.is_coroutine())
            && !self.flags.is_nested()
            && !self.flags.contains_nested()
    }

    pub fn setup_generator_class(
        &mut self,
        interner: &'ctx NameInterner,
        dispatch_block: Label,
    ) -> &mut GeneratorClass<'ctx> {
        let name = interner.intern(format!("{}_gen", self.namespaced_name()));
        log::debug!("synthesizing generator machine {name}");
        self.generator_class
            .attach(GeneratorClass::new(name, dispatch_block))
    }

    /// Sets up the capture environment. For a mergeable generator the
    /// captures are placed on the machine class instead and no separate
    /// environment class is synthesized.
    pub fn setup_env(
        &mut self,
        interner: &'ctx NameInterner,
        parent: Option<ClassId<'ctx>>,
    ) -> LowerResult<()> {
        if self.can_merge_generator_and_env() {
            let machine = self.generator_class.get_mut()?;
            if let Some(parent) = parent {
                machine.class_mut().add_attr(ENV_SLOT, RType::Instance(parent));
            }
        } else {
            let name = interner.intern(format!("{}_env", self.namespaced_name()));
            log::debug!("synthesizing environment class {name}");
            self.env_class.attach(EnvClass::new(name, parent));
        }
        Ok(())
    }

    pub fn setup_callable_class(&mut self, interner: &'ctx NameInterner) -> &mut CallableClass<'ctx> {
        let name = interner.intern(format!("{}_obj", self.namespaced_name()));
        log::debug!("synthesizing callable class {name}");
        self.callable_class.attach(CallableClass::new(name))
    }

    /// Adds a capture slot for `name`, routing it to the environment class
    /// or to a merged generator machine. Idempotent per name.
    pub fn capture(&mut self, name: &'ctx str, typ: RType<'ctx>) -> LowerResult<usize> {
        if self.can_merge_generator_and_env() {
            Ok(self.generator_class.get_mut()?.class_mut().add_attr(name, typ))
        } else {
            Ok(self.env_class.get_mut()?.add_capture(name, typ))
        }
    }

    /// The class captured variables are stored on.
    pub fn capture_class(&self) -> LowerResult<ClassId<'ctx>> {
        if self.can_merge_generator_and_env() {
            Ok(self.generator_class.get()?.name())
        } else {
            Ok(self.env_class.get()?.name())
        }
    }

    pub fn env_class(&self) -> LowerResult<&EnvClass<'ctx>> {
        self.env_class.get()
    }

    pub fn callable_class(&self) -> LowerResult<&CallableClass<'ctx>> {
        self.callable_class.get()
    }

    pub fn callable_class_mut(&mut self) -> LowerResult<&mut CallableClass<'ctx>> {
        self.callable_class.get_mut()
    }

    pub fn generator_class(&self) -> LowerResult<&GeneratorClass<'ctx>> {
        self.generator_class.get()
    }

    pub fn generator_class_mut(&mut self) -> LowerResult<&mut GeneratorClass<'ctx>> {
        self.generator_class.get_mut()
    }

    pub fn set_curr_env(&mut self, value: Value<'ctx>) {
        self.curr_env.attach(value);
    }

    pub fn curr_env(&self) -> LowerResult<&Value<'ctx>> {
        self.curr_env.get()
    }

    /// The classes this function contributed to the compilation unit.
    pub fn synthesized_classes(&self) -> Vec<&ClassDescriptor<'ctx>> {
        let mut classes = Vec::new();
        if let Ok(env) = self.env_class.get() {
            classes.push(env.class());
        }
        if let Ok(callable) = self.callable_class.get() {
            classes.push(callable.class());
        }
        if let Ok(machine) = self.generator_class.get() {
            classes.push(machine.class());
        }
        classes
    }
}

#[cfg(test)]
mod tests {
    use ivy_compiler_ir::Instr;

    use super::*;

    fn flags(is_generator: bool, is_nested: bool, contains_nested: bool) -> FuncFlags {
        FuncFlags::new()
            .with_is_generator(is_generator)
            .with_is_nested(is_nested)
            .with_contains_nested(contains_nested)
    }

    #[test]
    fn links_report_premature_access() {
        let ctx = FuncCtx::new("f", None, "mod", FuncFlags::new());
        assert_eq!(
            ctx.curr_env(),
            Err(FaultError::UninitializedLink("current environment"))
        );
        assert!(ctx.generator_class().is_err());
    }

    #[test]
    fn namespaced_name_skips_empty_parts() {
        let free = FuncCtx::new("f", None, "mod", FuncFlags::new());
        assert_eq!(free.namespaced_name(), "mod_f");
        let method = FuncCtx::new("get", Some("Point"), "mod", FuncFlags::new());
        assert_eq!(method.namespaced_name(), "mod_Point_get");
    }

    #[test]
    fn top_level_generator_merges_env_into_machine() {
        let interner = NameInterner::default();
        let mut code = FunctionBuilder::new();
        let mut ctx = FuncCtx::new("gen", None, "mod", flags(true, false, false));
        assert!(ctx.can_merge_generator_and_env());

        let dispatch = code.new_block();
        ctx.setup_generator_class(&interner, dispatch);
        ctx.setup_env(&interner, None).unwrap();

        let base_slots = ctx.generator_class().unwrap().class().attrs().len();
        let slot = ctx.capture("x", RType::Int).unwrap();
        assert_eq!(slot, base_slots);
        assert_eq!(ctx.synthesized_classes().len(), 1);
        assert_eq!(
            ctx.capture_class().unwrap(),
            ctx.generator_class().unwrap().name()
        );
    }

    #[test]
    fn top_level_coroutine_merges_env_into_machine() {
        let interner = NameInterner::default();
        let mut code = FunctionBuilder::new();
        let mut ctx = FuncCtx::new("fetch", None, "mod", FuncFlags::new().with_is_coroutine(true));
        assert!(ctx.can_merge_generator_and_env());
        assert!(!FuncCtx::new(
            "fetch",
            None,
            "mod",
            FuncFlags::new().with_is_coroutine(true).with_is_nested(true)
        )
        .can_merge_generator_and_env());

        let dispatch = code.new_block();
        ctx.setup_generator_class(&interner, dispatch);
        ctx.setup_env(&interner, None).unwrap();

        ctx.capture("pending", RType::Int).unwrap();
        assert_eq!(ctx.synthesized_classes().len(), 1);
        assert_eq!(
            ctx.capture_class().unwrap(),
            ctx.generator_class().unwrap().name()
        );
    }

    #[test]
    fn nested_generator_keeps_env_separate() {
        let interner = NameInterner::default();
        let mut code = FunctionBuilder::new();
        let mut ctx = FuncCtx::new("gen", None, "mod", flags(true, true, false));
        assert!(!ctx.can_merge_generator_and_env());

        let dispatch = code.new_block();
        ctx.setup_generator_class(&interner, dispatch);
        let parent = interner.intern("mod_outer_env");
        ctx.setup_env(&interner, Some(parent)).unwrap();

        ctx.capture("x", RType::Int).unwrap();
        assert_eq!(ctx.synthesized_classes().len(), 2);
        assert_eq!(
            ctx.env_class().unwrap().class().attr_type(ENV_SLOT),
            Some(&RType::Instance(parent))
        );
    }

    #[test]
    fn captures_are_idempotent_per_name() {
        let interner = NameInterner::default();
        let mut ctx = FuncCtx::new("outer", None, "mod", FuncFlags::new().with_contains_nested(true));
        ctx.setup_env(&interner, None).unwrap();

        let first = ctx.capture("x", RType::Int).unwrap();
        let again = ctx.capture("x", RType::Int).unwrap();
        let second = ctx.capture("y", RType::Str).unwrap();
        assert_eq!(first, again);
        assert_ne!(first, second);
    }

    #[test]
    fn callable_class_wires_env_and_self() {
        let interner = NameInterner::default();
        let mut code = FunctionBuilder::new();
        let mut ctx = FuncCtx::new("inner", None, "mod", FuncFlags::new().with_is_nested(true));
        ctx.setup_env(&interner, Some(interner.intern("mod_outer_env")))
            .unwrap();
        let env_name = ctx.env_class().unwrap().name();

        let self_value: Value = code.alloc(RType::Object).into();
        let env_value: Value = code.alloc(RType::Instance(env_name)).into();
        let callable = ctx.setup_callable_class(&interner);
        assert_eq!(callable.attach_env(env_name), 0);
        assert_eq!(
            callable.class().attr_type(ENV_SLOT),
            Some(&RType::Instance(env_name))
        );
        callable.set_self_value(self_value.clone());
        assert_eq!(callable.self_value().unwrap(), &self_value);
        assert!(callable.env_value().is_err());
        callable.set_env_value(env_value.clone());
        assert_eq!(callable.env_value().unwrap(), &env_value);

        ctx.set_curr_env(env_value.clone());
        assert_eq!(ctx.curr_env().unwrap(), &env_value);
    }

    #[test]
    fn machine_class_carries_the_protocol_slots() {
        let interner = NameInterner::default();
        let mut code = FunctionBuilder::new();
        let machine = GeneratorClass::new(interner.intern("mod_gen_gen"), code.new_block());
        let class = machine.class();
        assert_eq!(class.attr_type(RESUME_SLOT), Some(&RType::I32));
        assert_eq!(class.attr_type(SEND_SLOT), Some(&RType::Object));
        assert_eq!(class.attr_type(RETURN_SLOT), Some(&RType::Object));
        assert!(class.has_exact_layout());
    }

    #[test]
    fn dispatch_covers_entry_and_continuations() {
        let interner = NameInterner::default();
        let mut code = FunctionBuilder::new();
        let entry = code.current();
        let dispatch = code.new_block();
        let mut machine = GeneratorClass::new(interner.intern("mod_gen_gen"), dispatch);
        machine.set_self_value(code.alloc(RType::Object).into());

        let cont = code.new_block();
        assert_eq!(machine.add_continuation(cont), 1);
        let exhausted = code.new_block();
        machine.emit_dispatch(&mut code, entry, exhausted).unwrap();

        let body = code.finish();
        let instrs = &body.blocks[dispatch.index()].instrs;
        match instrs.last() {
            Some(Instr::Dispatch { arms, default, .. }) => {
                assert_eq!(arms.as_ref(), [entry, cont]);
                assert_eq!(*default, exhausted);
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn resume_states_round_trip_through_the_slot() {
        assert_eq!(ResumeState::decode(0), ResumeState::NotStarted);
        assert_eq!(ResumeState::decode(3), ResumeState::SuspendedAt(3));
        assert_eq!(ResumeState::decode(EXHAUSTED), ResumeState::Exhausted);
        assert_eq!(ResumeState::decode(-7), ResumeState::Exhausted);

        for state in [
            ResumeState::NotStarted,
            ResumeState::SuspendedAt(5),
            ResumeState::Exhausted,
        ] {
            assert_eq!(ResumeState::decode(state.encode().unwrap()), state);
        }
        assert_eq!(ResumeState::Running.encode(), None);
    }

    #[test]
    fn exhausted_machines_stay_exhausted() {
        let state = ResumeState::Exhausted;
        assert!(state.is_terminal());
        assert_eq!(state.entry_arm(), None);
        assert_eq!(ResumeState::decode(state.encode().unwrap()).entry_arm(), None);
    }

    #[test]
    fn suspended_machines_resume_at_their_continuation() {
        assert_eq!(ResumeState::NotStarted.entry_arm(), Some(0));
        assert_eq!(ResumeState::SuspendedAt(2).entry_arm(), Some(2));
        assert_eq!(ResumeState::Running.entry_arm(), None);
    }
}
