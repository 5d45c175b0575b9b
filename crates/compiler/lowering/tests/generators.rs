use ivy_compiler_ir::{FunctionBuilder, Instr, NameInterner, RType, Value};
use ivy_compiler_lowering::context::{EXC_KIND_SLOT, RESUME_SLOT, SEND_SLOT};
use ivy_compiler_lowering::types::{FuncItem, StaticType};
use ivy_compiler_lowering::{FuncCtx, FuncFlags, Mapper, ResumeState, EXHAUSTED};

fn generator_flags() -> FuncFlags {
    FuncFlags::new().with_is_generator(true)
}

/// Walks a small generator through its whole lifecycle the way the driver
/// does: synthesize the machine, register it with the mapper, emit a
/// suspension and the dispatch table, and check the wired result.
#[test]
fn generator_lowering_end_to_end() {
    let interner = NameInterner::default();
    let mut mapper = Mapper::new(&interner);
    let mut code = FunctionBuilder::new();

    let mut item = FuncItem::new("app.count", "count", Vec::new(), StaticType::Any);
    item.is_generator = true;

    let mut ctx = FuncCtx::new("count", None, "app", generator_flags());
    let dispatch = code.new_block();
    let machine_name = {
        let machine = ctx.setup_generator_class(&interner, dispatch);
        machine.set_self_value(code.alloc(RType::Object).into());
        machine.name()
    };
    ctx.setup_env(&interner, None).unwrap();
    mapper.register_generator("app.count", machine_name);

    // captured state lives on the machine, no separate environment class
    ctx.capture("n", RType::Int).unwrap();
    assert_eq!(ctx.synthesized_classes().len(), 1);

    let sig = mapper.signature(&item, true).unwrap();
    assert_eq!(sig.return_type(), &RType::Instance(machine_name));

    // one yield: suspend at continuation 1, then finish
    let entry = code.current();
    let resume_point = code.new_block();
    let exhausted = code.new_block();
    {
        let machine = ctx.generator_class_mut().unwrap();
        let label = machine.add_continuation(resume_point);
        assert_eq!(label, 1);
        machine.emit_suspend(&mut code, label, Value::int(7)).unwrap();
    }
    code.activate(resume_point);
    {
        let machine = ctx.generator_class().unwrap();
        machine.emit_finish(&mut code).unwrap();
    }
    code.raise("StopIteration");
    code.activate(exhausted);
    code.raise("StopIteration");
    {
        let machine = ctx.generator_class().unwrap();
        machine.emit_dispatch(&mut code, entry, exhausted).unwrap();
    }

    let body = code.finish();

    // the suspension stored label 1, the finish stored the sentinel
    let stored: Vec<i128> = body
        .blocks
        .iter()
        .flat_map(|block| &block.instrs)
        .filter_map(|instr| match instr {
            Instr::SetAttr { attr, value, .. } if attr == RESUME_SLOT => {
                value.as_int_literal().map(|(v, _)| v)
            }
            _ => None,
        })
        .collect();
    assert_eq!(stored, [1, EXHAUSTED as i128]);

    // the dispatch covers entry plus one continuation and defaults to the
    // terminal arm
    let dispatched = body
        .blocks
        .iter()
        .flat_map(|block| &block.instrs)
        .find_map(|instr| match instr {
            Instr::Dispatch { arms, default, .. } => Some((arms.len(), *default)),
            _ => None,
        });
    assert_eq!(dispatched, Some((2, exhausted)));
}

#[test]
fn machine_slots_are_wired_once() {
    let interner = NameInterner::default();
    let mut code = FunctionBuilder::new();
    let mut ctx = FuncCtx::new("gen", None, "app", generator_flags());
    let dispatch = code.new_block();
    ctx.setup_generator_class(&interner, dispatch);
    ctx.setup_env(&interner, None).unwrap();

    let machine = ctx.generator_class().unwrap();
    let class = machine.class();
    assert_eq!(class.attr_type(RESUME_SLOT), Some(&RType::I32));
    assert_eq!(class.attr_type(SEND_SLOT), Some(&RType::Object));
    assert_eq!(class.attr_type(EXC_KIND_SLOT), Some(&RType::Object));

    // capture slots append after the protocol slots and stay stable
    let first = ctx.capture("a", RType::Int).unwrap();
    let second = ctx.capture("b", RType::Str).unwrap();
    assert_eq!(second, first + 1);
    assert_eq!(ctx.capture("a", RType::Int).unwrap(), first);
}

#[test]
fn nested_functions_share_capture_slots() {
    let interner = NameInterner::default();
    let mut outer = FuncCtx::new(
        "outer",
        None,
        "app",
        FuncFlags::new().with_contains_nested(true),
    );
    outer.setup_env(&interner, None).unwrap();

    // both nested functions read the same outer variable
    let from_first = outer.capture("shared", RType::Int).unwrap();
    let from_second = outer.capture("shared", RType::Int).unwrap();
    assert_eq!(from_first, from_second);
    assert_eq!(outer.env_class().unwrap().class().attrs().len(), 1);
}

#[test]
fn exhausted_generators_resume_deterministically() {
    // repeated resumes of a finished machine always select the terminal arm
    let slot = ResumeState::Exhausted.encode().unwrap();
    for _ in 0..3 {
        let state = ResumeState::decode(slot);
        assert_eq!(state, ResumeState::Exhausted);
        assert_eq!(state.entry_arm(), None);
    }
}
