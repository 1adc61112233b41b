use mercury_engine::machine::code::CodeModule;
use mercury_engine::type_info::*;
use mercury_engine::type_tables::builtin;
use mercury_engine::types::*;
use mercury_engine::*;

use lazy_static::lazy_static;

use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_MODULE: AtomicUsize = AtomicUsize::new(0);

lazy_static! {
    static ref COLOR_TYPE: TypeInfo = {
        let ctor = TypeCtorInfo::new("engine_tests", "color", 0, TypeCtorRep::Enum);
        ctor.define_enum(&["red", "green", "blue"]);
        TypeInfo::ground(&ctor)
    };

    static ref TREE_TYPE: TypeInfo = {
        let ctor = TypeCtorInfo::new("engine_tests", "tree", 0, TypeCtorRep::Du);
        let tree = PseudoTypeInfo::ground(&ctor);
        let string = PseudoTypeInfo::ground(&builtin::string());

        ctor.define_du(vec![
            FunctorSpec::new("leaf", vec![]),
            FunctorSpec::new("node", vec![tree.clone(), string, tree]),
        ]);

        TypeInfo::ground(&ctor)
    };

    // more functors with arguments than there are primary tags
    static ref WIDE_TYPE: TypeInfo = {
        let ctor = TypeCtorInfo::new("engine_tests", "wide", 0, TypeCtorRep::Du);
        let int = PseudoTypeInfo::ground(&builtin::int());

        let mut functors = vec![FunctorSpec::new("none", vec![])];
        functors.extend((0..10).map(|i| FunctorSpec::new(&format!("w{}", i), vec![int.clone()])));

        ctor.define_du(functors);
        TypeInfo::ground(&ctor)
    };

    static ref ANY_TYPE: TypeInfo = {
        let ctor = TypeCtorInfo::new("engine_tests", "any", 0, TypeCtorRep::Du);

        ctor.define_du(vec![
            FunctorSpec::new("any", vec![PseudoTypeInfo::ExistVar(1)]).with_exist_info(1),
        ]);

        TypeInfo::ground(&ctor)
    };
}

/// A small engine, so that tests can create many of them.
pub fn engine() -> Engine {
    builtin::init();

    EngineBuilder::new()
        .with_heap_size(128)
        .with_solutions_heap_size(64)
        .with_global_heap_size(64)
        .with_detstack_size(64)
        .with_nondetstack_size(64)
        .with_redzone_size(4)
        .build()
}

/// A code module whose name no other test uses.
pub fn module(prefix: &str) -> CodeModule {
    let n = NEXT_MODULE.fetch_add(1, Ordering::Relaxed);
    CodeModule::new(&format!("engine_tests_{}_{}", prefix, n))
}

/// `:- type color ---> red ; green ; blue.`
pub fn color_type() -> TypeInfo {
    COLOR_TYPE.clone()
}

/// `:- type tree ---> leaf ; node(tree, string, tree).`
pub fn tree_type() -> TypeInfo {
    TREE_TYPE.clone()
}

/// `:- type wide ---> none ; w0(int) ; ... ; w9(int).`
pub fn wide_type() -> TypeInfo {
    WIDE_TYPE.clone()
}

pub fn wide(engine: &mut Engine, n: usize, value: i64) -> Word {
    let ctor = WIDE_TYPE.ctor().clone();
    let functor = ctor.du_functor_by_name(&format!("w{}", n), 1).unwrap();
    engine.construct_functor(functor, &[int_to_word(value)])
}

/// `:- type any ---> some [T] any(T).`
pub fn any_type() -> TypeInfo {
    ANY_TYPE.clone()
}

/// Wraps `value`, whose type is `type_info`, storing the typeinfo on the
/// heap first.
pub fn any(engine: &mut Engine, type_info: &TypeInfo, value: Word) -> Word {
    let ctor = ANY_TYPE.ctor().clone();
    let functor = ctor.du_functor_by_name("any", 1).unwrap();
    let stored = engine.store_type_info(HeapKind::Heap, type_info);
    engine.construct_functor(functor, &[stored, value])
}

pub fn leaf(engine: &mut Engine) -> Word {
    let ctor = TREE_TYPE.ctor().clone();
    let leaf = ctor.du_functor_by_name("leaf", 0).unwrap();
    engine.construct_functor(leaf, &[])
}

pub fn node(engine: &mut Engine, left: Word, label: &str, right: Word) -> Word {
    let ctor = TREE_TYPE.ctor().clone();
    let node = ctor.du_functor_by_name("node", 3).unwrap();
    let label = engine.make_string(label);
    engine.construct_functor(node, &[left, label, right])
}

/// A balanced tree whose in-order labels are `labels`.
pub fn tree_of(engine: &mut Engine, labels: &[&str]) -> Word {
    if labels.is_empty() {
        return leaf(engine);
    }

    let mid = labels.len() / 2;
    let left = tree_of(engine, &labels[..mid]);
    let right = tree_of(engine, &labels[mid + 1..]);

    node(engine, left, labels[mid], right)
}

/// Loads a nondeterministic procedure returning each of `values` in r1,
/// each multiplied by the procedure's first input.
pub fn load_scaled_generator(values: &[i64]) -> CodeAddr {
    let values = values.to_vec();

    let mut module = module("generator");
    let entry = module.entry_label("scaled");
    let next = module.internal_label("scaled_i1");

    module.define_entry(entry, None, move |engine| {
        let factor = engine.regs[1];

        engine.mkframe(2, next);
        engine.set_framevar(1, 0);
        engine.set_framevar(2, factor);

        next
    });

    module.define_internal(next, None, move |engine| {
        let i = engine.framevar(1) as usize;

        match values.get(i) {
            Some(value) => {
                let factor = word_to_int(engine.framevar(2));

                engine.regs[1] = int_to_word(value * factor);
                engine.set_framevar(1, (i + 1) as Word);
                engine.succeed()
            }
            None => {
                engine.regs.maxfr = engine.prevfr(engine.regs.curfr);
                engine.fail()
            }
        }
    });

    module.load();
    entry
}
