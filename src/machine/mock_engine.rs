use crate::machine::code::CodeModule;
use crate::machine::unify::ordering_to_word;
pub use crate::machine::config::EngineBuilder;
pub use crate::machine::*;
use crate::type_info::*;
use crate::type_tables::builtin;
use crate::types::*;

use lazy_static::lazy_static;

use std::ops::{Deref, DerefMut};

// a small engine and a handful of user types for test purposes.

lazy_static! {
    static ref ABC_TYPE: TypeInfo = {
        let ctor = TypeCtorInfo::new("mock", "abc", 0, TypeCtorRep::Enum);
        ctor.define_enum(&["a", "b", "c"]);
        TypeInfo::ground(&ctor)
    };

    static ref SHAPE_TYPE: TypeInfo = {
        let ctor = TypeCtorInfo::new("mock", "shape", 0, TypeCtorRep::Du);
        let int = PseudoTypeInfo::ground(&builtin::int());

        ctor.define_du(vec![
            FunctorSpec::new("empty", vec![]),
            FunctorSpec::new("circle", vec![int.clone()]),
            FunctorSpec::new("rect", vec![int.clone(), int]),
        ]);

        TypeInfo::ground(&ctor)
    };

    // f(t, int) and g(int, int), both of type t
    static ref F_TYPE: TypeInfo = {
        let ctor = TypeCtorInfo::new("mock", "t", 0, TypeCtorRep::Du);
        let int = PseudoTypeInfo::ground(&builtin::int());
        let t = PseudoTypeInfo::ground(&ctor);

        ctor.define_du(vec![
            FunctorSpec::new("f", vec![t, int.clone()]),
            FunctorSpec::new("g", vec![int.clone(), int]),
        ]);

        TypeInfo::ground(&ctor)
    };

    static ref MOD10_TYPE: TypeInfo = {
        let mut module = CodeModule::new("mock_mod10");
        let unify = module.entry_label("__Unify__mod10");
        let compare = module.entry_label("__Compare__mod10");

        module.define_entry(unify, None, |engine| {
            let x = word_to_int(engine.regs[1]) % 10;
            let y = word_to_int(engine.regs[2]) % 10;

            engine.regs[1] = bool_to_word(x == y);
            engine.regs.succip
        });

        module.define_entry(compare, None, |engine| {
            let x = word_to_int(engine.regs[1]) % 10;
            let y = word_to_int(engine.regs[2]) % 10;

            engine.regs[1] = ordering_to_word(x.cmp(&y));
            engine.regs.succip
        });

        module.load();

        let ctor = TypeCtorInfo::with_user_preds(
            "mock",
            "mod10",
            0,
            TypeCtorRep::NoTagUserEq,
            Some(unify),
            Some(compare),
        );

        ctor.define_notag("mod10", PseudoTypeInfo::ground(&builtin::int()));
        TypeInfo::ground(&ctor)
    };
}

pub struct MockEngine {
    pub engine: Engine,
}

#[allow(dead_code)]
impl MockEngine {
    fn builder() -> EngineBuilder {
        EngineBuilder::new()
            .with_heap_size(64)
            .with_solutions_heap_size(64)
            .with_global_heap_size(64)
            .with_detstack_size(64)
            .with_nondetstack_size(64)
            .with_trail_size(64)
            .with_redzone_size(4)
    }

    pub fn new() -> Self {
        builtin::init();

        Self {
            engine: Self::builder().build(),
        }
    }

    pub fn with_trail() -> Self {
        builtin::init();

        Self {
            engine: Self::builder().with_trail(true).build(),
        }
    }

    /// A fresh heap word holding `value`.
    pub fn heap_cell(&mut self, value: Word) -> Addr {
        let addr = self.engine.alloc(HeapKind::Heap, 1);
        self.engine.write(addr, value);
        addr
    }

    pub fn abc_type(&self) -> TypeInfo {
        ABC_TYPE.clone()
    }

    pub fn shape_type(&self) -> TypeInfo {
        SHAPE_TYPE.clone()
    }

    pub fn f_type(&self) -> TypeInfo {
        F_TYPE.clone()
    }

    /// `f(g(a, b), c)`
    pub fn f_g_value(&mut self, a: i64, b: i64, c: i64) -> Word {
        let ctor = F_TYPE.ctor().clone();

        let (Some(f), Some(g)) = (ctor.du_functor_by_name("f", 2), ctor.du_functor_by_name("g", 2))
        else {
            panic!("type t is missing its functors");
        };

        let inner = self.engine.construct_functor(g, &[int_to_word(a), int_to_word(b)]);
        self.engine.construct_functor(f, &[inner, int_to_word(c)])
    }

    /// Integers equal modulo ten.
    pub fn mod10_type(&self) -> TypeInfo {
        MOD10_TYPE.clone()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for MockEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl DerefMut for MockEngine {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.engine
    }
}

/// Loads a nondeterministic procedure that returns each of `values` in r1
/// in turn. `name` must be unique among the loaded modules.
pub fn load_int_generator(name: &str, values: &[i64]) -> CodeAddr {
    let values = values.to_vec();

    let mut module = CodeModule::new(name);
    let entry = module.entry_label("generate");
    let emit = module.internal_label("generate_i1");

    module.define_entry(entry, None, move |engine| {
        engine.mkframe(1, emit);
        engine.set_framevar(1, 0);
        emit
    });

    module.define_internal(emit, None, move |engine| {
        let next = engine.framevar(1) as usize;

        match values.get(next) {
            Some(value) => {
                engine.regs[1] = int_to_word(*value);
                engine.set_framevar(1, (next + 1) as Word);
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
