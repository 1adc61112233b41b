use crate::helper::*;

use mercury_engine::labels::*;
use mercury_engine::type_tables::builtin;
use mercury_engine::types::*;

use std::sync::atomic::{AtomicUsize, Ordering};

/// Loads `nest`, which re-enters the engine natively `r1` times before
/// throwing `r1 * 100 + r2` from the innermost level. Every return from a
/// nested call that is not unwinding bumps `resumed`.
fn load_nest(resumed: &'static AtomicUsize) -> CodeAddr {
    let mut module = module("nest");
    let nest = module.entry_label("nest");

    module.define_entry(nest, None, move |engine| {
        let levels = engine.regs[1];

        if levels == 0 {
            let value = int_to_word(engine.regs[2] as i64);
            return engine.throw_value(value, &builtin::int_type());
        }

        engine.incr_sp(1);
        engine.regs[1] = levels - 1;
        engine.regs[2] += 100;
        engine.call_engine(nest, false);

        if engine.is_unwinding() {
            return ENGINE_DONE;
        }

        resumed.fetch_add(1, Ordering::Relaxed);
        engine.decr_sp(1);
        engine.regs.succip
    });

    module.load();
    nest
}

#[test]
fn exceptions_unwind_through_native_nesting() {
    static RESUMED: AtomicUsize = AtomicUsize::new(0);
    let nest = load_nest(&RESUMED);

    let mut engine = engine();
    let (sp, maxfr, curfr, hp) = (
        engine.regs.sp,
        engine.regs.maxfr,
        engine.regs.curfr,
        engine.regs.hp,
    );

    engine.regs[1] = 5;
    engine.regs[2] = 7;

    let exception = engine.call_engine(nest, true).unwrap();

    assert_eq!(engine.univ_value(exception), 507);
    assert_eq!(engine.univ_type_info(exception), builtin::int_type());
    assert_eq!(RESUMED.load(Ordering::Relaxed), 0);
    assert_eq!(engine.nesting_depth(), 0);
    assert!(!engine.is_unwinding());
    assert_eq!((engine.regs.sp, engine.regs.maxfr, engine.regs.curfr), (sp, maxfr, curfr));
    assert!(engine.heap_zone(mercury_engine::HeapKind::Heap).contains(exception));
    assert!(engine.regs.hp > hp);
}

#[test]
fn catch_handles_exceptions_from_nested_levels() {
    static RESUMED: AtomicUsize = AtomicUsize::new(0);
    let nest = load_nest(&RESUMED);

    let mut module = module("recover");
    let recover = module.entry_label("recover");

    module.define_entry(recover, None, |engine| {
        let value = engine.univ_value(engine.regs[1]);
        engine.regs[1] = int_to_word(-word_to_int(value));
        engine.regs.succip
    });
    module.load();

    let mut engine = engine();
    let goal = engine.make_closure(nest, &[3, 1]);
    let handler = engine.make_closure(recover, &[]);
    let maxfr = engine.regs.maxfr;

    engine.regs[1] = goal;
    engine.regs[2] = handler;

    assert_eq!(engine.call_engine(BUILTIN_CATCH, false), None);
    assert_eq!(word_to_int(engine.regs[1]), -301);
    assert_eq!(RESUMED.load(Ordering::Relaxed), 0);
    assert_eq!(engine.regs.maxfr, maxfr);
    assert_eq!(engine.nesting_depth(), 0);
}

#[test]
fn exceptions_stop_at_the_nearest_native_handler() {
    static RESUMED: AtomicUsize = AtomicUsize::new(0);
    let nest = load_nest(&RESUMED);

    let mut module = module("quiet");
    let quiet = module.entry_label("quiet");

    // catches the innermost throw one level down
    module.define_entry(quiet, None, move |engine| {
        engine.regs[1] = 1;
        engine.regs[2] = 0;

        let value = match engine.call_engine(nest, true) {
            Some(univ) => engine.univ_value(univ),
            None => 0,
        };

        engine.regs[1] = value;
        engine.regs.succip
    });
    module.load();

    let mut engine = engine();
    assert_eq!(engine.call_engine(quiet, false), None);
    assert_eq!(engine.regs[1], 100);
    assert_eq!(RESUMED.load(Ordering::Relaxed), 0);
    assert_eq!(engine.nesting_depth(), 0);
}
