use crate::helper::*;

use mercury_engine::layout::*;
use mercury_engine::machine::registers::SavedRegisters;
use mercury_engine::trace_base::TracePort;
use mercury_engine::type_info::PseudoTypeInfo;
use mercury_engine::type_tables::builtin;
use mercury_engine::types::*;
use mercury_engine::IntrospectionError;

use maplit::btreemap;
use parking_lot::Mutex;

use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
struct Observed {
    dump: String,
    ancestors: Vec<Result<String, IntrospectionError>>,
    live: BTreeMap<i32, Vec<(String, i64)>>,
}

/// Loads
///
/// ```text
/// main :- count(3).
/// count(N) :- ( N = 0 -> observe ; count(N - 1) ).
/// ```
///
/// where `observe` records what it can see of the stack into `observed`.
fn load_counter(observed: Arc<Mutex<Observed>>) -> (CodeAddr, String) {
    let mut module = module("counter");
    let module_name = module.name().to_owned();

    let main = module.entry_label("main");
    let main_ret = module.internal_label("main_i1");
    let count = module.entry_label("count");
    let count_ret = module.internal_label("count_i1");

    let main_layout = Arc::new(ProcLayout::new(
        main,
        ProcId::user(PredOrFunc::Predicate, &module_name, "main", 0, 0),
        Determinism::Det,
        1,
        Some(LongLval::stackvar(1)),
    ));

    let count_layout = Arc::new(
        ProcLayout::new(
            count,
            ProcId::user(PredOrFunc::Predicate, &module_name, "count", 1, 0),
            Determinism::Det,
            2,
            Some(LongLval::stackvar(1)),
        )
        .with_exec_trace(ExecTrace {
            module_name: module_name.clone(),
            used_var_names: vec!["N".to_owned()],
            max_var_num: 1,
            ..ExecTrace::default()
        }),
    );

    let main_ret_layout = Arc::new(LabelLayout::new(main_layout.clone()).with_port(TracePort::Exit));

    let n_var = LabelVars::new(
        vec![(
            LiveType::Var(PseudoTypeInfo::ground(&builtin::int())),
            LongLval::stackvar(2),
        )],
        vec![],
    )
    .with_var_nums(vec![1]);

    let count_ret_layout = Arc::new(
        LabelLayout::new(count_layout.clone())
            .with_port(TracePort::Exit)
            .with_vars(n_var),
    );

    module.define_entry(main, Some(main_layout), move |engine| {
        engine.incr_sp_push_succip(1);
        engine.regs[1] = int_to_word(3);
        engine.regs.succip = main_ret;
        count
    });

    module.define_internal(main_ret, Some(main_ret_layout), |engine| {
        engine.decr_sp_pop_succip(1);
        engine.regs.succip
    });

    let observe = {
        let count_ret_layout = count_ret_layout.clone();

        move |engine: &mut mercury_engine::Engine| {
            let mut observed = observed.lock();
            let _ = engine.dump_stack(&mut observed.dump, false);

            let saved: SavedRegisters = engine.save_registers();

            for level in 0..5 {
                let (mut sp, mut curfr) = (saved.sp, saved.curfr);
                let found = engine
                    .find_nth_ancestor(&count_ret_layout, level, &mut sp, &mut curfr)
                    .map(|layout| layout.entry.proc_id.to_string());

                observed.ancestors.push(found);
            }

            for level in 0..3 {
                if let Ok(vars) =
                    engine.live_vars_at_level(&count_ret_layout, &saved, level, TracePort::Call)
                {
                    let vars = vars
                        .into_iter()
                        .map(|var| (var.name, word_to_int(var.value)))
                        .collect();

                    observed.live.insert(level, vars);
                }
            }
        }
    };

    module.define_entry(count, Some(count_layout), move |engine| {
        let n = word_to_int(engine.regs[1]);

        if n == 0 {
            observe(engine);
            return engine.regs.succip;
        }

        engine.incr_sp_push_succip(2);
        engine.set_stackvar(2, int_to_word(n));
        engine.regs[1] = int_to_word(n - 1);
        engine.regs.succip = count_ret;
        count
    });

    module.define_internal(count_ret, Some(count_ret_layout), |engine| {
        engine.decr_sp_pop_succip(2);
        engine.regs.succip
    });

    module.load();
    (main, module_name)
}

#[test]
fn a_running_program_can_inspect_its_stack() {
    let observed = Arc::new(Mutex::new(Observed::default()));
    let (main, module_name) = load_counter(observed.clone());

    let mut engine = engine();
    let sp = engine.regs.sp;

    assert_eq!(engine.call_engine(main, false), None);
    assert_eq!(engine.regs.sp, sp);

    let observed = observed.lock();
    assert_eq!(
        observed.dump,
        format!(
            "Stack dump follows:\n   0    3* pred {m}:count/1-0 (det)\n   3       pred {m}:main/0-0 (det)\n",
            m = module_name
        )
    );

    let count = format!("pred {}:count/1-0", module_name);
    let main = format!("pred {}:main/0-0", module_name);

    assert_eq!(
        observed.ancestors,
        vec![
            Ok(count.clone()),
            Ok(count.clone()),
            Ok(count),
            Ok(main),
            Err(IntrospectionError::NotThatManyAncestors),
        ]
    );

    assert_eq!(
        observed.live,
        btreemap! {
            0 => vec![("N".to_owned(), 1)],
            1 => vec![("N".to_owned(), 2)],
            2 => vec![("N".to_owned(), 3)],
        }
    );
}
