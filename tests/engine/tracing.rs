use crate::helper::*;

use mercury_engine::layout::*;
use mercury_engine::machine::machine_errors::FATAL_PREFIX;
use mercury_engine::trace_base::{self, DebugFlag, TracePort};
use mercury_engine::types::*;
use mercury_engine::{fatal_error, set_fatal_policy, EngineBuilder, FatalPolicy};

use parking_lot::Mutex;
use serial_test::serial;

use std::panic;
use std::sync::Arc;

const SLOTS: u32 = 4;

/// Loads a traced `down(N)`, which calls itself until N is zero and then
/// dumps the stack, trace data included, into `dump`.
fn load_down(dump: Arc<Mutex<String>>) -> (CodeAddr, String) {
    let mut module = module("down");
    let module_name = module.name().to_owned();

    let down = module.entry_label("down");
    let down_ret = module.internal_label("down_i1");

    let layout = Arc::new(
        ProcLayout::new(
            down,
            ProcId::user(PredOrFunc::Predicate, &module_name, "down", 1, 0),
            Determinism::Det,
            SLOTS,
            Some(LongLval::stackvar(SLOTS)),
        )
        .with_exec_trace(ExecTrace::default()),
    );

    let ret_layout = Arc::new(LabelLayout::new(layout.clone()).with_port(TracePort::Exit));

    let entry_layout = layout.clone();
    module.define_entry(down, Some(layout.clone()), move |engine| {
        let succip = engine.regs.succip;

        engine.incr_sp(SLOTS as u64);
        engine.set_stackvar(SLOTS as u64, succip.as_word());
        engine.trace_call_entry(&entry_layout);

        if engine.regs[1] == 0 {
            let (sp, curfr) = (engine.regs.sp, engine.regs.curfr);
            let mut dump = dump.lock();

            let _ = engine.dump_stack_from_layout(&mut *dump, &entry_layout, sp, curfr, true);
            drop(dump);

            return down_ret;
        }

        engine.regs[1] -= 1;
        engine.regs.succip = down_ret;
        down
    });

    module.define_internal(down_ret, Some(ret_layout), move |engine| {
        engine.trace_call_exit(&layout, TracePort::Exit);

        engine.regs.succip = CodeAddr::from_word(engine.stackvar(SLOTS as u64));
        engine.decr_sp(SLOTS as u64);
        engine.regs.succip
    });

    module.load();
    (down, module_name)
}

#[test]
#[serial]
fn traced_frames_carry_their_call_numbers() {
    let dump = Arc::new(Mutex::new(String::new()));
    let (down, module_name) = load_down(dump.clone());
    let mut engine = engine();

    trace_base::trace_start(true);

    engine.regs[1] = 2;
    assert_eq!(engine.call_engine(down, false), None);

    assert_eq!(trace_base::call_seqno(), 3);
    assert_eq!(trace_base::event_number(), 6);
    assert_eq!(trace_base::call_depth(), 0);

    trace_base::trace_end();

    let pid = format!("pred {}:down/1-0 (det)", module_name);

    assert_eq!(
        *dump.lock(),
        format!(
            "   0       3       3    3 {pid}\n   1       2       2    2 {pid}\n   2       1       1    1 {pid}\n",
            pid = pid
        )
    );
}

#[test]
#[serial]
fn untraced_runs_leave_the_counters_alone() {
    let dump = Arc::new(Mutex::new(String::new()));
    let (down, _) = load_down(dump);
    let mut engine = engine();

    trace_base::trace_start(false);

    engine.regs[1] = 4;
    engine.call_engine(down, false);

    assert_eq!(trace_base::call_seqno(), 0);
    assert_eq!(trace_base::event_number(), 0);
}

#[test]
#[serial]
fn debug_flags_from_the_builder_are_process_wide() {
    trace_base::clear_debug_flags();

    let engine = EngineBuilder::new()
        .with_heap_size(16)
        .with_debug_flag(DebugFlag::Mem)
        .build();

    assert!(trace_base::debug_flag(DebugFlag::Mem));
    assert!(!trace_base::debug_flag(DebugFlag::Goto));

    drop(engine);
    trace_base::clear_debug_flags();
    assert!(!trace_base::debug_flag(DebugFlag::Mem));
}

#[test]
#[serial]
fn fatal_errors_panic_with_the_runtime_prefix() {
    set_fatal_policy(FatalPolicy::Panic);

    let payload = panic::catch_unwind(|| fatal_error("the sky fell")).unwrap_err();
    let message = payload.downcast_ref::<String>().unwrap();

    assert_eq!(message, &format!("{}the sky fell", FATAL_PREFIX));
}
