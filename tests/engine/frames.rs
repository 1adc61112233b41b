use crate::helper::*;

use mercury_engine::labels::*;
use mercury_engine::machine::stack::FrameKind;
use mercury_engine::types::*;
use mercury_engine::ControlState;

// r5 accumulates the numbers of the alternatives tried, most recent last.
fn record(engine: &mut mercury_engine::Engine, n: Word) {
    engine.regs[5] = engine.regs[5] * 10 + n;
}

#[test]
fn choice_points_are_retried_newest_first() {
    let mut module = module("alternatives");
    let entry = module.entry_label("try_all");
    let alts = [
        module.internal_label("try_all_i1"),
        module.internal_label("try_all_i2"),
        module.internal_label("try_all_i3"),
    ];

    module.define_entry(entry, None, move |engine| {
        for alt in alts {
            engine.mktempframe(alt);
        }

        engine.fail()
    });

    for (i, alt) in alts.into_iter().enumerate() {
        module.define_internal(alt, None, move |engine| {
            record(engine, i as Word + 1);

            let maxfr = engine.regs.maxfr;
            engine.regs.maxfr = engine.prevfr(maxfr);
            engine.fail()
        });
    }

    module.load();

    let mut engine = engine();
    let (maxfr, curfr) = (engine.regs.maxfr, engine.regs.curfr);
    engine.regs[5] = 0;

    assert_eq!(engine.call_engine(entry, true), None);
    assert_eq!(engine.regs[5], 321);
    assert_eq!(engine.control_state(), ControlState::Failed);
    assert_eq!((engine.regs.maxfr, engine.regs.curfr), (maxfr, curfr));
    assert_eq!(engine.choice_point_count(), 0);
}

#[test]
fn frame_chain_links_back_to_the_bottom() {
    let mut engine = engine();
    let bottom = engine.regs.maxfr;

    engine.regs.succip = DO_SUCCEED;
    let ordinary = engine.mkframe(3, DO_FAIL);
    let temp = engine.mktempframe(DO_REDO);
    let det_temp = engine.mkdettempframe(DO_FAIL);

    assert_eq!(engine.frame_kind(bottom), FrameKind::Bottom);
    assert_eq!(engine.frame_kind(ordinary), FrameKind::Ordinary);
    assert_eq!(engine.frame_kind(temp), FrameKind::NondetTemp);
    assert_eq!(engine.frame_kind(det_temp), FrameKind::DetTemp);

    assert_eq!(engine.prevfr(det_temp), temp);
    assert_eq!(engine.prevfr(temp), ordinary);
    assert_eq!(engine.prevfr(ordinary), bottom);
    assert_eq!(engine.redofr(temp), ordinary);
    assert_eq!(engine.detfr(det_temp), engine.regs.sp);
    assert_eq!(engine.succip_slot(ordinary), DO_SUCCEED);
    assert_eq!(engine.nondet_frames(), vec![det_temp, temp, ordinary]);

    engine.prune_to(ordinary);
    assert_eq!(engine.regs.maxfr, ordinary);
    assert_eq!(engine.choice_point_count(), 1);
}

#[test]
fn det_frames_save_and_restore_succip() {
    let mut module = module("det_frames");
    let entry = module.entry_label("outer");
    let ret = module.internal_label("outer_i1");
    let callee = module.entry_label("inner");

    module.define_entry(entry, None, move |engine| {
        engine.incr_sp_push_succip(2);
        let input = engine.regs[1];
        engine.set_stackvar(2, input);
        engine.regs.succip = ret;
        callee
    });

    module.define_entry(callee, None, |engine| {
        engine.regs[1] += 100;
        engine.regs.succip
    });

    module.define_internal(ret, None, |engine| {
        let input = engine.stackvar(2);
        engine.regs[1] += input;
        engine.decr_sp_pop_succip(2);
        engine.regs.succip
    });

    module.load();

    let mut engine = engine();
    let sp = engine.regs.sp;
    engine.regs[1] = 5;

    assert_eq!(engine.call_engine(entry, false), None);
    assert_eq!(engine.regs[1], 110);
    assert_eq!(engine.regs.sp, sp);
    assert_eq!(engine.nesting_depth(), 0);
}
