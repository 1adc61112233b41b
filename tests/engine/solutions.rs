use crate::helper::*;

use mercury_engine::type_tables::builtin;
use mercury_engine::types::*;
use mercury_engine::HeapKind;

#[test]
fn solutions_are_sorted_and_distinct() {
    let generator = load_scaled_generator(&[4, -1, 4, 2, 0]);
    let mut engine = engine();
    let closure = engine.make_closure(generator, &[int_to_word(3)]);
    let (maxfr, sp) = (engine.regs.maxfr, engine.regs.sp);

    let list = engine.solutions(closure, &builtin::int_type());
    let ints: Vec<i64> = engine.list_to_vec(list).into_iter().map(word_to_int).collect();

    assert_eq!(ints, vec![-3, 0, 6, 12]);
    assert_eq!((engine.regs.maxfr, engine.regs.sp), (maxfr, sp));
    assert_eq!(engine.regs.sol_hp, engine.heap_zone(HeapKind::SolutionsHeap).min());
    assert_eq!(engine.nesting_depth(), 0);
}

#[test]
fn unsorted_solutions_keep_duplicates() {
    let generator = load_scaled_generator(&[2, 1, 2]);
    let mut engine = engine();
    let closure = engine.make_closure(generator, &[int_to_word(-1)]);

    let list = engine.unsorted_solutions(closure, &builtin::int_type());
    let ints: Vec<i64> = engine.list_to_vec(list).into_iter().map(word_to_int).collect();

    assert_eq!(ints, vec![-2, -1, -2]);
}

#[test]
fn solutions_survive_on_the_heap() {
    let generator = load_scaled_generator(&[1, 2]);
    let mut engine = engine();
    let closure = engine.make_closure(generator, &[int_to_word(5)]);

    let list = engine.solutions(closure, &builtin::int_type());
    let heap = engine.heap_zone(HeapKind::Heap);

    assert!(heap.contains(strip_tag(list)));
    assert!(heap.contains(strip_tag(engine.list_tail(list))));
    assert!(engine.is_nil(engine.list_tail(engine.list_tail(list))));
}
