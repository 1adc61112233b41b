use crate::helper::*;
use crate::helper::any;

use mercury_engine::type_tables::builtin;
use mercury_engine::types::*;
use mercury_engine::HeapKind;

use proptest::prelude::*;

use std::cmp::Ordering;

#[test]
fn enums_compare_in_declaration_order() {
    let mut engine = engine();
    let color = color_type();
    let (red, green, blue) = (0, 1, 2);

    assert_eq!(engine.generic_compare(red, blue, &color), Ordering::Less);
    assert_eq!(engine.generic_compare(blue, green, &color), Ordering::Greater);
    assert_eq!(engine.generic_compare(green, green, &color), Ordering::Equal);
    assert!(!engine.generic_unify(red, green, &color));
}

#[test]
fn nested_functors_are_copied_whole() {
    let mut engine = engine();
    let tree = tree_type();

    let lower = engine.regs.hp;
    let value = tree_of(&mut engine, &["a", "b", "c", "d", "e"]);
    let upper = engine.regs.hp;

    let copy = engine.copy_value(HeapKind::GlobalHeap, value, &tree, lower, upper);
    let global = engine.heap_zone(HeapKind::GlobalHeap);

    assert!(global.contains(strip_tag(copy)));
    assert!(global.contains(strip_tag(engine.field(copy, 0))));
    assert!(global.contains(engine.field(copy, 1)));
    assert_eq!(engine.read_string(engine.field(copy, 1)), "c");
    assert!(engine.generic_unify(copy, value, &tree));

    let other = tree_of(&mut engine, &["a", "b", "c", "d", "f"]);
    assert_eq!(engine.generic_compare(copy, other, &tree), Ordering::Less);
}

#[test]
fn values_outside_the_region_are_shared_not_copied() {
    let mut engine = engine();
    let tree = tree_type();

    let shared = tree_of(&mut engine, &["x"]);
    let lower = engine.regs.hp;
    let value = node(&mut engine, shared, "root", shared);
    let upper = engine.regs.hp;

    let copy = engine.copy_value(HeapKind::SolutionsHeap, value, &tree, lower, upper);

    assert_ne!(copy, value);
    assert_eq!(engine.field(copy, 0), shared);
    assert_eq!(engine.field(copy, 2), shared);
    assert!(engine.generic_unify(copy, value, &tree));
}

#[test]
fn aliased_subterms_stay_aliased() {
    let mut engine = engine();
    let tree = tree_type();

    let lower = engine.regs.hp;
    let shared = tree_of(&mut engine, &["x", "y"]);
    let value = node(&mut engine, shared, "root", shared);
    let upper = engine.regs.hp;

    let copy = engine.copy_value(HeapKind::SolutionsHeap, value, &tree, lower, upper);
    let left = engine.field(copy, 0);

    assert_eq!(left, engine.field(copy, 2));
    assert_ne!(left, shared);
    assert!(engine.heap_zone(HeapKind::SolutionsHeap).contains(strip_tag(left)));
}

#[test]
fn generic_unify_is_callable_from_machine_code() {
    let mut engine = engine();
    let list = builtin::list_type(builtin::string_type());

    let items = ["one", "two"].map(|s| engine.make_string(s));
    let x = engine.make_list(&items);
    let items = ["one", "two"].map(|s| engine.make_string(s));
    let y = engine.make_list(&items);

    let type_info = engine.store_type_info(HeapKind::Heap, &list);

    engine.regs[1] = type_info;
    engine.regs[2] = x;
    engine.regs[3] = y;
    engine.call_engine(mercury_engine::labels::GENERIC_UNIFY, false);

    assert_eq!(engine.regs[1], bool_to_word(true));
}

#[test]
fn functors_past_the_primary_tags_use_remote_sectags() {
    let mut engine = engine();
    let ty = wide_type();
    let ctor = ty.ctor().clone();

    let lower = engine.regs.hp;
    let value = wide(&mut engine, 8, 5);
    let upper = engine.regs.hp;

    let w8 = ctor.du_functor_by_name("w8", 1).unwrap();
    assert_eq!(tag(value), 7);
    assert_eq!(engine.field(value, 0), w8.sectag);

    let copy = engine.copy_value(HeapKind::GlobalHeap, value, &ty, lower, upper);

    assert_ne!(copy, value);
    assert_eq!(tag(copy), 7);
    assert!(engine.heap_zone(HeapKind::GlobalHeap).contains(strip_tag(copy)));
    assert_eq!(engine.field(copy, 0), w8.sectag);
    assert_eq!(engine.field(copy, 1), int_to_word(5));
    assert!(engine.generic_unify(copy, value, &ty));

    let w9 = wide(&mut engine, 9, 5);
    let w7 = wide(&mut engine, 7, 5);
    let w2 = wide(&mut engine, 2, 7);
    let smaller = wide(&mut engine, 8, 3);

    assert_eq!(engine.generic_compare(copy, w9, &ty), Ordering::Less);
    assert_eq!(engine.generic_compare(copy, w7, &ty), Ordering::Greater);
    assert_eq!(engine.generic_compare(copy, w2, &ty), Ordering::Greater);
    assert_eq!(engine.generic_compare(copy, smaller, &ty), Ordering::Greater);
    assert!(!engine.generic_unify(copy, w9, &ty));
    assert!(!engine.generic_unify(copy, smaller, &ty));
}

#[test]
fn existential_typeinfos_travel_with_the_copy() {
    let mut engine = engine();
    let ty = any_type();
    let string = builtin::string_type();

    let lower = engine.regs.hp;
    let hello = engine.make_string("hello");
    let value = any(&mut engine, &string, hello);
    let upper = engine.regs.hp;

    let copy = engine.copy_value(HeapKind::GlobalHeap, value, &ty, lower, upper);
    let global = engine.heap_zone(HeapKind::GlobalHeap);

    let stored = engine.field(copy, 0);
    assert!(global.contains(stored));
    assert!(global.contains(engine.field(copy, 1)));
    assert_eq!(engine.load_type_info(stored).to_string(), string.to_string());
    assert_eq!(engine.read_string(engine.field(copy, 1)), "hello");
    assert!(engine.generic_unify(copy, value, &ty));
}

#[test]
fn existential_types_are_compared_before_arguments() {
    let mut engine = engine();
    let ty = any_type();
    let int = builtin::int_type();
    let string = builtin::string_type();

    let three = any(&mut engine, &int, int_to_word(3));
    let also_three = any(&mut engine, &int, int_to_word(3));
    let four = any(&mut engine, &int, int_to_word(4));
    let s = engine.make_string("3");
    let text = any(&mut engine, &string, s);

    assert_eq!(engine.generic_compare(three, also_three, &ty), Ordering::Equal);
    assert_eq!(engine.generic_compare(three, four, &ty), Ordering::Less);
    assert!(!engine.generic_unify(three, four, &ty));

    let forward = engine.generic_compare(three, text, &ty);
    assert_ne!(forward, Ordering::Equal);
    assert_eq!(engine.generic_compare(text, three, &ty), forward.reverse());
    assert!(!engine.generic_unify(three, text, &ty));
}

#[test]
fn a_copy_of_a_copy_equals_the_original() {
    let mut engine = engine();
    let tree = tree_type();

    let lower = engine.regs.hp;
    let shared = tree_of(&mut engine, &["p", "q", "r"]);
    let value = node(&mut engine, shared, "root", shared);
    let upper = engine.regs.hp;

    let sol_lower = engine.regs.sol_hp;
    let first = engine.copy_value(HeapKind::SolutionsHeap, value, &tree, lower, upper);
    let sol_upper = engine.regs.sol_hp;

    let second = engine.copy_value(HeapKind::Heap, first, &tree, sol_lower, sol_upper);

    assert!(engine.heap_zone(HeapKind::Heap).contains(strip_tag(second)));
    assert!(strip_tag(second) >= upper);
    assert_eq!(engine.generic_compare(second, value, &tree), Ordering::Equal);

    let left = engine.field(second, 0);
    assert_eq!(left, engine.field(second, 2));
    assert_ne!(left, shared);
    assert_ne!(left, engine.field(first, 0));
}

fn int_list(engine: &mut mercury_engine::Engine, ints: &[i64]) -> Word {
    let words: Vec<Word> = ints.iter().map(|&i| int_to_word(i)).collect();
    engine.make_list(&words)
}

fn string_list(engine: &mut mercury_engine::Engine, strings: &[String]) -> Word {
    let words: Vec<Word> = strings.iter().map(|s| engine.make_string(s)).collect();
    engine.make_list(&words)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn int_lists_compare_lexicographically(
        xs in prop::collection::vec(-5i64..5, 0..8),
        ys in prop::collection::vec(-5i64..5, 0..8),
    ) {
        let mut engine = engine();
        let ty = builtin::list_type(builtin::int_type());

        let x = int_list(&mut engine, &xs);
        let y = int_list(&mut engine, &ys);

        prop_assert_eq!(engine.generic_compare(x, y, &ty), xs.cmp(&ys));
    }

    #[test]
    fn compare_is_antisymmetric(
        xs in prop::collection::vec("[ab]{0,3}", 0..5),
        ys in prop::collection::vec("[ab]{0,3}", 0..5),
    ) {
        let mut engine = engine();
        let ty = builtin::list_type(builtin::string_type());

        let x = string_list(&mut engine, &xs);
        let y = string_list(&mut engine, &ys);

        let forward = engine.generic_compare(x, y, &ty);
        let backward = engine.generic_compare(y, x, &ty);

        prop_assert_eq!(forward, backward.reverse());
    }

    #[test]
    fn unify_agrees_with_compare(
        xs in prop::collection::vec("[ab]{0,2}", 0..6),
        ys in prop::collection::vec("[ab]{0,2}", 0..6),
    ) {
        let mut engine = engine();
        let tree = tree_type();

        let xs: Vec<&str> = xs.iter().map(String::as_str).collect();
        let ys: Vec<&str> = ys.iter().map(String::as_str).collect();

        let x = tree_of(&mut engine, &xs);
        let y = tree_of(&mut engine, &ys);

        let unified = engine.generic_unify(x, y, &tree);
        let compared = engine.generic_compare(x, y, &tree);

        prop_assert_eq!(unified, compared == Ordering::Equal);
        prop_assert_eq!(unified, xs == ys);
    }
}
