use mercury_engine::machine::memory_zone::*;
use mercury_engine::types::*;

use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn guarded_stores_grow_the_zone_monotonically(
        offsets in prop::collection::vec(0u64..8192, 1..24),
    ) {
        let page = page_size();
        let mut zone = MemoryZone::create("prop", 77, 16 * page, 0, 8 * page, default_handler);
        let usable_words = (zone.hardmax() - zone.min()) / WORD_SIZE;
        let mut redzone = zone.redzone();

        for (i, offset) in offsets.iter().enumerate() {
            let addr = zone.min() + (offset % usable_words) * WORD_SIZE;

            zone.write(addr, i as Word);

            prop_assert_eq!(zone.read(addr), i as Word);
            prop_assert!(zone.redzone() >= redzone);
            prop_assert!(zone.redzone() > addr);
            prop_assert!(zone.redzone() <= zone.hardmax());
            prop_assert_eq!(zone.redzone() % page, 0);

            redzone = zone.redzone();
        }
    }
}

#[test]
fn engine_zones_are_listed_while_the_engine_lives() {
    let engine = crate::helper::engine();
    let bottom = engine.heap_zone(mercury_engine::HeapKind::Heap).bottom();

    assert!(get_used_memory_zones()
        .iter()
        .any(|zone| zone.bottom == bottom && zone.name == "heap"));

    drop(engine);

    assert!(!get_used_memory_zones()
        .iter()
        .any(|zone| zone.bottom == bottom));
}
