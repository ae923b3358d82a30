//! Behaviour shared by both coordinate index backends.

use std::collections::BTreeMap;

use osmweave_core::CoordinatePair;
use proptest::prelude::*;
use rstest::rstest;

use super::*;

fn store_for(backend: IndexBackend, compress: bool) -> Box<dyn NodeStore> {
    match backend {
        IndexBackend::Paged => Box::new(PagedNodeStore::new(compress, None)),
        IndexBackend::Keyed => Box::new(KeyedNodeStore::new(None).expect("open keyed store")),
    }
}

fn sample_nodes() -> Vec<(i64, CoordinatePair)> {
    (1..=300_i64)
        .map(|n| n * 37)
        .map(|id| {
            let lon = i32::try_from(id * 101).expect("lon fits");
            let lat = -i32::try_from(id * 53).expect("lat fits");
            (id, CoordinatePair::new(lon, lat))
        })
        .collect()
}

#[rstest]
#[case::paged_raw(IndexBackend::Paged, false)]
#[case::paged_compressed(IndexBackend::Paged, true)]
#[case::keyed(IndexBackend::Keyed, false)]
fn migration_preserves_lookups(#[case] backend: IndexBackend, #[case] compress: bool) {
    let nodes = sample_nodes();
    let (early, late) = nodes.split_at(150);
    let mut store = store_for(backend, compress);
    for &(id, coord) in early {
        store.put(id, coord).expect("put");
    }
    let ids: Vec<i64> = nodes.iter().map(|&(id, _)| id).collect();
    let before = store.lookup_many(&ids).expect("lookup before migration");

    store.migrate_to_disk().expect("migrate");
    assert!(store.is_on_disk());
    assert_eq!(store.lookup_many(&ids).expect("lookup after migration"), before);

    for &(id, coord) in late {
        store.put(id, coord).expect("put after migration");
    }
    assert_eq!(store.lookup_many(&ids).expect("full lookup"), nodes);
    assert_eq!(store.backend(), backend);
}

#[rstest]
#[case::paged(IndexBackend::Paged)]
#[case::keyed(IndexBackend::Keyed)]
fn clear_forgets_everything(#[case] backend: IndexBackend) {
    let mut store = store_for(backend, false);
    store.put(5, CoordinatePair::new(1, 2)).expect("put");
    store.migrate_to_disk().expect("migrate");
    store.clear().expect("clear");
    assert!(!store.is_on_disk());
    assert!(store.lookup_many(&[5]).expect("lookup").is_empty());
    store.put(1, CoordinatePair::new(3, 4)).expect("put after clear");
    assert_eq!(
        store.lookup_many(&[1]).expect("lookup"),
        vec![(1, CoordinatePair::new(3, 4))]
    );
}

#[rstest]
fn paged_store_rejects_out_of_order_ids() {
    let mut store = PagedNodeStore::new(false, None);
    store.put(10, CoordinatePair::new(0, 0)).expect("put");
    let err = store.put(10, CoordinatePair::new(0, 0)).expect_err("duplicate id");
    assert!(matches!(err, IndexError::NonMonotonicId { id: 10, previous: 10 }));
    let negative = PagedNodeStore::new(false, None)
        .put(-1, CoordinatePair::new(0, 0))
        .expect_err("negative id");
    assert!(matches!(negative, IndexError::NegativeId { id: -1 }));
}

#[rstest]
fn storage_grows_with_content() {
    let mut store = PagedNodeStore::new(true, None);
    let empty = store.storage_bytes().expect("size");
    for (id, coord) in sample_nodes() {
        store.put(id, coord).expect("put");
    }
    store.lookup_many(&[37]).expect("lookup");
    store.put(1_000_000, CoordinatePair::new(0, 1)).expect("put");
    assert!(store.storage_bytes().expect("size") > empty);
}

fn sorted_nodes() -> impl Strategy<Value = Vec<(i64, CoordinatePair)>> {
    prop::collection::btree_map(
        0_i64..2_000_000,
        (-1_800_000_000_i32..=1_800_000_000, -900_000_000_i32..=900_000_000),
        1..400,
    )
    .prop_map(|map: BTreeMap<i64, (i32, i32)>| {
        map.into_iter()
            // (0, 0) is the absent marker and never round-trips.
            .map(|(id, (lon, lat))| (id, CoordinatePair::new(lon | i32::from(lat == 0), lat)))
            .collect()
    })
}

proptest! {
    #[test]
    fn paged_store_returns_what_was_put(nodes in sorted_nodes(), compress in any::<bool>()) {
        let mut store = PagedNodeStore::new(compress, None);
        for &(id, coord) in &nodes {
            store.put(id, coord).expect("put");
        }
        let mut ids: Vec<i64> = nodes.iter().rev().map(|&(id, _)| id).collect();
        ids.push(2_000_001);
        prop_assert_eq!(store.lookup_many(&ids).expect("lookup"), nodes);
    }

    #[test]
    fn request_index_agrees_with_search(nodes in sorted_nodes(), table in 1_usize..64) {
        let mut index = RequestIndex::with_table_size(table, nodes.len() >> 1);
        index.rebuild(nodes.clone());
        for &(id, coord) in &nodes {
            prop_assert_eq!(index.get(id), Some(coord));
        }
        prop_assert_eq!(index.get(-1), None);
    }
}
