//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Split counter: k sequential splits from N leave N-k, never below zero
//! - Clamping: any requested counter lands in 0..=u32::MAX
//! - Lineage: any sequence of gives rebuilds into one rooted tree
//! - Pagination: concatenated filtered pages list every matching mother once,
//!   newest first

use frag_ledger::{
    CollectionFilters, Config, Error, GiveRequest, ItemType, Ledger, NewItem, Rule, UserId,
};
use proptest::prelude::*;
use tempfile::TempDir;
use uuid::Uuid;

const OWNER: UserId = UserId::new(1);

/// Create test ledger with temp directory
fn create_test_ledger(page_size: usize) -> (Ledger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.collection.page_size = page_size;

    (Ledger::open(config).unwrap(), temp_dir)
}

fn item(name: String, frags_available: i64) -> NewItem {
    NewItem {
        owner_id: Some(OWNER),
        name: Some(name),
        item_type: Some("sps".into()),
        rule: Some("public".into()),
        frags_available,
        ..Default::default()
    }
}

/// Strategy for a give: (index into current holders, recipient, transfer)
fn give_strategy() -> impl Strategy<Value = (usize, u64, bool)> {
    (any::<usize>(), 2u64..50, any::<bool>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: k sequential splits from N leave N-k, and the (N+1)th fails
    #[test]
    fn prop_sequential_splits(n in 0u32..12, extra in 0u32..3) {
        let (ledger, _temp) = create_test_ledger(12);
        let (mother_id, root) = ledger.insert_item(&item("Birdsnest".into(), i64::from(n))).unwrap();

        for k in 1..=n {
            let (remaining, _) = ledger
                .give_a_frag(OWNER, &GiveRequest::split(root, UserId::new(100 + u64::from(k))))
                .unwrap();
            prop_assert_eq!(remaining, n - k);
        }
        for _ in 0..extra {
            let result = ledger.give_a_frag(OWNER, &GiveRequest::split(root, UserId::new(99)));
            prop_assert!(matches!(result, Err(Error::NotFoundOrForbidden)));
        }

        let frags = ledger.select_frags_for_mother(OWNER, mother_id).unwrap();
        prop_assert_eq!(frags.len() as u32, n + 1);
        prop_assert_eq!(frags[0].frags_available, 0);
    }

    /// Property: the stored counter is always the clamped request
    #[test]
    fn prop_counter_clamped(value in any::<i64>()) {
        let (ledger, _temp) = create_test_ledger(12);
        let (_, root) = ledger.insert_item(&item("Montipora".into(), 1)).unwrap();

        let stored = ledger.update_frags_available(OWNER, root, value).unwrap();
        let expected = value.clamp(0, i64::from(u32::MAX)) as u32;
        prop_assert_eq!(stored, expected);
    }

    /// Property: any sequence of gives rebuilds into a single rooted tree
    #[test]
    fn prop_lineage_stays_a_tree(gives in prop::collection::vec(give_strategy(), 0..20)) {
        let (ledger, _temp) = create_test_ledger(12);
        let (mother_id, root) = ledger.insert_item(&item("Duncan".into(), 1_000)).unwrap();

        let mut holders: Vec<(UserId, Uuid)> = vec![(OWNER, root)];
        let mut created = 1;
        for (pick, recipient, transfer) in gives {
            let (giver, source) = holders[pick % holders.len()];
            let recipient = UserId::new(recipient);
            let request = if transfer {
                GiveRequest::transfer(source, recipient)
            } else {
                GiveRequest::split(source, recipient)
            };
            match ledger.give_a_frag(giver, &request) {
                Ok((_, child)) => {
                    created += 1;
                    if transfer {
                        holders.retain(|(_, f)| *f != source);
                    }
                    holders.push((recipient, child));
                }
                // Self-gifts and empty counters are refused without writing
                Err(e) => prop_assert!(e.is_client_error()),
            }
        }

        let tree = ledger.lineage(OWNER, mother_id).unwrap();
        prop_assert_eq!(tree.len(), created);
        prop_assert_eq!(tree.root().frag.frag_id, root);
        prop_assert_eq!(tree.walk().len(), created);
        prop_assert_eq!(tree.live_count(), holders.len());
    }

    /// Property: concatenated filtered pages list every matching mother exactly
    /// once, newest first
    #[test]
    fn prop_pages_cover_collection(
        kinds in prop::collection::vec((any::<bool>(), any::<bool>()), 0..15),
        page_size in 1usize..6,
        by_type in any::<bool>(),
        by_name in any::<bool>(),
    ) {
        let (ledger, _temp) = create_test_ledger(page_size);
        let mut inserted = Vec::new();
        for (i, (soft, blue)) in kinds.iter().copied().enumerate() {
            let name = if blue { format!("Blue colony {}", i) } else { format!("colony {}", i) };
            let new_item = NewItem {
                item_type: Some(if soft { "soft" } else { "sps" }.into()),
                ..item(name, 0)
            };
            let (mother_id, _) = ledger.insert_item(&new_item).unwrap();
            inserted.push((mother_id, soft, blue));
        }

        let filters = CollectionFilters {
            item_type: by_type.then_some(ItemType::Soft),
            name: by_name.then(|| "BLUE".to_string()),
            ..Default::default()
        };
        let mut listed = Vec::new();
        let pages = kinds.len() / page_size + 2;
        for page in 1..=pages {
            let rows = ledger
                .select_collection_paged(UserId::new(2), &[Rule::Public], page, &filters)
                .unwrap();
            prop_assert!(rows.len() <= page_size);
            listed.extend(rows.into_iter().map(|r| r.mother.mother_id));
        }

        let expected: Vec<Uuid> = inserted
            .into_iter()
            .rev()
            .filter(|(_, soft, blue)| (!by_type || *soft) && (!by_name || *blue))
            .map(|(mother_id, _, _)| mother_id)
            .collect();
        prop_assert_eq!(listed, expected);
    }
}
