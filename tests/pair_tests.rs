use polars::prelude::*;
use protein_stability_rs::grouping;
use protein_stability_rs::pairs::{collate_pairs, PairDataset};
use protein_stability_rs::tokenizer::ResidueTokenizer;
use protein_stability_rs::types::DiffLocationMap;
use protein_stability_rs::window::{Truncate, WindowSettings};
use std::collections::HashSet;

fn settings() -> WindowSettings {
    WindowSettings {
        max_length: Some(6),
        truncate: Some(Truncate::Split),
        overlap: 0.0,
        sample_splits: None,
        temperature: 8.0,
    }
}

/// Two mutation groups of sizes 3 and 2, with recorded mutation sites.
fn pair_frame() -> DataFrame {
    let df = df!(
        "seq_id" => [0i64, 1, 2, 3, 4],
        "protein_sequence" => ["AAAAAAAA", "AAAAAAAB", "AAAAABAA", "CCCCCCCC", "CCCCCCCD"],
        "pH" => [7.0, 7.0, 7.0, 7.0, 7.0],
        "tm" => [50.0, 52.0, 54.0, 60.0, 61.0],
        "sub_group" => [0u32, 0, 0, 1, 1],
    )
    .unwrap();

    let mut locations = DiffLocationMap::new();
    locations.insert(1, vec![7]);
    locations.insert(2, vec![5]);
    locations.insert(4, vec![7]);
    grouping::with_sub_locations(&df, &locations).unwrap()
}

#[test]
fn test_missing_bounds_rejected() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();
    assert!(dataset.pair_sampler(10, None, None).is_err());
}

#[test]
fn test_ungrouped_row_rejected() {
    let df = df!(
        "seq_id" => [0i64, 1],
        "protein_sequence" => ["AAAAAAAA", "AAAAAAAB"],
        "pH" => [7.0, 7.0],
        "tm" => [50.0, 52.0],
        "sub_group" => [Some(0u32), None],
    )
    .unwrap();
    assert!(PairDataset::from_frame(&df, Some(ResidueTokenizer), settings()).is_err());
}

#[test]
fn test_joins_group_sizes() {
    let dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();
    assert_eq!(dataset.n_sub(0), Some(3));
    assert_eq!(dataset.n_sub(2), Some(3));
    assert_eq!(dataset.n_sub(3), Some(2));
}

#[test]
fn test_sampler_enumerates_all_group_pairs() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();

    // A coverage bound that can never be met drains the whole pool:
    // C(3,2) + C(2,2) = 4 pairs
    let schedule = dataset.pair_sampler(1, None, Some(2.0)).unwrap();
    assert_eq!(dataset.pairs().len(), 4);
    assert_eq!(schedule.len(), 4);

    let sampled: HashSet<(usize, usize)> = dataset
        .pairs()
        .iter()
        .map(|p| (p.id_1, p.id_2))
        .collect();
    let expected: HashSet<(usize, usize)> =
        [(0, 1), (0, 2), (1, 2), (3, 4)].into_iter().collect();
    assert_eq!(sampled, expected);

    for pair in dataset.pairs() {
        assert_eq!(
            dataset.record(pair.id_1).unwrap().sub_group,
            dataset.record(pair.id_2).unwrap().sub_group
        );
    }
}

#[test]
fn test_sampler_batch_count_bound() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();

    // One pair per batch; sampling runs until the count exceeds the bound
    let schedule = dataset.pair_sampler(1, Some(1), None).unwrap();
    assert_eq!(schedule.len(), 2);
}

#[test]
fn test_sampler_coverage_bound_terminates() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();

    let schedule = dataset.pair_sampler(1, None, Some(1.0)).unwrap();
    assert!(!schedule.is_empty());

    let covered: HashSet<usize> = dataset
        .pairs()
        .iter()
        .flat_map(|p| [p.id_1, p.id_2])
        .collect();
    assert_eq!(covered.len(), dataset.len());
}

#[test]
fn test_coverage_never_decreases_across_batches() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();
    let schedule = dataset.pair_sampler(1, Some(3), None).unwrap();
    assert!(!schedule.is_empty());

    // Replay the batches in order; the cumulative fraction of distinct
    // records seen in any pair must never drop
    let mut covered: HashSet<usize> = HashSet::new();
    let mut last_rate = 0.0;
    for i_batch in 0..schedule.len() {
        for pair in dataset.pairs().iter().filter(|p| p.i_batch == i_batch) {
            covered.insert(pair.id_1);
            covered.insert(pair.id_2);
        }
        let rate = covered.len() as f64 / dataset.len() as f64;
        assert!(rate >= last_rate);
        last_rate = rate;
    }
    assert!(last_rate > 0.0);
}

#[test]
fn test_occurrence_tracking() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();

    dataset.pair_sampler(1, None, Some(2.0)).unwrap();
    let total: u32 = dataset.occurrences().iter().sum();
    assert_eq!(total as usize, 2 * dataset.pairs().len());
    // Every member of the size-3 group appears in two of its three pairs
    assert_eq!(dataset.occurrences()[0], 2);
}

#[test]
fn test_pair_diff_locations_restricted_to_mutation_sites() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();
    dataset.pair_sampler(1, None, Some(2.0)).unwrap();

    let pair = dataset
        .pairs()
        .iter()
        .find(|p| (p.id_1, p.id_2) == (1, 2))
        .unwrap();
    assert_eq!(pair.diff_locations, vec![5, 7]);
    assert_eq!(pair.sub_group, 0);

    let pair = dataset
        .pairs()
        .iter()
        .find(|p| (p.id_1, p.id_2) == (0, 1))
        .unwrap();
    assert_eq!(pair.diff_locations, vec![7]);
    assert!((pair.diff_tm - (50.0 - 52.0)).abs() < 1e-12);
}

#[test]
fn test_schedule_slots_resolve() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();
    let schedule = dataset.pair_sampler(40, None, Some(1.0)).unwrap();

    for batch in &schedule {
        // First half id_1 members, second half id_2 members
        assert_eq!(batch.len() % 2, 0);
        for &slot in batch {
            let item = dataset.item(slot).unwrap();
            assert_eq!(item.pair_id, slot.pair);
            assert_eq!(item.sample.id, slot.record);
            assert!(item.sample.tm.is_some());
        }
    }
}

#[test]
fn test_collate_pairs_emits_pair_ids() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();
    let schedule = dataset.pair_sampler(40, None, Some(1.0)).unwrap();

    let items: Vec<_> = schedule[0]
        .iter()
        .map(|&slot| dataset.item(slot).unwrap())
        .collect();
    let batch = collate_pairs(&items).unwrap();

    assert_eq!(batch.pair_id.len(), batch.id.len());
    assert_eq!(batch.tm.len(), batch.id.len());
    assert_eq!(batch.n_splits.iter().sum::<usize>(), batch.input_ids.nrows());
    for (&slot, &pair_id) in schedule[0].iter().zip(batch.pair_id.iter()) {
        assert_eq!(slot.pair, pair_id);
    }
}

#[test]
fn test_stale_slot_rejected() {
    let mut dataset =
        PairDataset::from_frame(&pair_frame(), Some(ResidueTokenizer), settings()).unwrap();
    dataset.pair_sampler(1, None, Some(2.0)).unwrap();

    let stale = protein_stability_rs::pairs::PairSlot {
        record: 0,
        pair: 99,
    };
    assert!(dataset.item(stale).is_err());
}
