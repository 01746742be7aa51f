use polars::prelude::*;
use protein_stability_rs::grouping;
use protein_stability_rs::types::DiffLocationMap;
use rand::{thread_rng, Rng};

fn frame(seqs: &[&str]) -> DataFrame {
    let n = seqs.len();
    df!(
        "seq_id" => (0..n as i64).collect::<Vec<i64>>(),
        "protein_sequence" => seqs.to_vec(),
        "pH" => vec![7.0; n],
    )
    .unwrap()
}

fn groups_of(col: &Column) -> Vec<Option<u32>> {
    col.u32().unwrap().into_iter().collect()
}

#[test]
fn test_close_pair_is_grouped() {
    // 1 of 5 residues differs: rate 0.2 < 0.3
    let df = frame(&["AAAAA", "AAAAB"]);
    let col = grouping::group_mutations(&df, 0.3).unwrap();
    let groups = groups_of(&col);
    assert!(groups[0].is_some());
    assert_eq!(groups[0], groups[1]);
}

#[test]
fn test_distant_pair_is_not_grouped() {
    // rate 0.2 >= 0.1
    let df = frame(&["AAAAA", "AAAAB"]);
    let col = grouping::group_mutations(&df, 0.1).unwrap();
    let groups = groups_of(&col);
    assert_eq!(groups, vec![None, None]);
}

#[test]
fn test_different_lengths_never_group() {
    let df = frame(&["AAAAA", "AAAA"]);
    let col = grouping::group_mutations(&df, 0.9).unwrap();
    let groups = groups_of(&col);
    assert_eq!(groups, vec![None, None]);
}

#[test]
fn test_chain_transitive_grouping() {
    // A-B and B-C are below the rate, A-C is not; the chain still joins
    // all three into one group.
    let df = frame(&["AAAAAAAAAA", "BAAAAAAAAA", "BBAAAAAAAA"]);
    let col = grouping::group_mutations(&df, 0.15).unwrap();
    let groups = groups_of(&col);
    assert!(groups[0].is_some());
    assert_eq!(groups[0], groups[1]);
    assert_eq!(groups[1], groups[2]);
}

#[test]
fn test_controlled_substitution_counts_group_iff_below_rate() {
    const LETTERS: [char; 20] = [
        'A', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V',
        'W', 'Y',
    ];
    let mut rng = thread_rng();
    let len = 50;
    let max_rate = 0.2;

    for _ in 0..25 {
        let base: String = (0..len)
            .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())])
            .collect();

        // Mutant with an exact, known number of substitutions
        let n_subs = rng.gen_range(1..20);
        let mut mutant: Vec<char> = base.chars().collect();
        for i in rand::seq::index::sample(&mut rng, len, n_subs) {
            let replacement = loop {
                let c = LETTERS[rng.gen_range(0..LETTERS.len())];
                if c != mutant[i] {
                    break c;
                }
            };
            mutant[i] = replacement;
        }
        let mutant: String = mutant.into_iter().collect();

        let df = frame(&[base.as_str(), mutant.as_str()]);
        let groups = groups_of(&grouping::group_mutations(&df, max_rate).unwrap());
        if (n_subs as f64) / (len as f64) < max_rate {
            assert!(groups[0].is_some(), "{} substitutions should group", n_subs);
            assert_eq!(groups[0], groups[1]);
        } else {
            assert_eq!(
                groups,
                vec![None, None],
                "{} substitutions should not group",
                n_subs
            );
        }
    }
}

#[test]
fn test_grouping_is_deterministic() {
    let df = frame(&["AAAAA", "AAAAB", "CCCCC", "CCCCA", "DDDDD", "AAABB"]);
    let first = grouping::group_mutations(&df, 0.3).unwrap();
    let second = grouping::group_mutations(&df, 0.3).unwrap();
    assert!(first
        .as_materialized_series()
        .equals_missing(second.as_materialized_series()));
}

#[test]
fn test_singletons_stay_null() {
    let df = frame(&["AAAAA", "AAAAB", "WWWWW"]);
    let col = grouping::group_mutations(&df, 0.3).unwrap();
    let groups = groups_of(&col);
    assert_eq!(groups[2], None);
    assert!(groups[0].is_some());
}

#[test]
fn test_locate_uses_median_reference() {
    let df = df!(
        "seq_id" => [0i64, 1, 2],
        "protein_sequence" => ["BAAAA", "AAAAA", "AACAA"],
        "pH" => [7.0, 7.0, 7.0],
        "tm" => [50.0, 51.0, 60.0],
        "sub_group" => [0u32, 0, 0],
    )
    .unwrap();

    // Median tm is 51, so row 1 becomes the reference
    let locations = grouping::locate_mutations(&df).unwrap();
    assert_eq!(locations.get(&0), Some(&vec![0]));
    assert_eq!(locations.get(&2), Some(&vec![2]));
    assert!(!locations.contains_key(&1));
}

#[test]
fn test_locate_pair_picks_one_member() {
    let df = df!(
        "seq_id" => [0i64, 1],
        "protein_sequence" => ["AAAAA", "ABABA"],
        "pH" => [7.0, 7.0],
        "tm" => [50.0, 55.0],
        "sub_group" => [0u32, 0],
    )
    .unwrap();

    let locations = grouping::locate_mutations(&df).unwrap();
    assert_eq!(locations.len(), 1);
    let diff = locations.values().next().unwrap();
    assert_eq!(diff, &vec![1, 3]);
}

#[test]
fn test_with_sub_locations_attaches_column() {
    let df = df!(
        "seq_id" => [0i64, 1],
        "protein_sequence" => ["AAAAA", "AAAAB"],
        "pH" => [7.0, 7.0],
    )
    .unwrap();

    let mut locations = DiffLocationMap::new();
    locations.insert(1, vec![4]);

    let df = grouping::with_sub_locations(&df, &locations).unwrap();
    let lists = df.column("sub_locations").unwrap().list().unwrap();
    assert!(lists.get_as_series(0).map_or(true, |s| s.is_empty()));
    let attached = lists.get_as_series(1).unwrap();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached.u32().unwrap().get(0), Some(4));
}
