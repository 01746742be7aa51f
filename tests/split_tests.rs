use polars::prelude::*;
use protein_stability_rs::split;
use std::collections::HashMap;

/// 16 rows in 8 mutation groups of 2, plus one ungrouped row.
fn grouped_frame() -> DataFrame {
    let mut groups: Vec<Option<u32>> = Vec::new();
    for g in 0..8u32 {
        groups.push(Some(g));
        groups.push(Some(g));
    }
    groups.push(None);

    df!(
        "seq_id" => (0..17i64).collect::<Vec<i64>>(),
        "sub_group" => groups,
    )
    .unwrap()
}

fn split_labels(df: &DataFrame) -> Vec<Option<String>> {
    df.column("split")
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .map(|s| s.map(|s| s.to_string()))
        .collect()
}

#[test]
fn test_split_group_labels_all_grouped_rows() {
    let df = split::split_group(&grouped_frame(), 0.25, 0.25, 1.0 / 6.0).unwrap();
    let labels = split_labels(&df);

    for label in &labels[..16] {
        assert!(matches!(
            label.as_deref(),
            Some("train") | Some("val") | Some("test")
        ));
    }
    // Ungrouped row stays unsplit
    assert_eq!(labels[16], None);

    // 8 groups in one stratum: 2 val, 2 test, 4 train
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for label in labels[..16].iter().flatten() {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }
    assert_eq!(counts["val"], 4);
    assert_eq!(counts["test"], 4);
    assert_eq!(counts["train"], 8);
}

#[test]
fn test_split_group_keeps_groups_together() {
    let df = split::split_group(&grouped_frame(), 0.25, 0.25, 1.0 / 6.0).unwrap();
    let labels = split_labels(&df);
    for g in 0..8 {
        assert_eq!(labels[2 * g], labels[2 * g + 1]);
    }
}

#[test]
fn test_split_group_is_deterministic() {
    let first = split::split_group(&grouped_frame(), 0.25, 0.25, 1.0 / 6.0).unwrap();
    let second = split::split_group(&grouped_frame(), 0.25, 0.25, 1.0 / 6.0).unwrap();
    assert!(first
        .column("split")
        .unwrap()
        .as_materialized_series()
        .equals_missing(second.column("split").unwrap().as_materialized_series()));
}

#[test]
fn test_split_tm_honors_mask() {
    let tm: Vec<f64> = (0..12).map(|i| 40.0 + (i % 2) as f64 * 10.0).collect();
    let df = df!(
        "seq_id" => (0..12i64).collect::<Vec<i64>>(),
        "tm" => tm,
    )
    .unwrap();

    let mut mask = vec![true; 12];
    mask[0] = false;
    mask[5] = false;

    let df = split::split_tm(&df, 0.25, 0.25, Some(&mask)).unwrap();
    let labels = split_labels(&df);

    assert_eq!(labels[0], None);
    assert_eq!(labels[5], None);
    for (i, label) in labels.iter().enumerate() {
        if mask[i] {
            assert!(matches!(
                label.as_deref(),
                Some("train") | Some("val") | Some("test")
            ));
        }
    }
}

#[test]
fn test_split_tm_is_deterministic() {
    let tm: Vec<f64> = (0..20).map(|i| 40.0 + i as f64).collect();
    let df = df!(
        "seq_id" => (0..20i64).collect::<Vec<i64>>(),
        "tm" => tm,
    )
    .unwrap();

    let first = split::split_tm(&df, 0.2, 0.2, None).unwrap();
    let second = split::split_tm(&df, 0.2, 0.2, None).unwrap();
    assert!(first
        .column("split")
        .unwrap()
        .as_materialized_series()
        .equals_missing(second.column("split").unwrap().as_materialized_series()));
}

#[test]
fn test_invalid_fractions_rejected() {
    let df = grouped_frame();
    assert!(split::split_group(&df, 0.5, 0.6, 1.0 / 6.0).is_err());
    assert!(split::split_group(&df, 1.2, 0.1, 1.0 / 6.0).is_err());
}

#[test]
fn test_mask_length_checked() {
    let df = df!(
        "seq_id" => [0i64, 1],
        "tm" => [40.0, 42.0],
    )
    .unwrap();
    assert!(split::split_tm(&df, 0.2, 0.2, Some(&[true])).is_err());
}
