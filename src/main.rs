use polars::prelude::*;
use protein_stability_rs::dataset::{collate, StabilityDataset};
use protein_stability_rs::grouping;
use protein_stability_rs::pairs::{collate_pairs, PairDataset};
use protein_stability_rs::split;
use protein_stability_rs::tokenizer::ResidueTokenizer;
use protein_stability_rs::window::{Truncate, WindowSettings};

fn main() {
    let base_1 = "MKVLAAGITGRSDEWLQNAHPMKVLAAGITGRSDEWLQNA";
    let base_2 = "GHSTRPLLKAVNEDDQWYCAMFGHSTRPLLKAVNEDDQWY";

    let df: DataFrame = df!(
        "seq_id" => [0i64, 1, 2, 3, 4, 5, 6],
        "protein_sequence" => [
            base_1.to_string(),
            base_1.replacen('A', "G", 1),
            base_1.replacen('E', "D", 1),
            base_2.to_string(),
            base_2.replacen('C', "S", 1),
            "MKVL".to_string(),
            "AHPMKVWWWWLQNAHPMKVLAAGITGRSDEWLQNAHPMKV".to_string(),
        ],
        "pH" => [7.0, 7.0, 6.5, 7.5, 7.0, 7.0, 8.0],
        "tm" => [48.2, 51.0, 47.1, 60.3, 58.9, 40.0, 55.5],
    )
    .unwrap();

    let mut df = df;
    df.with_column(grouping::group_mutations(&df, 0.1).unwrap())
        .unwrap();
    let locations = grouping::locate_mutations(&df).unwrap();
    let df = grouping::with_sub_locations(&df, &locations).unwrap();
    let df = split::split_group(&df, 0.25, 0.25, 1.0 / 6.0).unwrap();
    println!("{:?}", df);

    let settings = WindowSettings {
        max_length: Some(16),
        truncate: Some(Truncate::Split),
        overlap: 0.25,
        sample_splits: Some(3),
        temperature: 8.0,
    };

    let dataset =
        StabilityDataset::from_frame(&df, Some(ResidueTokenizer), settings.clone()).unwrap();
    let batches = dataset.sequence_sampler(64, true);
    let items: Vec<_> = batches[0]
        .iter()
        .map(|&i| dataset.item(i).unwrap())
        .collect();
    let batch = collate(&items).unwrap();
    println!(
        "collated {} proteins into {} windows of width {}",
        batch.id.len(),
        batch.input_ids.nrows(),
        batch.input_ids.ncols()
    );

    let grouped = df
        .filter(
            &df.column("sub_group")
                .unwrap()
                .as_materialized_series()
                .is_not_null(),
        )
        .unwrap();
    let mut pair_dataset =
        PairDataset::from_frame(&grouped, Some(ResidueTokenizer), settings).unwrap();
    let schedule = pair_dataset
        .pair_sampler(128, Some(2), None)
        .unwrap();
    let pair_items: Vec<_> = schedule[0]
        .iter()
        .map(|&slot| pair_dataset.item(slot).unwrap())
        .collect();
    let pair_batch = collate_pairs(&pair_items).unwrap();
    println!(
        "sampled {} pairs over {} batches, first pair batch holds {} members",
        pair_dataset.pairs().len(),
        schedule.len(),
        pair_batch.id.len()
    );
}
