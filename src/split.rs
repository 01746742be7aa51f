use crate::error::{Result, StabilityError};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};

/// Seed shared by both split routines; splits must be reproducible
/// across runs.
const SPLIT_SEED: u64 = 0;

fn check_fractions(frac_val: f64, frac_test: f64) -> Result<()> {
    if !(0.0..1.0).contains(&frac_val) {
        return Err(StabilityError::invalid_parameter(
            "frac_val",
            frac_val,
            "must be in [0, 1)",
        ));
    }
    if !(0.0..1.0).contains(&frac_test) || frac_val + frac_test >= 1.0 {
        return Err(StabilityError::invalid_parameter(
            "frac_test",
            frac_test,
            "val and test fractions must sum below 1",
        ));
    }
    Ok(())
}

/// Seeded sample of `frac` elements out of `items`, removing the chosen
/// ones from the input.
fn sample_fraction<T: Copy>(items: &mut Vec<T>, frac: f64, rng: &mut StdRng) -> Vec<T> {
    let k = ((items.len() as f64) * frac).round() as usize;
    let chosen = rand::seq::index::sample(rng, items.len(), k.min(items.len()));
    let mut mask = vec![false; items.len()];
    for i in chosen.iter() {
        mask[i] = true;
    }
    let mut taken = Vec::with_capacity(k);
    let mut kept = Vec::with_capacity(items.len() - k);
    for (i, &item) in items.iter().enumerate() {
        if mask[i] {
            taken.push(item);
        } else {
            kept.push(item);
        }
    }
    *items = kept;
    taken
}

/// Splits records into train/val/test by mutation group, stratified by
/// dampened group size.
///
/// Whole groups are assigned to one split so mutants of the same
/// protein never leak across splits. Strata are the group sizes raised
/// to `power` (after subtracting the minimum size) and rounded to one
/// decimal; validation groups are drawn first, then test groups from
/// the remainder with the fraction rescaled by `1 / (1 - frac_val)`.
/// Sampling is seeded, so re-running yields the same assignment.
///
/// # Arguments
/// * `df` - DataFrame with a nullable "sub_group" column
/// * `frac_val` - fraction of data for validation
/// * `frac_test` - fraction of data for test
/// * `power` - dampening exponent in (0, 1], typically 1/6
///
/// # Returns
/// * `Result<DataFrame>` - The frame with a nullable "split" column;
///   rows without a group stay unsplit
pub fn split_group(
    df: &DataFrame,
    frac_val: f64,
    frac_test: f64,
    power: f64,
) -> Result<DataFrame> {
    check_fractions(frac_val, frac_test)?;

    let sub_groups = df
        .column("sub_group")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .u32()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for g in sub_groups.into_iter().flatten() {
        *counts.entry(g).or_insert(0) += 1;
    }
    if counts.is_empty() {
        let mut df = df.clone();
        let nulls: Vec<Option<&str>> = vec![None; df.height()];
        df.with_column(Column::new("split".into(), nulls))
            .map_err(|e| StabilityError::DataError(e.to_string()))?;
        return Ok(df);
    }

    let min_count = counts.values().copied().min().unwrap_or(0);

    // Strata keyed by dampened size, rounded to one decimal
    let mut strata: BTreeMap<i64, Vec<u32>> = BTreeMap::new();
    for (&group, &count) in &counts {
        let dampened = ((count - min_count) as f64).powf(power);
        strata
            .entry((dampened * 10.0).round() as i64)
            .or_default()
            .push(group);
    }

    let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
    let mut assignment: HashMap<u32, &str> = HashMap::new();
    let rescaled_test = frac_test / (1.0 - frac_val);

    for groups in strata.values_mut() {
        groups.sort_unstable();
        for g in sample_fraction(groups, frac_val, &mut rng) {
            assignment.insert(g, "val");
        }
        for g in sample_fraction(groups, rescaled_test, &mut rng) {
            assignment.insert(g, "test");
        }
        for &g in groups.iter() {
            assignment.insert(g, "train");
        }
    }

    let split: Vec<Option<&str>> = (0..df.height())
        .map(|i| sub_groups.get(i).and_then(|g| assignment.get(&g).copied()))
        .collect();

    let mut df = df.clone();
    df.with_column(Column::new("split".into(), split))
        .map_err(|e| StabilityError::DataError(e.to_string()))?;
    Ok(df)
}

/// Splits individual records into train/val/test, stratified by tm bins
/// of width 2.
///
/// # Arguments
/// * `df` - DataFrame with a "tm" column
/// * `frac_val` - fraction of data for validation
/// * `frac_test` - fraction of data for test
/// * `mask` - optional per-row mask; unmasked rows stay unsplit
///
/// # Returns
/// * `Result<DataFrame>` - The frame with a nullable "split" column
pub fn split_tm(
    df: &DataFrame,
    frac_val: f64,
    frac_test: f64,
    mask: Option<&[bool]>,
) -> Result<DataFrame> {
    check_fractions(frac_val, frac_test)?;

    if let Some(mask) = mask {
        if mask.len() != df.height() {
            return Err(StabilityError::InvalidInput(format!(
                "mask of {} rows for a frame of {}",
                mask.len(),
                df.height()
            )));
        }
    }

    let tm = df
        .column("tm")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .f64()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;

    let mut bins: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for i in 0..df.height() {
        if mask.is_some_and(|m| !m[i]) {
            continue;
        }
        if let Some(t) = tm.get(i) {
            bins.entry((t / 2.0).floor() as i64).or_default().push(i);
        }
    }

    let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
    let mut split: Vec<Option<&str>> = vec![None; df.height()];
    let rescaled_test = frac_test / (1.0 - frac_val);

    for rows in bins.values_mut() {
        for i in sample_fraction(rows, frac_val, &mut rng) {
            split[i] = Some("val");
        }
        for i in sample_fraction(rows, rescaled_test, &mut rng) {
            split[i] = Some("test");
        }
        for &i in rows.iter() {
            split[i] = Some("train");
        }
    }

    let mut df = df.clone();
    df.with_column(Column::new("split".into(), split))
        .map_err(|e| StabilityError::DataError(e.to_string()))?;
    Ok(df)
}
