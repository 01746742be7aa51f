use crate::dataset::{collate, encode_windowed, SampleItem};
use crate::error::{Result, StabilityError};
use crate::tokenizer::Tokenizer;
use crate::types::{records_from_frame, ProteinRecord};
use crate::window::{window_token_count, WindowSettings};
use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One sampled mutation pair.
#[derive(Debug, Clone)]
pub struct MutationPair {
    /// Row indices of both members within the dataset.
    pub id_1: usize,
    pub id_2: usize,
    /// tm of the first member minus tm of the second.
    pub diff_tm: f64,
    pub sub_group: u32,
    /// Positions where the two members' residues differ, restricted to
    /// the union of their recorded mutation sites.
    pub diff_locations: Vec<usize>,
    /// Batch the pair was assigned to.
    pub i_batch: usize,
}

/// One retrieval slot of the pair schedule: fetch `record` windowed
/// toward the diff locations of `pair`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairSlot {
    pub record: usize,
    pub pair: usize,
}

/// Sample for one member of a sampled mutation pair.
#[derive(Debug, Clone)]
pub struct PairSampleItem {
    pub sample: SampleItem,
    /// Index of the pair the member was drawn for.
    pub pair_id: usize,
}

/// Collated mini-batch of pair samples.
#[derive(Debug, Clone)]
pub struct PairBatch {
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
    pub position_ids: Option<Array2<i64>>,
    pub ph: Array1<f64>,
    pub tm: Array1<f64>,
    pub id: Vec<usize>,
    pub pair_id: Vec<usize>,
    pub n_splits: Vec<usize>,
}

/// Indexable collection producing tokenized samples for members of
/// sampled mutation pairs.
///
/// Built from a record set already annotated with mutation groups;
/// every row must carry a group and a tm label. [`PairDataset::pair_sampler`]
/// fills the internal pair table and returns an explicit per-batch
/// schedule of retrieval slots.
pub struct PairDataset<T: Tokenizer> {
    records: Vec<ProteinRecord>,
    n_sub: Vec<u32>,
    occurrence: Vec<u32>,
    pairs: Vec<MutationPair>,
    tokenizer: Option<T>,
    settings: WindowSettings,
}

impl<T: Tokenizer> PairDataset<T> {
    /// Builds a pair dataset from a grouped record table, joining each
    /// record with its group's member count as "n_sub".
    ///
    /// # Errors
    /// * Returns `StabilityError::DataError` if any row lacks a
    ///   "sub_group" or "tm" value
    pub fn from_frame(
        df: &DataFrame,
        tokenizer: Option<T>,
        settings: WindowSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let df = df
            .clone()
            .lazy()
            .with_column(
                col("protein_sequence")
                    .count()
                    .over([col("sub_group")])
                    .alias("n_sub"),
            )
            .collect()
            .map_err(|e| StabilityError::DataError(e.to_string()))?;

        let records = records_from_frame(&df)?;
        for (i, record) in records.iter().enumerate() {
            if record.sub_group.is_none() {
                return Err(StabilityError::DataError(format!(
                    "row {} has no mutation group",
                    i
                )));
            }
            if record.tm.is_none() {
                return Err(StabilityError::DataError(format!(
                    "row {} has no tm label",
                    i
                )));
            }
        }

        let n_sub = df
            .column("n_sub")
            .map_err(|e| StabilityError::DataError(e.to_string()))?
            .u32()
            .map_err(|e| StabilityError::DataError(e.to_string()))?
            .into_no_null_iter()
            .collect::<Vec<u32>>();

        let occurrence = vec![0; records.len()];
        Ok(PairDataset {
            records,
            n_sub,
            occurrence,
            pairs: Vec::new(),
            tokenizer,
            settings,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, i: usize) -> Option<&ProteinRecord> {
        self.records.get(i)
    }

    /// Member count of row `i`'s mutation group.
    pub fn n_sub(&self, i: usize) -> Option<u32> {
        self.n_sub.get(i).copied()
    }

    /// Pairs sampled by the last [`PairDataset::pair_sampler`] call.
    pub fn pairs(&self) -> &[MutationPair] {
        &self.pairs
    }

    /// How many sampled pairs each record has participated in, summed
    /// over all sampler calls.
    pub fn occurrences(&self) -> &[u32] {
        &self.occurrence
    }

    /// Samples mutation pairs into token-budgeted batches.
    ///
    /// Enumerates all unordered pairs within each mutation group,
    /// shuffles the pool, then fills batches by drawing pairs until the
    /// running cost (both members' estimated window tokens) reaches
    /// `batch_size_min`. Sampling stops once the batch count exceeds
    /// `n_batches_max`, the coverage rate (fraction of distinct records
    /// seen in any pair) reaches `coverage_rate_min`, or the pool runs
    /// dry.
    ///
    /// # Returns
    /// * `Result<Vec<Vec<PairSlot>>>` - Per-batch retrieval slots,
    ///   ordered all first members then all second members; the sampled
    ///   pair table stays queryable through [`PairDataset::pairs`]
    ///
    /// # Errors
    /// * Returns `StabilityError::InvalidParameter` if both stopping
    ///   bounds are absent
    pub fn pair_sampler(
        &mut self,
        batch_size_min: usize,
        n_batches_max: Option<usize>,
        coverage_rate_min: Option<f64>,
    ) -> Result<Vec<Vec<PairSlot>>> {
        if n_batches_max.is_none() && coverage_rate_min.is_none() {
            return Err(StabilityError::invalid_parameter(
                "n_batches_max/coverage_rate_min",
                "none",
                "assign at least one stopping bound",
            ));
        }
        let n_batches_max = n_batches_max.unwrap_or(usize::MAX);
        let coverage_rate_min = coverage_rate_min.unwrap_or(f64::INFINITY);

        let mut by_group: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, record) in self.records.iter().enumerate() {
            if let Some(group) = record.sub_group {
                by_group.entry(group).or_default().push(i);
            }
        }
        let mut pool: Vec<(usize, usize)> = Vec::new();
        for members in by_group.values() {
            for (a, &id_1) in members.iter().enumerate() {
                for &id_2 in &members[a + 1..] {
                    pool.push((id_1, id_2));
                }
            }
        }
        pool.shuffle(&mut thread_rng());

        self.pairs.clear();
        let mut schedule: Vec<Vec<PairSlot>> = Vec::new();
        let mut covered: HashSet<usize> = HashSet::new();
        let mut coverage_rate = 0.0;
        let mut next_pair = 0usize;
        let mut exhausted = false;

        while schedule.len() <= n_batches_max && coverage_rate < coverage_rate_min {
            let i_batch = schedule.len();
            let mut batch_cost = 0usize;
            let mut batch_pairs: Vec<usize> = Vec::new();

            while batch_cost < batch_size_min {
                let Some(&(id_1, id_2)) = pool.get(next_pair) else {
                    exhausted = true;
                    break;
                };
                next_pair += 1;

                let pair = self.build_pair(id_1, id_2, i_batch);
                self.pairs.push(pair);
                batch_pairs.push(self.pairs.len() - 1);

                self.occurrence[id_1] += 1;
                self.occurrence[id_2] += 1;
                covered.insert(id_1);
                covered.insert(id_2);

                batch_cost +=
                    2 * window_token_count(&self.records[id_1].sequence, &self.settings);
            }

            if !batch_pairs.is_empty() {
                let slots: Vec<PairSlot> = batch_pairs
                    .iter()
                    .map(|&p| PairSlot {
                        record: self.pairs[p].id_1,
                        pair: p,
                    })
                    .chain(batch_pairs.iter().map(|&p| PairSlot {
                        record: self.pairs[p].id_2,
                        pair: p,
                    }))
                    .collect();
                schedule.push(slots);
            }

            coverage_rate = covered.len() as f64 / self.records.len().max(1) as f64;
            if exhausted {
                warn!(
                    "pair pool exhausted after {} pairs, before any stopping bound",
                    self.pairs.len()
                );
                break;
            }
        }

        info!("pair sampling coverage: {:.1}%", coverage_rate * 100.0);
        if !self.occurrence.is_empty() {
            let total: u32 = self.occurrence.iter().sum();
            debug!(
                "occurrence: mean {:.2}, max {}",
                total as f64 / self.occurrence.len() as f64,
                self.occurrence.iter().max().copied().unwrap_or(0)
            );
        }

        Ok(schedule)
    }

    fn build_pair(&self, id_1: usize, id_2: usize, i_batch: usize) -> MutationPair {
        let r1 = &self.records[id_1];
        let r2 = &self.records[id_2];

        let mut sites: BTreeSet<usize> = BTreeSet::new();
        if let Some(locs) = &r1.sub_locations {
            sites.extend(locs.iter().copied());
        }
        if let Some(locs) = &r2.sub_locations {
            sites.extend(locs.iter().copied());
        }

        let seq_1 = r1.sequence.as_bytes();
        let seq_2 = r2.sequence.as_bytes();
        let diff_locations: Vec<usize> = sites
            .into_iter()
            .filter(|&loc| {
                loc < seq_1.len() && loc < seq_2.len() && seq_1[loc] != seq_2[loc]
            })
            .collect();

        MutationPair {
            id_1,
            id_2,
            diff_tm: r1.tm.unwrap_or(f64::NAN) - r2.tm.unwrap_or(f64::NAN),
            sub_group: r1.sub_group.unwrap_or(0),
            diff_locations,
            i_batch,
        }
    }

    /// Retrieves the tokenized sample for one schedule slot, windowing
    /// the member's sequence toward the pair's diff locations.
    ///
    /// # Errors
    /// * Returns `StabilityError::InvalidInput` if the slot's pair index
    ///   is stale or the record is not a member of that pair
    /// * Returns `StabilityError::TokenizerError` if no tokenizer is configured
    pub fn item(&self, slot: PairSlot) -> Result<PairSampleItem> {
        let pair = self.pairs.get(slot.pair).ok_or_else(|| {
            StabilityError::InvalidInput(format!("pair {} out of range", slot.pair))
        })?;
        if slot.record != pair.id_1 && slot.record != pair.id_2 {
            return Err(StabilityError::InvalidInput(format!(
                "record {} is not a member of pair {}",
                slot.record, slot.pair
            )));
        }
        let record = &self.records[slot.record];
        let tokenizer = self.tokenizer.as_ref().ok_or_else(|| {
            StabilityError::TokenizerError("no tokenizer configured".into())
        })?;

        let preferred = if pair.diff_locations.is_empty() {
            None
        } else {
            Some(pair.diff_locations.as_slice())
        };
        let windows = encode_windowed(
            tokenizer,
            &record.sequence,
            &self.settings,
            preferred,
            slot.record,
        )?;

        Ok(PairSampleItem {
            sample: SampleItem {
                id: slot.record,
                input_ids: windows.input_ids,
                attention_mask: windows.attention_mask,
                position_ids: windows.position_ids,
                ph: record.ph,
                tm: record.tm,
                seq_len: record.sequence.len(),
            },
            pair_id: slot.pair,
        })
    }
}

/// Collates pair samples into one flat batch, carrying the paired-row
/// identifier per item.
///
/// # Errors
/// * As [`crate::dataset::collate`], plus `StabilityError::DataError`
///   when an item lacks its tm label
pub fn collate_pairs(items: &[PairSampleItem]) -> Result<PairBatch> {
    let batch = collate(items.iter().map(|p| &p.sample))?;
    let tm = batch.tm.ok_or_else(|| {
        StabilityError::DataError("pair batch without tm labels".into())
    })?;

    Ok(PairBatch {
        input_ids: batch.input_ids,
        attention_mask: batch.attention_mask,
        position_ids: batch.position_ids,
        ph: batch.ph,
        tm,
        id: batch.id,
        pair_id: items.iter().map(|p| p.pair_id).collect(),
        n_splits: batch.n_splits,
    })
}
