use crate::error::{Result, StabilityError};
use crate::stats;
use crate::tokenizer::Tokenizer;
use crate::types::{records_from_frame, ProteinRecord};
use crate::window::{truncate_sequence, window_token_count, Truncate, Window, WindowSettings};
use ndarray::{concatenate, Array1, Array2, Axis};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::collections::{BTreeMap, HashMap};

/// Tokenized, windowed sample for one protein.
#[derive(Debug, Clone)]
pub struct SampleItem {
    /// Row index of the protein within its dataset.
    pub id: usize,
    /// One row per window, each `max_length + 1` wide after stitching.
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
    /// Original-sequence coordinates per token; absent when no
    /// `max_length` is configured.
    pub position_ids: Option<Array2<i64>>,
    pub ph: f64,
    pub tm: Option<f64>,
    pub seq_len: usize,
}

/// Windowed but untokenized sample, the raw-sequence retrieval path.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub id: usize,
    pub windows: Vec<Window>,
    pub ph: f64,
    pub tm: Option<f64>,
}

/// Collated mini-batch of samples, window rows flattened across items.
#[derive(Debug, Clone)]
pub struct ProteinBatch {
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
    pub position_ids: Option<Array2<i64>>,
    pub ph: Array1<f64>,
    pub tm: Option<Array1<f64>>,
    pub id: Vec<usize>,
    /// Window count per item, for regrouping rows after the model pass.
    pub n_splits: Vec<usize>,
}

/// In-batch mutation pairs for a pairwise ranking loss.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingPairs {
    pub pred_1: Vec<f64>,
    pub pred_2: Vec<f64>,
    /// sign(tm_1 - tm_2) per pair, in {-1, 0, +1}.
    pub labels: Vec<f64>,
}

pub(crate) struct TokenizedWindows {
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
    pub position_ids: Option<Array2<i64>>,
}

/// Windows, tokenizes and stitches one sequence.
///
/// Long sequences are windowed and each window tokenized padded to
/// `max_length + 2`, then stitched down to `max_length + 1`. In split
/// mode the sentinel-padded windows get stitched: the first window
/// swaps its leading sentinel for a copy of the end marker and drops
/// its trailing slot; the last window drops its second-to-last slot and
/// zeroes the trailing sentinel position; interior windows just drop
/// the trailing slot. Single-mode windows carry no sentinels and only
/// drop the trailing slot. Every position row gains a leading 0 for the
/// start marker. Sequences that fit the stitched width are tokenized
/// whole, padded to `max_length + 1` with ascending positions; without
/// `max_length` the sequence is tokenized unpadded and positions are
/// implicit.
pub(crate) fn encode_windowed<T: Tokenizer>(
    tokenizer: &T,
    seq: &str,
    settings: &WindowSettings,
    preferred: Option<&[usize]>,
    id: usize,
) -> Result<TokenizedWindows> {
    match settings.max_length {
        Some(max_length) if seq.len() + 1 > max_length => {
            if settings.truncate.is_none() {
                return Err(StabilityError::invalid_parameter(
                    "truncate",
                    "none",
                    "required for sequences longer than max_length - 2",
                ));
            }

            let windows = truncate_sequence(seq, settings, preferred)?;
            let width = max_length + 1;
            // Only split-mode windows carry sentinels to stitch around
            let split_mode = settings.truncate == Some(Truncate::Split);

            let mut ids_flat = Vec::with_capacity(windows.len() * width);
            let mut mask_flat = Vec::with_capacity(windows.len() * width);
            let mut pos_flat = Vec::with_capacity(windows.len() * width);

            for window in &windows {
                let enc = tokenizer.encode(&window.seq, Some(max_length + 2))?;
                if enc.input_ids.len() != max_length + 2
                    || enc.attention_mask.len() != max_length + 2
                {
                    return Err(StabilityError::TokenizerError(format!(
                        "expected {} tokens, got {}",
                        max_length + 2,
                        enc.input_ids.len()
                    )));
                }

                let mut ids = enc.input_ids;
                let mut mask = enc.attention_mask;
                let mut positions: Vec<i64> =
                    window.positions.iter().map(|&p| p as i64).collect();

                if split_mode && window.positions.contains(&0) {
                    // First window: leading sentinel becomes the end marker
                    ids[1] = ids[max_length + 1];
                    mask[1] = mask[max_length + 1];
                    ids.truncate(width);
                    mask.truncate(width);
                    positions.insert(0, 0);
                } else if split_mode && window.positions.contains(&(seq.len() + 1)) {
                    // Last window: drop the slot before the end marker
                    ids.remove(max_length);
                    mask.remove(max_length);
                    if let Some(last) = positions.last_mut() {
                        *last = 0;
                    }
                    positions.insert(0, 0);
                } else {
                    ids.truncate(width);
                    mask.truncate(width);
                    positions.insert(0, 0);
                }

                if positions.len() > width {
                    return Err(StabilityError::dimension_mismatch(
                        id,
                        format!("window positions of {} do not fit width {}", positions.len(), width),
                    ));
                }
                positions.resize(width, 0);

                ids_flat.extend(ids);
                mask_flat.extend(mask);
                pos_flat.extend(positions);
            }

            let shape = (windows.len(), width);
            Ok(TokenizedWindows {
                input_ids: Array2::from_shape_vec(shape, ids_flat)
                    .map_err(|e| StabilityError::dimension_mismatch(id, e.to_string()))?,
                attention_mask: Array2::from_shape_vec(shape, mask_flat)
                    .map_err(|e| StabilityError::dimension_mismatch(id, e.to_string()))?,
                position_ids: Some(
                    Array2::from_shape_vec(shape, pos_flat)
                        .map_err(|e| StabilityError::dimension_mismatch(id, e.to_string()))?,
                ),
            })
        }
        Some(max_length) => {
            let width = max_length + 1;
            let enc = tokenizer.encode(seq, Some(width))?;

            let mut positions: Vec<i64> = (0..=seq.len() as i64).collect();
            positions.resize(width, 0);

            Ok(TokenizedWindows {
                input_ids: Array2::from_shape_vec((1, width), enc.input_ids)
                    .map_err(|e| StabilityError::dimension_mismatch(id, e.to_string()))?,
                attention_mask: Array2::from_shape_vec((1, width), enc.attention_mask)
                    .map_err(|e| StabilityError::dimension_mismatch(id, e.to_string()))?,
                position_ids: Some(
                    Array2::from_shape_vec((1, width), positions)
                        .map_err(|e| StabilityError::dimension_mismatch(id, e.to_string()))?,
                ),
            })
        }
        None => {
            let enc = tokenizer.encode(seq, None)?;
            let width = enc.input_ids.len();
            Ok(TokenizedWindows {
                input_ids: Array2::from_shape_vec((1, width), enc.input_ids)
                    .map_err(|e| StabilityError::dimension_mismatch(id, e.to_string()))?,
                attention_mask: Array2::from_shape_vec((1, width), enc.attention_mask)
                    .map_err(|e| StabilityError::dimension_mismatch(id, e.to_string()))?,
                position_ids: None,
            })
        }
    }
}

/// Indexable collection producing tokenized, windowed samples for
/// single proteins.
///
/// Supervision is decided once at construction: frames carrying a "tm"
/// column yield labeled samples, all other frames yield unlabeled ones.
pub struct StabilityDataset<T: Tokenizer> {
    records: Vec<ProteinRecord>,
    tokenizer: Option<T>,
    settings: WindowSettings,
    labeled: bool,
}

impl<T: Tokenizer> StabilityDataset<T> {
    /// Builds a dataset from a record table.
    ///
    /// # Arguments
    /// * `df` - DataFrame with "seq_id", "protein_sequence" and "pH"
    ///   columns; "tm", "sub_group" and "sub_locations" are used when present
    /// * `tokenizer` - external tokenizer, or `None` for raw retrieval only
    /// * `settings` - windowing configuration, validated up front
    pub fn from_frame(
        df: &DataFrame,
        tokenizer: Option<T>,
        settings: WindowSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let labeled = df.column("tm").is_ok();
        Ok(StabilityDataset {
            records: records_from_frame(df)?,
            tokenizer,
            settings,
            labeled,
        })
    }

    /// Keeps a random fraction of the records, for quick debug runs.
    pub fn with_debug_fraction(mut self, fraction: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(StabilityError::invalid_parameter(
                "fraction",
                fraction,
                "must be in [0, 1]",
            ));
        }
        let keep = (self.records.len() as f64 * fraction).round() as usize;
        let mut kept =
            rand::seq::index::sample(&mut thread_rng(), self.records.len(), keep).into_vec();
        kept.sort_unstable();
        self.records = kept.into_iter().map(|i| self.records[i].clone()).collect();
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_labeled(&self) -> bool {
        self.labeled
    }

    pub fn record(&self, i: usize) -> Option<&ProteinRecord> {
        self.records.get(i)
    }

    pub fn settings(&self) -> &WindowSettings {
        &self.settings
    }

    /// Retrieves the tokenized sample for row `i`, windowing long
    /// sequences toward the record's stored mutation sites.
    ///
    /// # Errors
    /// * Returns `StabilityError::TokenizerError` if no tokenizer is configured
    /// * Returns `StabilityError::InvalidInput` if `i` is out of range
    pub fn item(&self, i: usize) -> Result<SampleItem> {
        let record = self
            .records
            .get(i)
            .ok_or_else(|| StabilityError::InvalidInput(format!("row {} out of range", i)))?;
        let tokenizer = self.tokenizer.as_ref().ok_or_else(|| {
            StabilityError::TokenizerError("no tokenizer configured".into())
        })?;

        let windows = encode_windowed(
            tokenizer,
            &record.sequence,
            &self.settings,
            record.sub_locations.as_deref(),
            i,
        )?;

        Ok(SampleItem {
            id: i,
            input_ids: windows.input_ids,
            attention_mask: windows.attention_mask,
            position_ids: windows.position_ids,
            ph: record.ph,
            tm: record.tm,
            seq_len: record.sequence.len(),
        })
    }

    /// Retrieves the windowed but untokenized sample for row `i`.
    pub fn raw_item(&self, i: usize) -> Result<RawItem> {
        let record = self
            .records
            .get(i)
            .ok_or_else(|| StabilityError::InvalidInput(format!("row {} out of range", i)))?;

        let windows = match self.settings.max_length {
            Some(max_length) if record.sequence.len() + 1 > max_length => truncate_sequence(
                &record.sequence,
                &self.settings,
                record.sub_locations.as_deref(),
            )?,
            _ => vec![Window {
                seq: record.sequence.clone(),
                positions: (0..record.sequence.len()).collect(),
            }],
        };

        Ok(RawItem {
            id: i,
            windows,
            ph: record.ph,
            tm: record.tm,
        })
    }

    /// Groups record rows into batches approximating a token budget.
    ///
    /// Each record's cost is its estimated window token count; rows are
    /// accumulated in (optionally shuffled) order until the running cost
    /// reaches `batch_size`, then a new batch starts. The trailing
    /// partial batch is kept.
    pub fn sequence_sampler(&self, batch_size: usize, shuffle: bool) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.records.len()).collect();
        if shuffle {
            order.shuffle(&mut thread_rng());
        }

        let mut batches = Vec::new();
        let mut batch = Vec::new();
        let mut cost = 0usize;
        for i in order {
            cost += window_token_count(&self.records[i].sequence, &self.settings);
            batch.push(i);
            if cost >= batch_size {
                batches.push(std::mem::take(&mut batch));
                cost = 0;
            }
        }
        if !batch.is_empty() {
            batches.push(batch);
        }
        batches
    }

    /// Pairs up in-batch mutants for a pairwise ranking loss.
    ///
    /// For every mutation group with at least two members among `ids`,
    /// emits all unordered prediction pairs plus the sign of their true
    /// tm difference.
    ///
    /// # Returns
    /// * `Ok(None)` when the batch has one item or no group overlap
    ///
    /// # Errors
    /// * Returns `StabilityError::InvalidInput` if the dataset is unlabeled
    ///   or `ids` and `predictions` differ in length
    pub fn group_mutations(
        &self,
        ids: &[usize],
        predictions: &[f64],
    ) -> Result<Option<RankingPairs>> {
        if !self.labeled {
            return Err(StabilityError::InvalidInput(
                "ranking pairs require a labeled dataset".into(),
            ));
        }
        if ids.len() != predictions.len() {
            return Err(StabilityError::InvalidInput(format!(
                "{} ids but {} predictions",
                ids.len(),
                predictions.len()
            )));
        }
        if ids.len() <= 1 {
            return Ok(None);
        }

        let groups = self.batch_groups(ids)?;

        let mut pairs = RankingPairs {
            pred_1: Vec::new(),
            pred_2: Vec::new(),
            labels: Vec::new(),
        };
        for members in groups.values() {
            if members.len() < 2 {
                continue;
            }
            for (a, &(pos_1, tm_1)) in members.iter().enumerate() {
                for &(pos_2, tm_2) in &members[a + 1..] {
                    pairs.pred_1.push(predictions[pos_1]);
                    pairs.pred_2.push(predictions[pos_2]);
                    pairs.labels.push(stats::sign(tm_1 - tm_2));
                }
            }
        }

        if pairs.labels.is_empty() {
            Ok(None)
        } else {
            Ok(Some(pairs))
        }
    }

    /// Spearman rank correlation between true and predicted tm, per
    /// mutation group with at least two members among `ids`.
    pub fn compute_mutation_scc(
        &self,
        ids: &[usize],
        predictions: &[f64],
    ) -> Result<Option<HashMap<u32, f64>>> {
        if ids.len() != predictions.len() {
            return Err(StabilityError::InvalidInput(format!(
                "{} ids but {} predictions",
                ids.len(),
                predictions.len()
            )));
        }

        let groups = self.batch_groups(ids)?;

        let mut scc = HashMap::new();
        for (&group, members) in &groups {
            if members.len() < 2 {
                continue;
            }
            let tm: Vec<f64> = members.iter().map(|&(_, t)| t).collect();
            let pred: Vec<f64> = members.iter().map(|&(pos, _)| predictions[pos]).collect();
            scc.insert(group, stats::spearman(&tm, &pred)?);
        }

        if scc.is_empty() {
            Ok(None)
        } else {
            Ok(Some(scc))
        }
    }

    /// Batch positions and true tm of grouped records among `ids`,
    /// keyed by group in ascending order.
    fn batch_groups(&self, ids: &[usize]) -> Result<BTreeMap<u32, Vec<(usize, f64)>>> {
        let mut groups: BTreeMap<u32, Vec<(usize, f64)>> = BTreeMap::new();
        for (pos, &row) in ids.iter().enumerate() {
            let record = self.records.get(row).ok_or_else(|| {
                StabilityError::InvalidInput(format!("row {} out of range", row))
            })?;
            if let (Some(group), Some(tm)) = (record.sub_group, record.tm) {
                groups.entry(group).or_default().push((pos, tm));
            }
        }
        Ok(groups)
    }
}

/// Collates samples into one flat batch.
///
/// All windows across items are concatenated row-wise; `n_splits`
/// records each item's window count so rows can be regrouped after the
/// model pass. Scalar fields are stacked per item.
///
/// # Errors
/// * Returns `StabilityError::InvalidInput` on an empty batch
/// * Returns `StabilityError::DimensionMismatch`, carrying the offending
///   protein id, when items disagree on window width or on the presence
///   of positions or labels
pub fn collate<'a, I>(items: I) -> Result<ProteinBatch>
where
    I: IntoIterator<Item = &'a SampleItem>,
{
    let items: Vec<&SampleItem> = items.into_iter().collect();
    let first = *items
        .first()
        .ok_or_else(|| StabilityError::InvalidInput("empty batch".into()))?;

    let width = first.input_ids.ncols();
    let with_positions = first.position_ids.is_some();
    let with_tm = first.tm.is_some();

    for item in &items {
        if item.input_ids.ncols() != width {
            return Err(StabilityError::dimension_mismatch(
                item.id,
                format!("window width {} differs from {}", item.input_ids.ncols(), width),
            ));
        }
        if item.position_ids.is_some() != with_positions {
            return Err(StabilityError::dimension_mismatch(
                item.id,
                "inconsistent position ids across batch",
            ));
        }
        if item.tm.is_some() != with_tm {
            return Err(StabilityError::dimension_mismatch(
                item.id,
                "inconsistent tm labels across batch",
            ));
        }
    }

    let input_ids = concatenate(
        Axis(0),
        &items.iter().map(|it| it.input_ids.view()).collect::<Vec<_>>(),
    )
    .map_err(|e| StabilityError::dimension_mismatch(first.id, e.to_string()))?;
    let attention_mask = concatenate(
        Axis(0),
        &items
            .iter()
            .map(|it| it.attention_mask.view())
            .collect::<Vec<_>>(),
    )
    .map_err(|e| StabilityError::dimension_mismatch(first.id, e.to_string()))?;
    let position_ids = if with_positions {
        Some(
            concatenate(
                Axis(0),
                &items
                    .iter()
                    .map(|it| it.position_ids.as_ref().unwrap().view())
                    .collect::<Vec<_>>(),
            )
            .map_err(|e| StabilityError::dimension_mismatch(first.id, e.to_string()))?,
        )
    } else {
        None
    };

    Ok(ProteinBatch {
        input_ids,
        attention_mask,
        position_ids,
        ph: Array1::from_iter(items.iter().map(|it| it.ph)),
        tm: with_tm.then(|| Array1::from_iter(items.iter().map(|it| it.tm.unwrap_or(f64::NAN)))),
        id: items.iter().map(|it| it.id).collect(),
        n_splits: items.iter().map(|it| it.input_ids.nrows()).collect(),
    })
}
