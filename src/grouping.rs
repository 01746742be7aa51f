use crate::alphabet::{count_distance, residue_counts};
use crate::error::{Result, StabilityError};
use crate::stats;
use crate::types::DiffLocationMap;
use log::info;
use polars::prelude::*;
use rand::{thread_rng, Rng};
use std::collections::{BTreeMap, HashMap};

/// Disjoint-set over row indices, used to build mutation groups as
/// connected components of the substitution-rate relation.
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        DisjointSet {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, i: usize, j: usize) {
        let (ri, rj) = (self.find(i), self.find(j));
        if ri == rj {
            return;
        }
        let (big, small) = if self.size[ri] >= self.size[rj] {
            (ri, rj)
        } else {
            (rj, ri)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

/// Counts positions where two equal-length sequences differ.
fn substitution_count(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).filter(|(x, y)| x != y).count()
}

/// Finds protein sequences that are mutations of each other and assigns
/// them the same group number.
///
/// Sequences are bucketed by exact length (substitutions never change
/// length); within a bucket, each pair is first screened with the cheap
/// residue-count distance and only survivors are compared character by
/// character. Two sequences belong to the same group iff they are
/// connected by a chain of pairs whose substitution rate is below
/// `max_rate`. Group ids are numbered from 0 in order of each group's
/// smallest row index; singletons stay null.
///
/// # Arguments
/// * `df` - DataFrame with a "protein_sequence" column
/// * `max_rate` - maximum fraction of differing amino-acids between two
///   mutants of the same group
///
/// # Returns
/// * `Result<Column>` - Nullable UInt32 "sub_group" column aligned with
///   the input rows; deterministic for a given table and rate
///
/// # Errors
/// * Returns `StabilityError::InvalidParameter` if `max_rate` is not in (0, 1]
/// * Returns `StabilityError::DataError` if the sequence column is missing
pub fn group_mutations(df: &DataFrame, max_rate: f64) -> Result<Column> {
    if !(max_rate > 0.0 && max_rate <= 1.0) {
        return Err(StabilityError::invalid_parameter(
            "max_rate",
            max_rate,
            "must be in (0, 1]",
        ));
    }

    let sequences = df
        .column("protein_sequence")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .str()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;

    let seqs: Vec<&str> = (0..df.height())
        .map(|i| sequences.get(i).unwrap_or(""))
        .collect();
    let counts: Vec<_> = seqs.iter().map(|s| residue_counts(s)).collect();

    // Bucket rows by sequence length
    let mut buckets: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, seq) in seqs.iter().enumerate() {
        if !seq.is_empty() {
            buckets.entry(seq.len()).or_default().push(i);
        }
    }

    let mut dsu = DisjointSet::new(seqs.len());
    let mut filtered = 0usize;

    for (len, rows) in &buckets {
        for (pos, &i) in rows.iter().enumerate() {
            for &j in &rows[pos + 1..] {
                if dsu.find(i) == dsu.find(j) {
                    continue;
                }
                let estimate = count_distance(&counts[i], &counts[j]);
                if estimate as f64 / (*len as f64) >= max_rate {
                    filtered += 1;
                    continue;
                }
                let diff = substitution_count(seqs[i], seqs[j]);
                if (diff as f64) / (*len as f64) < max_rate {
                    dsu.union(i, j);
                }
            }
        }
    }

    // Number components in order of their smallest member row
    let mut group_ids: Vec<Option<u32>> = vec![None; seqs.len()];
    let mut root_to_id: HashMap<usize, u32> = HashMap::new();
    let mut next_id = 0u32;
    for i in 0..seqs.len() {
        let root = dsu.find(i);
        if dsu.size[root] < 2 {
            continue;
        }
        let id = *root_to_id.entry(root).or_insert_with(|| {
            let id = next_id;
            next_id += 1;
            id
        });
        group_ids[i] = Some(id);
    }

    info!(
        "grouped {} rows into {} mutation groups ({} candidate pairs discarded by count pre-filter)",
        seqs.len(),
        next_id,
        filtered
    );

    Ok(Column::new("sub_group".into(), group_ids))
}

/// Picks a reference protein in each mutation group and returns the
/// mutation locations of the other members with respect to it.
///
/// Groups of two draw the reference uniformly at random; larger groups
/// use the member whose tm is closest to the group median. Members with
/// a null tm only become the reference when the whole group lacks tm.
///
/// # Arguments
/// * `df` - DataFrame with "seq_id", "protein_sequence" and "sub_group"
///   columns; "tm" is used for reference selection when present
///
/// # Returns
/// * `Result<DiffLocationMap>` - seq_id to ordered differing positions;
///   the reference and members identical to it have no entry
pub fn locate_mutations(df: &DataFrame) -> Result<DiffLocationMap> {
    let seq_ids = df
        .column("seq_id")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .i64()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;
    let sequences = df
        .column("protein_sequence")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .str()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;
    let sub_groups = df
        .column("sub_group")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .u32()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;
    let tm = match df.column("tm") {
        Ok(col) => Some(
            col.f64()
                .map_err(|e| StabilityError::DataError(e.to_string()))?,
        ),
        Err(_) => None,
    };

    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for i in 0..df.height() {
        if let Some(g) = sub_groups.get(i) {
            groups.entry(g).or_default().push(i);
        }
    }

    let mut rng = thread_rng();
    let mut locations = DiffLocationMap::new();

    for rows in groups.values() {
        let reference = if rows.len() == 2 {
            rows[rng.gen_range(0..2)]
        } else {
            select_median_reference(rows, tm)
        };

        let ref_seq = sequences.get(reference).unwrap_or("");
        for &row in rows {
            if row == reference {
                continue;
            }
            let seq = sequences.get(row).unwrap_or("");
            let diff: Vec<usize> = ref_seq
                .bytes()
                .zip(seq.bytes())
                .enumerate()
                .filter(|(_, (a, b))| a != b)
                .map(|(pos, _)| pos)
                .collect();
            if !diff.is_empty() {
                if let Some(id) = seq_ids.get(row) {
                    locations.insert(id, diff);
                }
            }
        }
    }

    Ok(locations)
}

/// Member whose tm lies closest to the group median; first member when
/// the whole group lacks tm.
fn select_median_reference(rows: &[usize], tm: Option<&Float64Chunked>) -> usize {
    let labeled: Vec<(usize, f64)> = rows
        .iter()
        .filter_map(|&row| tm.and_then(|ca| ca.get(row)).map(|t| (row, t)))
        .collect();
    if labeled.is_empty() {
        return rows[0];
    }

    let median = stats::median(&labeled.iter().map(|&(_, t)| t).collect::<Vec<_>>());
    labeled
        .iter()
        .min_by(|a, b| (a.1 - median).abs().total_cmp(&(b.1 - median).abs()))
        .map(|&(row, _)| row)
        .unwrap_or(rows[0])
}

/// Attaches a diff-location map as the nullable "sub_locations" list
/// column, aligned with the frame's "seq_id" column.
pub fn with_sub_locations(df: &DataFrame, locations: &DiffLocationMap) -> Result<DataFrame> {
    let seq_ids = df
        .column("seq_id")
        .map_err(|e| StabilityError::DataError(e.to_string()))?
        .i64()
        .map_err(|e| StabilityError::DataError(e.to_string()))?;

    let values: Vec<Option<Series>> = (0..df.height())
        .map(|i| {
            seq_ids.get(i).and_then(|id| {
                locations.get(&id).map(|locs| {
                    Series::new(
                        "".into(),
                        locs.iter().map(|&p| p as u32).collect::<Vec<u32>>(),
                    )
                })
            })
        })
        .collect();

    let mut df = df.clone();
    df.with_column(Column::new("sub_locations".into(), values))
        .map_err(|e| StabilityError::DataError(e.to_string()))?;
    Ok(df)
}
